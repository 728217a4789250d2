//! # Data Models
//!
//! SeaORM entities for the inbox tables and the migration ledger.

use serde::{Deserialize, Serialize};

pub mod conversation;
pub mod message;
pub mod message_reaction;
pub mod migration_record;
pub mod pending_read;

pub use conversation::Entity as Conversation;
pub use message::Entity as Message;
pub use message_reaction::Entity as MessageReaction;
pub use migration_record::Entity as MigrationRecord;
pub use pending_read::Entity as PendingRead;

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "social-selling".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
