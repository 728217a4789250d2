//! # Repository Layer
//!
//! SeaORM data access for the inbox tables. Repositories borrow any
//! [`sea_orm::ConnectionTrait`], either the pool or an open transaction.

pub mod conversation;
pub mod message;
pub mod pending_read;
pub mod reaction;

pub use conversation::ConversationRepository;
pub use message::MessageRepository;
pub use pending_read::PendingReadRepository;
pub use reaction::ReactionRepository;
