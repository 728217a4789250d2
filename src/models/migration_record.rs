//! Migration ledger entity model
//!
//! A row exists for exactly the SQL files whose forward section is applied.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "migrations")]
pub struct Model {
    /// Insertion order; rollback walks this descending
    #[sea_orm(primary_key)]
    pub id: i32,

    /// File name, e.g. `20250101000000_create_conversations.sql`
    #[sea_orm(unique)]
    pub name: String,

    /// Path the file was applied from
    pub file: String,

    pub executed_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
