//! Document chunk entity
//!
//! The `embedding vector(D)` column is not mapped here. Every query that
//! reads or writes it goes through raw SQL in the repository.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "document_chunks")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false, column_type = "Text")]
    pub id: String,

    #[sea_orm(column_type = "Text")]
    pub document_id: String,

    #[sea_orm(column_type = "Text")]
    pub content: String,

    /// Zero-based, gapless position within the document
    pub chunk_index: i32,

    /// `char_count`, `word_count` and any extra chunk attributes
    #[sea_orm(column_type = "JsonBinary")]
    pub metadata: Json,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::document::Entity",
        from = "Column::DocumentId",
        to = "super::document::Column::Id",
        on_delete = "Cascade"
    )]
    Document,
}

impl Related<super::document::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Document.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
