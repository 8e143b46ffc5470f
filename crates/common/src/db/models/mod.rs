//! SeaORM entity models

mod chunk;
mod document;

pub use document::{
    ActiveModel as DocumentActiveModel,
    Column as DocumentColumn,
    DocumentStatus,
    Entity as DocumentEntity,
    Model as Document,
};

pub use chunk::{
    ActiveModel as ChunkActiveModel,
    Column as ChunkColumn,
    Entity as ChunkEntity,
    Model as Chunk,
};
