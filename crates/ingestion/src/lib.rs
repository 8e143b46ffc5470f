//! DocRAG Ingestion
//!
//! Turns submitted documents into stored, embedded chunks:
//! 1. Downloads the file (size and time limited)
//! 2. Extracts text from PDF or DOCX
//! 3. Splits the text into overlapping sentence-aware chunks
//! 4. Embeds all chunks in one batch and persists them atomically
//! 5. Marks the document completed or failed

pub mod chunker;
pub mod download;
pub mod errors;
pub mod extract;
pub mod processor;

pub use chunker::{chunk, TextChunker};
pub use errors::IngestionError;
pub use extract::FileType;
pub use processor::{DocumentJob, IngestionProcessor, IngestionSource};
