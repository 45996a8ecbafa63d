pub mod cli;
pub mod config;
mod db;
pub mod embedder;
pub mod embedding;
pub mod error;
pub mod index;
pub mod ingest;
pub mod path;
pub mod store;
mod utils;

pub use config::Opts;
pub use embedder::{CommandEmbedder, EmbedError, Embedder};
pub use embedding::{Embedding, normalize};
pub use error::{Error, Result};
pub use ingest::{IngestOptions, IngestReport, Ingestor};
pub use path::{Identifier, to_file_path, to_identifier};
pub use store::{ImageRecord, ImageStore, ImageStoreBuilder, SearchResult};
