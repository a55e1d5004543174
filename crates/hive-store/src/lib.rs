pub mod error;
pub mod memory;
pub mod recall;
pub mod sqlite;
pub mod store;

pub use error::StoreError;
pub use memory::MemoryCache;
pub use recall::{
    cosine_distance, Embedder, FlatIndex, HashingEmbedder, MemoryIndex, MemoryStore, SqliteIndex,
};
#[cfg(feature = "fastembed")]
pub use recall::FastEmbedder;
pub use sqlite::SqliteStore;
pub use store::Store;
