use std::cmp::Ordering;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use hive_models::memory::{RecalledMemory, TradeMemory};
use tracing::debug;

use crate::error::StoreError;
use crate::store::Store;

/// Turns a narrative into a fixed-width vector.
pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;
    fn embed(&self, text: &str) -> Result<Vec<f32>, StoreError>;
}

/// Deterministic feature-hashing embedder over lowercase word unigrams and bigrams.
///
/// Vectors are L2-normalized so cosine distance depends only on shared vocabulary.
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}

impl Embedder for HashingEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, StoreError> {
        let tokens: Vec<String> = text
            .split(|c: char| !c.is_alphanumeric() && c != '-' && c != '.')
            .map(|t| t.trim_matches('.').to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();

        let mut vector = vec![0.0f32; self.dimensions];
        let mut bump = |feature: &str, weight: f32| {
            let hash = fnv1a(feature.as_bytes());
            let index = (hash % self.dimensions as u64) as usize;
            // High bit picks the sign so colliding features tend to cancel.
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            vector[index] += sign * weight;
        };

        for token in &tokens {
            bump(token, 1.0);
        }
        for pair in tokens.windows(2) {
            bump(&format!("{} {}", pair[0], pair[1]), 0.5);
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        Ok(vector)
    }
}

/// Sentence embeddings from a local ONNX model (BGE-small-en-v1.5, 384 dimensions).
///
/// Weights are downloaded on first use into the fastembed cache directory.
#[cfg(feature = "fastembed")]
pub struct FastEmbedder {
    model: std::sync::Mutex<fastembed::TextEmbedding>,
    dimensions: usize,
}

#[cfg(feature = "fastembed")]
impl FastEmbedder {
    pub fn new() -> Result<Self, StoreError> {
        use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

        let model = TextEmbedding::try_new(
            InitOptions::new(EmbeddingModel::BGESmallENV15).with_show_download_progress(false),
        )
        .map_err(|e| StoreError::Embedding(format!("failed to load model: {e}")))?;
        Ok(Self {
            model: std::sync::Mutex::new(model),
            dimensions: 384,
        })
    }
}

#[cfg(feature = "fastembed")]
impl Embedder for FastEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, StoreError> {
        let mut model = self
            .model
            .lock()
            .map_err(|e| StoreError::Embedding(format!("model poisoned: {e}")))?;
        model
            .embed(vec![text], None)
            .map_err(|e| StoreError::Embedding(e.to_string()))?
            .pop()
            .ok_or_else(|| StoreError::Embedding("model returned no vector".to_string()))
    }
}

/// `1 - cosine similarity`. Mismatched or zero vectors are maximally distant.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 1.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - dot / (norm_a * norm_b)
}

fn rank(candidates: Vec<TradeMemory>, query: &[f32], k: usize) -> Vec<RecalledMemory> {
    let mut scored: Vec<RecalledMemory> = candidates
        .into_iter()
        .map(|memory| RecalledMemory {
            distance: cosine_distance(&memory.embedding, query),
            memory,
        })
        .collect();
    scored.sort_by(|a, b| {
        a.distance
            .partial_cmp(&b.distance)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.memory.timestamp.cmp(&a.memory.timestamp))
    });
    scored.truncate(k);
    scored
}

/// Similarity index over embedded trade memories.
#[async_trait]
pub trait MemoryIndex: Send + Sync {
    async fn insert(&self, memory: TradeMemory) -> Result<(), StoreError>;

    /// The `k` memories of `user_id` closest to `query`, ascending by distance.
    async fn nearest(
        &self,
        user_id: &str,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<RecalledMemory>, StoreError>;
}

/// Exact scan over an in-process vector. Used for isolated runs and tests.
#[derive(Default)]
pub struct FlatIndex {
    entries: RwLock<Vec<TradeMemory>>,
}

impl FlatIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl MemoryIndex for FlatIndex {
    async fn insert(&self, memory: TradeMemory) -> Result<(), StoreError> {
        self.entries
            .write()
            .map_err(|e| StoreError::Unavailable(format!("memory index poisoned: {e}")))?
            .push(memory);
        Ok(())
    }

    async fn nearest(
        &self,
        user_id: &str,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<RecalledMemory>, StoreError> {
        let candidates: Vec<TradeMemory> = self
            .entries
            .read()
            .map_err(|e| StoreError::Unavailable(format!("memory index poisoned: {e}")))?
            .iter()
            .filter(|m| m.user_id == user_id)
            .cloned()
            .collect();
        Ok(rank(candidates, query, k))
    }
}

/// Exact scan over the `trade_memories` table.
pub struct SqliteIndex {
    store: Arc<Store>,
}

impl SqliteIndex {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl MemoryIndex for SqliteIndex {
    async fn insert(&self, memory: TradeMemory) -> Result<(), StoreError> {
        self.store.with_sqlite(|sqlite| sqlite.insert_memory(&memory))
    }

    async fn nearest(
        &self,
        user_id: &str,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<RecalledMemory>, StoreError> {
        // The scan runs off the async workers so a caller's timeout can still fire
        // while another writer holds the connection.
        let store = Arc::clone(&self.store);
        let user_id = user_id.to_string();
        let query = query.to_vec();
        tokio::task::spawn_blocking(move || {
            let candidates = store.with_sqlite(|sqlite| sqlite.memories(&user_id))?;
            Ok(rank(candidates, &query, k))
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("memory scan aborted: {e}")))?
    }
}

/// Embeds trade narratives on write and answers similarity queries on read.
#[derive(Clone)]
pub struct MemoryStore {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn MemoryIndex>,
}

impl MemoryStore {
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<dyn MemoryIndex>) -> Self {
        Self { embedder, index }
    }

    /// Hashing embedder over an in-process flat index.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(HashingEmbedder::default()), Arc::new(FlatIndex::new()))
    }

    /// Hashing embedder over the persistent store.
    pub fn sqlite(store: Arc<Store>) -> Self {
        Self::sqlite_with(Arc::new(HashingEmbedder::default()), store)
    }

    pub fn sqlite_with(embedder: Arc<dyn Embedder>, store: Arc<Store>) -> Self {
        Self::new(embedder, Arc::new(SqliteIndex::new(store)))
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, StoreError> {
        let embedder = Arc::clone(&self.embedder);
        let text = text.to_string();
        tokio::task::spawn_blocking(move || embedder.embed(&text))
            .await
            .map_err(|e| StoreError::Embedding(format!("embedding task aborted: {e}")))?
    }

    /// Embed (if needed) and append a memory.
    pub async fn add_memory(&self, mut memory: TradeMemory) -> Result<TradeMemory, StoreError> {
        if memory.embedding.is_empty() {
            memory.embedding = self.embed(&memory.narrative).await?;
        }
        self.index.insert(memory.clone()).await?;
        debug!(user_id = %memory.user_id, symbol = %memory.symbol, "Stored trade memory");
        Ok(memory)
    }

    /// The `k` memories most similar to `query`, ascending by distance.
    pub async fn recall(
        &self,
        user_id: &str,
        query: &str,
        k: usize,
    ) -> Result<Vec<RecalledMemory>, StoreError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let embedding = self.embed(query).await?;
        self.index.nearest(user_id, &embedding, k).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use hive_models::memory::{MemorySource, TradeOutcome};
    use uuid::Uuid;

    fn memory(user: &str, symbol: &str, narrative: &str) -> TradeMemory {
        TradeMemory {
            id: Uuid::new_v4(),
            user_id: user.to_string(),
            symbol: symbol.to_string(),
            timestamp: Utc::now(),
            outcome: TradeOutcome::Profit,
            pnl_percent: 4.0,
            narrative: narrative.to_string(),
            source: MemorySource::Ai,
            embedding: Vec::new(),
        }
    }

    #[test]
    fn embedding_is_deterministic_and_normalized() {
        let embedder = HashingEmbedder::default();
        let a = embedder
            .embed("Trade for BTCUSDT. Macro: Risk-On, Tech score: 8")
            .unwrap();
        let b = embedder
            .embed("Trade for BTCUSDT. Macro: Risk-On, Tech score: 8")
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 256);
        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[cfg(feature = "fastembed")]
    #[test]
    #[ignore = "downloads the BGE-small model"]
    fn fastembed_ranks_related_narratives_closer() {
        let embedder = FastEmbedder::new().unwrap();
        let query = embedder.embed("BTCUSDT stop loss hit during Risk-Off").unwrap();
        let near = embedder
            .embed("Trade for BTCUSDT. Macro: Risk-Off. Closed -3.10% (stop loss).")
            .unwrap();
        let far = embedder.embed("Weekly grocery list: apples, bread").unwrap();
        assert_eq!(query.len(), embedder.dimensions());
        assert!(cosine_distance(&query, &near) < cosine_distance(&query, &far));
    }

    #[test]
    fn cosine_distance_edges() {
        assert_eq!(cosine_distance(&[1.0, 0.0], &[1.0, 0.0]), 0.0);
        assert!((cosine_distance(&[1.0, 0.0], &[0.0, 1.0]) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_distance(&[], &[]), 1.0);
        assert_eq!(cosine_distance(&[1.0], &[1.0, 0.0]), 1.0);
        assert_eq!(cosine_distance(&[0.0, 0.0], &[1.0, 0.0]), 1.0);
    }

    #[tokio::test]
    async fn recall_orders_by_similarity() {
        let store = MemoryStore::in_memory();
        store
            .add_memory(memory("alice", "ETHUSDT", "Sold ETHUSDT after a sentiment crash in Risk-Off"))
            .await
            .unwrap();
        store
            .add_memory(memory("alice", "BTCUSDT", "Sold BTCUSDT with profit. Regime Risk-On strong momentum"))
            .await
            .unwrap();
        store
            .add_memory(memory("bob", "BTCUSDT", "Sold BTCUSDT with profit. Regime Risk-On strong momentum"))
            .await
            .unwrap();

        let recalled = store
            .recall("alice", "BTCUSDT Risk-On strong momentum", 3)
            .await
            .unwrap();
        assert_eq!(recalled.len(), 2);
        assert_eq!(recalled[0].memory.symbol, "BTCUSDT");
        assert!(recalled[0].distance <= recalled[1].distance);
        assert!(recalled.iter().all(|r| r.memory.user_id == "alice"));
    }

    #[tokio::test]
    async fn recall_with_zero_k_is_empty() {
        let store = MemoryStore::in_memory();
        store
            .add_memory(memory("alice", "BTCUSDT", "anything"))
            .await
            .unwrap();
        assert!(store.recall("alice", "anything", 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn sqlite_index_matches_flat_index() {
        let backing = Arc::new(Store::open_in_memory().unwrap());
        let store = MemoryStore::sqlite(backing.clone());
        store
            .add_memory(memory("alice", "SOLUSDT", "Sold SOLUSDT at a loss during Risk-Off"))
            .await
            .unwrap();
        store
            .add_memory(memory("alice", "ADAUSDT", "Sold ADAUSDT with profit in Risk-On"))
            .await
            .unwrap();

        let recalled = store.recall("alice", "SOLUSDT loss Risk-Off", 1).await.unwrap();
        assert_eq!(recalled.len(), 1);
        assert_eq!(recalled[0].memory.symbol, "SOLUSDT");
        assert_eq!(backing.with_sqlite(|s| s.memory_count("alice")).unwrap(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn sqlite_scan_yields_to_timeouts_while_the_connection_is_busy() {
        let backing = Arc::new(Store::open_in_memory().unwrap());
        let store = MemoryStore::sqlite(backing.clone());
        store
            .add_memory(memory("alice", "SOLUSDT", "Sold SOLUSDT at a loss during Risk-Off"))
            .await
            .unwrap();

        let (held_tx, held_rx) = std::sync::mpsc::channel();
        let holder = std::thread::spawn(move || {
            backing
                .with_sqlite(|_| {
                    held_tx.send(()).unwrap();
                    std::thread::sleep(std::time::Duration::from_secs(2));
                    Ok(())
                })
                .unwrap();
        });
        held_rx.recv().unwrap();

        let started = std::time::Instant::now();
        let result = tokio::time::timeout(
            std::time::Duration::from_millis(100),
            store.recall("alice", "SOLUSDT", 1),
        )
        .await;
        assert!(result.is_err());
        assert!(started.elapsed() < std::time::Duration::from_secs(1));
        holder.join().unwrap();
    }
}
