pub mod answer;
pub mod cache;
pub mod dates;
pub mod expansion;
pub mod hybrid;
pub mod rerank;
pub mod router;

pub use cache::{DatasetCatalog, DatasetEntry, DatasetLoader};
pub use hybrid::HybridHit;
pub use rerank::RankedChunk;
