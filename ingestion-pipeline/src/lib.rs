pub mod builders;
pub mod moderation;
pub mod pipeline;
pub mod sources;
pub mod sync;

pub use pipeline::IngestionPipeline;
