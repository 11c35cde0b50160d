//! Ingestion: markdown documents in, deduplicated and embedded knowledge
//! chunks out.

pub mod pipeline;
pub mod resume;

pub use pipeline::{IngestReport, IngestionPipeline, JobStatus};
pub use resume::ResumeTracker;
