//! The alert ingestion pipeline: normalize a webhook body, deduplicate it
//! against the active window, enrich it from the incident knowledge base,
//! persist it, and publish the resulting lifecycle event.
//!
//! [`lifecycle`] handles the two transitions that don't originate from a
//! webhook (acknowledge, resolve) but still publish on the same channels.

pub mod dedup;
pub mod lifecycle;
pub mod normalize;
pub mod pipeline;

pub use dedup::{Dedup, DedupCache, DedupOutcome};
pub use lifecycle::AlertLifecycle;
pub use normalize::{compute_fingerprint, normalize_alertmanager, normalize_generic, normalize_keep};
pub use pipeline::{IngestResult, IngestionPipeline};
