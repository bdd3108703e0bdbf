//! Multi-signal, confidence-weighted target detection.
//!
//! Catalog targets are checked by cheap signal evaluators, scored by
//! weight, boosted by corroborating indicators, normalized across the
//! batch and ranked. A [`cache::DetectionCache`] memoizes whole runs.

pub mod cache;
pub mod engine;
pub mod scoring;
pub mod signals;
pub mod types;
