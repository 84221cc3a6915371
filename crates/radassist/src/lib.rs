//! radassist: chest radiograph report assistant.
//!
//! Three services, each owning a lazily loaded model:
//! [`vision::ClassifierService`] scores pathologies on a radiograph,
//! [`retrieval::RetrievalService`] finds similar historical reports, and
//! [`narrative::NarrativeService`] writes the report and answers follow-up
//! questions. [`pipeline::Pipeline`] runs them in order.

pub mod cli;
pub mod config;
pub mod error;
pub mod narrative;
pub mod pipeline;
pub mod retrieval;
pub mod runtime;
pub mod vision;

pub use config::Config;
pub use error::{Error, Result};
