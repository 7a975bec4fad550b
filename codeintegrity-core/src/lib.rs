//! codeintegrity core library - commit-history provenance analysis.
//!
//! The main entry point is [`pipeline::IntegrityPipeline`], which runs
//! Load → Classify → Detect → Score → Assemble for one repository.
//! [`runner::Runner`] fans the pipeline out over many repositories.

pub mod acquire;
pub mod anomaly;
pub mod config;
pub mod error;
pub mod graph;
pub mod input;
pub mod pipeline;
pub mod progress;
pub mod report;
pub mod runner;
pub mod score;
pub mod signature;
pub mod types;
