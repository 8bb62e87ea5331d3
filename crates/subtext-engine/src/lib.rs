//! HTTP client for the SubText backend and the pipeline that chains its stages.

pub mod api;
pub mod config;
pub mod pipeline;

pub use api::{ApiClient, AuthSession, SubscriptionPlan};
pub use config::ClientConfig;
pub use pipeline::{AnalysisBackend, AnalysisPipeline, PipelineOutcome, SharedSession};
