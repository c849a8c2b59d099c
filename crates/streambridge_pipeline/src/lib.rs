#![forbid(unsafe_code)]

pub mod config;
pub mod dispatch;
pub mod orchestrator;
pub mod parser;



pub use config::PipelineConfig;
pub use dispatch::{CommandRouter, DispatchScheduler, EventListener};
pub use orchestrator::{ChatPipeline, OrchestratorTimings};
