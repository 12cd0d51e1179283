#![allow(clippy::too_many_arguments)]

pub mod analytics;
pub mod cache;
pub mod config;
pub mod errors;
pub mod gate;
pub mod logger;
pub mod models;
pub mod orchestrator;
pub mod provider;

pub use config::Config;
pub use models::{IntelligenceRecord, MarketSummary, PriceObservation, TimeWindow};
pub use orchestrator::{Orchestrator, SubjectInput};
