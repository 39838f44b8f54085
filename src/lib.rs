//! Lab Trading Agent
//!
//! Answers financial-analysis questions by letting a language model call
//! information-gathering capabilities (documents, news, market data, economic
//! calendar, past analyses) and synthesize a structured report.
//!
//! REASONING LOOP:
//! QUERY → BACKEND STEP → CAPABILITY CALL → OBSERVATION → ... → FINAL ANSWER

pub mod agent;
pub mod api;
pub mod backend;
pub mod capabilities;
pub mod config;
pub mod engine;
pub mod error;
pub mod models;
pub mod normalizer;
pub mod orchestration;

pub use error::Result;

// Re-export common types
pub use config::EngineConfig;
pub use engine::AnalysisEngine;
pub use models::*;
