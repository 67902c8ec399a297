//! Waypoint - travel planner over a supervised worker fleet
//!
//! Waypoint keeps a small fleet of local HTTP worker processes (flights,
//! hotels, activities, restaurants and friends) alive, routes tool calls to
//! the ready ones, and builds trip plans from their answers.
//!
//! # Modules
//!
//! - [`fleet`] - Worker launch, readiness, routing and shutdown
//! - [`llm`] - LLM client trait and OpenAI-compatible implementation
//! - [`trip`] - Request parsing, data gathering and price clustering
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod cli;
pub mod config;
pub mod fleet;
pub mod llm;
pub mod trip;

// Re-export commonly used types
pub use config::{Config, FleetConfig, LlmConfig};
pub use fleet::{
    CallPolicy, FleetError, FleetEvent, FleetManager, FleetPhase, ReadinessSummary, WorkerInfo, WorkerSpec,
    WorkerStatus, empty_result,
};
pub use llm::{CompletionRequest, CompletionResponse, LlmClient, LlmError, OpenAIClient, create_client};
pub use trip::{Recommendation, TripError, TripPlan, TripPlanner, TripRequest};
