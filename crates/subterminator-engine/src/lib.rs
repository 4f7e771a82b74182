//! The AI-led task orchestration engine: Task Runner, Checkpoint Handler,
//! and the turn loop that ties the LLM client, MCP client, and human
//! operator together into one bounded, cancellable run.

pub mod checkpoint;
pub mod config;
pub mod runner;

pub use checkpoint::{HumanIo, StdinHumanIo};
pub use config::RunConfig;
pub use runner::{run, run_with_transport};
