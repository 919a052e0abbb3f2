//! kadwalk simulator
//!
//! Runs closest-peer lookups over a randomly generated in-memory network so
//! the engine's accuracy and cost can be observed without real peers.

pub mod config;
pub mod network;
pub mod report;

pub use config::Config;
pub use network::Simulation;
pub use report::{run_lookup, LookupReport, Outcome};
