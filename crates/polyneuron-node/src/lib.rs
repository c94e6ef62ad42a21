pub mod cli;
pub mod config;
pub mod logging;

pub use cli::{run_simulation, SimulationReport};
pub use config::NodeConfig;
