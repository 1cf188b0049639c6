pub mod config;
pub mod orchestrator;
pub mod progress;
pub mod records;
pub mod retry;
pub mod sink;
pub mod steam;
pub mod throttle;

pub mod util {
    pub mod env;
    pub mod logging;
}

pub use config::HarvestConfig;
pub use orchestrator::{Harvester, RunSummary};
