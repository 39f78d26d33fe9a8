pub mod audit;
pub mod batch;
pub mod campaign;
pub mod campaign_config;
pub mod checkpoint;
pub mod config;
pub mod errors;
pub mod events;
pub mod metrics;
pub mod milestone;
pub mod phase;
pub mod process;
pub mod safety;
pub mod state;
pub mod tool;
pub mod ui;
pub mod util;
