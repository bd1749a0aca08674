pub mod adjust;
pub mod cancel;
pub mod composite;
pub mod config;
pub mod error;
pub mod game;
pub mod input;
pub mod league;
pub mod logging;
pub mod momentum;
pub mod normalize;
pub mod pipeline;
pub mod prepare;
pub mod ranking;
pub mod ratings;
pub mod recency;
pub mod residual_model;
pub mod snapshot;
pub mod sos;

pub use cancel::CancelFlag;
pub use config::EngineConfig;
pub use error::{EngineError, Result};
pub use pipeline::run_pipeline;
pub use prepare::EngineInput;
pub use snapshot::{Snapshot, SnapshotStore, TeamRating};
