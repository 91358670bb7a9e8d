pub mod config;
pub mod error;
pub mod file_config;
pub mod geo;
pub mod types;

pub use config::Config;
pub use error::CivicOpsError;
pub use file_config::{load_engine_config, EngineConfig};
pub use geo::{centroid, haversine_meters, snap_to_grid, GeoPoint};
pub use types::*;
