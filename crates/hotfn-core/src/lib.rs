//! hotfn-core — shared data model for the hotfn platform.
//!
//! Everything both tiers agree on lives here: the worker fleet entry,
//! the per-worker caching options and their partial updates, the
//! function catalog entry, the JSON wire types, and the TOML config
//! files for the worker and the load balancer.

pub mod config;
pub mod options;
pub mod types;

pub use config::{BalancerConfig, DriverConfig, WorkerConfig};
pub use options::{CachingOptions, CachingOptionsUpdate, OptionsChange, OptionsError};
pub use types::*;
