//! hotfn-api — HTTP dispatch for both hotfn tiers.
//!
//! # Worker routes
//!
//! | Path | Description |
//! |---|---|
//! | `/execute?name=` | Run a function from the warm pool |
//! | `/clear?reset_images=` | Destroy all containers, optionally forget images |
//! | `/prepare` | Provision one warm container per configured function |
//! | `/configure?...` | Partial update of the caching options |
//! | `/status` | Pool statistics |
//!
//! # Load balancer routes
//!
//! | Path | Description |
//! |---|---|
//! | `/execute?name=` | Select a worker, forward, attach load-balancing info |
//! | `/clear` | Broadcast `/clear` to every worker, join all |
//! | `/prepare` | Broadcast `/prepare` to every worker, join all |
//! | `/nodes` | Fleet snapshot with in-flight counts |
//!
//! Failures use `{error: true, message}` with 400 for missing or invalid
//! parameters, 404 for unknown paths and 500 otherwise.

pub mod balancer;
pub mod client;
pub mod error;
pub mod worker;

pub use balancer::{BalancerState, NodesResponse, broadcast, build_balancer_router};
pub use client::{ClientError, UpstreamResponse};
pub use error::ApiError;
pub use worker::{ConfigureResponse, WorkerState, build_worker_router};
