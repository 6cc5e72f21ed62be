//! hotfn-scheduler — worker node selection for the load balancer.
//!
//! The scheduler owns the static worker fleet and each node's in-flight
//! counter. Every successful [`Scheduler::select`] checks out one unit of
//! in-flight credit on the chosen node; [`Scheduler::finished`] returns it.
//! [`InFlightGuard`] ties the two together so the credit is returned on
//! every exit path.
//!
//! # Architecture
//!
//! ```text
//! Scheduler
//!   ├── nodes (sorted by id, fixed at start)
//!   ├── in-flight counters (one mutex, read and bumped with the decision)
//!   └── Box<dyn Strategy>
//!       ├── RoundRobin
//!       ├── LeastInFlight
//!       └── BoundedHashing
//! ```

pub mod error;
pub mod load_balancer;
pub mod scheduler;

pub use error::{SchedulerError, SchedulerResult};
pub use load_balancer::{strategy_from_name, BoundedHashing, LeastInFlight, NodeLoad, RoundRobin, Strategy};
pub use scheduler::{InFlightGuard, NodeStatus, Scheduler, Selection};
