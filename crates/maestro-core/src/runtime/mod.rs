//! Execution runtime: retry, breaker, group executor, router, controller.

pub mod breaker;
pub mod controller;
pub mod executor;
pub mod memory;
pub mod retry;
pub mod router;

pub use breaker::{BreakerRegistry, BreakerState};
pub use controller::{InvokeRequest, RunController, RunOutcome};
pub use executor::GroupExecutor;
pub use retry::RetryPolicy;
pub use router::{Route, Router};
