//! Conveyer engine: dispatch loop, execution pool, job lifecycle.

pub mod context;
pub mod conveyer;
pub mod dispatch;
pub mod pool;

pub use context::ExecutionContext;
pub use conveyer::{Conveyer, ConveyerConfig, ConveyerStats, Lifecycle};
pub use dispatch::{DispatchLoop, DispatchStatus};
pub use pool::{ExecutionPool, PoolConfig};
