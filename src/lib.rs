//! # conveyer
//!
//! A horizontally scalable job conveyer. Drains work items from a shared
//! queue on one dispatch thread and runs each of them concurrently on an
//! elastic, bounded execution pool.
//!
//! Every job sees the shared state through a view scoped to its
//! `owner/unit` namespace, logs through a per-conveyer log aggregator, and
//! counts toward OpenTelemetry job counters once the conveyer is registered.

pub mod config;
pub mod engine;
pub mod error;
pub mod log;
pub mod model;
pub mod queue;
pub mod repo;
pub mod state;
pub mod telemetry;
pub mod users;

pub use engine::{Conveyer, ConveyerConfig, ConveyerStats, DispatchStatus, Lifecycle};
pub use error::{Error, Result};
