//! Domain-level building blocks shared by the listener and storage crates:
//! the transfer payload model, its parser and classifier, environment-driven
//! configuration, telemetry wiring and the storage traits.

pub mod config;
pub mod model;
pub mod services;
pub mod storage;

pub use model::*;
pub use storage::*;
