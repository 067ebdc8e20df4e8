#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![forbid(unsafe_code)]

//! Server half of loomsync: the event log (C2), dual-storage writer (C3),
//! and compactor/pruner (C4) behind an `axum` wire surface.

pub mod app;
pub mod compactor;
pub mod config;
pub mod error;
pub mod event_log;
pub mod routes;
pub mod scheduler;
pub mod writer;
mod websocket;

pub use app::{App, AppBuilder};
pub use config::{CollectionConfig, CollectionConfigBuilder, MutationContext};
pub use error::Error;
pub use routes::router;

// vim: ts=4
