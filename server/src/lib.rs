//! # Spotwatch Server
//!
//! Axum host for the parking engine: a JSON API over spots, sensor readings,
//! reservations and payments, a WebSocket stream of spot notifications, and
//! a topic router for sensor transport messages.
//!
//! ## Modules
//!
//! - [`config`]: environment-driven configuration
//! - [`server`]: state, router and health endpoints
//! - [`api`]: request handlers
//! - [`ingest`]: MQTT-topic message routing
//! - [`payment_gateway`]: development payment provider

pub mod api;
pub mod config;
pub mod error;
pub mod ingest;
pub mod payment_gateway;
pub mod server;

pub use config::Config;
pub use error::AppError;
pub use server::{AppState, build_router};
