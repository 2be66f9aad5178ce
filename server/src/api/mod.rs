//! HTTP API handlers.
//!
//! Every handler is a thin adapter: parse the request, call the engine, map
//! the result. Engine errors become [`AppError`](crate::error::AppError)
//! responses.

pub mod analytics;
pub mod payments;
pub mod reservations;
pub mod sensors;
pub mod spots;
pub mod websocket;
