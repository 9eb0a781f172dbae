//! HTTP API: server wiring, routes and process lifecycle.

pub mod app;
pub mod lifecycle;
