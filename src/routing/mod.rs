//! Message routing: rule evaluation fanned out to notification dispatch.

pub mod engine;

pub use engine::{RouteReport, RoutingEngine};
