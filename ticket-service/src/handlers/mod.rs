//! HTTP handlers for ticket-service.

pub mod auth;
pub mod metrics;
pub mod tickets;
