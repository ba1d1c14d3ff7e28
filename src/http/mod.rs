//! HTTP layer for the release directory.
//!
//! Serves the tag listing, per-tag file pages and the stable `latest`
//! download redirects from the in-memory snapshot, plus health and metrics.

pub mod handler;
pub mod views;
