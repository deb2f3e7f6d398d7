//! Delivery service library crate.
//!
//! # Purpose
//! Exposes the delivery node subsystems (config, observability, session
//! lifecycle, enrichment, bus pipeline) for use by the binary and
//! integration tests.
pub mod bus;
pub mod config;
pub mod contacts;
pub mod dto;
pub mod enricher;
pub mod observability;
pub mod service;
