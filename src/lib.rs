//! Heicsync - JPEG to HEIC conversion with capture-timestamp preservation
//!
//! This library crate exposes the core functionality for integration testing.

pub mod config;
pub mod context;
pub mod conversion;
pub mod coordinator;
pub mod queue;
pub mod scanner;
pub mod server;
pub mod service;
pub mod tools;
pub mod watch;
