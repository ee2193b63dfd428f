//! Pond sentinel service: configuration and HTTP API

pub mod api;
pub mod config;
pub mod tasks;
