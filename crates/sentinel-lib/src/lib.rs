//! Streaming change detection and alerting for aquaculture ponds
//!
//! This crate provides the core functionality for:
//! - Reading validation against sensor units, physical bounds and time horizons
//! - Page-Hinkley change detection per (pond, sensor) series
//! - Pond health scoring
//! - Alert classification with deduplication and escalation
//! - Hour/day aggregation with a watermark and retention
//! - Localized notification dispatch with retries
//! - Persistence, health checks and observability

pub mod aggregation;
pub mod anomaly;
pub mod clock;
pub mod config;
pub mod engine;
pub mod health;
pub mod models;
pub mod notify;
pub mod observability;
pub mod scoring;
pub mod store;
pub mod validator;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, EngineConfig};
pub use engine::{Engine, EngineBuilder, IngestReport, MaintenanceLoop, MaintenanceReport};
pub use health::{
    Component, ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{EngineMetrics, StructuredLogger};
pub use store::{FileStore, MemoryStore, Store, StoreError};
pub use validator::{ReadingValidator, RejectionReason};
