//! Change detection and alert classification for pond sensor series
//!
//! This module provides:
//! - Page-Hinkley mean-shift detection per (pond, sensor) series
//! - Alert classification with per-key cool-down and escalation

mod classifier;
mod page_hinkley;

pub use classifier::{AlertClassifier, AlertEvent, Classification, DedupState};
pub use page_hinkley::{ChangePoint, DetectorStep, PageHinkley};
