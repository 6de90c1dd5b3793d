// src/models/mod.rs

//! Domain models for the tracker.
//!
//! This module contains all data structures used throughout the application,
//! organized by their primary purpose.

mod config;
mod registry;
mod snapshot;

// Re-export all public types
pub use config::{
    BandFilter, Config, DiffConfig, PublishConfig, RegistryConfig, RenderConfig, StorageConfig,
};
pub use registry::{DetailInfo, ListInfo, MusenInformation, RegistryResponse, StationRecord};
pub use snapshot::{
    Category, CategorySeries, CountDelta, Counts, MunicipalityCount, Snapshot, StationCounts,
    UpdateToken,
};
