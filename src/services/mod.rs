//! Service layer for the tracker.
//!
//! This module contains the collaborators of the pipeline:
//! - Listing parsing (`listing`)
//! - Registry queries (`RegistryClient`)
//! - Table rendering (`PngTableRenderer`)
//! - Posting (`XPublisher`, `DryRunPublisher`) and OAuth 1.0a signing (`oauth`)

pub mod listing;
pub mod oauth;
pub mod publisher;
pub mod registry;
pub mod render;

pub use publisher::{DryRunPublisher, Post, PostContext, PostReceipt, Publisher, XPublisher};
pub use registry::{ListingCounts, RegistryClient, StationSource};
pub use oauth::OAuth1Credentials;
pub use render::{PngTableRenderer, TableRenderer};
