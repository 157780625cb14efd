//! Generation provider contract and clients.
//!
//! This crate provides:
//! - The `Provider` trait consumed by generation jobs
//! - Error taxonomy with retry/fallback classification
//! - An HTTP provider client for REST generation services

pub mod error;
pub mod http;
pub mod provider;
pub mod types;

pub use error::{ProviderError, ProviderResult};
pub use http::{HttpProvider, HttpProviderConfig};
pub use provider::{GenerationRequest, PendingStatus, Provider, TaskHandle, TaskPhase, TaskStatus};
