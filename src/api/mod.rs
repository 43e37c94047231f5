//! Remote step API
//!
//! This module provides:
//! - The [`StepApi`] transport trait with a reqwest implementation and an
//!   in-memory mock
//! - [`RemoteStepClient`], which layers verification and 404 tolerance on
//!   top of the transport
//! - Wire types and error classification

pub mod client;
pub mod error;
pub mod mock;
pub mod step_api;
pub mod types;

pub use client::{CreateRequest, CreatedStep, DeleteOutcome, RemoteStepClient};
pub use error::ApiError;
pub use mock::{CreateFault, MockCall, MockStepApi, PatchFault};
pub use step_api::{HttpStepApi, StepApi};
pub use types::{create_payload, normalize_remote_id, RemoteStep, StepChanges};
