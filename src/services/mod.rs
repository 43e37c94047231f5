//! Services that drive the remote step API.
//!
//! This module contains the sync coordinator, which turns a staged scope
//! into remote creates, updates and deletes.

pub mod sync;

pub use sync::{SyncCoordinator, SyncFailure, SyncOperation, SyncPlan, SyncReport};
