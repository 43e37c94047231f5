//! Stepsync - staged editing of hierarchical job and process step trees
//!
//! Steps are loaded per scope (a project's job steps, or one process's
//! steps), edited locally as a forest (move, indent, outdent, add, delete,
//! field edits) and pushed to the remote step API on an explicit commit.

pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod services;
pub mod staging;
pub mod steps;

pub use engine::{MutationMode, OutlineEntry, StepEngine};
pub use error::StepError;
pub use staging::{LoadReport, NewStep, StagingArea, StepPatch};
