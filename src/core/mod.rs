//! Core domain models
//!
//! This module defines the fundamental data structures that represent
//! projects, steps, their dependency graph and the state of a run.

pub mod config;
pub mod environment;
pub mod graph;
pub mod pipeline;
pub mod schedule;
pub mod state;
pub mod step;

pub use environment::{EnvironmentResolver, EnvironmentSnapshot, Overrides};
pub use graph::{DependencyGraph, Selection};
pub use pipeline::*;
pub use schedule::{CronSchedule, ScheduleTrigger};
pub use state::*;
pub use step::*;
