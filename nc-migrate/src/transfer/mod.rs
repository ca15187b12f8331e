//! Data transfer between N-central servers
//!
//! This module holds the entity catalog, the identifier map and the
//! migration engine that moves records from one server scope to another.

pub mod cancel;
pub mod catalog;
pub mod client;
pub mod engine;
pub mod id_map;
pub mod outcome;
pub mod progress;
pub mod record;

pub use cancel::CancelFlag;
pub use catalog::{Catalog, EntityType};
pub use client::{EntityClient, Page, Scope, fetch_all};
pub use engine::{DuplicatePolicy, EngineOptions, MigrationEngine, MigrationRequest};
pub use outcome::{EntityOutcome, EntityStatus, RunOutcome, RunResult, TypeSummary};
pub use progress::{LogLevel, ProgressReporter, ProgressUpdate, RunEvent, percent};
pub use record::{Record, id_to_string};
