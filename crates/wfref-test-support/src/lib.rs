//! Test support utilities and fixtures for wfref tests

pub mod fixtures;
pub mod mocks;
pub mod stubs;

pub use fixtures::{descriptor, identity, WorkflowRepo};
pub use stubs::{MemoryLocalResolver, StaticExtractor, StubFetcher};
