//! Scenario-based tests for the import runner

#[path = "../helpers.rs"]
mod helpers;

mod concurrency;
mod failure_handling;
mod pagination;
mod resume;
