//! Core domain models for the migration engine
//!
//! Jobs, pagination, the target entity model, and the step abstraction
//! every provider pipeline is built from.

pub mod condition;
pub mod config;
pub mod context;
pub mod entity;
pub mod error;
pub mod job;
pub mod page;
pub mod pipeline;
pub mod state;
pub mod step;
pub mod strategy;

pub use condition::*;
pub use context::*;
pub use entity::*;
pub use error::*;
pub use job::*;
pub use page::*;
pub use pipeline::*;
pub use state::*;
pub use step::*;
