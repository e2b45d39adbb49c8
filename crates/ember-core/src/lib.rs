//! Ember Core - Foundational types for the Ember engine
//!
//! This crate provides the types every other Ember crate depends on:
//! - `EntityId` - Stable entity identifiers
//! - Error types and Result alias

mod error;
mod id;

pub use error::{EmberError, Result};
pub use id::EntityId;
