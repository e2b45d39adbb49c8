//! Ember ECS - Entity Component System with stable IDs
//!
//! Wraps hecs with stable entity identifiers and named entity lookup.
//! Components are plain Rust types stored directly in the hecs world.

mod world;

pub use world::SceneWorld;
