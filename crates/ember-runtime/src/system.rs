//! Runtime system trait

use ember_core::Result;
use ember_ecs::SceneWorld;

/// A system that can be ticked by the frame loop
///
/// Systems are updated in registration order on a single thread.
/// An `Err` from any method is treated as fatal by the schedule.
pub trait RuntimeSystem {
    /// Called once when the system is first registered
    fn initialize(&mut self, world: &mut SceneWorld) -> Result<()>;

    /// Called once per frame. `time` is total elapsed seconds, `dt` the frame delta.
    fn update(&mut self, world: &mut SceneWorld, time: f64, dt: f64) -> Result<()>;

    /// Called when the system is being shut down; release device resources here
    fn shutdown(&mut self, world: &mut SceneWorld) -> Result<()>;

    /// Human-readable name for this system
    fn name(&self) -> &str;
}
