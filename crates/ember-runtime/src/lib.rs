//! Ember Runtime - Frame loop infrastructure
//!
//! - `GameClock`: total time and per-frame delta
//! - `RuntimeSystem`: trait for systems ticked once per frame
//! - `SystemSchedule`: ordered list of systems driven by a clock

mod clock;
mod schedule;
mod system;

pub use clock::GameClock;
pub use schedule::SystemSchedule;
pub use system::RuntimeSystem;
