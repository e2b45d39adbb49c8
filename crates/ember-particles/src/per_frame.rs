//! Process-wide per-frame constants

use bytemuck::{Pod, Zeroable};

/// Matches the WGSL `PerFrame` uniform. Rewritten once per frame before any
/// emitter dispatch and shared read-only by every emitter.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct PerFrame {
    pub time: f32,
    pub delta_time: f32,
    pub frame_index: u32,
    pub _pad: u32,
}

impl PerFrame {
    pub const SIZE: u64 = std::mem::size_of::<Self>() as u64;

    pub fn new(time: f64, delta_time: f64, frame_index: u32) -> Self {
        Self {
            time: time as f32,
            delta_time: delta_time as f32,
            frame_index,
            _pad: 0,
        }
    }
}
