//! The per-slot particle record stored in the pool buffer

use bytemuck::{Pod, Zeroable};

/// One particle slot. Matches the WGSL `Particle` struct.
///
/// 64 bytes. The WGSL side uses `vec3<f32>` fields, which are 16-byte
/// aligned in storage buffers, hence `_pad` after `scale`.
///
/// A slot whose `life_time` is zero or less is free. Dead slots are not
/// cleared, only their index is pushed back onto the free-index stack.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct GpuParticleRecord {
    pub scale: [f32; 3],
    pub _pad: f32,
    pub translate: [f32; 3],
    /// Remaining lifetime in seconds
    pub life_time: f32,
    pub velocity: [f32; 3],
    /// Lifetime the particle was emitted with
    pub max_time: f32,
    pub color: [f32; 4],
}

impl GpuParticleRecord {
    pub const STRIDE: u32 = std::mem::size_of::<Self>() as u32;

    pub fn is_alive(&self) -> bool {
        self.life_time > 0.0
    }

    /// Fraction of life remaining, 0 for dead or zero-length particles
    pub fn life_ratio(&self) -> f32 {
        if self.max_time <= 0.0 {
            0.0
        } else {
            (self.life_time / self.max_time).clamp(0.0, 1.0)
        }
    }
}
