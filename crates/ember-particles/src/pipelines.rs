//! Compute pipelines used by the particle systems
//!
//! All three share the root layout `0..=2` UAVs (particles, free-index
//! stack, free-list counter) and `3` the emitter constants. Emit and update
//! also read `PerFrame` at slot 4.

use ember_gpu::{load_shader, BindingKind, ComputePipelineDesc, GpuError, PipelineKey};
use std::path::Path;

/// Threads per group of the initialize and update passes
pub const PARTICLES_PER_GROUP: u32 = 1024;

pub const INITIALIZE_KEY: &str = "InitializeGpuParticle.CS";
pub const EMIT_KEY: &str = "EmitGpuParticle.CS";
pub const UPDATE_KEY: &str = "UpdateGpuParticle.CS";

pub const SLOT_PARTICLES: u32 = 0;
pub const SLOT_FREE_INDEX: u32 = 1;
pub const SLOT_FREE_LIST: u32 = 2;
pub const SLOT_EMITTER: u32 = 3;
pub const SLOT_PER_FRAME: u32 = 4;

const INITIALIZE_SOURCE: &str = include_str!("shaders/initialize.wgsl");
const EMIT_SOURCE: &str = include_str!("shaders/emit.wgsl");
const UPDATE_SOURCE: &str = include_str!("shaders/update.wgsl");

fn pool_bindings() -> Vec<BindingKind> {
    vec![
        BindingKind::Uav,
        BindingKind::Uav,
        BindingKind::Uav,
        BindingKind::Constant,
    ]
}

pub fn initialize_desc(shader_directory: Option<&Path>) -> Result<ComputePipelineDesc, GpuError> {
    Ok(ComputePipelineDesc {
        key: PipelineKey::new(INITIALIZE_KEY),
        source: load_shader(shader_directory, "initialize.wgsl", INITIALIZE_SOURCE)?,
        entry_point: "main".to_string(),
        bindings: pool_bindings(),
    })
}

pub fn emit_desc(shader_directory: Option<&Path>) -> Result<ComputePipelineDesc, GpuError> {
    let mut bindings = pool_bindings();
    bindings.push(BindingKind::Constant);
    Ok(ComputePipelineDesc {
        key: PipelineKey::new(EMIT_KEY),
        source: load_shader(shader_directory, "emit.wgsl", EMIT_SOURCE)?,
        entry_point: "main".to_string(),
        bindings,
    })
}

pub fn update_desc(shader_directory: Option<&Path>) -> Result<ComputePipelineDesc, GpuError> {
    let mut bindings = pool_bindings();
    bindings.push(BindingKind::Constant);
    Ok(ComputePipelineDesc {
        key: PipelineKey::new(UPDATE_KEY),
        source: load_shader(shader_directory, "update.wgsl", UPDATE_SOURCE)?,
        entry_point: "main".to_string(),
        bindings,
    })
}
