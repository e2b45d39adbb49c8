//! CPU versions of the particle compute shaders, for `SoftwareDevice`
//!
//! Threads run one after another, so atomics become plain integer updates.
//! Random draws are consumed in the same order as the WGSL, which makes the
//! emitted particles identical for the same `PerFrame` and shape constants.

use crate::per_frame::PerFrame;
use crate::pipelines::{
    EMIT_KEY, INITIALIZE_KEY, PARTICLES_PER_GROUP, SLOT_EMITTER, SLOT_FREE_INDEX, SLOT_FREE_LIST,
    SLOT_PARTICLES, SLOT_PER_FRAME, UPDATE_KEY,
};
use crate::rand::ParticleRng;
use crate::record::GpuParticleRecord;
use crate::shape::{EmitterShape, EmitterShapeParameters};
use bytemuck::Zeroable;
use ember_gpu::{CpuKernel, GpuError, KernelContext, PipelineKey, SoftwareDevice};

const COUNT_ORDINAL: u32 = u32::MAX;
const MIN_LIFE_TIME: f32 = 0.0001;
const TAU: f32 = 6.283_185_3;

/// Make the three particle pipelines buildable on a software device
pub fn register_particle_kernels(device: &mut SoftwareDevice) {
    device.register_kernel(PipelineKey::new(INITIALIZE_KEY), Box::new(InitializeKernel));
    device.register_kernel(PipelineKey::new(EMIT_KEY), Box::new(EmitKernel));
    device.register_kernel(PipelineKey::new(UPDATE_KEY), Box::new(UpdateKernel));
}

fn thread_count(groups: [u32; 3], group_size: u32) -> u32 {
    groups[0]
        .saturating_mul(groups[1])
        .saturating_mul(groups[2])
        .saturating_mul(group_size)
}

fn read_counter(ctx: &KernelContext<'_>) -> Result<i32, GpuError> {
    ctx.read::<i32>(SLOT_FREE_LIST)?
        .first()
        .copied()
        .ok_or_else(|| GpuError::Readback("free list counter slot is empty".to_string()))
}

/// Seeds the free-index stack with `0..particle_size`
pub struct InitializeKernel;

impl CpuKernel for InitializeKernel {
    fn run(&self, ctx: &mut KernelContext<'_>, groups: [u32; 3]) -> Result<(), GpuError> {
        let shape: EmitterShapeParameters = ctx.read_constant(SLOT_EMITTER)?;
        let mut particles: Vec<GpuParticleRecord> = ctx.read(SLOT_PARTICLES)?;
        let mut free_indices: Vec<u32> = ctx.read(SLOT_FREE_INDEX)?;
        let mut counter = read_counter(ctx)?;

        let threads = thread_count(groups, PARTICLES_PER_GROUP);
        if threads > 0 {
            counter = shape.particle_size as i32;
        }
        for index in 0..threads.min(shape.particle_size) {
            if let Some(p) = particles.get_mut(index as usize) {
                *p = GpuParticleRecord::zeroed();
            }
            if let Some(slot) = free_indices.get_mut(index as usize) {
                *slot = index;
            }
        }

        ctx.write(SLOT_PARTICLES, &particles)?;
        ctx.write(SLOT_FREE_INDEX, &free_indices)?;
        ctx.write(SLOT_FREE_LIST, &[counter])
    }
}

/// Pops free slots and writes new particles when `is_emit` is set
pub struct EmitKernel;

impl CpuKernel for EmitKernel {
    fn run(&self, ctx: &mut KernelContext<'_>, groups: [u32; 3]) -> Result<(), GpuError> {
        let shape: EmitterShapeParameters = ctx.read_constant(SLOT_EMITTER)?;
        if !shape.is_emitting() {
            return Ok(());
        }
        let frame: PerFrame = ctx.read_constant(SLOT_PER_FRAME)?;
        let mut particles: Vec<GpuParticleRecord> = ctx.read(SLOT_PARTICLES)?;
        let free_indices: Vec<u32> = ctx.read(SLOT_FREE_INDEX)?;
        let mut counter = read_counter(ctx)?;

        for thread_id in 0..thread_count(groups, 1) {
            emit_particles(
                thread_id,
                &shape,
                &frame,
                &mut particles,
                &free_indices,
                &mut counter,
            );
        }

        ctx.write(SLOT_PARTICLES, &particles)?;
        ctx.write(SLOT_FREE_LIST, &[counter])
    }
}

/// Ages particles and pushes expired slots back onto the stack
pub struct UpdateKernel;

impl CpuKernel for UpdateKernel {
    fn run(&self, ctx: &mut KernelContext<'_>, groups: [u32; 3]) -> Result<(), GpuError> {
        let shape: EmitterShapeParameters = ctx.read_constant(SLOT_EMITTER)?;
        let frame: PerFrame = ctx.read_constant(SLOT_PER_FRAME)?;
        let mut particles: Vec<GpuParticleRecord> = ctx.read(SLOT_PARTICLES)?;
        let mut free_indices: Vec<u32> = ctx.read(SLOT_FREE_INDEX)?;
        let mut counter = read_counter(ctx)?;

        let threads = thread_count(groups, PARTICLES_PER_GROUP);
        for index in 0..threads.min(shape.particle_size) {
            let Some(p) = particles.get_mut(index as usize) else {
                break;
            };
            if p.life_time <= 0.0 {
                continue;
            }
            p.life_time -= frame.delta_time;
            if p.life_time <= 0.0 {
                p.life_time = 0.0;
                push_free_index(index, &shape, &mut free_indices, &mut counter);
                continue;
            }
            for axis in 0..3 {
                p.translate[axis] += p.velocity[axis] * frame.delta_time;
            }
        }

        ctx.write(SLOT_PARTICLES, &particles)?;
        ctx.write(SLOT_FREE_INDEX, &free_indices)?;
        ctx.write(SLOT_FREE_LIST, &[counter])
    }
}

fn pop_free_index(free_indices: &[u32], counter: &mut i32) -> Option<u32> {
    let previous = *counter;
    *counter -= 1;
    if previous <= 0 {
        *counter += 1;
        return None;
    }
    free_indices.get((previous - 1) as usize).copied()
}

fn push_free_index(
    index: u32,
    shape: &EmitterShapeParameters,
    free_indices: &mut [u32],
    counter: &mut i32,
) {
    let top = *counter;
    *counter += 1;
    if top < shape.particle_size as i32 {
        if let Some(slot) = free_indices.get_mut(top as usize) {
            *slot = index;
        }
    } else {
        *counter -= 1;
    }
}

/// One emit thread: draw a count, then pop and fill that many slots,
/// stopping early once the stack is empty
pub fn emit_particles(
    thread_id: u32,
    shape: &EmitterShapeParameters,
    frame: &PerFrame,
    particles: &mut [GpuParticleRecord],
    free_indices: &[u32],
    counter: &mut i32,
) -> u32 {
    let mut rng = ParticleRng::for_particle(frame.frame_index, frame.time, thread_id, COUNT_ORDINAL);
    let (count_min, count_max) = shape.count_range();
    let count = rng.range_u32(count_min, count_max);

    let mut emitted = 0;
    for ordinal in 0..count {
        let Some(slot) = pop_free_index(free_indices, counter) else {
            break;
        };
        let mut rng = ParticleRng::for_particle(frame.frame_index, frame.time, thread_id, ordinal);
        let record = spawn_particle(shape, &mut rng);
        if let Some(p) = particles.get_mut(slot as usize) {
            *p = record;
            emitted += 1;
        }
    }
    emitted
}

/// Fill one record from the shape's ranges
pub fn spawn_particle(shape: &EmitterShapeParameters, rng: &mut ParticleRng) -> GpuParticleRecord {
    let translate = emit_position(shape, rng);
    let velocity = rng.range3(shape.velocity_min, shape.velocity_max);
    let scale = rng.range3(shape.scale_min, shape.scale_max);
    let color = rng.range4(shape.color_min, shape.color_max);
    let life = rng
        .range(shape.life_time_min, shape.life_time_max)
        .max(MIN_LIFE_TIME);
    GpuParticleRecord {
        scale,
        _pad: 0.0,
        translate,
        life_time: life,
        velocity,
        max_time: life,
        color,
    }
}

fn emit_position(shape: &EmitterShapeParameters, rng: &mut ParticleRng) -> [f32; 3] {
    let center = shape.center;
    match shape.emitter_shape() {
        EmitterShape::Sphere => {
            let z = rng.range(-1.0, 1.0);
            let phi = rng.range(0.0, TAU);
            let u = rng.next_f32();
            let ring = (1.0 - z * z).max(0.0).sqrt();
            let direction = [ring * phi.cos(), ring * phi.sin(), z];
            let mut radius = shape.size[0];
            if shape.edge_only == 0 {
                radius *= u.powf(1.0 / 3.0);
            }
            [
                center[0] + direction[0] * radius,
                center[1] + direction[1] * radius,
                center[2] + direction[2] * radius,
            ]
        }
        EmitterShape::Box => {
            let mut offset = rng.range3([-0.5; 3], [0.5; 3]);
            let face = (rng.next_u32() % 3) as usize;
            let side = if rng.next_f32() < 0.5 { 0.5 } else { -0.5 };
            if shape.edge_only != 0 {
                offset[face] = side;
            }
            [
                center[0] + offset[0] * shape.size[0],
                center[1] + offset[1] * shape.size[1],
                center[2] + offset[2] * shape.size[2],
            ]
        }
    }
}
