//! What the particle renderer needs from each emitter

use crate::emitter::GpuParticleEmitter;
use ember_core::EntityId;
use ember_ecs::SceneWorld;
use ember_gpu::{BufferHandle, DescriptorHandle, ResourceState, TextureManager};

/// Blend state the renderer picks a pipeline for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlendMode {
    #[default]
    Normal,
    Add,
    Subtract,
    Multiply,
    Screen,
    None,
}

/// One instanced quad draw: a quad per particle slot, dead slots discarded
/// in the vertex shader by their zero lifetime
#[derive(Debug, Clone, PartialEq)]
pub struct ParticleDrawData {
    pub entity: EntityId,
    pub particle_srv: DescriptorHandle,
    pub particle_buffer: BufferHandle,
    pub instance_count: u32,
    pub blend_mode: BlendMode,
    pub texture_index: u32,
    pub texture_descriptor: Option<DescriptorHandle>,
    pub material_buffer: BufferHandle,
}

/// Draw data for every emitter whose particle buffer was handed to the
/// renderer this frame, in entity order
pub fn collect_draw_data(
    world: &SceneWorld,
    textures: &dyn TextureManager,
) -> Vec<ParticleDrawData> {
    let mut draws = Vec::new();
    for id in world.ids_with::<GpuParticleEmitter>() {
        let Some(emitter) = world.get::<GpuParticleEmitter>(id) else {
            continue;
        };
        if !emitter.is_simulating() {
            continue;
        }
        let (Some(pool), Some(material_buffer)) = (emitter.pool(), emitter.material_buffer())
        else {
            continue;
        };
        if pool.particle_state() != ResourceState::VertexAndConstantBuffer {
            log::debug!("Emitter {} not updated this frame, skipping draw", id);
            continue;
        }
        draws.push(ParticleDrawData {
            entity: id,
            particle_srv: pool.srv_descriptor(),
            particle_buffer: pool.particle_resource(),
            instance_count: pool.capacity(),
            blend_mode: emitter.blend_mode,
            texture_index: emitter.texture_index(),
            texture_descriptor: textures.descriptor_gpu_handle(emitter.texture_index()),
            material_buffer,
        });
    }
    draws
}
