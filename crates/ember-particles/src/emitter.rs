//! The `GpuParticleEmitter` component and its lifecycle

use crate::material::Material;
use crate::pool::ParticlePool;
use crate::render::BlendMode;
use crate::shape::EmitterShapeParameters;
use ember_core::{EmberError, Result};
use ember_ecs::SceneWorld;
use ember_gpu::{BufferDesc, BufferHandle, DescriptorHandle, GpuDevice, TextureManager};
use serde::{Deserialize, Serialize};

/// Where an emitter is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitterState {
    /// Constructed or deserialized, `initialize` not yet called
    Uninitialized,
    /// Initialized but not simulating. Buffers may still be allocated.
    Inactive,
    /// Simulating with buffers allocated
    Active,
    /// All device resources released
    Finalized,
}

/// A GPU-simulated particle emitter attached to an entity.
///
/// Buffers are created lazily by [`create_buffer`](Self::create_buffer) and
/// released only by [`finalize`](Self::finalize); deactivating keeps them.
#[derive(Debug)]
pub struct GpuParticleEmitter {
    pub shape: EmitterShapeParameters,
    pub material: Material,
    pub blend_mode: BlendMode,
    is_active: bool,
    particle_size: u32,
    texture_path: String,
    texture_index: u32,
    state: EmitterState,
    pool: Option<ParticlePool>,
    shape_buffer: Option<BufferHandle>,
    material_buffer: Option<BufferHandle>,
    /// The free list must be seeded before the next emit
    needs_seed: bool,
}

/// Device handles held by one emitter
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmitterResources {
    pub buffers: Vec<BufferHandle>,
    pub descriptors: Vec<DescriptorHandle>,
}

impl EmitterResources {
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty() && self.descriptors.is_empty()
    }

    /// Handles in `self` that `current` no longer holds
    pub fn missing_from(&self, current: &EmitterResources) -> EmitterResources {
        EmitterResources {
            buffers: self
                .buffers
                .iter()
                .copied()
                .filter(|b| !current.buffers.contains(b))
                .collect(),
            descriptors: self
                .descriptors
                .iter()
                .copied()
                .filter(|d| !current.descriptors.contains(d))
                .collect(),
        }
    }

    pub fn release(self, device: &mut dyn GpuDevice) {
        for descriptor in self.descriptors {
            device.release_descriptor(descriptor);
        }
        for buffer in self.buffers {
            device.release_buffer(buffer);
        }
    }
}

/// Persisted fields. Shape parameters are deliberately absent.
#[derive(Serialize, Deserialize)]
struct EmitterRecord {
    #[serde(rename = "isActive")]
    is_active: bool,
    #[serde(rename = "particleSize", default)]
    particle_size: u32,
    #[serde(rename = "texturePath", default)]
    texture_path: String,
    #[serde(rename = "Material", default)]
    material: Material,
}

/// An unsized emitter. The particle system gives it
/// `ParticleSettings::default_particle_size` when it first sees it.
impl Default for GpuParticleEmitter {
    fn default() -> Self {
        Self::new(0)
    }
}

impl GpuParticleEmitter {
    pub fn new(particle_size: u32) -> Self {
        Self {
            shape: EmitterShapeParameters {
                particle_size,
                ..Default::default()
            },
            material: Material::default(),
            blend_mode: BlendMode::default(),
            is_active: true,
            particle_size,
            texture_path: String::new(),
            texture_index: 0,
            state: EmitterState::Uninitialized,
            pool: None,
            shape_buffer: None,
            material_buffer: None,
            needs_seed: true,
        }
    }

    pub fn with_texture(mut self, path: impl Into<String>) -> Self {
        self.texture_path = path.into();
        self
    }

    pub fn with_active(mut self, active: bool) -> Self {
        self.is_active = active;
        self
    }

    /// Resolve the texture and, if active, allocate device buffers
    pub fn initialize(
        &mut self,
        device: &mut dyn GpuDevice,
        textures: &mut dyn TextureManager,
    ) -> Result<()> {
        if !self.texture_path.is_empty() {
            self.texture_index = textures.load_texture(&self.texture_path);
            if textures.descriptor_gpu_handle(self.texture_index).is_none() {
                log::warn!(
                    "Texture '{}' has no descriptor yet, drawing untextured",
                    self.texture_path
                );
            }
        }

        if self.is_active {
            self.create_buffer(device)?;
            self.state = EmitterState::Active;
        } else {
            self.state = EmitterState::Inactive;
        }
        Ok(())
    }

    /// Create any missing device resource. Resources that already exist are
    /// left untouched, so calling this twice is a no-op.
    pub fn create_buffer(&mut self, device: &mut dyn GpuDevice) -> Result<()> {
        if self.material_buffer.is_none() {
            let size = std::mem::size_of::<crate::material::MaterialConstants>() as u64;
            self.material_buffer = Some(device.create_buffer(&BufferDesc::constant(
                "Particle Material",
                size,
            ))?);
        }
        if self.shape_buffer.is_none() {
            let size = std::mem::size_of::<EmitterShapeParameters>() as u64;
            self.shape_buffer = Some(device.create_buffer(&BufferDesc::constant(
                "Emitter Shape Parameters",
                size,
            ))?);
        }
        if self.pool.is_none() {
            self.shape.particle_size = self.particle_size;
            self.pool = Some(ParticlePool::create(device, self.particle_size)?);
            self.needs_seed = true;
        }
        Ok(())
    }

    /// Release every descriptor and buffer and forget the texture
    pub fn finalize(&mut self, device: &mut dyn GpuDevice) {
        if let Some(pool) = self.pool.take() {
            pool.release(device);
        }
        for buffer in [self.shape_buffer.take(), self.material_buffer.take()]
            .into_iter()
            .flatten()
        {
            device.release_buffer(buffer);
        }
        self.texture_path.clear();
        self.texture_index = 0;
        self.is_active = false;
        self.state = EmitterState::Finalized;
    }

    /// Activate, allocating buffers on the inactive-to-active edge
    pub fn play(&mut self, device: &mut dyn GpuDevice) -> Result<()> {
        if self.state == EmitterState::Finalized {
            return Err(EmberError::RuntimeError(
                "cannot play a finalized emitter".to_string(),
            ));
        }
        self.create_buffer(device)?;
        self.is_active = true;
        if self.state != EmitterState::Uninitialized {
            self.state = EmitterState::Active;
        }
        Ok(())
    }

    /// Deactivate. Buffers stay allocated until `finalize`.
    pub fn stop(&mut self) {
        self.is_active = false;
        if self.state == EmitterState::Active {
            self.state = EmitterState::Inactive;
        }
    }

    /// Flip the flag only; the particle system allocates lazily next frame
    pub fn set_active(&mut self, active: bool) {
        if active {
            self.is_active = true;
            if self.state == EmitterState::Inactive {
                self.state = EmitterState::Active;
            }
        } else {
            self.stop();
        }
    }

    /// Change capacity. Refused once a pool exists.
    pub fn set_particle_size(&mut self, particle_size: u32) -> Result<()> {
        if self.pool.is_some() {
            return Err(EmberError::RuntimeError(format!(
                "particle size cannot change while buffers exist (have {}, asked for {})",
                self.particle_size, particle_size
            )));
        }
        self.particle_size = particle_size;
        self.shape.particle_size = particle_size;
        Ok(())
    }

    /// Push shape parameters and material to their constant buffers.
    ///
    /// `particle_size` is always written as the pool's capacity; the kernels
    /// seed and bound the free-index stack with it.
    pub fn upload_constants(&self, device: &mut dyn GpuDevice) -> Result<()> {
        if let Some(buffer) = self.shape_buffer {
            let shape = EmitterShapeParameters {
                particle_size: self.particle_size,
                ..self.shape
            };
            device.write_buffer(buffer, 0, bytemuck::bytes_of(&shape))?;
        }
        if let Some(buffer) = self.material_buffer {
            device.write_buffer(buffer, 0, bytemuck::bytes_of(&self.material.to_constants()))?;
        }
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn state(&self) -> EmitterState {
        self.state
    }

    pub fn particle_size(&self) -> u32 {
        self.particle_size
    }

    pub fn texture_path(&self) -> &str {
        &self.texture_path
    }

    pub fn texture_index(&self) -> u32 {
        self.texture_index
    }

    pub fn pool(&self) -> Option<&ParticlePool> {
        self.pool.as_ref()
    }

    pub fn pool_mut(&mut self) -> Option<&mut ParticlePool> {
        self.pool.as_mut()
    }

    pub fn shape_buffer(&self) -> Option<BufferHandle> {
        self.shape_buffer
    }

    pub fn material_buffer(&self) -> Option<BufferHandle> {
        self.material_buffer
    }

    pub fn particle_resource(&self) -> Option<BufferHandle> {
        self.pool.as_ref().map(|p| p.particle_resource())
    }

    pub fn free_index_resource(&self) -> Option<BufferHandle> {
        self.pool.as_ref().map(|p| p.free_index_resource())
    }

    pub fn free_list_resource(&self) -> Option<BufferHandle> {
        self.pool.as_ref().map(|p| p.free_list_resource())
    }

    pub fn srv_descriptor(&self) -> Option<DescriptorHandle> {
        self.pool.as_ref().map(|p| p.srv_descriptor())
    }

    pub fn uav_descriptor(&self) -> Option<DescriptorHandle> {
        self.pool.as_ref().map(|p| p.uav_descriptor())
    }

    /// Active with buffers allocated
    pub fn is_simulating(&self) -> bool {
        self.is_active && self.pool.is_some() && self.shape_buffer.is_some()
    }

    pub fn needs_seed(&self) -> bool {
        self.needs_seed
    }

    pub(crate) fn mark_seeded(&mut self) {
        self.needs_seed = false;
    }

    /// Every buffer and descriptor currently allocated for this emitter
    pub fn resources(&self) -> EmitterResources {
        let mut resources = EmitterResources::default();
        if let Some(pool) = &self.pool {
            resources.buffers.extend(pool.buffers());
            resources.descriptors.extend(pool.descriptors());
        }
        resources
            .buffers
            .extend(self.shape_buffer.into_iter().chain(self.material_buffer));
        resources
    }

    /// Re-read buffer states from the device after a failed submission
    pub(crate) fn resync_states(&mut self, device: &dyn GpuDevice) {
        if let Some(pool) = self.pool.as_mut() {
            pool.resync(device);
        }
    }

    pub(crate) fn resync_all(device: &dyn GpuDevice, world: &mut SceneWorld) {
        for (_, emitter) in world.components_mut::<GpuParticleEmitter>() {
            emitter.resync_states(device);
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        let record = EmitterRecord {
            is_active: self.is_active,
            particle_size: self.particle_size,
            texture_path: self.texture_path.clone(),
            material: self.material.clone(),
        };
        // A struct of plain fields always serializes
        serde_json::to_value(record).unwrap_or(serde_json::Value::Null)
    }

    /// Rebuild an uninitialized emitter. Shape parameters come back as
    /// defaults because they are not part of the persisted format.
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        let record = EmitterRecord::deserialize(value)?;
        let mut emitter = Self::new(record.particle_size);
        emitter.is_active = record.is_active;
        emitter.texture_path = record.texture_path;
        emitter.material = record.material;
        Ok(emitter)
    }
}
