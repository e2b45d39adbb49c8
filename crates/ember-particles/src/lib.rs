//! Ember Particles - GPU-resident particle simulation
//!
//! Each emitter owns a fixed-capacity particle buffer and a free-index
//! stack that compute shaders pop from when emitting and push to when a
//! particle expires. Three passes run per frame:
//! - initialize: seed the stack with every slot
//! - emit: pop slots and write new particles when the emitter's countdown elapses
//! - update: age, recycle and integrate every slot
//!
//! The host never touches particle data; it only records dispatches and
//! barriers and waits on a fence after each batch.

pub mod config;
pub mod emitter;
pub mod initialize;
pub mod kernels;
pub mod material;
pub mod per_frame;
pub mod pipelines;
pub mod pool;
pub mod rand;
pub mod record;
pub mod render;
pub mod shape;
pub mod work;

use ember_core::{EntityId, Result};
use ember_ecs::SceneWorld;
use ember_gpu::{
    BufferDesc, BufferHandle, GpuDevice, SoftwareDevice, TextureManager, TextureRegistry,
    WgpuDevice,
};
use ember_runtime::RuntimeSystem;
use std::collections::{HashMap, HashSet};

pub use config::{InitializePolicy, ParticleSettings};
pub use emitter::{EmitterResources, EmitterState, GpuParticleEmitter};
pub use initialize::GpuParticleInitialize;
pub use material::Material;
pub use per_frame::PerFrame;
pub use pool::ParticlePool;
pub use record::GpuParticleRecord;
pub use render::{collect_draw_data, BlendMode, ParticleDrawData};
pub use shape::{EmitterShape, EmitterShapeParameters};
pub use work::{GpuParticleEmitterWorkSystem, WorkStats};

/// The particle subsystem as a frame-loop system.
///
/// Owns the device it dispatches on. Per frame: bring newly added or newly
/// activated emitters up, write `PerFrame`, seed free lists, then emit and
/// update. Each of the two passes is its own synchronous submission.
///
/// Emitters that leave the world without `finalize` (entity despawned or
/// component removed) have their device resources released on the next
/// `update` or at `shutdown`.
pub struct GpuParticleSystem<D: GpuDevice> {
    device: D,
    textures: Box<dyn TextureManager>,
    settings: ParticleSettings,
    initialize: Option<GpuParticleInitialize>,
    work: Option<GpuParticleEmitterWorkSystem>,
    per_frame: Option<BufferHandle>,
    frame_index: u32,
    /// What each emitter held when last seen
    held: HashMap<EntityId, EmitterResources>,
}

impl GpuParticleSystem<SoftwareDevice> {
    /// Host-memory device running the CPU reference kernels
    pub fn software(settings: ParticleSettings) -> Self {
        let mut device = SoftwareDevice::new(settings.descriptor_heap_size);
        kernels::register_particle_kernels(&mut device);
        Self::new(device, settings)
    }
}

impl GpuParticleSystem<WgpuDevice> {
    /// Headless wgpu device. Fails when no adapter is available.
    pub fn headless(settings: ParticleSettings) -> Result<Self> {
        let device = WgpuDevice::new_blocking(settings.descriptor_heap_size)?;
        Ok(Self::new(device, settings))
    }
}

impl<D: GpuDevice> GpuParticleSystem<D> {
    pub fn new(device: D, settings: ParticleSettings) -> Self {
        Self::with_textures(device, Box::new(TextureRegistry::new()), settings)
    }

    pub fn with_textures(
        device: D,
        textures: Box<dyn TextureManager>,
        settings: ParticleSettings,
    ) -> Self {
        Self {
            device,
            textures,
            settings,
            initialize: None,
            work: None,
            per_frame: None,
            frame_index: 0,
            held: HashMap::new(),
        }
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn settings(&self) -> &ParticleSettings {
        &self.settings
    }

    pub fn textures(&self) -> &dyn TextureManager {
        self.textures.as_ref()
    }

    pub fn frame_index(&self) -> u32 {
        self.frame_index
    }

    /// Draw list for the renderer, valid after `update`
    pub fn draw_data(&self, world: &SceneWorld) -> Vec<ParticleDrawData> {
        collect_draw_data(world, self.textures.as_ref())
    }

    /// Finalize the emitter on `id` and take it out of the world. Prefer this
    /// to finalizing by hand and then despawning.
    pub fn remove_emitter(
        &mut self,
        world: &mut SceneWorld,
        id: EntityId,
    ) -> Result<GpuParticleEmitter> {
        let mut emitter = world.remove::<GpuParticleEmitter>(id)?;
        emitter.finalize(&mut self.device);
        self.held.remove(&id);
        Ok(emitter)
    }

    /// Record what every emitter holds now and release whatever an emitter
    /// held last time but no longer does without having been finalized.
    /// Returns how many emitters had resources released.
    fn track_emitters(&mut self, world: &mut SceneWorld) -> usize {
        let mut current = HashMap::new();
        let mut finalized = HashSet::new();
        for (id, emitter) in world.components_mut::<GpuParticleEmitter>() {
            if emitter.state() == EmitterState::Finalized {
                finalized.insert(id);
            }
            current.insert(id, emitter.resources());
        }

        let previous = std::mem::replace(&mut self.held, current);
        let mut released = 0;
        for (id, resources) in previous {
            // finalize already returned them
            if finalized.contains(&id) {
                continue;
            }
            let stale = match self.held.get(&id) {
                Some(now) => resources.missing_from(now),
                None => resources,
            };
            if stale.is_empty() {
                continue;
            }
            log::info!(
                "Emitter {} left the world, releasing {} buffer(s) and {} descriptor(s)",
                id,
                stale.buffers.len(),
                stale.descriptors.len()
            );
            stale.release(&mut self.device);
            released += 1;
        }
        released
    }

    /// Initialize emitters added since the last frame and allocate buffers
    /// for ones switched on with `set_active`
    fn sync_emitters(&mut self, world: &mut SceneWorld) -> Result<usize> {
        let mut discovered = 0;
        for (id, emitter) in world.components_mut::<GpuParticleEmitter>() {
            match emitter.state() {
                EmitterState::Uninitialized => {
                    let size = self.settings.clamp_particle_size(emitter.particle_size());
                    if size != emitter.particle_size() {
                        emitter.set_particle_size(size)?;
                    }
                    emitter.initialize(&mut self.device, self.textures.as_mut())?;
                    log::info!(
                        "Emitter {} initialized ({} particles, active: {})",
                        id,
                        emitter.particle_size(),
                        emitter.is_active()
                    );
                    discovered += 1;
                }
                EmitterState::Active if emitter.pool().is_none() => {
                    emitter.create_buffer(&mut self.device)?;
                }
                _ => {}
            }
        }
        Ok(discovered)
    }
}

impl<D: GpuDevice> RuntimeSystem for GpuParticleSystem<D> {
    fn initialize(&mut self, world: &mut SceneWorld) -> Result<()> {
        let shader_directory = self.settings.shader_directory.clone();
        let shader_directory = shader_directory.as_deref();

        self.initialize = Some(GpuParticleInitialize::new(
            &mut self.device,
            shader_directory,
            self.settings.initialize_policy,
        )?);
        self.work = Some(GpuParticleEmitterWorkSystem::new(
            &mut self.device,
            shader_directory,
        )?);
        if self.per_frame.is_none() {
            self.per_frame = Some(
                self.device
                    .create_buffer(&BufferDesc::constant("PerFrame", PerFrame::SIZE))?,
            );
        }

        let count = self.sync_emitters(world)?;
        self.track_emitters(world);
        if count > 0 {
            log::info!("Discovered {} particle emitter(s)", count);
        }
        Ok(())
    }

    fn update(&mut self, world: &mut SceneWorld, time: f64, dt: f64) -> Result<()> {
        let Some(per_frame) = self.per_frame else {
            log::error!("Particle system updated before initialize, skipping frame");
            return Ok(());
        };

        // Reap before anything new is allocated so no released slot is reused
        self.track_emitters(world);
        self.sync_emitters(world)?;
        self.track_emitters(world);

        let frame = PerFrame::new(time, dt, self.frame_index);
        self.device
            .write_buffer(per_frame, 0, bytemuck::bytes_of(&frame))?;

        if let Some(initialize) = self.initialize.as_mut() {
            initialize.update(&mut self.device, world)?;
        }
        if let Some(work) = self.work.as_mut() {
            work.update(&mut self.device, world, per_frame, frame.delta_time)?;
        }

        self.frame_index = self.frame_index.wrapping_add(1);
        Ok(())
    }

    fn shutdown(&mut self, world: &mut SceneWorld) -> Result<()> {
        self.track_emitters(world);
        for (_, emitter) in world.components_mut::<GpuParticleEmitter>() {
            emitter.finalize(&mut self.device);
        }
        self.held.clear();
        if let Some(buffer) = self.per_frame.take() {
            self.device.release_buffer(buffer);
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "gpu_particles"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_core::EmberError;
    use ember_gpu::ResourceState;
    use ember_runtime::{GameClock, SystemSchedule};

    fn system(settings: ParticleSettings) -> GpuParticleSystem<SoftwareDevice> {
        GpuParticleSystem::software(settings)
    }

    fn add_emitter(world: &mut SceneWorld, name: &str, emitter: GpuParticleEmitter) -> EntityId {
        let id = world.spawn(name).unwrap();
        world.insert(id, emitter).unwrap();
        id
    }

    #[test]
    fn initialize_discovers_emitters() {
        let mut world = SceneWorld::new();
        let id = add_emitter(&mut world, "fire", GpuParticleEmitter::new(64));
        let mut particles = system(ParticleSettings::default());
        particles.initialize(&mut world).unwrap();

        let emitter = world.get::<GpuParticleEmitter>(id).unwrap();
        assert_eq!(emitter.state(), EmitterState::Active);
        assert!(emitter.particle_resource().is_some());
    }

    #[test]
    fn free_count_equals_capacity_after_seeding() {
        let mut world = SceneWorld::new();
        let mut emitter = GpuParticleEmitter::new(300);
        // Far-off countdown so nothing is emitted this frame
        emitter.shape.frequency = 100.0;
        let id = add_emitter(&mut world, "idle", emitter);

        let mut particles = system(ParticleSettings::default());
        particles.initialize(&mut world).unwrap();
        particles.update(&mut world, 0.0, 0.016).unwrap();

        let emitter = world.get::<GpuParticleEmitter>(id).unwrap();
        let count = emitter
            .pool()
            .unwrap()
            .read_free_count(particles.device_mut())
            .unwrap();
        assert_eq!(count, 300);
    }

    #[test]
    fn every_frame_policy_discards_previous_particles() {
        let mut world = SceneWorld::new();
        let mut emitter = GpuParticleEmitter::new(32);
        emitter.shape.frequency = 0.0;
        emitter.shape.frequency_time = 100.0;
        emitter.shape.count_min = 3;
        emitter.shape.count_max = 3;
        let id = add_emitter(&mut world, "burst", emitter);

        let mut particles = system(ParticleSettings::default());
        particles.initialize(&mut world).unwrap();
        particles.update(&mut world, 0.0, 0.016).unwrap();
        particles.update(&mut world, 0.016, 0.016).unwrap();

        // Reseeded on the second frame and nothing emitted since
        let emitter = world.get::<GpuParticleEmitter>(id).unwrap();
        let pool = emitter.pool().unwrap();
        assert_eq!(pool.read_free_count(particles.device_mut()).unwrap(), 32);
    }

    #[test]
    fn once_policy_keeps_particles_alive() {
        let mut world = SceneWorld::new();
        let mut emitter = GpuParticleEmitter::new(32);
        emitter.shape.frequency = 0.0;
        emitter.shape.frequency_time = 100.0;
        emitter.shape.count_min = 3;
        emitter.shape.count_max = 3;
        let id = add_emitter(&mut world, "burst", emitter);

        let settings = ParticleSettings {
            initialize_policy: InitializePolicy::Once,
            ..Default::default()
        };
        let mut particles = system(settings);
        particles.initialize(&mut world).unwrap();
        particles.update(&mut world, 0.0, 0.016).unwrap();
        particles.update(&mut world, 0.016, 0.016).unwrap();

        let emitter = world.get::<GpuParticleEmitter>(id).unwrap();
        let pool = emitter.pool().unwrap();
        assert_eq!(pool.read_free_count(particles.device_mut()).unwrap(), 29);
    }

    #[test]
    fn oversized_emitters_are_clamped() {
        let mut world = SceneWorld::new();
        let id = add_emitter(&mut world, "huge", GpuParticleEmitter::new(1 << 24));
        let settings = ParticleSettings {
            max_particle_size: 2048,
            ..Default::default()
        };
        let mut particles = system(settings);
        particles.initialize(&mut world).unwrap();

        let emitter = world.get::<GpuParticleEmitter>(id).unwrap();
        assert_eq!(emitter.particle_size(), 2048);
        assert_eq!(emitter.shape.particle_size, 2048);
    }

    #[test]
    fn emitters_added_later_are_picked_up() {
        let mut world = SceneWorld::new();
        let mut particles = system(ParticleSettings::default());
        particles.initialize(&mut world).unwrap();
        particles.update(&mut world, 0.0, 0.016).unwrap();

        let id = add_emitter(&mut world, "late", GpuParticleEmitter::new(16));
        particles.update(&mut world, 0.016, 0.016).unwrap();
        let emitter = world.get::<GpuParticleEmitter>(id).unwrap();
        assert_eq!(emitter.state(), EmitterState::Active);
        assert_eq!(
            emitter.pool().unwrap().particle_state(),
            ResourceState::VertexAndConstantBuffer
        );
    }

    #[test]
    fn set_active_allocates_lazily() {
        let mut world = SceneWorld::new();
        let id = add_emitter(
            &mut world,
            "dormant",
            GpuParticleEmitter::new(16).with_active(false),
        );
        let mut particles = system(ParticleSettings::default());
        particles.initialize(&mut world).unwrap();
        assert!(world
            .get::<GpuParticleEmitter>(id)
            .unwrap()
            .particle_resource()
            .is_none());

        world.get_mut::<GpuParticleEmitter>(id).unwrap().set_active(true);
        particles.update(&mut world, 0.0, 0.016).unwrap();
        assert!(world
            .get::<GpuParticleEmitter>(id)
            .unwrap()
            .particle_resource()
            .is_some());
    }

    #[test]
    fn draw_data_lists_updated_emitters() {
        let mut world = SceneWorld::new();
        let mut emitter = GpuParticleEmitter::new(128).with_texture("spark.png");
        emitter.blend_mode = BlendMode::Add;
        let id = add_emitter(&mut world, "sparks", emitter);
        add_emitter(
            &mut world,
            "off",
            GpuParticleEmitter::new(16).with_active(false),
        );

        let mut particles = system(ParticleSettings::default());
        particles.initialize(&mut world).unwrap();
        particles.update(&mut world, 0.0, 0.016).unwrap();

        let draws = particles.draw_data(&world);
        assert_eq!(draws.len(), 1);
        assert_eq!(draws[0].entity, id);
        assert_eq!(draws[0].instance_count, 128);
        assert_eq!(draws[0].blend_mode, BlendMode::Add);
        assert_ne!(draws[0].texture_index, 0);
    }

    #[test]
    fn shutdown_releases_every_resource() {
        let mut world = SceneWorld::new();
        add_emitter(&mut world, "a", GpuParticleEmitter::new(64));
        add_emitter(&mut world, "b", GpuParticleEmitter::new(64));
        let mut particles = system(ParticleSettings::default());
        particles.initialize(&mut world).unwrap();
        particles.update(&mut world, 0.0, 0.016).unwrap();

        particles.shutdown(&mut world).unwrap();
        assert_eq!(particles.device().buffer_count(), 0);
        assert_eq!(particles.device().live_descriptor_count(), 0);
    }

    #[test]
    fn runs_under_a_schedule() {
        let mut world = SceneWorld::new();
        add_emitter(&mut world, "a", GpuParticleEmitter::new(64));
        let mut schedule = SystemSchedule::new();
        schedule.add(Box::new(system(ParticleSettings::default())));
        schedule.initialize(&mut world).unwrap();

        let mut clock = GameClock::new();
        for _ in 0..3 {
            clock.advance(1.0 / 60.0);
            schedule.run_frame(&mut world, &clock).unwrap();
        }
        schedule.shutdown(&mut world).unwrap();
    }

    #[test]
    fn missing_kernels_fail_initialize() {
        let mut world = SceneWorld::new();
        let mut particles = GpuParticleSystem::new(SoftwareDevice::new(8), ParticleSettings::default());
        assert!(particles.initialize(&mut world).is_err());
    }

    #[test]
    fn edited_particle_size_cannot_outgrow_the_pool() {
        let mut world = SceneWorld::new();
        let mut emitter = GpuParticleEmitter::new(32);
        emitter.shape.frequency = 100.0;
        let id = add_emitter(&mut world, "small", emitter);
        let mut particles = system(ParticleSettings::default());
        particles.initialize(&mut world).unwrap();

        world.get_mut::<GpuParticleEmitter>(id).unwrap().shape.particle_size = 64;
        particles.update(&mut world, 0.0, 0.016).unwrap();

        let emitter = world.get::<GpuParticleEmitter>(id).unwrap();
        let count = emitter
            .pool()
            .unwrap()
            .read_free_count(particles.device_mut())
            .unwrap();
        assert_eq!(count, 32);
    }

    #[test]
    fn despawned_emitters_release_their_resources() {
        let mut world = SceneWorld::new();
        let id = add_emitter(&mut world, "gone", GpuParticleEmitter::new(64));
        let mut particles = system(ParticleSettings::default());
        particles.initialize(&mut world).unwrap();
        particles.update(&mut world, 0.0, 0.016).unwrap();

        world.despawn(id).unwrap();
        particles.update(&mut world, 0.016, 0.016).unwrap();
        // Only PerFrame is left
        assert_eq!(particles.device().buffer_count(), 1);
        assert_eq!(particles.device().live_descriptor_count(), 0);

        particles.shutdown(&mut world).unwrap();
        assert_eq!(particles.device().buffer_count(), 0);
    }

    #[test]
    fn removed_components_are_released_at_shutdown() {
        let mut world = SceneWorld::new();
        let id = add_emitter(&mut world, "detached", GpuParticleEmitter::new(64));
        let mut particles = system(ParticleSettings::default());
        particles.initialize(&mut world).unwrap();

        let detached = world.remove::<GpuParticleEmitter>(id).unwrap();
        assert!(detached.particle_resource().is_some());
        particles.shutdown(&mut world).unwrap();
        assert_eq!(particles.device().buffer_count(), 0);
        assert_eq!(particles.device().live_descriptor_count(), 0);
    }

    #[test]
    fn remove_emitter_finalizes_once() {
        let mut world = SceneWorld::new();
        let first = add_emitter(&mut world, "a", GpuParticleEmitter::new(16));
        let mut particles = system(ParticleSettings::default());
        particles.initialize(&mut world).unwrap();

        let removed = particles.remove_emitter(&mut world, first).unwrap();
        assert_eq!(removed.state(), EmitterState::Finalized);

        // The new pool reuses the freed descriptor slots; they must survive
        let second = add_emitter(&mut world, "b", GpuParticleEmitter::new(16));
        particles.update(&mut world, 0.0, 0.016).unwrap();
        particles.update(&mut world, 0.016, 0.016).unwrap();
        assert_eq!(particles.device().live_descriptor_count(), 4);
        assert!(world.get::<GpuParticleEmitter>(second).unwrap().is_simulating());
    }

    #[test]
    fn finalized_emitters_are_not_released_twice() {
        let mut world = SceneWorld::new();
        let first = add_emitter(&mut world, "a", GpuParticleEmitter::new(16));
        add_emitter(&mut world, "b", GpuParticleEmitter::new(16));
        let mut particles = system(ParticleSettings::default());
        particles.initialize(&mut world).unwrap();

        world
            .get_mut::<GpuParticleEmitter>(first)
            .unwrap()
            .finalize(particles.device_mut());
        particles.update(&mut world, 0.0, 0.016).unwrap();
        assert_eq!(particles.device().live_descriptor_count(), 4);
    }

    #[test]
    fn default_emitters_take_the_configured_size() {
        let mut world = SceneWorld::new();
        let id = add_emitter(&mut world, "plain", GpuParticleEmitter::default());
        let settings = ParticleSettings {
            default_particle_size: 256,
            ..Default::default()
        };
        let mut particles = system(settings);
        particles.initialize(&mut world).unwrap();

        let emitter = world.get::<GpuParticleEmitter>(id).unwrap();
        assert_eq!(emitter.particle_size(), 256);
        assert_eq!(emitter.pool().map(|p| p.capacity()), Some(256));
    }

    #[test]
    fn descriptor_heap_size_bounds_the_device() {
        let mut world = SceneWorld::new();
        add_emitter(&mut world, "a", GpuParticleEmitter::new(16));
        add_emitter(&mut world, "b", GpuParticleEmitter::new(16));
        let settings = ParticleSettings {
            descriptor_heap_size: 4,
            ..Default::default()
        };
        let mut particles = system(settings);
        // One pool takes four descriptors
        assert!(matches!(
            particles.initialize(&mut world),
            Err(EmberError::Gpu(_))
        ));
    }

    #[test]
    fn wgsl_kernels_seed_and_emit_when_adapter_available() {
        // Machines without a GPU or software adapter skip this
        let Ok(mut particles) = GpuParticleSystem::headless(ParticleSettings::default()) else {
            return;
        };
        let mut world = SceneWorld::new();
        let mut emitter = GpuParticleEmitter::new(1500);
        emitter.shape.frequency = 0.0;
        emitter.shape.count_min = 5;
        emitter.shape.count_max = 5;
        let id = add_emitter(&mut world, "gpu", emitter);

        particles.initialize(&mut world).unwrap();
        particles.update(&mut world, 0.0, 0.016).unwrap();

        let emitter = world.get::<GpuParticleEmitter>(id).unwrap();
        let pool = emitter.pool().unwrap();
        assert_eq!(pool.read_free_count(particles.device_mut()).unwrap(), 1495);
        let alive = pool
            .read_particles(particles.device_mut())
            .unwrap()
            .iter()
            .filter(|p| p.is_alive())
            .count();
        assert_eq!(alive, 5);
    }
}
