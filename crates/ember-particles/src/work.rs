//! `GpuParticleEmitterWorkSystem`: per-frame emit and update passes

use crate::emitter::GpuParticleEmitter;
use crate::pipelines::{
    self, PARTICLES_PER_GROUP, SLOT_EMITTER, SLOT_FREE_INDEX, SLOT_FREE_LIST, SLOT_PARTICLES,
    SLOT_PER_FRAME,
};
use ember_core::Result;
use ember_ecs::SceneWorld;
use ember_gpu::{
    group_count, submit_and_wait, BufferHandle, CommandList, Fence, GpuDevice, PipelineKey,
};
use std::path::Path;

/// What one frame of work recorded
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WorkStats {
    /// Emitters whose countdown elapsed this frame
    pub emitting: usize,
    pub updated: usize,
}

/// Runs emit then update for every simulating emitter, all in one command
/// list, and leaves each particle buffer ready for drawing
pub struct GpuParticleEmitterWorkSystem {
    emit_pipeline: PipelineKey,
    update_pipeline: PipelineKey,
    list: CommandList,
    fence: Fence,
}

impl GpuParticleEmitterWorkSystem {
    pub fn new(device: &mut dyn GpuDevice, shader_directory: Option<&Path>) -> Result<Self> {
        let emit = pipelines::emit_desc(shader_directory)?;
        device.create_compute_pipeline(&emit)?;
        let update = pipelines::update_desc(shader_directory)?;
        device.create_compute_pipeline(&update)?;
        Ok(Self {
            emit_pipeline: emit.key,
            update_pipeline: update.key,
            list: CommandList::new("GpuParticleEmitterWorkSystem"),
            fence: Fence::new(),
        })
    }

    pub fn update(
        &mut self,
        device: &mut dyn GpuDevice,
        world: &mut SceneWorld,
        per_frame: BufferHandle,
        delta_time: f32,
    ) -> Result<WorkStats> {
        match self.run(device, world, per_frame, delta_time) {
            Ok(stats) => Ok(stats),
            Err(err) => {
                // Recorded transitions may have executed only in part
                self.list.reset();
                GpuParticleEmitter::resync_all(device, world);
                Err(err)
            }
        }
    }

    fn run(
        &mut self,
        device: &mut dyn GpuDevice,
        world: &mut SceneWorld,
        per_frame: BufferHandle,
        delta_time: f32,
    ) -> Result<WorkStats> {
        let mut stats = WorkStats::default();
        let can_emit = self.pipeline_ready(device, &self.emit_pipeline);
        let can_update = self.pipeline_ready(device, &self.update_pipeline);

        for (_, emitter) in world.components_mut::<GpuParticleEmitter>() {
            if !emitter.is_simulating() {
                continue;
            }
            if can_emit && self.record_emit(device, emitter, per_frame, delta_time)? {
                stats.emitting += 1;
            }
            if can_update {
                self.record_update(emitter, per_frame)?;
                stats.updated += 1;
            }
        }

        if !self.list.is_empty() {
            submit_and_wait(device, &mut self.list, &mut self.fence)?;
            log::debug!(
                "Particle work: {} emitting, {} updated",
                stats.emitting,
                stats.updated
            );
        }
        Ok(stats)
    }

    fn pipeline_ready(&self, device: &dyn GpuDevice, key: &PipelineKey) -> bool {
        let ready = device.is_pipeline_registered(key);
        if !ready {
            log::error!("Pipeline '{}' is not registered, skipping", key);
        }
        ready
    }

    /// Tick the countdown, upload the constants and record the emit dispatch.
    /// Returns whether the emitter fires this frame.
    fn record_emit(
        &mut self,
        device: &mut dyn GpuDevice,
        emitter: &mut GpuParticleEmitter,
        per_frame: BufferHandle,
        delta_time: f32,
    ) -> Result<bool> {
        let emitting = emitter.shape.tick_emission(delta_time);
        emitter.upload_constants(device)?;

        let Some(shape_buffer) = emitter.shape_buffer() else {
            return Ok(false);
        };
        let Some(pool) = emitter.pool_mut() else {
            return Ok(false);
        };

        self.list.set_pipeline(&self.emit_pipeline);
        self.list.bind_uav(SLOT_PARTICLES, pool.uav_descriptor());
        self.list.bind_uav(SLOT_FREE_INDEX, pool.free_index_uav());
        self.list.bind_uav(SLOT_FREE_LIST, pool.free_list_uav());
        self.list.bind_constant(SLOT_EMITTER, shape_buffer);
        self.list.bind_constant(SLOT_PER_FRAME, per_frame);
        let barriers = pool.prepare_compute()?;
        self.list.resource_barrier(&barriers);
        self.list.dispatch(1, 1, 1);
        Ok(emitting)
    }

    fn record_update(
        &mut self,
        emitter: &mut GpuParticleEmitter,
        per_frame: BufferHandle,
    ) -> Result<()> {
        let particle_size = emitter.particle_size();
        let Some(shape_buffer) = emitter.shape_buffer() else {
            return Ok(());
        };
        let Some(pool) = emitter.pool_mut() else {
            return Ok(());
        };

        self.list.set_pipeline(&self.update_pipeline);
        self.list.bind_uav(SLOT_PARTICLES, pool.uav_descriptor());
        self.list.bind_uav(SLOT_FREE_INDEX, pool.free_index_uav());
        self.list.bind_uav(SLOT_FREE_LIST, pool.free_list_uav());
        self.list.bind_constant(SLOT_EMITTER, shape_buffer);
        self.list.bind_constant(SLOT_PER_FRAME, per_frame);
        let barriers = pool.prepare_compute()?;
        self.list.resource_barrier(&barriers);
        self.list
            .dispatch(group_count(particle_size, PARTICLES_PER_GROUP), 1, 1);

        // The renderer reads the particles next; the following compute pass
        // transitions them back
        if let Some(barrier) = pool.prepare_render() {
            self.list.resource_barrier(&[barrier]);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InitializePolicy;
    use crate::initialize::GpuParticleInitialize;
    use crate::kernels::register_particle_kernels;
    use crate::per_frame::PerFrame;
    use ember_core::EntityId;
    use ember_gpu::{BufferDesc, ResourceState, SoftwareDevice, TextureRegistry};

    struct Rig {
        device: SoftwareDevice,
        world: SceneWorld,
        init: GpuParticleInitialize,
        work: GpuParticleEmitterWorkSystem,
        per_frame: BufferHandle,
    }

    impl Rig {
        fn new() -> Self {
            let mut device = SoftwareDevice::new(64);
            register_particle_kernels(&mut device);
            let init =
                GpuParticleInitialize::new(&mut device, None, InitializePolicy::Once).unwrap();
            let work = GpuParticleEmitterWorkSystem::new(&mut device, None).unwrap();
            let per_frame = device
                .create_buffer(&BufferDesc::constant("PerFrame", PerFrame::SIZE))
                .unwrap();
            Self {
                device,
                world: SceneWorld::new(),
                init,
                work,
                per_frame,
            }
        }

        fn add(&mut self, name: &str, emitter: GpuParticleEmitter) -> EntityId {
            let mut emitter = emitter;
            emitter
                .initialize(&mut self.device, &mut TextureRegistry::new())
                .unwrap();
            let id = self.world.spawn(name).unwrap();
            self.world.insert(id, emitter).unwrap();
            id
        }

        fn frame(&mut self, frame_index: u32, time: f32, dt: f32) -> WorkStats {
            let frame = PerFrame {
                time,
                delta_time: dt,
                frame_index,
                _pad: 0,
            };
            self.device
                .write_buffer(self.per_frame, 0, bytemuck::bytes_of(&frame))
                .unwrap();
            self.init.update(&mut self.device, &mut self.world).unwrap();
            self.work
                .update(&mut self.device, &mut self.world, self.per_frame, dt)
                .unwrap()
        }

        fn free_count(&mut self, id: EntityId) -> i32 {
            let emitter = self.world.get::<GpuParticleEmitter>(id).unwrap();
            emitter.pool().unwrap().read_free_count(&mut self.device).unwrap()
        }
    }

    fn bursting(size: u32, count: u32) -> GpuParticleEmitter {
        let mut emitter = GpuParticleEmitter::new(size);
        emitter.shape.frequency = 0.0;
        emitter.shape.frequency_time = 10.0;
        emitter.shape.count_min = count;
        emitter.shape.count_max = count;
        emitter.shape.life_time_min = 1.0;
        emitter.shape.life_time_max = 1.0;
        emitter
    }

    #[test]
    fn update_group_count_follows_capacity() {
        let mut rig = Rig::new();
        rig.add("exact", GpuParticleEmitter::new(1024));
        rig.add("one over", GpuParticleEmitter::new(1025));
        rig.frame(1, 0.0, 0.016);

        let update_groups: Vec<[u32; 3]> = rig
            .device
            .history()
            .iter()
            .filter(|r| r.pipeline.as_str() == pipelines::UPDATE_KEY)
            .map(|r| r.groups)
            .collect();
        assert_eq!(update_groups, vec![[1, 1, 1], [2, 1, 1]]);
    }

    #[test]
    fn emit_runs_as_a_single_group_before_update() {
        let mut rig = Rig::new();
        rig.add("a", GpuParticleEmitter::new(64));
        rig.device.clear_history();
        rig.frame(1, 0.0, 0.016);

        let order: Vec<(&str, [u32; 3])> = rig
            .device
            .history()
            .iter()
            .map(|r| (r.pipeline.as_str(), r.groups))
            .collect();
        assert_eq!(
            order,
            vec![
                (pipelines::INITIALIZE_KEY, [1, 1, 1]),
                (pipelines::EMIT_KEY, [1, 1, 1]),
                (pipelines::UPDATE_KEY, [1, 1, 1]),
            ]
        );
    }

    #[test]
    fn emission_allocates_from_the_free_list() {
        let mut rig = Rig::new();
        let id = rig.add("burst", bursting(32, 5));
        let stats = rig.frame(1, 0.0, 0.016);
        assert_eq!(stats.emitting, 1);
        assert_eq!(rig.free_count(id), 27);

        let emitter = rig.world.get::<GpuParticleEmitter>(id).unwrap();
        let particles = emitter.pool().unwrap().read_particles(&mut rig.device).unwrap();
        let alive: Vec<_> = particles.iter().filter(|p| p.is_alive()).collect();
        assert_eq!(alive.len(), 5);
        // Emitted and aged by one update in the same frame
        assert!(alive.iter().all(|p| (p.life_time - (1.0 - 0.016)).abs() < 1e-5));
    }

    #[test]
    fn countdown_gates_emission() {
        let mut rig = Rig::new();
        let id = rig.add("burst", bursting(32, 5));
        rig.frame(1, 0.0, 0.016);
        // frequency reset to 10s: nothing more for a while
        let stats = rig.frame(2, 0.016, 0.016);
        assert_eq!(stats.emitting, 0);
        assert_eq!(rig.free_count(id), 27);
    }

    #[test]
    fn expired_particles_return_to_the_stack() {
        let mut rig = Rig::new();
        let id = rig.add("burst", bursting(16, 4));
        rig.frame(1, 0.0, 0.25);
        assert_eq!(rig.free_count(id), 12);
        for frame in 2..6 {
            rig.frame(frame, frame as f32 * 0.25, 0.25);
        }
        assert_eq!(rig.free_count(id), 16);

        let emitter = rig.world.get::<GpuParticleEmitter>(id).unwrap();
        let pool = emitter.pool().unwrap();
        let mut indices = pool.read_free_indices(&mut rig.device).unwrap();
        indices.sort();
        assert_eq!(indices, (0..16).collect::<Vec<u32>>());
    }

    #[test]
    fn live_particles_move_with_velocity() {
        let mut rig = Rig::new();
        let mut emitter = bursting(8, 1);
        emitter.shape.size = [0.0; 3];
        emitter.shape.velocity_min = [1.0, 2.0, 3.0];
        emitter.shape.velocity_max = [1.0, 2.0, 3.0];
        let id = rig.add("mover", emitter);
        rig.frame(1, 0.0, 0.5);

        let emitter = rig.world.get::<GpuParticleEmitter>(id).unwrap();
        let particles = emitter.pool().unwrap().read_particles(&mut rig.device).unwrap();
        let p = particles.iter().find(|p| p.is_alive()).unwrap();
        assert_eq!(p.translate, [0.5, 1.0, 1.5]);
    }

    #[test]
    fn particle_buffer_is_left_for_the_renderer() {
        let mut rig = Rig::new();
        let id = rig.add("a", GpuParticleEmitter::new(16));
        rig.frame(1, 0.0, 0.016);

        let buffer = {
            let emitter = rig.world.get::<GpuParticleEmitter>(id).unwrap();
            assert_eq!(
                emitter.pool().unwrap().particle_state(),
                ResourceState::VertexAndConstantBuffer
            );
            emitter.particle_resource().unwrap()
        };
        assert_eq!(
            rig.device.buffer_state(buffer),
            Some(ResourceState::VertexAndConstantBuffer)
        );

        // Next frame must transition back before writing, or the device
        // would reject the dispatch as a hazard
        rig.frame(2, 0.016, 0.016);
    }

    #[test]
    fn stopped_emitter_is_not_simulated() {
        let mut rig = Rig::new();
        let id = rig.add("a", bursting(16, 4));
        rig.world.get_mut::<GpuParticleEmitter>(id).unwrap().stop();
        let stats = rig.frame(1, 0.0, 0.016);
        assert_eq!(stats, WorkStats::default());
    }

    #[test]
    fn missing_pipeline_is_logged_and_skipped() {
        let mut device = SoftwareDevice::new(16);
        register_particle_kernels(&mut device);
        let mut work = GpuParticleEmitterWorkSystem::new(&mut device, None).unwrap();
        let per_frame = device
            .create_buffer(&BufferDesc::constant("PerFrame", PerFrame::SIZE))
            .unwrap();
        let mut world = SceneWorld::new();
        let mut emitter = GpuParticleEmitter::new(8);
        emitter
            .initialize(&mut device, &mut TextureRegistry::new())
            .unwrap();
        let id = world.spawn("a").unwrap();
        world.insert(id, emitter).unwrap();

        // A fresh device has no pipelines, as after a device reset
        let mut fresh = SoftwareDevice::new(16);
        let stats = work.update(&mut fresh, &mut world, per_frame, 0.016).unwrap();
        assert_eq!(stats, WorkStats::default());
        assert_eq!(fresh.executed_list_count(), 0);
    }

    #[test]
    fn failed_submission_leaves_states_consistent() {
        let mut rig = Rig::new();
        let id = rig.add("a", bursting(16, 2));
        rig.frame(1, 0.0, 0.016);

        // The emit dispatch fails on the stale constant buffer after its
        // barriers have already been applied
        let stale = rig
            .device
            .create_buffer(&BufferDesc::constant("stale", PerFrame::SIZE))
            .unwrap();
        rig.device.release_buffer(stale);
        assert!(rig
            .work
            .update(&mut rig.device, &mut rig.world, stale, 0.016)
            .is_err());
        assert!(rig.work.list.is_empty());

        {
            let emitter = rig.world.get::<GpuParticleEmitter>(id).unwrap();
            let pool = emitter.pool().unwrap();
            assert_eq!(
                rig.device.buffer_state(pool.particle_resource()),
                Some(pool.particle_state())
            );
        }

        let stats = rig.frame(2, 0.016, 0.016);
        assert_eq!(stats.updated, 1);
    }
}
