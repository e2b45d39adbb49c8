//! `GpuParticleInitialize`: seeds every emitter's free-index stack

use crate::config::InitializePolicy;
use crate::emitter::GpuParticleEmitter;
use crate::pipelines::{
    self, PARTICLES_PER_GROUP, SLOT_EMITTER, SLOT_FREE_INDEX, SLOT_FREE_LIST, SLOT_PARTICLES,
};
use ember_core::Result;
use ember_ecs::SceneWorld;
use ember_gpu::{group_count, submit_and_wait, CommandList, Fence, GpuDevice, PipelineKey};
use std::path::Path;

/// Records one initialize dispatch per eligible emitter and submits them
/// as a single batch
pub struct GpuParticleInitialize {
    pipeline: PipelineKey,
    list: CommandList,
    fence: Fence,
    policy: InitializePolicy,
    /// Whether anything was recorded since the last submit
    using_cs: bool,
}

impl GpuParticleInitialize {
    /// Build the pipeline. Failure here is fatal to the caller.
    pub fn new(
        device: &mut dyn GpuDevice,
        shader_directory: Option<&Path>,
        policy: InitializePolicy,
    ) -> Result<Self> {
        let desc = pipelines::initialize_desc(shader_directory)?;
        device.create_compute_pipeline(&desc)?;
        Ok(Self {
            pipeline: desc.key,
            list: CommandList::new("GpuParticleInitialize"),
            fence: Fence::new(),
            policy,
            using_cs: false,
        })
    }

    pub fn policy(&self) -> InitializePolicy {
        self.policy
    }

    /// Returns how many emitters were seeded.
    ///
    /// On failure nothing recorded this frame is kept and every pool takes
    /// its buffer states from the device again.
    pub fn update(&mut self, device: &mut dyn GpuDevice, world: &mut SceneWorld) -> Result<usize> {
        if !device.is_pipeline_registered(&self.pipeline) {
            log::error!("Pipeline '{}' is not registered, skipping", self.pipeline);
            return Ok(0);
        }

        match self.seed(device, world) {
            Ok(seeded) => Ok(seeded),
            Err(err) => {
                self.list.reset();
                self.using_cs = false;
                GpuParticleEmitter::resync_all(device, world);
                Err(err)
            }
        }
    }

    fn seed(&mut self, device: &mut dyn GpuDevice, world: &mut SceneWorld) -> Result<usize> {
        let mut recorded = Vec::new();
        for (id, emitter) in world.components_mut::<GpuParticleEmitter>() {
            if !emitter.is_simulating() {
                continue;
            }
            if self.policy == InitializePolicy::Once && !emitter.needs_seed() {
                continue;
            }
            self.record(device, emitter)?;
            recorded.push(id);
            log::trace!("Seeding free list of emitter {}", id);
        }

        if self.using_cs {
            submit_and_wait(device, &mut self.list, &mut self.fence)?;
            self.using_cs = false;
            log::debug!("Initialized {} particle emitter(s)", recorded.len());
        }

        for (id, emitter) in world.components_mut::<GpuParticleEmitter>() {
            if recorded.contains(&id) {
                emitter.mark_seeded();
            }
        }
        Ok(recorded.len())
    }

    fn record(&mut self, device: &mut dyn GpuDevice, emitter: &mut GpuParticleEmitter) -> Result<()> {
        emitter.upload_constants(device)?;
        let particle_size = emitter.particle_size();
        let Some(shape_buffer) = emitter.shape_buffer() else {
            return Ok(());
        };
        let Some(pool) = emitter.pool_mut() else {
            return Ok(());
        };

        let barriers = pool.prepare_compute()?;
        self.list.resource_barrier(&barriers);
        self.list.set_pipeline(&self.pipeline);
        self.list.bind_uav(SLOT_PARTICLES, pool.uav_descriptor());
        self.list.bind_uav(SLOT_FREE_INDEX, pool.free_index_uav());
        self.list.bind_uav(SLOT_FREE_LIST, pool.free_list_uav());
        self.list.bind_constant(SLOT_EMITTER, shape_buffer);
        self.list
            .dispatch(group_count(particle_size, PARTICLES_PER_GROUP), 1, 1);
        self.using_cs = true;
        Ok(())
    }
}
