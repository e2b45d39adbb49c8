//! Per-emitter particle pool: the particle buffer, the free-index stack and
//! its counter, plus the views the compute passes bind them through.

use crate::record::GpuParticleRecord;
use ember_gpu::{
    Barrier, BufferDesc, BufferHandle, DescriptorHandle, GpuDevice, GpuError, ResourceState,
    TrackedBuffer, ViewDesc,
};

const INDEX_STRIDE: u32 = std::mem::size_of::<u32>() as u32;

/// GPU buffers backing one emitter's particles.
///
/// The counter buffer holds a single `i32`: the number of valid entries at
/// the bottom of the free-index stack. After seeding it equals `capacity`.
#[derive(Debug)]
pub struct ParticlePool {
    capacity: u32,
    particles: TrackedBuffer,
    particle_srv: DescriptorHandle,
    particle_uav: DescriptorHandle,
    free_index: TrackedBuffer,
    free_index_uav: DescriptorHandle,
    free_list: TrackedBuffer,
    free_list_uav: DescriptorHandle,
}

/// Everything created so far, released if a later step fails
#[derive(Default)]
struct Partial {
    buffers: Vec<BufferHandle>,
    descriptors: Vec<DescriptorHandle>,
}

impl Partial {
    fn buffer(&mut self, device: &mut dyn GpuDevice, desc: BufferDesc) -> Result<BufferHandle, GpuError> {
        let buffer = device.create_buffer(&desc)?;
        log::info!("Created buffer '{}' ({} bytes)", desc.label, desc.size);
        self.buffers.push(buffer);
        Ok(buffer)
    }

    fn view(
        &mut self,
        device: &mut dyn GpuDevice,
        view: ViewDesc,
        buffer: BufferHandle,
    ) -> Result<DescriptorHandle, GpuError> {
        let descriptor = device.create_descriptor(&view, buffer)?;
        self.descriptors.push(descriptor);
        Ok(descriptor)
    }

    fn release(self, device: &mut dyn GpuDevice) {
        for descriptor in self.descriptors {
            device.release_descriptor(descriptor);
        }
        for buffer in self.buffers {
            device.release_buffer(buffer);
        }
    }
}

impl ParticlePool {
    /// Allocate all pool resources for `capacity` particles.
    ///
    /// Either everything is created or nothing is left behind.
    pub fn create(device: &mut dyn GpuDevice, capacity: u32) -> Result<Self, GpuError> {
        let mut partial = Partial::default();
        match Self::create_inner(device, capacity, &mut partial) {
            Ok(pool) => Ok(pool),
            Err(err) => {
                log::error!("Particle pool creation failed: {}", err);
                partial.release(device);
                Err(err)
            }
        }
    }

    fn create_inner(
        device: &mut dyn GpuDevice,
        capacity: u32,
        partial: &mut Partial,
    ) -> Result<Self, GpuError> {
        let stride = GpuParticleRecord::STRIDE;

        let particles = partial.buffer(
            device,
            BufferDesc::unordered("Particle Buffer", stride as u64 * capacity as u64),
        )?;
        let particle_srv = partial.view(device, ViewDesc::srv(capacity, stride), particles)?;
        let particle_uav = partial.view(device, ViewDesc::uav(capacity, stride), particles)?;

        let free_index = partial.buffer(
            device,
            BufferDesc::unordered("Free Index Buffer", INDEX_STRIDE as u64 * capacity as u64),
        )?;
        let free_index_uav = partial.view(device, ViewDesc::uav(capacity, INDEX_STRIDE), free_index)?;

        let free_list = partial.buffer(
            device,
            BufferDesc::unordered("Free List Counter", INDEX_STRIDE as u64),
        )?;
        let free_list_uav = partial.view(device, ViewDesc::uav(1, INDEX_STRIDE), free_list)?;

        Ok(Self {
            capacity,
            particles: TrackedBuffer::new(particles, ResourceState::UnorderedAccess),
            particle_srv,
            particle_uav,
            free_index: TrackedBuffer::new(free_index, ResourceState::UnorderedAccess),
            free_index_uav,
            free_list: TrackedBuffer::new(free_list, ResourceState::UnorderedAccess),
            free_list_uav,
        })
    }

    /// Return every descriptor and buffer to the device
    pub fn release(self, device: &mut dyn GpuDevice) {
        for descriptor in self.descriptors() {
            device.release_descriptor(descriptor);
        }
        for buffer in self.buffers() {
            device.release_buffer(buffer);
        }
    }

    pub fn buffers(&self) -> [BufferHandle; 3] {
        [
            self.particles.handle(),
            self.free_index.handle(),
            self.free_list.handle(),
        ]
    }

    pub fn descriptors(&self) -> [DescriptorHandle; 4] {
        [
            self.particle_srv,
            self.particle_uav,
            self.free_index_uav,
            self.free_list_uav,
        ]
    }

    /// Take the device's view of every pool buffer's state. After a failed
    /// submission the recorded transitions may have run only in part.
    pub fn resync(&mut self, device: &dyn GpuDevice) {
        for buffer in [&mut self.particles, &mut self.free_index, &mut self.free_list] {
            if let Some(actual) = device.buffer_state(buffer.handle()) {
                buffer.resync(actual);
            }
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn particle_resource(&self) -> BufferHandle {
        self.particles.handle()
    }

    pub fn particle_state(&self) -> ResourceState {
        self.particles.state()
    }

    pub fn free_index_resource(&self) -> BufferHandle {
        self.free_index.handle()
    }

    pub fn free_list_resource(&self) -> BufferHandle {
        self.free_list.handle()
    }

    pub fn srv_descriptor(&self) -> DescriptorHandle {
        self.particle_srv
    }

    pub fn uav_descriptor(&self) -> DescriptorHandle {
        self.particle_uav
    }

    pub fn free_index_uav(&self) -> DescriptorHandle {
        self.free_index_uav
    }

    pub fn free_list_uav(&self) -> DescriptorHandle {
        self.free_list_uav
    }

    /// UAV descriptors in root-slot order 0..=2
    pub fn uav_slots(&self) -> [DescriptorHandle; 3] {
        [self.particle_uav, self.free_index_uav, self.free_list_uav]
    }

    /// Barriers that order a compute write after whatever touched the pool
    /// before. Moves the particle buffer back to `UnorderedAccess` if the
    /// last pass left it readable by the renderer.
    pub fn prepare_compute(&mut self) -> Result<Vec<Barrier>, GpuError> {
        let mut barriers = self.particles.prepare_unordered_access();
        barriers.push(self.free_index.uav_barrier()?);
        barriers.push(self.free_list.uav_barrier()?);
        Ok(barriers)
    }

    /// Hand the particle buffer over to the renderer
    pub fn prepare_render(&mut self) -> Option<Barrier> {
        self.particles
            .transition(ResourceState::VertexAndConstantBuffer)
    }

    /// Number of free slots, read back from the counter buffer
    pub fn read_free_count(&self, device: &mut dyn GpuDevice) -> Result<i32, GpuError> {
        let bytes = device.read_buffer(self.free_list.handle())?;
        if bytes.len() < 4 {
            return Err(GpuError::Readback(format!(
                "free list counter is {} bytes",
                bytes.len()
            )));
        }
        Ok(bytemuck::pod_read_unaligned(&bytes[..4]))
    }

    /// The free-index stack, bottom first
    pub fn read_free_indices(&self, device: &mut dyn GpuDevice) -> Result<Vec<u32>, GpuError> {
        let bytes = device.read_buffer(self.free_index.handle())?;
        Ok(bytes
            .chunks_exact(INDEX_STRIDE as usize)
            .map(bytemuck::pod_read_unaligned)
            .collect())
    }

    pub fn read_particles(
        &self,
        device: &mut dyn GpuDevice,
    ) -> Result<Vec<GpuParticleRecord>, GpuError> {
        let bytes = device.read_buffer(self.particles.handle())?;
        Ok(bytes
            .chunks_exact(GpuParticleRecord::STRIDE as usize)
            .map(bytemuck::pod_read_unaligned)
            .collect())
    }
}
