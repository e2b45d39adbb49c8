//! wgpu-backed device
//!
//! Root slots map onto `@group(0) @binding(slot)`. A recorded command list
//! becomes one command encoder with a compute pass per dispatch. wgpu
//! inserts its own hazard barriers between passes, so recorded barriers are
//! only replayed against the state ledger for validation.

use crate::command::{Command, CommandList, RootBinding};
use crate::device::{BufferDesc, BufferUsage, GpuDevice, ViewDesc, ViewKind};
use crate::error::GpuError;
use crate::handle::{BufferHandle, DescriptorHandle};
use crate::heap::DescriptorHeap;
use crate::pipeline::{BindingKind, ComputePipelineDesc, PipelineKey};
use crate::state::{ResourceState, StateLedger};
use std::collections::{BTreeMap, HashMap};

/// Threads per workgroup the particle kernels are written for
const REQUIRED_INVOCATIONS: u32 = 1024;

struct WgpuBuffer {
    buffer: wgpu::Buffer,
    desc: BufferDesc,
}

struct WgpuPipeline {
    pipeline: wgpu::ComputePipeline,
    layout: wgpu::BindGroupLayout,
    bindings: Vec<BindingKind>,
}

/// Headless wgpu device implementing [`GpuDevice`]
pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    buffers: HashMap<BufferHandle, WgpuBuffer>,
    next_buffer: u32,
    heap: DescriptorHeap,
    descriptors: HashMap<DescriptorHandle, (BufferHandle, ViewDesc)>,
    states: StateLedger,
    pipelines: HashMap<PipelineKey, WgpuPipeline>,
    fence_value: u64,
    completed: u64,
}

impl WgpuDevice {
    /// Create a headless device with compute limits raised for 1024-thread groups
    pub async fn new(descriptor_capacity: u32) -> Result<Self, GpuError> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or(GpuError::AdapterNotFound)?;

        let supported = adapter.limits();
        if supported.max_compute_invocations_per_workgroup < REQUIRED_INVOCATIONS {
            return Err(GpuError::DeviceCreation(format!(
                "adapter supports {} invocations per workgroup, need {}",
                supported.max_compute_invocations_per_workgroup, REQUIRED_INVOCATIONS
            )));
        }

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Ember Compute Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits {
                        max_compute_invocations_per_workgroup: REQUIRED_INVOCATIONS,
                        max_compute_workgroup_size_x: REQUIRED_INVOCATIONS,
                        ..wgpu::Limits::default()
                    },
                    memory_hints: Default::default(),
                },
                None,
            )
            .await
            .map_err(|e| GpuError::DeviceCreation(e.to_string()))?;

        log::info!("wgpu device ready on {:?}", adapter.get_info().backend);

        Ok(Self {
            device,
            queue,
            buffers: HashMap::new(),
            next_buffer: 1,
            heap: DescriptorHeap::new(descriptor_capacity),
            descriptors: HashMap::new(),
            states: StateLedger::default(),
            pipelines: HashMap::new(),
            fence_value: 0,
            completed: 0,
        })
    }

    /// Blocking variant of [`WgpuDevice::new`]
    pub fn new_blocking(descriptor_capacity: u32) -> Result<Self, GpuError> {
        pollster::block_on(Self::new(descriptor_capacity))
    }

    /// The raw buffer, for renderers that bind particle SRVs themselves
    pub fn raw_buffer(&self, buffer: BufferHandle) -> Option<&wgpu::Buffer> {
        self.buffers.get(&buffer).map(|b| &b.buffer)
    }

    pub fn raw_device(&self) -> &wgpu::Device {
        &self.device
    }

    fn get_buffer(&self, buffer: BufferHandle) -> Result<&WgpuBuffer, GpuError> {
        self.buffers
            .get(&buffer)
            .ok_or(GpuError::UnknownBuffer(buffer))
    }

    fn make_bind_group(
        &self,
        key: &PipelineKey,
        pipeline: &WgpuPipeline,
        bound: &BTreeMap<u32, RootBinding>,
    ) -> Result<wgpu::BindGroup, GpuError> {
        let mismatch = |slot: u32, reason: &str| GpuError::BindingMismatch {
            key: key.to_string(),
            slot,
            reason: reason.to_string(),
        };

        let mut entries = Vec::with_capacity(pipeline.bindings.len());
        for (slot, kind) in pipeline.bindings.iter().enumerate() {
            let slot = slot as u32;
            let resource = match (kind, bound.get(&slot)) {
                (BindingKind::Uav, Some(RootBinding::Uav(descriptor))) => {
                    let (buffer, view) = self
                        .descriptors
                        .get(descriptor)
                        .ok_or(GpuError::UnknownDescriptor(*descriptor))?;
                    if view.kind != ViewKind::Uav {
                        return Err(mismatch(slot, "shader resource view bound as UAV"));
                    }
                    self.states.require_unordered(*buffer)?;
                    wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer: &self.get_buffer(*buffer)?.buffer,
                        offset: view.byte_offset(),
                        size: wgpu::BufferSize::new(view.byte_len()),
                    })
                }
                (BindingKind::Constant, Some(RootBinding::Constant(buffer))) => {
                    self.get_buffer(*buffer)?.buffer.as_entire_binding()
                }
                (_, None) => return Err(mismatch(slot, "nothing bound")),
                (_, Some(_)) => return Err(mismatch(slot, "binding kind does not match layout")),
            };
            entries.push(wgpu::BindGroupEntry {
                binding: slot,
                resource,
            });
        }

        Ok(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(key.as_str()),
            layout: &pipeline.layout,
            entries: &entries,
        }))
    }
}

/// Round up to the copy alignment wgpu requires for mapped and copied buffers
fn aligned_size(desc: &BufferDesc) -> u64 {
    let align = match desc.usage {
        BufferUsage::Constant => 16,
        BufferUsage::UnorderedAccess => wgpu::COPY_BUFFER_ALIGNMENT,
    };
    desc.size.div_ceil(align) * align
}

impl GpuDevice for WgpuDevice {
    fn create_buffer(&mut self, desc: &BufferDesc) -> Result<BufferHandle, GpuError> {
        if desc.size == 0 {
            return Err(GpuError::BufferCreation {
                label: desc.label.clone(),
                size: 0,
                reason: "zero-sized buffer".to_string(),
            });
        }

        let usage = match desc.usage {
            BufferUsage::UnorderedAccess => {
                wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::COPY_DST
                    | wgpu::BufferUsages::COPY_SRC
            }
            BufferUsage::Constant => {
                wgpu::BufferUsages::UNIFORM
                    | wgpu::BufferUsages::COPY_DST
                    | wgpu::BufferUsages::COPY_SRC
            }
        };

        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&desc.label),
            size: aligned_size(desc),
            usage,
            mapped_at_creation: false,
        });
        let validation = pollster::block_on(self.device.pop_error_scope());
        let oom = pollster::block_on(self.device.pop_error_scope());
        if let Some(err) = validation.or(oom) {
            return Err(GpuError::BufferCreation {
                label: desc.label.clone(),
                size: desc.size,
                reason: err.to_string(),
            });
        }

        let handle = BufferHandle(self.next_buffer);
        self.next_buffer += 1;
        self.states.insert(handle, desc.initial_state());
        self.buffers.insert(
            handle,
            WgpuBuffer {
                buffer,
                desc: desc.clone(),
            },
        );
        Ok(handle)
    }

    fn release_buffer(&mut self, buffer: BufferHandle) {
        if let Some(released) = self.buffers.remove(&buffer) {
            released.buffer.destroy();
            self.states.remove(buffer);
        }
    }

    fn buffer_size(&self, buffer: BufferHandle) -> Option<u64> {
        self.buffers.get(&buffer).map(|b| b.desc.size)
    }

    fn buffer_state(&self, buffer: BufferHandle) -> Option<ResourceState> {
        self.states.get(buffer)
    }

    fn write_buffer(
        &mut self,
        buffer: BufferHandle,
        offset: u64,
        data: &[u8],
    ) -> Result<(), GpuError> {
        let target = self.get_buffer(buffer)?;
        let size = target.desc.size;
        if offset + data.len() as u64 > size {
            return Err(GpuError::OutOfBounds {
                buffer,
                offset,
                len: data.len() as u64,
                size,
            });
        }
        self.queue.write_buffer(&target.buffer, offset, data);
        Ok(())
    }

    fn read_buffer(&mut self, buffer: BufferHandle) -> Result<Vec<u8>, GpuError> {
        let source = self.get_buffer(buffer)?;
        let size = source.desc.size;
        let padded = aligned_size(&source.desc);

        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Ember Readback Buffer"),
            size: padded,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Readback Encoder"),
            });
        encoder.copy_buffer_to_buffer(&source.buffer, 0, &staging, 0, padded);
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);

        rx.recv()
            .map_err(|e| GpuError::Readback(e.to_string()))?
            .map_err(|e| GpuError::Readback(e.to_string()))?;

        let bytes = slice.get_mapped_range()[..size as usize].to_vec();
        staging.unmap();
        Ok(bytes)
    }

    fn create_descriptor(
        &mut self,
        view: &ViewDesc,
        buffer: BufferHandle,
    ) -> Result<DescriptorHandle, GpuError> {
        let size = self.get_buffer(buffer)?.desc.size;
        if view.byte_offset() + view.byte_len() > size {
            return Err(GpuError::OutOfBounds {
                buffer,
                offset: view.byte_offset(),
                len: view.byte_len(),
                size,
            });
        }
        let handle = self.heap.allocate()?;
        self.descriptors.insert(handle, (buffer, *view));
        Ok(handle)
    }

    fn release_descriptor(&mut self, descriptor: DescriptorHandle) {
        if self.heap.release(descriptor) {
            self.descriptors.remove(&descriptor);
        }
    }

    fn live_descriptor_count(&self) -> usize {
        self.heap.live_count()
    }

    fn create_compute_pipeline(&mut self, desc: &ComputePipelineDesc) -> Result<(), GpuError> {
        let entries: Vec<wgpu::BindGroupLayoutEntry> = desc
            .bindings
            .iter()
            .enumerate()
            .map(|(slot, kind)| wgpu::BindGroupLayoutEntry {
                binding: slot as u32,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: match kind {
                        BindingKind::Uav => wgpu::BufferBindingType::Storage { read_only: false },
                        BindingKind::Constant => wgpu::BufferBindingType::Uniform,
                    },
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            })
            .collect();

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);

        let module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(desc.key.as_str()),
                source: wgpu::ShaderSource::Wgsl(desc.source.as_str().into()),
            });

        let layout = self
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(desc.key.as_str()),
                entries: &entries,
            });

        let pipeline_layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(desc.key.as_str()),
                bind_group_layouts: &[&layout],
                push_constant_ranges: &[],
            });

        let pipeline = self
            .device
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(desc.key.as_str()),
                layout: Some(&pipeline_layout),
                module: &module,
                entry_point: Some(&desc.entry_point),
                compilation_options: Default::default(),
                cache: None,
            });

        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(GpuError::PipelineCreation {
                key: desc.key.to_string(),
                reason: err.to_string(),
            });
        }

        log::info!("Created compute pipeline '{}'", desc.key);
        self.pipelines.insert(
            desc.key.clone(),
            WgpuPipeline {
                pipeline,
                layout,
                bindings: desc.bindings.clone(),
            },
        );
        Ok(())
    }

    fn is_pipeline_registered(&self, key: &PipelineKey) -> bool {
        self.pipelines.contains_key(key)
    }

    fn execute(&mut self, list: &CommandList) -> Result<(), GpuError> {
        if !list.is_closed() {
            return Err(GpuError::CommandListOpen(list.label().to_string()));
        }

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some(list.label()),
            });

        let mut current: Option<PipelineKey> = None;
        let mut bound: BTreeMap<u32, RootBinding> = BTreeMap::new();

        for command in list.commands() {
            match command {
                Command::SetPipeline(key) => {
                    current = Some(key.clone());
                    bound.clear();
                }
                Command::Bind { slot, binding } => {
                    bound.insert(*slot, *binding);
                }
                Command::Barrier(barrier) => self.states.apply(barrier)?,
                Command::Dispatch { x, y, z } => {
                    let key = current
                        .as_ref()
                        .ok_or_else(|| GpuError::PipelineNotFound("<none set>".to_string()))?;
                    let pipeline = self
                        .pipelines
                        .get(key)
                        .ok_or_else(|| GpuError::PipelineNotFound(key.to_string()))?;
                    let bind_group = self.make_bind_group(key, pipeline, &bound)?;

                    let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                        label: Some(key.as_str()),
                        timestamp_writes: None,
                    });
                    pass.set_pipeline(&pipeline.pipeline);
                    pass.set_bind_group(0, &bind_group, &[]);
                    pass.dispatch_workgroups(*x, *y, *z);
                }
            }
        }

        self.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    fn signal(&mut self) -> u64 {
        self.fence_value += 1;
        self.fence_value
    }

    fn wait_for_fence(&mut self, value: u64) -> Result<(), GpuError> {
        if value > self.fence_value {
            return Err(GpuError::FenceNotSignaled {
                requested: value,
                signaled: self.fence_value,
            });
        }
        if value > self.completed {
            // Drains the whole queue, which covers every value signaled so far
            self.device.poll(wgpu::Maintain::Wait);
            self.completed = self.fence_value;
        }
        Ok(())
    }

    fn completed_fence_value(&self) -> u64 {
        self.completed
    }
}
