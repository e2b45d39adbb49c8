//! Host-memory device that runs compute pipelines as CPU kernels
//!
//! Every buffer lives in a `Vec<u8>`. Pipelines are backed by registered
//! [`CpuKernel`]s instead of shader bytecode. Barriers are checked against
//! each buffer's actual state, and binding a UAV whose buffer is not in
//! `UnorderedAccess` fails the dispatch, so state bugs surface in tests
//! rather than as flicker on real hardware.

use crate::command::{Command, CommandList, RootBinding};
use crate::device::{BufferDesc, GpuDevice, ViewDesc, ViewKind};
use crate::error::GpuError;
use crate::handle::{BufferHandle, DescriptorHandle};
use crate::heap::DescriptorHeap;
use crate::pipeline::{BindingKind, ComputePipelineDesc, PipelineKey};
use crate::state::{ResourceState, StateLedger};
use bytemuck::Pod;
use std::collections::{BTreeMap, HashMap};

/// CPU implementation of a compute pipeline
pub trait CpuKernel {
    /// Run every thread of a `groups` dispatch. Threads may run sequentially.
    fn run(&self, ctx: &mut KernelContext<'_>, groups: [u32; 3]) -> Result<(), GpuError>;
}

struct SoftBuffer {
    desc: BufferDesc,
    data: Vec<u8>,
}

#[derive(Clone, Copy)]
struct SlotView {
    buffer: BufferHandle,
    offset: u64,
    len: u64,
}

/// The resources bound to a dispatch, as seen from a kernel
pub struct KernelContext<'a> {
    slots: Vec<Option<SlotView>>,
    buffers: &'a mut HashMap<BufferHandle, SoftBuffer>,
}

impl KernelContext<'_> {
    fn view(&self, slot: u32) -> Result<SlotView, GpuError> {
        self.slots
            .get(slot as usize)
            .copied()
            .flatten()
            .ok_or_else(|| GpuError::BindingMismatch {
                key: "<kernel>".to_string(),
                slot,
                reason: "nothing bound".to_string(),
            })
    }

    fn bytes(&self, slot: u32) -> Result<&[u8], GpuError> {
        let view = self.view(slot)?;
        let buffer = self
            .buffers
            .get(&view.buffer)
            .ok_or(GpuError::UnknownBuffer(view.buffer))?;
        let start = view.offset as usize;
        let end = start + view.len as usize;
        buffer
            .data
            .get(start..end)
            .ok_or(GpuError::OutOfBounds {
                buffer: view.buffer,
                offset: view.offset,
                len: view.len,
                size: buffer.data.len() as u64,
            })
    }

    /// Copy the slot's contents out as `T` records
    pub fn read<T: Pod>(&self, slot: u32) -> Result<Vec<T>, GpuError> {
        let bytes = self.bytes(slot)?;
        Ok(bytes
            .chunks_exact(std::mem::size_of::<T>())
            .map(bytemuck::pod_read_unaligned)
            .collect())
    }

    /// Read the first `T` of a constant slot
    pub fn read_constant<T: Pod>(&self, slot: u32) -> Result<T, GpuError> {
        let bytes = self.bytes(slot)?;
        let size = std::mem::size_of::<T>();
        if bytes.len() < size {
            let view = self.view(slot)?;
            return Err(GpuError::OutOfBounds {
                buffer: view.buffer,
                offset: 0,
                len: size as u64,
                size: bytes.len() as u64,
            });
        }
        Ok(bytemuck::pod_read_unaligned(&bytes[..size]))
    }

    /// Write `values` at the start of the slot's view
    pub fn write<T: Pod>(&mut self, slot: u32, values: &[T]) -> Result<(), GpuError> {
        let view = self.view(slot)?;
        let src: &[u8] = bytemuck::cast_slice(values);
        if src.len() as u64 > view.len {
            return Err(GpuError::OutOfBounds {
                buffer: view.buffer,
                offset: view.offset,
                len: src.len() as u64,
                size: view.len,
            });
        }
        let buffer = self
            .buffers
            .get_mut(&view.buffer)
            .ok_or(GpuError::UnknownBuffer(view.buffer))?;
        let start = view.offset as usize;
        buffer.data[start..start + src.len()].copy_from_slice(src);
        Ok(())
    }
}

/// One executed dispatch
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DispatchRecord {
    pub pipeline: PipelineKey,
    pub groups: [u32; 3],
}

pub struct SoftwareDevice {
    buffers: HashMap<BufferHandle, SoftBuffer>,
    next_buffer: u32,
    heap: DescriptorHeap,
    descriptors: HashMap<DescriptorHandle, (BufferHandle, ViewDesc)>,
    states: StateLedger,
    kernels: HashMap<PipelineKey, Box<dyn CpuKernel>>,
    pipelines: HashMap<PipelineKey, ComputePipelineDesc>,
    history: Vec<DispatchRecord>,
    executed_lists: usize,
    fence_value: u64,
    completed: u64,
    memory_budget: Option<u64>,
    allocated: u64,
}

impl SoftwareDevice {
    pub fn new(descriptor_capacity: u32) -> Self {
        Self {
            buffers: HashMap::new(),
            next_buffer: 1,
            heap: DescriptorHeap::new(descriptor_capacity),
            descriptors: HashMap::new(),
            states: StateLedger::default(),
            kernels: HashMap::new(),
            pipelines: HashMap::new(),
            history: Vec::new(),
            executed_lists: 0,
            fence_value: 0,
            completed: 0,
            memory_budget: None,
            allocated: 0,
        }
    }

    /// Make `key` buildable by `create_compute_pipeline`
    pub fn register_kernel(&mut self, key: PipelineKey, kernel: Box<dyn CpuKernel>) {
        self.kernels.insert(key, kernel);
    }

    /// Fail buffer creation once total allocation would exceed `bytes`
    pub fn set_memory_budget(&mut self, bytes: Option<u64>) {
        self.memory_budget = bytes;
    }

    pub fn history(&self) -> &[DispatchRecord] {
        &self.history
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    pub fn executed_list_count(&self) -> usize {
        self.executed_lists
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    fn resolve_slots(
        &self,
        key: &PipelineKey,
        bound: &BTreeMap<u32, RootBinding>,
    ) -> Result<Vec<Option<SlotView>>, GpuError> {
        let desc = self
            .pipelines
            .get(key)
            .ok_or_else(|| GpuError::PipelineNotFound(key.to_string()))?;
        let mismatch = |slot: u32, reason: &str| GpuError::BindingMismatch {
            key: key.to_string(),
            slot,
            reason: reason.to_string(),
        };

        let mut slots = Vec::with_capacity(desc.bindings.len());
        for (slot, kind) in desc.bindings.iter().enumerate() {
            let slot = slot as u32;
            let view = match (kind, bound.get(&slot)) {
                (BindingKind::Uav, Some(RootBinding::Uav(descriptor))) => {
                    let (buffer, view) = self
                        .descriptors
                        .get(descriptor)
                        .ok_or(GpuError::UnknownDescriptor(*descriptor))?;
                    if view.kind != ViewKind::Uav {
                        return Err(mismatch(slot, "shader resource view bound as UAV"));
                    }
                    self.states.require_unordered(*buffer)?;
                    SlotView {
                        buffer: *buffer,
                        offset: view.byte_offset(),
                        len: view.byte_len(),
                    }
                }
                (BindingKind::Constant, Some(RootBinding::Constant(buffer))) => {
                    let size = self
                        .buffers
                        .get(buffer)
                        .ok_or(GpuError::UnknownBuffer(*buffer))?
                        .data
                        .len() as u64;
                    SlotView {
                        buffer: *buffer,
                        offset: 0,
                        len: size,
                    }
                }
                (_, None) => return Err(mismatch(slot, "nothing bound")),
                (_, Some(_)) => return Err(mismatch(slot, "binding kind does not match layout")),
            };
            slots.push(Some(view));
        }
        Ok(slots)
    }
}

impl GpuDevice for SoftwareDevice {
    fn create_buffer(&mut self, desc: &BufferDesc) -> Result<BufferHandle, GpuError> {
        if desc.size == 0 {
            return Err(GpuError::BufferCreation {
                label: desc.label.clone(),
                size: 0,
                reason: "zero-sized buffer".to_string(),
            });
        }
        if let Some(budget) = self.memory_budget {
            if self.allocated + desc.size > budget {
                return Err(GpuError::BufferCreation {
                    label: desc.label.clone(),
                    size: desc.size,
                    reason: format!("out of memory ({} of {} bytes used)", self.allocated, budget),
                });
            }
        }

        let handle = BufferHandle(self.next_buffer);
        self.next_buffer += 1;
        self.allocated += desc.size;
        self.buffers.insert(
            handle,
            SoftBuffer {
                desc: desc.clone(),
                data: vec![0; desc.size as usize],
            },
        );
        self.states.insert(handle, desc.initial_state());
        Ok(handle)
    }

    fn release_buffer(&mut self, buffer: BufferHandle) {
        if let Some(released) = self.buffers.remove(&buffer) {
            self.allocated -= released.desc.size;
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
        let target = self
            .buffers
            .get_mut(&buffer)
            .ok_or(GpuError::UnknownBuffer(buffer))?;
        let size = target.data.len() as u64;
        if offset + data.len() as u64 > size {
            return Err(GpuError::OutOfBounds {
                buffer,
                offset,
                len: data.len() as u64,
                size,
            });
        }
        let start = offset as usize;
        target.data[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn read_buffer(&mut self, buffer: BufferHandle) -> Result<Vec<u8>, GpuError> {
        self.buffers
            .get(&buffer)
            .map(|b| b.data.clone())
            .ok_or(GpuError::UnknownBuffer(buffer))
    }

    fn create_descriptor(
        &mut self,
        view: &ViewDesc,
        buffer: BufferHandle,
    ) -> Result<DescriptorHandle, GpuError> {
        let size = self
            .buffer_size(buffer)
            .ok_or(GpuError::UnknownBuffer(buffer))?;
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
        if !self.kernels.contains_key(&desc.key) {
            return Err(GpuError::PipelineCreation {
                key: desc.key.to_string(),
                reason: "no CPU kernel registered".to_string(),
            });
        }
        self.pipelines.insert(desc.key.clone(), desc.clone());
        Ok(())
    }

    fn is_pipeline_registered(&self, key: &PipelineKey) -> bool {
        self.pipelines.contains_key(key)
    }

    fn execute(&mut self, list: &CommandList) -> Result<(), GpuError> {
        if !list.is_closed() {
            return Err(GpuError::CommandListOpen(list.label().to_string()));
        }

        let mut pipeline: Option<PipelineKey> = None;
        let mut bound: BTreeMap<u32, RootBinding> = BTreeMap::new();

        for command in list.commands() {
            match command {
                Command::SetPipeline(key) => {
                    pipeline = Some(key.clone());
                    bound.clear();
                }
                Command::Bind { slot, binding } => {
                    bound.insert(*slot, *binding);
                }
                Command::Barrier(barrier) => self.states.apply(barrier)?,
                Command::Dispatch { x, y, z } => {
                    let key = pipeline
                        .clone()
                        .ok_or_else(|| GpuError::PipelineNotFound("<none set>".to_string()))?;
                    let slots = self.resolve_slots(&key, &bound)?;
                    let kernel = self
                        .kernels
                        .get(&key)
                        .ok_or_else(|| GpuError::PipelineNotFound(key.to_string()))?;
                    let mut ctx = KernelContext {
                        slots,
                        buffers: &mut self.buffers,
                    };
                    kernel.run(&mut ctx, [*x, *y, *z])?;
                    self.history.push(DispatchRecord {
                        pipeline: key,
                        groups: [*x, *y, *z],
                    });
                }
            }
        }

        self.executed_lists += 1;
        Ok(())
    }

    fn signal(&mut self) -> u64 {
        // Execution is synchronous, so a signal completes immediately
        self.fence_value += 1;
        self.completed = self.fence_value;
        self.fence_value
    }

    fn wait_for_fence(&mut self, value: u64) -> Result<(), GpuError> {
        if value > self.fence_value {
            return Err(GpuError::FenceNotSignaled {
                requested: value,
                signaled: self.fence_value,
            });
        }
        Ok(())
    }

    fn completed_fence_value(&self) -> u64 {
        self.completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{submit_and_wait, Fence};
    use crate::state::{Barrier, TrackedBuffer};

    /// Adds the constant at slot 1 to every u32 at slot 0
    struct AddConstant;

    impl CpuKernel for AddConstant {
        fn run(&self, ctx: &mut KernelContext<'_>, _groups: [u32; 3]) -> Result<(), GpuError> {
            let add: u32 = ctx.read_constant(1)?;
            let mut values: Vec<u32> = ctx.read(0)?;
            for v in &mut values {
                *v += add;
            }
            ctx.write(0, &values)
        }
    }

    fn add_pipeline(device: &mut SoftwareDevice) -> PipelineKey {
        let key = PipelineKey::new("add");
        device.register_kernel(key.clone(), Box::new(AddConstant));
        device
            .create_compute_pipeline(&ComputePipelineDesc {
                key: key.clone(),
                source: String::new(),
                entry_point: "main".to_string(),
                bindings: vec![BindingKind::Uav, BindingKind::Constant],
            })
            .unwrap();
        key
    }

    #[test]
    fn dispatch_runs_kernel_on_bound_buffers() {
        let mut device = SoftwareDevice::new(4);
        let key = add_pipeline(&mut device);

        let data = device.create_buffer(&BufferDesc::unordered("data", 16)).unwrap();
        let constant = device.create_buffer(&BufferDesc::constant("add", 16)).unwrap();
        device
            .write_buffer(data, 0, bytemuck::cast_slice(&[1u32, 2, 3, 4]))
            .unwrap();
        device
            .write_buffer(constant, 0, bytemuck::bytes_of(&10u32))
            .unwrap();
        let uav = device.create_descriptor(&ViewDesc::uav(4, 4), data).unwrap();

        let mut list = CommandList::new("add");
        let mut fence = Fence::new();
        list.set_pipeline(&key);
        list.bind_uav(0, uav);
        list.bind_constant(1, constant);
        list.dispatch(1, 1, 1);
        submit_and_wait(&mut device, &mut list, &mut fence).unwrap();

        let bytes = device.read_buffer(data).unwrap();
        let values: Vec<u32> = bytes
            .chunks_exact(4)
            .map(bytemuck::pod_read_unaligned)
            .collect();
        assert_eq!(values, vec![11, 12, 13, 14]);
        assert_eq!(device.history().len(), 1);
        assert_eq!(device.history()[0].groups, [1, 1, 1]);
    }

    #[test]
    fn dispatch_with_buffer_in_wrong_state_is_a_hazard() {
        let mut device = SoftwareDevice::new(4);
        let key = add_pipeline(&mut device);
        let data = device.create_buffer(&BufferDesc::unordered("data", 16)).unwrap();
        let constant = device.create_buffer(&BufferDesc::constant("add", 16)).unwrap();
        let uav = device.create_descriptor(&ViewDesc::uav(4, 4), data).unwrap();
        let mut tracked = TrackedBuffer::new(data, ResourceState::UnorderedAccess);

        let mut list = CommandList::new("hazard");
        let mut fence = Fence::new();
        list.resource_barrier(&[tracked
            .transition(ResourceState::VertexAndConstantBuffer)
            .unwrap()]);
        list.set_pipeline(&key);
        list.bind_uav(0, uav);
        list.bind_constant(1, constant);
        list.dispatch(1, 1, 1);

        assert!(matches!(
            submit_and_wait(&mut device, &mut list, &mut fence),
            Err(GpuError::Hazard { .. })
        ));
    }

    #[test]
    fn stale_transition_is_rejected() {
        let mut device = SoftwareDevice::new(4);
        let data = device.create_buffer(&BufferDesc::unordered("data", 16)).unwrap();
        let mut list = CommandList::new("stale");
        let mut fence = Fence::new();
        list.resource_barrier(&[Barrier::Transition {
            buffer: data,
            before: ResourceState::CopyDest,
            after: ResourceState::UnorderedAccess,
        }]);
        assert!(matches!(
            submit_and_wait(&mut device, &mut list, &mut fence),
            Err(GpuError::InvalidBarrier { .. })
        ));
    }

    #[test]
    fn missing_binding_fails_dispatch() {
        let mut device = SoftwareDevice::new(4);
        let key = add_pipeline(&mut device);
        let data = device.create_buffer(&BufferDesc::unordered("data", 16)).unwrap();
        let uav = device.create_descriptor(&ViewDesc::uav(4, 4), data).unwrap();

        let mut list = CommandList::new("unbound");
        let mut fence = Fence::new();
        list.set_pipeline(&key);
        list.bind_uav(0, uav);
        list.dispatch(1, 1, 1);
        assert!(matches!(
            submit_and_wait(&mut device, &mut list, &mut fence),
            Err(GpuError::BindingMismatch { slot: 1, .. })
        ));
    }

    #[test]
    fn pipeline_without_kernel_cannot_be_created() {
        let mut device = SoftwareDevice::new(4);
        let result = device.create_compute_pipeline(&ComputePipelineDesc {
            key: PipelineKey::new("nothing"),
            source: String::new(),
            entry_point: "main".to_string(),
            bindings: vec![],
        });
        assert!(matches!(result, Err(GpuError::PipelineCreation { .. })));
        assert!(!device.is_pipeline_registered(&PipelineKey::new("nothing")));
    }

    #[test]
    fn memory_budget_fails_creation() {
        let mut device = SoftwareDevice::new(4);
        device.set_memory_budget(Some(64));
        device.create_buffer(&BufferDesc::unordered("a", 48)).unwrap();
        assert!(matches!(
            device.create_buffer(&BufferDesc::unordered("b", 32)),
            Err(GpuError::BufferCreation { .. })
        ));
    }

    #[test]
    fn descriptors_track_heap_usage() {
        let mut device = SoftwareDevice::new(1);
        let data = device.create_buffer(&BufferDesc::unordered("data", 16)).unwrap();
        let uav = device.create_descriptor(&ViewDesc::uav(4, 4), data).unwrap();
        assert_eq!(device.live_descriptor_count(), 1);
        assert!(device.create_descriptor(&ViewDesc::srv(4, 4), data).is_err());
        device.release_descriptor(uav);
        assert_eq!(device.live_descriptor_count(), 0);
    }

    #[test]
    fn oversized_view_is_rejected() {
        let mut device = SoftwareDevice::new(4);
        let data = device.create_buffer(&BufferDesc::unordered("data", 16)).unwrap();
        assert!(matches!(
            device.create_descriptor(&ViewDesc::uav(5, 4), data),
            Err(GpuError::OutOfBounds { .. })
        ));
    }
}
