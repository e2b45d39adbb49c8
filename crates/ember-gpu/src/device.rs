//! The device trait every backend implements

use crate::command::CommandList;
use crate::error::GpuError;
use crate::handle::{BufferHandle, DescriptorHandle};
use crate::pipeline::{ComputePipelineDesc, PipelineKey};
use crate::state::ResourceState;

/// Memory pool a buffer lives in
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeapType {
    /// Device-local, not CPU visible
    Default,
    /// CPU-writable, used for constants
    Upload,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferUsage {
    /// Structured storage, read/write from compute
    UnorderedAccess,
    /// Uniform data
    Constant,
}

#[derive(Clone, Debug)]
pub struct BufferDesc {
    pub label: String,
    pub size: u64,
    pub usage: BufferUsage,
    pub heap: HeapType,
}

impl BufferDesc {
    /// Device-local buffer flagged for unordered access
    pub fn unordered(label: impl Into<String>, size: u64) -> Self {
        Self {
            label: label.into(),
            size,
            usage: BufferUsage::UnorderedAccess,
            heap: HeapType::Default,
        }
    }

    /// Upload-heap constant buffer
    pub fn constant(label: impl Into<String>, size: u64) -> Self {
        Self {
            label: label.into(),
            size,
            usage: BufferUsage::Constant,
            heap: HeapType::Upload,
        }
    }

    /// State the buffer is in right after creation
    pub fn initial_state(&self) -> ResourceState {
        match self.usage {
            BufferUsage::UnorderedAccess => ResourceState::UnorderedAccess,
            BufferUsage::Constant => ResourceState::VertexAndConstantBuffer,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ViewKind {
    Uav,
    Srv,
}

/// A structured-buffer view: `num_elements` records of `stride` bytes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ViewDesc {
    pub kind: ViewKind,
    pub first_element: u32,
    pub num_elements: u32,
    pub stride: u32,
}

impl ViewDesc {
    pub fn uav(num_elements: u32, stride: u32) -> Self {
        Self {
            kind: ViewKind::Uav,
            first_element: 0,
            num_elements,
            stride,
        }
    }

    pub fn srv(num_elements: u32, stride: u32) -> Self {
        Self {
            kind: ViewKind::Srv,
            first_element: 0,
            num_elements,
            stride,
        }
    }

    pub fn byte_offset(&self) -> u64 {
        self.first_element as u64 * self.stride as u64
    }

    pub fn byte_len(&self) -> u64 {
        self.num_elements as u64 * self.stride as u64
    }
}

/// A GPU device, its descriptor heap, its pipeline cache, and its queue.
///
/// All methods are called from one thread. `execute` only enqueues work;
/// completion is observed through `signal` / `wait_for_fence`.
pub trait GpuDevice {
    fn create_buffer(&mut self, desc: &BufferDesc) -> Result<BufferHandle, GpuError>;
    fn release_buffer(&mut self, buffer: BufferHandle);
    fn buffer_size(&self, buffer: BufferHandle) -> Option<u64>;

    /// State the device last saw the buffer in, after every executed barrier
    fn buffer_state(&self, buffer: BufferHandle) -> Option<ResourceState>;

    /// Upload bytes at `offset`. Visible to work executed afterwards.
    fn write_buffer(
        &mut self,
        buffer: BufferHandle,
        offset: u64,
        data: &[u8],
    ) -> Result<(), GpuError>;

    /// Blocking copy of the whole buffer back to the host
    fn read_buffer(&mut self, buffer: BufferHandle) -> Result<Vec<u8>, GpuError>;

    fn create_descriptor(
        &mut self,
        view: &ViewDesc,
        buffer: BufferHandle,
    ) -> Result<DescriptorHandle, GpuError>;
    fn release_descriptor(&mut self, descriptor: DescriptorHandle);
    fn live_descriptor_count(&self) -> usize;

    fn create_compute_pipeline(&mut self, desc: &ComputePipelineDesc) -> Result<(), GpuError>;
    fn is_pipeline_registered(&self, key: &PipelineKey) -> bool;

    /// Execute a closed command list
    fn execute(&mut self, list: &CommandList) -> Result<(), GpuError>;

    /// Enqueue a fence signal after all executed work and return its value
    fn signal(&mut self) -> u64;
    fn wait_for_fence(&mut self, value: u64) -> Result<(), GpuError>;
    fn completed_fence_value(&self) -> u64;
}
