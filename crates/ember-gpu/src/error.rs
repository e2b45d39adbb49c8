//! GPU error types

use crate::handle::{BufferHandle, DescriptorHandle};
use crate::state::ResourceState;
use ember_core::EmberError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GpuError {
    #[error("Failed to get adapter")]
    AdapterNotFound,
    #[error("Failed to create device: {0}")]
    DeviceCreation(String),
    #[error("Buffer creation failed for '{label}' ({size} bytes): {reason}")]
    BufferCreation {
        label: String,
        size: u64,
        reason: String,
    },
    #[error("Unknown buffer {0:?}")]
    UnknownBuffer(BufferHandle),
    #[error("Unknown descriptor {0:?}")]
    UnknownDescriptor(DescriptorHandle),
    #[error("Descriptor heap exhausted (capacity {0})")]
    DescriptorHeapExhausted(u32),
    #[error("Write of {len} bytes at offset {offset} overflows buffer {buffer:?} of {size} bytes")]
    OutOfBounds {
        buffer: BufferHandle,
        offset: u64,
        len: u64,
        size: u64,
    },
    #[error("Pipeline creation failed for '{key}': {reason}")]
    PipelineCreation { key: String, reason: String },
    #[error("Pipeline '{0}' is not registered")]
    PipelineNotFound(String),
    #[error("Root slot {slot} of pipeline '{key}': {reason}")]
    BindingMismatch {
        key: String,
        slot: u32,
        reason: String,
    },
    #[error("Invalid barrier on {buffer:?}: buffer is {actual:?}, barrier expects {expected:?}")]
    InvalidBarrier {
        buffer: BufferHandle,
        expected: ResourceState,
        actual: ResourceState,
    },
    #[error("Hazard: {buffer:?} bound for unordered access while in {state:?}")]
    Hazard {
        buffer: BufferHandle,
        state: ResourceState,
    },
    #[error("Command list '{0}' is closed")]
    CommandListClosed(String),
    #[error("Command list '{0}' was executed without being closed")]
    CommandListOpen(String),
    #[error("Readback failed: {0}")]
    Readback(String),
    #[error("Fence value {requested} was never signaled (last signaled {signaled})")]
    FenceNotSignaled { requested: u64, signaled: u64 },
    #[error("Shader source error: {0}")]
    ShaderSource(String),
}

impl From<GpuError> for EmberError {
    fn from(err: GpuError) -> Self {
        match err {
            GpuError::PipelineCreation { .. } | GpuError::PipelineNotFound(_) => {
                EmberError::PipelineError(err.to_string())
            }
            other => EmberError::Gpu(other.to_string()),
        }
    }
}
