//! Ember GPU - the device seam consumed by compute-driven systems
//!
//! Systems never talk to a graphics API directly. They record work into a
//! [`CommandList`], hand it to a [`GpuDevice`], and block on a [`Fence`].
//! Two devices implement the trait:
//! - [`WgpuDevice`]: headless wgpu device running WGSL compute pipelines
//! - [`SoftwareDevice`]: host-memory buffers executing registered CPU kernels,
//!   with resource-state validation (used by tests and tooling)

mod command;
mod device;
mod error;
mod handle;
mod heap;
mod pipeline;
mod software;
mod state;
mod texture;
mod wgpu_device;

pub use command::{submit_and_wait, Command, CommandList, Fence, RootBinding};
pub use device::{BufferDesc, BufferUsage, GpuDevice, HeapType, ViewDesc, ViewKind};
pub use error::GpuError;
pub use handle::{BufferHandle, DescriptorHandle};
pub use heap::DescriptorHeap;
pub use pipeline::{load_shader, BindingKind, ComputePipelineDesc, PipelineKey};
pub use software::{CpuKernel, DispatchRecord, KernelContext, SoftwareDevice};
pub use state::{Barrier, ResourceState, TrackedBuffer};
pub use texture::{TextureManager, TextureRegistry};
pub use wgpu_device::WgpuDevice;

/// Number of thread groups needed to cover `items` with `group_size` threads each
pub fn group_count(items: u32, group_size: u32) -> u32 {
    items.div_ceil(group_size.max(1))
}
