//! Opaque handles handed out by a GpuDevice

/// A device buffer. Handles are never reused by the same device.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct BufferHandle(pub u32);

/// A slot in the device's shader-visible descriptor heap
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct DescriptorHandle(pub u32);

impl DescriptorHandle {
    pub fn slot(&self) -> u32 {
        self.0
    }
}
