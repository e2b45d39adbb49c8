//! Shader-visible descriptor heap slot allocator

use crate::error::GpuError;
use crate::handle::DescriptorHandle;

/// Fixed-capacity descriptor slot allocator.
///
/// Released slots go onto a free list and are handed out again before the
/// high-water mark grows.
pub struct DescriptorHeap {
    capacity: u32,
    next: u32,
    free: Vec<u32>,
    live: Vec<bool>,
}

impl DescriptorHeap {
    pub fn new(capacity: u32) -> Self {
        Self {
            capacity,
            next: 0,
            free: Vec::new(),
            live: vec![false; capacity as usize],
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn live_count(&self) -> usize {
        self.live.iter().filter(|l| **l).count()
    }

    pub fn is_live(&self, handle: DescriptorHandle) -> bool {
        self.live.get(handle.0 as usize).copied().unwrap_or(false)
    }

    pub fn allocate(&mut self) -> Result<DescriptorHandle, GpuError> {
        let slot = if let Some(slot) = self.free.pop() {
            slot
        } else if self.next < self.capacity {
            self.next += 1;
            self.next - 1
        } else {
            return Err(GpuError::DescriptorHeapExhausted(self.capacity));
        };
        self.live[slot as usize] = true;
        Ok(DescriptorHandle(slot))
    }

    /// Return a slot to the heap. Returns false if the slot was not live.
    pub fn release(&mut self, handle: DescriptorHandle) -> bool {
        match self.live.get_mut(handle.0 as usize) {
            Some(live) if *live => {
                *live = false;
                self.free.push(handle.0);
                true
            }
            _ => {
                log::warn!("Descriptor slot {} released twice or never allocated", handle.0);
                false
            }
        }
    }
}
