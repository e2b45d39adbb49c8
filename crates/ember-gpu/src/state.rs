//! Per-buffer resource state tracking and barrier construction

use crate::error::GpuError;
use crate::handle::BufferHandle;
use std::collections::HashMap;

/// The usage state a buffer is in from the GPU's point of view
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceState {
    Common,
    UnorderedAccess,
    CopyDest,
    CopySource,
    VertexAndConstantBuffer,
    ShaderResource,
}

/// A resource barrier recorded into a command list
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Barrier {
    /// Orders prior unordered-access writes before subsequent accesses
    Uav(BufferHandle),
    /// Moves a buffer between usage states
    Transition {
        buffer: BufferHandle,
        before: ResourceState,
        after: ResourceState,
    },
}

/// A buffer handle paired with the state the host believes it is in.
///
/// Every barrier for the buffer is produced here, so a transition whose
/// `before` disagrees with reality cannot be recorded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TrackedBuffer {
    handle: BufferHandle,
    state: ResourceState,
}

impl TrackedBuffer {
    pub fn new(handle: BufferHandle, initial: ResourceState) -> Self {
        Self {
            handle,
            state: initial,
        }
    }

    pub fn handle(&self) -> BufferHandle {
        self.handle
    }

    pub fn state(&self) -> ResourceState {
        self.state
    }

    /// Move to `after`. Returns `None` when already there.
    pub fn transition(&mut self, after: ResourceState) -> Option<Barrier> {
        if self.state == after {
            return None;
        }
        let barrier = Barrier::Transition {
            buffer: self.handle,
            before: self.state,
            after,
        };
        self.state = after;
        Some(barrier)
    }

    /// A UAV barrier, valid only while the buffer is in `UnorderedAccess`
    pub fn uav_barrier(&self) -> Result<Barrier, GpuError> {
        if self.state != ResourceState::UnorderedAccess {
            return Err(GpuError::InvalidBarrier {
                buffer: self.handle,
                expected: ResourceState::UnorderedAccess,
                actual: self.state,
            });
        }
        Ok(Barrier::Uav(self.handle))
    }

    /// Adopt the state the device actually holds. Used after a failed
    /// submission, when recorded transitions may not all have executed.
    pub fn resync(&mut self, actual: ResourceState) {
        self.state = actual;
    }

    /// Barriers that make the buffer ready for a compute write: a transition
    /// back to `UnorderedAccess` if needed, then a UAV barrier.
    pub fn prepare_unordered_access(&mut self) -> Vec<Barrier> {
        let mut barriers = Vec::with_capacity(2);
        barriers.extend(self.transition(ResourceState::UnorderedAccess));
        barriers.push(Barrier::Uav(self.handle));
        barriers
    }
}

/// Device-side record of every buffer's actual state.
///
/// Devices replay recorded barriers against it and refuse dispatches whose
/// UAVs are not in `UnorderedAccess`.
#[derive(Default)]
pub(crate) struct StateLedger {
    states: HashMap<BufferHandle, ResourceState>,
}

impl StateLedger {
    pub(crate) fn insert(&mut self, buffer: BufferHandle, state: ResourceState) {
        self.states.insert(buffer, state);
    }

    pub(crate) fn remove(&mut self, buffer: BufferHandle) {
        self.states.remove(&buffer);
    }

    pub(crate) fn get(&self, buffer: BufferHandle) -> Option<ResourceState> {
        self.states.get(&buffer).copied()
    }

    pub(crate) fn apply(&mut self, barrier: &Barrier) -> Result<(), GpuError> {
        match *barrier {
            Barrier::Uav(buffer) => self.require_unordered_barrier(buffer),
            Barrier::Transition {
                buffer,
                before,
                after,
            } => {
                let state = self
                    .states
                    .get_mut(&buffer)
                    .ok_or(GpuError::UnknownBuffer(buffer))?;
                if *state != before {
                    return Err(GpuError::InvalidBarrier {
                        buffer,
                        expected: before,
                        actual: *state,
                    });
                }
                *state = after;
                Ok(())
            }
        }
    }

    /// A UAV about to be bound must be in `UnorderedAccess`
    pub(crate) fn require_unordered(&self, buffer: BufferHandle) -> Result<(), GpuError> {
        let state = self.get(buffer).ok_or(GpuError::UnknownBuffer(buffer))?;
        if state != ResourceState::UnorderedAccess {
            return Err(GpuError::Hazard { buffer, state });
        }
        Ok(())
    }

    fn require_unordered_barrier(&self, buffer: BufferHandle) -> Result<(), GpuError> {
        let state = self.get(buffer).ok_or(GpuError::UnknownBuffer(buffer))?;
        if state != ResourceState::UnorderedAccess {
            return Err(GpuError::InvalidBarrier {
                buffer,
                expected: ResourceState::UnorderedAccess,
                actual: state,
            });
        }
        Ok(())
    }
}
