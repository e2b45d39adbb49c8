//! Recorded command lists, fences, and the synchronous submit round trip

use crate::device::GpuDevice;
use crate::error::GpuError;
use crate::handle::{BufferHandle, DescriptorHandle};
use crate::pipeline::PipelineKey;
use crate::state::Barrier;

/// What is bound to a root slot
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RootBinding {
    /// Read/write view through a descriptor
    Uav(DescriptorHandle),
    /// Uniform data read directly from a buffer
    Constant(BufferHandle),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    SetPipeline(PipelineKey),
    Bind { slot: u32, binding: RootBinding },
    Barrier(Barrier),
    Dispatch { x: u32, y: u32, z: u32 },
}

/// A list of compute commands, recorded on the CPU and executed by a device.
///
/// Lifecycle mirrors a native command list: record → `close` → execute →
/// `reset`. Recording into a closed list is dropped with an error log.
#[derive(Debug)]
pub struct CommandList {
    label: String,
    commands: Vec<Command>,
    closed: bool,
}

impl CommandList {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            commands: Vec::new(),
            closed: false,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn set_pipeline(&mut self, key: &PipelineKey) {
        self.push(Command::SetPipeline(key.clone()));
    }

    pub fn bind_uav(&mut self, slot: u32, descriptor: DescriptorHandle) {
        self.push(Command::Bind {
            slot,
            binding: RootBinding::Uav(descriptor),
        });
    }

    pub fn bind_constant(&mut self, slot: u32, buffer: BufferHandle) {
        self.push(Command::Bind {
            slot,
            binding: RootBinding::Constant(buffer),
        });
    }

    pub fn resource_barrier(&mut self, barriers: &[Barrier]) {
        for barrier in barriers {
            self.push(Command::Barrier(*barrier));
        }
    }

    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        self.push(Command::Dispatch { x, y, z });
    }

    pub fn close(&mut self) -> Result<(), GpuError> {
        if self.closed {
            return Err(GpuError::CommandListClosed(self.label.clone()));
        }
        self.closed = true;
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Discard recorded commands and reopen for recording
    pub fn reset(&mut self) {
        self.commands.clear();
        self.closed = false;
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Thread-group counts of every recorded dispatch, in order
    pub fn dispatches(&self) -> Vec<[u32; 3]> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                Command::Dispatch { x, y, z } => Some([*x, *y, *z]),
                _ => None,
            })
            .collect()
    }

    fn push(&mut self, command: Command) {
        if self.closed {
            log::error!(
                "Dropping {:?}: command list '{}' is closed",
                command,
                self.label
            );
            return;
        }
        self.commands.push(command);
    }
}

/// CPU-side view of a device timeline fence
#[derive(Debug, Default)]
pub struct Fence {
    last_signaled: u64,
}

impl Fence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a signal after all work executed so far
    pub fn signal(&mut self, device: &mut dyn GpuDevice) -> u64 {
        self.last_signaled = device.signal();
        self.last_signaled
    }

    /// Block until the device reaches `value`. No timeout.
    pub fn wait_for(&self, device: &mut dyn GpuDevice, value: u64) -> Result<(), GpuError> {
        if value > self.last_signaled {
            return Err(GpuError::FenceNotSignaled {
                requested: value,
                signaled: self.last_signaled,
            });
        }
        device.wait_for_fence(value)
    }

    pub fn last_signaled(&self) -> u64 {
        self.last_signaled
    }
}

/// Close, execute, signal, block until complete, then reset the list.
///
/// This is a full GPU drain; nothing is pipelined across calls. The list is
/// reset even when execution fails so it can be reused next frame.
pub fn submit_and_wait(
    device: &mut dyn GpuDevice,
    list: &mut CommandList,
    fence: &mut Fence,
) -> Result<u64, GpuError> {
    let result = submit_inner(device, list, fence);
    list.reset();
    result
}

fn submit_inner(
    device: &mut dyn GpuDevice,
    list: &mut CommandList,
    fence: &mut Fence,
) -> Result<u64, GpuError> {
    list.close()?;
    device.execute(list)?;
    let value = fence.signal(device);
    fence.wait_for(device, value)?;
    Ok(value)
}
