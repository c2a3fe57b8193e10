use crate::{device::Device, Result, vk};

/// Governs how a [`CommandPool`] reclaims its command buffers at the start of
/// a frame.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ResetMode {
    /// Reset the whole pool in one call. The pool is created with the
    /// transient flag; individual buffers cannot be reset.
    ResetPool,
    /// Reset each allocated buffer on its own.
    ResetIndividually,
    /// Never reset; drop every buffer and allocate fresh ones on demand.
    AlwaysAllocate,
}

/// Allocates command buffers for one queue family and one recording thread,
/// recycling them through an active-count watermark over a growable vector.
pub struct CommandPool {
    device: Device,
    handle: vk::CommandPool,
    queue_family_index: u32,
    thread_index: usize,
    reset_mode: ResetMode,
    primary: Vec<vk::CommandBuffer>,
    active_primary: usize,
    secondary: Vec<vk::CommandBuffer>,
    active_secondary: usize,
}

impl CommandPool {
    pub fn new(
        device: Device,
        queue_family_index: u32,
        reset_mode: ResetMode,
        thread_index: usize,
    ) -> Result<CommandPool> {
        let flags = match reset_mode {
            ResetMode::ResetIndividually | ResetMode::AlwaysAllocate => {
                vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER
            }
            ResetMode::ResetPool => vk::CommandPoolCreateFlags::TRANSIENT,
        };
        let create_info = vk::CommandPoolCreateInfo {
            flags,
            queue_family_index,
            ..Default::default()
        };
        let handle = unsafe { device.create_command_pool(&create_info, None)? };

        Ok(CommandPool {
            device,
            handle,
            queue_family_index,
            thread_index,
            reset_mode,
            primary: vec![],
            active_primary: 0,
            secondary: vec![],
            active_secondary: 0,
        })
    }

    pub fn reset_mode(&self) -> ResetMode {
        self.reset_mode
    }

    pub fn queue_family_index(&self) -> u32 {
        self.queue_family_index
    }

    pub fn thread_index(&self) -> usize {
        self.thread_index
    }

    /// Number of command buffers currently allocated at the given level.
    pub fn buffer_count(&self, level: vk::CommandBufferLevel) -> usize {
        match level {
            vk::CommandBufferLevel::SECONDARY => self.secondary.len(),
            _ => self.primary.len(),
        }
    }

    /// Returns a command buffer of the requested level, preferring an
    /// already allocated inactive one over a fresh allocation.
    pub fn request_command_buffer(&mut self, level: vk::CommandBufferLevel) -> Result<vk::CommandBuffer> {
        let (buffers, active) = match level {
            vk::CommandBufferLevel::SECONDARY => (&mut self.secondary, &mut self.active_secondary),
            _ => (&mut self.primary, &mut self.active_primary),
        };

        if *active < buffers.len() {
            let buffer = buffers[*active];
            *active += 1;
            return Ok(buffer);
        }

        let allocate_info = vk::CommandBufferAllocateInfo {
            command_pool: self.handle,
            level,
            command_buffer_count: 1,
            ..Default::default()
        };
        let buffer = unsafe { self.device.allocate_command_buffers(&allocate_info)?[0] };
        buffers.push(buffer);
        *active += 1;
        Ok(buffer)
    }

    /// Reclaims all buffers according to the pool's reset mode. Must only be
    /// called once the GPU is done with every buffer handed out since the
    /// last reset.
    pub fn reset_pool(&mut self) -> Result<()> {
        match self.reset_mode {
            ResetMode::ResetPool => unsafe {
                self.device
                    .reset_command_pool(self.handle, vk::CommandPoolResetFlags::empty())?;
            },
            ResetMode::ResetIndividually => unsafe {
                for buffer in self.primary.iter().chain(self.secondary.iter()) {
                    self.device
                        .reset_command_buffer(*buffer, vk::CommandBufferResetFlags::empty())?;
                }
            },
            ResetMode::AlwaysAllocate => unsafe {
                if !self.primary.is_empty() {
                    self.device.free_command_buffers(self.handle, &self.primary);
                    self.primary.clear();
                }
                if !self.secondary.is_empty() {
                    self.device.free_command_buffers(self.handle, &self.secondary);
                    self.secondary.clear();
                }
            },
        }
        self.active_primary = 0;
        self.active_secondary = 0;
        Ok(())
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe { self.device.destroy_command_pool(self.handle, None) };
    }
}
