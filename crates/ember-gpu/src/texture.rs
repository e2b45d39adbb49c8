//! Texture lookup seam

use crate::handle::DescriptorHandle;
use std::collections::HashMap;

/// Resolves texture paths to stable indices and their shader-visible descriptors.
///
/// Index 0 is always the built-in white texture.
pub trait TextureManager {
    /// Load (or look up) a texture, returning its index
    fn load_texture(&mut self, path: &str) -> u32;
    fn descriptor_gpu_handle(&self, index: u32) -> Option<DescriptorHandle>;
}

/// Path-keyed texture index table.
///
/// Decoding and upload belong to the asset pipeline; this only hands out
/// indices and remembers which descriptor slot each index was given.
#[derive(Default)]
pub struct TextureRegistry {
    by_path: HashMap<String, u32>,
    descriptors: Vec<Option<DescriptorHandle>>,
}

impl TextureRegistry {
    pub fn new() -> Self {
        Self {
            by_path: HashMap::new(),
            // slot for the default white texture
            descriptors: vec![None],
        }
    }

    /// Record the descriptor that the asset pipeline uploaded for `index`
    pub fn set_descriptor(&mut self, index: u32, descriptor: DescriptorHandle) {
        if let Some(slot) = self.descriptors.get_mut(index as usize) {
            *slot = Some(descriptor);
        }
    }

    pub fn len(&self) -> usize {
        self.by_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_path.is_empty()
    }
}

impl TextureManager for TextureRegistry {
    fn load_texture(&mut self, path: &str) -> u32 {
        if path.is_empty() {
            return 0;
        }
        if let Some(index) = self.by_path.get(path) {
            return *index;
        }
        let index = self.descriptors.len() as u32;
        self.descriptors.push(None);
        self.by_path.insert(path.to_string(), index);
        log::info!("Registered texture '{}' as index {}", path, index);
        index
    }

    fn descriptor_gpu_handle(&self, index: u32) -> Option<DescriptorHandle> {
        self.descriptors.get(index as usize).copied().flatten()
    }
}
