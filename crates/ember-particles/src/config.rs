//! Particle system settings, loaded from TOML

use ember_core::Result;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// When the free-index stack is seeded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitializePolicy {
    /// Reseed every active emitter every frame, discarding live particles
    #[default]
    EveryFrame,
    /// Seed once after a pool is created
    Once,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ParticleSettings {
    pub initialize_policy: InitializePolicy,
    pub default_particle_size: u32,
    pub max_particle_size: u32,
    /// Directory whose `*.wgsl` files override the embedded shaders
    pub shader_directory: Option<PathBuf>,
    /// Capacity of the device's shader-visible descriptor heap
    pub descriptor_heap_size: u32,
}

impl Default for ParticleSettings {
    fn default() -> Self {
        Self {
            initialize_policy: InitializePolicy::EveryFrame,
            default_particle_size: 1024,
            max_particle_size: 1 << 20,
            shader_directory: None,
            descriptor_heap_size: 4096,
        }
    }
}

impl ParticleSettings {
    pub fn from_toml_str(source: &str) -> Result<Self> {
        Ok(toml::from_str(source)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    pub fn shader_directory(&self) -> Option<&Path> {
        self.shader_directory.as_deref()
    }

    /// Zero becomes the default size, anything above the maximum is clamped
    pub fn clamp_particle_size(&self, requested: u32) -> u32 {
        if requested == 0 {
            log::warn!(
                "Particle size 0 requested, using default {}",
                self.default_particle_size
            );
            return self.default_particle_size.min(self.max_particle_size);
        }
        if requested > self.max_particle_size {
            log::warn!(
                "Particle size {} exceeds maximum {}, clamping",
                requested,
                self.max_particle_size
            );
            return self.max_particle_size;
        }
        requested
    }
}
