//! Compute pipeline descriptions and shader source loading

use crate::error::GpuError;
use std::fmt;
use std::path::Path;

/// Name under which a compiled pipeline is cached by the device
#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct PipelineKey(String);

impl PipelineKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PipelineKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of resource expected at a root slot
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BindingKind {
    /// Read/write storage buffer bound through a UAV descriptor
    Uav,
    /// Uniform buffer
    Constant,
}

/// Everything a device needs to build a compute pipeline.
///
/// `bindings[i]` describes root slot `i`; on wgpu these become
/// `@group(0) @binding(i)`.
#[derive(Clone, Debug)]
pub struct ComputePipelineDesc {
    pub key: PipelineKey,
    pub source: String,
    pub entry_point: String,
    pub bindings: Vec<BindingKind>,
}

/// Read `<directory>/<file_name>` if present, otherwise fall back to the
/// embedded source. Lets shader edits be picked up without a rebuild.
pub fn load_shader(
    directory: Option<&Path>,
    file_name: &str,
    embedded: &'static str,
) -> Result<String, GpuError> {
    let Some(directory) = directory else {
        return Ok(embedded.to_string());
    };
    let path = directory.join(file_name);
    if !path.exists() {
        log::warn!(
            "Shader override {} not found, using embedded source",
            path.display()
        );
        return Ok(embedded.to_string());
    }
    std::fs::read_to_string(&path)
        .map_err(|e| GpuError::ShaderSource(format!("{}: {}", path.display(), e)))
}
