//! Particle material: tint colour and UV transform

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

/// Material persisted as the nested `Material` object of an emitter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Material {
    pub color: [f32; 4],
    pub uv_scale: [f32; 2],
    /// Radians
    pub uv_rotate: f32,
    pub uv_translate: [f32; 2],
}

impl Default for Material {
    fn default() -> Self {
        Self {
            color: [1.0, 1.0, 1.0, 1.0],
            uv_scale: [1.0, 1.0],
            uv_rotate: 0.0,
            uv_translate: [0.0, 0.0],
        }
    }
}

impl Material {
    /// Pack into the uniform layout read by the particle pixel shader
    pub fn to_constants(&self) -> MaterialConstants {
        let (sin, cos) = self.uv_rotate.sin_cos();
        let [sx, sy] = self.uv_scale;
        MaterialConstants {
            color: self.color,
            // scale then rotate, as a 2x2 matrix in column order
            uv_transform: [cos * sx, sin * sx, -sin * sy, cos * sy],
            uv_translate: self.uv_translate,
            _pad: [0.0; 2],
        }
    }
}

/// Uniform mirror of [`Material`]. 48 bytes.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct MaterialConstants {
    pub color: [f32; 4],
    pub uv_transform: [f32; 4],
    pub uv_translate: [f32; 2],
    pub _pad: [f32; 2],
}
