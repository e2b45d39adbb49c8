//! Emitter shape parameters: the CPU mirror of the per-emitter constant buffer

use bytemuck::{Pod, Zeroable};

/// Emission volume
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitterShape {
    /// Uniform in `center ± size / 2`
    Box,
    /// Uniform in a ball of radius `size[0]` around `center`
    Sphere,
}

impl EmitterShape {
    pub fn as_raw(self) -> u32 {
        match self {
            EmitterShape::Box => 0,
            EmitterShape::Sphere => 1,
        }
    }

    /// Unknown values read back as `Box`, matching the shader's fallthrough
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            1 => EmitterShape::Sphere,
            _ => EmitterShape::Box,
        }
    }
}

/// Matches the WGSL `EmitterShape` uniform. 144 bytes.
///
/// Each `[f32; 3]` is followed by a 4-byte scalar so the struct packs into
/// 16-byte rows the same way WGSL lays out `vec3` + scalar pairs.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct EmitterShapeParameters {
    pub center: [f32; 3],
    pub shape: u32,
    pub size: [f32; 3],
    /// Non-zero places particles on the surface of the volume
    pub edge_only: u32,
    pub velocity_min: [f32; 3],
    /// Seconds until the next emission
    pub frequency: f32,
    pub velocity_max: [f32; 3],
    /// Value `frequency` is reset to after each emission
    pub frequency_time: f32,
    pub scale_min: [f32; 3],
    /// Set for exactly the frames on which the countdown elapsed
    pub is_emit: u32,
    pub scale_max: [f32; 3],
    /// Pool capacity. Must match the buffers the emitter owns.
    pub particle_size: u32,
    pub color_min: [f32; 4],
    pub color_max: [f32; 4],
    pub count_min: u32,
    pub count_max: u32,
    pub life_time_min: f32,
    pub life_time_max: f32,
}

impl Default for EmitterShapeParameters {
    fn default() -> Self {
        Self {
            center: [0.0; 3],
            shape: EmitterShape::Box.as_raw(),
            size: [1.0, 1.0, 1.0],
            edge_only: 0,
            velocity_min: [-0.1, 0.5, -0.1],
            frequency: 0.1,
            velocity_max: [0.1, 1.0, 0.1],
            frequency_time: 0.1,
            scale_min: [0.1, 0.1, 0.1],
            is_emit: 0,
            scale_max: [0.2, 0.2, 0.2],
            particle_size: 1024,
            color_min: [1.0, 1.0, 1.0, 1.0],
            color_max: [1.0, 1.0, 1.0, 1.0],
            count_min: 1,
            count_max: 4,
            life_time_min: 1.0,
            life_time_max: 2.0,
        }
    }
}

impl EmitterShapeParameters {
    pub fn emitter_shape(&self) -> EmitterShape {
        EmitterShape::from_raw(self.shape)
    }

    pub fn set_emitter_shape(&mut self, shape: EmitterShape) {
        self.shape = shape.as_raw();
    }

    pub fn is_emitting(&self) -> bool {
        self.is_emit != 0
    }

    /// Advance the emission countdown by `delta_time`.
    ///
    /// At most one emission fires per call no matter how far the countdown
    /// overshoots zero. Returns whether this frame emits.
    pub fn tick_emission(&mut self, delta_time: f32) -> bool {
        self.frequency -= delta_time;
        if self.frequency < 0.0 {
            self.frequency = self.frequency_time;
            self.is_emit = 1;
        } else {
            self.is_emit = 0;
        }
        self.is_emitting()
    }

    /// Particle count range with `count_max` raised to at least `count_min`
    pub fn count_range(&self) -> (u32, u32) {
        (self.count_min, self.count_max.max(self.count_min))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_layout_matches_wgsl() {
        assert_eq!(std::mem::size_of::<EmitterShapeParameters>(), 144);
        assert_eq!(std::mem::offset_of!(EmitterShapeParameters, frequency), 44);
        assert_eq!(std::mem::offset_of!(EmitterShapeParameters, is_emit), 76);
        assert_eq!(std::mem::offset_of!(EmitterShapeParameters, particle_size), 92);
        assert_eq!(std::mem::offset_of!(EmitterShapeParameters, color_min), 96);
        assert_eq!(std::mem::offset_of!(EmitterShapeParameters, count_min), 128);
    }

    #[test]
    fn countdown_elapses_and_resets() {
        let mut shape = EmitterShapeParameters {
            frequency: 0.05,
            frequency_time: 0.1,
            ..Default::default()
        };
        assert!(shape.tick_emission(0.06));
        assert_eq!(shape.is_emit, 1);
        assert_eq!(shape.frequency, 0.1);
    }

    #[test]
    fn countdown_not_yet_elapsed() {
        let mut shape = EmitterShapeParameters {
            frequency: 0.05,
            frequency_time: 0.1,
            ..Default::default()
        };
        assert!(!shape.tick_emission(0.02));
        assert_eq!(shape.is_emit, 0);
        assert!((shape.frequency - 0.03).abs() < 1e-6);
    }

    #[test]
    fn large_delta_fires_only_once() {
        let mut shape = EmitterShapeParameters {
            frequency: 0.1,
            frequency_time: 0.1,
            ..Default::default()
        };
        assert!(shape.tick_emission(1.0));
        assert_eq!(shape.frequency, 0.1);
        // The overshoot is not carried into the next frame
        assert!(!shape.tick_emission(0.05));
    }

    #[test]
    fn is_emit_clears_on_following_frame() {
        let mut shape = EmitterShapeParameters {
            frequency: 0.0,
            frequency_time: 0.5,
            ..Default::default()
        };
        assert!(shape.tick_emission(0.01));
        assert!(!shape.tick_emission(0.01));
        assert_eq!(shape.is_emit, 0);
    }

    #[test]
    fn shape_round_trips_through_raw() {
        let mut shape = EmitterShapeParameters::default();
        assert_eq!(shape.emitter_shape(), EmitterShape::Box);
        shape.set_emitter_shape(EmitterShape::Sphere);
        assert_eq!(shape.shape, 1);
        assert_eq!(EmitterShape::from_raw(7), EmitterShape::Box);
    }

    #[test]
    fn inverted_count_range_collapses() {
        let shape = EmitterShapeParameters {
            count_min: 5,
            count_max: 2,
            ..Default::default()
        };
        assert_eq!(shape.count_range(), (5, 5));
    }
}
