//! PCG hash random numbers, bit-identical to the generator in `shaders/emit.wgsl`

/// One round of the PCG-RXS-M-XS hash
pub fn pcg_hash(input: u32) -> u32 {
    let state = input.wrapping_mul(747_796_405).wrapping_add(2_891_336_453);
    let word = ((state >> ((state >> 28) + 4)) ^ state).wrapping_mul(277_803_737);
    (word >> 22) ^ word
}

/// Per-thread generator. Stateless across dispatches; every particle gets a
/// fresh seed so results do not depend on thread scheduling.
pub struct ParticleRng {
    state: u32,
}

impl ParticleRng {
    pub fn new(seed: u32) -> Self {
        Self { state: seed }
    }

    /// Seed for one emitted particle
    pub fn for_particle(frame_index: u32, time: f32, thread_id: u32, ordinal: u32) -> Self {
        let mut seed = pcg_hash(frame_index);
        seed = pcg_hash(seed ^ time.to_bits());
        seed = pcg_hash(seed ^ thread_id);
        seed = pcg_hash(seed ^ ordinal);
        Self::new(seed)
    }

    pub fn next_u32(&mut self) -> u32 {
        self.state = pcg_hash(self.state);
        self.state
    }

    /// Uniform in [0, 1). Uses the top 24 bits so the value is exact in f32.
    pub fn next_f32(&mut self) -> f32 {
        (self.next_u32() >> 8) as f32 / 16_777_216.0
    }

    pub fn range(&mut self, min: f32, max: f32) -> f32 {
        min + (max - min) * self.next_f32()
    }

    /// Component-wise uniform between `min` and `max`
    pub fn range3(&mut self, min: [f32; 3], max: [f32; 3]) -> [f32; 3] {
        let x = self.range(min[0], max[0]);
        let y = self.range(min[1], max[1]);
        let z = self.range(min[2], max[2]);
        [x, y, z]
    }

    pub fn range4(&mut self, min: [f32; 4], max: [f32; 4]) -> [f32; 4] {
        let x = self.range(min[0], max[0]);
        let y = self.range(min[1], max[1]);
        let z = self.range(min[2], max[2]);
        let w = self.range(min[3], max[3]);
        [x, y, z, w]
    }

    /// Uniform integer in `[min, max]`
    pub fn range_u32(&mut self, min: u32, max: u32) -> u32 {
        let span = max.saturating_sub(min).min(u32::MAX - 1) + 1;
        min + self.next_u32() % span
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_hash_values() {
        // Reference values of the published PCG hash
        assert_eq!(pcg_hash(0), 129_708_002);
        assert_ne!(pcg_hash(1), pcg_hash(2));
    }

    #[test]
    fn unit_range_bounds() {
        let mut rng = ParticleRng::new(42);
        for _ in 0..10_000 {
            let v = rng.next_f32();
            assert!((0.0..1.0).contains(&v));
        }
    }

    #[test]
    fn integer_range_is_inclusive() {
        let mut rng = ParticleRng::new(7);
        let mut seen = [false; 4];
        for _ in 0..1000 {
            let v = rng.range_u32(2, 5);
            assert!((2..=5).contains(&v));
            seen[(v - 2) as usize] = true;
        }
        assert!(seen.iter().all(|s| *s));
        assert_eq!(rng.range_u32(3, 3), 3);
        // Full range must not divide by zero
        rng.range_u32(0, u32::MAX);
    }

    #[test]
    fn particle_seeds_differ_by_ordinal() {
        let a = ParticleRng::for_particle(1, 0.5, 0, 0).next_u32();
        let b = ParticleRng::for_particle(1, 0.5, 0, 1).next_u32();
        let c = ParticleRng::for_particle(1, 0.5, 0, 0).next_u32();
        assert_ne!(a, b);
        assert_eq!(a, c);
    }
}
