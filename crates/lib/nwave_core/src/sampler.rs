use crate::*;

pub trait Sampler {
    fn next1d(&mut self) -> f32;
    fn next2d(&mut self) -> Vec2 {
        vec2(self.next1d(), self.next1d())
    }
    fn next3d(&mut self) -> Vec3 {
        vec3(self.next1d(), self.next1d(), self.next1d())
    }
}

/// Tiny encryption algorithm, used to decorrelate per-path seeds.
pub fn tea<const N: u32>(val0: u32, val1: u32) -> u32 {
    let mut v0 = val0;
    let mut v1 = val1;
    let mut s0: u32 = 0;
    for _ in 0..N {
        s0 = s0.wrapping_add(0x9e3779b9);
        v0 = v0.wrapping_add(
            (v1 << 4).wrapping_add(0xa341316c)
                ^ v1.wrapping_add(s0)
                ^ (v1 >> 5).wrapping_add(0xc8013ea4),
        );
        v1 = v1.wrapping_add(
            (v0 << 4).wrapping_add(0xad90777d)
                ^ v0.wrapping_add(s0)
                ^ (v0 >> 5).wrapping_add(0x7e95761e),
        );
    }
    v0
}

/// Per-path random stream. The whole state is a single `u32` so it can be
/// carried inside queue items between stages.
#[derive(Clone, Copy, Debug, Default)]
pub struct PathRng {
    state: u32,
}
impl PathRng {
    const MULTIPLIER: u32 = 1664525;
    const INC: u32 = 1013904223;
    pub fn new(seed: u32) -> Self {
        Self { state: seed }
    }
    /// Seed for sample `sample_index` of `pixel` in the given frame, with at
    /// most `samples_per_launch` samples per pixel.
    pub fn for_path(
        pixel: u32,
        sample_index: u32,
        samples_per_launch: u32,
        iteration: u32,
        frame_id: u32,
    ) -> Self {
        Self::new(tea::<4>(
            pixel
                .wrapping_mul(samples_per_launch.max(1))
                .wrapping_add(sample_index),
            iteration.wrapping_add(frame_id),
        ))
    }
    pub fn seed(&self) -> u32 {
        self.state
    }
    fn lcg(&mut self) -> u32 {
        self.state = self
            .state
            .wrapping_mul(Self::MULTIPLIER)
            .wrapping_add(Self::INC);
        self.state & 0x00ff_ffff
    }
}
impl Sampler for PathRng {
    fn next1d(&mut self) -> f32 {
        self.lcg() as f32 / 0x0100_0000 as f32
    }
}
