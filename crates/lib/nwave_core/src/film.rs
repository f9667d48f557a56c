use std::path::Path;
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};

use crate::util::{linear_to_srgb, AtomicVec3};
use crate::*;

/// Per-pixel accumulators shared by every lane of a frame. All writes are
/// atomic adds; non-finite addends are dropped.
pub struct FrameBuffer {
    resolution: UVec2,
    radiance: Vec<AtomicVec3>,
    albedo: Vec<AtomicVec3>,
    normal: Vec<AtomicVec3>,
    true_normal: Vec<AtomicVec3>,
    samples: Vec<AtomicU32>,
    /// samples to launch per frame; -1 marks a pixel that saw nothing
    adaptive_samples: Vec<AtomicI32>,
    dropped: AtomicU32,
}

impl FrameBuffer {
    pub fn new(resolution: UVec2) -> Self {
        let n = (resolution.x * resolution.y) as usize;
        Self {
            resolution,
            radiance: (0..n).map(|_| AtomicVec3::default()).collect(),
            albedo: (0..n).map(|_| AtomicVec3::default()).collect(),
            normal: (0..n).map(|_| AtomicVec3::default()).collect(),
            true_normal: (0..n).map(|_| AtomicVec3::default()).collect(),
            samples: (0..n).map(|_| AtomicU32::new(0)).collect(),
            adaptive_samples: (0..n).map(|_| AtomicI32::new(1)).collect(),
            dropped: AtomicU32::new(0),
        }
    }
    pub fn resolution(&self) -> UVec2 {
        self.resolution
    }
    pub fn pixel_count(&self) -> usize {
        self.radiance.len()
    }
    #[inline]
    pub fn pixel_index(&self, x: u32, y: u32) -> usize {
        (x + y * self.resolution.x) as usize
    }

    fn add_guarded(&self, cell: &AtomicVec3, value: Vec3) -> bool {
        if !value.is_finite() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        cell.fetch_add(value);
        true
    }
    /// Returns false when `value` was dropped.
    pub fn add_radiance(&self, pixel: u32, value: Vec3) -> bool {
        self.add_guarded(&self.radiance[pixel as usize], value)
    }
    pub fn add_albedo(&self, pixel: u32, value: Vec3) -> bool {
        self.add_guarded(&self.albedo[pixel as usize], value)
    }
    pub fn add_normal(&self, pixel: u32, value: Vec3) -> bool {
        self.add_guarded(&self.normal[pixel as usize], value)
    }
    pub fn add_true_normal(&self, pixel: u32, value: Vec3) -> bool {
        self.add_guarded(&self.true_normal[pixel as usize], value)
    }
    pub fn add_sample(&self, pixel: u32) {
        self.samples[pixel as usize].fetch_add(1, Ordering::Relaxed);
    }
    pub fn samples(&self, pixel: u32) -> u32 {
        self.samples[pixel as usize].load(Ordering::Relaxed)
    }
    pub fn dropped_samples(&self) -> u32 {
        self.dropped.load(Ordering::Relaxed)
    }
    pub fn adaptive_samples(&self, pixel: u32) -> i32 {
        self.adaptive_samples[pixel as usize].load(Ordering::Relaxed)
    }
    pub fn set_adaptive_samples(&self, pixel: u32, count: i32) {
        self.adaptive_samples[pixel as usize].store(count, Ordering::Relaxed);
    }
    pub fn mark_direct_miss(&self, pixel: u32) {
        self.set_adaptive_samples(pixel, -1);
    }

    pub fn radiance_sum(&self, pixel: u32) -> Vec3 {
        self.radiance[pixel as usize].load()
    }
    fn average(&self, cell: &AtomicVec3, pixel: u32) -> Vec3 {
        let n = self.samples(pixel);
        if n == 0 {
            Vec3::ZERO
        } else {
            cell.load() / n as f32
        }
    }
    /// Mean radiance of all samples taken so far.
    pub fn resolve(&self, pixel: u32) -> Vec3 {
        self.average(&self.radiance[pixel as usize], pixel)
    }
    pub fn resolve_albedo(&self, pixel: u32) -> Vec3 {
        self.average(&self.albedo[pixel as usize], pixel)
    }
    pub fn resolve_normal(&self, pixel: u32) -> Vec3 {
        self.average(&self.normal[pixel as usize], pixel)
    }
    pub fn resolve_true_normal(&self, pixel: u32) -> Vec3 {
        self.average(&self.true_normal[pixel as usize], pixel)
    }

    /// Zeroes every accumulator and restores one sample per launch.
    pub fn clear(&mut self) {
        for i in 0..self.radiance.len() {
            self.radiance[i].store(Vec3::ZERO);
            self.albedo[i].store(Vec3::ZERO);
            self.normal[i].store(Vec3::ZERO);
            self.true_normal[i].store(Vec3::ZERO);
            *self.samples[i].get_mut() = 0;
            *self.adaptive_samples[i].get_mut() = 1;
        }
        *self.dropped.get_mut() = 0;
    }

    pub fn to_rgb_image(&self) -> image::RgbImage {
        let (w, h) = (self.resolution.x, self.resolution.y);
        // row 0 of the image is the top of the frame
        image::ImageBuffer::from_fn(w, h, |x, y| {
            let value = self.resolve(self.pixel_index(x, h - 1 - y) as u32);
            let srgb = linear_to_srgb(value.clamp(Vec3::ZERO, Vec3::ONE)) * 255.0;
            image::Rgb([srgb.x as u8, srgb.y as u8, srgb.z as u8])
        })
    }
    pub fn write_png<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.to_rgb_image()
            .save(path)
            .map_err(|e| Error::Image(e.to_string()))
    }
    pub fn write_exr<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let (w, h) = (self.resolution.x as usize, self.resolution.y as usize);
        exr::prelude::write_rgba_file(path, w, h, |x, y| {
            let value = self.resolve(self.pixel_index(x as u32, (h - 1 - y) as u32) as u32);
            (value.x, value.y, value.z, 1.0)
        })
        .map_err(|e| Error::Image(e.to_string()))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::util::parallel_for;

    #[test]
    fn nan_is_dropped() {
        let fb = FrameBuffer::new(uvec2(2, 2));
        assert!(fb.add_radiance(3, vec3(1.0, 2.0, 3.0)));
        let before = fb.radiance_sum(3);
        assert!(!fb.add_radiance(3, vec3(f32::NAN, 0.0, 0.0)));
        assert!(!fb.add_radiance(3, vec3(0.0, f32::INFINITY, 0.0)));
        assert_eq!(fb.radiance_sum(3), before);
        assert_eq!(fb.dropped_samples(), 2);
    }
    #[test]
    fn concurrent_accumulation() {
        let fb = FrameBuffer::new(uvec2(4, 1));
        parallel_for(4000, 16, |i| {
            let px = (i % 4) as u32;
            fb.add_radiance(px, Vec3::splat(0.25));
            fb.add_sample(px);
        });
        for px in 0..4 {
            assert_eq!(fb.samples(px), 1000);
            assert!((fb.resolve(px) - Vec3::splat(0.25)).length() < 1e-5);
        }
    }
    #[test]
    fn clear_resets_adaptive_state() {
        let mut fb = FrameBuffer::new(uvec2(3, 3));
        fb.mark_direct_miss(4);
        fb.add_radiance(4, Vec3::ONE);
        fb.add_sample(4);
        assert_eq!(fb.adaptive_samples(4), -1);
        fb.clear();
        assert_eq!(fb.adaptive_samples(4), 1);
        assert_eq!(fb.samples(4), 0);
        assert_eq!(fb.resolve(4), Vec3::ZERO);
    }
    #[test]
    fn image_is_flipped_vertically() {
        let fb = FrameBuffer::new(uvec2(1, 2));
        // bottom pixel white
        fb.add_radiance(0, Vec3::ONE);
        fb.add_sample(0);
        fb.add_sample(1);
        let img = fb.to_rgb_image();
        assert!(img.get_pixel(0, 1).0[0] >= 254);
        assert_eq!(img.get_pixel(0, 0).0[0], 0);
    }
}
