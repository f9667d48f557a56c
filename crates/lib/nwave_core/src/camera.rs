use crate::*;
use serde::{Deserialize, Serialize};

/// Pinhole camera. `horizontal` and `vertical` span half the image plane at
/// unit distance along `direction`.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Camera {
    pub position: Vec3,
    pub direction: Vec3,
    pub horizontal: Vec3,
    pub vertical: Vec3,
    pub resolution: UVec2,
}

impl Camera {
    pub fn look_at(
        eye: Vec3,
        target: Vec3,
        up: Vec3,
        fov_y_degrees: f32,
        resolution: UVec2,
    ) -> Self {
        let direction = (target - eye).normalize();
        let right = direction.cross(up).normalize();
        let true_up = right.cross(direction).normalize();
        let tan_half = (fov_y_degrees.to_radians() * 0.5).tan();
        let aspect = resolution.x as f32 / resolution.y.max(1) as f32;
        Self {
            position: eye,
            direction,
            horizontal: right * tan_half * aspect,
            vertical: true_up * tan_half,
            resolution,
        }
    }
    pub fn pixel_count(&self) -> usize {
        (self.resolution.x * self.resolution.y) as usize
    }
    pub fn resolution(&self) -> UVec2 {
        self.resolution
    }
    /// Ray through pixel `id` (linear, `x + y * width`, y pointing up).
    /// The jitter picks one of four sub-pixel quadrants, then a point
    /// inside it.
    pub fn generate_ray(&self, id: u32, sampler: &mut dyn Sampler) -> Ray {
        let width = self.resolution.x;
        let pixel = vec2((id % width) as f32, (id / width) as f32);
        let screen = self.resolution.as_vec2();
        let rnd01 = sampler.next2d();
        let rnd02 = sampler.next2d();
        let quadrant = vec2(
            if rnd01.x > 0.5 { 0.5 } else { -0.5 },
            if rnd01.y > 0.5 { 0.5 } else { -0.5 },
        );
        let fragment = pixel + quadrant + (rnd02 * 0.5 - 0.25);
        let ndc = (fragment / screen) * 2.0 - 1.0;
        let direction = self.horizontal * ndc.x + self.vertical * ndc.y + self.direction;
        Ray::spawn(self.position, direction.normalize())
    }
}
