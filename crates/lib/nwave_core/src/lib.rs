pub mod camera;
pub mod distribution;
pub mod error;
pub mod film;
pub mod geometry;
pub mod interaction;
pub mod light;
pub mod material;
pub mod neural;
pub mod sampler;
pub mod sampling;
pub mod scene;
pub use error::{Error, Result};
pub use geometry::*;
pub use interaction::*;
pub use nwave_utils as util;
pub use sampler::*;
pub use sampling::*;

pub use glam::{
    ivec2, uvec2, vec2, vec3, IVec2, Mat3, Mat4, UVec2, UVec3, Vec2, Vec3, Vec4,
};
use std::ops::{Add, Mul, Sub};

pub const PI: f32 = std::f32::consts::PI;
pub const FRAC_1_PI: f32 = std::f32::consts::FRAC_1_PI;
pub const FRAC_PI_2: f32 = std::f32::consts::FRAC_PI_2;
pub const FRAC_PI_4: f32 = std::f32::consts::FRAC_PI_4;

/// Smallest value any pdf or distance may take before it is used as a divisor.
pub const DENOMINATOR_EPSILON: f32 = 1.0e-6;

#[inline]
pub fn lerp<T, S>(x: T, y: T, a: S) -> T
where
    T: Sub<Output = T> + Add<Output = T> + Mul<S, Output = T> + Copy,
    S: Copy,
{
    x + (y - x) * a
}

#[inline]
pub fn luminance(rgb: Vec3) -> f32 {
    rgb.dot(vec3(0.2126, 0.7152, 0.0722))
}

#[inline]
pub fn is_black(v: Vec3) -> bool {
    v.x == 0.0 && v.y == 0.0 && v.z == 0.0
}
