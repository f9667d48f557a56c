use crate::*;
use serde::{Deserialize, Serialize};

pub fn concentric_disk(u: Vec2) -> Vec2 {
    let u_offset: Vec2 = 2.0 * u - vec2(1.0, 1.0);
    if u_offset.x == 0.0 && u_offset.y == 0.0 {
        return vec2(0.0, 0.0);
    }
    let (theta, r) = {
        if u_offset.x.abs() > u_offset.y.abs() {
            let r = u_offset.x;
            let theta = FRAC_PI_4 * (u_offset.y / u_offset.x);
            (theta, r)
        } else {
            let r = u_offset.y;
            let theta = FRAC_PI_2 - FRAC_PI_4 * (u_offset.x / u_offset.y);
            (theta, r)
        }
    };
    r * vec2(theta.cos(), theta.sin())
}

/// Cosine-weighted direction around +y.
pub fn cosine_hemisphere(u: Vec2) -> Vec3 {
    let uv = concentric_disk(u);
    let r = uv.length_squared();
    let h = (1.0 - r).max(0.0).sqrt();
    vec3(uv.x, h, uv.y)
}
pub fn cosine_hemisphere_pdf(cos_theta: f32) -> f32 {
    if cos_theta <= 0.0 {
        0.0
    } else {
        cos_theta * FRAC_1_PI
    }
}

pub fn uniform_sphere(u: Vec2) -> Vec3 {
    let z = 1.0 - 2.0 * u.x;
    let r = (1.0 - z * z).max(0.0).sqrt();
    let phi = 2.0 * PI * u.y;
    vec3(r * phi.cos(), r * phi.sin(), z)
}
pub const fn uniform_sphere_pdf() -> f32 {
    1.0 / (4.0 * PI)
}

/// Uniform point on a triangle, as barycentric weights of (v0, v1, v2).
pub fn uniform_triangle(u: Vec2) -> Vec3 {
    let su = u.x.sqrt();
    let a = 1.0 - su;
    let b = u.y * su;
    vec3(a, b, 1.0 - a - b)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MisHeuristic {
    Power,
    Balance,
}
impl Default for MisHeuristic {
    fn default() -> Self {
        Self::Power
    }
}
impl MisHeuristic {
    /// Weight of the strategy that produced `pdf_a`.
    pub fn weight(&self, pdf_a: f32, pdf_b: f32) -> f32 {
        let w = match self {
            MisHeuristic::Power => power_heuristic(pdf_a, pdf_b),
            MisHeuristic::Balance => balance_heuristic(pdf_a, pdf_b),
        };
        if w.is_finite() {
            w
        } else {
            0.0
        }
    }
}
pub fn power_heuristic(pdf_a: f32, pdf_b: f32) -> f32 {
    let a = pdf_a * pdf_a;
    let b = pdf_b * pdf_b;
    a / (a + b)
}
pub fn balance_heuristic(pdf_a: f32, pdf_b: f32) -> f32 {
    pdf_a / (pdf_a + pdf_b)
}
