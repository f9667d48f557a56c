use crate::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug)]
pub struct Ray {
    pub o: Vec3,
    pub d: Vec3,
    pub tmin: f32,
    pub tmax: f32,
}
impl Default for Ray {
    fn default() -> Self {
        Self {
            o: Vec3::ZERO,
            d: Vec3::ZERO,
            tmin: 0.0,
            tmax: -f32::INFINITY,
        }
    }
}

fn origin() -> f32 {
    1.0 / 32.0
}
fn float_scale() -> f32 {
    1.0 / 65536.0
}
fn int_scale() -> f32 {
    256.0
}
/// Moves `p` off the surface with normal `n` by a few ulps so the spawned
/// ray does not hit the surface it starts on.
pub fn offset_ray(p: Vec3, n: Vec3) -> Vec3 {
    let of_i = glam::ivec3(
        (int_scale() * n.x) as i32,
        (int_scale() * n.y) as i32,
        (int_scale() * n.z) as i32,
    );
    let bump = |x: f32, o: i32| -> f32 {
        let bits = x.to_bits() as i32 + if x < 0.0 { -o } else { o };
        f32::from_bits(bits as u32)
    };
    let p_i = vec3(bump(p.x, of_i.x), bump(p.y, of_i.y), bump(p.z, of_i.z));
    vec3(
        if p.x.abs() < origin() {
            p.x + float_scale() * n.x
        } else {
            p_i.x
        },
        if p.y.abs() < origin() {
            p.y + float_scale() * n.y
        } else {
            p_i.y
        },
        if p.z.abs() < origin() {
            p.z + float_scale() * n.z
        } else {
            p_i.z
        },
    )
}

impl Ray {
    pub fn spawn(o: Vec3, d: Vec3) -> Self {
        Self {
            o,
            d,
            tmin: 0.0,
            tmax: f32::INFINITY,
        }
    }
    pub fn spawn_with_max(o: Vec3, d: Vec3, tmax: f32) -> Self {
        Self {
            o,
            d,
            tmin: 0.0,
            tmax,
        }
    }
    pub fn at(&self, t: f32) -> Vec3 {
        self.o + t * self.d
    }
}

/// Orthonormal shading frame. Local coordinates put the normal on +y.
#[allow(non_snake_case)]
#[derive(Clone, Copy, Debug, Default)]
pub struct Frame {
    pub N: Vec3,
    pub B: Vec3,
    pub T: Vec3,
}
impl Frame {
    pub fn from_normal(normal: Vec3) -> Self {
        let tangent = if normal.x.abs() > normal.y.abs() {
            vec3(-normal.z, 0.0, normal.x).normalize()
        } else {
            vec3(0.0, normal.z, -normal.y).normalize()
        };
        Self {
            N: normal,
            T: tangent,
            B: normal.cross(tangent).normalize(),
        }
    }
    pub fn to_local(&self, v: Vec3) -> Vec3 {
        vec3(v.dot(self.T), v.dot(self.N), v.dot(self.B))
    }
    pub fn to_world(&self, v: Vec3) -> Vec3 {
        self.T * v.x + self.N * v.y + self.B * v.z
    }
    #[inline]
    pub fn cos_theta(u: Vec3) -> f32 {
        u.y
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}
impl Default for Aabb {
    fn default() -> Self {
        Self {
            min: Vec3::splat(f32::INFINITY),
            max: Vec3::splat(f32::NEG_INFINITY),
        }
    }
}
impl Aabb {
    pub fn is_empty(&self) -> bool {
        self.min.cmpgt(self.max).any()
    }
    pub fn insert_point(&mut self, p: Vec3) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }
    pub fn insert_box(&mut self, other: &Aabb) {
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }
    pub fn extent(&self) -> Vec3 {
        self.max - self.min
    }
    /// Position of `p` relative to the box, in [0,1]^3 for points inside.
    pub fn offset(&self, p: Vec3) -> Vec3 {
        (p - self.min) / self.extent().max(Vec3::splat(1e-6))
    }
    /// Slab test; returns the parametric entry/exit distances.
    pub fn intersect(&self, ray: &Ray) -> Option<(f32, f32)> {
        let invd = ray.d.recip();
        let t0 = (self.min - ray.o) * invd;
        let t1 = (self.max - ray.o) * invd;
        let tmin = t0.min(t1).max_element().max(ray.tmin);
        let tmax = t0.max(t1).min_element().min(ray.tmax);
        if tmin <= tmax {
            Some((tmin, tmax))
        } else {
            None
        }
    }
}

pub fn reflect(w: Vec3, n: Vec3) -> Vec3 {
    -w + 2.0 * w.dot(n) * n
}
/// Refracts `w` (pointing away from the surface) through the interface with
/// normal `n` on the side of `w`; `eta` is eta_i / eta_t.
pub fn refract(w: Vec3, n: Vec3, eta: f32) -> Option<Vec3> {
    let cos_theta_i = w.dot(n);
    let sin2_theta_i = (1.0 - cos_theta_i * cos_theta_i).max(0.0);
    let sin2_theta_t = eta * eta * sin2_theta_i;
    if sin2_theta_t >= 1.0 {
        return None;
    }
    let cos_theta_t = (1.0 - sin2_theta_t).sqrt();
    Some(eta * -w + (eta * cos_theta_i - cos_theta_t) * n)
}
pub fn fresnel_dielectric(cos_theta_i: f32, eta_i: f32, eta_t: f32) -> f32 {
    let cos_theta_i = cos_theta_i.clamp(-1.0, 1.0);
    let sin_theta_i = (1.0 - cos_theta_i * cos_theta_i).max(0.0).sqrt();
    let sin_theta_t = eta_i / eta_t * sin_theta_i;
    if sin_theta_t >= 1.0 {
        return 1.0;
    }
    let cos_theta_i = cos_theta_i.abs();
    let cos_theta_t = (1.0 - sin_theta_t * sin_theta_t).max(0.0).sqrt();
    let r_parl = ((eta_t * cos_theta_i) - (eta_i * cos_theta_t))
        / ((eta_t * cos_theta_i) + (eta_i * cos_theta_t));
    let r_perp = ((eta_i * cos_theta_i) - (eta_t * cos_theta_t))
        / ((eta_i * cos_theta_i) + (eta_t * cos_theta_t));
    (r_parl * r_parl + r_perp * r_perp) / 2.0
}
