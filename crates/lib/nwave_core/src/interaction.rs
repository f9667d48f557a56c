use crate::*;
use bitflags::bitflags;

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct HitFlags: u8 {
        const HAS_MATERIAL = 1;
        const HAS_EMISSION = 1 << 1;
        const HAS_OPACITY = 1 << 2;
        const IS_FRONT_FACE = 1 << 3;
    }
}

/// Geometric and material record of a ray hit.
#[derive(Clone, Copy, Debug, Default)]
pub struct HitProperties {
    pub position: Vec3,
    /// geometric normal, facing outward
    pub true_normal: Vec3,
    /// shading normal, facing outward
    pub normal: Vec3,
    pub frame: Frame,
    pub uv: Vec2,
    pub instance_id: u32,
    pub triangle_id: u32,
    pub material_id: u32,
    /// index into the scene's light list when the instance is emissive
    pub light_id: Option<u32>,
    pub flags: HitFlags,
}

impl HitProperties {
    pub fn is_front_face(&self) -> bool {
        self.flags.contains(HitFlags::IS_FRONT_FACE)
    }
    pub fn has_emission(&self) -> bool {
        self.flags.contains(HitFlags::HAS_EMISSION)
    }
    pub fn has_opacity(&self) -> bool {
        self.flags.contains(HitFlags::HAS_OPACITY)
    }
    /// Shading normal flipped to the side of `wo`.
    pub fn facing_normal(&self, wo: Vec3) -> Vec3 {
        if wo.dot(self.true_normal) >= 0.0 {
            self.normal
        } else {
            -self.normal
        }
    }
    /// Origin for a ray leaving the surface in direction `d`.
    pub fn spawn_point(&self, d: Vec3) -> Vec3 {
        let n = if d.dot(self.true_normal) > 0.0 {
            self.true_normal
        } else {
            -self.true_normal
        };
        offset_ray(self.position, n)
    }
}

/// A hit returned by the intersector.
#[derive(Clone, Copy, Debug)]
pub struct Hit {
    pub t: f32,
    pub props: HitProperties,
}
