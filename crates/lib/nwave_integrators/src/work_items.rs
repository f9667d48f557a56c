use nwave_core::material::BsdfEvent;
use nwave_core::*;

/// A ray waiting to be traced. `extend_ray == false` marks a finished path
/// whose radiance goes to accumulation instead.
#[derive(Clone, Copy, Debug)]
pub struct TraceWorkItem {
    pub origin: Vec3,
    pub direction: Vec3,
    pub radiance: Vec3,
    pub throughput: Vec3,
    /// density of the sampling event that produced `direction`
    pub pdf: f32,
    pub event: BsdfEvent,
    pub medium_ior: Vec3,
    pub depth: u32,
    pub pixel: u32,
    pub sample_index: u32,
    pub seed: u32,
    pub extend_ray: bool,
}
impl Default for TraceWorkItem {
    fn default() -> Self {
        Self {
            origin: Vec3::ZERO,
            direction: Vec3::ZERO,
            radiance: Vec3::ZERO,
            throughput: Vec3::ONE,
            pdf: 1.0,
            event: BsdfEvent::ABSORB,
            medium_ior: Vec3::ONE,
            depth: 0,
            pixel: 0,
            sample_index: 0,
            seed: 0,
            extend_ray: true,
        }
    }
}

/// Path state at a surface hit, consumed by the shading stage.
#[derive(Clone, Copy, Debug, Default)]
pub struct RayWorkItem {
    pub hit: HitProperties,
    pub hit_distance: f32,
    /// direction the path arrived along
    pub direction: Vec3,
    pub radiance: Vec3,
    pub throughput: Vec3,
    pub pdf: f32,
    pub event: BsdfEvent,
    pub medium_ior: Vec3,
    pub depth: u32,
    pub pixel: u32,
    pub sample_index: u32,
    pub seed: u32,
}

/// Visibility query toward a sampled light. `distance <= 0` means there is
/// nothing to trace.
#[derive(Clone, Copy, Debug)]
pub struct ShadowWorkItem {
    pub origin: Vec3,
    pub direction: Vec3,
    pub distance: f32,
    /// contribution delivered when unoccluded, already MIS weighted
    pub radiance: Vec3,
    pub depth: u32,
    pub pixel: u32,
    pub sample_index: u32,
    pub seed: u32,
    pub medium_ior: Vec3,
}
impl Default for ShadowWorkItem {
    fn default() -> Self {
        Self::invalid()
    }
}
impl ShadowWorkItem {
    pub fn invalid() -> Self {
        Self {
            origin: Vec3::ZERO,
            direction: Vec3::ZERO,
            distance: -1.0,
            radiance: Vec3::ZERO,
            depth: 0,
            pixel: 0,
            sample_index: 0,
            seed: 0,
            medium_ior: Vec3::ONE,
        }
    }
    pub fn is_traceable(&self) -> bool {
        self.distance > 0.0 && !is_black(self.radiance)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct EscapedWorkItem {
    pub direction: Vec3,
    pub throughput: Vec3,
    pub radiance: Vec3,
    pub pdf: f32,
    pub depth: u32,
    pub event: BsdfEvent,
    pub pixel: u32,
    pub sample_index: u32,
    pub seed: u32,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct AccumulationWorkItem {
    pub radiance: Vec3,
    pub pixel: u32,
    pub depth: u32,
}

impl TraceWorkItem {
    /// State handed to the shading stage after the ray hit `hit`.
    pub fn hit(&self, hit: &Hit, seed: u32) -> RayWorkItem {
        RayWorkItem {
            hit: hit.props,
            hit_distance: hit.t,
            direction: self.direction,
            radiance: self.radiance,
            throughput: self.throughput,
            pdf: self.pdf,
            event: self.event,
            medium_ior: self.medium_ior,
            depth: self.depth,
            pixel: self.pixel,
            sample_index: self.sample_index,
            seed,
        }
    }
    pub fn escaped(&self, seed: u32) -> EscapedWorkItem {
        EscapedWorkItem {
            direction: self.direction,
            throughput: self.throughput,
            radiance: self.radiance,
            pdf: self.pdf,
            depth: self.depth,
            event: self.event,
            pixel: self.pixel,
            sample_index: self.sample_index,
            seed,
        }
    }
}
