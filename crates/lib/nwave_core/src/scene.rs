use crate::camera::Camera;
use crate::light::*;
use crate::material::{EvalOutputs, MaterialRequest, MaterialTable};
use crate::*;
use glam::UVec3;

#[derive(Clone, Debug)]
pub struct TriangleMesh {
    pub vertices: Vec<Vec3>,
    pub normals: Option<Vec<Vec3>>,
    pub indices: Vec<UVec3>,
}

impl TriangleMesh {
    pub fn new(vertices: Vec<Vec3>, indices: Vec<UVec3>) -> Self {
        Self {
            vertices,
            normals: None,
            indices,
        }
    }
    /// Two-triangle quad `p0 p1 p2 p3`, counter-clockwise seen from the front.
    pub fn quad(p0: Vec3, p1: Vec3, p2: Vec3, p3: Vec3) -> Self {
        Self::new(
            vec![p0, p1, p2, p3],
            vec![UVec3::new(0, 1, 2), UVec3::new(0, 2, 3)],
        )
    }
    fn triangle(&self, i: usize) -> (Vec3, Vec3, Vec3) {
        let t = self.indices[i];
        (
            self.vertices[t.x as usize],
            self.vertices[t.y as usize],
            self.vertices[t.z as usize],
        )
    }
    pub fn triangle_area(&self, i: usize) -> f32 {
        let (v0, v1, v2) = self.triangle(i);
        0.5 * (v1 - v0).cross(v2 - v0).length()
    }
    pub fn bounds(&self) -> Aabb {
        let mut b = Aabb::default();
        for v in &self.vertices {
            b.insert_point(*v);
        }
        b
    }
    /// Surface record at barycentric weights `bary` of (v0, v1, v2).
    pub fn surface(&self, triangle: u32, bary: Vec3) -> HitProperties {
        let (v0, v1, v2) = self.triangle(triangle as usize);
        let position = v0 * bary.x + v1 * bary.y + v2 * bary.z;
        let true_normal = (v1 - v0).cross(v2 - v0).normalize_or_zero();
        let normal = match &self.normals {
            Some(normals) => {
                let t = self.indices[triangle as usize];
                let n = normals[t.x as usize] * bary.x
                    + normals[t.y as usize] * bary.y
                    + normals[t.z as usize] * bary.z;
                let n = n.normalize_or_zero();
                if n == Vec3::ZERO {
                    true_normal
                } else {
                    n
                }
            }
            None => true_normal,
        };
        HitProperties {
            position,
            true_normal,
            normal,
            frame: Frame::from_normal(normal),
            uv: vec2(bary.y, bary.z),
            triangle_id: triangle,
            ..Default::default()
        }
    }
    fn intersect_triangle(&self, i: usize, ray: &Ray, tmax: f32) -> Option<(f32, Vec3)> {
        let (v0, v1, v2) = self.triangle(i);
        let e1 = v1 - v0;
        let e2 = v2 - v0;
        let pvec = ray.d.cross(e2);
        let det = e1.dot(pvec);
        if det.abs() < 1e-12 {
            return None;
        }
        let inv_det = 1.0 / det;
        let tvec = ray.o - v0;
        let b1 = tvec.dot(pvec) * inv_det;
        if !(0.0..=1.0).contains(&b1) {
            return None;
        }
        let qvec = tvec.cross(e1);
        let b2 = ray.d.dot(qvec) * inv_det;
        if b2 < 0.0 || b1 + b2 > 1.0 {
            return None;
        }
        let t = e2.dot(qvec) * inv_det;
        if t <= ray.tmin || t >= tmax {
            return None;
        }
        Some((t, vec3(1.0 - b1 - b2, b1, b2)))
    }
}

#[derive(Clone, Copy, Debug)]
pub struct Sphere {
    pub center: Vec3,
    pub radius: f32,
}
impl Sphere {
    /// Both roots inside `(tmin, tmax)`, nearest first.
    fn intersect(&self, ray: &Ray, tmax: f32) -> impl Iterator<Item = f32> {
        let oc = ray.o - self.center;
        let a = ray.d.length_squared();
        let b = oc.dot(ray.d);
        let c = oc.length_squared() - self.radius * self.radius;
        let disc = b * b - a * c;
        let roots = if disc < 0.0 || a == 0.0 {
            [f32::NAN; 2]
        } else {
            let sq = disc.sqrt();
            [(-b - sq) / a, (-b + sq) / a]
        };
        let tmin = ray.tmin;
        roots.into_iter().filter(move |t| *t > tmin && *t < tmax)
    }
    pub fn surface(&self, p: Vec3) -> HitProperties {
        let n = ((p - self.center) / self.radius).normalize_or_zero();
        let theta = n.y.clamp(-1.0, 1.0).acos();
        let phi = n.z.atan2(n.x) + PI;
        HitProperties {
            position: p,
            true_normal: n,
            normal: n,
            frame: Frame::from_normal(n),
            uv: vec2(phi / (2.0 * PI), theta / PI),
            ..Default::default()
        }
    }
}

#[derive(Clone, Debug)]
pub enum Shape {
    Mesh(TriangleMesh),
    Sphere(Sphere),
}
impl Shape {
    pub fn bounds(&self) -> Aabb {
        match self {
            Shape::Mesh(m) => m.bounds(),
            Shape::Sphere(s) => Aabb {
                min: s.center - Vec3::splat(s.radius),
                max: s.center + Vec3::splat(s.radius),
            },
        }
    }
}

pub struct Instance {
    pub shape: Shape,
    pub material_id: u32,
    pub bounds: Aabb,
    pub light_id: Option<u32>,
}

/// Scene intersection contract. `sampler` drives stochastic alpha testing.
pub trait Intersector: Send + Sync {
    fn trace(&self, ray: &Ray, sampler: &mut dyn Sampler) -> Option<Hit>;
    fn occluded(&self, ray: &Ray, sampler: &mut dyn Sampler) -> bool;
}

pub struct Scene {
    pub camera: Camera,
    pub instances: Vec<Instance>,
    pub materials: MaterialTable,
    pub lights: Vec<Light>,
    pub env_light: Option<usize>,
    pub bounds: Aabb,
}

impl Scene {
    /// Compiles the scene: one mesh light per emissive mesh instance, plus
    /// the environment light when present.
    pub fn new(
        camera: Camera,
        materials: MaterialTable,
        shapes: Vec<(Shape, u32)>,
        environment: Option<EnvironmentLight>,
    ) -> Result<Self> {
        let mut instances = Vec::with_capacity(shapes.len());
        let mut lights = vec![];
        let mut bounds = Aabb::default();
        for (i, (shape, material_id)) in shapes.into_iter().enumerate() {
            let material = materials.get(material_id).ok_or_else(|| {
                Error::Scene(format!("instance {} uses unknown material {}", i, material_id))
            })?;
            let mut light_id = None;
            if material.has_emission() {
                match MeshLight::new(i as u32, material_id, &shape) {
                    Some(light) => {
                        light_id = Some(lights.len() as u32);
                        lights.push(Light::Mesh(light));
                    }
                    None => {
                        return Err(Error::Scene(format!(
                            "emissive instance {} must be a non-degenerate triangle mesh",
                            i
                        )))
                    }
                }
            }
            let b = shape.bounds();
            bounds.insert_box(&b);
            instances.push(Instance {
                shape,
                material_id,
                bounds: b,
                light_id,
            });
        }
        let env_light = environment.map(|env| {
            lights.push(Light::Environment(env));
            lights.len() - 1
        });
        log::info!(
            "scene: {} instances, {} materials, {} lights",
            instances.len(),
            materials.len(),
            lights.len()
        );
        Ok(Self {
            camera,
            instances,
            materials,
            lights,
            env_light,
            bounds,
        })
    }

    pub fn environment(&self) -> Option<&EnvironmentLight> {
        match self.env_light.map(|i| &self.lights[i]) {
            Some(Light::Environment(env)) => Some(env),
            _ => None,
        }
    }
    pub fn num_lights(&self) -> usize {
        self.lights.len()
    }
    /// Emitting area of the mesh light `light_id`.
    pub fn light_area(&self, light_id: u32) -> Option<f32> {
        match self.lights.get(light_id as usize) {
            Some(Light::Mesh(l)) => Some(l.total_area),
            _ => None,
        }
    }
    pub fn hit_flags(&self, material_id: u32, front_face: bool) -> HitFlags {
        let mut flags = HitFlags::empty();
        if let Some(m) = self.materials.get(material_id) {
            flags |= HitFlags::HAS_MATERIAL;
            if m.has_emission() {
                flags |= HitFlags::HAS_EMISSION;
            }
            if m.has_opacity() {
                flags |= HitFlags::HAS_OPACITY;
            }
        }
        if front_face {
            flags |= HitFlags::IS_FRONT_FACE;
        }
        flags
    }

    /// Picks one light uniformly and samples it from `p`. Invalid samples
    /// carry `pdf == 0`.
    pub fn sample_light(
        &self,
        p: Vec3,
        sampler: &mut dyn Sampler,
        max_distance: f32,
    ) -> LightSample {
        let Some((idx, selection_pdf)) = select_light(self.lights.len(), sampler.next1d()) else {
            return LightSample::invalid();
        };
        let u = sampler.next3d();
        let sample = match &self.lights[idx] {
            Light::Mesh(light) => light.sample(self, p, u, sampler),
            Light::Environment(env) => env.sample(p, u, max_distance),
        };
        sample.apply_selection(selection_pdf)
    }

    /// Stochastic alpha: a hit on a partially opaque surface is ignored
    /// with probability `1 - opacity`.
    fn accept(
        &self,
        instance: &Instance,
        props: &HitProperties,
        ray: &Ray,
        sampler: &mut dyn Sampler,
    ) -> bool {
        let Some(material) = self.materials.get(instance.material_id) else {
            return true;
        };
        if !material.has_opacity() {
            return true;
        }
        let request = MaterialRequest::new(props, -ray.d, EvalOutputs::OPACITY);
        let opacity = material.evaluate(&request, sampler).opacity;
        !(opacity < 1.0 && opacity <= sampler.next1d())
    }

    /// Fills in the instance data of a candidate hit and runs the alpha test.
    fn resolve_hit(
        &self,
        id: usize,
        instance: &Instance,
        t: f32,
        mut props: HitProperties,
        ray: &Ray,
        sampler: &mut dyn Sampler,
    ) -> Option<Hit> {
        props.instance_id = id as u32;
        props.material_id = instance.material_id;
        props.light_id = instance.light_id;
        props.flags = self.hit_flags(instance.material_id, (-ray.d).dot(props.true_normal) > 0.0);
        self.accept(instance, &props, ray, sampler)
            .then_some(Hit { t, props })
    }

    /// Nearest accepted hit. Candidates are alpha tested in any order and
    /// only the nearest survivor is kept.
    fn closest(&self, ray: &Ray, sampler: &mut dyn Sampler, any: bool) -> Option<Hit> {
        let mut tmax = ray.tmax;
        let mut best: Option<Hit> = None;
        for (id, instance) in self.instances.iter().enumerate() {
            let Some((t0, _)) = instance.bounds.intersect(&Ray { tmax, ..*ray }) else {
                continue;
            };
            if t0 > tmax {
                continue;
            }
            match &instance.shape {
                Shape::Sphere(s) => {
                    // roots arrive nearest first
                    for t in s.intersect(ray, tmax) {
                        let props = s.surface(ray.at(t));
                        if let Some(hit) = self.resolve_hit(id, instance, t, props, ray, sampler) {
                            tmax = t;
                            best = Some(hit);
                            break;
                        }
                    }
                }
                Shape::Mesh(m) => {
                    for i in 0..m.indices.len() {
                        let Some((t, bary)) = m.intersect_triangle(i, ray, tmax) else {
                            continue;
                        };
                        let props = m.surface(i as u32, bary);
                        if let Some(hit) = self.resolve_hit(id, instance, t, props, ray, sampler) {
                            tmax = t;
                            best = Some(hit);
                            if any {
                                return best;
                            }
                        }
                    }
                }
            }
            if any && best.is_some() {
                return best;
            }
        }
        best
    }
}

impl Intersector for Scene {
    fn trace(&self, ray: &Ray, sampler: &mut dyn Sampler) -> Option<Hit> {
        self.closest(ray, sampler, false)
    }
    fn occluded(&self, ray: &Ray, sampler: &mut dyn Sampler) -> bool {
        self.closest(ray, sampler, true).is_some()
    }
}
