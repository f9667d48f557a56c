use crate::distribution::{AliasTable, Distribution1D};
use crate::material::{EvalOutputs, MaterialRequest};
use crate::scene::{Scene, Shape};
use crate::*;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LightType {
    #[default]
    Mesh,
    Environment,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct LightSample {
    /// unit direction from the shading point toward the light
    pub direction: Vec3,
    pub distance: f32,
    pub position: Vec3,
    pub normal: Vec3,
    pub radiance: Vec3,
    pub radiance_over_pdf: Vec3,
    /// solid angle density, including the light selection probability once
    /// [`LightSample::apply_selection`] ran
    pub pdf: f32,
    pub is_valid: bool,
    pub light_type: LightType,
}
impl LightSample {
    pub fn invalid() -> Self {
        Self::default()
    }
    /// Fills `radiance_over_pdf` and the validity flag from `radiance`/`pdf`.
    pub fn finish(mut self) -> Self {
        if !(self.pdf > DENOMINATOR_EPSILON) || !self.pdf.is_finite() || !self.radiance.is_finite()
        {
            return Self::invalid();
        }
        self.radiance_over_pdf = self.radiance / self.pdf;
        self.is_valid = true;
        self
    }
    /// Folds in the discrete probability of having picked this light.
    pub fn apply_selection(mut self, selection_pdf: f32) -> Self {
        if !self.is_valid || !(self.pdf > 0.0) || !(selection_pdf > 0.0) {
            return Self::invalid();
        }
        self.pdf *= selection_pdf;
        self.radiance_over_pdf /= selection_pdf;
        self
    }
}

/// Uniform pick among `count` lights.
pub fn select_light(count: usize, u: f32) -> Option<(usize, f32)> {
    if count == 0 {
        return None;
    }
    let idx = ((u * count as f32).floor() as usize).min(count - 1);
    Some((idx, 1.0 / count as f32))
}

/// Emissive triangle mesh sampled by area.
pub struct MeshLight {
    pub instance_id: u32,
    pub material_id: u32,
    pub area_distribution: Distribution1D,
    /// maps cdf entries to mesh triangles, skipping degenerate ones
    pub triangle_indices: Vec<u32>,
    pub total_area: f32,
}

impl MeshLight {
    pub fn new(scene_instance: u32, material_id: u32, shape: &Shape) -> Option<Self> {
        let Shape::Mesh(mesh) = shape else {
            return None;
        };
        let mut areas = vec![];
        let mut triangle_indices = vec![];
        for i in 0..mesh.indices.len() {
            let area = mesh.triangle_area(i);
            if area > 0.0 && area.is_finite() {
                areas.push(area);
                triangle_indices.push(i as u32);
            }
        }
        let area_distribution = Distribution1D::new(&areas)?;
        Some(Self {
            instance_id: scene_instance,
            material_id,
            total_area: area_distribution.int_f,
            area_distribution,
            triangle_indices,
        })
    }

    pub fn sample(
        &self,
        scene: &Scene,
        p: Vec3,
        u: Vec3,
        sampler: &mut dyn Sampler,
    ) -> LightSample {
        let Some(instance) = scene.instances.get(self.instance_id as usize) else {
            return LightSample::invalid();
        };
        let Shape::Mesh(mesh) = &instance.shape else {
            return LightSample::invalid();
        };
        let (i, _) = self.area_distribution.sample_discrete(u.z);
        let triangle = self.triangle_indices[i];
        let bary = uniform_triangle(vec2(u.x, u.y));
        let mut props = mesh.surface(triangle, bary);
        let to_light = props.position - p;
        let distance = to_light.length();
        if distance < DENOMINATOR_EPSILON {
            return LightSample::invalid();
        }
        let direction = to_light / distance;
        let wo = -direction;
        props.instance_id = self.instance_id;
        props.material_id = self.material_id;
        props.flags = scene.hit_flags(self.material_id, wo.dot(props.true_normal) > 0.0);
        let request = MaterialRequest::new(&props, wo, EvalOutputs::EDF | EvalOutputs::OPACITY);
        let eval = scene.materials.evaluate(self.material_id, &request, sampler);
        if !eval.edf.is_valid || eval.opacity <= 0.0 {
            return LightSample::invalid();
        }
        let pdf = distance * distance / (self.total_area * eval.edf.cos);
        let factor = eval.opacity * eval.edf.area_factor(self.total_area);
        LightSample {
            direction,
            distance,
            position: props.position,
            normal: props.normal,
            radiance: eval.edf.intensity * eval.edf.edf * factor,
            pdf,
            light_type: LightType::Mesh,
            ..Default::default()
        }
        .finish()
    }
}

/// Lat-long environment map importance sampled through an alias table over
/// texels weighted by luminance times solid angle.
pub struct EnvironmentLight {
    pub width: usize,
    pub height: usize,
    pub texels: Vec<Vec3>,
    pub scale: f32,
    alias: AliasTable,
    /// solid angle density of each texel
    pdf: Vec<f32>,
    transform: Mat3,
    inv_transform: Mat3,
}

impl EnvironmentLight {
    pub fn new(width: usize, height: usize, texels: Vec<Vec3>, transform: Mat3) -> Result<Self> {
        if width == 0 || height == 0 || texels.len() != width * height {
            return Err(Error::Scene(format!(
                "environment map of {}x{} has {} texels",
                width,
                height,
                texels.len()
            )));
        }
        let solid_angles: Vec<f32> = (0..width * height)
            .map(|i| Self::texel_solid_angle(i / width, width, height))
            .collect();
        let weights: Vec<f32> = texels
            .iter()
            .zip(&solid_angles)
            .map(|(t, sa)| luminance(*t).max(0.0) * sa)
            .collect();
        let total: f32 = weights.iter().sum();
        let (alias, pdf) = if total > 0.0 && total.is_finite() {
            let pdf = texels.iter().map(|t| luminance(*t).max(0.0) / total).collect();
            (AliasTable::new(&weights), pdf)
        } else {
            (AliasTable::new(&solid_angles), vec![1.0 / (4.0 * PI); texels.len()])
        };
        let alias =
            alias.ok_or_else(|| Error::Scene("cannot build environment distribution".into()))?;
        Ok(Self {
            width,
            height,
            texels,
            scale: 1.0,
            alias,
            pdf,
            transform,
            inv_transform: transform.inverse(),
        })
    }
    pub fn constant(color: Vec3) -> Result<Self> {
        Self::new(1, 1, vec![color], Mat3::IDENTITY)
    }
    /// Vertical gradient with an optional sun disk, for demo scenes.
    pub fn sky(
        width: usize,
        height: usize,
        zenith: Vec3,
        horizon: Vec3,
        sun: Option<(Vec3, Vec3)>,
    ) -> Result<Self> {
        let mut texels = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                let d = Self::texel_direction(x, y, width, height, vec2(0.5, 0.5));
                // local -z is the pole
                let up = (-d.z).max(0.0);
                let mut c = lerp(horizon, zenith, up);
                if let Some((sun_dir, sun_radiance)) = sun {
                    if d.dot(sun_dir.normalize()) > 0.995 {
                        c += sun_radiance;
                    }
                }
                texels.push(c);
            }
        }
        Self::new(width, height, texels, Mat3::IDENTITY)
    }
    fn texel_solid_angle(row: usize, width: usize, height: usize) -> f32 {
        let theta0 = row as f32 / height as f32 * PI;
        let theta1 = (row + 1) as f32 / height as f32 * PI;
        2.0 * PI / width as f32 * (theta0.cos() - theta1.cos())
    }
    fn texel_direction(x: usize, y: usize, width: usize, height: usize, jitter: Vec2) -> Vec3 {
        let u = (x as f32 + jitter.x) / width as f32;
        let phi = u * 2.0 * PI - PI;
        let cos0 = (y as f32 / height as f32 * PI).cos();
        let cos1 = ((y + 1) as f32 / height as f32 * PI).cos();
        let cos_theta = lerp(cos0, cos1, jitter.y);
        let sin_theta = (1.0 - cos_theta * cos_theta).max(0.0).sqrt();
        vec3(phi.cos() * sin_theta, phi.sin() * sin_theta, -cos_theta)
    }
    fn texel_index(&self, local: Vec3) -> usize {
        let theta = (-local.z).clamp(-1.0, 1.0).acos();
        let v = theta / PI;
        let phi = local.y.atan2(local.x);
        let u = (phi + PI) / (2.0 * PI);
        let x = ((u * self.width as f32) as usize).min(self.width - 1);
        let y = ((v * self.height as f32) as usize).min(self.height - 1);
        x + y * self.width
    }
    /// Radiance arriving from world direction `dir` and its sampling density.
    pub fn evaluate(&self, dir: Vec3) -> (Vec3, f32) {
        let local = (self.inv_transform * dir).normalize();
        let idx = self.texel_index(local);
        (self.texels[idx] * self.scale, self.pdf[idx])
    }
    pub fn sample(&self, p: Vec3, u: Vec3, max_distance: f32) -> LightSample {
        let s = self.alias.sample(vec2(u.x, u.y));
        let x = s.index % self.width;
        let y = s.index / self.width;
        let local = Self::texel_direction(x, y, self.width, self.height, vec2(s.remapped, u.z));
        let direction = (self.transform * local).normalize();
        LightSample {
            direction,
            distance: max_distance,
            position: p + direction * max_distance,
            normal: -direction,
            radiance: self.texels[s.index] * self.scale,
            pdf: self.pdf[s.index],
            light_type: LightType::Environment,
            ..Default::default()
        }
        .finish()
    }
}

pub enum Light {
    Mesh(MeshLight),
    Environment(EnvironmentLight),
}
#[cfg(test)]
mod test {
    use super::*;
    use rand::{thread_rng, Rng};
    use statrs::assert_almost_eq;

    #[test]
    fn selection_formula() {
        let sample = LightSample {
            radiance: Vec3::splat(2.0),
            pdf: 0.5,
            ..Default::default()
        }
        .finish();
        assert!(sample.is_valid);
        assert_eq!(sample.radiance_over_pdf, Vec3::splat(4.0));
        let (idx, selection_pdf) = select_light(4, 0.6).unwrap();
        assert_eq!(idx, 2);
        let sample = sample.apply_selection(selection_pdf);
        // pdf_total = pdf_light / n, radiance_over_pdf = radiance / pdf_total
        assert_eq!(sample.pdf, 0.125);
        assert_eq!(sample.radiance_over_pdf, Vec3::splat(16.0));
        assert!((sample.radiance_over_pdf - sample.radiance / sample.pdf).length() < 1e-5);
    }
    #[test]
    fn selection_edges() {
        assert!(select_light(0, 0.3).is_none());
        assert_eq!(select_light(3, 0.9999999).unwrap().0, 2);
        assert_eq!(select_light(3, 1.0).unwrap().0, 2);
        assert_eq!(select_light(3, 0.0).unwrap().0, 0);
    }
    #[test]
    fn degenerate_samples_are_invalid() {
        for pdf in [0.0, -1.0, f32::NAN, f32::INFINITY, 1e-9] {
            let s = LightSample {
                radiance: Vec3::ONE,
                pdf,
                ..Default::default()
            }
            .finish();
            assert!(!s.is_valid);
            assert_eq!(s.pdf, 0.0);
        }
        let s = LightSample::invalid().apply_selection(0.5);
        assert!(!s.is_valid);
        assert_eq!(s.pdf, 0.0);
    }
    #[test]
    fn environment_sample_pdf_matches_lookup() {
        let env = EnvironmentLight::sky(
            32,
            16,
            vec3(0.2, 0.3, 1.0),
            vec3(1.0, 1.0, 1.0),
            Some((vec3(0.3, 0.2, -1.0), Vec3::splat(50.0))),
        )
        .unwrap();
        let mut rng = thread_rng();
        for _ in 0..1000 {
            let u = vec3(rng.gen(), rng.gen(), rng.gen());
            let s = env.sample(Vec3::ZERO, u, 1e4);
            assert!(s.is_valid);
            assert!(s.pdf > 0.0);
            let expected = s.radiance / s.pdf;
            assert!((s.radiance_over_pdf - expected).length() < 1e-3 * expected.length().max(1.0));
            let (radiance, pdf) = env.evaluate(s.direction);
            assert!((radiance - s.radiance).length() < 1e-4);
            assert_almost_eq!(pdf as f64, s.pdf as f64, 1e-5);
        }
    }
    #[test]
    fn environment_pdf_integrates_to_one() {
        let env = EnvironmentLight::sky(16, 8, Vec3::ONE, Vec3::splat(0.1), None).unwrap();
        let mut rng = thread_rng();
        let n = 200000;
        let mut sum = 0.0f64;
        for _ in 0..n {
            let d = uniform_sphere(vec2(rng.gen(), rng.gen()));
            sum += (env.evaluate(d).1 / uniform_sphere_pdf()) as f64;
        }
        assert_almost_eq!(sum / n as f64, 1.0, 0.02);
    }
    #[test]
    fn constant_environment_is_uniform() {
        let env = EnvironmentLight::constant(Vec3::splat(2.0)).unwrap();
        let (l, pdf) = env.evaluate(Vec3::X);
        assert_eq!(l, Vec3::splat(2.0));
        assert_almost_eq!(pdf as f64, uniform_sphere_pdf() as f64, 1e-6);
    }
}
