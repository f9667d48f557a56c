use crate::*;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Scattering event type. The empty set means the path was absorbed.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct BsdfEvent: u32 {
        const DIFFUSE = 1;
        const GLOSSY = 1 << 1;
        const SPECULAR = 1 << 2;
        const REFLECTION = 1 << 3;
        const TRANSMISSION = 1 << 4;
        const DIFFUSE_REFLECTION = Self::DIFFUSE.bits() | Self::REFLECTION.bits();
        const DIFFUSE_TRANSMISSION = Self::DIFFUSE.bits() | Self::TRANSMISSION.bits();
        const GLOSSY_REFLECTION = Self::GLOSSY.bits() | Self::REFLECTION.bits();
        const GLOSSY_TRANSMISSION = Self::GLOSSY.bits() | Self::TRANSMISSION.bits();
        const SPECULAR_REFLECTION = Self::SPECULAR.bits() | Self::REFLECTION.bits();
        const SPECULAR_TRANSMISSION = Self::SPECULAR.bits() | Self::TRANSMISSION.bits();
    }
}
impl BsdfEvent {
    pub const ABSORB: Self = Self::empty();
    pub fn is_absorb(&self) -> bool {
        self.is_empty()
    }
    pub fn is_specular(&self) -> bool {
        self.contains(Self::SPECULAR)
    }
    pub fn is_transmission(&self) -> bool {
        self.contains(Self::TRANSMISSION)
    }
    pub fn is_diffuse_or_glossy(&self) -> bool {
        self.intersects(Self::DIFFUSE | Self::GLOSSY)
    }
}

bitflags! {
    /// Outputs a caller asks the material to compute.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct EvalOutputs: u16 {
        const BSDF_SAMPLE = 1;
        const BSDF_EVALUATION = 1 << 1;
        const NEURAL_EVALUATION = 1 << 2;
        const EDF = 1 << 3;
        const OPACITY = 1 << 4;
        const AUXILIARY = 1 << 5;
        const IOR = 1 << 6;
    }
}

#[derive(Clone, Copy, Debug)]
pub struct MaterialRequest<'a> {
    pub hit: &'a HitProperties,
    pub outputs: EvalOutputs,
    /// direction toward the previous path vertex
    pub wo: Vec3,
    /// index of refraction of the medium the path is travelling in
    pub ior: Vec3,
    pub light_direction: Vec3,
    pub neural_direction: Vec3,
}
impl<'a> MaterialRequest<'a> {
    pub fn new(hit: &'a HitProperties, wo: Vec3, outputs: EvalOutputs) -> Self {
        Self {
            hit,
            outputs,
            wo,
            ior: Vec3::ONE,
            light_direction: Vec3::ZERO,
            neural_direction: Vec3::ZERO,
        }
    }
}

/// BSDF values include the cosine foreshortening term.
#[derive(Clone, Copy, Debug, Default)]
pub struct BsdfSample {
    pub wi: Vec3,
    pub bsdf: Vec3,
    /// density of the material's own sampler
    pub bsdf_pdf: f32,
    /// density actually used for the estimate; differs from `bsdf_pdf`
    /// once mixed with neural sampling
    pub pdf: f32,
    pub bsdf_over_pdf: Vec3,
    pub event: BsdfEvent,
    pub is_valid: bool,
}
impl BsdfSample {
    pub fn absorbed() -> Self {
        Self::default()
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct BsdfEvaluation {
    pub bsdf: Vec3,
    pub bsdf_pdf: f32,
    pub pdf: f32,
    /// lobe that scatters toward the evaluated direction; `ABSORB` if none
    pub event: BsdfEvent,
    pub is_valid: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EmissionMode {
    /// intensity is radiant exitance
    #[default]
    Exitance,
    /// intensity is total power, spread over the emitter's area
    Power,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct EdfEvaluation {
    pub edf: Vec3,
    pub intensity: Vec3,
    pub mode: EmissionMode,
    pub cos: f32,
    pub pdf: f32,
    pub is_valid: bool,
}
impl EdfEvaluation {
    pub fn area_factor(&self, area: f32) -> f32 {
        match self.mode {
            EmissionMode::Exitance => 1.0,
            EmissionMode::Power => 1.0 / area,
        }
    }
    /// Emitted radiance of a surface with total emitting `area`.
    pub fn radiance(&self, area: f32) -> Vec3 {
        self.intensity * self.edf * self.area_factor(area)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Auxiliary {
    pub albedo: Vec3,
    pub normal: Vec3,
}

#[derive(Clone, Copy, Debug)]
pub struct MaterialEvaluation {
    pub bsdf_sample: BsdfSample,
    pub bsdf_evaluation: BsdfEvaluation,
    pub neural_evaluation: BsdfEvaluation,
    pub edf: EdfEvaluation,
    pub opacity: f32,
    pub aux: Auxiliary,
    pub ior: Vec3,
    pub is_thin_walled: bool,
}
impl Default for MaterialEvaluation {
    fn default() -> Self {
        Self {
            bsdf_sample: BsdfSample::absorbed(),
            bsdf_evaluation: BsdfEvaluation::default(),
            neural_evaluation: BsdfEvaluation::default(),
            edf: EdfEvaluation::default(),
            opacity: 1.0,
            aux: Auxiliary::default(),
            ior: Vec3::ONE,
            is_thin_walled: false,
        }
    }
}

/// Capability interface of a material variant. Implementors supply the
/// individual lobes; `evaluate` assembles whatever the request selects and
/// must be deterministic for equal inputs and sampler state.
pub trait MaterialEvaluator: Send + Sync {
    fn name(&self) -> &'static str;
    fn sample_bsdf(&self, request: &MaterialRequest<'_>, u: Vec3) -> BsdfSample;
    fn eval_bsdf(&self, request: &MaterialRequest<'_>, wi: Vec3) -> BsdfEvaluation;
    fn albedo(&self) -> Vec3;
    fn edf(&self, _request: &MaterialRequest<'_>) -> EdfEvaluation {
        EdfEvaluation::default()
    }
    fn opacity(&self) -> f32 {
        1.0
    }
    fn ior(&self) -> Vec3 {
        Vec3::ONE
    }
    fn is_thin_walled(&self) -> bool {
        false
    }
    fn has_emission(&self) -> bool {
        false
    }
    fn has_opacity(&self) -> bool {
        self.opacity() < 1.0
    }

    fn evaluate(
        &self,
        request: &MaterialRequest<'_>,
        sampler: &mut dyn Sampler,
    ) -> MaterialEvaluation {
        let mut eval = MaterialEvaluation {
            is_thin_walled: self.is_thin_walled(),
            ..Default::default()
        };
        let outputs = request.outputs;
        if outputs.contains(EvalOutputs::OPACITY) {
            eval.opacity = self.opacity();
        }
        if outputs.contains(EvalOutputs::IOR) {
            eval.ior = self.ior();
        }
        if outputs.contains(EvalOutputs::EDF) && self.has_emission() {
            eval.edf = self.edf(request);
        }
        if outputs.contains(EvalOutputs::AUXILIARY) {
            eval.aux = Auxiliary {
                albedo: self.albedo(),
                normal: request.hit.normal,
            };
        }
        if outputs.contains(EvalOutputs::BSDF_EVALUATION) {
            eval.bsdf_evaluation = self.eval_bsdf(request, request.light_direction);
        }
        if outputs.contains(EvalOutputs::NEURAL_EVALUATION) {
            eval.neural_evaluation = self.eval_bsdf(request, request.neural_direction);
        }
        if outputs.contains(EvalOutputs::BSDF_SAMPLE) {
            eval.bsdf_sample = self.sample_bsdf(request, sampler.next3d());
        }
        eval
    }
}

fn same_geometric_side(hit: &HitProperties, wo: Vec3, wi: Vec3) -> bool {
    wo.dot(hit.true_normal) * wi.dot(hit.true_normal) > 0.0
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Emission {
    pub intensity: Vec3,
    #[serde(default)]
    pub mode: EmissionMode,
}

/// Lambertian reflector, optionally a Lambertian emitter on its front side.
#[derive(Clone, Debug)]
pub struct DiffuseMaterial {
    pub albedo: Vec3,
    pub emission: Option<Emission>,
    pub opacity: f32,
}
impl MaterialEvaluator for DiffuseMaterial {
    fn name(&self) -> &'static str {
        "diffuse"
    }
    fn sample_bsdf(&self, request: &MaterialRequest<'_>, u: Vec3) -> BsdfSample {
        let n = request.hit.facing_normal(request.wo);
        let frame = Frame::from_normal(n);
        let local = cosine_hemisphere(vec2(u.x, u.y));
        let wi = frame.to_world(local).normalize();
        let cos = Frame::cos_theta(local);
        let pdf = cosine_hemisphere_pdf(cos);
        if pdf <= DENOMINATOR_EPSILON || !same_geometric_side(request.hit, request.wo, wi) {
            return BsdfSample::absorbed();
        }
        let bsdf = self.albedo * FRAC_1_PI * cos;
        BsdfSample {
            wi,
            bsdf,
            bsdf_pdf: pdf,
            pdf,
            bsdf_over_pdf: bsdf / pdf,
            event: BsdfEvent::DIFFUSE_REFLECTION,
            is_valid: true,
        }
    }
    fn eval_bsdf(&self, request: &MaterialRequest<'_>, wi: Vec3) -> BsdfEvaluation {
        let n = request.hit.facing_normal(request.wo);
        let cos = wi.dot(n);
        if cos <= 0.0 || !same_geometric_side(request.hit, request.wo, wi) {
            return BsdfEvaluation {
                is_valid: true,
                ..Default::default()
            };
        }
        let pdf = cosine_hemisphere_pdf(cos);
        BsdfEvaluation {
            bsdf: self.albedo * FRAC_1_PI * cos,
            bsdf_pdf: pdf,
            pdf,
            event: BsdfEvent::DIFFUSE_REFLECTION,
            is_valid: true,
        }
    }
    fn albedo(&self) -> Vec3 {
        self.albedo
    }
    fn edf(&self, request: &MaterialRequest<'_>) -> EdfEvaluation {
        let Some(emission) = self.emission else {
            return EdfEvaluation::default();
        };
        let cos = request.wo.dot(request.hit.normal);
        if !request.hit.is_front_face() || cos <= 0.0 {
            return EdfEvaluation::default();
        }
        EdfEvaluation {
            edf: Vec3::splat(FRAC_1_PI),
            intensity: emission.intensity,
            mode: emission.mode,
            cos,
            pdf: cos * FRAC_1_PI,
            is_valid: true,
        }
    }
    fn opacity(&self) -> f32 {
        self.opacity
    }
    fn has_emission(&self) -> bool {
        self.emission.is_some()
    }
}

#[derive(Clone, Debug)]
pub struct MirrorMaterial {
    pub reflectance: Vec3,
}
impl MaterialEvaluator for MirrorMaterial {
    fn name(&self) -> &'static str {
        "mirror"
    }
    fn sample_bsdf(&self, request: &MaterialRequest<'_>, _u: Vec3) -> BsdfSample {
        let n = request.hit.facing_normal(request.wo);
        let wi = reflect(request.wo, n).normalize();
        if !same_geometric_side(request.hit, request.wo, wi) {
            return BsdfSample::absorbed();
        }
        BsdfSample {
            wi,
            bsdf: self.reflectance,
            bsdf_pdf: 1.0,
            pdf: 1.0,
            bsdf_over_pdf: self.reflectance,
            event: BsdfEvent::SPECULAR_REFLECTION,
            is_valid: true,
        }
    }
    fn eval_bsdf(&self, _request: &MaterialRequest<'_>, _wi: Vec3) -> BsdfEvaluation {
        BsdfEvaluation {
            is_valid: true,
            ..Default::default()
        }
    }
    fn albedo(&self) -> Vec3 {
        self.reflectance
    }
}

/// Smooth dielectric interface with Fresnel-weighted lobe selection.
#[derive(Clone, Debug)]
pub struct DielectricMaterial {
    pub ior: f32,
    pub tint: Vec3,
    pub thin_walled: bool,
}
impl MaterialEvaluator for DielectricMaterial {
    fn name(&self) -> &'static str {
        "dielectric"
    }
    fn sample_bsdf(&self, request: &MaterialRequest<'_>, u: Vec3) -> BsdfSample {
        let hit = request.hit;
        let wo = request.wo;
        let n = hit.facing_normal(wo);
        let entering = wo.dot(hit.true_normal) > 0.0;
        let (eta_i, eta_t) = if self.thin_walled || entering {
            (request.ior.x.max(1e-3), self.ior)
        } else {
            (self.ior, 1.0)
        };
        let f = fresnel_dielectric(wo.dot(n), eta_i, eta_t);
        let reflected = BsdfSample {
            wi: reflect(wo, n).normalize(),
            bsdf: Vec3::splat(f),
            bsdf_pdf: f,
            pdf: f,
            bsdf_over_pdf: Vec3::ONE,
            event: BsdfEvent::SPECULAR_REFLECTION,
            is_valid: true,
        };
        if u.x < f {
            return reflected;
        }
        let wi = if self.thin_walled {
            Some(-wo)
        } else {
            refract(wo, n, eta_i / eta_t)
        };
        match wi {
            Some(wi) => {
                let t = 1.0 - f;
                BsdfSample {
                    wi: wi.normalize(),
                    bsdf: self.tint * t,
                    bsdf_pdf: t,
                    pdf: t,
                    bsdf_over_pdf: self.tint,
                    event: BsdfEvent::SPECULAR_TRANSMISSION,
                    is_valid: true,
                }
            }
            None => reflected,
        }
    }
    fn eval_bsdf(&self, _request: &MaterialRequest<'_>, _wi: Vec3) -> BsdfEvaluation {
        BsdfEvaluation {
            is_valid: true,
            ..Default::default()
        }
    }
    fn albedo(&self) -> Vec3 {
        self.tint
    }
    fn ior(&self) -> Vec3 {
        Vec3::splat(self.ior)
    }
    fn is_thin_walled(&self) -> bool {
        self.thin_walled
    }
}

/// Serializable description of a material variant.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MaterialDesc {
    #[serde(rename = "diffuse")]
    Diffuse {
        albedo: [f32; 3],
        #[serde(default)]
        emission: Option<Emission>,
        #[serde(default = "default_opacity")]
        opacity: f32,
    },
    #[serde(rename = "mirror")]
    Mirror { reflectance: [f32; 3] },
    #[serde(rename = "dielectric")]
    Dielectric {
        ior: f32,
        #[serde(default = "default_tint")]
        tint: [f32; 3],
        #[serde(default)]
        thin_walled: bool,
    },
}
fn default_opacity() -> f32 {
    1.0
}
fn default_tint() -> [f32; 3] {
    [1.0; 3]
}
impl MaterialDesc {
    pub fn diffuse(albedo: Vec3) -> Self {
        Self::Diffuse {
            albedo: albedo.into(),
            emission: None,
            opacity: 1.0,
        }
    }
    pub fn emitter(albedo: Vec3, intensity: Vec3) -> Self {
        Self::Diffuse {
            albedo: albedo.into(),
            emission: Some(Emission {
                intensity,
                mode: EmissionMode::Exitance,
            }),
            opacity: 1.0,
        }
    }
    fn build(&self) -> Box<dyn MaterialEvaluator> {
        match self {
            MaterialDesc::Diffuse {
                albedo,
                emission,
                opacity,
            } => Box::new(DiffuseMaterial {
                albedo: Vec3::from(*albedo),
                emission: *emission,
                opacity: opacity.clamp(0.0, 1.0),
            }),
            MaterialDesc::Mirror { reflectance } => Box::new(MirrorMaterial {
                reflectance: Vec3::from(*reflectance),
            }),
            MaterialDesc::Dielectric {
                ior,
                tint,
                thin_walled,
            } => Box::new(DielectricMaterial {
                ior: *ior,
                tint: Vec3::from(*tint),
                thin_walled: *thin_walled,
            }),
        }
    }
}

/// Index to implementation table, built once when the scene is compiled.
#[derive(Default)]
pub struct MaterialTable {
    materials: Vec<Box<dyn MaterialEvaluator>>,
}
impl MaterialTable {
    pub fn new(descs: &[MaterialDesc]) -> Self {
        Self {
            materials: descs.iter().map(|d| d.build()).collect(),
        }
    }
    pub fn push(&mut self, material: Box<dyn MaterialEvaluator>) -> u32 {
        self.materials.push(material);
        (self.materials.len() - 1) as u32
    }
    pub fn len(&self) -> usize {
        self.materials.len()
    }
    pub fn is_empty(&self) -> bool {
        self.materials.is_empty()
    }
    pub fn get(&self, id: u32) -> Option<&dyn MaterialEvaluator> {
        self.materials.get(id as usize).map(|m| m.as_ref())
    }
    /// Evaluates material `id`; an unknown id absorbs.
    pub fn evaluate(
        &self,
        id: u32,
        request: &MaterialRequest<'_>,
        sampler: &mut dyn Sampler,
    ) -> MaterialEvaluation {
        match self.get(id) {
            Some(m) => m.evaluate(request, sampler),
            None => MaterialEvaluation::default(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use statrs::assert_almost_eq;

    fn flat_hit() -> HitProperties {
        HitProperties {
            position: Vec3::ZERO,
            true_normal: Vec3::Y,
            normal: Vec3::Y,
            frame: Frame::from_normal(Vec3::Y),
            flags: HitFlags::HAS_MATERIAL | HitFlags::IS_FRONT_FACE,
            ..Default::default()
        }
    }

    #[test]
    fn diffuse_sample_matches_evaluation() {
        let hit = flat_hit();
        let table = MaterialTable::new(&[MaterialDesc::diffuse(Vec3::splat(0.5))]);
        let mut rng = PathRng::new(7);
        for _ in 0..64 {
            let mut request = MaterialRequest::new(
                &hit,
                vec3(0.3, 1.0, 0.1).normalize(),
                EvalOutputs::BSDF_SAMPLE,
            );
            let eval = table.evaluate(0, &request, &mut rng);
            let s = eval.bsdf_sample;
            assert!(s.is_valid);
            assert_eq!(s.event, BsdfEvent::DIFFUSE_REFLECTION);
            assert!((s.bsdf_over_pdf - Vec3::splat(0.5)).length() < 1e-4);
            request.outputs = EvalOutputs::BSDF_EVALUATION;
            request.light_direction = s.wi;
            let e = table.evaluate(0, &request, &mut rng).bsdf_evaluation;
            assert_almost_eq!(e.pdf as f64, s.pdf as f64, 1e-4);
            assert!((e.bsdf - s.bsdf).length() < 1e-4);
        }
    }
    #[test]
    fn diffuse_below_horizon_is_black() {
        let hit = flat_hit();
        let m = DiffuseMaterial {
            albedo: Vec3::ONE,
            emission: None,
            opacity: 1.0,
        };
        let request = MaterialRequest::new(&hit, Vec3::Y, EvalOutputs::BSDF_EVALUATION);
        let e = m.eval_bsdf(&request, -Vec3::Y);
        assert_eq!(e.pdf, 0.0);
        assert_eq!(e.bsdf, Vec3::ZERO);
    }
    #[test]
    fn emitter_is_one_sided() {
        let mut hit = flat_hit();
        let m = DiffuseMaterial {
            albedo: Vec3::ZERO,
            emission: Some(Emission {
                intensity: Vec3::splat(PI),
                mode: EmissionMode::Exitance,
            }),
            opacity: 1.0,
        };
        let request = MaterialRequest::new(&hit, Vec3::Y, EvalOutputs::EDF);
        let edf = m.edf(&request);
        assert!(edf.is_valid);
        assert!((edf.radiance(2.0) - Vec3::ONE).length() < 1e-5);
        hit.flags.remove(HitFlags::IS_FRONT_FACE);
        let request = MaterialRequest::new(&hit, -Vec3::Y, EvalOutputs::EDF);
        assert!(!m.edf(&request).is_valid);
    }
    #[test]
    fn power_mode_divides_by_area() {
        let edf = EdfEvaluation {
            edf: Vec3::ONE,
            intensity: Vec3::splat(4.0),
            mode: EmissionMode::Power,
            cos: 1.0,
            pdf: 1.0,
            is_valid: true,
        };
        assert_eq!(edf.radiance(2.0), Vec3::splat(2.0));
    }
    #[test]
    fn unknown_material_absorbs() {
        let hit = flat_hit();
        let table = MaterialTable::default();
        let request = MaterialRequest::new(&hit, Vec3::Y, EvalOutputs::BSDF_SAMPLE);
        let eval = table.evaluate(3, &request, &mut PathRng::new(1));
        assert!(eval.bsdf_sample.event.is_absorb());
        assert!(!eval.bsdf_sample.is_valid);
    }
    #[test]
    fn dielectric_conserves_energy_in_expectation() {
        let hit = flat_hit();
        let m = DielectricMaterial {
            ior: 1.5,
            tint: Vec3::ONE,
            thin_walled: false,
        };
        let request = MaterialRequest::new(
            &hit,
            vec3(0.4, 1.0, 0.0).normalize(),
            EvalOutputs::BSDF_SAMPLE,
        );
        let mut rng = PathRng::new(3);
        let mut transmitted = 0;
        for _ in 0..1000 {
            let s = m.sample_bsdf(&request, rng.next3d());
            assert!(s.event.is_specular());
            assert!((s.bsdf_over_pdf - Vec3::ONE).length() < 1e-5);
            if s.event.is_transmission() {
                transmitted += 1;
                assert!(s.wi.y < 0.0);
            } else {
                assert!(s.wi.y > 0.0);
            }
        }
        assert!(transmitted > 800);
    }
}
