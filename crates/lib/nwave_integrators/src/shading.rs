//! Per-lane light transport shared by every stage and both step strategies.
use nwave_core::film::FrameBuffer;
use nwave_core::light::LightSample;
use nwave_core::material::{BsdfSample, EvalOutputs, MaterialRequest};
use nwave_core::neural::{NeuralOracle, NeuralSample, SurfaceState};
use nwave_core::scene::{Intersector, Scene};
use nwave_core::*;

use crate::debug::{DebugBounceData, DebugBuffer};
use crate::mixture::*;
use crate::queue::{push_or_report, WorkQueue};
use crate::recorder::{PathRecorder, RecordedBsdfSample, RecordedLightSample};
use crate::settings::{RenderSettings, RendererSettings, SamplingTechnique};
use crate::work_items::*;

pub enum TraceResult {
    Hit(RayWorkItem),
    Miss(EscapedWorkItem),
}

/// Queues the shading stage writes into.
pub struct ShadeSinks<'a> {
    pub trace: &'a WorkQueue<TraceWorkItem>,
    pub shadow: &'a WorkQueue<ShadowWorkItem>,
    pub accumulation: &'a WorkQueue<AccumulationWorkItem>,
}

/// Returns the continuation probability when the path survives.
pub fn russian_roulette(
    throughput: Vec3,
    depth: u32,
    settings: &RendererSettings,
    u: f32,
) -> Option<f32> {
    if !settings.use_russian_roulette || depth < settings.rr_min_depth {
        return Some(1.0);
    }
    let mut q = throughput.max_element();
    if settings.clamp_continuation_probability {
        q = q.clamp(0.0, 1.0);
    }
    if !(q > 0.0) || q < u {
        None
    } else {
        Some(q)
    }
}

#[derive(Clone, Copy)]
pub struct PathKernel<'a> {
    pub scene: &'a Scene,
    pub settings: &'a RenderSettings,
    pub film: &'a FrameBuffer,
    pub iteration: u32,
    pub frame_id: u32,
    pub oracle: Option<&'a dyn NeuralOracle>,
    pub recorder: Option<&'a PathRecorder>,
    pub debug: Option<&'a DebugBuffer>,
}

impl<'a> PathKernel<'a> {
    pub fn new(
        scene: &'a Scene,
        settings: &'a RenderSettings,
        film: &'a FrameBuffer,
        iteration: u32,
        frame_id: u32,
    ) -> Self {
        Self {
            scene,
            settings,
            film,
            iteration,
            frame_id,
            oracle: None,
            recorder: None,
            debug: None,
        }
    }
    pub fn with_oracle(self, oracle: Option<&'a dyn NeuralOracle>) -> Self {
        Self { oracle, ..self }
    }
    pub fn with_recorder(self, recorder: Option<&'a PathRecorder>) -> Self {
        Self { recorder, ..self }
    }
    pub fn with_debug(self, debug: Option<&'a DebugBuffer>) -> Self {
        Self { debug, ..self }
    }

    /// Whether shading at `pixel` may draw from the oracle this frame.
    pub fn neural_enabled(&self, pixel: u32) -> bool {
        self.oracle.is_some()
            && self
                .settings
                .neural_sampling_enabled(pixel, self.film.resolution(), self.iteration)
    }

    pub fn camera_ray(&self, pixel: u32, sample_index: u32) -> TraceWorkItem {
        let mut rng = PathRng::for_path(
            pixel,
            sample_index,
            self.settings.max_samples_per_launch(),
            self.iteration,
            self.frame_id,
        );
        let ray = self.scene.camera.generate_ray(pixel, &mut rng);
        self.film.add_sample(pixel);
        TraceWorkItem {
            origin: ray.o,
            direction: ray.d,
            pixel,
            sample_index,
            seed: rng.seed(),
            ..Default::default()
        }
    }

    pub fn trace(&self, item: &TraceWorkItem) -> TraceResult {
        let r = &self.settings.renderer;
        let ray = Ray {
            o: item.origin,
            d: item.direction,
            tmin: r.min_clamp,
            tmax: r.max_clamp,
        };
        let mut rng = PathRng::new(item.seed);
        match self.scene.trace(&ray, &mut rng) {
            Some(hit) => TraceResult::Hit(item.hit(&hit, rng.seed())),
            None => TraceResult::Miss(item.escaped(rng.seed())),
        }
    }

    /// Shades one surface hit: next-event estimation, emission, and the
    /// choice of the next direction. `query` is the shade queue index
    /// registered with the oracle, if neural sampling applies.
    pub fn shade(&self, prd: &RayWorkItem, query: Option<usize>) -> (TraceWorkItem, ShadowWorkItem) {
        let r = &self.settings.renderer;
        let hit = &prd.hit;
        let technique = self.settings.technique(prd.pixel, self.film.resolution());
        let mut rng = PathRng::new(prd.seed);
        let wo = -prd.direction;
        let throughput = prd.throughput;
        let mut radiance = prd.radiance;
        let oracle = query.zip(self.oracle);

        let light = if technique != SamplingTechnique::Bsdf {
            self.scene.sample_light(hit.position, &mut rng, r.max_clamp)
        } else {
            LightSample::invalid()
        };
        let shadow_seed = tea::<4>(rng.seed(), prd.depth);

        let mut fraction = 0.0;
        let mut neural: Option<NeuralSample> = None;
        if let Some((index, oracle)) = oracle {
            fraction = sanitize_sampling_fraction(oracle.sampling_fraction(index));
            if fraction > 0.0 && technique != SamplingTechnique::DirectLight && rng.next1d() <= fraction {
                let s = oracle.sample(index, &mut rng);
                if s.is_usable() {
                    neural = Some(NeuralSample {
                        direction: s.direction.normalize(),
                        pdf: s.pdf,
                    });
                } else {
                    fraction = 0.0;
                }
            }
        }

        let mut outputs = EvalOutputs::IOR;
        if prd.depth == 0 {
            outputs |= EvalOutputs::AUXILIARY;
        }
        if hit.has_emission() {
            outputs |= EvalOutputs::EDF;
        }
        if light.is_valid {
            outputs |= EvalOutputs::BSDF_EVALUATION;
        }
        if technique != SamplingTechnique::DirectLight {
            outputs |= EvalOutputs::BSDF_SAMPLE;
        }
        if neural.is_some() {
            outputs |= EvalOutputs::NEURAL_EVALUATION;
        }
        let mut request = MaterialRequest::new(hit, wo, outputs);
        request.ior = prd.medium_ior;
        request.light_direction = light.direction;
        if let Some(n) = neural {
            request.neural_direction = n.direction;
        }
        let mut eval = self.scene.materials.evaluate(hit.material_id, &request, &mut rng);

        let neural_pdf_at = |dir: Vec3| match oracle {
            Some((index, oracle)) if fraction > 0.0 => oracle.evaluate(index, dir),
            _ => 0.0,
        };
        if light.is_valid {
            correct_light_sample(&mut eval.bsdf_evaluation, fraction, neural_pdf_at(light.direction));
        }
        let sample = if technique != SamplingTechnique::DirectLight {
            correct_bsdf_sampling(&eval, neural, fraction, neural_pdf_at)
        } else {
            BsdfSample::absorbed()
        };

        // next-event estimation
        let mut shadow = ShadowWorkItem::invalid();
        let mut light_weight = 0.0;
        let mut light_contribution = Vec3::ZERO;
        if light.is_valid && eval.bsdf_evaluation.is_valid {
            light_weight = match technique {
                SamplingTechnique::Mis => r.mis_heuristic.weight(light.pdf, eval.bsdf_evaluation.pdf),
                _ => 1.0,
            };
            light_contribution = light_weight * eval.bsdf_evaluation.bsdf * light.radiance_over_pdf;
            shadow = ShadowWorkItem {
                origin: hit.spawn_point(light.direction),
                direction: light.direction,
                distance: light.distance - r.min_clamp,
                radiance: throughput * light_contribution,
                depth: prd.depth,
                pixel: prd.pixel,
                sample_index: prd.sample_index,
                seed: shadow_seed,
                medium_ior: prd.medium_ior,
            };
        }

        // emission picked up by the ray that arrived here; past the camera
        // vertex, direct lighting already counts it through the light sample
        let mut emission_weight = 1.0;
        let mut emission = Vec3::ZERO;
        if eval.edf.is_valid && (prd.depth == 0 || technique != SamplingTechnique::DirectLight) {
            let area = hit
                .light_id
                .and_then(|id| self.scene.light_area(id))
                .unwrap_or(1.0);
            if prd.depth > 0 && technique == SamplingTechnique::Mis && !prd.event.is_specular() {
                let d2 = prd.hit_distance * prd.hit_distance;
                let light_pdf = d2 / (area * eval.edf.cos * self.scene.num_lights() as f32);
                let light_pdf = if light_pdf.is_finite() && light_pdf > 0.0 {
                    light_pdf
                } else {
                    0.0
                };
                emission_weight = r.mis_heuristic.weight(prd.pdf, light_pdf);
            }
            emission = emission_weight * eval.edf.radiance(area);
            radiance += throughput * emission;
        }

        let mut next = TraceWorkItem {
            radiance,
            throughput,
            medium_ior: prd.medium_ior,
            depth: prd.depth + 1,
            pixel: prd.pixel,
            sample_index: prd.sample_index,
            extend_ray: false,
            ..Default::default()
        };
        let mut continuation_probability = 0.0;
        let continues = technique != SamplingTechnique::DirectLight
            && prd.depth + 1 < r.max_bounces
            && sample.is_valid
            && !sample.event.is_absorb();
        if continues {
            if let Some(q) = russian_roulette(throughput, prd.depth, r, rng.next1d()) {
                continuation_probability = q;
                next.extend_ray = true;
                next.origin = hit.spawn_point(sample.wi);
                next.direction = sample.wi;
                next.throughput = throughput * sample.bsdf_over_pdf / q;
                next.pdf = sample.pdf;
                next.event = sample.event;
                if sample.event.is_transmission() && !eval.is_thin_walled {
                    next.medium_ior = if hit.is_front_face() {
                        eval.ior
                    } else {
                        Vec3::ONE
                    };
                }
            }
        }
        next.seed = rng.seed();

        if prd.depth == 0 {
            self.film.add_albedo(prd.pixel, eval.aux.albedo);
            self.film.add_normal(prd.pixel, 0.5 * (eval.aux.normal + 1.0));
            self.film.add_true_normal(prd.pixel, 0.5 * (hit.true_normal + 1.0));
        }

        if let Some(recorder) = self.recorder {
            if let Some(mut bounce) = recorder.get_and_reset(prd.pixel, prd.depth, prd.sample_index) {
                bounce.state = Some(SurfaceState::from_hit(hit, wo));
                bounce.emission = emission;
                if next.extend_ray {
                    bounce.bsdf_sample = Some(RecordedBsdfSample {
                        wi: sample.wi,
                        bsdf_over_pdf: sample.bsdf_over_pdf / continuation_probability,
                        pdf: sample.pdf,
                        event: sample.event,
                    });
                }
                if shadow.is_traceable() {
                    bounce.light_sample = Some(RecordedLightSample {
                        wi: light.direction,
                        radiance: light.radiance,
                        pdf: light.pdf,
                        contribution: light_contribution,
                        valid: false,
                    });
                }
            }
        }
        if let Some(debug) = self.debug.filter(|d| d.is_traced(prd.pixel, prd.sample_index)) {
            debug.record(
                prd.depth,
                DebugBounceData {
                    position: hit.position,
                    throughput,
                    wi: sample.wi,
                    bsdf_pdf: sample.bsdf_pdf,
                    neural_pdf: neural.map(|n| n.pdf).unwrap_or(0.0),
                    mixture_pdf: sample.pdf,
                    light_pdf: light.pdf,
                    light_mis_weight: light_weight,
                    emission_mis_weight: emission_weight,
                    sampling_fraction: fraction,
                    continuation_probability,
                    radiance,
                    neural_sampled: neural.is_some(),
                },
            );
        }
        (next, shadow)
    }

    /// Routes the products of [`PathKernel::shade`] to their queues.
    pub fn next_work(&self, next: &TraceWorkItem, shadow: &ShadowWorkItem, sinks: &ShadeSinks<'_>) {
        if next.extend_ray {
            push_or_report(sinks.trace, *next);
        } else if let Some(acc) = Self::flush(next.radiance, next.pixel, next.depth) {
            push_or_report(sinks.accumulation, acc);
        }
        if shadow.is_traceable() {
            push_or_report(sinks.shadow, *shadow);
        }
    }

    /// Final radiance of a finished path, unless there is nothing to add.
    pub fn flush(radiance: Vec3, pixel: u32, depth: u32) -> Option<AccumulationWorkItem> {
        if radiance.is_finite() && !is_black(radiance) {
            Some(AccumulationWorkItem {
                radiance,
                pixel,
                depth,
            })
        } else {
            None
        }
    }

    /// Delivers the light sample's contribution when nothing blocks it.
    pub fn trace_shadow(&self, item: &ShadowWorkItem) -> Option<AccumulationWorkItem> {
        if !item.is_traceable() {
            return None;
        }
        let ray = Ray {
            o: item.origin,
            d: item.direction,
            tmin: self.settings.renderer.min_clamp,
            tmax: item.distance,
        };
        let mut rng = PathRng::new(item.seed);
        if self.scene.occluded(&ray, &mut rng) {
            return None;
        }
        if let Some(recorder) = self.recorder {
            recorder.validate_light_sample(item.pixel, item.depth, item.sample_index);
        }
        Some(AccumulationWorkItem {
            radiance: item.radiance,
            pixel: item.pixel,
            depth: item.depth,
        })
    }

    /// Finishes a path that left the scene.
    pub fn miss(&self, item: &EscapedWorkItem) -> Option<AccumulationWorkItem> {
        let r = &self.settings.renderer;
        if item.depth == 0 {
            self.film.mark_direct_miss(item.pixel);
        }
        let mut radiance = item.radiance;
        let mut escaped = Vec3::ZERO;
        let background_visible = item.depth > 0 || r.view_background;
        if let Some(env) = self.scene.environment().filter(|_| background_visible) {
            let (le, env_pdf) = env.evaluate(item.direction);
            let technique = self.settings.technique(item.pixel, self.film.resolution());
            let mut w = 1.0;
            if item.depth > 0
                && technique == SamplingTechnique::Mis
                && item.event.is_diffuse_or_glossy()
                && item.pdf > 0.0
            {
                let light_pdf = env_pdf / self.scene.num_lights().max(1) as f32;
                w = r.mis_heuristic.weight(item.pdf, light_pdf);
            }
            escaped = w * le;
            radiance += item.throughput * escaped;
            if item.depth == 0 {
                let max = le.max_element();
                let albedo = if max > 0.0 { le / max } else { Vec3::ZERO };
                self.film.add_albedo(item.pixel, albedo);
            }
        }
        if let Some(recorder) = self.recorder {
            if let Some(mut bounce) = recorder.get_and_reset(item.pixel, item.depth, item.sample_index) {
                bounce.emission = escaped;
            }
        }
        Self::flush(radiance, item.pixel, item.depth)
    }

    pub fn accumulate(&self, item: &AccumulationWorkItem) {
        self.film.add_radiance(item.pixel, item.radiance);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use nwave_core::camera::Camera;
    use nwave_core::light::EnvironmentLight;
    use nwave_core::material::{BsdfEvaluation, MaterialDesc, MaterialEvaluator, MaterialTable};
    use nwave_core::scene::{Shape, Sphere};
    use rand::{thread_rng, Rng};
    use statrs::assert_almost_eq;

    /// Black body that never scatters.
    struct Absorber;
    impl MaterialEvaluator for Absorber {
        fn name(&self) -> &'static str {
            "absorber"
        }
        fn sample_bsdf(&self, _request: &MaterialRequest<'_>, _u: Vec3) -> BsdfSample {
            BsdfSample::absorbed()
        }
        fn eval_bsdf(&self, _request: &MaterialRequest<'_>, _wi: Vec3) -> BsdfEvaluation {
            BsdfEvaluation::default()
        }
        fn albedo(&self) -> Vec3 {
            Vec3::ZERO
        }
    }

    /// Unit sphere under a white sky, seen head-on through pixel 36.
    fn sphere_scene(absorbing: bool) -> Scene {
        let mut materials = MaterialTable::new(&[MaterialDesc::diffuse(Vec3::splat(0.5))]);
        let id = if absorbing {
            materials.push(Box::new(Absorber))
        } else {
            0
        };
        let camera = Camera::look_at(vec3(0.0, 0.0, 3.0), Vec3::ZERO, Vec3::Y, 60.0, uvec2(8, 8));
        let shapes = vec![(
            Shape::Sphere(Sphere {
                center: Vec3::ZERO,
                radius: 1.0,
            }),
            id,
        )];
        let env = EnvironmentLight::constant(Vec3::ONE).unwrap();
        Scene::new(camera, materials, shapes, Some(env)).unwrap()
    }

    /// Shades the camera hit through pixel 36 and routes the result,
    /// returning the (trace, shadow, accumulation) queue sizes.
    fn shade_first_hit(scene: &Scene, settings: &RenderSettings) -> (usize, usize, usize) {
        let film = FrameBuffer::new(scene.camera.resolution());
        let kernel = PathKernel::new(scene, settings, &film, 0, 0);
        let TraceResult::Hit(prd) = kernel.trace(&kernel.camera_ray(36, 0)) else {
            panic!("camera ray missed the sphere");
        };
        let trace = WorkQueue::new("trace", 4);
        let shadow = WorkQueue::new("shadow", 4);
        let accumulation = WorkQueue::new("accumulation", 8);
        let sinks = ShadeSinks {
            trace: &trace,
            shadow: &shadow,
            accumulation: &accumulation,
        };
        let (next, shadow_item) = kernel.shade(&prd, None);
        kernel.next_work(&next, &shadow_item, &sinks);
        (trace.size(), shadow.size(), accumulation.size())
    }

    #[test]
    fn absorbed_path_is_not_extended() {
        let settings = RenderSettings::default();
        let (trace, shadow, accumulation) = shade_first_hit(&sphere_scene(true), &settings);
        assert_eq!(trace, 0);
        // nothing to reflect toward the light, nothing gathered
        assert_eq!(shadow, 0);
        assert_eq!(accumulation, 0);
    }

    #[test]
    fn path_at_max_bounces_is_not_extended() {
        let scene = sphere_scene(false);
        let mut settings = RenderSettings::default();
        settings.renderer.max_bounces = 2;
        assert_eq!(shade_first_hit(&scene, &settings).0, 1);
        settings.renderer.max_bounces = 1;
        assert_eq!(shade_first_hit(&scene, &settings).0, 0);
    }

    #[test]
    fn roulette_is_unbiased() {
        let settings = RendererSettings {
            rr_min_depth: 0,
            ..Default::default()
        };
        let mut rng = thread_rng();
        let throughput = vec3(0.3, 0.6, 0.2);
        let n = 200000;
        let mut sum = Vec3::ZERO;
        for _ in 0..n {
            if let Some(q) = russian_roulette(throughput, 3, &settings, rng.gen()) {
                sum += throughput / q;
            }
        }
        let mean = sum / n as f32;
        assert_almost_eq!(mean.x as f64, 0.3, 0.01);
        assert_almost_eq!(mean.y as f64, 0.6, 0.01);
        assert_almost_eq!(mean.z as f64, 0.2, 0.01);
    }
    #[test]
    fn roulette_edges() {
        let mut settings = RendererSettings::default();
        assert_eq!(russian_roulette(Vec3::splat(0.01), 1, &settings, 0.9), Some(1.0));
        assert_eq!(russian_roulette(Vec3::ZERO, 5, &settings, 0.0), None);
        assert_eq!(russian_roulette(Vec3::splat(f32::NAN), 5, &settings, 0.0), None);
        assert_eq!(russian_roulette(Vec3::splat(2.0), 5, &settings, 0.5), Some(2.0));
        settings.clamp_continuation_probability = true;
        assert_eq!(russian_roulette(Vec3::splat(2.0), 5, &settings, 0.5), Some(1.0));
        settings.use_russian_roulette = false;
        assert_eq!(russian_roulette(Vec3::ZERO, 5, &settings, 0.5), Some(1.0));
    }
}
