use nwave_core::neural::VmfGridConfig;
use nwave_core::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SamplingTechnique {
    /// BSDF sampling only, emission picked up on implicit hits
    Bsdf,
    /// next-event estimation only, paths stop after the first hit
    DirectLight,
    #[default]
    Mis,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Quadrant {
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}
impl Quadrant {
    /// Image rows grow upward, so "top" means `y > height / 2`.
    pub fn of_pixel(pixel: u32, resolution: UVec2) -> Self {
        let x = pixel % resolution.x;
        let y = pixel / resolution.x;
        let top = y > resolution.y / 2;
        let left = x < resolution.x / 2;
        match (left, top) {
            (true, true) => Quadrant::TopLeft,
            (false, true) => Quadrant::TopRight,
            (true, false) => Quadrant::BottomLeft,
            (false, false) => Quadrant::BottomRight,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct QuadrantSplit {
    pub technique: SamplingTechnique,
    pub neural_active: bool,
}
impl Default for QuadrantSplit {
    fn default() -> Self {
        Self {
            technique: SamplingTechnique::Mis,
            neural_active: true,
        }
    }
}

/// Per-quadrant override of technique and neural sampling, used to compare
/// estimators side by side in one image.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QuadrantSettings {
    pub enabled: bool,
    pub top_left: QuadrantSplit,
    pub top_right: QuadrantSplit,
    pub bottom_left: QuadrantSplit,
    pub bottom_right: QuadrantSplit,
}
impl QuadrantSettings {
    pub fn split(&self, quadrant: Quadrant) -> &QuadrantSplit {
        match quadrant {
            Quadrant::TopLeft => &self.top_left,
            Quadrant::TopRight => &self.top_right,
            Quadrant::BottomLeft => &self.bottom_left,
            Quadrant::BottomRight => &self.bottom_right,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveSamplingSettings {
    pub active: bool,
    /// iterations rendered with one sample per pixel before adapting
    pub min_adaptive_samples: u32,
    pub min_pixel_samples: u32,
    pub max_pixel_samples: u32,
    /// relative change of the running mean that earns `max_pixel_samples`
    pub noise_cutoff: f32,
}
impl Default for AdaptiveSamplingSettings {
    fn default() -> Self {
        Self {
            active: false,
            min_adaptive_samples: 16,
            min_pixel_samples: 1,
            max_pixel_samples: 4,
            noise_cutoff: 0.05,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererSettings {
    pub max_bounces: u32,
    /// number of frames (iterations) to render
    pub max_samples: u32,
    /// ray epsilon; also shortens shadow rays so they stop before the light
    pub min_clamp: f32,
    /// far plane; environment samples are placed at this distance
    pub max_clamp: f32,
    pub use_russian_roulette: bool,
    pub rr_min_depth: u32,
    /// clamp the continuation probability to [0, 1]
    pub clamp_continuation_probability: bool,
    pub sampling_technique: SamplingTechnique,
    pub mis_heuristic: MisHeuristic,
    /// show the environment behind primary misses
    pub view_background: bool,
    pub accumulate: bool,
    pub adaptive_sampling: AdaptiveSamplingSettings,
    pub quadrants: QuadrantSettings,
}
impl Default for RendererSettings {
    fn default() -> Self {
        Self {
            max_bounces: 8,
            max_samples: 64,
            min_clamp: 1e-4,
            max_clamp: 1e4,
            use_russian_roulette: true,
            rr_min_depth: 2,
            clamp_continuation_probability: false,
            sampling_technique: SamplingTechnique::Mis,
            mis_heuristic: MisHeuristic::Power,
            view_background: true,
            accumulate: true,
            adaptive_sampling: AdaptiveSamplingSettings::default(),
            quadrants: QuadrantSettings::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct WavefrontSettings {
    /// finish short batches with the recursive kernel
    pub use_long_path_kernel: bool,
    /// trace queue occupancy, as a fraction of the wavefront size
    /// (pixels times samples per launch), at or below which the recursive
    /// kernel takes over
    pub long_path_percentage: f32,
}
impl Default for WavefrontSettings {
    fn default() -> Self {
        Self {
            use_long_path_kernel: false,
            long_path_percentage: 0.25,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct NeuralSettings {
    pub active: bool,
    pub do_training: bool,
    pub do_inference: bool,
    pub inference_iteration_start: u32,
    pub clear_on_inference_start: bool,
    pub max_training_steps: u32,
    pub oracle: VmfGridConfig,
    /// pixel whose sample 0 is traced into the debug buffer
    pub debug_pixel: Option<u32>,
    pub debug_depth: u32,
}
impl Default for NeuralSettings {
    fn default() -> Self {
        Self {
            active: false,
            do_training: true,
            do_inference: true,
            inference_iteration_start: 1,
            clear_on_inference_start: false,
            max_training_steps: 1000,
            oracle: VmfGridConfig::default(),
            debug_pixel: None,
            debug_depth: 0,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    pub renderer: RendererSettings,
    pub wavefront: WavefrontSettings,
    pub neural: NeuralSettings,
}

impl RenderSettings {
    pub fn validate(&self) -> Result<()> {
        let r = &self.renderer;
        let invalid = |msg: String| Err(Error::InvalidSettings(msg));
        if r.max_bounces == 0 {
            return invalid("max_bounces must be at least 1".into());
        }
        if !(r.min_clamp >= 0.0) || !(r.max_clamp > r.min_clamp) || !r.max_clamp.is_finite() {
            return invalid(format!(
                "clamp range [{}, {}] is empty or not finite",
                r.min_clamp, r.max_clamp
            ));
        }
        let a = &r.adaptive_sampling;
        if a.active && (a.min_pixel_samples == 0 || a.min_pixel_samples > a.max_pixel_samples) {
            return invalid(format!(
                "adaptive pixel samples [{}, {}] are inconsistent",
                a.min_pixel_samples, a.max_pixel_samples
            ));
        }
        if a.active && !(a.noise_cutoff > 0.0) {
            return invalid("adaptive noise_cutoff must be positive".into());
        }
        if !(0.0..=1.0).contains(&self.wavefront.long_path_percentage) {
            return invalid(format!(
                "long_path_percentage {} is outside [0, 1]",
                self.wavefront.long_path_percentage
            ));
        }
        let oracle = &self.neural.oracle;
        if oracle.resolution == 0 {
            return invalid("oracle grid resolution must be at least 1".into());
        }
        if let Some(f) = oracle.constant_sampling_fraction {
            if !(0.0..=1.0).contains(&f) {
                return invalid(format!("constant sampling fraction {} is outside [0, 1]", f));
            }
        }
        Ok(())
    }

    /// Largest number of samples a pixel may launch in one frame.
    pub fn max_samples_per_launch(&self) -> u32 {
        let a = &self.renderer.adaptive_sampling;
        if a.active {
            a.max_pixel_samples.max(1)
        } else {
            1
        }
    }

    pub fn technique(&self, pixel: u32, resolution: UVec2) -> SamplingTechnique {
        let q = &self.renderer.quadrants;
        if q.enabled {
            q.split(Quadrant::of_pixel(pixel, resolution)).technique
        } else {
            self.renderer.sampling_technique
        }
    }

    /// Whether neural sampling may be used at `pixel` during `iteration`.
    pub fn neural_sampling_enabled(&self, pixel: u32, resolution: UVec2, iteration: u32) -> bool {
        let q = &self.renderer.quadrants;
        let quadrant_allows = !q.enabled || q.split(Quadrant::of_pixel(pixel, resolution)).neural_active;
        self.neural.active
            && self.neural.do_inference
            && iteration >= self.neural.inference_iteration_start
            && quadrant_allows
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        RenderSettings::default().validate().unwrap();
    }
    #[test]
    fn rejects_inconsistent_values() {
        let mut s = RenderSettings::default();
        s.renderer.max_bounces = 0;
        assert!(s.validate().is_err());

        let mut s = RenderSettings::default();
        s.renderer.min_clamp = 1.0;
        s.renderer.max_clamp = 0.5;
        assert!(s.validate().is_err());

        let mut s = RenderSettings::default();
        s.renderer.adaptive_sampling.active = true;
        s.renderer.adaptive_sampling.min_pixel_samples = 8;
        s.renderer.adaptive_sampling.max_pixel_samples = 2;
        assert!(s.validate().is_err());

        let mut s = RenderSettings::default();
        s.neural.oracle.constant_sampling_fraction = Some(1.5);
        assert!(s.validate().is_err());
    }
    #[test]
    fn partial_json_uses_defaults() {
        let s: RenderSettings = serde_json::from_str(
            r#"{ "renderer": { "max_bounces": 3, "sampling_technique": "DirectLight" },
                 "neural": { "active": true } }"#,
        )
        .unwrap();
        assert_eq!(s.renderer.max_bounces, 3);
        assert_eq!(s.renderer.sampling_technique, SamplingTechnique::DirectLight);
        assert_eq!(s.renderer.rr_min_depth, 2);
        assert!(s.neural.active);
        assert_eq!(s.neural.inference_iteration_start, 1);
    }
    #[test]
    fn quadrants() {
        let res = uvec2(10, 10);
        assert_eq!(Quadrant::of_pixel(0, res), Quadrant::BottomLeft);
        assert_eq!(Quadrant::of_pixel(9, res), Quadrant::BottomRight);
        // y == height / 2 still counts as bottom
        assert_eq!(Quadrant::of_pixel(5 * 10, res), Quadrant::BottomLeft);
        assert_eq!(Quadrant::of_pixel(6 * 10, res), Quadrant::TopLeft);
        assert_eq!(Quadrant::of_pixel(99, res), Quadrant::TopRight);

        let mut s = RenderSettings::default();
        s.neural.active = true;
        s.renderer.quadrants.enabled = true;
        s.renderer.quadrants.top_right = QuadrantSplit {
            technique: SamplingTechnique::Bsdf,
            neural_active: false,
        };
        assert_eq!(s.technique(99, res), SamplingTechnique::Bsdf);
        assert_eq!(s.technique(0, res), SamplingTechnique::Mis);
        assert!(!s.neural_sampling_enabled(99, res, 5));
        assert!(s.neural_sampling_enabled(0, res, 5));
        assert!(!s.neural_sampling_enabled(0, res, 0));
    }
}
