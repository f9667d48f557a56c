//! Contract of the online-learned directional sampling distribution, and a
//! reference implementation that fits one von Mises-Fisher lobe per cell of
//! a spatial grid.
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::util::{parallel_for, AtomicFloat, AtomicVec3};
use crate::*;

/// Network input describing a shading point.
#[derive(Clone, Copy, Debug, Default)]
pub struct SurfaceState {
    pub position: Vec3,
    pub wo: Vec3,
    pub normal: Vec3,
    pub instance_id: u32,
    pub triangle_id: u32,
    pub material_id: u32,
}
impl SurfaceState {
    pub fn from_hit(hit: &HitProperties, wo: Vec3) -> Self {
        Self {
            position: hit.position,
            wo,
            normal: hit.normal,
            instance_id: hit.instance_id,
            triangle_id: hit.triangle_id,
            material_id: hit.material_id,
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NeuralSample {
    pub direction: Vec3,
    pub pdf: f32,
}
impl NeuralSample {
    /// Non-finite, zero-length or negative-density samples must not be used.
    pub fn is_usable(&self) -> bool {
        self.direction.is_finite()
            && self.direction.length_squared() > 0.0
            && self.pdf.is_finite()
            && self.pdf >= 0.0
    }
}

/// One supervised example: radiance arriving at `state` from `wi`, sampled
/// with density `pdf`.
#[derive(Clone, Copy, Debug)]
pub struct TrainingSample {
    pub state: SurfaceState,
    pub wi: Vec3,
    pub incoming_radiance: Vec3,
    pub pdf: f32,
}

#[derive(Clone, Debug, Default)]
pub struct TrainingBatch {
    pub samples: Vec<TrainingSample>,
}
impl TrainingBatch {
    pub fn len(&self) -> usize {
        self.samples.len()
    }
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Sampling and density oracle used by the shading stage.
///
/// Queries are keyed by shade queue index. `register_query` must run for an
/// index before `infer`, and `infer` before any `sample`/`evaluate` on it,
/// all within one frame. Slots are reused on the next `begin_frame`.
pub trait NeuralOracle: Send + Sync {
    fn begin_frame(&mut self, capacity: usize);
    fn register_query(&self, index: usize, state: &SurfaceState);
    fn infer(&mut self, count: usize);
    fn sample(&self, index: usize, sampler: &mut dyn Sampler) -> NeuralSample;
    fn evaluate(&self, index: usize, direction: Vec3) -> f32;
    fn sampling_fraction(&self, index: usize) -> f32;
    /// Returns the loss of the step.
    fn train(&mut self, batch: &TrainingBatch) -> f32;
    fn training_steps(&self) -> usize;
    /// Forgets everything learned.
    fn reset(&mut self);
}

/// Von Mises-Fisher lobe on the sphere.
#[derive(Clone, Copy, Debug, Default)]
pub struct VmfLobe {
    pub mean: Vec3,
    pub kappa: f32,
}
impl VmfLobe {
    const MIN_KAPPA: f32 = 1e-4;
    pub fn uniform() -> Self {
        Self {
            mean: Vec3::Y,
            kappa: 0.0,
        }
    }
    pub fn pdf(&self, w: Vec3) -> f32 {
        if self.kappa < Self::MIN_KAPPA {
            return uniform_sphere_pdf();
        }
        let k = self.kappa;
        k / (2.0 * PI * (1.0 - (-2.0 * k).exp())) * (k * (self.mean.dot(w) - 1.0)).exp()
    }
    pub fn sample(&self, u: Vec2) -> Vec3 {
        if self.kappa < Self::MIN_KAPPA {
            return uniform_sphere(u);
        }
        let k = self.kappa;
        let w = 1.0 + (u.x + (1.0 - u.x) * (-2.0 * k).exp()).ln() / k;
        let w = w.clamp(-1.0, 1.0);
        let s = (1.0 - w * w).max(0.0).sqrt();
        let phi = 2.0 * PI * u.y;
        Frame::from_normal(self.mean).to_world(vec3(s * phi.cos(), w, s * phi.sin()))
    }
    /// Fit from a mean resultant vector (Banerjee et al. approximation).
    pub fn fit(resultant: Vec3, max_kappa: f32) -> Self {
        let r = resultant.length();
        if !(r > 0.0) || !r.is_finite() {
            return Self::uniform();
        }
        let r = r.min(0.9999);
        let kappa = (r * (3.0 - r * r) / (1.0 - r * r)).clamp(0.0, max_kappa);
        Self {
            mean: resultant / resultant.length(),
            kappa,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct VmfGridConfig {
    pub resolution: u32,
    /// weight given to a new training step relative to the running statistics
    pub learning_rate: f32,
    pub max_kappa: f32,
    /// overrides the learned sampling fraction when set
    pub constant_sampling_fraction: Option<f32>,
    /// learned fraction approaches this bound as a cell gathers samples
    pub max_sampling_fraction: f32,
    /// samples at which a cell reaches half of `max_sampling_fraction`
    pub half_confidence_samples: f32,
    pub radiance_clamp: f32,
}
impl Default for VmfGridConfig {
    fn default() -> Self {
        Self {
            resolution: 8,
            learning_rate: 0.1,
            max_kappa: 200.0,
            constant_sampling_fraction: None,
            max_sampling_fraction: 0.5,
            half_confidence_samples: 64.0,
            radiance_clamp: 100.0,
        }
    }
}

#[derive(Default, Clone)]
struct GridCell {
    direction_sum: AtomicVec3,
    weight_sum: AtomicFloat,
    count: AtomicFloat,
}

#[derive(Clone, Copy, Debug, Default)]
struct Query {
    state: SurfaceState,
    lobe: VmfLobe,
    fraction: f32,
}

pub struct VmfGridOracle {
    config: VmfGridConfig,
    bounds: Aabb,
    cells: Vec<GridCell>,
    queries: Vec<Mutex<Query>>,
    registered: AtomicU32,
    steps: usize,
}

impl VmfGridOracle {
    pub fn new(bounds: Aabb, config: VmfGridConfig) -> Self {
        let res = config.resolution.max(1) as usize;
        let mut bounds = bounds;
        if bounds.is_empty() {
            bounds = Aabb {
                min: Vec3::splat(-1.0),
                max: Vec3::splat(1.0),
            };
        }
        let pad = bounds.extent().max_element() * 1e-3 + 1e-4;
        bounds.min -= Vec3::splat(pad);
        bounds.max += Vec3::splat(pad);
        Self {
            config,
            bounds,
            cells: (0..res * res * res).map(|_| GridCell::default()).collect(),
            queries: vec![],
            registered: AtomicU32::new(0),
            steps: 0,
        }
    }
    fn cell_index(&self, p: Vec3) -> usize {
        let res = self.config.resolution.max(1);
        let o = self.bounds.offset(p).clamp(Vec3::ZERO, Vec3::splat(0.99999));
        let c = (o * res as f32).as_uvec3().min(UVec3::splat(res - 1));
        (c.x + c.y * res + c.z * res * res) as usize
    }
    fn cell_lobe(&self, cell: &GridCell) -> (VmfLobe, f32) {
        let weight = cell.weight_sum.load(Ordering::Relaxed);
        let count = cell.count.load(Ordering::Relaxed);
        if !(weight > 0.0) {
            return (VmfLobe::uniform(), 0.0);
        }
        let lobe = VmfLobe::fit(cell.direction_sum.load() / weight, self.config.max_kappa);
        let confidence = count / (count + self.config.half_confidence_samples.max(1e-3));
        (lobe, confidence)
    }
    fn query(&self, index: usize) -> Query {
        match self.queries.get(index) {
            Some(q) => *q.lock(),
            None => Query {
                lobe: VmfLobe::uniform(),
                ..Default::default()
            },
        }
    }
    pub fn registered_queries(&self) -> u32 {
        self.registered.load(Ordering::Relaxed)
    }
}

impl NeuralOracle for VmfGridOracle {
    fn begin_frame(&mut self, capacity: usize) {
        if self.queries.len() < capacity {
            self.queries.resize_with(capacity, || Mutex::new(Query::default()));
        }
        *self.registered.get_mut() = 0;
    }
    fn register_query(&self, index: usize, state: &SurfaceState) {
        if let Some(slot) = self.queries.get(index) {
            *slot.lock() = Query {
                state: *state,
                lobe: VmfLobe::uniform(),
                fraction: 0.0,
            };
            self.registered.fetch_add(1, Ordering::Relaxed);
        }
    }
    fn infer(&mut self, count: usize) {
        let count = count.min(self.queries.len());
        let this = &*self;
        parallel_for(count, 256, |i| {
            let mut q = this.queries[i].lock();
            let cell = &this.cells[this.cell_index(q.state.position)];
            let (lobe, confidence) = this.cell_lobe(cell);
            q.lobe = lobe;
            q.fraction = match this.config.constant_sampling_fraction {
                Some(f) => f,
                None => this.config.max_sampling_fraction * confidence,
            };
        });
    }
    fn sample(&self, index: usize, sampler: &mut dyn Sampler) -> NeuralSample {
        let q = self.query(index);
        let direction = q.lobe.sample(sampler.next2d());
        NeuralSample {
            direction,
            pdf: q.lobe.pdf(direction),
        }
    }
    fn evaluate(&self, index: usize, direction: Vec3) -> f32 {
        self.query(index).lobe.pdf(direction)
    }
    fn sampling_fraction(&self, index: usize) -> f32 {
        self.query(index).fraction
    }
    fn train(&mut self, batch: &TrainingBatch) -> f32 {
        if batch.is_empty() {
            return 0.0;
        }
        let decay = 1.0 - self.config.learning_rate.clamp(0.0, 1.0);
        for cell in &mut self.cells {
            cell.direction_sum.store(cell.direction_sum.load() * decay);
            let w = cell.weight_sum.load(Ordering::Relaxed) * decay;
            cell.weight_sum.store(w, Ordering::Relaxed);
            let c = cell.count.load(Ordering::Relaxed) * decay;
            cell.count.store(c, Ordering::Relaxed);
        }
        // negative log likelihood of the batch under the lobes before the update
        let loss = AtomicFloat::new(0.0);
        let used = AtomicU32::new(0);
        let this = &*self;
        parallel_for(batch.len(), 256, |i| {
            let s = &batch.samples[i];
            if !(s.pdf > DENOMINATOR_EPSILON) || !s.wi.is_finite() {
                return;
            }
            let weight = (luminance(s.incoming_radiance) / s.pdf).min(this.config.radiance_clamp);
            if !(weight > 0.0) || !weight.is_finite() {
                return;
            }
            let cell = &this.cells[this.cell_index(s.state.position)];
            let (lobe, _) = this.cell_lobe(cell);
            loss.fetch_add(-weight * lobe.pdf(s.wi).max(1e-8).ln(), Ordering::Relaxed);
            cell.direction_sum.fetch_add(s.wi.normalize() * weight);
            cell.weight_sum.fetch_add(weight, Ordering::Relaxed);
            cell.count.fetch_add(1.0, Ordering::Relaxed);
            used.fetch_add(1, Ordering::Relaxed);
        });
        self.steps += 1;
        let used = used.load(Ordering::Relaxed).max(1) as f32;
        loss.load(Ordering::Relaxed) / used
    }
    fn training_steps(&self) -> usize {
        self.steps
    }
    fn reset(&mut self) {
        for cell in &mut self.cells {
            *cell = GridCell::default();
        }
        self.steps = 0;
    }
}
