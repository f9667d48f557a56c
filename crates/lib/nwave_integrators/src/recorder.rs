use std::sync::atomic::{AtomicI32, Ordering};

use nwave_core::material::BsdfEvent;
use nwave_core::neural::{SurfaceState, TrainingBatch, TrainingSample};
use nwave_core::*;
use parking_lot::{Mutex, MutexGuard};
use rayon::prelude::*;

#[derive(Clone, Copy, Debug, Default)]
pub struct RecordedBsdfSample {
    pub wi: Vec3,
    /// path weight of the bounce, including the roulette division
    pub bsdf_over_pdf: Vec3,
    pub pdf: f32,
    pub event: BsdfEvent,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct RecordedLightSample {
    pub wi: Vec3,
    pub radiance: Vec3,
    pub pdf: f32,
    /// MIS-weighted estimate this sample adds to the vertex's outgoing radiance
    pub contribution: Vec3,
    /// set once the shadow ray found the light unoccluded
    pub valid: bool,
}

/// What one vertex of a recorded path saw. A vertex without `state` is the
/// environment reached by a path that escaped.
#[derive(Clone, Copy, Debug, Default)]
pub struct BounceData {
    pub state: Option<SurfaceState>,
    /// MIS-weighted emission picked up at this vertex
    pub emission: Vec3,
    pub bsdf_sample: Option<RecordedBsdfSample>,
    pub light_sample: Option<RecordedLightSample>,
}

/// Per-pixel path history used to build the oracle's training data. Only
/// the first sample of each pixel is recorded.
pub struct PathRecorder {
    max_bounces: u32,
    bounces: Vec<Mutex<BounceData>>,
    path_length: Vec<AtomicI32>,
}

impl PathRecorder {
    pub fn new(pixel_count: usize, max_bounces: u32) -> Self {
        let max_bounces = max_bounces.max(1);
        Self {
            max_bounces,
            bounces: (0..pixel_count * max_bounces as usize)
                .map(|_| Mutex::new(BounceData::default()))
                .collect(),
            path_length: (0..pixel_count).map(|_| AtomicI32::new(-1)).collect(),
        }
    }
    pub fn begin_frame(&mut self) {
        for l in &mut self.path_length {
            *l.get_mut() = -1;
        }
    }
    fn slot(&self, pixel: u32, depth: u32) -> Option<&Mutex<BounceData>> {
        if depth >= self.max_bounces {
            return None;
        }
        self.bounces
            .get(pixel as usize * self.max_bounces as usize + depth as usize)
    }
    /// Clears the vertex at `depth` and hands it out for filling. Returns
    /// `None` for anything but the first sample of the pixel.
    pub fn get_and_reset(
        &self,
        pixel: u32,
        depth: u32,
        sample_index: u32,
    ) -> Option<MutexGuard<'_, BounceData>> {
        if sample_index != 0 {
            return None;
        }
        let slot = self.slot(pixel, depth)?;
        self.path_length[pixel as usize].fetch_max(depth as i32, Ordering::Relaxed);
        let mut data = slot.lock();
        *data = BounceData::default();
        Some(data)
    }
    pub fn validate_light_sample(&self, pixel: u32, depth: u32, sample_index: u32) {
        if sample_index != 0 {
            return;
        }
        if let Some(slot) = self.slot(pixel, depth) {
            if let Some(light) = &mut slot.lock().light_sample {
                light.valid = true;
            }
        }
    }
    /// Deepest recorded vertex of the pixel's path this frame, -1 if none.
    pub fn max_path_length(&self, pixel: u32) -> i32 {
        self.path_length[pixel as usize].load(Ordering::Relaxed)
    }

    /// Walks every recorded path from its last vertex back to the camera,
    /// turning each sampled direction into a supervised example of the
    /// radiance arriving along it.
    pub fn build_batch(&self) -> TrainingBatch {
        let samples = (0..self.path_length.len() as u32)
            .into_par_iter()
            .flat_map_iter(|pixel| self.path_samples(pixel))
            .collect();
        TrainingBatch { samples }
    }

    fn path_samples(&self, pixel: u32) -> Vec<TrainingSample> {
        let len = self.max_path_length(pixel);
        let mut out = vec![];
        // radiance arriving at the current vertex along its sampled direction
        let mut incoming = Vec3::ZERO;
        for depth in (0..=len).rev() {
            let Some(slot) = self.slot(pixel, depth as u32) else {
                continue;
            };
            let b = *slot.lock();
            let mut outgoing = b.emission;
            if let Some(light) = b.light_sample.filter(|l| l.valid) {
                outgoing += light.contribution;
                if let Some(state) = b.state {
                    out.push(TrainingSample {
                        state,
                        wi: light.wi,
                        incoming_radiance: light.radiance,
                        pdf: light.pdf,
                    });
                }
            }
            if let Some(s) = b.bsdf_sample {
                if let Some(state) = b.state {
                    if !s.event.is_specular() && s.pdf > 0.0 {
                        out.push(TrainingSample {
                            state,
                            wi: s.wi,
                            incoming_radiance: incoming,
                            pdf: s.pdf,
                        });
                    }
                }
                outgoing += s.bsdf_over_pdf * incoming;
            }
            incoming = if outgoing.is_finite() {
                outgoing
            } else {
                Vec3::ZERO
            };
        }
        out
    }
}
