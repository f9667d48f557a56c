use nwave_core::film::FrameBuffer;
use nwave_core::*;

use crate::settings::AdaptiveSamplingSettings;

/// Chooses how many samples each pixel launches per frame from how much its
/// running mean still moves.
#[derive(Default)]
pub struct AdaptiveSampler {
    prev_mean: Vec<f32>,
}

impl AdaptiveSampler {
    pub fn new(pixel_count: usize) -> Self {
        Self {
            prev_mean: vec![0.0; pixel_count],
        }
    }
    pub fn reset(&mut self) {
        self.prev_mean.iter_mut().for_each(|m| *m = 0.0);
    }

    /// Samples `pixel` launches in frame `iteration`.
    pub fn samples_for_launch(
        film: &FrameBuffer,
        pixel: u32,
        iteration: u32,
        settings: &AdaptiveSamplingSettings,
    ) -> u32 {
        if !settings.active || iteration < settings.min_adaptive_samples {
            return 1;
        }
        let count = film.adaptive_samples(pixel);
        if count < 0 {
            0
        } else {
            (count as u32).clamp(settings.min_pixel_samples, settings.max_pixel_samples)
        }
    }

    /// Recomputes the per-pixel launch counts after frame `iteration`.
    /// Pixels marked as direct misses keep their mark.
    pub fn update(
        &mut self,
        film: &FrameBuffer,
        iteration: u32,
        settings: &AdaptiveSamplingSettings,
    ) {
        if !settings.active {
            return;
        }
        if self.prev_mean.len() != film.pixel_count() {
            self.prev_mean = vec![0.0; film.pixel_count()];
        }
        let warm = iteration + 1 >= settings.min_adaptive_samples;
        let span = settings.max_pixel_samples.saturating_sub(settings.min_pixel_samples) as f32;
        for (pixel, prev) in self.prev_mean.iter_mut().enumerate() {
            let pixel = pixel as u32;
            let mean = luminance(film.resolve(pixel));
            let change = relative_change(*prev, mean);
            *prev = mean;
            if film.adaptive_samples(pixel) < 0 || !warm {
                continue;
            }
            let t = (change / settings.noise_cutoff).min(1.0);
            let extra = if t.is_finite() { (span * t).round() as u32 } else { 0 };
            film.set_adaptive_samples(pixel, (settings.min_pixel_samples + extra) as i32);
        }
    }
}

fn relative_change(prev: f32, mean: f32) -> f32 {
    let scale = prev.abs().max(mean.abs());
    if scale <= DENOMINATOR_EPSILON {
        0.0
    } else {
        (mean - prev).abs() / scale
    }
}
