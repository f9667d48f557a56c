use std::sync::atomic::{AtomicI32, Ordering};

use nwave_core::*;
use parking_lot::Mutex;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DebugConfig {
    pub max_depth: u32,
    pub debug_pixel: u32,
    /// bounce reported by [`DebugBuffer::focused`]
    pub debug_depth: u32,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct DebugBounceData {
    pub position: Vec3,
    pub throughput: Vec3,
    pub wi: Vec3,
    pub bsdf_pdf: f32,
    pub neural_pdf: f32,
    pub mixture_pdf: f32,
    pub light_pdf: f32,
    pub light_mis_weight: f32,
    pub emission_mis_weight: f32,
    pub sampling_fraction: f32,
    pub continuation_probability: f32,
    pub radiance: Vec3,
    pub neural_sampled: bool,
}

/// Bounce-by-bounce trace of sample 0 of one pixel.
pub struct DebugBuffer {
    config: DebugConfig,
    bounces: Vec<Mutex<DebugBounceData>>,
    actual_depth: AtomicI32,
}

impl DebugBuffer {
    fn new(config: DebugConfig) -> Self {
        Self {
            config,
            bounces: (0..config.max_depth.max(1))
                .map(|_| Mutex::new(DebugBounceData::default()))
                .collect(),
            actual_depth: AtomicI32::new(-1),
        }
    }
    pub fn config(&self) -> &DebugConfig {
        &self.config
    }
    pub fn is_traced(&self, pixel: u32, sample_index: u32) -> bool {
        pixel == self.config.debug_pixel && sample_index == 0
    }
    pub fn reset(&mut self) {
        for b in &mut self.bounces {
            *b.get_mut() = DebugBounceData::default();
        }
        *self.actual_depth.get_mut() = -1;
    }
    pub fn record(&self, depth: u32, data: DebugBounceData) {
        if let Some(slot) = self.bounces.get(depth as usize) {
            *slot.lock() = data;
            self.actual_depth.fetch_max(depth as i32, Ordering::Relaxed);
        }
    }
    /// Recorded bounces, camera vertex first.
    pub fn download(&self) -> Vec<DebugBounceData> {
        let n = (self.actual_depth.load(Ordering::Relaxed) + 1).max(0) as usize;
        self.bounces[..n].iter().map(|b| *b.lock()).collect()
    }
    pub fn focused(&self) -> Option<DebugBounceData> {
        let depth = self.config.debug_depth as i32;
        if depth > self.actual_depth.load(Ordering::Relaxed) {
            return None;
        }
        self.bounces.get(depth as usize).map(|b| *b.lock())
    }
}

/// Owns the debug buffer and rebuilds it only when its shape changes.
#[derive(Default)]
pub struct DebugDataAllocator {
    current: Option<DebugConfig>,
    buffer: Option<DebugBuffer>,
    allocations: usize,
}

impl DebugDataAllocator {
    /// Readies the buffer for a new frame; `None` turns debugging off.
    pub fn prepare(&mut self, config: Option<DebugConfig>) -> Option<&DebugBuffer> {
        let Some(config) = config else {
            self.current = None;
            self.buffer = None;
            return None;
        };
        let same_shape = matches!(self.current, Some(c) if c.max_depth == config.max_depth);
        let reused = match self.buffer.as_mut() {
            Some(buffer) if same_shape => {
                buffer.config = config;
                buffer.reset();
                true
            }
            _ => false,
        };
        if !reused {
            self.buffer = Some(DebugBuffer::new(config));
            self.allocations += 1;
        }
        self.current = Some(config);
        self.buffer.as_ref()
    }
    pub fn buffer(&self) -> Option<&DebugBuffer> {
        self.buffer.as_ref()
    }
    pub fn allocations(&self) -> usize {
        self.allocations
    }
}
