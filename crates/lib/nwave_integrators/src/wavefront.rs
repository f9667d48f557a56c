use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use nwave_core::film::FrameBuffer;
use nwave_core::neural::{NeuralOracle, VmfGridOracle};
use nwave_core::scene::Scene;
use nwave_core::util::profile::DispatchProfiler;
use nwave_core::util::{create_progess_bar, parallel_for};
use nwave_core::*;

use crate::adaptive::AdaptiveSampler;
use crate::debug::{DebugConfig, DebugDataAllocator, DebugBuffer};
use crate::queue::{push_or_report, WorkQueue};
use crate::recorder::PathRecorder;
use crate::settings::{RenderSettings, WavefrontSettings};
use crate::shading::{PathKernel, ShadeSinks};
use crate::strategy::{QueuedStep, RecursiveStep, StepPath, TraceSinks};
use crate::work_items::*;
use crate::Integrator;

const CHUNK_SIZE: usize = 256;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    Init,
    Trace,
    Inference,
    Shade,
    ShadowTrace,
    Escaped,
    Accumulate,
    Train,
}
impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Init => "init",
            Stage::Trace => "trace",
            Stage::Inference => "inference",
            Stage::Shade => "shade",
            Stage::ShadowTrace => "shadow trace",
            Stage::Escaped => "escaped",
            Stage::Accumulate => "accumulate",
            Stage::Train => "train",
        };
        f.write_str(name)
    }
}

struct Queues {
    trace: WorkQueue<TraceWorkItem>,
    shade: WorkQueue<RayWorkItem>,
    shadow: WorkQueue<ShadowWorkItem>,
    escaped: WorkQueue<EscapedWorkItem>,
    accumulation: WorkQueue<AccumulationWorkItem>,
}
impl Queues {
    /// Per bounce a path is either shaded or escapes, producing at most one
    /// flush and one shadow contribution.
    fn new(wavefront_size: usize) -> Self {
        Self {
            trace: WorkQueue::new("trace", wavefront_size),
            shade: WorkQueue::new("shade", wavefront_size),
            shadow: WorkQueue::new("shadow", wavefront_size),
            escaped: WorkQueue::new("escaped", wavefront_size),
            accumulation: WorkQueue::new("accumulation", 2 * wavefront_size),
        }
    }
    fn reset(&mut self) {
        self.trace.reset();
        self.shade.reset();
        self.shadow.reset();
        self.escaped.reset();
        self.accumulation.reset();
    }
    /// Items rejected so far, per queue.
    fn dropped(&self) -> [(&'static str, usize); 5] {
        [
            (self.trace.name(), self.trace.dropped()),
            (self.shade.name(), self.shade.dropped()),
            (self.shadow.name(), self.shadow.dropped()),
            (self.escaped.name(), self.escaped.dropped()),
            (self.accumulation.name(), self.accumulation.dropped()),
        ]
    }
}

/// Whether the paths left in `trace` are few enough, relative to the
/// wavefront size, to be finished inline by [`RecursiveStep`].
fn finish_inline<T: Copy + Default>(trace: &WorkQueue<T>, settings: &WavefrontSettings) -> bool {
    settings.use_long_path_kernel
        && trace.size() as f32 <= settings.long_path_percentage * trace.capacity() as f32
}

#[derive(Clone, Copy, Debug, Default)]
pub struct FrameStats {
    pub bounces: u32,
    pub camera_rays: usize,
    pub shaded: usize,
    pub escaped: usize,
    pub shadow_rays: usize,
    pub training_samples: usize,
    pub loss: Option<f32>,
}

/// Renders frames stage by stage: every in-flight path is traced, then
/// every hit is shaded, and so on, with a barrier between stages.
pub struct WavefrontIntegrator {
    settings: RenderSettings,
    film: FrameBuffer,
    queues: Queues,
    oracle: Option<Box<dyn NeuralOracle>>,
    recorder: Option<PathRecorder>,
    debug: DebugDataAllocator,
    adaptive: AdaptiveSampler,
    profiler: DispatchProfiler<Stage>,
    should_stop: Arc<AtomicBool>,
    iteration: u32,
    frame_id: u32,
}

impl WavefrontIntegrator {
    pub fn new(scene: &Scene, settings: RenderSettings) -> Result<Self> {
        let oracle: Option<Box<dyn NeuralOracle>> = if settings.neural.active {
            Some(Box::new(VmfGridOracle::new(
                scene.bounds,
                settings.neural.oracle.clone(),
            )))
        } else {
            None
        };
        Self::with_oracle(scene, settings, oracle)
    }

    /// Uses `oracle` instead of the built-in grid. It is only consulted when
    /// neural sampling is active.
    pub fn with_oracle(
        scene: &Scene,
        settings: RenderSettings,
        oracle: Option<Box<dyn NeuralOracle>>,
    ) -> Result<Self> {
        settings.validate()?;
        let resolution = scene.camera.resolution();
        let pixel_count = scene.camera.pixel_count();
        if pixel_count == 0 {
            return Err(Error::InvalidSettings(format!(
                "camera resolution {}x{} is empty",
                resolution.x, resolution.y
            )));
        }
        let wavefront_size = pixel_count * settings.max_samples_per_launch() as usize;
        let recorder = (settings.neural.active && settings.neural.do_training)
            .then(|| PathRecorder::new(pixel_count, settings.renderer.max_bounces));
        log::info!(
            "wavefront size {} ({}x{} pixels, {} samples per launch)",
            wavefront_size,
            resolution.x,
            resolution.y,
            settings.max_samples_per_launch()
        );
        Ok(Self {
            film: FrameBuffer::new(resolution),
            queues: Queues::new(wavefront_size),
            oracle,
            recorder,
            debug: DebugDataAllocator::default(),
            adaptive: AdaptiveSampler::new(pixel_count),
            profiler: DispatchProfiler::new(),
            should_stop: Arc::new(AtomicBool::new(false)),
            iteration: 0,
            frame_id: 0,
            settings,
        })
    }

    pub fn settings(&self) -> &RenderSettings {
        &self.settings
    }
    pub fn film(&self) -> &FrameBuffer {
        &self.film
    }
    pub fn iteration(&self) -> u32 {
        self.iteration
    }
    pub fn oracle(&self) -> Option<&dyn NeuralOracle> {
        self.oracle.as_deref()
    }
    pub fn profiler(&self) -> &DispatchProfiler<Stage> {
        &self.profiler
    }
    pub fn debug_data(&self) -> Option<&DebugBuffer> {
        self.debug.buffer()
    }
    /// Flag that stops [`Integrator::render`] before its next frame.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.should_stop.clone()
    }
    /// Starts accumulating from scratch on the next frame.
    pub fn restart(&mut self) {
        self.iteration = 0;
    }

    fn needs_clean(&self) -> bool {
        let neural = &self.settings.neural;
        self.iteration == 0
            || !self.settings.renderer.accumulate
            || (neural.active
                && neural.clear_on_inference_start
                && self.iteration == neural.inference_iteration_start)
    }

    /// Renders one frame into the frame buffer.
    pub fn render_frame(&mut self, scene: &Scene) -> FrameStats {
        if self.needs_clean() {
            self.film.clear();
            self.adaptive.reset();
        }
        let neural_frame = self.oracle.is_some()
            && self.settings.neural.active
            && self.settings.neural.do_inference
            && self.iteration >= self.settings.neural.inference_iteration_start;
        let Self {
            settings,
            film,
            queues,
            oracle,
            recorder,
            debug,
            adaptive,
            profiler,
            iteration,
            frame_id,
            ..
        } = self;
        let iteration = *iteration;
        let frame_id = *frame_id;
        let pixel_count = film.pixel_count();
        let mut stats = FrameStats::default();

        let debug_buffer = debug.prepare(settings.neural.debug_pixel.map(|pixel| DebugConfig {
            max_depth: settings.renderer.max_bounces,
            debug_pixel: pixel,
            debug_depth: settings.neural.debug_depth,
        }));
        if let Some(recorder) = recorder.as_mut() {
            recorder.begin_frame();
        }
        let recorder = recorder.as_ref();
        let base = PathKernel::new(scene, settings, film, iteration, frame_id)
            .with_recorder(recorder)
            .with_debug(debug_buffer);

        profiler.profile(Stage::Init, || {
            queues.reset();
            if let Some(oracle) = oracle.as_mut() {
                oracle.begin_frame(queues.shade.capacity());
            }
            let trace = &queues.trace;
            let adaptive_settings = &settings.renderer.adaptive_sampling;
            parallel_for(pixel_count, CHUNK_SIZE, |pixel| {
                let pixel = pixel as u32;
                let n = AdaptiveSampler::samples_for_launch(film, pixel, iteration, adaptive_settings);
                for sample_index in 0..n {
                    push_or_report(trace, base.camera_ray(pixel, sample_index));
                }
            });
        });
        stats.camera_rays = queues.trace.size();

        let Queues {
            trace,
            shade,
            shadow,
            escaped,
            accumulation,
        } = &mut *queues;
        while !trace.is_empty() {
            stats.bounces += 1;
            let step: &dyn StepPath = if finish_inline(trace, &settings.wavefront) {
                &RecursiveStep
            } else {
                &QueuedStep
            };
            log::trace!("bounce {}: {} paths, {} step", stats.bounces, trace.size(), step.name());
            let oracle_ref = oracle.as_deref().filter(|_| neural_frame);
            profiler.profile(Stage::Trace, || {
                let kernel = base.with_oracle(oracle_ref);
                let sinks = TraceSinks {
                    shade: &*shade,
                    escaped: &*escaped,
                };
                let items = trace.items();
                parallel_for(items.len(), CHUNK_SIZE, |i| {
                    step.step(&kernel, &sinks, &items[i]);
                });
            });
            trace.reset();

            if neural_frame && !shade.is_empty() {
                if let Some(oracle) = oracle.as_mut() {
                    profiler.profile(Stage::Inference, || oracle.infer(shade.size()));
                }
            }

            let oracle_ref = oracle.as_deref().filter(|_| neural_frame);
            stats.shaded += shade.size();
            profiler.profile(Stage::Shade, || {
                let kernel = base.with_oracle(oracle_ref);
                let sinks = ShadeSinks {
                    trace: &*trace,
                    shadow: &*shadow,
                    accumulation: &*accumulation,
                };
                let items = shade.items();
                parallel_for(items.len(), CHUNK_SIZE, |i| {
                    let prd = &items[i];
                    let query = kernel.neural_enabled(prd.pixel).then_some(i);
                    let (next, shadow_item) = kernel.shade(prd, query);
                    kernel.next_work(&next, &shadow_item, &sinks);
                });
            });
            shade.reset();

            stats.shadow_rays += shadow.size();
            profiler.profile(Stage::ShadowTrace, || {
                let acc = &*accumulation;
                let items = shadow.items();
                parallel_for(items.len(), CHUNK_SIZE, |i| {
                    if let Some(item) = base.trace_shadow(&items[i]) {
                        push_or_report(acc, item);
                    }
                });
            });
            shadow.reset();

            stats.escaped += escaped.size();
            profiler.profile(Stage::Escaped, || {
                let acc = &*accumulation;
                let items = escaped.items();
                parallel_for(items.len(), CHUNK_SIZE, |i| {
                    if let Some(item) = base.miss(&items[i]) {
                        push_or_report(acc, item);
                    }
                });
            });
            escaped.reset();

            profiler.profile(Stage::Accumulate, || {
                let items = accumulation.items();
                parallel_for(items.len(), CHUNK_SIZE, |i| base.accumulate(&items[i]));
            });
            accumulation.reset();
        }

        let neural = &settings.neural;
        if let (Some(oracle), Some(recorder)) = (oracle.as_mut(), recorder) {
            if neural.do_training && oracle.training_steps() < neural.max_training_steps as usize {
                profiler.profile(Stage::Train, || {
                    let batch = recorder.build_batch();
                    stats.training_samples = batch.len();
                    if !batch.is_empty() {
                        stats.loss = Some(oracle.train(&batch));
                    }
                });
            }
        }
        adaptive.update(film, iteration, &settings.renderer.adaptive_sampling);

        for (queue, dropped) in queues.dropped() {
            if dropped > 0 {
                log::error!("{} work items dropped on the full {} queue so far", dropped, queue);
            }
        }
        log::debug!(
            "frame {}: {} camera rays, {} bounces, {} shaded, {} escaped, {} shadow rays, loss {:?}",
            iteration,
            stats.camera_rays,
            stats.bounces,
            stats.shaded,
            stats.escaped,
            stats.shadow_rays,
            stats.loss
        );
        self.iteration += 1;
        self.frame_id += 1;
        stats
    }
}

impl Integrator for WavefrontIntegrator {
    fn render(&mut self, scene: &Scene, frames: u32) -> u32 {
        log::info!("rendering {} frames ...", frames);
        let progress = create_progess_bar(frames as usize, "frames");
        let mut rendered = 0;
        for _ in 0..frames {
            if self.should_stop.load(Ordering::Relaxed) {
                log::info!("stop requested after {} frames", rendered);
                break;
            }
            let stats = self.render_frame(scene);
            if let Some(loss) = stats.loss {
                progress.set_message(format!("loss {:.4}", loss));
            }
            progress.inc(1);
            rendered += 1;
        }
        progress.finish();
        if self.film.dropped_samples() > 0 {
            log::warn!("{} non-finite samples were dropped", self.film.dropped_samples());
        }
        let mut table = String::new();
        if self.profiler.print(&mut table).is_ok() {
            log::info!("stage timings (s):\n{}", table);
        }
        rendered
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn inline_threshold_is_relative_to_wavefront_size() {
        let mut settings = WavefrontSettings {
            use_long_path_kernel: true,
            long_path_percentage: 0.25,
        };
        // 4 pixels at 8 samples per launch
        let mut trace = WorkQueue::<TraceWorkItem>::new("trace", 32);
        for _ in 0..8 {
            trace.push(TraceWorkItem::default()).unwrap();
        }
        assert!(finish_inline(&trace, &settings));
        trace.push(TraceWorkItem::default()).unwrap();
        assert!(!finish_inline(&trace, &settings));
        trace.reset();
        assert!(finish_inline(&trace, &settings));
        settings.use_long_path_kernel = false;
        assert!(!finish_inline(&trace, &settings));
    }

    #[test]
    fn overflow_is_reported_per_queue() {
        let queues = Queues::new(1);
        queues.shadow.push(ShadowWorkItem::default()).unwrap();
        assert!(queues.shadow.push(ShadowWorkItem::default()).is_err());
        let dropped = queues.dropped();
        assert_eq!(dropped.iter().map(|(_, n)| n).sum::<usize>(), 1);
        assert!(dropped.contains(&("shadow", 1)));
        assert!(dropped.contains(&("accumulation", 0)));
    }
}
