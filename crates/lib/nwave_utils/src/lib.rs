use glam::{vec3, Vec3};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
pub mod profile;

pub struct ProgressBarWrapper {
    inner: Option<ProgressBar>,
}

impl ProgressBarWrapper {
    pub fn inc(&self, delta: u64) {
        if let Some(pb) = &self.inner {
            pb.inc(delta);
        }
    }
    pub fn set_message(&self, msg: String) {
        if let Some(pb) = &self.inner {
            pb.set_message(msg);
        }
    }
    pub fn finish(&self) {
        if let Some(pb) = &self.inner {
            pb.finish();
        }
    }
}
static PB_ENABLE: AtomicBool = AtomicBool::new(true);
pub fn enable_progress_bar(enable: bool) {
    PB_ENABLE.store(enable, Ordering::Relaxed);
}
pub fn create_progess_bar(count: usize, what: &str) -> ProgressBarWrapper {
    if !PB_ENABLE.load(Ordering::Relaxed) {
        return ProgressBarWrapper { inner: None };
    }
    let template = String::from(
        "[{elapsed_precise} - {eta_precise}] [{bar:40.cyan/blue}] {pos:>7}/{len:7}WHAT {msg}",
    );
    let template = template.replace("WHAT", what);
    let progress = ProgressBar::new(count as u64);
    progress.set_draw_target(ProgressDrawTarget::stdout_with_hz(2));
    match ProgressStyle::default_bar().template(&template) {
        Ok(style) => progress.set_style(style.progress_chars("=>-")),
        Err(e) => log::warn!("invalid progress bar template: {}", e),
    }
    ProgressBarWrapper {
        inner: Some(progress),
    }
}

pub fn profile_fn<F: FnOnce() -> T, T>(f: F) -> (T, f64) {
    let now = std::time::Instant::now();
    let ret = f();
    (ret, now.elapsed().as_secs_f64())
}

/// An f32 that supports lock-free accumulation from many lanes.
#[derive(Serialize, Deserialize)]
pub struct AtomicFloat {
    bits: AtomicU32,
}
impl Default for AtomicFloat {
    fn default() -> Self {
        Self::new(0.0)
    }
}

impl AtomicFloat {
    pub fn new(v: f32) -> Self {
        Self {
            bits: AtomicU32::new(bytemuck::cast(v)),
        }
    }
    pub fn load(&self, ordering: Ordering) -> f32 {
        bytemuck::cast(self.bits.load(ordering))
    }
    pub fn store(&self, v: f32, ordering: Ordering) {
        self.bits.store(bytemuck::cast(v), ordering)
    }
    pub fn fetch_add(&self, v: f32, ordering: Ordering) -> f32 {
        let mut oldbits = self.bits.load(ordering);
        loop {
            let newbits: u32 = bytemuck::cast(bytemuck::cast::<u32, f32>(oldbits) + v);
            match self.bits.compare_exchange_weak(
                oldbits,
                newbits,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(x) => oldbits = x,
            }
        }
        bytemuck::cast(oldbits)
    }
}
impl Clone for AtomicFloat {
    fn clone(&self) -> Self {
        Self {
            bits: AtomicU32::new(self.bits.load(Ordering::Relaxed)),
        }
    }
}

/// Three [`AtomicFloat`]s holding an rgb (or xyz) triple.
#[derive(Default, Clone, Serialize, Deserialize)]
pub struct AtomicVec3 {
    pub x: AtomicFloat,
    pub y: AtomicFloat,
    pub z: AtomicFloat,
}
impl AtomicVec3 {
    pub fn load(&self) -> Vec3 {
        vec3(
            self.x.load(Ordering::Relaxed),
            self.y.load(Ordering::Relaxed),
            self.z.load(Ordering::Relaxed),
        )
    }
    pub fn store(&self, v: Vec3) {
        self.x.store(v.x, Ordering::Relaxed);
        self.y.store(v.y, Ordering::Relaxed);
        self.z.store(v.z, Ordering::Relaxed);
    }
    pub fn fetch_add(&self, v: Vec3) {
        self.x.fetch_add(v.x, Ordering::Relaxed);
        self.y.fetch_add(v.y, Ordering::Relaxed);
        self.z.fetch_add(v.z, Ordering::Relaxed);
    }
}

pub fn parallel_for<F: Fn(usize) + Sync>(count: usize, chunk_size: usize, f: F) {
    let nthreads = rayon::current_num_threads();
    let work_counter = AtomicUsize::new(0);
    rayon::scope(|s| {
        for _ in 0..nthreads {
            s.spawn(|_| loop {
                let work = work_counter.fetch_add(chunk_size, Ordering::Relaxed);
                if work >= count {
                    return;
                }
                for i in work..(work + chunk_size).min(count) {
                    f(i);
                }
            });
        }
    });
}

pub fn linear_to_srgb1(l: f32) -> f32 {
    if l <= 0.0031308 {
        l * 12.92
    } else {
        l.powf(1.0 / 2.4) * 1.055 - 0.055
    }
}
pub fn linear_to_srgb(linear: Vec3) -> Vec3 {
    vec3(
        linear_to_srgb1(linear.x),
        linear_to_srgb1(linear.y),
        linear_to_srgb1(linear.z),
    )
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::{thread_rng, Rng};

    #[test]
    fn atomic_float_parallel_sum() {
        let sum = AtomicFloat::new(0.0);
        parallel_for(4096, 64, |_| {
            sum.fetch_add(0.5, Ordering::Relaxed);
        });
        assert_eq!(sum.load(Ordering::Relaxed), 2048.0);
    }
    #[test]
    fn parallel_for_visits_each_index_once() {
        let hits: Vec<_> = (0..1000).map(|_| AtomicUsize::new(0)).collect();
        parallel_for(hits.len(), 7, |i| {
            hits[i].fetch_add(1, Ordering::Relaxed);
        });
        assert!(hits.iter().all(|h| h.load(Ordering::Relaxed) == 1));
    }
    #[test]
    fn srgb_is_monotonic() {
        let mut rng = thread_rng();
        let mut xs: Vec<f32> = (0..100).map(|_| rng.gen::<f32>()).collect();
        xs.sort_by(|a, b| a.partial_cmp(b).unwrap());
        for w in xs.windows(2) {
            assert!(linear_to_srgb1(w[0]) <= linear_to_srgb1(w[1]));
        }
        assert_eq!(linear_to_srgb1(0.0), 0.0);
        assert!((linear_to_srgb1(1.0) - 1.0).abs() < 1e-5);
    }
}
