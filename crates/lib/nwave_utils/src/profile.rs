use std::{collections::HashMap, fmt::Display, fmt::Write, hash::Hash, time::Instant};

use parking_lot::RwLock;

#[derive(Clone, Copy, Debug)]
pub struct DispatchStat {
    pub total: f64,
    pub max: f64,
    pub min: f64,
    pub dispatch_count: u32,
}
impl Default for DispatchStat {
    fn default() -> Self {
        Self {
            total: 0.0,
            max: 0.0,
            min: f64::INFINITY,
            dispatch_count: 0,
        }
    }
}
impl DispatchStat {
    fn record(&mut self, elapsed: f64) {
        self.total += elapsed;
        self.max = self.max.max(elapsed);
        self.min = self.min.min(elapsed);
        self.dispatch_count += 1;
    }
}

/// Wall-clock statistics of repeated dispatches, keyed by stage.
pub struct DispatchProfiler<K: Hash + Eq + Display> {
    stats: RwLock<HashMap<K, DispatchStat>>,
}
impl<K: Hash + Eq + Display + Clone> Default for DispatchProfiler<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Hash + Eq + Display + Clone> DispatchProfiler<K> {
    pub fn new() -> Self {
        Self {
            stats: RwLock::new(HashMap::new()),
        }
    }
    pub fn get(&self, key: &K) -> Option<DispatchStat> {
        self.stats.read().get(key).copied()
    }
    pub fn reset(&self) {
        self.stats.write().clear();
    }
    /**
     * Print the profiling result to the given writer.
     * The format is:
     * | key | total | max | min | avg |
     */
    pub fn print<W: Write>(&self, f: &mut W) -> std::fmt::Result {
        let stats = self.stats.read();
        let max_key_len = stats
            .keys()
            .map(|k| k.to_string().len())
            .max()
            .unwrap_or(4)
            .max(4);
        let mut pairs = stats
            .iter()
            .map(|(k, stat)| (k.clone(), *stat))
            .collect::<Vec<(K, DispatchStat)>>();
        pairs.sort_by(|a, b| b.1.total.total_cmp(&a.1.total));
        writeln!(
            f,
            "| {:width$} | {:>8} | {:>8} | {:>8} | {:>8} |",
            "name",
            "total",
            "max",
            "min",
            "avg",
            width = max_key_len
        )?;
        for (k, stat) in pairs {
            writeln!(
                f,
                "| {:width$} | {:>8.3} | {:>8.3} | {:>8.3} | {:>8.3} |",
                k.to_string(),
                stat.total,
                stat.max,
                stat.min,
                stat.total / stat.dispatch_count.max(1) as f64,
                width = max_key_len
            )?;
        }
        Ok(())
    }
    pub fn profile<R>(&self, key: impl Into<K>, f: impl FnOnce() -> R) -> R {
        let key = key.into();
        let start = Instant::now();
        let ret = f();
        let elapsed = start.elapsed().as_secs_f64();
        self.stats.write().entry(key).or_default().record(elapsed);
        ret
    }
}
