pub mod api;
use std::fs::File;
use std::io::{stdout, Stdout, Write};

pub use nwave_common::*;
pub use nwave_core::*;
pub use nwave_integrators as integrator;

use log::{LevelFilter, Metadata, Record};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub num_threads: usize,
    /// "stdout" or a file path
    pub log_output: String,
    pub log_level: LevelFilter,
}
impl Default for Config {
    fn default() -> Self {
        Self {
            num_threads: num_cpus::get(),
            log_output: "stdout".into(),
            log_level: LevelFilter::Info,
        }
    }
}

enum LogOutput {
    Stdout(Stdout),
    File(File),
}
struct SimpleLogger {
    output: Mutex<LogOutput>,
    level: LevelFilter,
}

impl log::Log for SimpleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let mut output = self.output.lock();
        // a failed log write has nowhere to be reported
        let _ = match &mut *output {
            LogOutput::Stdout(out) => writeln!(out, "{} - {}", record.level(), record.args()),
            LogOutput::File(file) => writeln!(file, "{} - {}", record.level(), record.args()),
        };
    }

    fn flush(&self) {
        let mut output = self.output.lock();
        let _ = match &mut *output {
            LogOutput::Stdout(out) => out.flush(),
            LogOutput::File(file) => file.flush(),
        };
    }
}

/// Sets up the global thread pool and logger. Call once, before rendering.
pub fn init(config: Config) -> Result<()> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(config.num_threads)
        .build_global()
        .map_err(|e| Error::InvalidSettings(format!("thread pool: {}", e)))?;
    let output = match config.log_output.as_str() {
        "stdout" => LogOutput::Stdout(stdout()),
        file => LogOutput::File(File::create(file)?),
    };
    let logger = SimpleLogger {
        output: Mutex::new(output),
        level: config.log_level,
    };
    log::set_boxed_logger(Box::new(logger))
        .map(|()| log::set_max_level(config.log_level))
        .map_err(|e| Error::InvalidSettings(format!("logger: {}", e)))?;
    Ok(())
}
