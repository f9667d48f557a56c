use std::path::PathBuf;
use std::process::exit;

use clap::Parser;
use nwave::integrator::{Integrator, WavefrontIntegrator};
use nwave::util::{enable_progress_bar, profile_fn};
use nwave::*;

#[derive(Parser, Debug)]
#[command(name = "nwave-cli", about = "Wavefront path tracer with learned directional sampling")]
struct Args {
    /// runtime config (JSON): threads, log output and level
    #[arg(long)]
    config: Option<PathBuf>,
    /// render settings (JSON); defaults are used when omitted
    #[arg(short, long)]
    settings: Option<PathBuf>,
    /// built-in scene: cornell or cornell-sky
    #[arg(long, default_value = "cornell")]
    scene: String,
    #[arg(long, default_value_t = 512)]
    width: u32,
    #[arg(long, default_value_t = 512)]
    height: u32,
    /// frames to accumulate, overrides renderer.max_samples
    #[arg(short = 'n', long)]
    frames: Option<u32>,
    #[arg(short, long)]
    threads: Option<usize>,
    /// .png or .exr
    #[arg(short, long, default_value = "out.png")]
    output: PathBuf,
    /// turn neural sampling on regardless of the settings file
    #[arg(long)]
    neural: bool,
    /// redirect logging to a file
    #[arg(long)]
    log_output: Option<String>,
    /// only log errors
    #[arg(short, long)]
    quiet: bool,
}

fn run(args: Args) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => api::load_config(path)?,
        None => Config::default(),
    };
    if let Some(t) = args.threads {
        config.num_threads = t;
    }
    if let Some(output) = &args.log_output {
        config.log_output = output.clone();
    }
    if args.quiet {
        config.log_level = log::LevelFilter::Error;
        enable_progress_bar(false);
    }
    nwave::init(config)?;

    let mut settings = match &args.settings {
        Some(path) => api::load_settings(path)?,
        None => integrator::RenderSettings::default(),
    };
    if args.neural {
        settings.neural.active = true;
    }
    let frames = args.frames.unwrap_or(settings.renderer.max_samples);
    let scene = api::demo_scene(&args.scene, uvec2(args.width, args.height))?;
    let mut integrator = WavefrontIntegrator::new(&scene, settings)?;
    log::info!("rendering with {} threads", rayon::current_num_threads());
    let (rendered, time) = profile_fn(|| integrator.render(&scene, frames));
    log::info!(
        "{} frames took {:.3}s ({:.1} ms/frame)",
        rendered,
        time,
        time * 1000.0 / rendered.max(1) as f64
    );
    if let Some(oracle) = integrator.oracle() {
        log::info!("oracle trained for {} steps", oracle.training_steps());
    }
    api::write_image(integrator.film(), &args.output)?;
    log::info!("wrote {}", args.output.display());
    Ok(())
}

fn main() {
    if let Err(e) = run(Args::parse()) {
        eprintln!("error: {}", e);
        exit(1);
    }
}
