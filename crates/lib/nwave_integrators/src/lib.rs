pub mod adaptive;
pub mod debug;
pub mod mixture;
pub mod queue;
pub mod recorder;
pub mod settings;
pub mod shading;
pub mod strategy;
pub mod wavefront;
pub mod work_items;

use nwave_core::scene::Scene;

pub use settings::*;
pub use wavefront::{FrameStats, Stage, WavefrontIntegrator};

pub trait Integrator {
    /// Renders up to `frames` frames into the integrator's frame buffer and
    /// returns how many were rendered before a stop request.
    fn render(&mut self, scene: &Scene, frames: u32) -> u32;
}
