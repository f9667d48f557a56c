pub use bitflags;
pub use bytemuck;
pub use exr;
pub use glam;
pub use image;
pub use indicatif;
pub use log;
pub use num_cpus;
pub use parking_lot;
pub use rayon;
pub use serde;
pub use serde_json;
pub use thiserror;
