//! Facial rig retargeting library
//!
//! Fits a rig archive's joints and skin onto a sculpted head scene, then bakes
//! per-pose normal deviations into a 16-bit atlas.

pub mod bake;
pub mod context;
pub mod correction;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod project;
pub mod retarget;
pub mod rig;
pub mod scene;
pub mod texture;

pub use context::RigContext;
pub use error::{RigError, RigResult};
pub use logging::{LogLevel, ResultExt, init_logging, send_log};
pub use pipeline::{RunReport, run_pipeline};
pub use project::{ProjectSettings, load_project_settings, save_project_settings};
