//! Live face, emotion and hand gesture annotation of a webcam feed.
//!
//! Every frame is mirrored, searched for faces (each labeled with its dominant emotion) and hands
//! (each labeled with its number of extended fingers and a gesture name), annotated, and shown in a
//! window until the `a` key is pressed.
//!
//! # Environment Variables
//!
//! * `SMART_VISION_MODEL_DIR`: Directory containing the ONNX networks. Defaults to `models`.
//! * `SMART_VISION_WEBCAM_NAME`: Forces the V4L2 device to use, by card name. If unset, the first
//!   device that supports a compatible image format will be used.
//! * `SMART_VISION_JPEG_BACKEND`: Configures the JPEG decoder for webcam frames. Allowed values:
//!   * `jpeg-decoder` (default): uses the [jpeg-decoder] crate via `image`.
//!   * `zune-jpeg`: uses the [zune-jpeg] crate, which is faster.
//! * `RUST_LOG`: Log filter, see [`init_logger`].
//!
//! [zune-jpeg]: https://github.com/etemesi254/zune-jpeg
//! [jpeg-decoder]: https://github.com/image-rs/jpeg-decoder/

use log::LevelFilter;

pub mod detection;
pub mod face;
pub mod gui;
pub mod hand;
pub mod image;
pub mod iter;
pub mod landmark;
pub mod models;
pub mod nn;
pub mod num;
pub mod render;
pub mod system;
pub mod timer;
pub mod video;

/// macro-use only, not part of public API.
#[doc(hidden)]
pub fn init_logger(calling_crate: &'static str) {
    let log_level = if cfg!(debug_assertions) {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter(Some(calling_crate), log_level)
        .filter(Some(env!("CARGO_CRATE_NAME")), log_level)
        .filter(Some("tract_onnx"), LevelFilter::Warn)
        .filter(Some("tract_core"), LevelFilter::Warn)
        .parse_default_env()
        .try_init()
        .ok();
}

/// Initializes logging to *stderr*.
///
/// If `cfg!(debug_assertions)` is enabled, the calling crate and this library log at *debug*
/// level, otherwise at *info* level. `RUST_LOG` overrides this.
///
/// If a global logger is already registered, this macro will do nothing.
#[macro_export]
macro_rules! init_logger {
    () => {
        $crate::init_logger(env!("CARGO_CRATE_NAME"))
    };
}
