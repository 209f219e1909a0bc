//! V4L2 webcam access.
//!
//! Only V4L2 `VIDEO_CAPTURE` devices yielding JFIF JPEG or Motion JPEG frames are supported.

use std::{cmp::Reverse, env};

use anyhow::{anyhow, bail};
use linuxvideo::{
    format::{FrameIntervals, FrameSizes, PixFormat, Pixelformat},
    stream::ReadStream,
    BufType, CapabilityFlags, Device, Fract,
};

use crate::image::{Image, JpegBackend, Resolution};
use crate::timer::Timer;

use super::FrameSource;

const ENV_VAR_WEBCAM_NAME: &str = "SMART_VISION_WEBCAM_NAME";

/// Format negotiation options.
#[derive(Debug, Clone)]
pub struct WebcamOptions {
    name: Option<String>,
    resolution: Option<Resolution>,
    fps: Option<u32>,
    jpeg_backend: JpegBackend,
}

impl Default for WebcamOptions {
    fn default() -> Self {
        Self {
            name: None,
            resolution: Some(Resolution::new(640, 480)),
            fps: Some(30),
            jpeg_backend: JpegBackend::default(),
        }
    }
}

impl WebcamOptions {
    /// Sets the name of the webcam device to open.
    ///
    /// If no webcam with the given name can be found, opening the webcam will result in an error.
    #[inline]
    pub fn name(self, name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..self
        }
    }

    /// Sets the desired image resolution.
    ///
    /// A lower resolution might be selected if the webcam cannot deliver the desired resolution.
    #[inline]
    pub fn resolution(self, resolution: Resolution) -> Self {
        Self {
            resolution: Some(resolution),
            ..self
        }
    }

    /// Sets the desired frame rate.
    #[inline]
    pub fn fps(self, fps: u32) -> Self {
        Self {
            fps: Some(fps),
            ..self
        }
    }

    /// Selects the decoder used for the webcam's JPEG frames.
    #[inline]
    pub fn jpeg_backend(self, jpeg_backend: JpegBackend) -> Self {
        Self {
            jpeg_backend,
            ..self
        }
    }
}

#[derive(Clone, Copy)]
struct FrameFormat {
    resolution: Resolution,
    frame_interval: Fract,
}

fn negotiate_format(
    device: &Device,
    options: &WebcamOptions,
) -> anyhow::Result<(PixFormat, Fract)> {
    let mut pixel_format = None;
    for format in device.formats(BufType::VIDEO_CAPTURE) {
        let format = format?;
        if format.pixelformat() == Pixelformat::JPEG || format.pixelformat() == Pixelformat::MJPG {
            pixel_format = Some(format.pixelformat());
            break;
        }
    }

    let Some(pixel_format) = pixel_format else {
        bail!("no supported pixel format found");
    };

    let mut formats = Vec::new();
    match device.frame_sizes(pixel_format)? {
        FrameSizes::Discrete(sizes) => {
            for size in sizes {
                let intervals =
                    match device.frame_intervals(pixel_format, size.width(), size.height())? {
                        FrameIntervals::Discrete(intervals) => intervals,
                        FrameIntervals::Stepwise(_) | FrameIntervals::Continuous(_) => {
                            bail!("stepwise or continuous frame rates are not supported")
                        }
                    };
                for rate in intervals {
                    formats.push(FrameFormat {
                        resolution: Resolution::new(size.width(), size.height()),
                        frame_interval: *rate.fract(),
                    });
                }
            }
        }
        FrameSizes::Stepwise(_) | FrameSizes::Continuous(_) => {
            bail!("stepwise or continuous resolutions are not supported");
        }
    }

    let fmt = pick_format(&formats, options.resolution, options.fps)
        .ok_or_else(|| anyhow!("failed to negotiate a webcam format"))?;
    Ok((
        PixFormat::new(
            fmt.resolution.width(),
            fmt.resolution.height(),
            pixel_format,
        ),
        fmt.frame_interval,
    ))
}

/// Picks the smallest format that satisfies the desired resolution and frame rate.
///
/// Falls back to ignoring the frame rate, then to ignoring the resolution too, in which case the
/// largest available format is chosen.
fn pick_format(
    formats: &[FrameFormat],
    resolution: Option<Resolution>,
    fps: Option<u32>,
) -> Option<FrameFormat> {
    let satisfies = |fmt: &&FrameFormat, resolution: Option<Resolution>, fps: Option<u32>| {
        resolution.map_or(true, |res| {
            fmt.resolution.width() >= res.width() && fmt.resolution.height() >= res.height()
        }) && fps.map_or(true, |fps| {
            (1.0 / fmt.frame_interval.as_f32()).round() >= fps as f32
        })
    };

    let smallest = |resolution, fps| {
        formats
            .iter()
            .filter(|fmt| satisfies(fmt, resolution, fps))
            .min_by_key(|fmt| (fmt.resolution.num_pixels(), fmt.frame_interval))
            .copied()
    };

    smallest(resolution, fps)
        .or_else(|| {
            log::debug!("no format with {resolution:?} @ {fps:?} FPS, ignoring frame rate");
            smallest(resolution, None)
        })
        .or_else(|| {
            formats
                .iter()
                .max_by_key(|fmt| (fmt.resolution.num_pixels(), Reverse(fmt.frame_interval)))
                .copied()
        })
}

/// A webcam yielding a stream of [`Image`]s.
pub struct Webcam {
    /// [`None`] once the device has been released.
    stream: Option<ReadStream>,
    width: u32,
    height: u32,
    jpeg_backend: JpegBackend,
    t_dequeue: Timer,
    t_decode: Timer,
}

impl Webcam {
    /// Opens the first supported webcam found.
    ///
    /// This function can block for a significant amount of time while the webcam initializes (on
    /// the order of hundreds of milliseconds).
    pub fn open(options: WebcamOptions) -> anyhow::Result<Self> {
        if let Ok(name) = env::var(ENV_VAR_WEBCAM_NAME) {
            log::debug!("webcam override: `{ENV_VAR_WEBCAM_NAME}` is set to '{name}'");
        }
        for res in linuxvideo::list()? {
            match res {
                Ok(dev) => match Self::open_impl(dev, &options) {
                    Ok(Some(webcam)) => return Ok(webcam),
                    Ok(None) => {}
                    Err(e) => {
                        log::debug!("{e}");
                    }
                },
                Err(e) => {
                    log::warn!("{e}");
                }
            }
        }

        bail!("no supported webcam device found")
    }

    fn open_impl(dev: Device, options: &WebcamOptions) -> anyhow::Result<Option<Self>> {
        let caps = dev.capabilities()?;
        let cam_name_from_env = env::var(ENV_VAR_WEBCAM_NAME).ok();
        if let Some(name) = options.name.as_deref().or(cam_name_from_env.as_deref()) {
            if caps.card() != name {
                return Ok(None);
            }
        }

        let cap_flags = caps.device_capabilities();
        let path = dev.path()?;
        log::debug!(
            "device {} ({}) capabilities: {:?}",
            caps.card(),
            path.display(),
            cap_flags,
        );

        if !cap_flags.contains(CapabilityFlags::VIDEO_CAPTURE) {
            return Ok(None);
        }

        let (pixfmt, fract) = negotiate_format(&dev, options)?;
        let capture = dev.video_capture(pixfmt)?;
        let format = capture.format();
        let width = format.width();
        let height = format.height();
        let actual = capture.set_frame_interval(fract)?;

        log::info!(
            "opened {} ({}), {}x{} @ {:.1}Hz",
            caps.card(),
            path.display(),
            width,
            height,
            1.0 / actual.as_f32(),
        );

        let stream = capture.into_stream(2)?;

        Ok(Some(Self {
            stream: Some(stream),
            width,
            height,
            jpeg_backend: options.jpeg_backend,
            t_dequeue: Timer::new("dequeue"),
            t_decode: Timer::new("decode"),
        }))
    }

    /// Reads the next frame from the camera.
    ///
    /// If no frame is available, this method will block until one is. Frames that fail to decode
    /// are replaced by a blank image.
    pub fn read(&mut self) -> anyhow::Result<Image> {
        let Some(stream) = &mut self.stream else {
            bail!("webcam has been released");
        };

        let dequeue_guard = self.t_dequeue.start();
        let (width, height, backend) = (self.width, self.height, self.jpeg_backend);
        let t_decode = &self.t_decode;
        stream
            .dequeue(|buf| {
                drop(dequeue_guard);
                let image = match t_decode.time(|| Image::decode_jpeg(&buf, backend)) {
                    Ok(image) => image,
                    Err(e) => {
                        // Even good webcams occasionally produce corrupted MJPG frames. Skipping
                        // them causes latency spikes, so hand back a blank frame instead.
                        log::error!("webcam decode error: {e}");
                        Image::new(width, height)
                    }
                };
                Ok(image)
            })
            .map_err(Into::into)
    }
}

impl FrameSource for Webcam {
    fn read(&mut self) -> anyhow::Result<Image> {
        Webcam::read(self)
    }

    fn release(&mut self) {
        if self.stream.take().is_some() {
            log::info!("webcam released");
        }
    }

    fn timers(&self) -> Vec<&Timer> {
        vec![&self.t_dequeue, &self.t_decode]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(width: u32, height: u32, fps: u32) -> FrameFormat {
        FrameFormat {
            resolution: Resolution::new(width, height),
            frame_interval: Fract::new(1, fps),
        }
    }

    fn formats() -> Vec<FrameFormat> {
        vec![
            format(320, 240, 30),
            format(640, 480, 15),
            format(640, 480, 30),
            format(1280, 720, 10),
        ]
    }

    /// Returns the resolution and frame rate of the picked format.
    fn pick(resolution: Option<Resolution>, fps: Option<u32>) -> Option<(Resolution, u32)> {
        pick_format(&formats(), resolution, fps).map(|fmt| {
            let fps = (1.0 / fmt.frame_interval.as_f32()).round() as u32;
            (fmt.resolution, fps)
        })
    }

    #[test]
    fn picks_smallest_matching_format() {
        let fmt = pick(Some(Resolution::new(640, 480)), Some(30));
        assert_eq!(fmt, Some((Resolution::new(640, 480), 30)));
    }

    #[test]
    fn drops_frame_rate_before_resolution() {
        let fmt = pick(Some(Resolution::new(1280, 720)), Some(30));
        assert_eq!(fmt, Some((Resolution::new(1280, 720), 10)));
    }

    #[test]
    fn falls_back_to_largest_format() {
        let fmt = pick(Some(Resolution::new(4000, 3000)), None);
        assert_eq!(fmt, Some((Resolution::new(1280, 720), 10)));
        assert!(pick_format(&[], None, None).is_none());
    }

    #[test]
    fn options_builder() {
        let options = WebcamOptions::default()
            .name("Integrated Camera")
            .fps(60)
            .jpeg_backend(JpegBackend::ZuneJpeg);
        assert_eq!(options.name.as_deref(), Some("Integrated Camera"));
        assert_eq!(options.fps, Some(60));
        assert_eq!(options.resolution, Some(Resolution::new(640, 480)));
        assert_eq!(options.jpeg_backend, JpegBackend::ZuneJpeg);
    }
}
