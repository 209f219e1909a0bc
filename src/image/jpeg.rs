use std::env::{self, VarError};

use anyhow::{anyhow, bail};
use image::ImageBuffer;

use super::Image;

const BACKEND_VAR: &str = "SMART_VISION_JPEG_BACKEND";

/// The pure-Rust JPEG decoders that can decode webcam frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JpegBackend {
    /// Uses the `image` crate's JPEG support (backed by `jpeg-decoder`). Robust but slow.
    #[default]
    JpegDecoder,
    /// Uses the `zune-jpeg` crate, a pure-Rust JPEG decoder somewhat faster than `jpeg-decoder`.
    ZuneJpeg,
}

impl JpegBackend {
    /// Reads the backend to use from the `SMART_VISION_JPEG_BACKEND` environment variable.
    ///
    /// Accepted values are `jpeg-decoder` and `zune-jpeg`. Unset selects the default backend.
    pub fn from_env() -> anyhow::Result<Self> {
        let backend = match env::var(BACKEND_VAR) {
            Ok(v) => Self::parse(&v)?,
            Err(VarError::NotPresent) => Self::default(),
            Err(VarError::NotUnicode(s)) => {
                bail!(
                    "invalid value set for `{BACKEND_VAR}` variable: {}",
                    s.to_string_lossy()
                )
            }
        };
        log::debug!("using JPEG decode backend: {:?}", backend);
        Ok(backend)
    }

    fn parse(value: &str) -> anyhow::Result<Self> {
        match value {
            "jpeg-decoder" => Ok(Self::JpegDecoder),
            "zune-jpeg" => Ok(Self::ZuneJpeg),
            _ => bail!("invalid value set for `{BACKEND_VAR}` variable: '{value}'"),
        }
    }
}

pub(super) fn decode_jpeg(data: &[u8], backend: JpegBackend) -> anyhow::Result<Image> {
    let buf = match backend {
        JpegBackend::JpegDecoder => {
            image::load_from_memory_with_format(data, image::ImageFormat::Jpeg)?.to_rgba8()
        }
        JpegBackend::ZuneJpeg => {
            use zune_jpeg::zune_core::colorspace::ColorSpace;
            use zune_jpeg::zune_core::options::DecoderOptions;

            let mut decomp = zune_jpeg::JpegDecoder::new_with_options(
                DecoderOptions::new_fast().jpeg_set_out_colorspace(ColorSpace::RGBA),
                data,
            );
            decomp.decode_headers()?;
            match decomp.get_output_colorspace() {
                Some(ColorSpace::RGBA) => {}
                other => bail!("unsupported colorspace {other:?} (expected RGBA)"),
            }

            let size = decomp
                .output_buffer_size()
                .ok_or_else(|| anyhow!("JPEG headers not decoded"))?;
            let mut buf = vec![0; size];
            decomp.decode_into(&mut buf)?;
            let (width, height) = decomp
                .dimensions()
                .ok_or_else(|| anyhow!("JPEG headers not decoded"))?;
            ImageBuffer::from_raw(width.into(), height.into(), buf)
                .ok_or_else(|| anyhow!("decoded JPEG has unexpected buffer size"))?
        }
    };

    Ok(Image { buf })
}
