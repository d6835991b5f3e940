//! Post-capture image processing: downscaling and format conversion

use crate::{OutputFormat, RenderError, Viewport};
use image::codecs::avif::AvifEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::imageops::FilterType;
use image::DynamicImage;

/// Quality used when a lossy format is requested without one
const FALLBACK_QUALITY: u8 = 80;

/// AVIF encoder speed, 1 (slowest) to 10 (fastest)
const AVIF_SPEED: u8 = 8;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EncodeOptions {
    pub format: OutputFormat,
    /// `None` for lossless output
    pub quality: Option<u8>,
    /// Exact output size, when the capture has to be downscaled
    pub resize_to: Option<(u32, u32)>,
}

/// Output size for a viewport captured at `scale`, never below 1x1
pub fn scaled_dimensions(viewport: Viewport, scale: f64) -> (u32, u32) {
    let scale_side = |side: u32| ((side as f64 * scale).round() as u32).max(1);
    (scale_side(viewport.width), scale_side(viewport.height))
}

/// Convert a lossless PNG capture into the requested output
pub fn process(png: &[u8], options: &EncodeOptions) -> Result<Vec<u8>, RenderError> {
    if options.format == OutputFormat::Png && options.resize_to.is_none() {
        return Ok(png.to_vec());
    }

    let mut img = image::load_from_memory(png)?;

    if let Some((width, height)) = options.resize_to {
        if (img.width(), img.height()) != (width, height) {
            img = img.resize_exact(width, height, FilterType::Lanczos3);
        }
    }

    encode(&img, options.format, options.quality)
}

pub fn encode(
    img: &DynamicImage,
    format: OutputFormat,
    quality: Option<u8>,
) -> Result<Vec<u8>, RenderError> {
    let quality = quality.unwrap_or(FALLBACK_QUALITY).clamp(1, 100);
    let mut buffer = Vec::new();

    match format {
        OutputFormat::Png => {
            img.write_with_encoder(PngEncoder::new(&mut buffer))?;
        }
        OutputFormat::Jpeg => {
            // JPEG has no alpha channel
            let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
            rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut buffer, quality))?;
        }
        OutputFormat::Webp => {
            let rgba = img.to_rgba8();
            let encoded = webp::Encoder::from_rgba(&rgba, rgba.width(), rgba.height())
                .encode(quality as f32);
            buffer.extend_from_slice(&encoded);
        }
        OutputFormat::Avif => {
            let rgba = DynamicImage::ImageRgba8(img.to_rgba8());
            rgba.write_with_encoder(AvifEncoder::new_with_speed_quality(
                &mut buffer,
                AVIF_SPEED,
                quality,
            ))?;
        }
    }

    if buffer.is_empty() {
        return Err(RenderError::EncodeFailed(format!("{format} encoder produced no data")));
    }

    Ok(buffer)
}
