//! Cover thumbnail transcoding for devices that show covers from sidecar files.

use crate::error::FormatError;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, ImageReader, Luma, Rgb, RgbImage};
use std::io::Cursor;

/// Default JPEG quality (1-100).
pub const DEFAULT_QUALITY: u8 = 90;

/// Width of the Cybook thumbnail raster.
pub const T2B_WIDTH: u32 = 96;

/// Height of the Cybook thumbnail raster.
pub const T2B_HEIGHT: u32 = 144;

/// Transcodes source cover images into what a device expects.
pub trait CoverRenderer: Send + Sync {
    /// Render `source` as JPEG bytes at `height` pixels.
    ///
    /// With `width` set the cover is fitted inside a `width x height` black frame,
    /// otherwise the width follows the aspect ratio.
    fn render_cover(
        &self,
        source: &[u8],
        width: Option<u32>,
        height: u32,
    ) -> Result<Vec<u8>, FormatError>;
}

/// Cover renderer backed by the `image` crate.
#[derive(Debug, Clone)]
pub struct ImageCoverRenderer {
    /// JPEG quality (1-100).
    pub quality: u8,
}

impl Default for ImageCoverRenderer {
    fn default() -> Self {
        Self {
            quality: DEFAULT_QUALITY,
        }
    }
}

impl CoverRenderer for ImageCoverRenderer {
    fn render_cover(
        &self,
        source: &[u8],
        width: Option<u32>,
        height: u32,
    ) -> Result<Vec<u8>, FormatError> {
        if height == 0 || width == Some(0) {
            return Err(FormatError::InvalidFormat(
                "cover dimensions must be positive".into(),
            ));
        }
        let img = decode(source)?;

        let rendered = match width {
            Some(width) => {
                let thumb = img.thumbnail(width, height).to_rgb8();
                let mut canvas = RgbImage::from_pixel(width, height, Rgb([0, 0, 0]));
                let x = width.saturating_sub(thumb.width()) / 2;
                let y = height.saturating_sub(thumb.height()) / 2;
                image::imageops::overlay(&mut canvas, &thumb, x as i64, y as i64);
                DynamicImage::ImageRgb8(canvas)
            }
            None => {
                let scale = height as f32 / img.height().max(1) as f32;
                let new_width = ((img.width() as f32 * scale).round() as u32).max(1);
                img.resize_exact(new_width, height, FilterType::Lanczos3)
            }
        };

        encode_jpeg(&rendered, self.quality)
    }
}

fn decode(data: &[u8]) -> Result<DynamicImage, FormatError> {
    Ok(ImageReader::new(Cursor::new(data))
        .with_guessed_format()?
        .decode()?)
}

fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, FormatError> {
    let mut jpeg_data = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut jpeg_data, quality);
    img.to_rgb8().write_with_encoder(encoder)?;
    Ok(jpeg_data)
}

/// Generate a plain cover for books that have none, coloured from the title.
pub fn generate_default_cover(title: &str) -> Vec<u8> {
    let width = 400u32;
    let height = 600u32;

    let hash = title
        .bytes()
        .fold(0u32, |acc, b| acc.wrapping_add(b as u32));
    let hue = (hash % 360) as f32;
    let (r, g, b) = hsv_to_rgb(hue, 0.4, 0.5);

    let mut img = RgbImage::new(width, height);
    for y in 0..height {
        let factor = y as f32 / height as f32;
        let shade = |c: u8| (c as f32 * (1.0 - factor * 0.3)) as u8;
        for x in 0..width {
            img.put_pixel(x, y, Rgb([shade(r), shade(g), shade(b)]));
        }
    }

    let mut png_data = Vec::new();
    img.write_to(&mut Cursor::new(&mut png_data), image::ImageFormat::Png)
        .unwrap_or_default();

    png_data
}

/// Convert HSV to RGB.
fn hsv_to_rgb(h: f32, s: f32, v: f32) -> (u8, u8, u8) {
    let c = v * s;
    let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
    let m = v - c;

    let (r, g, b) = match (h / 60.0) as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };

    (
        ((r + m) * 255.0) as u8,
        ((g + m) * 255.0) as u8,
        ((b + m) * 255.0) as u8,
    )
}

/// Map an 8-bit grey level onto the four levels of the T2B format.
fn reduce_level(c: u8) -> u8 {
    match c {
        0..=64 => 0,
        65..=128 => 1,
        129..=192 => 2,
        _ => 3,
    }
}

/// Encode a Cybook `.t2b` thumbnail: 96x144, 2 bits per pixel, 4 pixels per byte.
///
/// Without a usable cover the raster is all white.
pub fn encode_t2b(cover: Option<&[u8]>) -> Vec<u8> {
    let pixel_count = (T2B_WIDTH * T2B_HEIGHT) as usize;

    let raster = cover.and_then(|data| match decode(data) {
        Ok(img) => Some(img),
        Err(e) => {
            tracing::warn!(error = %e, "Unreadable cover, writing blank T2B thumbnail");
            None
        }
    });
    let Some(img) = raster else {
        return vec![0xFF; pixel_count / 4];
    };

    let thumb = img.thumbnail(T2B_WIDTH, T2B_HEIGHT).to_luma8();
    let mut canvas = GrayImage::from_pixel(T2B_WIDTH, T2B_HEIGHT, Luma([255]));
    let x = T2B_WIDTH.saturating_sub(thumb.width()) / 2;
    let y = T2B_HEIGHT.saturating_sub(thumb.height()) / 2;
    image::imageops::overlay(&mut canvas, &thumb, x as i64, y as i64);

    canvas
        .as_raw()
        .chunks(4)
        .map(|px| {
            px.iter()
                .fold(0u8, |acc, &c| (acc << 2) | reduce_level(c))
        })
        .collect()
}
