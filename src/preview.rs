//! JPEG previews for the web UI
//!
//! The raw preview shows the perspective frame with a red crosshair at the
//! vanishing point, which is what the user lines up with the road. The
//! bird's-eye preview is the remapped frame as-is.

use anyhow::Result;
use image::{ImageBuffer, ImageOutputFormat, Luma, Rgb, RgbImage};
use imageproc::drawing::draw_line_segment_mut;
use std::io::Cursor;

use crate::color::gray_to_rgb;
use crate::frame::GrayFrame;
use crate::geometry::VanishingPoint;

/// Half length of the crosshair arms (pixels)
const CROSSHAIR_HALF_LENGTH: f32 = 10.0;

const CROSSHAIR_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

/// Default JPEG quality for previews
pub const PREVIEW_QUALITY: u8 = 70;

/// Draw a `+` centred on the vanishing point
pub fn draw_crosshair(img: &mut RgbImage, vp: VanishingPoint) {
    let x = vp.x as f32;
    let y = vp.y as f32;
    draw_line_segment_mut(
        img,
        (x - CROSSHAIR_HALF_LENGTH, y),
        (x + CROSSHAIR_HALF_LENGTH, y),
        CROSSHAIR_COLOR,
    );
    draw_line_segment_mut(
        img,
        (x, y - CROSSHAIR_HALF_LENGTH),
        (x, y + CROSSHAIR_HALF_LENGTH),
        CROSSHAIR_COLOR,
    );
}

/// Perspective frame with the crosshair overlay, as RGB
pub fn annotate_source(frame: &GrayFrame, vp: VanishingPoint) -> Result<RgbImage> {
    let mut rgb = vec![0u8; frame.size().area() * 3];
    gray_to_rgb(frame.as_slice(), &mut rgb);

    let mut img: RgbImage = ImageBuffer::from_raw(frame.width() as u32, frame.height() as u32, rgb)
        .ok_or_else(|| anyhow::anyhow!("Failed to create image buffer"))?;
    draw_crosshair(&mut img, vp);
    Ok(img)
}

/// Encode the annotated perspective frame to JPEG
pub fn encode_source_preview(frame: &GrayFrame, vp: VanishingPoint, quality: u8) -> Result<Vec<u8>> {
    let img = annotate_source(frame, vp)?;

    let mut jpeg_data = Vec::new();
    img.write_to(&mut Cursor::new(&mut jpeg_data), ImageOutputFormat::Jpeg(quality))?;
    Ok(jpeg_data)
}

/// Encode a grayscale frame to JPEG
pub fn encode_gray_jpeg(frame: &GrayFrame, quality: u8) -> Result<Vec<u8>> {
    let img: ImageBuffer<Luma<u8>, _> = ImageBuffer::from_raw(
        frame.width() as u32,
        frame.height() as u32,
        frame.as_slice().to_vec(),
    )
    .ok_or_else(|| anyhow::anyhow!("Failed to create image buffer"))?;

    let mut jpeg_data = Vec::new();
    img.write_to(&mut Cursor::new(&mut jpeg_data), ImageOutputFormat::Jpeg(quality))?;
    Ok(jpeg_data)
}
