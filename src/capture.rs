//! Video capture from V4L2 devices
//!
//! This module captures frames from a forward-facing camera, reduces them to
//! luma at the source size the mapping table was built for, remaps them into
//! the bird's-eye view and writes the result to a v4l2loopback device.
//!
//! Performance notes:
//! - MJPEG is decoded straight to grayscale with turbojpeg (libjpeg-turbo SIMD)
//! - YUYV luma is read from the Y samples, no color conversion
//! - All frame buffers are allocated once before the loop

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use crate::color::{bgr_to_luma, rgb_to_luma};
use crate::config::{CaptureFormat, OutputConfig, VideoConfig};
use crate::frame::{GrayFrame, ImageSize};
use crate::output::VirtualCamera;
use crate::remap;
use crate::server::AppState;

/// Thread-local turbojpeg decompressor for hardware-accelerated MJPEG decoding
thread_local! {
    static JPEG_DECOMPRESSOR: std::cell::RefCell<Option<turbojpeg::Decompressor>> =
        std::cell::RefCell::new(turbojpeg::Decompressor::new().ok());
}

/// Input pixel layouts the pipeline can reduce to luma
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InputFormat {
    Mjpeg,
    Yuyv,
    Grey,
    Rgb,
    Bgr,
}

impl InputFormat {
    fn from_fourcc(repr: &[u8; 4]) -> Option<Self> {
        match repr {
            b"MJPG" => Some(InputFormat::Mjpeg),
            b"YUYV" => Some(InputFormat::Yuyv),
            b"GREY" => Some(InputFormat::Grey),
            b"RGB3" => Some(InputFormat::Rgb),
            b"BGR3" => Some(InputFormat::Bgr),
            _ => None,
        }
    }
}

/// Fourcc codes to try, the configured preference first
fn preferred_formats(preference: CaptureFormat) -> Vec<&'static [u8; 4]> {
    let first: &'static [u8; 4] = match preference {
        CaptureFormat::Mjpeg => b"MJPG",
        CaptureFormat::Yuyv => b"YUYV",
        CaptureFormat::Grey => b"GREY",
    };

    let mut formats = vec![first];
    for fourcc in [b"MJPG", b"YUYV", b"GREY", b"RGB3", b"BGR3"] {
        if fourcc != first {
            formats.push(fourcc);
        }
    }
    formats
}

/// Run the video capture and processing pipeline
pub fn run_pipeline(video: &VideoConfig, output_cfg: &OutputConfig, state: Arc<AppState>) -> Result<()> {
    info!("=== BirdsEye Video Pipeline ===");
    info!("Input device: {}", video.input_device);
    info!(
        "Requested resolution: {}x{} @ {} fps",
        video.width, video.height, video.fps
    );

    let dev = Device::with_path(&video.input_device)
        .with_context(|| format!("Failed to open input device: {}", video.input_device))?;

    let caps = dev.query_caps()
        .context("Failed to query device capabilities")?;
    info!("Camera: {} (driver: {})", caps.card, caps.driver);

    let format = configure_capture_format(&dev, video)?;
    let input_format = InputFormat::from_fourcc(&format.fourcc.repr).with_context(|| {
        format!(
            "Unsupported capture format {:?}",
            String::from_utf8_lossy(&format.fourcc.repr)
        )
    })?;
    info!(
        "Capture format: {}x{} {:?}",
        format.width, format.height, input_format
    );

    if let Err(e) = set_frame_rate(&dev, video.fps) {
        warn!("Could not set frame rate to {} fps: {}", video.fps, e);
    }

    let src_size = state.source_size();
    let dst_size = state.destination_size();

    let mut output = if output_cfg.device.is_empty() {
        info!("No output device configured, bird's-eye frames go to the preview only");
        None
    } else {
        let mut cam = VirtualCamera::new(&output_cfg.device, dst_size);
        cam.open()
            .with_context(|| format!("Failed to open output device: {}", output_cfg.device))?;
        info!("Output: {} {:?} at {}", output_cfg.device, cam.format(), dst_size);
        Some(cam)
    };

    // Using 4 buffers for smooth capture pipeline
    let mut stream = Stream::with_buffers(&dev, Type::VideoCapture, 4)
        .context("Failed to create capture stream")?;

    // Allocate buffers once
    let capture_size = ImageSize::new(format.width as usize, format.height as usize);
    let mut luma_buffer = vec![0u8; capture_size.area()];
    let mut src_frame = GrayFrame::filled(src_size, 0);
    let mut dst_frame = GrayFrame::filled(dst_size, 0);

    // Performance tracking
    let mut frame_count = 0u64;
    let mut last_stats_time = Instant::now();
    let stats_interval = Duration::from_secs(10);

    if input_format == InputFormat::Mjpeg {
        JPEG_DECOMPRESSOR.with(|_| {});
        info!("TurboJPEG decompressor initialized");
    }

    info!("Starting capture loop...");

    loop {
        let (buf, _meta) = stream.next()
            .context("Failed to capture frame")?;

        // Reduce to luma at the table's source size
        match input_format {
            InputFormat::Mjpeg => {
                if decode_mjpeg_luma(buf, &mut luma_buffer, capture_size).is_err() {
                    if frame_count % 100 == 0 {
                        warn!("Failed to decode MJPEG frame");
                    }
                    continue;
                }
                src_frame.resample_from(&luma_buffer, capture_size, 1);
            }
            InputFormat::Yuyv => src_frame.resample_from(buf, capture_size, 2),
            InputFormat::Grey => src_frame.resample_from(buf, capture_size, 1),
            InputFormat::Rgb => {
                rgb_to_luma(buf, &mut luma_buffer);
                src_frame.resample_from(&luma_buffer, capture_size, 1);
            }
            InputFormat::Bgr => {
                bgr_to_luma(buf, &mut luma_buffer);
                src_frame.resample_from(&luma_buffer, capture_size, 1);
            }
        }

        // The table may be swapped by the server at any time; hold one
        // snapshot for the whole frame
        let table = state.table();

        if state.calibration_enabled() {
            remap::apply(&table, &src_frame, &mut dst_frame)
                .context("Mapping table does not match pipeline frame sizes")?;
        } else {
            dst_frame.resample_from(src_frame.as_slice(), src_size, 1);
        }

        if let Some(cam) = output.as_mut() {
            if let Err(e) = cam.write_frame_gray(dst_frame.as_slice()) {
                if frame_count % 100 == 0 {
                    warn!("Failed to write to output: {}", e);
                }
            }
        }

        // Update previews for web UI (only if clients are polling)
        if state.should_encode_preview() && frame_count % 3 == 0 {
            let preview_start = Instant::now();
            state.update_preview(&dst_frame);
            state.update_raw_preview(&src_frame, state.vanishing_point());
            debug!("Preview encode took {}us", preview_start.elapsed().as_micros());
        }

        frame_count += 1;

        // Log performance stats periodically
        if last_stats_time.elapsed() >= stats_interval {
            let elapsed = last_stats_time.elapsed().as_secs_f64();
            let fps_actual = frame_count as f64 / elapsed;
            state.record_frames(frame_count, fps_actual);

            match output.as_ref() {
                Some(cam) if cam.dropped_count() > 0 => {
                    warn!("Performance: {:.1} fps ({} frames in {:.1}s, {} written, {} dropped by a slow consumer)",
                        fps_actual, frame_count, elapsed, cam.frame_count(), cam.dropped_count());
                }
                Some(cam) => {
                    info!("Performance: {:.1} fps ({} frames in {:.1}s, {} written)",
                        fps_actual, frame_count, elapsed, cam.frame_count());
                }
                None => {
                    info!("Performance: {:.1} fps ({} frames in {:.1}s)",
                        fps_actual, frame_count, elapsed);
                }
            }
            frame_count = 0;
            last_stats_time = Instant::now();
        }
    }
}

/// Configure the capture format, trying preferred formats in order
fn configure_capture_format(dev: &Device, video: &VideoConfig) -> Result<v4l::Format> {
    let (width, height) = (video.width, video.height);

    let formats = dev.enum_formats()
        .context("Failed to enumerate formats")?;

    info!("Available formats:");
    for fmt in &formats {
        info!("  {:?}: {}", String::from_utf8_lossy(&fmt.fourcc.repr), fmt.description);
    }

    for preferred in preferred_formats(video.format) {
        let fourcc = FourCC::new(preferred);
        if formats.iter().any(|f| f.fourcc == fourcc) {
            info!("Trying format: {:?} at {}x{}", String::from_utf8_lossy(preferred), width, height);

            let mut format = dev.format()
                .context("Failed to get current format")?;

            format.width = width;
            format.height = height;
            format.fourcc = fourcc;

            match dev.set_format(&format) {
                Ok(actual) => {
                    info!("Successfully set format to {}x{} {:?}",
                        actual.width, actual.height,
                        String::from_utf8_lossy(&actual.fourcc.repr));
                    return Ok(actual);
                }
                Err(e) => {
                    warn!("Could not set format {:?} at {}x{}: {}",
                        String::from_utf8_lossy(preferred), width, height, e);
                }
            }
        }
    }

    // Fall back to whatever the device gives us
    let current = dev.format().context("Failed to get device format")?;
    info!("Using device's current format: {}x{} {:?}",
        current.width, current.height,
        String::from_utf8_lossy(&current.fourcc.repr));
    Ok(current)
}

/// Set the frame rate on the capture device
fn set_frame_rate(dev: &Device, fps: u32) -> Result<()> {
    let mut params = dev.params()
        .context("Failed to get parameters")?;

    params.interval = v4l::Fraction::new(1, fps);

    dev.set_params(&params)
        .context("Failed to set parameters")?;

    let actual_params = dev.params().context("Failed to read back parameters")?;
    info!("Set frame interval to: {}/{} ({:.1} fps requested: {})",
        actual_params.interval.numerator,
        actual_params.interval.denominator,
        actual_params.interval.denominator as f64 / actual_params.interval.numerator.max(1) as f64,
        fps);

    Ok(())
}

/// Decode an MJPEG frame to luma using turbojpeg (hardware-accelerated via libjpeg-turbo)
/// Falls back to software jpeg-decoder if turbojpeg fails
fn decode_mjpeg_luma(mjpeg_data: &[u8], luma: &mut [u8], size: ImageSize) -> Result<(), ()> {
    let turbo_result = JPEG_DECOMPRESSOR.with(|decomp| {
        if let Some(ref mut decompressor) = *decomp.borrow_mut() {
            if let Ok(header) = decompressor.read_header(mjpeg_data) {
                if header.width != size.width || header.height != size.height {
                    return None;
                }

                let image = turbojpeg::Image {
                    pixels: &mut luma[..size.area()],
                    width: header.width,
                    pitch: header.width,
                    height: header.height,
                    format: turbojpeg::PixelFormat::GRAY,
                };

                if decompressor.decompress(mjpeg_data, image).is_ok() {
                    return Some(());
                }
            }
        }
        None
    });

    match turbo_result {
        Some(()) => Ok(()),
        None => decode_mjpeg_luma_software(mjpeg_data, luma, size),
    }
}

/// Software fallback MJPEG decoder using jpeg-decoder crate
fn decode_mjpeg_luma_software(mjpeg_data: &[u8], luma: &mut [u8], size: ImageSize) -> Result<(), ()> {
    use std::io::Cursor;

    let mut decoder = jpeg_decoder::Decoder::new(Cursor::new(mjpeg_data));

    let pixels = decoder.decode().map_err(|_| ())?;
    let info = decoder.info().ok_or(())?;
    if info.width as usize != size.width || info.height as usize != size.height {
        return Err(());
    }

    match info.pixel_format {
        jpeg_decoder::PixelFormat::L8 => {
            let n = size.area().min(pixels.len());
            luma[..n].copy_from_slice(&pixels[..n]);
        }
        jpeg_decoder::PixelFormat::RGB24 => {
            rgb_to_luma(&pixels, luma);
        }
        _ => return Err(()),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_format_from_fourcc() {
        assert_eq!(InputFormat::from_fourcc(b"MJPG"), Some(InputFormat::Mjpeg));
        assert_eq!(InputFormat::from_fourcc(b"YUYV"), Some(InputFormat::Yuyv));
        assert_eq!(InputFormat::from_fourcc(b"GREY"), Some(InputFormat::Grey));
        assert_eq!(InputFormat::from_fourcc(b"NV12"), None);
    }

    #[test]
    fn test_preferred_formats_order() {
        let formats = preferred_formats(CaptureFormat::Yuyv);
        assert_eq!(formats[0], b"YUYV");
        assert_eq!(formats.len(), 5);
        assert_eq!(formats.iter().filter(|f| ***f == *b"YUYV").count(), 1);

        assert_eq!(preferred_formats(CaptureFormat::Mjpeg)[0], b"MJPG");
    }

    #[test]
    fn test_software_decode_to_luma() {
        use image::{ImageBuffer, ImageOutputFormat, Rgb};
        use std::io::Cursor;

        let img: ImageBuffer<Rgb<u8>, _> = ImageBuffer::from_pixel(16, 8, Rgb([128u8, 128, 128]));
        let mut jpeg = Vec::new();
        img.write_to(&mut Cursor::new(&mut jpeg), ImageOutputFormat::Jpeg(90)).unwrap();

        let size = ImageSize::new(16, 8);
        let mut luma = vec![0u8; size.area()];
        decode_mjpeg_luma_software(&jpeg, &mut luma, size).unwrap();
        assert!(luma.iter().all(|&y| (y as i32 - 128).abs() <= 3));

        // Wrong size is rejected
        let mut small = vec![0u8; 4];
        assert!(decode_mjpeg_luma_software(&jpeg, &mut small, ImageSize::new(2, 2)).is_err());
    }
}
