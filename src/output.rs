// Bird's-eye output to a v4l2loopback device
//
// Frames leave the pipeline as single-channel luma. The loopback is asked for
// GREY first; consumers that refuse grayscale get YUYV with neutral chroma.
// Writes go through a non-blocking descriptor and a full loopback buffer
// drops the frame rather than stalling capture.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use tracing::{debug, info, warn};
use v4l::format::FieldOrder;
use v4l::video::Output;
use v4l::{Device, Format, FourCC};

use crate::color::gray_to_yuyv;
use crate::frame::ImageSize;

/// Pixel layout written to the loopback device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// 8-bit luma, written as is
    Grey,
    /// Packed 4:2:2 with chroma fixed at 128
    Yuyv,
}

impl OutputFormat {
    pub fn fourcc(self) -> FourCC {
        match self {
            OutputFormat::Grey => FourCC::new(b"GREY"),
            OutputFormat::Yuyv => FourCC::new(b"YUYV"),
        }
    }

    pub fn bytes_per_pixel(self) -> usize {
        match self {
            OutputFormat::Grey => 1,
            OutputFormat::Yuyv => 2,
        }
    }

    /// Format description for VIDIOC_S_FMT on an output queue
    fn describe(self, size: ImageSize) -> Format {
        let mut format = Format::new(size.width as u32, size.height as u32, self.fourcc());
        format.field_order = FieldOrder::Progressive;
        format.stride = (size.width * self.bytes_per_pixel()) as u32;
        format.size = format.stride * size.height as u32;
        format
    }
}

/// An open descriptor plus whatever conversion the format needs
struct Sink {
    /// Holds the negotiated format for as long as we write
    _control: Option<Device>,
    file: File,
    format: OutputFormat,
    packed: Vec<u8>,
}

impl Sink {
    fn new(control: Option<Device>, file: File, format: OutputFormat, size: ImageSize) -> Self {
        let packed = match format {
            OutputFormat::Grey => Vec::new(),
            OutputFormat::Yuyv => vec![0u8; size.area() * 2],
        };
        Self {
            _control: control,
            file,
            format,
            packed,
        }
    }

    /// Write one luma frame. Returns `false` if the device had no room.
    fn write_gray(&mut self, gray: &[u8]) -> io::Result<bool> {
        let bytes = match self.format {
            OutputFormat::Grey => gray,
            OutputFormat::Yuyv => {
                gray_to_yuyv(gray, &mut self.packed);
                &self.packed
            }
        };

        match self.file.write_all(bytes) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Virtual camera carrying the bird's-eye stream
pub struct VirtualCamera {
    path: String,
    size: ImageSize,
    sink: Option<Sink>,
    frames: u64,
    dropped: u64,
}

impl VirtualCamera {
    pub fn new(path: &str, size: ImageSize) -> Self {
        Self {
            path: path.to_string(),
            size,
            sink: None,
            frames: 0,
            dropped: 0,
        }
    }

    /// Negotiate a format and open the device for writing
    pub fn open(&mut self) -> io::Result<()> {
        if self.sink.is_some() {
            return Ok(());
        }

        if !Path::new(&self.path).exists() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} does not exist, is v4l2loopback loaded?", self.path),
            ));
        }

        for format in [OutputFormat::Grey, OutputFormat::Yuyv] {
            match self.negotiate(format) {
                Ok(control) => {
                    let file = open_nonblocking(&self.path)?;
                    self.sink = Some(Sink::new(Some(control), file, format, self.size));
                    info!("Virtual camera {} accepted {:?} at {}", self.path, format, self.size);
                    return Ok(());
                }
                Err(e) => warn!("{} rejected {:?}: {}", self.path, format, e),
            }
        }

        // Loopbacks configured ahead of time may refuse S_FMT but still take
        // frames in the format they were set up with
        warn!("No format accepted by {}, writing raw luma", self.path);
        let file = open_nonblocking(&self.path).map_err(|e| {
            io::Error::new(
                e.kind(),
                format!(
                    "cannot open {}: {} (try: sudo modprobe v4l2loopback video_nr=10 \
                     card_label=BirdsEye exclusive_caps=0)",
                    self.path, e
                ),
            )
        })?;
        self.sink = Some(Sink::new(None, file, OutputFormat::Grey, self.size));
        Ok(())
    }

    fn negotiate(&self, format: OutputFormat) -> io::Result<Device> {
        let device = Device::with_path(&self.path)?;
        let granted = Output::set_format(&device, &format.describe(self.size))?;

        if granted.fourcc != format.fourcc() {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("device substituted {}", granted.fourcc),
            ));
        }
        if (granted.width as usize, granted.height as usize) != (self.size.width, self.size.height) {
            warn!(
                "{} resized the output to {}x{}, consumers may see a skewed view",
                self.path, granted.width, granted.height
            );
        }
        Ok(device)
    }

    /// Write one bird's-eye frame, opening the device on first use
    pub fn write_frame_gray(&mut self, gray: &[u8]) -> io::Result<()> {
        if gray.len() != self.size.area() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("expected {} luma bytes for {}, got {}", self.size.area(), self.size, gray.len()),
            ));
        }

        self.open()?;
        let Some(sink) = self.sink.as_mut() else {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "virtual camera is not open"));
        };

        if sink.write_gray(gray)? {
            self.frames += 1;
            if self.frames % 1000 == 0 {
                debug!("{} frames written to {}", self.frames, self.path);
            }
        } else {
            self.dropped += 1;
        }
        Ok(())
    }

    pub fn format(&self) -> Option<OutputFormat> {
        self.sink.as_ref().map(|sink| sink.format)
    }

    pub fn frame_count(&self) -> u64 {
        self.frames
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped
    }
}

fn open_nonblocking(path: &str) -> io::Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_file(name: &str) -> (std::path::PathBuf, File) {
        let path = std::env::temp_dir().join(format!("birdseye-{}-{}", std::process::id(), name));
        let file = File::create(&path).unwrap();
        (path, file)
    }

    #[test]
    fn test_fourcc() {
        assert_eq!(OutputFormat::Grey.fourcc().repr, *b"GREY");
        assert_eq!(OutputFormat::Yuyv.fourcc().repr, *b"YUYV");
    }

    #[test]
    fn test_describe_sets_stride_and_size() {
        let format = OutputFormat::Yuyv.describe(ImageSize::new(200, 100));
        assert_eq!((format.width, format.height), (200, 100));
        assert_eq!(format.stride, 400);
        assert_eq!(format.size, 40_000);
        assert!(matches!(format.field_order, FieldOrder::Progressive));

        let format = OutputFormat::Grey.describe(ImageSize::new(200, 100));
        assert_eq!(format.stride, 200);
        assert_eq!(format.size, 20_000);
    }

    #[test]
    fn test_grey_sink_writes_luma_unchanged() {
        let size = ImageSize::new(4, 2);
        let (path, file) = temp_file("grey.raw");
        let mut sink = Sink::new(None, file, OutputFormat::Grey, size);

        let gray: Vec<u8> = (10..18).collect();
        assert!(sink.write_gray(&gray).unwrap());
        drop(sink);

        assert_eq!(std::fs::read(&path).unwrap(), gray);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_yuyv_sink_packs_neutral_chroma() {
        let size = ImageSize::new(2, 1);
        let (path, file) = temp_file("yuyv.raw");
        let mut sink = Sink::new(None, file, OutputFormat::Yuyv, size);

        assert!(sink.write_gray(&[50, 60]).unwrap());
        drop(sink);

        assert_eq!(std::fs::read(&path).unwrap(), vec![50, 128, 60, 128]);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_missing_device_is_reported() {
        let mut cam = VirtualCamera::new("/nonexistent/video99", ImageSize::new(4, 4));
        let err = cam.open().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        assert_eq!(cam.format(), None);
    }

    #[test]
    fn test_write_rejects_wrong_size() {
        let mut cam = VirtualCamera::new("/nonexistent/video99", ImageSize::new(4, 4));
        let err = cam.write_frame_gray(&[0u8; 3]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        assert_eq!(cam.frame_count(), 0);
        assert_eq!(cam.dropped_count(), 0);
    }
}
