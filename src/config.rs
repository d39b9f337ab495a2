//! Configuration management for birdseye

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::frame::ImageSize;
use crate::geometry::{CameraGeometry, VanishingPoint};

/// User-adjustable calibration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    /// Pixels moved per nudge
    #[serde(default = "default_nudge_step")]
    pub nudge_step: i32,

    /// Whether the bird's-eye remap is applied (a resized raw frame is sent otherwise)
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Vanishing point in source pixels; the image centre when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vanishing_point: Option<VanishingPoint>,
}

fn default_nudge_step() -> i32 {
    2
}

fn default_enabled() -> bool {
    true
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            nudge_step: default_nudge_step(),
            enabled: true,
            vanishing_point: None,
        }
    }
}

impl Calibration {
    /// Effective vanishing point for a source of the given size
    pub fn vanishing_point(&self, src: ImageSize) -> VanishingPoint {
        self.vanishing_point
            .unwrap_or_else(|| VanishingPoint::centered(src))
    }
}

/// Preferred capture format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum CaptureFormat {
    /// Prefer MJPEG (lower bandwidth, decoded straight to luma)
    #[default]
    Mjpeg,
    /// Prefer YUYV (luma read directly from the Y samples)
    Yuyv,
    /// Prefer 8-bit grayscale
    Grey,
}

/// Video input configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoConfig {
    pub input_device: String,
    /// Requested capture resolution
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Preferred capture format
    #[serde(default)]
    pub format: CaptureFormat,
    /// Perspective frame size the mapping table is built for; captured
    /// frames are resized to this before remapping
    #[serde(default = "default_source_width")]
    pub source_width: u32,
    #[serde(default = "default_source_height")]
    pub source_height: u32,
}

fn default_source_width() -> u32 {
    720
}

fn default_source_height() -> u32 {
    360
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            input_device: "/dev/video0".to_string(),
            width: 640,
            height: 480,
            fps: 30,
            format: CaptureFormat::default(),
            source_width: default_source_width(),
            source_height: default_source_height(),
        }
    }
}

/// Bird's-eye output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// v4l2loopback device; empty disables the virtual camera
    #[serde(default)]
    pub device: String,
    pub width: u32,
    pub height: u32,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            device: "/dev/video10".to_string(),
            width: 200,
            height: 200,
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8092,
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub video: VideoConfig,

    #[serde(default)]
    pub output: OutputConfig,

    /// Mount height, offsets and field of view
    #[serde(default)]
    pub camera: CameraGeometry,

    #[serde(default)]
    pub calibration: Calibration,

    #[serde(default)]
    pub server: ServerConfig,
}

impl Config {
    /// Load configuration from a file, or create default if it doesn't exist
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {:?}", path))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config from {:?}", path))?;
            tracing::info!("Loaded configuration from {:?}", path);
            Ok(config)
        } else {
            let config = Config::default();
            config.save(path)?;
            tracing::info!("Created default configuration at {:?}", path);
            Ok(config)
        }
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .context("Failed to serialize configuration")?;

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create config directory {:?}", parent))?;
            }
        }

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config to {:?}", path))?;

        tracing::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Size of the perspective frame fed to the remapper
    pub fn source_size(&self) -> ImageSize {
        ImageSize::new(self.video.source_width as usize, self.video.source_height as usize)
    }

    /// Size of the bird's-eye frame
    pub fn destination_size(&self) -> ImageSize {
        ImageSize::new(self.output.width as usize, self.output.height as usize)
    }
}
