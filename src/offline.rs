//! Single-image rendering without a camera

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info};

use crate::config::Config;
use crate::frame::{GrayFrame, ImageSize};
use crate::geometry::VanishingPoint;
use crate::remap::remap;
use crate::table::MappingTable;

/// Load an image file as luma, resized to the configured source size
pub fn load_source(path: &Path, size: ImageSize) -> Result<GrayFrame> {
    let img = image::open(path)
        .with_context(|| format!("Failed to open image {:?}", path))?
        .to_luma8();

    let (width, height) = img.dimensions();
    debug!("Loaded {:?} ({}x{})", path, width, height);

    let mut frame = GrayFrame::filled(size, 0);
    frame.resample_from(
        img.as_raw(),
        ImageSize::new(width as usize, height as usize),
        1,
    );
    Ok(frame)
}

/// Write a grayscale frame as PNG
pub fn save_frame(path: &Path, frame: &GrayFrame) -> Result<()> {
    image::save_buffer(
        path,
        frame.as_slice(),
        frame.width() as u32,
        frame.height() as u32,
        image::ColorType::L8,
    )
    .with_context(|| format!("Failed to write image {:?}", path))?;
    debug!("Wrote {:?} ({})", path, frame.size());
    Ok(())
}

fn compile_table(config: &Config, vp: Option<VanishingPoint>) -> Result<MappingTable> {
    let src_size = config.source_size();
    let vp = vp.unwrap_or_else(|| config.calibration.vanishing_point(src_size));

    let table = MappingTable::compile(&config.camera, src_size, config.destination_size(), vp)
        .context("Failed to compile mapping table")?;
    let stats = table.stats();
    info!(
        "Mapping table {} -> {} for vanishing point ({}, {}): {} mapped, {} unmapped",
        src_size,
        table.dst_size(),
        vp.x,
        vp.y,
        stats.mapped,
        stats.unmapped
    );
    Ok(table)
}

/// Render one image to the bird's-eye view
pub fn render_file(config: &Config, input: &Path, output: &Path, vp: Option<VanishingPoint>) -> Result<()> {
    let table = compile_table(config, vp)?;
    let src = load_source(input, table.src_size())?;
    let dst = remap(&table, &src).context("Failed to remap image")?;
    save_frame(output, &dst)
}

/// Render every image in `input` (a clip exported as numbered frames) into
/// `output` as PNG, in file name order. Returns the number of frames.
pub fn render_sequence(config: &Config, input: &Path, output: &Path, vp: Option<VanishingPoint>) -> Result<usize> {
    let mut frames: Vec<PathBuf> = fs::read_dir(input)
        .with_context(|| format!("Failed to read frame directory {:?}", input))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && image::ImageFormat::from_path(path).is_ok())
        .collect();
    frames.sort();
    if frames.is_empty() {
        bail!("No images found in {:?}", input);
    }

    fs::create_dir_all(output).with_context(|| format!("Failed to create {:?}", output))?;

    let table = compile_table(config, vp)?;
    let start = Instant::now();
    for path in &frames {
        let src = load_source(path, table.src_size())?;
        let dst = remap(&table, &src).context("Failed to remap image")?;

        let stem = path.file_stem().with_context(|| format!("No file name in {:?}", path))?;
        let mut name = stem.to_os_string();
        name.push(".png");
        save_frame(&output.join(name), &dst)?;
    }

    let elapsed = start.elapsed().as_secs_f64();
    info!(
        "Rendered {} frames in {:.2}s ({:.1} fps)",
        frames.len(),
        elapsed,
        frames.len() as f64 / elapsed.max(f64::EPSILON)
    );
    Ok(frames.len())
}

/// Render a single image, or a directory of frames
pub fn render(config: &Config, input: &Path, output: &Path, vp: Option<VanishingPoint>) -> Result<()> {
    if input.is_dir() {
        render_sequence(config, input, output, vp).map(|_| ())
    } else {
        render_file(config, input, output, vp)
    }
}
