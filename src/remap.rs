//! Table-driven remapping of frames into the bird's-eye view

use rayon::prelude::*;

use crate::error::IpmError;
use crate::frame::GrayFrame;
use crate::table::{MappingTable, UNMAPPED};

/// Value written to destination pixels without a source pixel (black)
pub const FILL_VALUE: u8 = 0;

/// Gather `src` through `table` into the caller-owned `dst`.
///
/// Both frames must match the sizes the table was compiled for; this is
/// checked before any pixel is touched. Nothing is allocated.
pub fn apply(table: &MappingTable, src: &GrayFrame, dst: &mut GrayFrame) -> Result<(), IpmError> {
    if src.size() != table.src_size() {
        return Err(IpmError::DimensionMismatch {
            what: "source frame",
            expected: table.src_size(),
            actual: src.size(),
        });
    }
    if dst.size() != table.dst_size() {
        return Err(IpmError::DimensionMismatch {
            what: "destination frame",
            expected: table.dst_size(),
            actual: dst.size(),
        });
    }

    let src = src.as_slice();
    let width = table.dst_size().width;

    dst.as_mut_slice()
        .par_chunks_mut(width)
        .zip(table.entries().par_chunks(width))
        .for_each(|(dst_row, entries)| {
            for (px, &entry) in dst_row.iter_mut().zip(entries) {
                *px = if entry == UNMAPPED {
                    FILL_VALUE
                } else {
                    src[entry as usize]
                };
            }
        });

    Ok(())
}

/// Remap into a newly allocated destination frame
pub fn remap(table: &MappingTable, src: &GrayFrame) -> Result<GrayFrame, IpmError> {
    let mut dst = GrayFrame::filled(table.dst_size(), FILL_VALUE);
    apply(table, src, &mut dst)?;
    Ok(dst)
}
