//! Conversions between camera pixel formats and single-channel intensity
//!
//! The remapper works on luma only. Capture formats are reduced to luma on
//! the way in, and luma is expanded again for the virtual camera and the
//! preview on the way out. All math is integer fixed-point (BT.601).

/// BT.601 luma from 8-bit R, G, B (fixed-point, scaled by 256)
#[inline]
pub fn luma(r: u8, g: u8, b: u8) -> u8 {
    ((77 * r as u32 + 150 * g as u32 + 29 * b as u32 + 128) >> 8) as u8
}

/// Convert packed RGB24 to luma
pub fn rgb_to_luma(rgb: &[u8], gray: &mut [u8]) {
    for (px, out) in rgb.chunks_exact(3).zip(gray.iter_mut()) {
        *out = luma(px[0], px[1], px[2]);
    }
}

/// Convert packed BGR24 to luma
pub fn bgr_to_luma(bgr: &[u8], gray: &mut [u8]) {
    for (px, out) in bgr.chunks_exact(3).zip(gray.iter_mut()) {
        *out = luma(px[2], px[1], px[0]);
    }
}

/// Expand luma into YUYV 4:2:2 with neutral chroma
pub fn gray_to_yuyv(gray: &[u8], yuyv: &mut [u8]) {
    for (px, out) in gray.iter().zip(yuyv.chunks_exact_mut(2)) {
        out[0] = *px;
        out[1] = 128;
    }
}

/// Expand luma into RGB24
pub fn gray_to_rgb(gray: &[u8], rgb: &mut [u8]) {
    for (px, out) in gray.iter().zip(rgb.chunks_exact_mut(3)) {
        out[0] = *px;
        out[1] = *px;
        out[2] = *px;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_luma_extremes() {
        assert_eq!(luma(0, 0, 0), 0);
        assert_eq!(luma(255, 255, 255), 255);
        assert_eq!(luma(128, 128, 128), 128);
    }

    #[test]
    fn test_rgb_and_bgr_agree() {
        let rgb = vec![255, 0, 0, 0, 255, 0, 0, 0, 255];
        let bgr = vec![0, 0, 255, 0, 255, 0, 255, 0, 0];
        let mut a = vec![0u8; 3];
        let mut b = vec![0u8; 3];
        rgb_to_luma(&rgb, &mut a);
        bgr_to_luma(&bgr, &mut b);
        assert_eq!(a, b);
        // Green dominates luma
        assert!(a[1] > a[0] && a[0] > a[2]);
    }

    #[test]
    fn test_gray_to_yuyv() {
        let mut yuyv = vec![0u8; 8];
        gray_to_yuyv(&[10, 20, 30, 40], &mut yuyv);
        assert_eq!(yuyv, vec![10, 128, 20, 128, 30, 128, 40, 128]);
    }

    #[test]
    fn test_gray_to_rgb() {
        let mut rgb = vec![0u8; 6];
        gray_to_rgb(&[5, 250], &mut rgb);
        assert_eq!(rgb, vec![5, 5, 5, 250, 250, 250]);
    }
}
