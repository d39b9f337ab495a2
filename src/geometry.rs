//! Camera geometry and pan/tilt derived from the vanishing point
//!
//! Variable naming follows the flat-ground IPM model: the camera sits at
//! height `Z` above the ground, optionally offset from the origin of the
//! bird's-eye grid, and looks forward with a known horizontal and vertical
//! field of view. Pan and tilt are not measured directly; they are inferred
//! from where the vanishing point sits relative to the image centre.

use serde::{Deserialize, Serialize};

use crate::frame::ImageSize;

/// Fixed properties of the camera mount and lens
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraGeometry {
    /// Mount height above the ground plane (cm)
    pub height_cm: f64,
    /// Longitudinal offset along the depth axis (cm)
    pub offset_x_cm: i32,
    /// Lateral offset (cm)
    pub offset_y_cm: i32,
    /// Horizontal field of view (degrees)
    pub fov_h_deg: f64,
    /// Vertical field of view (degrees)
    pub fov_v_deg: f64,
    /// Magnification along the depth axis of the bird's-eye grid
    #[serde(default = "default_front_scale")]
    pub front_scale: i32,
    /// Magnification along the lateral axis of the bird's-eye grid
    #[serde(default = "default_side_scale")]
    pub side_scale: i32,
}

fn default_front_scale() -> i32 {
    4
}

fn default_side_scale() -> i32 {
    2
}

impl Default for CameraGeometry {
    fn default() -> Self {
        // Small height corresponds to a wide field of view
        Self {
            height_cm: 60.0,
            offset_x_cm: 0,
            offset_y_cm: 0,
            fov_h_deg: 80.0,
            fov_v_deg: 50.0,
            front_scale: default_front_scale(),
            side_scale: default_side_scale(),
        }
    }
}

impl CameraGeometry {
    /// Half of the horizontal field of view, in radians
    pub fn alpha_h(&self) -> f32 {
        (0.5 * self.fov_h_deg as f32).to_radians()
    }

    /// Half of the vertical field of view, in radians
    pub fn alpha_v(&self) -> f32 {
        (0.5 * self.fov_v_deg as f32).to_radians()
    }
}

/// Vanishing point in source-image pixel coordinates.
///
/// Coordinates outside the image are allowed; they just produce extreme
/// pan/tilt angles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VanishingPoint {
    pub x: i32,
    pub y: i32,
}

impl VanishingPoint {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// The image centre, which corresponds to zero pan and zero tilt
    pub fn centered(src: ImageSize) -> Self {
        Self {
            x: (src.width / 2) as i32,
            y: (src.height / 2) as i32,
        }
    }

    pub fn offset(self, dx: i32, dy: i32) -> Self {
        Self {
            x: self.x.saturating_add(dx),
            y: self.y.saturating_add(dy),
        }
    }
}

/// Camera orientation relative to straight-ahead and level.
///
/// Angles are single precision; mapping tables built from them must agree
/// entry for entry with tables computed in `float` arithmetic.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewAngles {
    /// Pan angle gamma (radians), positive when the vanishing point is left of centre
    pub pan: f32,
    /// Tilt angle theta (radians), positive when the vanishing point is above centre
    pub tilt: f32,
}

impl ViewAngles {
    /// Derive pan and tilt as linear functions of the vanishing point's offset
    /// from the image centre, scaled by half-FOV per half-resolution.
    ///
    /// `src` must be at least 2x2 so that the half extents are non-zero.
    pub fn from_vanishing_point(geometry: &CameraGeometry, src: ImageSize, vp: VanishingPoint) -> Self {
        let half_w = (src.width / 2) as i64;
        let half_h = (src.height / 2) as i64;

        let pan = -((vp.x as i64 - half_w) as f32) * geometry.alpha_h() / half_w as f32;
        let tilt = -((vp.y as i64 - half_h) as f32) * geometry.alpha_v() / half_h as f32;

        Self { pan, tilt }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_geometry() {
        let g = CameraGeometry::default();
        assert_eq!(g.height_cm, 60.0);
        assert_eq!(g.front_scale, 4);
        assert_eq!(g.side_scale, 2);
        assert!((g.alpha_h() - 40f32.to_radians()).abs() < 1e-6);
        assert!((g.alpha_v() - 25f32.to_radians()).abs() < 1e-6);
    }

    #[test]
    fn test_centered_vanishing_point_has_zero_angles() {
        let src = ImageSize::new(720, 360);
        let vp = VanishingPoint::centered(src);
        assert_eq!(vp, VanishingPoint::new(360, 180));

        let angles = ViewAngles::from_vanishing_point(&CameraGeometry::default(), src, vp);
        assert_eq!(angles.pan, 0.0);
        assert_eq!(angles.tilt, 0.0);
    }

    #[test]
    fn test_angle_signs() {
        let g = CameraGeometry::default();
        let src = ImageSize::new(720, 360);

        // Right of centre pans negative, above centre tilts positive
        let angles = ViewAngles::from_vanishing_point(&g, src, VanishingPoint::new(720, 0));
        assert!((angles.pan + g.alpha_h()).abs() < 1e-6);
        assert!((angles.tilt - g.alpha_v()).abs() < 1e-6);
    }

    #[test]
    fn test_offset_saturates() {
        let vp = VanishingPoint::new(i32::MAX, 0).offset(2, -2);
        assert_eq!(vp, VanishingPoint::new(i32::MAX, -2));
    }
}
