//! Vanishing point adjustment and UI state

use serde::{Deserialize, Serialize};

use crate::config::Calibration;
use crate::frame::ImageSize;
use crate::geometry::{CameraGeometry, VanishingPoint, ViewAngles};

/// Direction to move the vanishing point
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Left,
    Right,
    Up,
    Down,
}

impl Direction {
    /// Keyboard binding: `a`/`d` move left/right, `w`/`s` move up/down
    pub fn from_key(key: char) -> Option<Self> {
        match key.to_ascii_lowercase() {
            'a' => Some(Direction::Left),
            'd' => Some(Direction::Right),
            'w' => Some(Direction::Up),
            's' => Some(Direction::Down),
            _ => None,
        }
    }

    /// Unit pixel offset in image coordinates (y grows downward)
    fn delta(self) -> (i32, i32) {
        match self {
            Direction::Left => (-1, 0),
            Direction::Right => (1, 0),
            Direction::Up => (0, -1),
            Direction::Down => (0, 1),
        }
    }
}

/// Calibration as shown in the UI
#[derive(Debug, Clone, Serialize)]
pub struct CalibrationView {
    pub enabled: bool,
    pub vanishing_point: VanishingPoint,
    /// Whether the vanishing point sits at the image centre by default
    pub centered: bool,
    pub nudge_step: i32,
    /// Pan and tilt implied by the vanishing point (degrees)
    pub pan_deg: f64,
    pub tilt_deg: f64,
}

/// Describe the calibration for the UI
pub fn calibration_view(cal: &Calibration, geometry: &CameraGeometry, src: ImageSize) -> CalibrationView {
    let vp = cal.vanishing_point(src);
    let angles = ViewAngles::from_vanishing_point(geometry, src, vp);

    CalibrationView {
        enabled: cal.enabled,
        vanishing_point: vp,
        centered: cal.vanishing_point.is_none(),
        nudge_step: cal.nudge_step,
        pan_deg: f64::from(angles.pan.to_degrees()),
        tilt_deg: f64::from(angles.tilt.to_degrees()),
    }
}

/// Move the vanishing point one step. Out-of-image positions are allowed.
pub fn nudge(cal: &mut Calibration, direction: Direction, src: ImageSize) -> VanishingPoint {
    let (dx, dy) = direction.delta();
    let step = cal.nudge_step;
    let vp = cal
        .vanishing_point(src)
        .offset(dx.saturating_mul(step), dy.saturating_mul(step));
    cal.vanishing_point = Some(vp);
    vp
}

/// Place the vanishing point explicitly
pub fn set_vanishing_point(cal: &mut Calibration, x: i32, y: i32) {
    cal.vanishing_point = Some(VanishingPoint::new(x, y));
}

/// Reset calibration to default values (vanishing point at the image centre)
pub fn reset_calibration(cal: &mut Calibration) {
    *cal = Calibration {
        nudge_step: cal.nudge_step,
        ..Calibration::default()
    };
}
