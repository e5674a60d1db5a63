//! Targeting Geometry
//!
//! Converts turret and target positions, reported in polar coordinates about
//! the shared arena origin, into commands for the two turret axes:
//! - traverse (azimuth), measured from the turret's outward radial
//! - elevation, the angle above the horizontal plane through the turret
//!
//! Commands are expressed relative to the actuator hardware zero, with the
//! stored zero calibration folded in.

use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

/// Default no-op threshold for axis moves (degrees)
pub const DEFAULT_EPSILON_DEG: f64 = 0.01;

/// A position in the arena frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PolarPoint {
    /// Distance from the arena origin
    pub r: f64,
    /// Bearing about the arena origin (radians)
    pub theta: f64,
    /// Height above the arena floor
    #[serde(default)]
    pub z: f64,
}

impl PolarPoint {
    pub fn new(r: f64, theta: f64) -> Self {
        Self { r, theta, z: 0.0 }
    }

    pub fn with_z(mut self, z: f64) -> Self {
        self.z = z;
        self
    }

    /// Cartesian projection onto the arena floor
    pub fn to_cartesian(&self) -> Vector2<f64> {
        polar_to_cartesian(self.r, self.theta)
    }
}

/// Actuator angles of the reference pose, captured by a set-zero operation.
///
/// `phi0` is the traverse angle at which the turret faces along its outward
/// radial; `z0` is the elevation angle at which the turret is level.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ZeroCalibration {
    #[serde(alias = "theta0", default)]
    pub phi0: f64,
    #[serde(default)]
    pub z0: f64,
}

impl ZeroCalibration {
    pub fn new(phi0: f64, z0: f64) -> Self {
        Self { phi0, z0 }
    }
}

/// Result of the targeting transform
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AimSolution {
    /// Traverse command relative to hardware zero, in (-180, 180]
    pub azimuth_delta_deg: f64,
    /// Elevation command relative to hardware zero
    pub elevation_delta_deg: f64,
    /// Floor distance from turret to target
    pub range: f64,
}

pub fn polar_to_cartesian(r: f64, theta: f64) -> Vector2<f64> {
    Vector2::new(r * theta.cos(), r * theta.sin())
}

/// Wrap an angle into (-180, 180] so a move always takes the shorter path.
pub fn normalize_deg(angle_deg: f64) -> f64 {
    let wrapped = angle_deg.rem_euclid(360.0);
    if wrapped > 180.0 {
        wrapped - 360.0
    } else {
        wrapped
    }
}

/// Floor distance between two polar points (law of cosines)
pub fn floor_range(turret: &PolarPoint, target: &PolarPoint) -> f64 {
    let dtheta = (target.theta - turret.theta).abs();
    let squared = target.r * target.r + turret.r * turret.r
        - 2.0 * target.r * turret.r * dtheta.cos();
    // Rounding can push coincident points slightly negative
    squared.max(0.0).sqrt()
}

/// Signed bearing (degrees, counter-clockwise positive) of the line of sight
/// from the turret to the target, measured from the turret's outward radial.
///
/// Coincident points yield 0.
pub fn bearing_from_radial_deg(turret: &PolarPoint, target: &PolarPoint) -> f64 {
    let radial = Vector2::new(turret.theta.cos(), turret.theta.sin());
    let sight = target.to_cartesian() - turret.to_cartesian();
    if sight.norm_squared() == 0.0 {
        return 0.0;
    }
    radial.perp(&sight).atan2(radial.dot(&sight)).to_degrees()
}

/// Compute the axis commands that aim `turret` at `target`.
pub fn compute_aim(turret: &PolarPoint, target: &PolarPoint, zero: &ZeroCalibration) -> AimSolution {
    let range = floor_range(turret, target);

    let bearing = bearing_from_radial_deg(turret, target);
    let azimuth_delta_deg = normalize_deg(bearing + zero.phi0);

    let rise = target.z - turret.z;
    let elevation_delta_deg = rise.atan2(range).to_degrees() + zero.z0;

    AimSolution {
        azimuth_delta_deg,
        elevation_delta_deg,
        range,
    }
}
