//! Joint angle geometry.
//!
//! All angles are in degrees within [0, 180]. Degenerate input (a zero-length
//! segment) is reported as `DegenerateGeometry` instead of producing NaN.

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Segments shorter than this are treated as coincident points.
const MIN_SEGMENT_LENGTH: f32 = 1e-6;

/// Relative cross/dot tolerance under which vectors are treated as collinear.
const COLLINEAR_TOLERANCE: f32 = 1e-5;

/// Whether the depth coordinate takes part in angle computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AngleSpace {
    /// Image plane only (z ignored).
    #[default]
    Planar,
    /// Full 3D positions.
    Spatial,
}

/// Reference axis for segment inclination, in image coordinates (y grows downward).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Axis {
    Vertical,
    Horizontal,
}

impl Axis {
    fn unit(self) -> [f32; 3] {
        match self {
            Axis::Vertical => [0.0, -1.0, 0.0],
            Axis::Horizontal => [1.0, 0.0, 0.0],
        }
    }
}

fn project(p: &[f32; 3], space: AngleSpace) -> [f32; 3] {
    match space {
        AngleSpace::Planar => [p[0], p[1], 0.0],
        AngleSpace::Spatial => *p,
    }
}

fn sub(a: &[f32; 3], b: &[f32; 3]) -> [f32; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

fn dot(a: &[f32; 3], b: &[f32; 3]) -> f32 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

fn cross(a: &[f32; 3], b: &[f32; 3]) -> [f32; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

fn norm(a: &[f32; 3]) -> f32 {
    dot(a, a).sqrt()
}

/// Angle between two vectors in degrees.
///
/// Uses atan2(|v1×v2|, v1·v2), which stays accurate near 0° and 180° where
/// acos of the dot-product cosine loses precision. Collinear vectors come out
/// as exactly 0° or 180°.
fn angle_between(v1: &[f32; 3], v2: &[f32; 3]) -> Result<f32> {
    let n1 = norm(v1);
    let n2 = norm(v2);
    if !(n1 >= MIN_SEGMENT_LENGTH && n2 >= MIN_SEGMENT_LENGTH) {
        return Err(PipelineError::DegenerateGeometry("zero-length segment"));
    }

    let d = dot(v1, v2);
    let c = norm(&cross(v1, v2));
    if c <= COLLINEAR_TOLERANCE * n1 * n2 {
        return Ok(if d > 0.0 { 0.0 } else { 180.0 });
    }

    Ok(c.atan2(d).to_degrees().clamp(0.0, 180.0))
}

/// Angle at `vertex` formed by the segments to `a` and `c`.
pub fn vertex_angle(a: &[f32; 3], vertex: &[f32; 3], c: &[f32; 3], space: AngleSpace) -> Result<f32> {
    let a = project(a, space);
    let v = project(vertex, space);
    let c = project(c, space);
    angle_between(&sub(&a, &v), &sub(&c, &v))
}

/// Angle of the segment `from → to` against a reference axis.
///
/// 0° means the segment points along the axis (up for `Vertical`, right for
/// `Horizontal`), 180° means it points the opposite way.
pub fn inclination(from: &[f32; 3], to: &[f32; 3], axis: Axis, space: AngleSpace) -> Result<f32> {
    let segment = sub(&project(to, space), &project(from, space));
    angle_between(&segment, &axis.unit())
}

pub fn midpoint(a: &[f32; 3], b: &[f32; 3]) -> [f32; 3] {
    [
        (a[0] + b[0]) / 2.0,
        (a[1] + b[1]) / 2.0,
        (a[2] + b[2]) / 2.0,
    ]
}

pub fn distance(a: &[f32; 3], b: &[f32; 3], space: AngleSpace) -> f32 {
    norm(&sub(&project(a, space), &project(b, space)))
}
