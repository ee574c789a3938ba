//! Small vector helpers for the readout geometry. Readout planes are described in 3D,
//! channels and modules live in the 2D coordinate system of their plane.

pub type Vec2 = [f64; 2];
pub type Vec3 = [f64; 3];

/// Rotate a 2D vector counter-clockwise by an angle given in degrees
pub fn rotate(v: Vec2, degrees: f64) -> Vec2 {
    if degrees == 0.0 {
        return v;
    }
    let (sin, cos) = degrees.to_radians().sin_cos();
    [v[0] * cos - v[1] * sin, v[0] * sin + v[1] * cos]
}

pub fn add2(a: Vec2, b: Vec2) -> Vec2 {
    [a[0] + b[0], a[1] + b[1]]
}

pub fn sub2(a: Vec2, b: Vec2) -> Vec2 {
    [a[0] - b[0], a[1] - b[1]]
}

pub fn sub3(a: Vec3, b: Vec3) -> Vec3 {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

pub fn dot3(a: Vec3, b: Vec3) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

pub fn norm3(a: Vec3) -> f64 {
    dot3(a, a).sqrt()
}

/// Returns the unit vector along a, or None for a (near) zero vector
pub fn normalize3(a: Vec3) -> Option<Vec3> {
    let n = norm3(a);
    if n < f64::EPSILON || !n.is_finite() {
        None
    } else {
        Some([a[0] / n, a[1] / n, a[2] / n])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_rotate_quarter_turn() {
        let v = rotate([1.0, 0.0], 90.0);
        assert_relative_eq!(v[0], 0.0, epsilon = 1e-12);
        assert_relative_eq!(v[1], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_normalize() {
        let n = normalize3([0.0, 0.0, -4.0]).unwrap();
        assert_eq!(n, [0.0, 0.0, -1.0]);
        assert!(normalize3([0.0, 0.0, 0.0]).is_none());
    }
}
