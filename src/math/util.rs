use super::{Point2d, Vector2d};
use cgmath::prelude::*;
use std::f64::consts::{PI, TAU};

/// Rotates a vector 90 degrees counter-clockwise.
pub fn rot90(vec: Vector2d) -> Vector2d {
    Vector2d::new(-vec.y, vec.x)
}

/// The Euclidean distance between two points.
pub fn distance(a: Point2d, b: Point2d) -> f64 {
    a.distance(b)
}

/// The bearing from `from` to `to` in radians, measured counter-clockwise from the x-axis.
pub fn bearing(from: Point2d, to: Point2d) -> f64 {
    let v = to - from;
    v.y.atan2(v.x)
}

/// A unit vector pointing along the given bearing.
pub fn unit_vector(angle: f64) -> Vector2d {
    Vector2d::new(angle.cos(), angle.sin())
}

/// Wraps an angle into the interval `(-π, π]`.
pub fn normalize_angle(angle: f64) -> f64 {
    let a = angle.rem_euclid(TAU);
    if a > PI {
        a - TAU
    } else {
        a
    }
}

/// The signed angle that rotates bearing `from` onto bearing `to`, in `(-π, π]`.
/// Positive values are counter-clockwise.
pub fn angle_difference(from: f64, to: f64) -> f64 {
    normalize_angle(to - from)
}

/// Returns `true` if the bearing lies within 45° of vertical.
pub fn is_vertical(angle: f64) -> bool {
    let a = normalize_angle(angle).abs();
    (a - 0.5 * PI).abs() <= 0.25 * PI
}

/// Finds the point where two line segments cross, if they do.
/// Parallel and collinear segments never cross.
pub fn segment_intersection(
    a1: Point2d,
    a2: Point2d,
    b1: Point2d,
    b2: Point2d,
) -> Option<Point2d> {
    let r = a2 - a1;
    let s = b2 - b1;
    let denom = r.perp_dot(s);
    if denom.abs() < 1e-12 {
        return None;
    }
    let qp = b1 - a1;
    let t = qp.perp_dot(s) / denom;
    let u = qp.perp_dot(r) / denom;
    if (0.0..=1.0).contains(&t) && (0.0..=1.0).contains(&u) {
        Some(a1 + t * r)
    } else {
        None
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn angles() {
        let o = Point2d::new(0.0, 0.0);
        assert_approx_eq!(bearing(o, Point2d::new(0.0, 5.0)), 0.5 * PI);
        assert_approx_eq!(normalize_angle(2.5 * PI), 0.5 * PI);
        assert_approx_eq!(normalize_angle(-0.5 * PI - TAU), -0.5 * PI);
        assert_approx_eq!(angle_difference(0.9 * PI, -0.9 * PI), 0.2 * PI);
        assert!(is_vertical(-0.5 * PI));
        assert!(is_vertical(0.3 * PI));
        assert!(!is_vertical(0.2 * PI));
        assert!(!is_vertical(PI));
    }

    #[test]
    fn segments() {
        let p = |x, y| Point2d::new(x, y);
        let hit = segment_intersection(p(0.0, 0.0), p(10.0, 10.0), p(0.0, 10.0), p(10.0, 0.0));
        let hit = hit.unwrap();
        assert_approx_eq!(hit.x, 5.0);
        assert_approx_eq!(hit.y, 5.0);
        // Too short to reach
        let miss = segment_intersection(p(0.0, 0.0), p(4.0, 4.0), p(0.0, 10.0), p(10.0, 0.0));
        assert!(miss.is_none());
        let parallel = segment_intersection(p(0.0, 0.0), p(10.0, 0.0), p(0.0, 1.0), p(10.0, 1.0));
        assert!(parallel.is_none());
    }
}
