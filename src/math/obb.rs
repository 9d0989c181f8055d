use super::{rot90, Point2d, Vector2d};
use crate::util::Interval;
use cgmath::prelude::*;

/// A rotated rectangle, used as a vehicle's collision footprint.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OrientedBox {
    /// The centre of the box.
    pub centre: Point2d,
    /// A unit vector along the box's length.
    pub axis: Vector2d,
    /// Half the box's extent along `axis`.
    pub half_len: f64,
    /// Half the box's extent across `axis`.
    pub half_wid: f64,
}

impl OrientedBox {
    pub fn new(centre: Point2d, axis: Vector2d, half_len: f64, half_wid: f64) -> Self {
        Self {
            centre,
            axis,
            half_len,
            half_wid,
        }
    }

    /// Grows the box by `margin` on every side.
    pub fn inflate(self, margin: f64) -> Self {
        Self {
            half_len: self.half_len + margin,
            half_wid: self.half_wid + margin,
            ..self
        }
    }

    /// Extends the box forwards along its axis by `distance`, covering the space
    /// swept while travelling that far.
    pub fn sweep(self, distance: f64) -> Self {
        let distance = distance.max(0.0);
        Self {
            centre: self.centre + 0.5 * distance * self.axis,
            half_len: self.half_len + 0.5 * distance,
            ..self
        }
    }

    /// The four corners of the box.
    pub fn corners(&self) -> [Point2d; 4] {
        let l = self.half_len * self.axis;
        let w = self.half_wid * rot90(self.axis);
        [
            self.centre + l + w,
            self.centre + l - w,
            self.centre - l - w,
            self.centre - l + w,
        ]
    }

    /// Separating axis test between two boxes.
    pub fn overlaps(&self, other: &OrientedBox) -> bool {
        let ours = self.corners();
        let theirs = other.corners();
        let axes = [
            self.axis,
            rot90(self.axis),
            other.axis,
            rot90(other.axis),
        ];
        axes.iter().all(|axis| {
            let a = Interval::enclosing(ours.iter().map(|p| p.to_vec().dot(*axis)));
            let b = Interval::enclosing(theirs.iter().map(|p| p.to_vec().dot(*axis)));
            a.overlaps(&b)
        })
    }
}
