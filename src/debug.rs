//! Per-frame geometry recorded for inspecting driving decisions, when the `debug` feature is on.

use crate::math::{OrientedBox, Point2d};
#[cfg(feature = "debug")]
use serde_json::json;

#[cfg(feature = "debug")]
thread_local!(
    static DEBUG_FRAME: std::cell::RefCell<Vec<serde_json::Value>> = Default::default();
);

#[allow(unused)]
pub fn debug_line(name: &str, p1: Point2d, p2: Point2d) {
    #[cfg(feature = "debug")]
    DEBUG_FRAME.with(|frame| {
        frame.borrow_mut().push(json!({
            "type": "line",
            "name": name,
            "p1": [p1.x, p1.y],
            "p2": [p2.x, p2.y],
        }))
    })
}

#[allow(unused)]
pub fn debug_circle(name: &str, centre: Point2d, radius: f64) {
    #[cfg(feature = "debug")]
    DEBUG_FRAME.with(|frame| {
        frame.borrow_mut().push(json!({
            "type": "circle",
            "name": name,
            "centre": [centre.x, centre.y],
            "radius": radius,
        }))
    })
}

/// Records the outline of a collision box.
#[allow(unused)]
pub fn debug_box(name: &str, obb: &OrientedBox) {
    #[cfg(feature = "debug")]
    DEBUG_FRAME.with(|frame| {
        let corners = obb.corners().map(|p| [p.x, p.y]);
        frame.borrow_mut().push(json!({
            "type": "polygon",
            "name": name,
            "points": corners,
        }))
    })
}

/// Takes everything recorded since the last call, as a JSON array.
#[cfg(feature = "debug")]
pub fn take_debug_frame() -> serde_json::Value {
    json!(DEBUG_FRAME.with(|frame| frame.take()))
}
