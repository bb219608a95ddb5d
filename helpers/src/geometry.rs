/// A point in track coordinates, `[x, y]`.
pub type Point = [f64; 2];

/// distance returns the Euclidean distance between two points.
pub fn distance(a: Point, b: Point) -> f64 {
    (b[0] - a[0]).hypot(b[1] - a[1])
}

/// point_to_segment_distance returns the distance between point p and the segment [a, b]. The
/// projection is clamped to the segment end points, i.e. the distance is not measured against the
/// infinite line. For a degenerate segment (a == b) the distance between p and a is returned.
pub fn point_to_segment_distance(p: Point, a: Point, b: Point) -> f64 {
    let seg = [b[0] - a[0], b[1] - a[1]];
    let rel = [p[0] - a[0], p[1] - a[1]];
    let seg_len_sq = seg[0] * seg[0] + seg[1] * seg[1];

    if seg_len_sq == 0.0 {
        return distance(p, a);
    }

    let t = ((rel[0] * seg[0] + rel[1] * seg[1]) / seg_len_sq).clamp(0.0, 1.0);
    let closest = [a[0] + t * seg[0], a[1] + t * seg[1]];

    distance(p, closest)
}

/// normalize_deg maps an angle in degrees into [0.0, 360.0[.
pub fn normalize_deg(angle: f64) -> f64 {
    let angle = angle.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360.0 for tiny negative inputs
    if angle >= 360.0 {
        0.0
    } else {
        angle
    }
}

/// heading_deg returns the heading (degrees, [0.0, 360.0[) of the direction from one point to
/// another.
pub fn heading_deg(from: Point, to: Point) -> f64 {
    normalize_deg((to[1] - from[1]).atan2(to[0] - from[0]).to_degrees())
}
