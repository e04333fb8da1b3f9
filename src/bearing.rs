//! Angle helpers shared by the heading pipeline and the session.
//!
//! Headings are compass bearings in [0, 360), clockwise from north.
//! Relative bearings are signed offsets in (-180, 180]: 0 means the
//! destination is straight ahead, positive means it is to the right.

/// Wrap any angle into (-180, 180].
pub fn normalize(angle: f64) -> f64 {
    let wrapped = (angle + 180.0).rem_euclid(360.0) - 180.0;
    // rem_euclid maps exact multiples onto the closed end; 180 stays 180
    if wrapped <= -180.0 {
        wrapped + 360.0
    } else {
        wrapped
    }
}

/// Wrap any angle into [0, 360).
pub fn normalize_heading(angle: f64) -> f64 {
    let wrapped = angle.rem_euclid(360.0);
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

/// Bearing to the destination as seen from the current heading.
pub fn relative_bearing(destination_bearing: f64, current_heading: f64) -> f64 {
    normalize(destination_bearing - current_heading)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_normalize_range() {
        let mut angle = -1080.0;
        while angle <= 1080.0 {
            let n = normalize(angle);
            assert!(n > -180.0 && n <= 180.0, "normalize({}) = {}", angle, n);
            angle += 7.25;
        }
    }

    #[test]
    fn test_normalize_edges() {
        assert_eq!(normalize(180.0), 180.0);
        assert_eq!(normalize(-180.0), 180.0);
        assert_eq!(normalize(540.0), 180.0);
        assert_eq!(normalize(0.0), 0.0);
        assert_eq!(normalize(360.0), 0.0);
        assert_relative_eq!(normalize(-179.999), -179.999, epsilon = 1e-9);
        assert_relative_eq!(normalize(190.0), -170.0, epsilon = 1e-9);
    }

    #[test]
    fn test_relative_bearing() {
        assert_eq!(relative_bearing(296.0, 296.0), 0.0);
        assert_relative_eq!(relative_bearing(296.0, 206.0), 90.0);
        assert_relative_eq!(relative_bearing(10.0, 350.0), 20.0);
        assert_relative_eq!(relative_bearing(350.0, 10.0), -20.0);
    }

    #[test]
    fn test_normalize_heading() {
        assert_eq!(normalize_heading(360.0), 0.0);
        assert_relative_eq!(normalize_heading(-90.0), 270.0);
        assert_relative_eq!(normalize_heading(725.0), 5.0);
        assert!(normalize_heading(-1e-18) < 360.0);
    }
}
