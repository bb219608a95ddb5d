use crate::core::track::Track;

pub const NO_SENSORS: usize = 5;

/// (deg) Ray directions relative to the car heading.
pub const SENSOR_ANGLES: [f64; NO_SENSORS] = [-45.0, -22.5, 0.0, 22.5, 45.0];

/// Sensor readings, 1.0 if the end point of the ray is on track, otherwise 0.0.
pub type SensorReadings = [f64; NO_SENSORS];

/// sense_track casts the sensor rays from the given pose. The sensors are binary proximity
/// sensors: each one only tells whether the track continues at `range` ahead in its direction, it
/// does not measure the distance to the track edge.
pub fn sense_track(x: f64, y: f64, heading: f64, range: f64, track: &Track) -> SensorReadings {
    let mut readings = [0.0; NO_SENSORS];

    for (reading, sensor_angle) in readings.iter_mut().zip(SENSOR_ANGLES.iter()) {
        let dir = (heading + sensor_angle).to_radians();
        let end = [x + dir.cos() * range, y + dir.sin() * range];

        if track.is_on_track(end) {
            *reading = 1.0;
        }
    }

    readings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::track::{Checkpoint, Segment, TrackPars};

    fn straight_track() -> Track {
        Track::new(&TrackPars {
            segments: vec![Segment::new(0.0, 0.0, 1000.0, 0.0, 100.0)],
            checkpoints: vec![Checkpoint::new(0.0, 0.0, 40.0)],
            ..TrackPars::default()
        })
        .unwrap()
    }

    #[test]
    fn inner_rays_clear_along_straight() {
        let track = straight_track();
        // the 45 deg rays end ~56.6 off the centre line, beyond 100 / 2 + 5
        assert_eq!(
            sense_track(200.0, 0.0, 0.0, 80.0, &track),
            [0.0, 1.0, 1.0, 1.0, 0.0]
        );
    }

    #[test]
    fn all_clear_along_wide_straight() {
        let track = Track::new(&TrackPars {
            segments: vec![Segment::new(0.0, 0.0, 1000.0, 0.0, 110.0)],
            checkpoints: vec![Checkpoint::new(0.0, 0.0, 40.0)],
            ..TrackPars::default()
        })
        .unwrap();
        assert_eq!(sense_track(200.0, 0.0, 0.0, 80.0, &track), [1.0; NO_SENSORS]);
    }

    #[test]
    fn facing_the_edge_only_sees_grass_ahead() {
        let track = straight_track();
        // heading across the track, 80 units away from the centre line is off track
        let readings = sense_track(200.0, 0.0, 90.0, 80.0, &track);
        assert_eq!(readings[2], 0.0);
        // the 45 deg rays end at ~56.6 lateral offset, also beyond 55
        assert_eq!(readings[0], 0.0);
        assert_eq!(readings[4], 0.0);
    }

    #[test]
    fn sensors_are_relative_to_heading() {
        let track = straight_track();
        // near the left edge heading along the track: left rays leave the track
        let readings = sense_track(200.0, -30.0, 0.0, 80.0, &track);
        assert_eq!(readings, [0.0, 0.0, 1.0, 1.0, 1.0]);
    }
}
