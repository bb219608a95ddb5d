use helpers::general::InputValueError;
use helpers::geometry::{point_to_segment_distance, Point};
use serde::{Deserialize, Serialize};

/// (m) Tolerance added to half the visual track width when testing whether a point is on track.
pub const ON_TRACK_MARGIN: f64 = 5.0;

/// * `x1`, `y1` - Start point of the segment centre line
/// * `x2`, `y2` - End point of the segment centre line
/// * `width` - Visual width of the track along this segment
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq)]
pub struct Segment {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
    pub width: f64,
}

impl Segment {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64, width: f64) -> Segment {
        Segment {
            x1,
            y1,
            x2,
            y2,
            width,
        }
    }

    pub fn start(&self) -> Point {
        [self.x1, self.y1]
    }

    pub fn end(&self) -> Point {
        [self.x2, self.y2]
    }

    /// contains returns true if p lies within half the track width plus the tolerance margin.
    pub fn contains(&self, p: Point) -> bool {
        point_to_segment_distance(p, self.start(), self.end())
            <= self.width / 2.0 + ON_TRACK_MARGIN
    }
}

/// * `cx`, `cy` - Centre of the checkpoint zone
/// * `radius` - Radius of the checkpoint zone
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq)]
pub struct Checkpoint {
    pub cx: f64,
    pub cy: f64,
    pub radius: f64,
}

impl Checkpoint {
    pub fn new(cx: f64, cy: f64, radius: f64) -> Checkpoint {
        Checkpoint { cx, cy, radius }
    }

    pub fn center(&self) -> Point {
        [self.cx, self.cy]
    }
}

/// * `name` - Track name
/// * `segments` - Centre line segments with their widths
/// * `checkpoints` - Checkpoints in driving order, index 0 is the start/finish line
/// * `grid_origin` - Position of the first grid slot
/// * `grid_spacing` - Offset between two grid slots, y offset repeats every three slots
/// * `grid_heading` - (deg) Heading of the cars on the grid
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct TrackPars {
    pub name: String,
    pub segments: Vec<Segment>,
    pub checkpoints: Vec<Checkpoint>,
    pub grid_origin: [f64; 2],
    pub grid_spacing: [f64; 2],
    pub grid_heading: f64,
}

impl Default for TrackPars {
    /// Rectangular circuit, driven counter-clockwise in screen coordinates.
    fn default() -> Self {
        let width = 100.0;
        TrackPars {
            name: String::from("Rectangle"),
            segments: vec![
                Segment::new(50.0, 400.0, 600.0, 400.0, width),
                Segment::new(600.0, 400.0, 600.0, 100.0, width),
                Segment::new(600.0, 100.0, 50.0, 100.0, width),
                Segment::new(50.0, 100.0, 50.0, 400.0, width),
            ],
            checkpoints: vec![
                Checkpoint::new(100.0, 400.0, 40.0),
                Checkpoint::new(600.0, 400.0, 40.0),
                Checkpoint::new(600.0, 100.0, 40.0),
                Checkpoint::new(50.0, 100.0, 40.0),
            ],
            grid_origin: [100.0, 300.0],
            grid_spacing: [40.0, 10.0],
            grid_heading: 90.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Track {
    pub name: String,
    pub segments: Vec<Segment>,
    pub checkpoints: Vec<Checkpoint>,
    pub grid_origin: [f64; 2],
    pub grid_spacing: [f64; 2],
    pub grid_heading: f64,
}

impl Track {
    /// new validates the track parameters and creates the track. The checkpoint cycle is only
    /// defined for at least one checkpoint, therefore empty lists are rejected here.
    pub fn new(track_pars: &TrackPars) -> Result<Track, InputValueError> {
        if track_pars.checkpoints.is_empty() {
            return Err(InputValueError::new(format!(
                "track {} must contain at least one checkpoint",
                track_pars.name
            )));
        }
        if track_pars.segments.is_empty() {
            return Err(InputValueError::new(format!(
                "track {} must contain at least one segment",
                track_pars.name
            )));
        }

        for (i, segment) in track_pars.segments.iter().enumerate() {
            let coords = [segment.x1, segment.y1, segment.x2, segment.y2];
            if !coords.iter().all(|c| c.is_finite())
                || !segment.width.is_finite()
                || segment.width <= 0.0
            {
                return Err(InputValueError::new(format!(
                    "segment {} of track {} has invalid dimensions",
                    i, track_pars.name
                )));
            }
        }

        for (i, checkpoint) in track_pars.checkpoints.iter().enumerate() {
            if !checkpoint.cx.is_finite()
                || !checkpoint.cy.is_finite()
                || !checkpoint.radius.is_finite()
                || checkpoint.radius <= 0.0
            {
                return Err(InputValueError::new(format!(
                    "checkpoint {} of track {} has invalid dimensions",
                    i, track_pars.name
                )));
            }
        }

        Ok(Track {
            name: track_pars.name.to_owned(),
            segments: track_pars.segments.to_owned(),
            checkpoints: track_pars.checkpoints.to_owned(),
            grid_origin: track_pars.grid_origin,
            grid_spacing: track_pars.grid_spacing,
            grid_heading: track_pars.grid_heading,
        })
    }

    pub fn is_on_track(&self, p: Point) -> bool {
        is_on_track(p, &self.segments)
    }

    pub fn no_checkpoints(&self) -> usize {
        self.checkpoints.len()
    }

    /// next_checkpoint_idx returns the index following idx in the cyclic checkpoint order.
    pub fn next_checkpoint_idx(&self, idx: usize) -> usize {
        (idx + 1) % self.checkpoints.len()
    }

    /// grid_position returns the reset position of the grid slot with the given index.
    pub fn grid_position(&self, idx: usize) -> Point {
        [
            self.grid_origin[0] + idx as f64 * self.grid_spacing[0],
            self.grid_origin[1] + (idx % 3) as f64 * self.grid_spacing[1],
        ]
    }
}

/// is_on_track returns true if p lies within `width / 2 + ON_TRACK_MARGIN` of any segment.
pub fn is_on_track(p: Point, segments: &[Segment]) -> bool {
    segments.iter().any(|segment| segment.contains(p))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_track_is_valid() {
        let track = Track::new(&TrackPars::default()).unwrap();
        assert_eq!(track.no_checkpoints(), 4);
        assert_eq!(track.segments.len(), 4);
    }

    #[test]
    fn track_without_checkpoints_is_rejected() {
        let pars = TrackPars {
            checkpoints: vec![],
            ..TrackPars::default()
        };
        let err = Track::new(&pars).unwrap_err();
        assert!(err.msg.contains("checkpoint"));
    }

    #[test]
    fn track_without_segments_is_rejected() {
        let pars = TrackPars {
            segments: vec![],
            ..TrackPars::default()
        };
        assert!(Track::new(&pars).is_err());
    }

    #[test]
    fn non_positive_width_is_rejected() {
        let mut pars = TrackPars::default();
        pars.segments[2].width = 0.0;
        assert!(Track::new(&pars).is_err());
    }

    #[test]
    fn on_track_uses_half_width_plus_margin() {
        let segments = [Segment::new(0.0, 0.0, 100.0, 0.0, 20.0)];
        assert!(is_on_track([50.0, 0.0], &segments));
        assert!(is_on_track([50.0, 15.0], &segments));
        assert!(!is_on_track([50.0, 15.1], &segments));
        // beyond the end point the distance is measured to the end point
        assert!(is_on_track([114.0, 0.0], &segments));
        assert!(!is_on_track([116.0, 0.0], &segments));
    }

    #[test]
    fn any_matching_segment_qualifies() {
        let track = Track::new(&TrackPars::default()).unwrap();
        assert!(track.is_on_track([600.0, 250.0]));
        assert!(track.is_on_track([300.0, 100.0]));
        assert!(!track.is_on_track([300.0, 250.0]));
    }

    #[test]
    fn checkpoint_indices_cycle() {
        let track = Track::new(&TrackPars::default()).unwrap();
        assert_eq!(track.next_checkpoint_idx(0), 1);
        assert_eq!(track.next_checkpoint_idx(3), 0);
    }

    #[test]
    fn grid_positions_are_staggered() {
        let track = Track::new(&TrackPars::default()).unwrap();
        assert_eq!(track.grid_position(0), [100.0, 300.0]);
        assert_eq!(track.grid_position(1), [140.0, 310.0]);
        assert_eq!(track.grid_position(3), [220.0, 300.0]);
    }
}
