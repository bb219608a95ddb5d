use crate::core::sensor::SensorReadings;
use crate::core::track::{Checkpoint, Segment};
use crate::post::race_result::Finisher;
use anyhow::Context;
use serde::{Deserialize, Serialize};

/// (Hz) Maximum rate at which race states are published to a visualization.
pub const MAX_GUI_UPDATE_FREQUENCY: f64 = 20.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RgbColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl RgbColor {
    /// from_hex parses a CSS color string, e.g. "#FF0000".
    pub fn from_hex(hex: &str) -> anyhow::Result<RgbColor> {
        let color = hex
            .parse::<css_color_parser::Color>()
            .with_context(|| format!("Could not parse color {}!", hex))?;

        Ok(RgbColor {
            r: color.r,
            g: color.g,
            b: color.b,
        })
    }
}

/// CarState is the per-car part of a race snapshot. `position` is only set for finished cars.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CarState {
    pub id: u32,
    pub x: f64,
    pub y: f64,
    pub angle: f64,
    pub speed: f64,
    pub lap: u32,
    pub progress: f64,
    pub color: String,
    pub rgb: RgbColor,
    pub crashed: bool,
    pub finished: bool,
    pub position: Option<u32>,
}

/// RaceState is a consistent snapshot of the whole race, taken between two ticks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RaceState {
    pub cars: Vec<CarState>,
    pub track: Vec<Segment>,
    pub checkpoints: Vec<Checkpoint>,
    pub max_laps: u32,
    pub time: u64,
    pub race_finished: bool,
    pub winners: Vec<u32>,
    pub finishers: Vec<Finisher>,
    pub cars_remaining: u32,
}

/// CarProbe exposes the current pose and sensor readings of a single car for inspection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarProbe {
    pub id: u32,
    pub x: f64,
    pub y: f64,
    pub speed: f64,
    pub angle: f64,
    pub sensors: SensorReadings,
}
