use anyhow::Context;
use helpers::general::{argsort, SortOrder};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Finisher is recorded once per car when it completes its last lap.
/// * `id` - Car id
/// * `position` - Finishing position, starting at 1
/// * `finish_time` - (ticks) Race time at which the car finished
/// * `lap` - Completed laps at the finish
/// * `progress` - Race progress at the finish
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Finisher {
    pub id: u32,
    pub position: u32,
    pub finish_time: u64,
    pub lap: u32,
    pub progress: f64,
}

/// CarSummary contains the statistics of a car at the end of the simulation.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CarSummary {
    pub car_id: u32,
    pub color: String,
    pub position: Option<u32>,
    pub finish_time: Option<u64>,
    pub laps: u32,
    pub progress: f64,
    pub no_crashes: u32,
    pub total_distance: f64,
    pub reward_sum: f64,
}

/// RaceResult contains all race information that is required for post-processing the results.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RaceResult {
    pub track_name: String,
    pub max_laps: u32,
    pub seed: u64,
    pub race_time: u64,
    pub race_finished: bool,
    pub finishers: Vec<Finisher>,
    pub car_summaries: Vec<CarSummary>,
}

impl RaceResult {
    /// print_results prints the finishing order and the car statistics to the console output.
    pub fn print_results(&self) {
        println!(
            "RESULT: {} ({} laps, seed {}), race time {} ticks, finished: {}",
            self.track_name, self.max_laps, self.seed, self.race_time, self.race_finished
        );

        println!("RESULT: Finishing order");
        println!("pos, car, finish time");
        for finisher in self.finishers.iter() {
            println!(
                "{:3}, {:3}, {:8} ticks",
                finisher.position, finisher.id, finisher.finish_time
            );
        }

        // cars ordered by race progress
        let progresses: Vec<f64> = self.car_summaries.iter().map(|s| s.progress).collect();
        let order = argsort(&progresses, SortOrder::Descending);

        println!("RESULT: Car statistics");
        println!("car, laps, progress, crashes, distance, reward");
        for summary in order.iter().map(|&idx| &self.car_summaries[idx]) {
            println!(
                "{:3}, {:4}, {:8.3}, {:7}, {:8.1}, {:8.1}",
                summary.car_id,
                summary.laps,
                summary.progress,
                summary.no_crashes,
                summary.total_distance,
                summary.reward_sum
            );
        }
    }

    /// write_results_csv writes one row per car to the given CSV file.
    pub fn write_results_csv(&self, path: &Path) -> anyhow::Result<()> {
        let mut writer = csv::Writer::from_path(path)
            .with_context(|| format!("Failed to create results file {}!", path.display()))?;

        for summary in self.car_summaries.iter() {
            writer
                .serialize(summary)
                .with_context(|| format!("Failed to write results file {}!", path.display()))?;
        }
        writer.flush()?;
        Ok(())
    }

    /// get_winner returns the id of the car in position 1, if any car finished.
    pub fn get_winner(&self) -> Option<u32> {
        self.finishers
            .iter()
            .find(|finisher| finisher.position == 1)
            .map(|finisher| finisher.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result() -> RaceResult {
        RaceResult {
            track_name: String::from("Rectangle"),
            max_laps: 1,
            seed: 7,
            race_time: 900,
            race_finished: false,
            finishers: vec![Finisher {
                id: 1,
                position: 1,
                finish_time: 812,
                lap: 1,
                progress: 1.0,
            }],
            car_summaries: vec![
                CarSummary {
                    car_id: 0,
                    color: String::from("#FF0000"),
                    position: None,
                    finish_time: None,
                    laps: 0,
                    progress: 0.75,
                    no_crashes: 4,
                    total_distance: 1520.5,
                    reward_sum: 700.0,
                },
                CarSummary {
                    car_id: 1,
                    color: String::from("#00FF00"),
                    position: Some(1),
                    finish_time: Some(812),
                    laps: 1,
                    progress: 1.0,
                    no_crashes: 3,
                    total_distance: 2210.0,
                    reward_sum: 1300.0,
                },
            ],
        }
    }

    #[test]
    fn winner_is_first_position() {
        assert_eq!(result().get_winner(), Some(1));
    }

    #[test]
    fn csv_has_one_row_per_car() {
        let path = std::env::temp_dir().join(format!("racesim_results_{}.csv", std::process::id()));
        result().write_results_csv(&path).unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(&headers[0], "carId");
        assert_eq!(&headers[2], "position");

        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[0][2], "");
        assert_eq!(&rows[1][2], "1");

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn json_uses_camel_case() {
        let json = serde_json::to_string(&result().finishers[0]).unwrap();
        assert!(json.contains("\"finishTime\":812"));
    }
}
