use crate::pre::read_sim_pars::SimPars;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Parser, Clone)]
#[clap(
    version = "0.1.0",
    name = "racesim",
    about = "A multi-agent race simulator with self-learning cars"
)]
pub struct SimOpts {
    // FLAGS ---------------------------------------------------------------------------------------
    /// Activate debug logging
    #[clap(short, long)]
    pub debug: bool,

    /// Simulate in real time on a background tick thread
    #[clap(long)]
    pub realtime: bool,

    /// Print the final race snapshot as JSON
    #[clap(long)]
    pub json: bool,

    // OPTIONS -------------------------------------------------------------------------------------
    /// Set number of simulation runs (headless mode only, runs are executed in parallel)
    #[clap(short, long, default_value = "1")]
    pub no_sim_runs: u32,

    /// Set path to the simulation parameter file (OPTIONAL: defaults are used if not set)
    #[clap(short, long)]
    pub parfile_path: Option<PathBuf>,

    /// Override the number of cars
    #[clap(long)]
    pub no_cars: Option<u32>,

    /// Override the random seed of the race
    #[clap(short, long)]
    pub seed: Option<u64>,

    /// Abort the race after this number of ticks
    #[clap(short, long, default_value = "20000")]
    pub max_ticks: u64,

    /// Set tick period in milliseconds (real-time mode only)
    #[clap(long, default_value = "50")]
    pub tick_period_ms: u64,

    /// Set real-time factor (real-time mode only)
    #[clap(short, long, default_value = "1.0")]
    pub realtime_factor: f64,

    /// Write the per-car results to this CSV file
    #[clap(long)]
    pub results_path: Option<PathBuf>,
}

impl SimOpts {
    /// check_opts rejects option values the simulation cannot work with.
    pub fn check_opts(&self) -> anyhow::Result<()> {
        if self.no_sim_runs == 0 {
            anyhow::bail!("Number of simulation runs must be at least 1!");
        }
        if self.tick_period_ms == 0 {
            anyhow::bail!("Tick period must be at least 1ms!");
        }
        if !(self.realtime_factor.is_finite() && self.realtime_factor > 0.0) {
            anyhow::bail!("Real-time factor must be a positive number!");
        }
        Ok(())
    }

    /// apply_overrides writes the command line overrides into the simulation parameters.
    pub fn apply_overrides(&self, sim_pars: &mut SimPars) {
        if let Some(no_cars) = self.no_cars {
            sim_pars.race_pars.no_cars = no_cars;
        }
        if let Some(seed) = self.seed {
            sim_pars.race_pars.seed = Some(seed);
        }
    }

    /// tick_period returns the wall clock period of one tick, scaled by the real-time factor.
    pub fn tick_period(&self) -> Duration {
        Duration::from_secs_f64(self.tick_period_ms as f64 / 1000.0 / self.realtime_factor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let opts = SimOpts::parse_from(&["racesim"]);
        assert!(opts.check_opts().is_ok());
        assert_eq!(opts.no_sim_runs, 1);
        assert_eq!(opts.tick_period(), Duration::from_millis(50));
    }

    #[test]
    fn overrides_replace_parameters() {
        let opts = SimOpts::parse_from(&["racesim", "--no-cars", "2", "--seed", "99"]);
        let mut sim_pars = SimPars::default();
        opts.apply_overrides(&mut sim_pars);
        assert_eq!(sim_pars.race_pars.no_cars, 2);
        assert_eq!(sim_pars.race_pars.seed, Some(99));
    }

    #[test]
    fn realtime_factor_scales_period() {
        let opts = SimOpts::parse_from(&["racesim", "--realtime", "-r", "2.0"]);
        assert_eq!(opts.tick_period(), Duration::from_millis(25));
    }

    #[test]
    fn zero_runs_are_rejected() {
        let opts = SimOpts::parse_from(&["racesim", "-n", "0"]);
        assert!(opts.check_opts().is_err());
    }
}
