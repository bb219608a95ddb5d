use clap::Parser;
use racesim::core::handle_race::{handle_race, simulate_race, RaceDriver};
use racesim::core::race::Race;
use racesim::interfaces::gui_interface::RaceState;
use racesim::post::race_result::RaceResult;
use racesim::pre::read_sim_pars::{read_sim_pars, SimPars};
use racesim::pre::sim_opts::SimOpts;
use rayon::prelude::*;
use std::time::{Duration, Instant};
use tracing::{info, warn};

fn init_logging(debug: bool) {
    let default_filter = if debug {
        "racesim=debug,racesim_cli=debug"
    } else {
        "racesim=info,racesim_cli=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();
}

/// run_realtime simulates a single race on the tick thread of a race driver and follows its
/// progress through the published race states.
fn run_realtime(sim_pars: &SimPars, sim_opts: &SimOpts) -> anyhow::Result<(RaceResult, RaceState)> {
    let (tx, rx) = flume::unbounded();
    let race = Race::new(sim_pars)?;
    let mut driver = RaceDriver::new(race, sim_opts.tick_period()).with_state_sender(tx);
    driver.start();

    let mut last_printed_time = 0;
    loop {
        let race_state = match rx.recv_timeout(Duration::from_secs(5)) {
            Ok(race_state) => race_state,
            Err(flume::RecvTimeoutError::Timeout) => {
                warn!("No race state received for 5s");
                continue;
            }
            Err(flume::RecvTimeoutError::Disconnected) => {
                anyhow::bail!("Tick thread exited unexpectedly!")
            }
        };

        if race_state.time >= last_printed_time + 200 {
            info!(
                "Simulating... Current race time is {} ticks, {} cars remaining",
                race_state.time, race_state.cars_remaining
            );
            last_printed_time = race_state.time;
        }

        if race_state.race_finished || race_state.time >= sim_opts.max_ticks {
            break;
        }
    }

    driver.stop();
    Ok((driver.get_race_result(), driver.snapshot()))
}

fn main() -> anyhow::Result<()> {
    // PRE-PROCESSING ------------------------------------------------------------------------------
    // get simulation options from the command line arguments
    let sim_opts: SimOpts = SimOpts::parse();
    sim_opts.check_opts()?;
    init_logging(sim_opts.debug);

    // get simulation parameters
    let mut sim_pars = if let Some(parfile_path) = &sim_opts.parfile_path {
        info!("Reading simulation parameters from {:?}", parfile_path);
        read_sim_pars(parfile_path)?
    } else {
        info!("No parameter file provided, using default parameters");
        SimPars::default()
    };
    sim_opts.apply_overrides(&mut sim_pars);

    // print race details
    info!(
        "Simulating {} cars on track {} for {} laps",
        sim_pars.race_pars.no_cars, sim_pars.track_pars.name, sim_pars.race_pars.max_laps
    );

    // EXECUTION -----------------------------------------------------------------------------------
    if sim_opts.realtime {
        if sim_opts.no_sim_runs > 1 {
            warn!("Multiple simulation runs are not supported in real-time mode, running one");
        }

        let (race_result, race_state) = run_realtime(&sim_pars, &sim_opts)?;
        race_result.print_results();

        if sim_opts.json {
            println!("{}", serde_json::to_string_pretty(&race_state)?);
        }
        if let Some(results_path) = &sim_opts.results_path {
            race_result.write_results_csv(results_path)?;
            info!("Results written to {:?}", results_path);
        }
    } else if sim_opts.no_sim_runs == 1 {
        let t_start = Instant::now();

        let mut race = Race::new(&sim_pars)?;
        race.start();
        simulate_race(&mut race, sim_opts.max_ticks);

        info!("Execution time: {}ms", t_start.elapsed().as_millis());

        let race_result = race.get_race_result();
        race_result.print_results();

        if sim_opts.json {
            println!("{}", serde_json::to_string_pretty(&race.get_race_state())?);
        }
        if let Some(results_path) = &sim_opts.results_path {
            race_result.write_results_csv(results_path)?;
            info!("Results written to {:?}", results_path);
        }
    } else {
        // fixed seeds are varied per run, otherwise every run would be identical
        let t_start = Instant::now();

        let race_results: Vec<RaceResult> = (0..sim_opts.no_sim_runs)
            .into_par_iter()
            .map(|run| {
                let mut sim_pars_run = sim_pars.clone();
                sim_pars_run.race_pars.seed =
                    sim_pars.race_pars.seed.map(|seed| seed.wrapping_add(run as u64));
                handle_race(&sim_pars_run, sim_opts.max_ticks)
            })
            .collect::<anyhow::Result<Vec<RaceResult>>>()?;

        info!(
            "Execution time: {}ms for {} runs",
            t_start.elapsed().as_millis(),
            sim_opts.no_sim_runs
        );

        let mut no_wins = vec![0u32; sim_pars.race_pars.no_cars as usize];
        for race_result in race_results.iter() {
            if let Some(winner) = race_result.get_winner() {
                no_wins[winner as usize] += 1;
            }
        }

        println!("RESULT: Wins over {} runs", sim_opts.no_sim_runs);
        println!("car, wins");
        for (car_id, wins) in no_wins.iter().enumerate() {
            println!("{:3}, {:4}", car_id, wins);
        }

        if sim_opts.json {
            println!("{}", serde_json::to_string_pretty(&race_results)?);
        }
        if let Some(results_path) = &sim_opts.results_path {
            if let Some(race_result) = race_results.last() {
                race_result.write_results_csv(results_path)?;
                info!("Results of the last run written to {:?}", results_path);
            }
        }
    }

    Ok(())
}
