use crate::core::race::Race;
use crate::interfaces::gui_interface::{RaceState, MAX_GUI_UPDATE_FREQUENCY};
use crate::post::race_result::RaceResult;
use crate::pre::read_sim_pars::SimPars;
use flume::{Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Tick period of the real-time driver if nothing else is configured (20 Hz).
pub const DEFAULT_TICK_PERIOD: Duration = Duration::from_millis(50);

/// handle_race creates and simulates a race on the basis of the inserted parameters as fast as
/// possible, and returns the results for post-processing. The race is aborted after `max_ticks`.
pub fn handle_race(sim_pars: &SimPars, max_ticks: u64) -> anyhow::Result<RaceResult> {
    let mut race = Race::new(sim_pars)?;
    race.start();
    simulate_race(&mut race, max_ticks);
    Ok(race.get_race_result())
}

/// simulate_race ticks a started race until it is finished or `max_ticks` is reached.
pub fn simulate_race(race: &mut Race, max_ticks: u64) {
    while !race.is_finished() && race.race_time < max_ticks {
        race.simulate_timestep();

        if race.race_time % 500 == 0 {
            let leader_prog = race
                .cars_list
                .iter()
                .map(|car| car.sh.get_race_prog())
                .fold(0.0, f64::max);
            debug!(
                "Simulating... Current race time is {} ticks, leader progress is {:.2} laps",
                race.race_time, leader_prog
            );
        }
    }

    if !race.is_finished() {
        warn!(
            "Race aborted after {} ticks, {} of {} cars finished",
            race.race_time,
            race.get_finishers().len(),
            race.cars_list.len()
        );
    }
}

// -------------------------------------------------------------------------------------------------
// REAL-TIME DRIVER --------------------------------------------------------------------------------
// -------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverCommand {
    Stop,
}

/// lock_race locks the shared race. A panic on another thread must not take the race down with
/// it, so a poisoned lock is recovered.
pub fn lock_race(race: &Mutex<Race>) -> MutexGuard<'_, Race> {
    race.lock().unwrap_or_else(PoisonError::into_inner)
}

/// RaceDriver ticks a shared race periodically on a background thread. Readers take snapshots
/// through the same lock, so they never observe a half-finished tick.
#[derive(Debug)]
pub struct RaceDriver {
    race: Arc<Mutex<Race>>,
    tick_period: Duration,
    state_tx: Option<Sender<RaceState>>,
    cmd_tx: Option<Sender<DriverCommand>>,
    handle: Option<JoinHandle<()>>,
}

impl RaceDriver {
    pub fn new(race: Race, tick_period: Duration) -> RaceDriver {
        RaceDriver {
            race: Arc::new(Mutex::new(race)),
            tick_period,
            state_tx: None,
            cmd_tx: None,
            handle: None,
        }
    }

    /// with_state_sender makes the tick thread publish race states, at most with
    /// `MAX_GUI_UPDATE_FREQUENCY`.
    pub fn with_state_sender(mut self, state_tx: Sender<RaceState>) -> RaceDriver {
        self.state_tx = Some(state_tx);
        self
    }

    pub fn race(&self) -> Arc<Mutex<Race>> {
        Arc::clone(&self.race)
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// start starts the race (reset and grid placement) and spawns the tick thread. A tick thread
    /// that is already running is stopped first.
    pub fn start(&mut self) {
        self.stop();
        lock_race(&self.race).start();

        let (cmd_tx, cmd_rx) = flume::bounded(1);
        let race = Arc::clone(&self.race);
        let state_tx = self.state_tx.clone();
        let tick_period = self.tick_period;

        self.handle = Some(thread::spawn(move || {
            tick_loop(race, cmd_rx, state_tx, tick_period)
        }));
        self.cmd_tx = Some(cmd_tx);
        info!("Tick thread started with a period of {:?}", self.tick_period);
    }

    /// stop stops the tick thread and waits until it has exited. Afterwards no further ticks
    /// happen.
    pub fn stop(&mut self) {
        if let Some(cmd_tx) = self.cmd_tx.take() {
            // the thread may already be gone, the join below handles that case
            let _ = cmd_tx.send(DriverCommand::Stop);
        }

        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Tick thread panicked!");
            } else {
                info!("Tick thread stopped");
            }
        }
    }

    /// reset stops the tick thread and resets the race.
    pub fn reset(&mut self) {
        self.stop();
        lock_race(&self.race).reset();
    }

    /// tick advances the race by one step. It is a no-op unless the race is running.
    pub fn tick(&self) {
        lock_race(&self.race).simulate_timestep();
    }

    pub fn snapshot(&self) -> RaceState {
        lock_race(&self.race).get_race_state()
    }

    pub fn get_race_result(&self) -> RaceResult {
        lock_race(&self.race).get_race_result()
    }
}

impl Drop for RaceDriver {
    fn drop(&mut self) {
        self.stop();
    }
}

fn tick_loop(
    race: Arc<Mutex<Race>>,
    cmd_rx: Receiver<DriverCommand>,
    mut state_tx: Option<Sender<RaceState>>,
    tick_period: Duration,
) {
    let publish_period = Duration::from_secs_f64(1.0 / MAX_GUI_UPDATE_FREQUENCY);
    let mut t_last_publish: Option<Instant> = None;

    loop {
        let t_start = Instant::now();

        let race_state = {
            let mut race = lock_race(&race);
            race.simulate_timestep();

            let publish = state_tx.is_some()
                && t_last_publish.map_or(true, |t| {
                    t.elapsed() + Duration::from_millis(1) >= publish_period
                });
            if publish {
                Some(race.get_race_state())
            } else {
                None
            }
        };

        if let Some(race_state) = race_state {
            let disconnected = state_tx
                .as_ref()
                .map_or(false, |tx| tx.send(race_state).is_err());
            if disconnected {
                debug!("Race state receiver disconnected, no further states are published");
                state_tx = None;
            }
            t_last_publish = Some(Instant::now());
        }

        let timeout = match tick_period.checked_sub(t_start.elapsed()) {
            Some(remaining) => remaining,
            None => {
                warn!("Could not keep up with real-time!");
                Duration::ZERO
            }
        };

        match cmd_rx.recv_timeout(timeout) {
            Ok(DriverCommand::Stop) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::race::RaceStatus;

    fn sim_pars(no_cars: u32) -> SimPars {
        let mut sim_pars = SimPars::default();
        sim_pars.race_pars.no_cars = no_cars;
        sim_pars.race_pars.seed = Some(5);
        sim_pars.policy_pars.bootstrap_epochs = 20;
        sim_pars
    }

    #[test]
    fn headless_race_stops_at_tick_limit() {
        let result = handle_race(&sim_pars(2), 300).unwrap();
        assert!(result.race_time <= 300);
        assert_eq!(result.car_summaries.len(), 2);
        assert_eq!(result.seed, 5);
    }

    #[test]
    fn headless_race_is_reproducible() {
        let a = handle_race(&sim_pars(3), 400).unwrap();
        let b = handle_race(&sim_pars(3), 400).unwrap();
        for (ca, cb) in a.car_summaries.iter().zip(b.car_summaries.iter()) {
            assert_eq!(ca.total_distance, cb.total_distance);
            assert_eq!(ca.no_crashes, cb.no_crashes);
        }
    }

    #[test]
    fn manual_ticks_require_start() {
        let race = Race::new(&sim_pars(1)).unwrap();
        let mut driver = RaceDriver::new(race, DEFAULT_TICK_PERIOD);

        driver.tick();
        assert_eq!(driver.snapshot().time, 0);

        lock_race(&driver.race()).start();
        driver.tick();
        driver.tick();
        assert_eq!(driver.snapshot().time, 2);

        driver.reset();
        assert_eq!(driver.snapshot().time, 0);
    }

    #[test]
    fn driver_ticks_until_stopped() {
        let race = Race::new(&sim_pars(2)).unwrap();
        let mut driver = RaceDriver::new(race, Duration::from_millis(2));

        driver.start();
        assert!(driver.is_running());
        thread::sleep(Duration::from_millis(100));
        driver.stop();
        assert!(!driver.is_running());

        let time = driver.snapshot().time;
        assert!(time > 0);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(driver.snapshot().time, time);
    }

    #[test]
    fn driver_reset_returns_to_grid() {
        let race = Race::new(&sim_pars(2)).unwrap();
        let mut driver = RaceDriver::new(race, Duration::from_millis(2));

        driver.start();
        thread::sleep(Duration::from_millis(20));
        driver.reset();

        assert!(!driver.is_running());
        let state = driver.snapshot();
        assert_eq!(state.time, 0);
        assert_eq!(lock_race(&driver.race()).status, RaceStatus::NotStarted);
        assert_eq!(state.cars[0].x, 100.0);
        assert_eq!(state.cars[0].y, 300.0);
    }

    #[test]
    fn driver_publishes_states() {
        let (tx, rx) = flume::unbounded();
        let race = Race::new(&sim_pars(1)).unwrap();
        let mut driver = RaceDriver::new(race, Duration::from_millis(5)).with_state_sender(tx);

        driver.start();
        let state = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        drop(driver);

        assert_eq!(state.cars.len(), 1);
        assert!(state.time >= 1);
        assert_eq!(state.max_laps, 3);
    }
}
