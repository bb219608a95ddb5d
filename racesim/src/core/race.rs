use crate::core::car::Car;
use crate::core::policy::{create_policy, Policy};
use crate::core::track::Track;
use crate::interfaces::gui_interface::{CarProbe, CarState, RaceState, RgbColor};
use crate::post::race_result::{CarSummary, Finisher, RaceResult};
use crate::pre::read_sim_pars::SimPars;
use anyhow::Context;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info};

/// Cars slower than this get a small push every tick unless they are crashed or finished.
const ANTI_STALL_SPEED: f64 = 0.5;
const ANTI_STALL_PUSH: f64 = 0.1;
const ANTI_STALL_MAX_SPEED: f64 = 2.0;

/// * `max_laps` - Number of laps a car has to complete to finish
/// * `no_cars` - Number of participating cars
/// * `seed` - Seed of the race random number generator, drawn randomly if not set
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct RacePars {
    pub max_laps: u32,
    pub no_cars: u32,
    pub seed: Option<u64>,
}

impl Default for RacePars {
    fn default() -> Self {
        RacePars {
            max_laps: 3,
            no_cars: 5,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RaceStatus {
    NotStarted,
    Running,
    Finished,
}

impl Default for RaceStatus {
    fn default() -> Self {
        RaceStatus::NotStarted
    }
}

/// car_seed derives the seed of a car from the race seed, such that every car explores
/// differently but reproducibly.
pub fn car_seed(race_seed: u64, car_id: u32) -> u64 {
    race_seed ^ (car_id as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

#[derive(Debug)]
pub struct Race {
    pub race_time: u64,
    pub status: RaceStatus,
    pub max_laps: u32,
    pub track: Track,
    pub cars_list: Vec<Car>,
    rgb_colors: Vec<RgbColor>,
    finishers: Vec<Finisher>,
    finished_ids: HashSet<u32>,
    winners: Vec<u32>,
    seed: u64,
    rng: StdRng,
    // true while nothing happened since the last reset
    pristine: bool,
}

impl Race {
    /// new creates a race with cars using the configured policy backend. The race is returned in
    /// its reset state, i.e. not started.
    pub fn new(sim_pars: &SimPars) -> anyhow::Result<Race> {
        Race::new_with_policy_factory(sim_pars, |_| create_policy(&sim_pars.policy_pars))
    }

    /// new_with_policy_factory is like new but asks `policy_factory` for the policy of each car
    /// (called with the car id).
    pub fn new_with_policy_factory<F>(sim_pars: &SimPars, mut policy_factory: F) -> anyhow::Result<Race>
    where
        F: FnMut(u32) -> Box<dyn Policy>,
    {
        let race_pars = &sim_pars.race_pars;
        if race_pars.max_laps == 0 {
            anyhow::bail!("A race requires at least one lap!");
        }
        if race_pars.no_cars == 0 {
            anyhow::bail!("A race requires at least one car!");
        }

        sim_pars
            .car_pars
            .check_pars()
            .context("Invalid car parameters!")?;

        let track = Track::new(&sim_pars.track_pars).context("Failed to create track!")?;
        let seed = race_pars
            .seed
            .unwrap_or_else(|| rand::thread_rng().gen::<u64>());

        // create cars
        let mut cars_list = Vec::with_capacity(race_pars.no_cars as usize);
        let mut rgb_colors = Vec::with_capacity(race_pars.no_cars as usize);

        for car_id in 0..race_pars.no_cars {
            let car = Car::new(
                car_id,
                &sim_pars.car_pars,
                sim_pars.policy_pars.exploration_rate,
                race_pars.max_laps,
                track.no_checkpoints(),
                policy_factory(car_id),
                car_seed(seed, car_id),
            );
            rgb_colors.push(RgbColor::from_hex(&car.color)?);
            cars_list.push(car);
        }

        let mut race = Race {
            race_time: 0,
            status: RaceStatus::NotStarted,
            max_laps: race_pars.max_laps,
            track,
            cars_list,
            rgb_colors,
            finishers: Vec::with_capacity(race_pars.no_cars as usize),
            finished_ids: HashSet::with_capacity(race_pars.no_cars as usize),
            winners: Vec::with_capacity(race_pars.no_cars as usize),
            seed,
            rng: StdRng::seed_from_u64(seed),
            pristine: false,
        };
        // fresh cars are bootstrapped already, they only need their grid slots
        race.reset_grid(false);

        debug!(
            "Created race on track {} with {} cars (seed {})",
            race.track.name,
            race.cars_list.len(),
            seed
        );
        Ok(race)
    }

    // ---------------------------------------------------------------------------------------------
    // MAIN METHOD ---------------------------------------------------------------------------------
    // ---------------------------------------------------------------------------------------------

    /// simulate_timestep advances the race by one tick. It does nothing unless the race is
    /// running.
    pub fn simulate_timestep(&mut self) {
        if self.status != RaceStatus::Running {
            return;
        }

        self.race_time += 1;

        for car in self.cars_list.iter_mut() {
            if self.finished_ids.contains(&car.car_id) {
                continue;
            }

            car.update(&self.track);

            // record finisher exactly once
            if car.sh.get_compl_lap() >= self.max_laps && self.finished_ids.insert(car.car_id) {
                let position = self.finishers.len() as u32 + 1;
                self.finishers.push(Finisher {
                    id: car.car_id,
                    position,
                    finish_time: self.race_time,
                    lap: car.sh.get_compl_lap(),
                    progress: car.sh.get_race_prog(),
                });
                self.winners.push(car.car_id);
                car.speed = 0.0;

                info!(
                    "Car {} finished in position {} after {} ticks",
                    car.car_id, position, self.race_time
                );
            }

            if !car.sh.is_crashed()
                && !car.sh.is_finished()
                && car.speed < ANTI_STALL_SPEED
            {
                car.speed = (car.speed + ANTI_STALL_PUSH).min(ANTI_STALL_MAX_SPEED);
            }
        }

        if self.finishers.len() == self.cars_list.len() {
            self.status = RaceStatus::Finished;
            self.log_standings();
        }
    }

    // ---------------------------------------------------------------------------------------------
    // RACE CONTROL --------------------------------------------------------------------------------
    // ---------------------------------------------------------------------------------------------

    /// reset puts all cars back on the grid with freshly bootstrapped policies. The random number
    /// generator is reseeded, therefore resetting twice yields the same race.
    pub fn reset(&mut self) {
        self.reset_grid(true);
    }

    fn reset_grid(&mut self, reset_cars: bool) {
        self.race_time = 0;
        self.status = RaceStatus::NotStarted;
        self.finishers.clear();
        self.finished_ids.clear();
        self.winners.clear();
        self.rng = StdRng::seed_from_u64(self.seed);

        for (i, car) in self.cars_list.iter_mut().enumerate() {
            let speed = 2.0 + self.rng.gen::<f64>() * 2.0;
            if reset_cars {
                car.reset(self.track.grid_position(i), self.track.grid_heading, speed);
            } else {
                car.place(self.track.grid_position(i), self.track.grid_heading, speed);
            }
        }
        self.pristine = true;
    }

    /// start resets the race, spreads the cars around the grid and starts the clock. The reset is
    /// skipped if the race was not touched since the last one.
    pub fn start(&mut self) {
        if !self.pristine {
            self.reset();
        }
        self.pristine = false;

        let [gx, gy] = self.track.grid_origin;
        let dx = self.track.grid_spacing[0];

        for (i, car) in self.cars_list.iter_mut().enumerate() {
            let pos = [
                gx + i as f64 * dx,
                gy + self.rng.gen_range(-20..=20) as f64,
            ];
            let speed = 3.0 + self.rng.gen::<f64>() * 2.0;
            car.place(pos, self.track.grid_heading, speed);
        }

        self.status = RaceStatus::Running;
        info!(
            "Race started on track {} with {} cars and {} laps",
            self.track.name,
            self.cars_list.len(),
            self.max_laps
        );
    }

    fn log_standings(&self) {
        info!("Race finished after {} ticks, final standings:", self.race_time);
        for finisher in self.finishers.iter() {
            info!(
                "{:2}. car {} ({} ticks)",
                finisher.position, finisher.id, finisher.finish_time
            );
        }
    }

    // ---------------------------------------------------------------------------------------------
    // METHODS (HELPERS) ---------------------------------------------------------------------------
    // ---------------------------------------------------------------------------------------------

    pub fn is_finished(&self) -> bool {
        self.status == RaceStatus::Finished
    }

    pub fn get_finishers(&self) -> &[Finisher] {
        &self.finishers
    }

    pub fn get_winners(&self) -> &[u32] {
        &self.winners
    }

    fn get_finisher(&self, car_id: u32) -> Option<&Finisher> {
        self.finishers.iter().find(|finisher| finisher.id == car_id)
    }

    /// get_race_state returns a snapshot of the race for visualization and inspection.
    pub fn get_race_state(&self) -> RaceState {
        let cars = self
            .cars_list
            .iter()
            .zip(self.rgb_colors.iter())
            .map(|(car, rgb)| CarState {
                id: car.car_id,
                x: car.x,
                y: car.y,
                angle: car.angle,
                speed: car.speed,
                lap: car.sh.get_compl_lap(),
                progress: car.sh.get_race_prog(),
                color: car.color.to_owned(),
                rgb: *rgb,
                crashed: car.sh.is_crashed(),
                finished: self.finished_ids.contains(&car.car_id),
                position: self.get_finisher(car.car_id).map(|finisher| finisher.position),
            })
            .collect();

        RaceState {
            cars,
            track: self.track.segments.to_owned(),
            checkpoints: self.track.checkpoints.to_owned(),
            max_laps: self.max_laps,
            time: self.race_time,
            race_finished: self.is_finished(),
            winners: self.winners.to_owned(),
            finishers: self.finishers.to_owned(),
            cars_remaining: (self.cars_list.len() - self.finishers.len()) as u32,
        }
    }

    /// get_race_result returns the race result for post-processing. It can be called at any time,
    /// cars that did not finish have no position.
    pub fn get_race_result(&self) -> RaceResult {
        let car_summaries = self
            .cars_list
            .iter()
            .map(|car| {
                let finisher = self.get_finisher(car.car_id);
                CarSummary {
                    car_id: car.car_id,
                    color: car.color.to_owned(),
                    position: finisher.map(|f| f.position),
                    finish_time: finisher.map(|f| f.finish_time),
                    laps: car.sh.get_compl_lap(),
                    progress: car.sh.get_race_prog(),
                    no_crashes: car.no_crashes,
                    total_distance: car.total_distance,
                    reward_sum: car.reward_sum,
                }
            })
            .collect();

        RaceResult {
            track_name: self.track.name.to_owned(),
            max_laps: self.max_laps,
            seed: self.seed,
            race_time: self.race_time,
            race_finished: self.is_finished(),
            finishers: self.finishers.to_owned(),
            car_summaries,
        }
    }

    /// get_car_probe returns pose and current sensor readings of a car, None for unknown ids.
    pub fn get_car_probe(&self, car_id: u32) -> Option<CarProbe> {
        let car = self.cars_list.iter().find(|car| car.car_id == car_id)?;

        Some(CarProbe {
            id: car.car_id,
            x: car.x,
            y: car.y,
            speed: car.speed,
            angle: car.angle,
            sensors: car.sense(&self.track),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::policy::{Action, Features, Sample};
    use rand::RngCore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Policy that always returns the same action and never learns.
    #[derive(Debug)]
    struct FixedPolicy(Action);

    impl Policy for FixedPolicy {
        fn bootstrap(&mut self, _rng: &mut dyn RngCore) {}

        fn predict(&self, _features: &Features) -> Action {
            self.0
        }

        fn partial_fit(&mut self, _samples: &[Sample]) {}
    }

    fn sim_pars(no_cars: u32, max_laps: u32) -> SimPars {
        let mut sim_pars = SimPars::default();
        sim_pars.race_pars.no_cars = no_cars;
        sim_pars.race_pars.max_laps = max_laps;
        sim_pars.race_pars.seed = Some(1234);
        sim_pars.policy_pars.exploration_rate = 0.0;
        sim_pars
    }

    fn fixed_race(no_cars: u32, max_laps: u32, action: Action) -> Race {
        Race::new_with_policy_factory(&sim_pars(no_cars, max_laps), |_| {
            Box::new(FixedPolicy(action))
        })
        .unwrap()
    }

    #[test]
    fn new_race_is_reset_and_idle() {
        let mut race = fixed_race(3, 1, Action::new(1.0, 0.0));
        assert_eq!(race.status, RaceStatus::NotStarted);
        assert_eq!(race.cars_list[1].get_pos(), [140.0, 310.0]);
        assert_eq!(race.cars_list[1].angle, 90.0);

        let pos = race.cars_list[0].get_pos();
        race.simulate_timestep();
        assert_eq!(race.race_time, 0);
        assert_eq!(race.cars_list[0].get_pos(), pos);
    }

    #[test]
    fn invalid_parameters_are_rejected() {
        let mut pars = sim_pars(2, 3);
        pars.track_pars.checkpoints.clear();
        assert!(Race::new(&pars).is_err());

        assert!(Race::new(&sim_pars(0, 3)).is_err());
        assert!(Race::new(&sim_pars(2, 0)).is_err());
    }

    #[test]
    fn reset_twice_is_identical() {
        let mut race = Race::new(&sim_pars(5, 3)).unwrap();
        race.start();
        for _ in 0..100 {
            race.simulate_timestep();
        }

        race.reset();
        let first: Vec<_> = race.get_race_state().cars;
        race.reset();
        let second: Vec<_> = race.get_race_state().cars;

        assert_eq!(first, second);
        for (i, car) in first.iter().enumerate() {
            assert_eq!(car.id, i as u32);
            assert!(car.speed >= 2.0 && car.speed < 4.0);
            assert_eq!(car.lap, 0);
        }
    }

    #[test]
    fn start_spreads_cars_around_grid() {
        let mut race = fixed_race(5, 3, Action::new(1.0, 0.0));
        race.start();
        assert_eq!(race.status, RaceStatus::Running);

        for (i, car) in race.cars_list.iter().enumerate() {
            assert_eq!(car.x, 100.0 + i as f64 * 40.0);
            assert!((car.y - 300.0).abs() <= 20.0);
            assert_eq!(car.y.fract(), 0.0);
            assert!(car.speed >= 3.0 && car.speed < 5.0);
        }
    }

    #[test]
    fn stalled_car_gets_pushed() {
        let mut race = fixed_race(1, 3, Action::new(0.0, 0.0));
        race.start();
        race.cars_list[0].place([300.0, 400.0], 0.0, 0.0);

        race.simulate_timestep();
        let speed = race.cars_list[0].speed;
        assert!(speed > 0.0 && speed <= 0.1, "speed {}", speed);
    }

    #[test]
    fn finishers_are_recorded_once_in_order() {
        let mut race = fixed_race(5, 1, Action::new(1.0, 0.0));
        race.start();

        let mut ticks = 0;
        while !race.is_finished() && ticks < 20_000 {
            race.simulate_timestep();
            ticks += 1;
        }
        assert!(race.is_finished());

        let mut positions: Vec<u32> = race.get_finishers().iter().map(|f| f.position).collect();
        positions.sort_unstable();
        assert_eq!(positions, vec![1, 2, 3, 4, 5]);

        let ids: HashSet<u32> = race.get_finishers().iter().map(|f| f.id).collect();
        assert_eq!(ids.len(), 5);
        assert_eq!(race.get_winners().len(), 5);

        // finish times never decrease with the position
        for pair in race.get_finishers().windows(2) {
            assert!(pair[0].finish_time <= pair[1].finish_time);
        }

        // further ticks are no-ops
        let time = race.race_time;
        race.simulate_timestep();
        assert_eq!(race.race_time, time);
    }

    #[test]
    fn snapshot_reflects_finishers() {
        let mut race = fixed_race(2, 1, Action::new(1.0, 0.0));
        race.start();
        while !race.is_finished() && race.race_time < 20_000 {
            race.simulate_timestep();
        }

        let state = race.get_race_state();
        assert!(state.race_finished);
        assert_eq!(state.cars_remaining, 0);
        assert_eq!(state.checkpoints.len(), 4);
        for car in state.cars.iter() {
            assert!(car.finished);
            assert!(car.position.is_some());
            assert!(car.progress <= 1.0);
            assert_eq!(car.speed, 0.0);
        }

        let result = race.get_race_result();
        assert!(result.race_finished);
        assert_eq!(result.get_winner(), Some(race.get_winners()[0]));
    }

    #[test]
    fn car_probe_reports_sensors() {
        let mut race = fixed_race(2, 3, Action::new(1.0, 0.0));
        race.cars_list[1].place([300.0, 400.0], 0.0, 4.0);

        let probe = race.get_car_probe(1).unwrap();
        assert_eq!(probe.x, 300.0);
        assert_eq!(probe.speed, 4.0);
        // the 45 deg rays end beyond the track edge
        assert_eq!(probe.sensors, [0.0, 1.0, 1.0, 1.0, 0.0]);
        assert!(race.get_car_probe(7).is_none());
    }

    /// Policy that counts how often it was bootstrapped.
    #[derive(Debug)]
    struct CountingPolicy(Arc<AtomicUsize>);

    impl Policy for CountingPolicy {
        fn bootstrap(&mut self, _rng: &mut dyn RngCore) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }

        fn predict(&self, _features: &Features) -> Action {
            Action::new(1.0, 0.0)
        }

        fn partial_fit(&mut self, _samples: &[Sample]) {}
    }

    #[test]
    fn start_bootstraps_policies_once() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut race = Race::new_with_policy_factory(&sim_pars(3, 1), |_| {
            Box::new(CountingPolicy(Arc::clone(&counter)))
        })
        .unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 3);

        race.start();
        assert_eq!(counter.load(Ordering::SeqCst), 3);

        // a started race is reset again
        race.simulate_timestep();
        race.start();
        assert_eq!(counter.load(Ordering::SeqCst), 6);
        assert_eq!(race.race_time, 0);

        race.reset();
        race.start();
        assert_eq!(counter.load(Ordering::SeqCst), 9);
    }

    #[test]
    fn invalid_car_parameters_are_rejected() {
        let mut pars = sim_pars(2, 3);
        pars.car_pars.max_speed = 0.0;
        assert!(Race::new(&pars).is_err());

        let mut pars = sim_pars(2, 3);
        pars.car_pars.turn_speed = -1.0;
        assert!(Race::new(&pars).is_err());

        let mut pars = sim_pars(2, 3);
        pars.car_pars.buffer_keep = 300;
        assert!(Race::new(&pars).is_err());
    }

    #[test]
    fn car_seeds_differ() {
        assert_ne!(car_seed(1, 0), car_seed(1, 1));
        assert_eq!(car_seed(1, 3), car_seed(1, 3));
    }
}
