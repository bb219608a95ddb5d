use crate::core::policy::{build_features, Action, ExperienceBuffer, Features, Policy, Sample};
use crate::core::sensor::{sense_track, SensorReadings};
use crate::core::state_handler::StateHandler;
use crate::core::track::Track;
use helpers::general::InputValueError;
use helpers::geometry::{distance, heading_deg, normalize_deg, Point};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub const CAR_COLORS: [&str; 5] = ["#FF0000", "#00FF00", "#0000FF", "#FFFF00", "#FF00FF"];

pub const CRASH_REWARD: f64 = -10.0;
pub const CHECKPOINT_REWARD: f64 = 20.0;
pub const LAP_REWARD: f64 = 50.0;

/// Driving, sensing and learning parameters shared by all cars.
/// * `max_speed` - Speed limit per tick
/// * `acceleration` - Speed gain per tick when the throttle is above `throttle_threshold`
/// * `deceleration` - Half the speed loss per tick when the throttle is below the threshold
/// * `turn_speed` - (deg) Heading change per tick at full steering and standstill
/// * `sensor_range` - Length of the sensor rays
/// * `respawn_ticks` - Ticks a crashed car waits before it respawns
/// * `respawn_speed` - Speed after respawning
/// * `respawn_jitter` - Width of the random offset window around the respawn checkpoint
/// * `checkpoint_margin` - Added to the checkpoint radius when testing if it is reached
/// * `train_interval` - On-track ticks between two regular training passes
/// * `train_window` - Number of most recent samples used per training pass
/// * `min_train_samples` - Training is skipped with fewer buffered samples
/// * `buffer_cap`, `buffer_keep` - Buffers are trimmed to `buffer_keep` after exceeding `buffer_cap`
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct CarPars {
    pub max_speed: f64,
    pub acceleration: f64,
    pub deceleration: f64,
    pub turn_speed: f64,
    pub throttle_threshold: f64,
    pub sensor_range: f64,
    pub respawn_ticks: u32,
    pub respawn_speed: f64,
    pub respawn_jitter: f64,
    pub checkpoint_margin: f64,
    pub train_interval: u32,
    pub train_window: usize,
    pub min_train_samples: usize,
    pub buffer_cap: usize,
    pub buffer_keep: usize,
}

impl Default for CarPars {
    fn default() -> Self {
        CarPars {
            max_speed: 8.0,
            acceleration: 0.2,
            deceleration: 0.1,
            turn_speed: 4.0,
            throttle_threshold: 0.3,
            sensor_range: 80.0,
            respawn_ticks: 40,
            respawn_speed: 2.0,
            respawn_jitter: 20.0,
            checkpoint_margin: 15.0,
            train_interval: 50,
            train_window: 100,
            min_train_samples: 20,
            buffer_cap: 200,
            buffer_keep: 150,
        }
    }
}

impl CarPars {
    /// check_pars rejects parameters for which the motion or the buffers are undefined.
    pub fn check_pars(&self) -> Result<(), InputValueError> {
        if !self.max_speed.is_finite() || self.max_speed <= 0.0 {
            return Err(InputValueError::new(format!(
                "max_speed must be positive, got {}",
                self.max_speed
            )));
        }
        if !self.turn_speed.is_finite() || self.turn_speed <= 0.0 {
            return Err(InputValueError::new(format!(
                "turn_speed must be positive, got {}",
                self.turn_speed
            )));
        }
        if self.buffer_keep > self.buffer_cap {
            return Err(InputValueError::new(format!(
                "buffer_keep ({}) must not exceed buffer_cap ({})",
                self.buffer_keep, self.buffer_cap
            )));
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct Car {
    pub car_id: u32,
    pub color: String,
    pub x: f64,
    pub y: f64,
    pub angle: f64,
    pub speed: f64,
    pub total_distance: f64,
    pub no_crashes: u32,
    pub reward_sum: f64,
    pub sh: StateHandler,
    pars: CarPars,
    exploration_rate: f64,
    policy: Box<dyn Policy>,
    experience: ExperienceBuffer,
    train_counter: u32,
    seed: u64,
    rng: StdRng,
}

impl Car {
    /// new creates a car at the origin and bootstraps its policy. The car is placed on the grid
    /// by the race.
    pub fn new(
        car_id: u32,
        car_pars: &CarPars,
        exploration_rate: f64,
        max_laps: u32,
        no_checkpoints: usize,
        policy: Box<dyn Policy>,
        seed: u64,
    ) -> Car {
        let mut car = Car {
            car_id,
            color: CAR_COLORS[car_id as usize % CAR_COLORS.len()].to_owned(),
            x: 0.0,
            y: 0.0,
            angle: 0.0,
            speed: 0.0,
            total_distance: 0.0,
            no_crashes: 0,
            reward_sum: 0.0,
            sh: StateHandler::new(max_laps, no_checkpoints, car_pars.checkpoint_margin),
            pars: car_pars.to_owned(),
            exploration_rate: exploration_rate.clamp(0.0, 1.0),
            policy,
            experience: ExperienceBuffer::new(car_pars.buffer_cap, car_pars.buffer_keep),
            train_counter: 0,
            seed,
            rng: StdRng::seed_from_u64(seed),
        };
        car.policy.bootstrap(&mut car.rng);
        car
    }

    /// reset re-initializes the car completely: kinematics, progress, statistics, buffers and
    /// policy. The random number generator is reseeded, so two resets lead to the same car.
    pub fn reset(&mut self, pos: Point, heading: f64, speed: f64) {
        self.place(pos, heading, speed);
        self.total_distance = 0.0;
        self.no_crashes = 0;
        self.reward_sum = 0.0;
        self.sh.reset();
        self.experience.clear();
        self.train_counter = 0;
        self.rng = StdRng::seed_from_u64(self.seed);
        self.policy.bootstrap(&mut self.rng);
    }

    /// place sets the kinematic state only.
    pub fn place(&mut self, pos: Point, heading: f64, speed: f64) {
        self.x = pos[0];
        self.y = pos[1];
        self.angle = normalize_deg(heading);
        self.speed = speed.clamp(0.0, self.pars.max_speed);
    }

    // ---------------------------------------------------------------------------------------------
    // MAIN METHOD ---------------------------------------------------------------------------------
    // ---------------------------------------------------------------------------------------------

    /// update advances the car by one tick and returns the reward earned in this tick. Crashed
    /// cars count down to their respawn, finished cars do not move.
    pub fn update(&mut self, track: &Track) -> Option<f64> {
        if self.sh.is_finished() {
            return None;
        }

        if self.sh.is_crashed() {
            self.sh.increment_crash_time();
            if self.sh.check_leaves_crash(self.pars.respawn_ticks) {
                self.respawn(track);
            }
            return None;
        }

        let action = self.decide_action(track);
        self.apply_action(track, action)
    }

    /// decide_action queries the policy, or picks a random action with the exploration
    /// probability.
    pub fn decide_action(&mut self, track: &Track) -> Action {
        if self.rng.gen::<f64>() < self.exploration_rate {
            return Action::random(&mut self.rng);
        }

        let features = self.get_features(track);
        self.policy.predict(&features).clamped()
    }

    /// apply_action integrates the motion for the given action and handles crashes, checkpoints,
    /// rewards and training. Returns the tick reward, or None if the car is not active.
    pub fn apply_action(&mut self, track: &Track, action: Action) -> Option<f64> {
        if !self.sh.is_active() {
            return None;
        }
        let action = action.clamped();
        let pos_prev = self.get_pos();

        // speed
        if action.throttle > self.pars.throttle_threshold {
            self.speed = (self.speed + self.pars.acceleration).min(self.pars.max_speed);
        } else {
            self.speed = (self.speed - self.pars.deceleration * 2.0).max(0.0);
        }

        // heading
        self.angle = normalize_deg(
            self.angle
                + action.steering * self.pars.turn_speed * (1.0 + self.speed / self.pars.max_speed),
        );

        // position
        let rad = self.angle.to_radians();
        self.x += rad.cos() * self.speed;
        self.y += rad.sin() * self.speed;

        let dist = distance(pos_prev, self.get_pos());
        self.total_distance += dist;

        if !track.is_on_track(self.get_pos()) {
            self.sh.act_crash();
            self.speed = 0.0;
            self.no_crashes += 1;
            self.add_reward(CRASH_REWARD);
            debug!(
                "Car {} left the track at ({:.1}, {:.1})",
                self.car_id, self.x, self.y
            );
            return Some(CRASH_REWARD);
        }

        let checkpoint_reward = self.check_checkpoints(track);
        let reward = self.speed / self.pars.max_speed * 0.1 + dist * 0.5 + checkpoint_reward;

        let features = self.get_features(track);
        self.experience.push_sample(Sample { features, action });
        self.add_reward(reward);

        if self.sh.is_finished() {
            self.speed = 0.0;
            return Some(reward);
        }
        self.sh.update_race_prog();

        self.train_counter += 1;
        if self.train_counter >= self.pars.train_interval {
            self.retrain_model();
            self.train_counter = 0;
        }

        Some(reward)
    }

    // ---------------------------------------------------------------------------------------------
    // CAR PARTS -----------------------------------------------------------------------------------
    // ---------------------------------------------------------------------------------------------

    /// check_checkpoints returns the checkpoint reward of this tick. A completed lap triggers an
    /// immediate training pass.
    fn check_checkpoints(&mut self, track: &Track) -> f64 {
        let passed = match self.sh.check_checkpoint(self.get_pos(), &track.checkpoints) {
            Some(passed) => passed,
            None => return 0.0,
        };

        if !passed.new_lap {
            return CHECKPOINT_REWARD;
        }

        self.retrain_model();
        info!(
            "Car {} completed lap {}",
            self.car_id,
            self.sh.get_compl_lap()
        );
        if passed.finished {
            info!("Car {} finished the race", self.car_id);
        }

        LAP_REWARD
    }

    /// respawn puts a crashed car back near its last checkpoint, heading to the next one.
    fn respawn(&mut self, track: &Track) {
        let last = &track.checkpoints[self.sh.get_last_checkpoint()];
        let next = &track.checkpoints[track.next_checkpoint_idx(self.sh.get_last_checkpoint())];
        let jitter = self.pars.respawn_jitter;

        let pos = [
            last.cx + (self.rng.gen::<f64>() - 0.5) * jitter,
            last.cy + (self.rng.gen::<f64>() - 0.5) * jitter,
        ];
        // for a single checkpoint there is no direction to aim at, keep the old heading
        let heading = if last == next {
            self.angle
        } else {
            heading_deg(last.center(), next.center())
        };

        self.place(pos, heading, self.pars.respawn_speed);
        self.sh.deact_crash();
        debug!(
            "Car {} respawned at checkpoint {}",
            self.car_id,
            self.sh.get_last_checkpoint()
        );
    }

    /// retrain_model runs one incremental training pass on the most recent samples. Returns false
    /// if there were not enough samples.
    pub fn retrain_model(&mut self) -> bool {
        if self.experience.no_samples() < self.pars.min_train_samples {
            return false;
        }

        let samples = self.experience.recent_samples(self.pars.train_window);
        self.policy.partial_fit(&samples);
        true
    }

    fn add_reward(&mut self, reward: f64) {
        self.experience.push_reward(reward);
        self.reward_sum += reward;
    }

    // ---------------------------------------------------------------------------------------------
    // METHODS (HELPERS) ---------------------------------------------------------------------------
    // ---------------------------------------------------------------------------------------------

    pub fn get_pos(&self) -> Point {
        [self.x, self.y]
    }

    pub fn sense(&self, track: &Track) -> SensorReadings {
        sense_track(self.x, self.y, self.angle, self.pars.sensor_range, track)
    }

    pub fn get_features(&self, track: &Track) -> Features {
        build_features(
            &self.sense(track),
            self.speed / self.pars.max_speed,
            self.angle,
        )
    }

    pub fn get_policy(&self) -> &dyn Policy {
        self.policy.as_ref()
    }

    pub fn get_experience(&self) -> &ExperienceBuffer {
        &self.experience
    }
}
