use crate::core::track::Checkpoint;
use helpers::geometry::{distance, Point};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Active,
    Crashed,
    Finished,
}

/// Outcome of reaching the next checkpoint.
/// * `new_lap` - True if the checkpoint was the start/finish line
/// * `finished` - True if the car completed its last lap with this checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointPassed {
    pub new_lap: bool,
    pub finished: bool,
}

/// StateHandler tracks the progress of a car around the track (checkpoints, laps) and its state
/// machine (active, crashed, finished).
#[derive(Debug, Clone)]
pub struct StateHandler {
    // parameters
    max_laps: u32,
    no_checkpoints: usize,
    reach_margin: f64,

    // state machine
    state: State,
    crash_time: u32,

    // race progress
    compl_lap_cur: u32,
    last_checkpoint: usize,
    checkpoint_counter: u32,
    progress: f64,
}

impl StateHandler {
    /// * `max_laps` - Number of laps after which the car is finished
    /// * `no_checkpoints` - Number of checkpoints on the track, must be at least one
    /// * `reach_margin` - Distance added to the checkpoint radius when testing if it is reached
    pub fn new(max_laps: u32, no_checkpoints: usize, reach_margin: f64) -> StateHandler {
        debug_assert!(no_checkpoints > 0, "Checkpoint cycle requires at least one checkpoint!");

        StateHandler {
            max_laps,
            no_checkpoints: no_checkpoints.max(1),
            reach_margin,
            state: State::Active,
            crash_time: 0,
            compl_lap_cur: 0,
            last_checkpoint: 0,
            checkpoint_counter: 0,
            progress: 0.0,
        }
    }

    /// reset returns the handler to the start of the race, the parameters are kept.
    pub fn reset(&mut self) {
        *self = StateHandler::new(self.max_laps, self.no_checkpoints, self.reach_margin);
    }

    // ---------------------------------------------------------------------------------------------
    // STATE MACHINE -------------------------------------------------------------------------------
    // ---------------------------------------------------------------------------------------------

    /// act_crash switches an active car into the crashed state.
    pub fn act_crash(&mut self) {
        debug_assert!(
            self.state == State::Active,
            "Tried to crash a car that is not active!"
        );
        self.state = State::Crashed;
        self.crash_time = 0;
    }

    /// increment_crash_time counts one more tick spent crashed and returns the new value.
    pub fn increment_crash_time(&mut self) -> u32 {
        debug_assert!(
            self.state == State::Crashed,
            "Tried to increment crash time without being crashed!"
        );
        self.crash_time += 1;
        self.crash_time
    }

    /// check_leaves_crash returns true once the crash time exceeds the respawn delay.
    pub fn check_leaves_crash(&self, respawn_ticks: u32) -> bool {
        self.state == State::Crashed && self.crash_time > respawn_ticks
    }

    /// deact_crash returns a crashed car to the active state (respawn).
    pub fn deact_crash(&mut self) {
        debug_assert!(
            self.state == State::Crashed,
            "Tried to respawn a car that is not crashed!"
        );
        self.state = State::Active;
        self.crash_time = 0;
    }

    // ---------------------------------------------------------------------------------------------
    // RACE PROGRESS -------------------------------------------------------------------------------
    // ---------------------------------------------------------------------------------------------

    /// next_checkpoint_idx returns the only checkpoint that can be reached next.
    pub fn next_checkpoint_idx(&self) -> usize {
        (self.last_checkpoint + 1) % self.no_checkpoints
    }

    /// check_checkpoint tests whether pos is close enough to the next checkpoint. At most one
    /// checkpoint can be reached per call. Reaching checkpoint 0 completes a lap, and completing
    /// the last lap finishes the car.
    pub fn check_checkpoint(
        &mut self,
        pos: Point,
        checkpoints: &[Checkpoint],
    ) -> Option<CheckpointPassed> {
        let next_idx = self.next_checkpoint_idx();
        let checkpoint = checkpoints.get(next_idx)?;

        if distance(pos, checkpoint.center()) > checkpoint.radius + self.reach_margin {
            return None;
        }

        self.last_checkpoint = next_idx;
        self.checkpoint_counter += 1;
        self.set_progress(self.compl_lap_cur as f64 + next_idx as f64 / self.no_checkpoints as f64);

        let new_lap = next_idx == 0;
        let mut finished = false;

        if new_lap {
            self.compl_lap_cur += 1;
            self.set_progress(self.compl_lap_cur as f64);

            if self.compl_lap_cur >= self.max_laps {
                self.state = State::Finished;
                finished = true;
            }
        }

        Some(CheckpointPassed { new_lap, finished })
    }

    /// update_race_prog sets the progress from the completed laps and the last checkpoint.
    pub fn update_race_prog(&mut self) {
        self.set_progress(
            self.compl_lap_cur as f64 + self.last_checkpoint as f64 / self.no_checkpoints as f64,
        );
    }

    /// Progress is clamped to the race length on every write.
    fn set_progress(&mut self, progress: f64) {
        self.progress = progress.clamp(0.0, self.max_laps as f64);
    }

    // ---------------------------------------------------------------------------------------------
    // GETTERS -------------------------------------------------------------------------------------
    // ---------------------------------------------------------------------------------------------

    pub fn is_active(&self) -> bool {
        self.state == State::Active
    }

    pub fn is_crashed(&self) -> bool {
        self.state == State::Crashed
    }

    pub fn is_finished(&self) -> bool {
        self.state == State::Finished
    }

    pub fn get_crash_time(&self) -> u32 {
        self.crash_time
    }

    /// get_compl_lap returns the number of completed laps.
    pub fn get_compl_lap(&self) -> u32 {
        self.compl_lap_cur
    }

    pub fn get_last_checkpoint(&self) -> usize {
        self.last_checkpoint
    }

    pub fn get_checkpoint_counter(&self) -> u32 {
        self.checkpoint_counter
    }

    /// get_race_prog returns the fractional race progress in [0.0, max_laps].
    pub fn get_race_prog(&self) -> f64 {
        self.progress
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square_checkpoints() -> Vec<Checkpoint> {
        vec![
            Checkpoint::new(0.0, 0.0, 10.0),
            Checkpoint::new(100.0, 0.0, 10.0),
            Checkpoint::new(100.0, 100.0, 10.0),
            Checkpoint::new(0.0, 100.0, 10.0),
        ]
    }

    fn drive_one_lap(sh: &mut StateHandler, cps: &[Checkpoint]) -> Vec<CheckpointPassed> {
        [1, 2, 3, 0]
            .iter()
            .filter_map(|&i| sh.check_checkpoint(cps[i].center(), cps))
            .collect()
    }

    #[test]
    fn only_next_checkpoint_counts() {
        let cps = square_checkpoints();
        let mut sh = StateHandler::new(3, cps.len(), 15.0);

        // checkpoint 2 is skipped when checkpoint 1 was not reached
        assert_eq!(sh.check_checkpoint(cps[2].center(), &cps), None);
        assert_eq!(sh.get_last_checkpoint(), 0);

        let passed = sh.check_checkpoint(cps[1].center(), &cps).unwrap();
        assert!(!passed.new_lap);
        assert_eq!(sh.get_last_checkpoint(), 1);
        assert_eq!(sh.get_checkpoint_counter(), 1);
        assert_eq!(sh.get_race_prog(), 0.25);
    }

    #[test]
    fn reach_distance_includes_margin() {
        let cps = square_checkpoints();
        let mut sh = StateHandler::new(3, cps.len(), 15.0);
        assert!(sh.check_checkpoint([125.5, 0.0], &cps).is_none());
        assert!(sh.check_checkpoint([125.0, 0.0], &cps).is_some());
    }

    #[test]
    fn lap_increments_only_at_start_finish() {
        let cps = square_checkpoints();
        let mut sh = StateHandler::new(3, cps.len(), 15.0);

        let passed = drive_one_lap(&mut sh, &cps);
        assert_eq!(passed.len(), 4);
        assert_eq!(
            passed.iter().map(|p| p.new_lap).collect::<Vec<_>>(),
            vec![false, false, false, true]
        );
        assert_eq!(sh.get_compl_lap(), 1);
        assert_eq!(sh.get_race_prog(), 1.0);
        assert!(sh.is_active());

        // standing on the start/finish line does not count twice
        assert!(sh.check_checkpoint(cps[0].center(), &cps).is_none());
        assert_eq!(sh.get_compl_lap(), 1);
    }

    #[test]
    fn last_lap_finishes_car_and_clamps_progress() {
        let cps = square_checkpoints();
        let mut sh = StateHandler::new(2, cps.len(), 15.0);

        drive_one_lap(&mut sh, &cps);
        let passed = drive_one_lap(&mut sh, &cps);
        assert!(passed[3].finished);
        assert!(sh.is_finished());
        assert_eq!(sh.get_race_prog(), 2.0);

        sh.update_race_prog();
        assert!(sh.get_race_prog() <= 2.0);
    }

    #[test]
    fn single_checkpoint_track_counts_laps() {
        let cps = vec![Checkpoint::new(0.0, 0.0, 10.0)];
        let mut sh = StateHandler::new(3, 1, 15.0);
        let passed = sh.check_checkpoint([0.0, 0.0], &cps).unwrap();
        assert!(passed.new_lap);
        assert_eq!(sh.get_compl_lap(), 1);
    }

    #[test]
    fn crash_and_respawn_cycle() {
        let mut sh = StateHandler::new(3, 4, 15.0);
        sh.act_crash();
        assert!(sh.is_crashed());
        assert_eq!(sh.get_crash_time(), 0);

        for _ in 0..40 {
            sh.increment_crash_time();
        }
        assert!(!sh.check_leaves_crash(40));
        sh.increment_crash_time();
        assert!(sh.check_leaves_crash(40));

        sh.deact_crash();
        assert!(sh.is_active());
        assert_eq!(sh.get_crash_time(), 0);
    }

    #[test]
    fn reset_keeps_parameters() {
        let cps = square_checkpoints();
        let mut sh = StateHandler::new(3, cps.len(), 15.0);
        drive_one_lap(&mut sh, &cps);
        sh.reset();
        assert_eq!(sh.get_compl_lap(), 0);
        assert_eq!(sh.get_checkpoint_counter(), 0);
        assert_eq!(sh.get_race_prog(), 0.0);
        assert_eq!(sh.next_checkpoint_idx(), 1);
    }
}
