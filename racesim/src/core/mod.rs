pub mod car;
pub mod handle_race;
pub mod policy;
pub mod race;
pub mod sensor;
pub mod state_handler;
pub mod track;
