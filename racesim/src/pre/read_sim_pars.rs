use crate::core::car::CarPars;
use crate::core::policy::PolicyPars;
use crate::core::race::RacePars;
use crate::core::track::TrackPars;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::path::Path;

/// SimPars is used to store all other parameter structs. Missing sections fall back to their
/// defaults, so an empty JSON object is a valid parameter file.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct SimPars {
    pub race_pars: RacePars,
    pub track_pars: TrackPars,
    pub car_pars: CarPars,
    pub policy_pars: PolicyPars,
}

/// read_sim_pars reads the JSON file and decodes the JSON string into the simulation parameters
/// struct.
pub fn read_sim_pars(filepath: &Path) -> anyhow::Result<SimPars> {
    let fh = OpenOptions::new()
        .read(true)
        .open(filepath)
        .with_context(|| format!("Failed to open parameter file {}!", filepath.display()))?;
    let pars = serde_json::from_reader(&fh)
        .with_context(|| format!("Failed to parse parameter file {}!", filepath.display()))?;
    Ok(pars)
}
