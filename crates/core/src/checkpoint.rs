//! Checkpoint serialization: the entire algorithm state (population plus
//! config) to a file whose name encodes the iteration and the best fitness
//! seen so far. Two encodings are supported — compact and pretty-printed
//! JSON — since the framework makes no promise about wire format or
//! serialization encoding, only that save/load round-trips exactly.

use crate::candidate::Candidate;
use crate::config::{AlgorithmConfig, CheckpointEncoding};
use crate::error::{OptimonError, Result};
use crate::population::Population;
use crate::rng::RngState;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize, Deserialize)]
pub struct Snapshot {
    pub format_version: u32,
    pub iteration: u64,
    pub best_transformed: f64,
    pub config: AlgorithmConfig,
    pub population: Vec<Candidate>,
    pub default_size: usize,
    /// Absent for algorithms with no internal generator (e.g. gradient
    /// descent) or for checkpoints written before this field existed.
    #[serde(default)]
    pub rng_state: Option<RngState>,
}

const FORMAT_VERSION: u32 = 2;

/// `<iteration>_<bestFitness>_<baseName>`, matching the external-interface
/// naming convention exactly so external tooling can glob/sort by iteration.
pub fn checkpoint_filename(iteration: u64, best_fitness: f64, base_name: &str) -> String {
    format!("{iteration}_{best_fitness}_{base_name}")
}

pub fn save(
    config: &AlgorithmConfig,
    population: &Population,
    iteration: u64,
    best_transformed: f64,
    rng_state: Option<RngState>,
) -> Result<()> {
    let snapshot = Snapshot {
        format_version: FORMAT_VERSION,
        iteration,
        best_transformed,
        config: config.clone(),
        population: population.members.clone(),
        default_size: population.default_size,
        rng_state,
    };
    let filename = checkpoint_filename(iteration, best_transformed, &config.checkpoint.base_name);
    let path = config.checkpoint.directory.join(filename);
    write_snapshot(&path, &snapshot, config.checkpoint.encoding)
}

fn write_snapshot(path: &Path, snapshot: &Snapshot, encoding: CheckpointEncoding) -> Result<()> {
    let body = match encoding {
        CheckpointEncoding::Binary => serde_json::to_string(snapshot),
        CheckpointEncoding::Text => serde_json::to_string_pretty(snapshot),
    }
    .map_err(|source| OptimonError::CheckpointWrite {
        path: path.display().to_string(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidData, source),
    })?;
    std::fs::write(path, body).map_err(|source| OptimonError::CheckpointWrite {
        path: path.display().to_string(),
        source,
    })
}

/// Loads a checkpoint and reconstructs the population. The iteration
/// counter in the returned snapshot continues from the stored value; the
/// caller is expected to resume the engine from `snapshot.iteration`.
pub fn load(path: impl AsRef<Path>) -> Result<Snapshot> {
    let path = path.as_ref();
    let body = std::fs::read_to_string(path)?;
    serde_json::from_str(&body).map_err(|source| OptimonError::CheckpointRead {
        path: path.display().to_string(),
        source,
    })
}

pub fn snapshot_to_population(snapshot: &Snapshot) -> Population {
    Population::from_members(snapshot.population.clone(), snapshot.default_size)
}

pub fn list_checkpoints(directory: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let mut entries: Vec<PathBuf> = std::fs::read_dir(directory)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .collect();
    entries.sort();
    Ok(entries)
}
