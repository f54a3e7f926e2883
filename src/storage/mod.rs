use std::path::PathBuf;

use crate::{
    error::AbcResult,
    types::{Population, PosteriorHistory},
};

pub mod config;
pub mod filesystem;

/// Persistence of a run's history, so it can be reported on or resumed.
pub trait Storage {
    /// Highest generation number saved so far, if any.
    fn previous_gen_number(&self) -> AbcResult<Option<u16>>;

    fn save_generation(&self, population: &Population) -> AbcResult<PathBuf>;

    /// Saves the run seed and every population, rewriting stored ones that changed.
    fn save_history(&self, history: &PosteriorHistory) -> AbcResult<()>;

    fn load_history(&self) -> AbcResult<PosteriorHistory>;
}
