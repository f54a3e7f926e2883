use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{
    error::{AbcErr, AbcResult},
    types::{Population, PosteriorHistory},
};

use super::Storage;

const RUN_FILE: &str = "run.json";

#[derive(Serialize, Deserialize, Debug, PartialEq)]
struct RunRecord {
    seed: u64,
}

/// Generations as `gen_NNN.json` files under one directory.
#[derive(serde::Deserialize, serde::Serialize, Debug, Clone)]
pub struct FileSystem {
    base_path: PathBuf,
}
impl FileSystem {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn gen_file(&self, generation: u16) -> PathBuf {
        self.base_path.join(format!("gen_{:03}.json", generation))
    }

    fn load_generation(&self, file_path: &Path) -> AbcResult<Population> {
        let reader = BufReader::new(File::open(file_path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    fn saved_generation_numbers(&self) -> AbcResult<Vec<u16>> {
        let re = Regex::new(r#"^gen_(?P<gid>\d+)\.json$"#)?;
        if !self.base_path.exists() {
            return Ok(Vec::new());
        }

        let mut numbers = std::fs::read_dir(&self.base_path)?
            .filter_map(|entry| {
                let name = entry.ok()?.file_name().to_string_lossy().to_string();
                re.captures(&name).map(|caps| caps["gid"].to_string())
            })
            .map(|gid| gid.parse::<u16>())
            .collect::<Result<Vec<u16>, _>>()?;
        numbers.sort_unstable();
        Ok(numbers)
    }
}

impl Storage for FileSystem {
    fn previous_gen_number(&self) -> AbcResult<Option<u16>> {
        Ok(self.saved_generation_numbers()?.last().copied())
    }

    fn save_generation(&self, population: &Population) -> AbcResult<PathBuf> {
        std::fs::create_dir_all(&self.base_path)?;
        let file_path = self.gen_file(population.generation);

        match file_path.exists() {
            false => {
                let serialised_gen = serde_json::to_string_pretty(population)?;
                std::fs::write(&file_path, serialised_gen)?;
                Ok(file_path)
            }
            true => Err(AbcErr::StorageError(format!(
                "Gen file already existed at {:?}",
                file_path
            ))),
        }
    }

    fn save_history(&self, history: &PosteriorHistory) -> AbcResult<()> {
        std::fs::create_dir_all(&self.base_path)?;
        let run = serde_json::to_string_pretty(&RunRecord { seed: history.seed })?;
        std::fs::write(self.base_path.join(RUN_FILE), run)?;

        for population in &history.populations {
            let file_path = self.gen_file(population.generation);
            if !file_path.exists() {
                let path = self.save_generation(population)?;
                log::info!("Saved generation {} to {:?}", population.generation, path);
                continue;
            }

            // A resumed run clears the stop reason of its old final generation
            let on_disk = self.load_generation(&file_path)?;
            if on_disk != *population {
                std::fs::write(&file_path, serde_json::to_string_pretty(population)?)?;
                log::info!(
                    "Rewrote generation {} at {:?}",
                    population.generation,
                    file_path
                );
            }
        }
        Ok(())
    }

    fn load_history(&self) -> AbcResult<PosteriorHistory> {
        let run_path = self.base_path.join(RUN_FILE);
        if !run_path.exists() {
            return Err(AbcErr::StorageError(format!(
                "No run record at {:?}, storage not initialised",
                run_path
            )));
        }
        let run: RunRecord = serde_json::from_reader(BufReader::new(File::open(run_path)?))?;

        let mut history = PosteriorHistory::new(run.seed);
        for (expected, number) in self.saved_generation_numbers()?.into_iter().enumerate() {
            if usize::from(number) != expected {
                return Err(AbcErr::StorageError(format!(
                    "Missing generation {} in {:?}",
                    expected, self.base_path
                )));
            }
            history
                .populations
                .push(self.load_generation(&self.gen_file(number))?);
        }
        Ok(history)
    }
}
