//! Fits a synthetic patient generated from known parameters.
//!
//! `ABCD_OUTPUT_DIR=/tmp/abcd cargo run --release --example fit_patient [config.toml]`

use std::path::Path;

use color_eyre::eyre;
use path_absolutize::Absolutize;
use tumour_abcd::{
    config::Config,
    data::{ObservedDataset, Therapy},
    integrator::Integrator,
    model::TumourModel,
    storage::Storage,
    AbcResult, AbcSmc, ParameterSet, TumourProblem,
};

fn synthetic_patient(config: &Config, truth: &ParameterSet) -> AbcResult<ObservedDataset> {
    let model = TumourModel::new(config.model.capacity, config.model.terms)?;
    let times: Vec<f64> = (0..=12)
        .map(|month| config.model.initial_time + f64::from(month))
        .collect();
    let trajectory = Integrator::new(config.integrator)?.simulate(
        &model,
        &config.model.initial_state,
        truth,
        &times,
    )?;

    let pairs = trajectory.times.iter().cloned().zip(trajectory.totals()).skip(1);
    ObservedDataset::new("synthetic", Some(Therapy::Tmz), pairs)
}

fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    env_logger::init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| concat!(env!("CARGO_MANIFEST_DIR"), "/demos/config.toml").into());
    let path = Path::new(&config_path).absolutize()?.to_path_buf();
    log::info!("Load config from {:?}", path);
    let config = Config::from_path(&path)?;

    let truth = ParameterSet {
        lambda_p: 0.1,
        k_pq: 0.1,
        k_qp_p: 0.05,
        delta_qp: 0.1,
        gamma: 0.3,
        kde: 0.1,
    };
    let observed = synthetic_patient(&config, &truth)?;
    let problem = TumourProblem::from_config(&config, observed)?;

    let history = AbcSmc::from_config(&problem, &config)?.run()?;
    if let Some(termination) = history.termination() {
        log::info!("Run {}", termination);
    }

    if let Some(storage_config) = &config.storage {
        let storage = storage_config.build();
        storage.save_history(&history)?;
        println!("Saved {} generation(s) to {:?}", history.populations.len(), storage.base_path());
    }

    if let Some(last) = history.last() {
        let mean = last.weighted_mean();
        println!("Generation {} (epsilon {})", last.generation, last.epsilon);
        for ((name, estimate), actual) in ParameterSet::NAMES
            .iter()
            .zip(mean.to_array())
            .zip(truth.to_array())
        {
            println!("{:>9}: {:.4} (true {})", name, estimate, actual);
        }
    }

    Ok(())
}
