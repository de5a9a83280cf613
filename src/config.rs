//! Run configuration, loaded from TOML.
//!
//! ```toml
//! seed = 42
//!
//! [gp]
//! population_size = 100
//! generations = 1000
//! max_depth = 10
//! inputs = "error_terms"
//!
//! [fitness]
//! model_path = "models/tinyphysics.onnx"
//! data_path = "data"
//! num_rollouts = 10
//! ```

use crate::control::Inputs;
use crate::error::Error;
use rand::SeedableRng;
use rand_xorshift::XorShiftRng;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Seeds the run's random number generator. Drawn from entropy when absent.
    pub seed: Option<u64>,
    pub gp: GpConfig,
    pub fitness: FitnessConfig,
}

/// Parameters of the evolutionary search.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct GpConfig {
    pub population_size: usize,
    pub generations: usize,
    /// The depth budget of every individual.
    pub max_depth: u32,
    pub inputs: Inputs,
    /// Probability that a breeder is copied into the next generation unchanged.
    pub replication_rate: f64,
    /// Probability that a breeder is mutated. Whatever remains goes to crossover.
    pub mutation_rate: f64,
    pub max_crossover_attempts: usize,
    /// Fitness evaluation threads. Defaults to the number of CPUs.
    pub threads: Option<u32>,
}

/// Where the simulator model and episodes are found.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct FitnessConfig {
    pub model_path: PathBuf,
    pub data_path: PathBuf,
    /// The number of episodes each individual is rolled out on.
    pub num_rollouts: usize,
}

impl Default for GpConfig {
    fn default() -> Self {
        GpConfig {
            population_size: 100,
            generations: 1000,
            max_depth: 10,
            inputs: Inputs::default(),
            replication_rate: 0.1,
            mutation_rate: 0.2,
            max_crossover_attempts: 32,
            threads: None,
        }
    }
}

impl Default for FitnessConfig {
    fn default() -> Self {
        FitnessConfig {
            model_path: PathBuf::from("models/tinyphysics.onnx"),
            data_path: PathBuf::from("data"),
            num_rollouts: 10,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, Error> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        self.gp.validate()?;
        if self.fitness.num_rollouts == 0 {
            return Err(Error::InvalidConfig("num_rollouts must be at least 1".into()));
        }
        Ok(())
    }

    /// The random number generator for this run.
    pub fn rng(&self) -> XorShiftRng {
        match self.seed {
            Some(seed) => XorShiftRng::seed_from_u64(seed),
            None => XorShiftRng::from_entropy(),
        }
    }
}

impl GpConfig {
    pub fn validate(&self) -> Result<(), Error> {
        let invalid = |msg: &str| Err(Error::InvalidConfig(msg.to_string()));
        if self.population_size == 0 {
            return invalid("population_size must be at least 1");
        }
        if self.max_depth == 0 {
            return invalid("max_depth must be at least 1");
        }
        let unit = 0.0..=1.0;
        if !unit.contains(&self.replication_rate) || !unit.contains(&self.mutation_rate) {
            return invalid("replication_rate and mutation_rate must lie within [0, 1]");
        }
        if self.replication_rate + self.mutation_rate > 1.0 {
            return invalid("replication_rate and mutation_rate must not sum past 1");
        }
        if self.max_crossover_attempts == 0 {
            return invalid("max_crossover_attempts must be at least 1");
        }
        if self.threads == Some(0) {
            return invalid("threads must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn defaults_fill_missing_fields() {
        let config: Config = toml::from_str("[gp]\npopulation_size = 12\n").unwrap();
        assert_eq!(config.gp.population_size, 12);
        assert_eq!(config.gp.generations, 1000);
        assert_eq!(config.gp.max_depth, 10);
        assert_eq!(config.gp.inputs, Inputs::ErrorTerms);
        assert_eq!(config.fitness.num_rollouts, 10);
        assert_eq!(config.seed, None);
        config.validate().unwrap();
    }

    #[test]
    fn full_document() {
        let doc = r#"
            seed = 3

            [gp]
            generations = 5
            inputs = "vehicle_state"
            threads = 2

            [fitness]
            data_path = "episodes"
            num_rollouts = 4
        "#;
        let config: Config = toml::from_str(doc).unwrap();
        assert_eq!(config.seed, Some(3));
        assert_eq!(config.gp.inputs, Inputs::VehicleState);
        assert_eq!(config.gp.threads, Some(2));
        assert_eq!(config.fitness.data_path, PathBuf::from("episodes"));
        assert_eq!(config.fitness.model_path, PathBuf::from("models/tinyphysics.onnx"));
        config.validate().unwrap();
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut gp = GpConfig::default();
        gp.mutation_rate = 0.95;
        assert!(matches!(gp.validate(), Err(Error::InvalidConfig(_))));

        let mut gp = GpConfig::default();
        gp.population_size = 0;
        assert!(gp.validate().is_err());

        let mut gp = GpConfig::default();
        gp.threads = Some(0);
        assert!(gp.validate().is_err());

        let mut config = Config::default();
        config.fitness.num_rollouts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn seeded_rngs_repeat() {
        let config = Config { seed: Some(17), ..Config::default() };
        let a: u64 = config.rng().gen();
        let b: u64 = config.rng().gen();
        assert_eq!(a, b);
    }

    #[test]
    fn load_reads_and_validates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.toml");
        fs::write(&path, "[gp]\nmax_depth = 0\n").unwrap();
        assert!(matches!(Config::load(&path), Err(Error::InvalidConfig(_))));
        fs::write(&path, "[gp]\nmax_depth = 4\n").unwrap();
        assert_eq!(Config::load(&path).unwrap().gp.max_depth, 4);
        assert!(matches!(Config::load(&dir.path().join("absent.toml")), Err(Error::Io(_))));
        fs::write(&path, "[gp\n").unwrap();
        assert!(matches!(Config::load(&path), Err(Error::Toml(_))));
    }
}
