//! Fitness evaluation of individuals against recorded driving episodes.
//!
//! The simulator itself is an external collaborator, reached only through the `Simulator` trait.

use crate::config::FitnessConfig;
use crate::control::{ControlPolicy, Individual};
use crate::error::{BoxError, Error};
use log::{debug, warn};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

// Traits.

/// The external vehicle simulator.
///
/// A model is loaded once per worker thread and then reused, read-only, for every rollout that
/// worker performs.
pub trait Simulator: Sync {
    /// The loaded simulation model.
    type Model;
    /// Load the model found at the given path.
    fn load_model(&self, path: &Path) -> Result<Self::Model, BoxError>;
    /// Drive the given policy through a single recorded episode.
    fn rollout(
        &self,
        model: &Self::Model,
        episode: &Path,
        policy: &mut dyn ControlPolicy,
    ) -> Result<Rollout, BoxError>;
}

// Model.

/// The costs reported by a single rollout. Lower is better.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Rollout {
    pub lataccel_cost: f64,
    pub jerk_cost: f64,
    pub total_cost: f64,
}

/// An ordered set of episode files used to measure fitness.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EpisodeSet {
    paths: Vec<PathBuf>,
}

/// Measures individuals by the mean cost of their rollouts over an `EpisodeSet`.
///
/// Fitness is the negated mean `total_cost`, so a greater fitness is always better.
#[derive(Clone, Debug)]
pub struct FitnessEvaluator<S> {
    simulator: S,
    model_path: PathBuf,
    episodes: EpisodeSet,
}

// Impls.

impl EpisodeSet {
    /// The given episodes in sorted order.
    pub fn new<I>(paths: I) -> Self
    where
        I: IntoIterator<Item = PathBuf>,
    {
        let mut paths = paths.into_iter().collect::<Vec<_>>();
        paths.sort();
        EpisodeSet { paths }
    }

    /// The first `limit` files within `dir`, sorted by file name.
    ///
    /// Sub-directories are neither included nor descended into.
    pub fn from_dir<P>(dir: P, limit: usize) -> Result<Self, Error>
    where
        P: AsRef<Path>,
    {
        let mut paths = vec![];
        for entry in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
            if paths.len() >= limit {
                break;
            }
            let entry = entry?;
            if entry.file_type().is_file() {
                paths.push(entry.into_path());
            }
        }
        Ok(EpisodeSet { paths })
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

impl<S> FitnessEvaluator<S>
where
    S: Simulator,
{
    /// Returns `Error::NoEpisodes` if `episodes` is empty.
    pub fn new<P>(simulator: S, model_path: P, episodes: EpisodeSet) -> Result<Self, Error>
    where
        P: Into<PathBuf>,
    {
        if episodes.is_empty() {
            return Err(Error::NoEpisodes);
        }
        let model_path = model_path.into();
        Ok(FitnessEvaluator { simulator, model_path, episodes })
    }

    /// Build an evaluator from the `[fitness]` configuration section.
    pub fn from_config(simulator: S, config: &FitnessConfig) -> Result<Self, Error> {
        let episodes = EpisodeSet::from_dir(&config.data_path, config.num_rollouts)?;
        Self::new(simulator, &config.model_path, episodes)
    }

    pub fn simulator(&self) -> &S {
        &self.simulator
    }

    pub fn episodes(&self) -> &EpisodeSet {
        &self.episodes
    }

    pub fn load_model(&self) -> Result<S::Model, Error> {
        self.simulator.load_model(&self.model_path).map_err(|source| Error::ModelLoad {
            path: self.model_path.clone(),
            source,
        })
    }

    /// The fitness of `individual` using an already loaded model.
    ///
    /// Each rollout is driven by its own fresh controller.
    pub fn fitness(&self, model: &S::Model, individual: &Individual) -> Result<f64, Error> {
        let mut total_cost = 0.0;
        for episode in self.episodes.paths() {
            let mut controller = individual.controller();
            let rollout = self
                .simulator
                .rollout(model, episode, &mut controller)
                .map_err(|source| Error::SimulatorFailure { episode: episode.clone(), source })?;
            total_cost += rollout.total_cost;
        }
        let mean_cost = total_cost / self.episodes.len() as f64;
        if !mean_cost.is_finite() {
            warn!("{} -> non-finite mean cost {}, ranking it last", individual, mean_cost);
            return Ok(f64::NEG_INFINITY);
        }
        debug!("{} -> mean cost {:.4}", individual, mean_cost);
        Ok(-mean_cost)
    }

    /// Load a model and measure the fitness of a single individual.
    pub fn evaluate(&self, individual: &Individual) -> Result<f64, Error> {
        let model = self.load_model()?;
        self.fitness(&model, individual)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::{FuturePlan, Inputs, VehicleState};
    use crate::gp::expr::{Expr, Operator};
    use std::fs;

    /// Charges the absolute control output on a single step, once per episode.
    struct OneStep;

    impl Simulator for OneStep {
        type Model = f64;
        fn load_model(&self, path: &Path) -> Result<f64, BoxError> {
            if path.ends_with("missing") {
                return Err("no such model".into());
            }
            Ok(1.0)
        }
        fn rollout(
            &self,
            scale: &f64,
            episode: &Path,
            policy: &mut dyn ControlPolicy,
        ) -> Result<Rollout, BoxError> {
            if episode.ends_with("broken") {
                return Err("corrupt episode".into());
            }
            let out = policy.update(1.0, 0.0, &VehicleState::default(), &FuturePlan::default())?;
            let total_cost = scale * out.abs();
            Ok(Rollout { total_cost, ..Rollout::default() })
        }
    }

    fn individual(expr: Expr) -> Individual {
        Individual::from_expr(expr, 4, Inputs::ErrorTerms).unwrap()
    }

    #[test]
    fn fitness_is_negated_mean_cost() {
        let episodes = EpisodeSet::new(vec![PathBuf::from("b"), PathBuf::from("a")]);
        assert_eq!(episodes.paths()[0], PathBuf::from("a"));
        let evaluator = FitnessEvaluator::new(OneStep, "model", episodes).unwrap();
        // P + 2 with an error of 1 costs 3 on every episode.
        let expr = Expr::operator(Operator::Add, &Expr::constant(2.0), &Expr::variable("P"));
        assert_eq!(evaluator.evaluate(&individual(expr)).unwrap(), -3.0);
    }

    #[test]
    fn non_finite_costs_rank_last() {
        let episodes = EpisodeSet::new(vec![PathBuf::from("a"), PathBuf::from("b")]);
        let evaluator = FitnessEvaluator::new(OneStep, "model", episodes).unwrap();
        let nan = evaluator.evaluate(&individual(Expr::constant(f64::NAN))).unwrap();
        assert_eq!(nan, f64::NEG_INFINITY);
        let inf = evaluator.evaluate(&individual(Expr::constant(f64::INFINITY))).unwrap();
        assert_eq!(inf, f64::NEG_INFINITY);
        let finite = evaluator.evaluate(&individual(Expr::constant(1.0))).unwrap();
        assert!(finite > nan);
    }

    #[test]
    fn empty_episode_set_is_rejected() {
        let result = FitnessEvaluator::new(OneStep, "model", EpisodeSet::default());
        assert!(matches!(result, Err(Error::NoEpisodes)));
    }

    #[test]
    fn rollout_failures_are_propagated() {
        let episodes = EpisodeSet::new(vec![PathBuf::from("ok"), PathBuf::from("broken")]);
        let evaluator = FitnessEvaluator::new(OneStep, "model", episodes).unwrap();
        match evaluator.evaluate(&individual(Expr::constant(1.0))) {
            Err(Error::SimulatorFailure { episode, .. }) => {
                assert_eq!(episode, PathBuf::from("broken"))
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn policy_errors_surface_as_simulator_failures() {
        let episodes = EpisodeSet::new(vec![PathBuf::from("ok")]);
        let evaluator = FitnessEvaluator::new(OneStep, "model", episodes).unwrap();
        let result = evaluator.evaluate(&individual(Expr::variable("v_ego")));
        assert!(matches!(result, Err(Error::SimulatorFailure { .. })));
    }

    #[test]
    fn model_load_failures_are_reported() {
        let episodes = EpisodeSet::new(vec![PathBuf::from("ok")]);
        let evaluator = FitnessEvaluator::new(OneStep, "missing", episodes).unwrap();
        let result = evaluator.evaluate(&individual(Expr::constant(1.0)));
        assert!(matches!(result, Err(Error::ModelLoad { .. })));
    }

    #[test]
    fn episodes_are_sorted_and_truncated() {
        let dir = tempfile::tempdir().unwrap();
        for name in &["03.csv", "01.csv", "02.csv", "00.csv"] {
            fs::write(dir.path().join(name), "").unwrap();
        }
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("nested").join("99.csv"), "").unwrap();

        let episodes = EpisodeSet::from_dir(dir.path(), 3).unwrap();
        let names = episodes
            .paths()
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["00.csv", "01.csv", "02.csv"]);

        let all = EpisodeSet::from_dir(dir.path(), usize::MAX).unwrap();
        assert_eq!(all.len(), 4);
    }
}
