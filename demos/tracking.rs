//! Demonstrates evolving a lateral-acceleration tracking controller against a toy plant.
//!
//! 1. What is the "Terminal Set"?
//!
//! - `P`, `I` and `D`: the tracking error, its running sum and its step-to-step change.
//! - The constants `1` to `5`.
//!
//! 2. What is the "Function Set"?
//!
//! - `+` `-` `x` `/`
//!
//! 3. What is the "Fitness Measure"?
//!
//! - The negated mean rollout cost, where the cost weighs tracking error against jerk.
//!
//! 4. What are the "Control Parameters"?
//!
//! - 50 individuals, depth budget 6, 8 episodes per individual.
//! - 20 generations.
//!
//! 5. What is the "Termination Criterion"?
//!
//! - The fittest controller after all generations.

extern crate ctrlgp;
extern crate env_logger;
extern crate tempfile;

use ctrlgp::{
    BoxError, ControlPolicy, EpisodeSet, Evolution, FitnessEvaluator, FuturePlan, GpConfig, Rollout,
    Simulator, VehicleState,
};
use rand::SeedableRng;
use rand_xorshift::XorShiftRng;
use std::fs;
use std::path::Path;

// Constants.

const DT: f64 = 0.1;
const EPISODES: usize = 8;
const STEPS_PER_EPISODE: usize = 100;
const LATACCEL_COST_MULTIPLIER: f64 = 50.0;

// Model.

/// A first-order plant whose lateral acceleration lags the commanded value.
///
/// Episodes are CSV lines of `target,roll_lataccel,v_ego,a_ego`.
struct Plant {
    /// The fraction of the remaining gap closed on each step.
    response: f64,
}

impl Simulator for Plant {
    type Model = Vec<f64>;

    // The model is a per-speed-bin gain table.
    fn load_model(&self, path: &Path) -> Result<Self::Model, BoxError> {
        let gains = fs::read_to_string(path)?
            .split_whitespace()
            .map(|g| g.parse::<f64>())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(gains)
    }

    fn rollout(
        &self,
        gains: &Self::Model,
        episode: &Path,
        policy: &mut dyn ControlPolicy,
    ) -> Result<Rollout, BoxError> {
        let mut rows = vec![];
        for line in fs::read_to_string(episode)?.lines() {
            let row = line.split(',').map(|v| v.parse::<f64>()).collect::<Result<Vec<_>, _>>()?;
            rows.push(row);
        }
        let (mut current, mut prev) = (0.0, 0.0);
        let (mut lat_sq, mut jerk_sq) = (0.0, 0.0);
        for (i, row) in rows.iter().enumerate() {
            let state = VehicleState { roll_lataccel: row[1], v_ego: row[2], a_ego: row[3] };
            let plan = FuturePlan {
                lataccel: rows[i + 1..].iter().take(10).map(|r| r[0]).collect(),
                ..FuturePlan::default()
            };
            let action = policy.update(row[0], current, &state, &plan)?;
            let action = if action.is_finite() { action.max(-5.0).min(5.0) } else { 0.0 };
            let bin = ((state.v_ego / 10.0) as usize).min(gains.len() - 1);
            current += self.response * (gains[bin] * action - current) - state.roll_lataccel * DT;
            lat_sq += (row[0] - current).powi(2);
            jerk_sq += ((current - prev) / DT).powi(2);
            prev = current;
        }
        let n = rows.len().max(1) as f64;
        let lataccel_cost = lat_sq / n * 100.0;
        let jerk_cost = jerk_sq / n * 100.0;
        let total_cost = LATACCEL_COST_MULTIPLIER * lataccel_cost + jerk_cost;
        Ok(Rollout { lataccel_cost, jerk_cost, total_cost })
    }
}

// Exe.

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let seed = rand::random();
    let mut rng = XorShiftRng::seed_from_u64(seed);
    println!("RNG seed: {}", seed);

    // Write the model and a handful of synthetic episodes.
    let dir = tempfile::tempdir()?;
    let model_path = dir.path().join("gains.txt");
    fs::write(&model_path, "1.0 0.9 0.8 0.7")?;
    for e in 0..EPISODES {
        let v_ego = 5.0 + 4.0 * e as f64;
        let lines = (0..STEPS_PER_EPISODE)
            .map(|t| {
                let x = t as f64 * DT;
                let target = (x * (1.0 + e as f64 * 0.1)).sin();
                format!("{:.4},{:.4},{:.4},{:.4}", target, 0.05 * (x * 0.3).cos(), v_ego, 0.0)
            })
            .collect::<Vec<_>>();
        fs::write(dir.path().join(format!("{:05}.csv", e)), lines.join("\n"))?;
    }

    let episodes = EpisodeSet::new(
        (0..EPISODES).map(|e| dir.path().join(format!("{:05}.csv", e))),
    );
    let evaluator = FitnessEvaluator::new(Plant { response: 0.3 }, model_path, episodes)?;
    let config = GpConfig {
        population_size: 50,
        generations: 20,
        max_depth: 6,
        ..GpConfig::default()
    };

    println!("Running evolution...");
    let start = std::time::Instant::now();
    let mut evolution = Evolution::new(&mut rng, &config, &evaluator)?;
    let (fittest, fitness) = evolution.run(&mut rng, &evaluator)?;
    println!("Total duration: {:?}", start.elapsed());
    println!("Fittest controller ({:.4}): {}", fitness, fittest);
    let (best_ever, best_ever_fitness) = evolution.best_ever();
    println!("Best controller of any generation ({:.4}): {}", best_ever_fitness, best_ever);
    Ok(())
}
