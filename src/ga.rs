//! A module for the generational search over control laws.
//!
//! # Genetic Algorithms
//!
//! The genetic algorithm process can be described as follows:
//!
//! 1. Initialise a *Population* of *Individual*s.
//! 2. Evaluate the *Fitness* of each of the *Individual*s.
//! 3. Select breeders by roulette wheel, weighted by *Fitness*.
//! 4. Create a new generation by replicating, mutating or crossing over the breeders.
//! 5. If the generation count is reached, we're done.
//! 6. GOTO 2.

use crate::config::GpConfig;
use crate::control::Individual;
use crate::error::Error;
use crate::fitness::{FitnessEvaluator, Simulator};
use crossbeam::channel;
use log::{debug, info, warn};
use rand::distributions::{Distribution, WeightedIndex};
use rand::seq::SliceRandom;
use rand::Rng;
use scoped_threadpool::Pool as ThreadPool;
use std::sync::atomic::{AtomicBool, Ordering};

// Model.

/// The stage of the generational loop most recently entered by an `Evolution`.
///
/// When a step fails, this is the stage that failed.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Phase {
    /// The initial population has been generated and evaluated.
    ///
    /// There is no separate evaluating stage: construction fails instead of returning an
    /// `Evolution` whose initial evaluation did not complete.
    Init,
    Selecting,
    Breeding,
    EvaluatingOffspring,
    Terminated,
}

/// The evolutionary run.
pub struct Evolution {
    thread_pool: ThreadPool,
    config: GpConfig,
    // Stores the population alongside their fitness.
    population: Vec<(Individual, f64)>,
    best_ever: (Individual, f64),
    generation: usize,
    phase: Phase,
}

// Impls.

impl Evolution {
    /// Generate and evaluate the initial population.
    pub fn new<R, S>(
        rng: &mut R,
        config: &GpConfig,
        evaluator: &FitnessEvaluator<S>,
    ) -> Result<Self, Error>
    where
        R: Rng,
        S: Simulator,
    {
        let num_threads = config.threads.unwrap_or(num_cpus::get() as _);
        Self::with_num_threads(rng, config, evaluator, num_threads)
    }

    /// Generate and evaluate the initial population using the given number of threads.
    pub fn with_num_threads<R, S>(
        rng: &mut R,
        config: &GpConfig,
        evaluator: &FitnessEvaluator<S>,
        num_threads: u32,
    ) -> Result<Self, Error>
    where
        R: Rng,
        S: Simulator,
    {
        config.validate()?;
        let mut thread_pool = ThreadPool::new(num_threads.max(1));

        info!("Initialising population of {} individuals...", config.population_size);
        let individuals = (0..config.population_size)
            .map(|_| Individual::generate(rng, config.inputs, config.max_depth))
            .collect::<Vec<_>>();
        let population = evaluate_population(&mut thread_pool, evaluator, individuals)?;
        let best_ever = most_fit(&population).clone();
        info!("Initial population: best fitness {:.4}: {}", best_ever.1, best_ever.0);

        Ok(Evolution {
            thread_pool,
            config: config.clone(),
            population,
            best_ever,
            generation: 0,
            phase: Phase::Init,
        })
    }

    /// Step forward the simulation by a single generation.
    pub fn step<R, S>(&mut self, rng: &mut R, evaluator: &FitnessEvaluator<S>) -> Result<(), Error>
    where
        R: Rng,
        S: Simulator,
    {
        // 1. Select breeders.
        self.phase = Phase::Selecting;
        let breeders = select_breeders(rng, &self.population, self.config.population_size)?;

        // 2. Breed the offspring.
        self.phase = Phase::Breeding;
        let offspring = breed(rng, breeders, &self.config)?;

        // 3. Evaluate the offspring, who become the new population.
        self.phase = Phase::EvaluatingOffspring;
        self.population = evaluate_population(&mut self.thread_pool, evaluator, offspring)?;
        self.generation += 1;

        let (best, best_fitness) = most_fit(&self.population);
        if fitter(*best_fitness, self.best_ever.1) {
            self.best_ever = (best.clone(), *best_fitness);
        }
        let total = self.population.iter().map(|&(_, f)| f).sum::<f64>();
        let mean = total / self.population.len() as f64;
        info!(
            "Gen {}: Best={:.4} | Mean={:.4} | Best Ever={:.4}",
            self.generation, best_fitness, mean, self.best_ever.1
        );
        Ok(())
    }

    /// Step through the remaining configured generations, returning the fittest of the final
    /// population.
    pub fn run<R, S>(
        &mut self,
        rng: &mut R,
        evaluator: &FitnessEvaluator<S>,
    ) -> Result<(Individual, f64), Error>
    where
        R: Rng,
        S: Simulator,
    {
        while self.generation < self.config.generations {
            self.step(rng, evaluator)?;
        }
        self.phase = Phase::Terminated;
        Ok(self.most_fit().clone())
    }

    /// View the current generation's population and their fitness.
    pub fn population(&self) -> &[(Individual, f64)] {
        &self.population
    }

    /// The first individual with the greatest fitness within the current population.
    pub fn most_fit(&self) -> &(Individual, f64) {
        most_fit(&self.population)
    }

    /// The fittest individual seen in any generation so far.
    pub fn best_ever(&self) -> &(Individual, f64) {
        &self.best_ever
    }

    /// The number of generations bred so far.
    pub fn generation(&self) -> usize {
        self.generation
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }
}

/// Run a full evolution, returning the fittest individual of the final generation.
pub fn evolve<R, S>(
    rng: &mut R,
    config: &GpConfig,
    evaluator: &FitnessEvaluator<S>,
) -> Result<(Individual, f64), Error>
where
    R: Rng,
    S: Simulator,
{
    Evolution::new(rng, config, evaluator)?.run(rng, evaluator)
}

fn most_fit(population: &[(Individual, f64)]) -> &(Individual, f64) {
    let mut iter = population.iter();
    let first = iter.next().expect("must be at least one individual");
    iter.fold(first, |best, candidate| if fitter(candidate.1, best.1) { candidate } else { best })
}

// Whether fitness `a` beats `b`. NaN ranks below every other value, including itself.
fn fitter(a: f64, b: f64) -> bool {
    a > b || (b.is_nan() && !a.is_nan())
}

/// Roulette-wheel weights for a population whose fitness is a negated cost.
///
/// Each weight is `1 - fitness / total`, where `total` sums every finite fitness. Since all
/// fitness values share the sign of `total`, the smallest share of the total (the least cost)
/// receives the greatest weight. Non-finite fitness and negative weights are clamped to zero.
pub fn selection_weights(fitness: &[f64]) -> Result<Vec<f64>, Error> {
    let total = fitness.iter().filter(|f| f.is_finite()).sum::<f64>();
    if total == 0.0 || !total.is_finite() {
        return Err(Error::DegenerateSelection { total });
    }
    let weights = fitness
        .iter()
        .map(|&f| if f.is_finite() { (1.0 - f / total).max(0.0) } else { 0.0 })
        .collect();
    Ok(weights)
}

/// The `selection_weights` normalised to sum to one.
pub fn selection_probabilities(fitness: &[f64]) -> Result<Vec<f64>, Error> {
    let weights = selection_weights(fitness)?;
    let sum = weights.iter().sum::<f64>();
    if sum == 0.0 {
        return Err(Error::DegenerateSelection { total: fitness.iter().sum() });
    }
    Ok(weights.into_iter().map(|w| w / sum).collect())
}

/// Draw `count` breeders with replacement, weighted by `selection_weights`.
///
/// Falls back to uniform weights when the fitness leaves the weights degenerate. Every breeder
/// is an independent copy, so duplicates may be bred without affecting one another.
pub fn select_breeders<R>(
    rng: &mut R,
    population: &[(Individual, f64)],
    count: usize,
) -> Result<Vec<Individual>, Error>
where
    R: Rng,
{
    let fitness = population.iter().map(|&(_, f)| f).collect::<Vec<_>>();
    let mut weights = selection_weights(&fitness).unwrap_or_else(|err| {
        warn!("{}; selecting uniformly", err);
        vec![1.0; population.len()]
    });
    if weights.iter().all(|&w| w == 0.0) {
        debug!("every selection weight is zero; selecting uniformly");
        weights = vec![1.0; population.len()];
    }
    let dist = WeightedIndex::new(&weights).map_err(|_| Error::DegenerateSelection {
        total: fitness.iter().sum(),
    })?;
    let breeders = (0..count)
        .map(|_| population[dist.sample(rng)].0.clone())
        .collect();
    Ok(breeders)
}

/// Produce the offspring of the given breeders, visited in order.
///
/// Each breeder is replicated, mutated or crossed over with a mate drawn from the breeders that
/// follow it. A mate is consumed by the crossover and not bred again. Every breeder yields
/// exactly one offspring, so the population size is preserved.
pub fn breed<R>(
    rng: &mut R,
    breeders: Vec<Individual>,
    config: &GpConfig,
) -> Result<Vec<Individual>, Error>
where
    R: Rng,
{
    let mutate_threshold = config.replication_rate + config.mutation_rate;
    let mut breeders = breeders.into_iter().map(Some).collect::<Vec<_>>();
    let mut offspring = Vec::with_capacity(breeders.len());
    for i in 0..breeders.len() {
        let mut breeder = match breeders[i].take() {
            Some(breeder) => breeder,
            None => continue,
        };
        let prob = rng.gen::<f64>();
        if prob < config.replication_rate {
            offspring.push(breeder);
        } else if prob < mutate_threshold {
            breeder.mutate(rng)?;
            offspring.push(breeder);
        } else {
            let mates = (i + 1..breeders.len())
                .filter(|&j| breeders[j].is_some())
                .collect::<Vec<_>>();
            let mut mate = match mates.choose(rng).and_then(|&j| breeders[j].take()) {
                Some(mate) => mate,
                None => {
                    offspring.push(breeder);
                    continue;
                }
            };
            if !breeder.crossover(&mut mate, rng, config.max_crossover_attempts)? {
                debug!("crossover found no pairing within budget; replicating both parents");
            }
            offspring.push(breeder);
            offspring.push(mate);
        }
    }
    Ok(offspring)
}

/// Evaluate the fitness of every individual across the thread pool.
///
/// Each worker loads its own model and pulls individuals from a shared queue. The first failure
/// stops the remaining work and is returned. Fitness is paired with individuals in their
/// original order.
fn evaluate_population<S>(
    thread_pool: &mut ThreadPool,
    evaluator: &FitnessEvaluator<S>,
    individuals: Vec<Individual>,
) -> Result<Vec<(Individual, f64)>, Error>
where
    S: Simulator,
{
    let mut fitness = vec![None; individuals.len()];
    let mut failure = None;
    {
        let (job_tx, job_rx) = channel::unbounded();
        for job in individuals.iter().enumerate() {
            if job_tx.send(job).is_err() {
                break;
            }
        }
        drop(job_tx);

        let (result_tx, result_rx) = channel::unbounded();
        let aborted = AtomicBool::new(false);
        let num_workers = (thread_pool.thread_count() as usize).min(individuals.len());
        thread_pool.scoped(|scoped| {
            for _ in 0..num_workers {
                let job_rx = job_rx.clone();
                let result_tx = result_tx.clone();
                let aborted = &aborted;
                scoped.execute(move || {
                    let model = match evaluator.load_model() {
                        Ok(model) => model,
                        Err(err) => {
                            aborted.store(true, Ordering::SeqCst);
                            let _ = result_tx.send(Err(err));
                            return;
                        }
                    };
                    for (index, indv) in job_rx.iter() {
                        if aborted.load(Ordering::SeqCst) {
                            break;
                        }
                        let result = evaluator.fitness(&model, indv).map(|f| (index, f));
                        if result.is_err() {
                            aborted.store(true, Ordering::SeqCst);
                        }
                        if result_tx.send(result).is_err() {
                            break;
                        }
                    }
                });
            }
        });
        drop(result_tx);

        for result in result_rx.iter() {
            match result {
                Ok((index, f)) => fitness[index] = Some(f),
                Err(err) => {
                    failure.get_or_insert(err);
                }
            }
        }
    }
    if let Some(err) = failure {
        return Err(err);
    }

    individuals
        .into_iter()
        .zip(fitness)
        .enumerate()
        .map(|(index, (indv, f))| f.map(|f| (indv, f)).ok_or(Error::Unevaluated { index }))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::Inputs;
    use rand::SeedableRng;
    use rand_xorshift::XorShiftRng;

    fn population(fitness: &[f64]) -> Vec<(Individual, f64)> {
        let mut rng = XorShiftRng::seed_from_u64(0);
        fitness
            .iter()
            .map(|&f| (Individual::generate(&mut rng, Inputs::ErrorTerms, 4), f))
            .collect()
    }

    #[test]
    fn inverted_weights_favour_least_cost() {
        let weights = selection_weights(&[-10.0, -20.0, -30.0, -40.0]).unwrap();
        let expected = [0.9, 0.8, 0.7, 0.6];
        for (w, e) in weights.iter().zip(&expected) {
            assert!((w - e).abs() < 1e-12);
        }
        assert!((weights.iter().sum::<f64>() - 3.0).abs() < 1e-12);
        assert!(weights.iter().all(|&w| w >= 0.0));

        let probs = selection_probabilities(&[-10.0, -20.0, -30.0, -40.0]).unwrap();
        assert!((probs.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!((probs[0] - 0.3).abs() < 1e-12);
        assert!(probs.windows(2).all(|w| w[0] > w[1]));
    }

    #[test]
    fn zero_total_fitness_is_degenerate() {
        assert!(matches!(selection_weights(&[0.0, 0.0]), Err(Error::DegenerateSelection { .. })));
        assert!(matches!(selection_weights(&[5.0, -5.0]), Err(Error::DegenerateSelection { .. })));
        assert!(matches!(selection_weights(&[]), Err(Error::DegenerateSelection { .. })));
    }

    #[test]
    fn mixed_signs_never_yield_negative_weights() {
        let weights = selection_weights(&[-10.0, 4.0, f64::NEG_INFINITY, -1.0]).unwrap();
        assert!(weights.iter().all(|&w| w >= 0.0));
        assert_eq!(weights[2], 0.0);
    }

    #[test]
    fn breeders_are_drawn_with_replacement() {
        let mut rng = XorShiftRng::seed_from_u64(1);
        let pop = population(&[-10.0, -20.0, -30.0, -40.0]);
        let breeders = select_breeders(&mut rng, &pop, 10).unwrap();
        assert_eq!(breeders.len(), 10);
    }

    #[test]
    fn degenerate_populations_select_uniformly() {
        let mut rng = XorShiftRng::seed_from_u64(2);
        let pop = population(&[0.0, 0.0, 0.0]);
        assert_eq!(select_breeders(&mut rng, &pop, 6).unwrap().len(), 6);
        // A lone individual holds the whole total, leaving it with zero weight.
        let pop = population(&[-3.0]);
        assert_eq!(select_breeders(&mut rng, &pop, 2).unwrap().len(), 2);
    }

    #[test]
    fn breeding_preserves_population_size() {
        let mut rng = XorShiftRng::seed_from_u64(3);
        let config = GpConfig { max_depth: 5, ..GpConfig::default() };
        for n in 0..20 {
            let breeders = (0..n)
                .map(|_| Individual::generate(&mut rng, Inputs::ErrorTerms, config.max_depth))
                .collect::<Vec<_>>();
            let offspring = breed(&mut rng, breeders, &config).unwrap();
            assert_eq!(offspring.len(), n);
            for o in &offspring {
                assert!(o.expr().depth() <= config.max_depth);
                o.expr().validate().unwrap();
            }
        }
    }

    #[test]
    fn pure_replication_leaves_breeders_unchanged() {
        let mut rng = XorShiftRng::seed_from_u64(4);
        let config = GpConfig { replication_rate: 1.0, mutation_rate: 0.0, ..GpConfig::default() };
        let breeders = (0..8)
            .map(|_| Individual::generate(&mut rng, Inputs::ErrorTerms, 4))
            .collect::<Vec<_>>();
        let before = breeders.iter().map(|b| b.to_string()).collect::<Vec<_>>();
        let offspring = breed(&mut rng, breeders, &config).unwrap();
        let after = offspring.iter().map(|o| o.to_string()).collect::<Vec<_>>();
        assert_eq!(before, after);
    }

    #[test]
    fn most_fit_prefers_the_first_of_equals() {
        let pop = population(&[-5.0, -1.0, -1.0, -9.0]);
        let best = most_fit(&pop);
        assert_eq!(best.1, -1.0);
        assert_eq!(best.0.to_string(), pop[1].0.to_string());
    }

    #[test]
    fn most_fit_never_picks_nan() {
        let pop = population(&[f64::NAN, -1.0, -2.0]);
        assert_eq!(most_fit(&pop).1, -1.0);
        let pop = population(&[-3.0, f64::NAN, -2.0]);
        assert_eq!(most_fit(&pop).1, -2.0);
        let pop = population(&[f64::NAN, f64::NEG_INFINITY]);
        assert_eq!(most_fit(&pop).1, f64::NEG_INFINITY);
    }

    #[test]
    fn nan_ranks_below_everything() {
        assert!(fitter(-1.0, f64::NAN));
        assert!(fitter(f64::NEG_INFINITY, f64::NAN));
        assert!(!fitter(f64::NAN, -1.0));
        assert!(!fitter(f64::NAN, f64::NAN));
        assert!(!fitter(-2.0, -2.0));
        assert!(fitter(-1.0, -2.0));
    }
}
