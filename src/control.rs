//! Individuals and the control-loop policy through which the simulator drives them.

use crate::error::Error;
use crate::gp::expr::{self, Expr, Operator, PrimitiveSet};
use crate::gp::ops;
use rand::Rng;
use serde::Deserialize;
use std::fmt;

/// The small positive constants available to every primitive set.
pub const CONSTANTS: [f64; 5] = [1.0, 2.0, 3.0, 4.0, 5.0];

// Traits.

/// The capability the simulator uses to steer the vehicle on each step of a rollout.
pub trait ControlPolicy {
    /// Produce the control output for the current step.
    fn update(
        &mut self,
        target_lataccel: f64,
        current_lataccel: f64,
        state: &VehicleState,
        future_plan: &FuturePlan,
    ) -> Result<f64, Error>;
}

// Model.

/// The vehicle state snapshot handed to the policy by the simulator.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct VehicleState {
    pub roll_lataccel: f64,
    pub v_ego: f64,
    pub a_ego: f64,
}

/// The upcoming segment of the episode as seen by the policy.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FuturePlan {
    pub lataccel: Vec<f64>,
    pub roll_lataccel: Vec<f64>,
    pub v_ego: Vec<f64>,
    pub a_ego: Vec<f64>,
}

/// The set of variables that an individual's terminals refer to.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Inputs {
    /// `P`, `I` and `D`: the tracking error, its running sum and its step-to-step change.
    ErrorTerms,
    /// `roll_lataccel`, `v_ego` and `a_ego` taken straight from the vehicle state.
    VehicleState,
}

/// One candidate control law: an expression tree and the depth budget it must respect.
#[derive(Clone, Debug)]
pub struct Individual {
    expr: Expr,
    max_depth: u32,
    inputs: Inputs,
}

/// A running instance of an individual's control law.
///
/// Holds the error integral and previous error for a single rollout.
#[derive(Clone, Debug)]
pub struct Controller<'a> {
    expr: &'a Expr,
    inputs: Inputs,
    error_integral: f64,
    prev_error: f64,
}

// Impls.

impl Default for Inputs {
    fn default() -> Self {
        Inputs::ErrorTerms
    }
}

impl Inputs {
    /// The primitives from which expressions over these inputs are generated.
    pub fn primitives(self) -> PrimitiveSet {
        let variables: &'static [&'static str] = match self {
            Inputs::ErrorTerms => &["P", "I", "D"],
            Inputs::VehicleState => &["roll_lataccel", "v_ego", "a_ego"],
        };
        PrimitiveSet { operators: &Operator::ALL, variables, constants: &CONSTANTS }
    }
}

impl Individual {
    /// Generate a random individual.
    pub fn generate<R>(rng: &mut R, inputs: Inputs, max_depth: u32) -> Self
    where
        R: Rng,
    {
        let expr = expr::gen(rng, &inputs.primitives(), max_depth);
        Individual { expr, max_depth, inputs }
    }

    /// Wrap an existing expression, checking its structure and depth budget.
    pub fn from_expr(expr: Expr, max_depth: u32, inputs: Inputs) -> Result<Self, Error> {
        expr.validate()?;
        let depth = expr.depth();
        if depth > max_depth {
            return Err(Error::DepthBudgetExceeded { depth, max_depth });
        }
        Ok(Individual { expr, max_depth, inputs })
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    pub fn inputs(&self) -> Inputs {
        self.inputs
    }

    /// A fresh controller with zeroed error state.
    pub fn controller(&self) -> Controller {
        Controller {
            expr: &self.expr,
            inputs: self.inputs,
            error_integral: 0.0,
            prev_error: 0.0,
        }
    }

    /// Replace a random subtree within the depth budget.
    pub fn mutate<R>(&mut self, rng: &mut R) -> Result<(), Error>
    where
        R: Rng,
    {
        ops::mutate(rng, &self.inputs.primitives(), &mut self.expr, self.max_depth)
    }

    /// Exchange subtrees with `mate` such that both stay within their own depth budgets.
    ///
    /// Returns `false`, leaving both individuals untouched, if no acceptable exchange was found
    /// within `max_attempts`.
    pub fn crossover<R>(
        &mut self,
        mate: &mut Individual,
        rng: &mut R,
        max_attempts: usize,
    ) -> Result<bool, Error>
    where
        R: Rng,
    {
        let a = (&self.expr, self.max_depth);
        let b = (&mate.expr, mate.max_depth);
        match ops::crossover_within_budget(rng, a, b, max_attempts)? {
            Some((a, b)) => {
                self.expr = a;
                mate.expr = b;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl<'a> ControlPolicy for Controller<'a> {
    fn update(
        &mut self,
        target_lataccel: f64,
        current_lataccel: f64,
        state: &VehicleState,
        _future_plan: &FuturePlan,
    ) -> Result<f64, Error> {
        let error = target_lataccel - current_lataccel;
        self.error_integral += error;
        let error_diff = error - self.prev_error;
        self.prev_error = error;
        match self.inputs {
            Inputs::ErrorTerms => {
                let bindings = [("P", error), ("I", self.error_integral), ("D", error_diff)];
                self.expr.evaluate(&bindings[..])
            }
            Inputs::VehicleState => {
                let bindings = [
                    ("roll_lataccel", state.roll_lataccel),
                    ("v_ego", state.v_ego),
                    ("a_ego", state.a_ego),
                ];
                self.expr.evaluate(&bindings[..])
            }
        }
    }
}

impl fmt::Display for Individual {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&self.expr, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_xorshift::XorShiftRng;

    fn pid() -> Individual {
        // (P + (I + D))
        let id = Expr::operator(Operator::Add, &Expr::variable("D"), &Expr::variable("I"));
        let expr = Expr::operator(Operator::Add, &id, &Expr::variable("P"));
        Individual::from_expr(expr, 3, Inputs::ErrorTerms).unwrap()
    }

    fn step(controller: &mut Controller, target: f64, current: f64) -> f64 {
        controller
            .update(target, current, &VehicleState::default(), &FuturePlan::default())
            .unwrap()
    }

    #[test]
    fn error_terms_accumulate_across_updates() {
        let indv = pid();
        let mut controller = indv.controller();
        // error 1: P = 1, I = 1, D = 1
        assert_eq!(step(&mut controller, 1.0, 0.0), 3.0);
        // error 3: P = 3, I = 4, D = 2
        assert_eq!(step(&mut controller, 3.0, 0.0), 9.0);
        // error 0: P = 0, I = 4, D = -3
        assert_eq!(step(&mut controller, 2.0, 2.0), 1.0);
    }

    #[test]
    fn each_controller_starts_from_zero() {
        let indv = pid();
        let mut first = indv.controller();
        step(&mut first, 5.0, 0.0);
        step(&mut first, 5.0, 0.0);
        let mut second = indv.controller();
        assert_eq!(step(&mut second, 1.0, 0.0), 3.0);
    }

    #[test]
    fn vehicle_state_inputs() {
        let (a_ego, v_ego) = (Expr::variable("a_ego"), Expr::variable("v_ego"));
        let expr = Expr::operator(Operator::Mul, &a_ego, &v_ego);
        let indv = Individual::from_expr(expr, 2, Inputs::VehicleState).unwrap();
        let state = VehicleState { roll_lataccel: 0.1, v_ego: 20.0, a_ego: -0.5 };
        let out = indv.controller().update(0.0, 0.0, &state, &FuturePlan::default()).unwrap();
        assert_eq!(out, -10.0);
    }

    #[test]
    fn foreign_variables_are_unbound() {
        let indv = Individual::from_expr(Expr::variable("v_ego"), 1, Inputs::ErrorTerms).unwrap();
        let state = VehicleState::default();
        let result = indv.controller().update(1.0, 0.0, &state, &FuturePlan::default());
        assert!(matches!(result, Err(Error::UnboundVariable(_))));
    }

    #[test]
    fn from_expr_rejects_trees_over_budget() {
        let expr = pid().expr().clone();
        match Individual::from_expr(expr, 2, Inputs::ErrorTerms) {
            Err(Error::DepthBudgetExceeded { depth, max_depth }) => {
                assert_eq!((depth, max_depth), (3, 2));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn generated_individuals_only_use_their_inputs() {
        let mut rng = XorShiftRng::seed_from_u64(21);
        for &inputs in &[Inputs::ErrorTerms, Inputs::VehicleState] {
            for _ in 0..50 {
                let indv = Individual::generate(&mut rng, inputs, 5);
                let state = VehicleState { roll_lataccel: 0.2, v_ego: 10.0, a_ego: 0.1 };
                let out = indv.controller().update(0.5, 0.1, &state, &FuturePlan::default());
                assert!(out.is_ok(), "{} failed: {:?}", indv, out);
            }
        }
    }

    #[test]
    fn mutation_and_crossover_keep_budgets() {
        let mut rng = XorShiftRng::seed_from_u64(8);
        let mut a = Individual::generate(&mut rng, Inputs::ErrorTerms, 6);
        let mut b = Individual::generate(&mut rng, Inputs::ErrorTerms, 3);
        for _ in 0..50 {
            a.mutate(&mut rng).unwrap();
            b.mutate(&mut rng).unwrap();
            a.crossover(&mut b, &mut rng, 8).unwrap();
            assert!(a.expr().depth() <= 6);
            assert!(b.expr().depth() <= 3);
        }
    }
}
