//! Evolving symbolic control laws with genetic programming.
//!
//! Candidate control laws are small arithmetic expression trees over tracking-error or
//! vehicle-state terminals. Each generation is rolled out through an external vehicle
//! simulator and the least costly laws are favoured when breeding the next.

pub mod config;
pub mod control;
pub mod error;
pub mod fitness;
pub mod ga;
pub mod gp;

pub use crate::config::{Config, FitnessConfig, GpConfig};
pub use crate::control::{ControlPolicy, Controller, FuturePlan, Individual, Inputs, VehicleState};
pub use crate::error::{BoxError, Error};
pub use crate::fitness::{EpisodeSet, FitnessEvaluator, Rollout, Simulator};
pub use crate::ga::{evolve, Evolution, Phase};
