//! The error type shared by every fallible operation within the crate.

use std::path::PathBuf;
use thiserror::Error;

/// Errors produced by an external collaborator such as the simulator.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum Error {
    /// An operator without both operands, a terminal with operands, or stale depth labels.
    #[error("malformed tree at node {node}: {reason}")]
    MalformedTree { node: usize, reason: &'static str },
    #[error("no binding for variable `{0}`")]
    UnboundVariable(String),
    #[error("tree depth {depth} exceeds the budget of {max_depth}")]
    DepthBudgetExceeded { depth: u32, max_depth: u32 },
    /// The summed fitness cannot serve as the denominator of the selection weights.
    #[error("total fitness {total} leaves the selection weights undefined")]
    DegenerateSelection { total: f64 },
    #[error("rollout of episode {} failed: {source}", episode.display())]
    SimulatorFailure {
        episode: PathBuf,
        #[source]
        source: BoxError,
    },
    #[error("failed to load simulation model {}: {source}", path.display())]
    ModelLoad {
        path: PathBuf,
        #[source]
        source: BoxError,
    },
    #[error("no episodes available for fitness evaluation")]
    NoEpisodes,
    #[error("individual {index} was never evaluated")]
    Unevaluated { index: usize },
    #[error("failed to enumerate episodes: {0}")]
    Episodes(#[from] walkdir::Error),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse configuration: {0}")]
    Toml(#[from] toml::de::Error),
}
