//! Domain values and configuration shared by the revharvest crates.

pub mod app_config;
pub mod config;
pub mod reviews;
pub mod target;
pub mod targets;

use thiserror::Error;

pub use app_config::{HarvestConfig, ProxyPoolConfig};
pub use config::{load_config, load_config_from_env};
pub use reviews::{CanonicalReview, QuestionAnswer, Reviewer, RunSummary, RATING_SCALE_MAX};
pub use target::{StrategyKind, Target, DEFAULT_QUOTA};
pub use targets::{load_targets, TargetSpec, TargetsFile};

/// Fatal configuration problems. Raised before any fetch is attempted.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for {var}: {reason}")]
    InvalidEnvVar { var: String, reason: String },

    #[error("invalid target: {0}")]
    InvalidTarget(String),

    #[error("failed to read targets file {path}: {source}")]
    TargetsFileIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse targets file: {0}")]
    TargetsFileParse(#[source] serde_yaml::Error),

    #[error("targets file validation failed: {0}")]
    Validation(String),
}
