//! `arbor` is a function-tree evaluation engine for amplitude analyses. A model is described
//! once as a directed acyclic graph of typed computations over fit parameters and kinematic
//! variables, and is then evaluated many thousands of times by an external optimizer which only
//! ever changes the parameter values between calls. Every node in the graph caches its result,
//! and a parameter update only invalidates the nodes which actually depend on that parameter, so
//! a typical likelihood evaluation during a fit recomputes a small part of the graph.
//!
//! # Overview
//! * [`FunctionTree`] is an arena of [`NodeKind`]s addressed by [`NodeId`]s. Inputs must exist
//!   before a node which uses them is inserted, so the graph is acyclic by construction, and
//!   structurally identical nodes are only stored once.
//! * [`ParameterList`] owns the named [`FitParameter`]s of a tree. Parameters are always
//!   updated through the tree so that dependent caches can be invalidated.
//! * [`Intensity`] evaluates a real-valued tree over a [`DataSet`] and returns one value per
//!   event, while [`Estimator`] binds an [`Intensity`] to a fixed [`DataSet`] and reduces it to an
//!   unbinned negative log-likelihood.
//! * [`Kinematics`] converts raw four-momenta in an [`EventCollection`] into the named columns of
//!   a [`DataSet`], and [`IntensityBuilder`] turns a declarative [`ModelConfig`] into an
//!   [`Intensity`].
//!
//! # Quick Start
//! ```rust
//! use arbor::{parameter, variable, DataSet, Intensity};
//!
//! let model = parameter("a", 2.0) * variable("x") + parameter("b", 1.0);
//! let mut intensity = Intensity::from_expression(&model).unwrap();
//! let dataset = DataSet::from_columns([("x", vec![1.0, 2.0, 3.0])]).unwrap();
//! assert_eq!(intensity.evaluate(&dataset).unwrap(), vec![3.0, 5.0, 7.0]);
//!
//! intensity.update_parameter_value("a", 3.0).unwrap();
//! assert_eq!(intensity.evaluate(&dataset).unwrap(), vec![4.0, 7.0, 10.0]);
//! ```
//!
//! # Logging
//! The library only emits records through the [`log`] facade and never installs a logger on its
//! own. Applications which want to see these records should build a [`LoggingConfig`] and call
//! [`LoggingConfig::init`] once at startup.
#![warn(clippy::perf, clippy::style)]
#![allow(clippy::excessive_precision)]

use serde::{de::DeserializeOwned, Serialize};
use std::{
    fs::File,
    io::{BufReader, BufWriter},
    path::{Path, PathBuf},
};
use thiserror::Error;

/// Model descriptions and the [`IntensityBuilder`] which turns them into [`Intensity`]s.
pub mod builder;
/// Raw events, [`DataSet`]s, and the tools which produce them.
pub mod data;
/// The unbinned log-likelihood [`Estimator`].
pub mod estimator;
/// A serializable builder for function trees.
pub mod expression;
/// Snapshots of finished fits and their persistence.
pub mod fit_result;
/// The [`Intensity`] facade.
pub mod intensity;
/// Opaque physics kernels which can be inserted into a [`FunctionTree`].
pub mod kernels;
/// Conversion of four-momenta into kinematic variables.
pub mod kinematics;
/// Explicit, caller-supplied logging configuration.
pub mod logging;
/// Fit parameters and the registry which owns them.
pub mod parameters;
/// The function tree itself.
pub mod tree;
/// Useful utility functions, vectors, and special functions.
pub mod utils;

pub use builder::{
    AmplitudeDescription, DynamicsDescription, IntensityBuilder, IntensityDescription,
    KinematicsDescription, ModelConfig, ParameterDescription,
};
pub use data::{
    generate::{
        add_intensity_weights, generate, generate_from_sample, generate_importance_sampled_phsp,
        generate_phsp, PhaseSpaceGenerator,
    },
    io::read_parquet,
    DataSet, Event, EventCollection,
};
pub use estimator::{create_min_log_lh_estimator, Estimator, LikelihoodTerm};
pub use expression::{complex, constant, fixed, parameter, variable, Expression};
pub use fit_result::{fit_fractions, FitFraction, FitResult};
pub use intensity::{initialize_with_fit_result, Intensity, IntensityComponent};
pub use kernels::{breit_wigner::BreitWigner, wigner::WignerD, Kernel};
pub use kinematics::{HelicityKinematics, Kinematics, Particle, ParticleList, SubSystem};
pub use logging::LoggingConfig;
pub use parameters::{FitParameter, ParameterList};
pub use tree::{
    value::{Domain, Shape, Value, ValueType},
    FunctionTree, NodeId, NodeKind, ReduceOp, UnaryOp,
};
pub use utils::vectors::{Vec3, Vec4};

pub use std::f64::consts::PI;

/// The error type used by all `arbor` internal methods
#[derive(Error, Debug)]
pub enum ArborError {
    /// An alias for [`std::io::Error`].
    #[error("IO Error: {0}")]
    IOError(#[from] std::io::Error),
    /// An alias for [`parquet::errors::ParquetError`].
    #[error("Parquet Error: {0}")]
    ParquetError(#[from] parquet::errors::ParquetError),
    /// An alias for [`arrow::error::ArrowError`].
    #[error("Arrow Error: {0}")]
    ArrowError(#[from] arrow::error::ArrowError),
    /// An alias for [`shellexpand::LookupError`].
    #[error("Failed to expand path: {0}")]
    LookupError(#[from] shellexpand::LookupError<std::env::VarError>),
    /// An error returned by the binary (de)serializer
    #[error("Bincode error: {0}")]
    BincodeError(#[from] Box<bincode::ErrorKind>),
    /// An error returned by the JSON (de)serializer
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    /// An error which occurs when a model description is missing a section, is malformed, or
    /// refers to names which cannot be resolved.
    #[error("Configuration error: {reason}")]
    ConfigurationError {
        /// Description of the problem
        reason: String,
    },
    /// An error which occurs when raw event data violates its own invariants, such as an event
    /// holding a different number of four-momenta than there are particle IDs.
    #[error("Corrupt data: {reason}")]
    CorruptDataError {
        /// Description of the problem
        reason: String,
    },
    /// An error which occurs when the user tries to update parameters which are not registered.
    #[error("No registered parameter(s) with name(s) {}!", quoted_names(.names))]
    ParameterNotFound {
        /// Names which failed lookup
        names: Vec<String>,
    },
    /// An error which occurs when a graph is malformed or cannot be bound to a [`DataSet`], such
    /// as a dangling variable or a shape mismatch between a node and its inputs.
    #[error("Structural graph error: {reason}")]
    StructuralGraphError {
        /// Description of the problem
        reason: String,
    },
    /// A custom fallback error for errors too complex or too infrequent to warrant their own error
    /// category.
    #[error("{0}")]
    Custom(String),
}

fn quoted_names(names: &[String]) -> String {
    names
        .iter()
        .map(|name| format!("\"{name}\""))
        .collect::<Vec<_>>()
        .join(", ")
}

impl ArborError {
    pub(crate) fn structural<T: Into<String>>(reason: T) -> Self {
        Self::StructuralGraphError {
            reason: reason.into(),
        }
    }
    pub(crate) fn configuration<T: Into<String>>(reason: T) -> Self {
        Self::ConfigurationError {
            reason: reason.into(),
        }
    }
    pub(crate) fn corrupt<T: Into<String>>(reason: T) -> Self {
        Self::CorruptDataError {
            reason: reason.into(),
        }
    }
}

impl Clone for ArborError {
    // Most wrapped error types are not cloneable, so clones collapse into the rendered message
    fn clone(&self) -> Self {
        let err_string = self.to_string();
        ArborError::Custom(err_string)
    }
}

/// A [`Result`] alias with an [`ArborError`] error type.
pub type ArborResult<T> = Result<T, ArborError>;

pub(crate) fn canonicalize_path(file_path: &str) -> ArborResult<PathBuf> {
    Ok(Path::new(&*shellexpand::full(file_path)?).canonicalize()?)
}

pub(crate) fn expand_output_path(file_path: &str) -> ArborResult<PathBuf> {
    Ok(PathBuf::from(&*shellexpand::full(file_path)?))
}

pub(crate) fn is_json(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

/// A trait which gives [`Serialize`] and [`Deserialize`](`serde::Deserialize`) structs a uniform
/// way to be written to and read from disk. Files ending in `.json` are written as
/// human-readable JSON, and every other extension uses the compact [`bincode`] format.
pub trait ReadWrite: Serialize + DeserializeOwned {
    /// Write the object to the given path. Shell variables and `~` are expanded.
    fn save_as<T: AsRef<str>>(&self, file_path: T) -> ArborResult<()> {
        let path = expand_output_path(file_path.as_ref())?;
        let writer = BufWriter::new(File::create(&path)?);
        if is_json(&path) {
            serde_json::to_writer_pretty(writer, self)?;
        } else {
            bincode::serialize_into(writer, self)?;
        }
        Ok(())
    }

    /// Read an object which was written with [`ReadWrite::save_as`].
    fn load_from<T: AsRef<str>>(file_path: T) -> ArborResult<Self> {
        let path = canonicalize_path(file_path.as_ref())?;
        let reader = BufReader::new(File::open(&path)?);
        if is_json(&path) {
            Ok(serde_json::from_reader(reader)?)
        } else {
            Ok(bincode::deserialize_from(reader)?)
        }
    }
}
