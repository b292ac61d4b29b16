use std::{fmt::Display, time::Duration};

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSecondsWithFrac};

use crate::{
    data::DataSet, expand_output_path, intensity::IntensityComponent, is_json,
    parameters::ParameterList, ArborError, ArborResult, ReadWrite,
};

/// A snapshot of a finished fit.
///
/// The covariance matrix is indexed by the free parameters of
/// [`FitResult::final_parameters`], in declaration order. Written results read back bit-for-bit
/// identical, including the fit duration.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FitResult {
    pub initial_parameters: ParameterList,
    pub final_parameters: ParameterList,
    pub initial_estimator_value: f64,
    pub final_estimator_value: f64,
    #[serde_as(as = "DurationSecondsWithFrac<String>")]
    pub fit_duration: Duration,
    pub covariance_matrix: DMatrix<f64>,
}

impl FitResult {
    /// Create a new [`FitResult`].
    ///
    /// # Errors
    ///
    /// Returns [`ArborError::ConfigurationError`] if the covariance matrix is not square with one
    /// row per free final parameter.
    pub fn new(
        initial_parameters: ParameterList,
        final_parameters: ParameterList,
        initial_estimator_value: f64,
        final_estimator_value: f64,
        fit_duration: Duration,
        covariance_matrix: DMatrix<f64>,
    ) -> ArborResult<Self> {
        let n_free = final_parameters.free_parameters().len();
        if covariance_matrix.nrows() != n_free || covariance_matrix.ncols() != n_free {
            return Err(ArborError::configuration(format!(
                "a covariance matrix of shape {}x{} does not match {} free parameters",
                covariance_matrix.nrows(),
                covariance_matrix.ncols(),
                n_free
            )));
        }
        Ok(Self {
            initial_parameters,
            final_parameters,
            initial_estimator_value,
            final_estimator_value,
            fit_duration,
            covariance_matrix,
        })
    }
    /// The names of the free final parameters, which index the covariance matrix.
    pub fn free_parameter_names(&self) -> Vec<String> {
        self.final_parameters
            .free_parameters()
            .iter()
            .map(|p| p.name.clone())
            .collect()
    }
    /// Returns `true` if every estimator value, parameter value, error, bound and covariance entry
    /// is finite.
    pub fn is_finite(&self) -> bool {
        let parameters_finite = |list: &ParameterList| {
            list.iter().all(|p| {
                p.value.is_finite()
                    && p.error.is_finite()
                    && p.bounds.0.map_or(true, f64::is_finite)
                    && p.bounds.1.map_or(true, f64::is_finite)
            })
        };
        self.initial_estimator_value.is_finite()
            && self.final_estimator_value.is_finite()
            && parameters_finite(&self.initial_parameters)
            && parameters_finite(&self.final_parameters)
            && self.covariance_matrix.iter().all(|v| v.is_finite())
    }
    /// Write the result to a file (JSON for a `.json` extension, binary otherwise).
    ///
    /// The binary format reproduces every value exactly, including NaN and infinities. JSON has no
    /// representation for those, so a result which is not [`FitResult::is_finite`] can only be
    /// written in the binary format.
    ///
    /// # Errors
    ///
    /// Returns [`ArborError::ConfigurationError`] when writing a non-finite result to a `.json`
    /// path, and an I/O or serialization error if writing fails.
    pub fn write<T: AsRef<str>>(&self, file_path: T) -> ArborResult<()> {
        if is_json(&expand_output_path(file_path.as_ref())?) && !self.is_finite() {
            return Err(ArborError::configuration(format!(
                "cannot write a fit result with non-finite values as JSON to {}, use a binary file",
                file_path.as_ref()
            )));
        }
        self.save_as(file_path)
    }
    /// Read a result written by [`FitResult::write`].
    pub fn load<T: AsRef<str>>(file_path: T) -> ArborResult<Self> {
        Self::load_from(file_path)
    }
    /// Print the result to the logging system.
    pub fn log(&self) {
        for line in self.to_string().lines() {
            log::info!("{}", line);
        }
    }
}

impl ReadWrite for FitResult {}

impl Display for FitResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "estimator: {} -> {} ({:.3}s)",
            self.initial_estimator_value,
            self.final_estimator_value,
            self.fit_duration.as_secs_f64()
        )?;
        writeln!(
            f,
            "{:<24} {:>14} {:>14} {:>14} {:>6}",
            "parameter", "initial", "final", "error", "fixed"
        )?;
        for parameter in self.final_parameters.iter() {
            let initial = self
                .initial_parameters
                .get(&parameter.name)
                .map(|p| p.value)
                .unwrap_or(f64::NAN);
            writeln!(
                f,
                "{:<24} {:>14.6} {:>14.6} {:>14.6} {:>6}",
                parameter.name, initial, parameter.value, parameter.error, parameter.is_fixed
            )?;
        }
        write!(f, "covariance:{}", self.covariance_matrix)
    }
}

/// The fraction of one component's integral in another's, with its error.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FitFraction {
    pub name: String,
    pub value: f64,
    pub error: f64,
}

impl Display for FitFraction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {} +- {}", self.name, self.value, self.error)
    }
}

fn fraction(
    numerator: &mut IntensityComponent,
    denominator: &mut IntensityComponent,
    sample: &DataSet,
) -> ArborResult<f64> {
    let total = denominator.integral(sample)?;
    if total == 0.0 {
        return Err(ArborError::configuration(format!(
            "component \"{}\" integrates to zero",
            denominator.name
        )));
    }
    Ok(numerator.integral(sample)? / total)
}

/// Set a parameter on every component which declares it and return the value actually applied,
/// which differs from `value` when the parameter is clamped onto one of its bounds.
fn set_parameter(
    components: [&mut IntensityComponent; 2],
    name: &str,
    value: f64,
) -> ArborResult<f64> {
    let mut applied = value;
    for component in components {
        if component.intensity.parameters().get(name).is_some() {
            component.intensity.update_parameter_value(name, value)?;
            if let Some(parameter) = component.intensity.parameters().get(name) {
                applied = parameter.value;
            }
        }
    }
    Ok(applied)
}

/// Calculate the fit fraction of every `(numerator, denominator)` pair of components over a
/// phase-space sample.
///
/// Each component is first set to the final parameters of `result` (restricted to the
/// parameters it declares). The error is propagated through the covariance matrix of the fit
/// with a Jacobian taken from central finite differences in each free parameter, which become
/// one-sided for a parameter sitting on one of its bounds.
pub fn fit_fractions(
    components: &[(IntensityComponent, IntensityComponent)],
    phsp: &DataSet,
    result: &FitResult,
) -> ArborResult<Vec<FitFraction>> {
    let free: Vec<(String, f64)> = result
        .final_parameters
        .free_parameters()
        .iter()
        .map(|p| (p.name.clone(), p.value))
        .collect();
    let covariance = &result.covariance_matrix;
    if covariance.nrows() != free.len() || covariance.ncols() != free.len() {
        return Err(ArborError::configuration(format!(
            "the covariance matrix does not match the {} free parameters of the fit result",
            free.len()
        )));
    }
    components
        .iter()
        .map(|(numerator, denominator)| {
            let mut numerator = numerator.clone();
            let mut denominator = denominator.clone();
            for component in [&mut numerator, &mut denominator] {
                let parameters = component
                    .intensity
                    .matching_parameters(&result.final_parameters);
                component.intensity.update_parameters(&parameters)?;
            }
            let value = fraction(&mut numerator, &mut denominator, phsp)?;
            let mut jacobian = DVector::<f64>::zeros(free.len());
            for (k, (name, central)) in free.iter().enumerate() {
                let step = 1e-6 * central.abs().max(1.0);
                let upper =
                    set_parameter([&mut numerator, &mut denominator], name, central + step)?;
                let up = fraction(&mut numerator, &mut denominator, phsp)?;
                let lower =
                    set_parameter([&mut numerator, &mut denominator], name, central - step)?;
                let down = fraction(&mut numerator, &mut denominator, phsp)?;
                set_parameter([&mut numerator, &mut denominator], name, *central)?;
                // one-sided when a bound clamps either step
                if upper > lower {
                    jacobian[k] = (up - down) / (upper - lower);
                }
            }
            let variance = jacobian.dot(&(covariance * &jacobian));
            let fit_fraction = FitFraction {
                name: numerator.name.clone(),
                value,
                error: variance.max(0.0).sqrt(),
            };
            log::debug!("fit fraction {}", fit_fraction);
            Ok(fit_fraction)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        expression::{parameter, variable},
        intensity::Intensity,
        parameters::FitParameter,
    };
    use approx::assert_relative_eq;

    fn result() -> FitResult {
        let initial: ParameterList = [
            FitParameter::new("a", 0.8),
            FitParameter::new("b", 1.2).with_bounds(Some(0.0), None),
            FitParameter::fixed("c", 3.0),
        ]
        .into_iter()
        .collect();
        let mut final_parameters = initial.clone();
        final_parameters.update_value("a", 1.0).unwrap();
        final_parameters.update_value("b", 1.0).unwrap();
        FitResult::new(
            initial,
            final_parameters,
            12.5,
            -3.0 / 7.0,
            Duration::new(2, 123_456_789),
            DMatrix::from_row_slice(2, 2, &[0.04, 0.0, 0.0, 0.01]),
        )
        .unwrap()
    }

    #[test]
    fn test_round_trip() {
        let result = result();
        for extension in ["json", "bin"] {
            let path = std::env::temp_dir().join(format!(
                "arbor_fit_result_{}.{}",
                std::process::id(),
                extension
            ));
            let path = path.to_string_lossy().to_string();
            result.write(&path).unwrap();
            let loaded = FitResult::load(&path).unwrap();
            std::fs::remove_file(&path).unwrap();
            assert_eq!(loaded, result);
            assert_eq!(loaded.fit_duration, Duration::new(2, 123_456_789));
            assert_eq!(
                loaded.final_parameters.get("b").unwrap().bounds,
                (Some(0.0), None)
            );
        }
    }

    #[test]
    fn test_non_finite_values_need_the_binary_format() {
        let mut result = result();
        result.covariance_matrix[(0, 1)] = f64::NAN;
        result.final_parameters.fix("c", Some(f64::INFINITY)).unwrap();
        assert!(!result.is_finite());
        let stem = std::env::temp_dir().join(format!("arbor_non_finite_{}", std::process::id()));
        let json = format!("{}.json", stem.to_string_lossy());
        assert!(matches!(
            result.write(&json),
            Err(ArborError::ConfigurationError { .. })
        ));
        assert!(!std::path::Path::new(&json).exists());
        let binary = format!("{}.bin", stem.to_string_lossy());
        result.write(&binary).unwrap();
        let loaded = FitResult::load(&binary).unwrap();
        std::fs::remove_file(&binary).unwrap();
        assert!(loaded.covariance_matrix[(0, 1)].is_nan());
        assert_eq!(loaded.final_parameters.get("c").unwrap().value, f64::INFINITY);
        assert_eq!(loaded.covariance_matrix[(1, 1)], 0.01);
    }

    #[test]
    fn test_covariance_shape_is_checked() {
        let result = result();
        assert!(matches!(
            FitResult::new(
                result.initial_parameters,
                result.final_parameters,
                0.0,
                0.0,
                Duration::ZERO,
                DMatrix::zeros(3, 3),
            ),
            Err(ArborError::ConfigurationError { .. })
        ));
    }

    #[test]
    fn test_fit_fraction_with_errors() {
        let numerator = IntensityComponent::new(
            "a",
            Intensity::from_expression(&(parameter("a", 0.0) * variable("x"))).unwrap(),
        );
        let denominator = IntensityComponent::new(
            "total",
            Intensity::from_expression(
                &((parameter("a", 0.0) + parameter("b", 0.0)) * variable("x")),
            )
            .unwrap(),
        );
        let phsp = DataSet::from_columns([("x", vec![0.5, 1.0, 2.0])]).unwrap();
        let fractions = fit_fractions(&[(numerator, denominator)], &phsp, &result()).unwrap();
        assert_eq!(fractions[0].name, "a");
        assert_relative_eq!(fractions[0].value, 0.5);
        // d/da = b / (a + b)^2 = 0.25 and d/db = -0.25
        let expected = (0.0625f64 * 0.04 + 0.0625 * 0.01).sqrt();
        assert_relative_eq!(fractions[0].error, expected, epsilon = 1e-6);
    }

    #[test]
    fn test_fit_fraction_error_at_a_bound() {
        let parameters: ParameterList = [
            FitParameter::new("a", 1.0),
            FitParameter::new("b", 0.0).with_bounds(Some(0.0), None),
        ]
        .into_iter()
        .collect();
        let result = FitResult::new(
            parameters.clone(),
            parameters,
            0.0,
            0.0,
            Duration::ZERO,
            DMatrix::from_row_slice(2, 2, &[0.04, 0.0, 0.0, 0.01]),
        )
        .unwrap();
        let numerator = IntensityComponent::new(
            "a",
            Intensity::from_expression(&(parameter("a", 0.0) * variable("x"))).unwrap(),
        );
        let denominator = IntensityComponent::new(
            "total",
            Intensity::from_expression(
                &((parameter("a", 0.0) + parameter("b", 0.0)) * variable("x")),
            )
            .unwrap(),
        );
        let phsp = DataSet::from_columns([("x", vec![0.5, 1.0, 2.0])]).unwrap();
        let fractions = fit_fractions(&[(numerator, denominator)], &phsp, &result).unwrap();
        assert_relative_eq!(fractions[0].value, 1.0);
        // d/da = b / (a + b)^2 = 0 and d/db = -a / (a + b)^2 = -1, with b only able to move up
        assert_relative_eq!(fractions[0].error, 0.1, epsilon = 1e-6);
    }
}
