use parking_lot::Mutex;

use crate::{
    data::DataSet,
    intensity::Intensity,
    parameters::ParameterList,
    tree::{FunctionTree, ReduceOp, UnaryOp},
    ArborError, ArborResult,
};

/// A trait which describes a term that can be used like a likelihood by an external minimizer.
pub trait LikelihoodTerm: Send + Sync {
    /// Evaluate the term with the given values for the free parameters, in the order given by
    /// [`LikelihoodTerm::parameters`].
    fn evaluate_with(&self, parameters: &[f64]) -> ArborResult<f64>;
    /// The names of the free parameters.
    fn parameters(&self) -> Vec<String>;
}

/// An unbinned negative log-likelihood over a fixed [`DataSet`].
///
/// The estimator owns a copy of the [`Intensity`]'s tree with the likelihood reduction appended
/// to its head, and the dataset it was created with. Both stay fixed for the life of the
/// estimator, so between two calls to [`Estimator::evaluate`] only the nodes which depend on a
/// changed parameter are recomputed.
#[derive(Debug)]
pub struct Estimator {
    tree: Mutex<FunctionTree>,
    dataset: DataSet,
}

impl Estimator {
    /// The current value of the negative log-likelihood.
    pub fn evaluate(&self) -> ArborResult<f64> {
        let mut tree = self.tree.lock();
        let value = tree.evaluate(&self.dataset)?;
        value.as_real().ok_or_else(|| {
            ArborError::structural(format!("the estimator produced a non-scalar value {}", value))
        })
    }
    /// Assign every parameter value positionally, in declaration order.
    pub fn update_parameters_from(&mut self, values: &[f64]) -> ArborResult<()> {
        self.tree.get_mut().update_parameter_values(values)
    }
    /// Apply every parameter in `parameters` by name. Nothing changes if any name is unknown.
    pub fn update_parameters(&mut self, parameters: &ParameterList) -> ArborResult<()> {
        self.tree.get_mut().update_parameters(parameters)
    }
    pub fn update_parameter_value<T: AsRef<str>>(&mut self, name: T, value: f64) -> ArborResult<()> {
        self.tree.get_mut().update_parameter_value(name, value)
    }
    /// A snapshot of the parameters of the estimator.
    pub fn parameters(&self) -> ParameterList {
        self.tree.lock().parameters().clone()
    }
    pub fn dataset(&self) -> &DataSet {
        &self.dataset
    }
    /// A human-readable dump of the underlying tree.
    pub fn print(&self) -> String {
        self.tree.lock().to_string()
    }
    /// The number of node recomputations since creation or the last reset.
    pub fn recompute_count(&self) -> usize {
        self.tree.lock().total_recomputes()
    }
    pub fn reset_recompute_counters(&self) {
        self.tree.lock().reset_recompute_counters()
    }
}

impl LikelihoodTerm for Estimator {
    /// Set the free parameters and evaluate. Parameters whose value is unchanged are left alone
    /// so their dependent caches survive.
    fn evaluate_with(&self, parameters: &[f64]) -> ArborResult<f64> {
        {
            let mut tree = self.tree.lock();
            let free: Vec<(String, f64)> = tree
                .parameters()
                .free_parameters()
                .iter()
                .map(|p| (p.name.clone(), p.value))
                .collect();
            if free.len() != parameters.len() {
                return Err(ArborError::structural(format!(
                    "expected {} free parameter values but received {}",
                    free.len(),
                    parameters.len()
                )));
            }
            for ((name, old), new) in free.iter().zip(parameters) {
                if old.to_bits() != new.to_bits() {
                    tree.update_parameter_value(name, *new)?;
                }
            }
        }
        self.evaluate()
    }
    fn parameters(&self) -> Vec<String> {
        self.tree
            .lock()
            .parameters()
            .free_parameters()
            .iter()
            .map(|p| p.name.clone())
            .collect()
    }
}

/// Build the unbinned negative log-likelihood of `intensity` over `dataset`.
///
/// The estimator value is `-Σ ln I(e)` for unweighted data. For weighted data every log-term is
/// multiplied by its weight rescaled so that the weights sum to the number of events,
/// `-(N / Σw) Σ w(e) ln I(e)`. The returned [`ParameterList`] is a snapshot of the estimator's
/// parameters, which is the starting point handed to an optimizer.
///
/// # Errors
///
/// Returns [`ArborError::ConfigurationError`] if the dataset is empty or its weights sum to
/// zero, and [`ArborError::StructuralGraphError`] if the dataset lacks a column the intensity
/// reads.
pub fn create_min_log_lh_estimator(
    intensity: &Intensity,
    dataset: &DataSet,
) -> ArborResult<(Estimator, ParameterList)> {
    let total_weight = dataset.n_events_weighted();
    if dataset.is_empty() || total_weight == 0.0 {
        return Err(ArborError::configuration(
            "cannot build a likelihood over an empty dataset",
        ));
    }
    let head = intensity.head()?;
    let mut tree = intensity.clone().into_tree();
    let log_intensity = tree.unary(UnaryOp::Ln, head)?;
    let (summand, scale) = if dataset.has_weights() {
        let weights = tree.weights()?;
        (
            tree.mul(&[weights, log_intensity])?,
            -(dataset.len() as f64) / total_weight,
        )
    } else {
        (log_intensity, -1.0)
    };
    let sum = tree.reduce(ReduceOp::Sum, summand)?;
    let scale = tree.constant(scale)?;
    let nll = tree.mul(&[sum, scale])?;
    tree.set_head(nll)?;
    tree.bind(dataset)?;
    let parameters = tree.parameters().clone();
    log::info!(
        "created a log-likelihood estimator over {} events with {} parameters ({} free)",
        dataset.len(),
        parameters.len(),
        parameters.free_parameters().len()
    );
    Ok((
        Estimator {
            tree: Mutex::new(tree),
            dataset: dataset.clone(),
        },
        parameters,
    ))
}
