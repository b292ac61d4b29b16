use crate::{
    data::DataSet,
    expression::Expression,
    fit_result::FitResult,
    parameters::ParameterList,
    tree::{
        value::{sum_products, Shape},
        FunctionTree, NodeId, ReduceOp,
    },
    ArborError, ArborResult,
};

/// A [`FunctionTree`] whose head yields one real, non-negative value per event.
///
/// The [`Intensity`] exclusively owns its tree, so every parameter mutation goes through it and
/// invalidates exactly the nodes which depend on the changed parameter. Nothing is computed until
/// the next call to [`Intensity::evaluate`].
#[derive(Clone, Debug)]
pub struct Intensity {
    tree: FunctionTree,
}

impl Intensity {
    /// Wrap a tree whose head yields real values.
    ///
    /// A scalar head is broadcast so that the intensity always returns one value per event.
    ///
    /// # Errors
    ///
    /// Returns [`ArborError::StructuralGraphError`] if the tree has no head, if the head is
    /// complex, or if it is a fixed-length batch which cannot follow the bound [`DataSet`].
    pub fn new(mut tree: FunctionTree) -> ArborResult<Self> {
        let head = tree
            .head()
            .ok_or_else(|| ArborError::structural("an intensity needs a tree with a head node"))?;
        let value_type = tree.value_type(head)?;
        if !value_type.is_real() {
            return Err(ArborError::structural(format!(
                "the head of an intensity must be real, but {} is {}",
                head, value_type
            )));
        }
        match value_type.shape {
            Shape::Batch => {}
            Shape::Scalar => {
                let broadcast = tree.broadcast(head)?;
                tree.set_head(broadcast)?;
            }
            Shape::Fixed(n) => {
                return Err(ArborError::structural(format!(
                    "the head of an intensity must follow the bound dataset, but {} is a fixed batch of {} values",
                    head, n
                )))
            }
        }
        Ok(Self { tree })
    }
    /// Lower an [`Expression`] into a new tree and wrap it.
    pub fn from_expression(expression: &Expression) -> ArborResult<Self> {
        Self::new(expression.to_tree()?)
    }

    /// Evaluate the intensity for every event in `dataset`.
    pub fn evaluate(&mut self, dataset: &DataSet) -> ArborResult<Vec<f64>> {
        self.tree.evaluate(dataset)?.clone().into_real_batch(dataset.len())
    }

    /// Assign every parameter value positionally, in declaration order (see
    /// [`ParameterList::update_values`]).
    ///
    /// Prefer [`Intensity::update_parameters`], which matches by name.
    pub fn update_parameters_from(&mut self, values: &[f64]) -> ArborResult<()> {
        self.tree.update_parameter_values(values)
    }
    /// Apply every parameter in `parameters` by name. Nothing changes if any name is unknown.
    pub fn update_parameters(&mut self, parameters: &ParameterList) -> ArborResult<()> {
        self.tree.update_parameters(parameters)
    }
    pub fn update_parameter_value<T: AsRef<str>>(&mut self, name: T, value: f64) -> ArborResult<()> {
        self.tree.update_parameter_value(name, value)
    }
    pub fn fix_parameter<T: AsRef<str>>(&mut self, name: T, value: Option<f64>) -> ArborResult<()> {
        self.tree.fix_parameter(name, value)
    }
    pub fn release_parameter<T: AsRef<str>>(
        &mut self,
        name: T,
        value: Option<f64>,
    ) -> ArborResult<()> {
        self.tree.release_parameter(name, value)
    }
    pub fn update_parameter_range<T: AsRef<str>>(
        &mut self,
        name: T,
        min: Option<f64>,
        max: Option<f64>,
    ) -> ArborResult<()> {
        self.tree.update_parameter_range(name, min, max)
    }
    pub fn parameters(&self) -> &ParameterList {
        self.tree.parameters()
    }
    /// The parameters of `other` which this intensity also declares.
    pub(crate) fn matching_parameters(&self, other: &ParameterList) -> ParameterList {
        other
            .iter()
            .filter(|parameter| self.parameters().get(&parameter.name).is_some())
            .cloned()
            .collect::<ParameterList>()
    }
    pub fn tree(&self) -> &FunctionTree {
        &self.tree
    }
    pub(crate) fn into_tree(self) -> FunctionTree {
        self.tree
    }
    pub(crate) fn head(&self) -> ArborResult<NodeId> {
        self.tree
            .head()
            .ok_or_else(|| ArborError::structural("the intensity has lost its head node"))
    }
    /// A human-readable dump of the underlying tree.
    pub fn print(&self) -> String {
        self.tree.to_string()
    }

    /// Export `dataset` as a table with the intensity of each event appended.
    ///
    /// The names are the dataset columns followed by `intensity` and `weight`, and the columns
    /// are in the same order.
    pub fn evaluate_table(&mut self, dataset: &DataSet) -> ArborResult<(Vec<String>, Vec<Vec<f64>>)> {
        let values = self.evaluate(dataset)?;
        let mut names = dataset.names();
        names.push("intensity".to_string());
        names.push("weight".to_string());
        let mut columns: Vec<Vec<f64>> = dataset.columns().values().cloned().collect();
        columns.push(values);
        columns.push(dataset.weights().to_vec());
        Ok((names, columns))
    }

    /// An intensity normalized to unit integral over the phase space sampled by `phsp`.
    ///
    /// The result is `I / (V / Σw · Σ w I_phsp)` where `V` is the phase-space volume. The
    /// integral is built into the same arena from a copy of the head with every column replaced
    /// by the sample, so it depends only on parameters and is reused across datasets until one
    /// of its parameters changes.
    ///
    /// # Errors
    ///
    /// Returns [`ArborError::ConfigurationError`] if the sample has no (weighted) events, and
    /// [`ArborError::StructuralGraphError`] if it lacks a column the intensity reads.
    pub fn normalized(&self, phsp: &DataSet, phsp_volume: f64) -> ArborResult<Self> {
        let mut tree = self.tree.clone();
        let head = self.head()?;
        let norm = normalization_integral(&mut tree, head, phsp, phsp_volume)?;
        let normalized = tree.div(head, norm)?;
        tree.set_head(normalized)?;
        Self::new(tree)
    }
}

/// Insert the phase-space integral `V / Σw · Σ w f(e)` of the subgraph below `node` over the
/// events of `phsp` and return its id.
pub(crate) fn normalization_integral(
    tree: &mut FunctionTree,
    node: NodeId,
    phsp: &DataSet,
    phsp_volume: f64,
) -> ArborResult<NodeId> {
    let total_weight = phsp.n_events_weighted();
    if phsp.is_empty() || total_weight == 0.0 {
        return Err(ArborError::configuration(
            "cannot normalize an intensity with an empty phase-space sample",
        ));
    }
    let integrand = tree.substitute_data(node, phsp)?;
    let integrand = if phsp.has_weights() {
        let weights = tree.data(phsp.weights().to_vec())?;
        tree.mul(&[weights, integrand])?
    } else {
        integrand
    };
    let integral = tree.reduce(ReduceOp::Sum, integrand)?;
    let scale = tree.constant(phsp_volume / total_weight)?;
    log::debug!(
        "built the normalization of {} over {} phase-space events (volume {})",
        node,
        phsp.len(),
        phsp_volume
    );
    tree.mul(&[integral, scale])
}

/// A named part of a full model, such as a single resonance, used for fit fractions.
#[derive(Clone, Debug)]
pub struct IntensityComponent {
    pub name: String,
    pub intensity: Intensity,
}

impl IntensityComponent {
    pub fn new<T: AsRef<str>>(name: T, intensity: Intensity) -> Self {
        Self {
            name: name.as_ref().to_string(),
            intensity,
        }
    }
    /// The weighted mean of the component over a sample.
    pub(crate) fn integral(&mut self, sample: &DataSet) -> ArborResult<f64> {
        let values = self.intensity.evaluate(sample)?;
        let total_weight = sample.n_events_weighted();
        if total_weight == 0.0 {
            return Err(ArborError::configuration(format!(
                "cannot integrate component \"{}\" over an empty sample",
                self.name
            )));
        }
        Ok(sum_products(&values, sample.weights()) / total_weight)
    }
}

/// Apply the final parameters of a fit to an intensity by name.
///
/// # Errors
///
/// Returns [`ArborError::ParameterNotFound`] if the fit result holds parameters the intensity
/// does not declare. The intensity is unchanged in that case.
pub fn initialize_with_fit_result(intensity: &mut Intensity, result: &FitResult) -> ArborResult<()> {
    intensity.update_parameters(&result.final_parameters)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        expression::{constant, parameter, variable},
        parameters::FitParameter,
    };
    use approx::assert_relative_eq;

    fn dataset() -> DataSet {
        DataSet::from_columns([("x", vec![1.0, 2.0, 3.0])]).unwrap()
    }

    #[test]
    fn test_linear_intensity() {
        let model = parameter("a", 2.0) * variable("x") + parameter("b", 1.0);
        let mut intensity = Intensity::from_expression(&model).unwrap();
        let data = dataset();
        assert_eq!(intensity.evaluate(&data).unwrap(), vec![3.0, 5.0, 7.0]);
        intensity.update_parameter_value("a", 3.0).unwrap();
        assert_eq!(intensity.evaluate(&data).unwrap(), vec![4.0, 7.0, 10.0]);
        intensity.update_parameters_from(&[1.0, 0.0]).unwrap();
        assert_eq!(intensity.evaluate(&data).unwrap(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_scalar_head_is_broadcast() {
        let mut intensity = Intensity::from_expression(&parameter("c", 4.0)).unwrap();
        assert_eq!(intensity.evaluate(&dataset()).unwrap(), vec![4.0; 3]);
    }

    #[test]
    fn test_complex_head_is_rejected() {
        let model = variable("x").polar(&constant(0.3));
        assert!(matches!(
            Intensity::from_expression(&model),
            Err(ArborError::StructuralGraphError { .. })
        ));
        assert!(Intensity::from_expression(&model.norm_sqr()).is_ok());
    }

    #[test]
    fn test_named_update_is_all_or_nothing() {
        let model = parameter("a", 2.0) * variable("x");
        let mut intensity = Intensity::from_expression(&model).unwrap();
        let update: ParameterList = [FitParameter::new("a", 5.0), FitParameter::new("z", 1.0)]
            .into_iter()
            .collect();
        assert!(matches!(
            intensity.update_parameters(&update),
            Err(ArborError::ParameterNotFound { .. })
        ));
        assert_eq!(intensity.parameters().get("a").unwrap().value, 2.0);
        assert!(intensity.update_parameters_from(&[1.0, 2.0]).is_err());
    }

    #[test]
    fn test_evaluate_table_column_order() {
        let mut intensity = Intensity::from_expression(&(variable("x") * 2.0)).unwrap();
        let data = dataset().with_weights(vec![1.0, 0.5, 0.25]).unwrap();
        let (names, columns) = intensity.evaluate_table(&data).unwrap();
        assert_eq!(names, vec!["x", "intensity", "weight"]);
        assert_eq!(columns[1], vec![2.0, 4.0, 6.0]);
        assert_eq!(columns[2], vec![1.0, 0.5, 0.25]);
    }

    #[test]
    fn test_normalized_intensity() {
        let model = parameter("a", 2.0) * variable("x");
        let intensity = Intensity::from_expression(&model).unwrap();
        let phsp = DataSet::from_columns([("x", vec![1.0, 2.0, 3.0, 4.0])]).unwrap();
        let mut normalized = intensity.normalized(&phsp, 2.0).unwrap();
        // integral = V/N Σ a x = 2/4 * 2 * 10 = 10
        let values = normalized.evaluate(&dataset()).unwrap();
        assert_relative_eq!(values[0], 0.2);
        assert_relative_eq!(values[2], 0.6);
        // the normalization cancels the parameter
        normalized.update_parameter_value("a", 7.0).unwrap();
        let values = normalized.evaluate(&dataset()).unwrap();
        assert_relative_eq!(values[1], 0.4);
        let empty = DataSet::from_columns([("x", Vec::new())]).unwrap();
        assert!(matches!(
            intensity.normalized(&empty, 1.0),
            Err(ArborError::ConfigurationError { .. })
        ));
    }

    #[test]
    fn test_normalization_is_not_recomputed_for_new_data() {
        let model = parameter("a", 2.0) * variable("x");
        let intensity = Intensity::from_expression(&model).unwrap();
        let phsp = DataSet::from_columns([("x", vec![1.0, 2.0])]).unwrap();
        let mut normalized = intensity.normalized(&phsp, 1.0).unwrap();
        normalized.evaluate(&dataset()).unwrap();
        normalized.tree.reset_recompute_counters();
        let other = DataSet::from_columns([("x", vec![5.0])]).unwrap();
        normalized.evaluate(&other).unwrap();
        // variable, product, and quotient only
        assert_eq!(normalized.tree().total_recomputes(), 3);
    }

    #[test]
    fn test_component_integral() {
        let mut component =
            IntensityComponent::new("linear", Intensity::from_expression(&variable("x")).unwrap());
        let data = dataset().with_weights(vec![1.0, 1.0, 2.0]).unwrap();
        assert_relative_eq!(component.integral(&data).unwrap(), 9.0 / 4.0);
    }
}
