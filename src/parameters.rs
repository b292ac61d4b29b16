use std::fmt::Display;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{ArborError, ArborResult};

/// A named, mutable scalar which can be varied by an optimizer.
///
/// Bounds are optional on each side. Values assigned outside of the bounds are clamped onto the
/// nearest edge.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FitParameter {
    pub name: String,
    pub value: f64,
    pub error: f64,
    pub is_fixed: bool,
    pub bounds: (Option<f64>, Option<f64>),
}

impl FitParameter {
    /// Create a free, unbounded parameter with zero error.
    pub fn new<T: AsRef<str>>(name: T, value: f64) -> Self {
        Self {
            name: name.as_ref().to_string(),
            value,
            error: 0.0,
            is_fixed: false,
            bounds: (None, None),
        }
    }
    /// Create a fixed parameter.
    pub fn fixed<T: AsRef<str>>(name: T, value: f64) -> Self {
        Self {
            is_fixed: true,
            ..Self::new(name, value)
        }
    }
    pub fn with_error(mut self, error: f64) -> Self {
        self.error = error;
        self
    }
    pub fn with_bounds(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.bounds = (min, max);
        self.value = self.clamp(self.value);
        self
    }
    pub fn has_bounds(&self) -> bool {
        self.bounds.0.is_some() || self.bounds.1.is_some()
    }
    /// Returns `true` if the given value lies within the parameter's bounds.
    pub fn is_within_bounds(&self, value: f64) -> bool {
        self.bounds.0.map_or(true, |min| value >= min)
            && self.bounds.1.map_or(true, |max| value <= max)
    }
    fn clamp(&self, value: f64) -> f64 {
        let value = self.bounds.0.map_or(value, |min| value.max(min));
        self.bounds.1.map_or(value, |max| value.min(max))
    }
    fn set_value(&mut self, value: f64) {
        if !self.is_within_bounds(value) {
            log::warn!(
                "value {} for parameter \"{}\" is outside of its bounds {:?}, clamping",
                value,
                self.name,
                self.bounds
            );
        }
        self.value = self.clamp(value);
    }
}

impl Display for FitParameter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} = {} ± {}", self.name, self.value, self.error)?;
        match self.bounds {
            (None, None) => {}
            (min, max) => write!(
                f,
                " [{}, {}]",
                min.map_or("-inf".to_string(), |v| v.to_string()),
                max.map_or("+inf".to_string(), |v| v.to_string())
            )?,
        }
        if self.is_fixed {
            write!(f, " (fixed)")?;
        }
        Ok(())
    }
}

fn check_range(name: &str, bounds: (Option<f64>, Option<f64>)) -> ArborResult<()> {
    if let (Some(min), Some(max)) = bounds {
        if min > max {
            return Err(ArborError::Custom(format!(
                "invalid range [{min}, {max}] for parameter \"{name}\""
            )));
        }
    }
    Ok(())
}

/// An ordered registry of [`FitParameter`]s keyed by name.
///
/// The declaration order is preserved and defines the positional order used by
/// [`ParameterList::update_values`]. Every mutator returns the index of the parameters it touched
/// so the owning [`FunctionTree`](crate::tree::FunctionTree) can invalidate dependent nodes.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterList {
    parameters: IndexMap<String, FitParameter>,
}

impl ParameterList {
    /// Get the index of the parameter with the given name, registering `parameter` if no parameter
    /// by that name exists yet. An existing parameter is left untouched.
    pub fn create_or_get(&mut self, parameter: FitParameter) -> usize {
        match self.parameters.get_index_of(&parameter.name) {
            Some(index) => index,
            None => {
                let (index, _) = self
                    .parameters
                    .insert_full(parameter.name.clone(), parameter);
                index
            }
        }
    }
    pub fn get<T: AsRef<str>>(&self, name: T) -> Option<&FitParameter> {
        self.parameters.get(name.as_ref())
    }
    pub fn get_index(&self, index: usize) -> Option<&FitParameter> {
        self.parameters.get_index(index).map(|(_, p)| p)
    }
    pub fn index_of<T: AsRef<str>>(&self, name: T) -> Option<usize> {
        self.parameters.get_index_of(name.as_ref())
    }
    fn locate<T: AsRef<str>>(&mut self, name: T) -> ArborResult<(usize, &mut FitParameter)> {
        self.parameters
            .get_full_mut(name.as_ref())
            .map(|(index, _, parameter)| (index, parameter))
            .ok_or_else(|| ArborError::ParameterNotFound {
                names: vec![name.as_ref().to_string()],
            })
    }
    /// Set the value of a parameter by name.
    pub fn update_value<T: AsRef<str>>(&mut self, name: T, value: f64) -> ArborResult<usize> {
        let (index, parameter) = self.locate(name)?;
        parameter.set_value(value);
        Ok(index)
    }
    /// Fix a parameter by name, optionally assigning it a new value first.
    pub fn fix<T: AsRef<str>>(&mut self, name: T, value: Option<f64>) -> ArborResult<usize> {
        let (index, parameter) = self.locate(name)?;
        if let Some(value) = value {
            parameter.set_value(value);
        }
        parameter.is_fixed = true;
        Ok(index)
    }
    /// Release a parameter by name, optionally assigning it a new value first.
    pub fn release<T: AsRef<str>>(&mut self, name: T, value: Option<f64>) -> ArborResult<usize> {
        let (index, parameter) = self.locate(name)?;
        if let Some(value) = value {
            parameter.set_value(value);
        }
        parameter.is_fixed = false;
        Ok(index)
    }
    /// Replace the bounds of a parameter by name. The current value is clamped into the new range.
    pub fn update_range<T: AsRef<str>>(
        &mut self,
        name: T,
        min: Option<f64>,
        max: Option<f64>,
    ) -> ArborResult<usize> {
        check_range(name.as_ref(), (min, max))?;
        let (index, parameter) = self.locate(name)?;
        parameter.bounds = (min, max);
        let value = parameter.value;
        parameter.set_value(value);
        Ok(index)
    }
    /// Copy value, error, fixed flag and bounds from every parameter in `other` onto the parameter
    /// with the same name in this list.
    ///
    /// The update is all-or-nothing: if any name in `other` is not registered here, nothing is
    /// changed and every unmatched name is reported. The same holds for an inverted range.
    pub fn update_from(&mut self, other: &ParameterList) -> ArborResult<Vec<usize>> {
        for source in other.iter() {
            check_range(&source.name, source.bounds)?;
        }
        let missing: Vec<String> = other
            .parameters
            .keys()
            .filter(|name| !self.parameters.contains_key(*name))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(ArborError::ParameterNotFound { names: missing });
        }
        let mut touched = Vec::with_capacity(other.len());
        for source in other.iter() {
            let (index, parameter) = self.locate(&source.name)?;
            parameter.error = source.error;
            parameter.is_fixed = source.is_fixed;
            parameter.bounds = source.bounds;
            parameter.set_value(source.value);
            touched.push(index);
        }
        Ok(touched)
    }
    /// Assign values positionally, in declaration order. The number of values must match the
    /// number of registered parameters exactly.
    pub fn update_values(&mut self, values: &[f64]) -> ArborResult<()> {
        if values.len() != self.len() {
            return Err(ArborError::structural(format!(
                "expected {} parameter values but received {}",
                self.len(),
                values.len()
            )));
        }
        for (parameter, value) in self.parameters.values_mut().zip(values) {
            parameter.set_value(*value);
        }
        Ok(())
    }
    pub fn values(&self) -> Vec<f64> {
        self.parameters.values().map(|p| p.value).collect()
    }
    pub fn names(&self) -> Vec<String> {
        self.parameters.keys().cloned().collect()
    }
    /// The parameters which are not fixed, in declaration order.
    pub fn free_parameters(&self) -> Vec<&FitParameter> {
        self.parameters.values().filter(|p| !p.is_fixed).collect()
    }
    pub fn iter(&self) -> impl Iterator<Item = &FitParameter> {
        self.parameters.values()
    }
    pub fn len(&self) -> usize {
        self.parameters.len()
    }
    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }
}

impl FromIterator<FitParameter> for ParameterList {
    fn from_iter<I: IntoIterator<Item = FitParameter>>(iter: I) -> Self {
        let mut list = ParameterList::default();
        for parameter in iter {
            list.create_or_get(parameter);
        }
        list
    }
}

impl Display for ParameterList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for parameter in self.iter() {
            writeln!(f, "{}", parameter)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list() -> ParameterList {
        [
            FitParameter::new("a", 1.0),
            FitParameter::new("b", 2.0).with_bounds(Some(0.0), Some(5.0)),
            FitParameter::fixed("c", 3.0),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_create_or_get_shares_identity() {
        let mut parameters = list();
        let index = parameters.create_or_get(FitParameter::new("b", 100.0));
        assert_eq!(index, 1);
        assert_eq!(parameters.len(), 3);
        assert_eq!(parameters.get("b").map(|p| p.value), Some(2.0));
    }

    #[test]
    fn test_unknown_names_are_errors() {
        let mut parameters = list();
        assert!(matches!(
            parameters.update_value("d", 1.0),
            Err(ArborError::ParameterNotFound { .. })
        ));
        assert!(parameters.fix("d", None).is_err());
        assert!(parameters.release("d", Some(1.0)).is_err());
        assert!(parameters.update_range("d", None, None).is_err());
    }

    #[test]
    fn test_fix_and_release() {
        let mut parameters = list();
        parameters.fix("a", Some(4.0)).unwrap();
        assert!(parameters.get("a").unwrap().is_fixed);
        assert_eq!(parameters.get("a").unwrap().value, 4.0);
        parameters.release("c", None).unwrap();
        assert!(!parameters.get("c").unwrap().is_fixed);
        assert_eq!(parameters.get("c").unwrap().value, 3.0);
        assert_eq!(parameters.free_parameters().len(), 2);
    }

    #[test]
    fn test_values_are_clamped_into_bounds() {
        let mut parameters = list();
        parameters.update_value("b", 10.0).unwrap();
        assert_eq!(parameters.get("b").unwrap().value, 5.0);
        parameters.update_range("b", Some(0.0), Some(1.0)).unwrap();
        assert_eq!(parameters.get("b").unwrap().value, 1.0);
        assert!(parameters.update_range("b", Some(2.0), Some(1.0)).is_err());
    }

    #[test]
    fn test_bulk_update_is_all_or_nothing() {
        let mut parameters = list();
        let update: ParameterList = [
            FitParameter::new("a", 10.0),
            FitParameter::new("x", 1.0),
            FitParameter::new("y", 1.0),
        ]
        .into_iter()
        .collect();
        match parameters.update_from(&update) {
            Err(ArborError::ParameterNotFound { names }) => {
                assert_eq!(names, vec!["x".to_string(), "y".to_string()])
            }
            _ => panic!("expected ParameterNotFound"),
        }
        assert_eq!(parameters.get("a").unwrap().value, 1.0);

        let update: ParameterList = [FitParameter::new("a", 10.0).with_error(0.5)]
            .into_iter()
            .collect();
        assert_eq!(parameters.update_from(&update).unwrap(), vec![0]);
        assert_eq!(parameters.get("a").unwrap().value, 10.0);
        assert_eq!(parameters.get("a").unwrap().error, 0.5);
    }

    #[test]
    fn test_bulk_update_rejects_inverted_ranges() {
        let mut parameters = list();
        let mut inverted = FitParameter::new("b", 1.0);
        inverted.bounds = (Some(3.0), Some(2.0));
        let update: ParameterList = [FitParameter::new("a", 10.0), inverted]
            .into_iter()
            .collect();
        assert!(matches!(
            parameters.update_from(&update),
            Err(ArborError::Custom(_))
        ));
        assert_eq!(parameters.get("a").unwrap().value, 1.0);
        assert_eq!(parameters.get("b").unwrap().bounds, (Some(0.0), Some(5.0)));
    }

    #[test]
    fn test_positional_update_checks_length() {
        let mut parameters = list();
        assert!(parameters.update_values(&[1.0, 2.0]).is_err());
        parameters.update_values(&[7.0, 3.0, 9.0]).unwrap();
        assert_eq!(parameters.values(), vec![7.0, 3.0, 9.0]);
    }

    #[test]
    fn test_display() {
        let parameters = list();
        assert_eq!(
            parameters.to_string(),
            "a = 1 ± 0\nb = 2 ± 0 [0, 5]\nc = 3 ± 0 (fixed)\n"
        );
    }
}
