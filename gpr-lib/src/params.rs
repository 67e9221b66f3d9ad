//! Named real-valued hyperparameters handed to a [Kernel](crate::Kernel).

use std::collections::BTreeMap;

use crate::errors::{RegressionError, Result};

/// Bag of named hyperparameters, e.g. length scale and signal variance.
///
/// The engine only reads it: the set is supplied per regression call and never stored.
///
/// ```
/// use gpr_lib::ParameterSet;
///
/// let params = ParameterSet::new()
///     .with("length_scale", 1.)
///     .with("signal_variance", 2.);
/// assert_eq!(params.get("signal_variance"), Some(2.));
/// assert_eq!(params.get("period"), None);
/// ```
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParameterSet {
    values: BTreeMap<String, f64>,
}

impl ParameterSet {
    #[must_use]
    pub fn new() -> Self {
        ParameterSet::default()
    }

    /// Builder form of [`ParameterSet::set`]
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: f64) -> Self {
        self.set(name, value);
        self
    }

    /// Insert or overwrite a parameter
    pub fn set(&mut self, name: impl Into<String>, value: f64) {
        self.values.insert(name.into(), value);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    /// Fetch a parameter which must be present and finite
    ///
    /// # Errors
    ///
    /// [`RegressionError::MissingParameter`] if absent,
    /// [`RegressionError::InvalidParameter`] if NaN or infinite
    pub fn require(&self, name: &str) -> Result<f64> {
        match self.get(name) {
            None => Err(RegressionError::MissingParameter(name.to_string())),
            Some(value) if !value.is_finite() => Err(RegressionError::InvalidParameter {
                name: name.to_string(),
                value,
            }),
            Some(value) => Ok(value),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Parameters in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(name, value)| (name.as_str(), *value))
    }
}

impl<S: Into<String>> FromIterator<(S, f64)> for ParameterSet {
    fn from_iter<I: IntoIterator<Item = (S, f64)>>(iter: I) -> Self {
        ParameterSet {
            values: iter
                .into_iter()
                .map(|(name, value)| (name.into(), value))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overwrite_keeps_last_value() {
        let mut params = ParameterSet::new().with("length_scale", 1.);
        params.set("length_scale", 3.);
        assert_eq!(params.len(), 1);
        assert_eq!(params.get("length_scale"), Some(3.));
    }

    #[test]
    fn require_reports_missing_and_non_finite() {
        let params: ParameterSet = [("length_scale", f64::NAN), ("signal_variance", 1.)]
            .into_iter()
            .collect();

        assert_eq!(params.require("signal_variance"), Ok(1.));
        assert_eq!(
            params.require("period"),
            Err(RegressionError::MissingParameter("period".to_string()))
        );
        assert!(matches!(
            params.require("length_scale"),
            Err(RegressionError::InvalidParameter { ref name, .. }) if name == "length_scale"
        ));
    }

    #[test]
    fn iterates_in_name_order() {
        let params = ParameterSet::new().with("b", 2.).with("a", 1.);
        let names: Vec<&str> = params.iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert!(!params.is_empty());
    }
}
