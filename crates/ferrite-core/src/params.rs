//! Named parameter bundles with given/default tracking.
//!
//! A parameter remembers whether the user set it explicitly; a default
//! applied by a model must not look user-given, because downstream code
//! decides differently in the two cases (a resistor with a given R skips
//! the geometry computation entirely).

use indexmap::IndexMap;

use crate::error::{Error, Result};

/// How a parameter obtained its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamState {
    /// Never written.
    Unset,
    /// Holds a model/device default.
    Defaulted,
    /// Explicitly set by the user.
    Given,
}

/// A tagged scalar value.
#[derive(Debug, Clone, Copy)]
pub struct Parameter {
    value: f64,
    state: ParamState,
}

impl Parameter {
    /// An unset parameter (value reads as 0).
    pub fn unset() -> Self {
        Self {
            value: 0.0,
            state: ParamState::Unset,
        }
    }

    /// A user-given parameter.
    pub fn given(value: f64) -> Self {
        Self {
            value,
            state: ParamState::Given,
        }
    }

    /// A defaulted parameter.
    pub fn defaulted(value: f64) -> Self {
        Self {
            value,
            state: ParamState::Defaulted,
        }
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn state(&self) -> ParamState {
        self.state
    }

    /// True only for explicit user assignments.
    pub fn is_given(&self) -> bool {
        self.state == ParamState::Given
    }

    /// Write a value and mark it given.
    pub fn set(&mut self, value: f64) {
        self.value = value;
        self.state = ParamState::Given;
    }

    /// Apply a default unless something was already written.
    pub fn default_to(&mut self, value: f64) {
        if self.state == ParamState::Unset {
            self.value = value;
            self.state = ParamState::Defaulted;
        }
    }
}

/// Writes one named parameter of a bundle and marks it given.
///
/// Created once (e.g. by a sweep driver resolving the swept name), then
/// applied repeatedly without further lookups by name validation.
#[derive(Debug, Clone)]
pub struct ParamSetter {
    name: String,
}

impl ParamSetter {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn apply(&self, bundle: &mut ParamBundle, value: f64) {
        bundle
            .params
            .entry(self.name.clone())
            .or_insert_with(Parameter::unset)
            .set(value);
    }
}

/// An insertion-ordered set of named parameters with one optional
/// principal parameter (the one a bare positional value addresses).
#[derive(Debug, Clone, Default)]
pub struct ParamBundle {
    params: IndexMap<String, Parameter>,
    principal: Option<String>,
}

impl ParamBundle {
    pub fn new() -> Self {
        <Self as Default>::default()
    }

    /// Declare the principal parameter name.
    pub fn with_principal(mut self, name: &str) -> Self {
        self.principal = Some(name.to_ascii_lowercase());
        self
    }

    /// Set a named parameter, marking it given.
    pub fn set(&mut self, name: &str, value: f64) {
        self.params
            .entry(name.to_ascii_lowercase())
            .or_insert_with(Parameter::unset)
            .set(value);
    }

    /// Set the principal parameter from a bare positional value.
    pub fn set_principal(&mut self, value: f64) {
        if let Some(name) = self.principal.clone() {
            self.set(&name, value);
        }
    }

    /// Apply a default without claiming the value is given.
    pub fn default(&mut self, name: &str, value: f64) {
        self.params
            .entry(name.to_ascii_lowercase())
            .or_insert_with(Parameter::unset)
            .default_to(value);
    }

    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.params.get(&name.to_ascii_lowercase())
    }

    /// Value of a parameter, or `fallback` when absent or unset.
    pub fn value_or(&self, name: &str, fallback: f64) -> f64 {
        match self.get(name) {
            Some(p) if p.state() != ParamState::Unset => p.value(),
            _ => fallback,
        }
    }

    /// True when the user set the parameter explicitly.
    pub fn is_given(&self, name: &str) -> bool {
        self.get(name).map(|p| p.is_given()).unwrap_or(false)
    }

    /// The principal parameter, if declared and present.
    pub fn principal(&self) -> Option<&Parameter> {
        self.principal.as_deref().and_then(|n| self.params.get(n))
    }

    /// Create a setter for one named parameter.
    pub fn setter(&self, name: &str) -> ParamSetter {
        ParamSetter {
            name: name.to_ascii_lowercase(),
        }
    }

    /// Iterate name/parameter pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Parameter)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Reject parameters outside the device's known set.
    ///
    /// Unrecognised names must be reported, never silently accepted.
    pub fn check_known(&self, entity: &str, known: &[&str]) -> Result<()> {
        for (name, _) in self.params.iter() {
            if !known.contains(&name.as_str()) {
                return Err(Error::UnknownParameter {
                    entity: entity.to_string(),
                    name: name.clone(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_not_given() {
        let mut b = ParamBundle::new();
        b.default("is", 1e-14);
        assert_eq!(b.value_or("is", 0.0), 1e-14);
        assert!(!b.is_given("is"));

        b.set("is", 2e-14);
        assert!(b.is_given("is"));
        // A later default never overwrites.
        b.default("is", 1e-14);
        assert_eq!(b.value_or("is", 0.0), 2e-14);
    }

    #[test]
    fn test_tri_state() {
        let mut p = Parameter::unset();
        assert_eq!(p.state(), ParamState::Unset);
        p.default_to(5.0);
        assert_eq!(p.state(), ParamState::Defaulted);
        p.set(7.0);
        assert_eq!(p.state(), ParamState::Given);
        // Defaulting a given parameter is a no-op.
        p.default_to(1.0);
        assert_eq!(p.value(), 7.0);
    }

    #[test]
    fn test_principal() {
        let mut b = ParamBundle::new().with_principal("r");
        b.set_principal(1000.0);
        assert!(b.principal().unwrap().is_given());
        assert_eq!(b.value_or("r", 0.0), 1000.0);
    }

    #[test]
    fn test_setter_marks_given() {
        let mut b = ParamBundle::new();
        let setter = b.setter("dc");
        setter.apply(&mut b, 5.0);
        assert!(b.is_given("dc"));
        assert_eq!(b.value_or("dc", 0.0), 5.0);
    }

    #[test]
    fn test_unknown_parameter_reported() {
        let mut b = ParamBundle::new();
        b.set("r", 1.0);
        b.set("frob", 2.0);
        let err = b.check_known("R1", &["r", "w", "l"]).unwrap_err();
        assert!(err.to_string().contains("frob"), "got: {err}");
    }

    #[test]
    fn test_names_case_insensitive() {
        let mut b = ParamBundle::new();
        b.set("IS", 1.0);
        assert!(b.is_given("is"));
    }
}
