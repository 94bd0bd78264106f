//! Command parameters.

use serde_json::Value as JsonValue;

use crate::value::{HostValue, SqlValue, encode, ensure_sendable};
use crate::{Error, Result};

/// One parameter: an optional name and a host value.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    name: Option<String>,
    value: HostValue,
}

impl Parameter {
    /// A parameter bound by list position.
    #[must_use]
    pub fn positional(value: impl Into<HostValue>) -> Self {
        Self {
            name: None,
            value: value.into(),
        }
    }

    /// A parameter bound by name (`@name`, `:name`, `$name`, or bare `name`).
    #[must_use]
    pub fn named(name: impl Into<String>, value: impl Into<HostValue>) -> Self {
        Self {
            name: Some(name.into()),
            value: value.into(),
        }
    }

    /// Parameter name, if any.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Host value.
    #[must_use]
    pub const fn value(&self) -> &HostValue {
        &self.value
    }

    /// Replaces the value.
    pub fn set_value(&mut self, value: impl Into<HostValue>) {
        self.value = value.into();
    }

    /// Name used in errors: the name, or `#ordinal` (1-based).
    #[must_use]
    pub fn label(&self, ordinal: usize) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("#{ordinal}"))
    }

    /// Encodes the value, labelling any binding error with this parameter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Binding`] when the value has no storage class.
    pub fn to_sql_value(&self, ordinal: usize) -> Result<SqlValue> {
        encode(&self.value).map_err(|err| match err {
            Error::Binding { cause, .. } => Error::binding(self.label(ordinal), cause),
            other => other,
        })
    }
}

/// Ordered parameters of a command.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterList {
    items: Vec<Parameter>,
}

impl ParameterList {
    /// Creates an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a parameter.
    pub fn push(&mut self, parameter: Parameter) {
        self.items.push(parameter);
    }

    /// Appends a positional value.
    pub fn add(&mut self, value: impl Into<HostValue>) {
        self.push(Parameter::positional(value));
    }

    /// Appends a named value.
    pub fn add_named(&mut self, name: impl Into<String>, value: impl Into<HostValue>) {
        self.push(Parameter::named(name, value));
    }

    /// Appends a value given as JSON.
    ///
    /// Scalars map to the obvious host value: integers that fit `i64` to `Int`, larger
    /// ones to `UInt`, other numbers to `Float`. Arrays and objects have no storage class
    /// and are rejected rather than stringified.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Binding`] for arrays and objects.
    pub fn add_json(&mut self, name: Option<&str>, value: &JsonValue) -> Result<()> {
        let ordinal = self.items.len() + 1;
        let host = match value {
            JsonValue::Null => HostValue::Null,
            JsonValue::Bool(b) => HostValue::Bool(*b),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    HostValue::Int(i)
                } else if let Some(u) = n.as_u64() {
                    HostValue::UInt(u)
                } else {
                    HostValue::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            },
            JsonValue::String(s) => HostValue::Text(s.clone()),
            JsonValue::Array(_) | JsonValue::Object(_) => {
                let label = name.map_or_else(|| format!("#{ordinal}"), str::to_string);
                return Err(Error::binding(
                    label,
                    "JSON arrays and objects have no SQL storage class",
                ));
            },
        };
        self.push(Parameter {
            name: name.map(str::to_string),
            value: host,
        });
        Ok(())
    }

    /// Number of parameters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true when there are no parameters.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Removes every parameter.
    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Parameter at a 0-based position.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Parameter> {
        self.items.get(index)
    }

    /// Parameter with the given name, compared case-insensitively.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<&Parameter> {
        self.items
            .iter()
            .find(|p| p.name().is_some_and(|n| n.eq_ignore_ascii_case(name)))
    }

    /// Iterates in list order.
    pub fn iter(&self) -> std::slice::Iter<'_, Parameter> {
        self.items.iter()
    }

    /// Encodes every value in list order.
    ///
    /// # Errors
    ///
    /// Returns the first [`Error::Binding`] encountered.
    pub fn to_sql_values(&self) -> Result<Vec<SqlValue>> {
        self.items
            .iter()
            .enumerate()
            .map(|(i, p)| p.to_sql_value(i + 1))
            .collect()
    }

    /// Encodes every value for the pipeline endpoint, which also refuses non-finite
    /// floats.
    ///
    /// # Errors
    ///
    /// Returns the first [`Error::Binding`] encountered, labelled with the parameter.
    pub fn to_wire_values(&self) -> Result<Vec<SqlValue>> {
        self.items
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let value = p.to_sql_value(i + 1)?;
                ensure_sendable(&value, &p.label(i + 1))?;
                Ok(value)
            })
            .collect()
    }
}

impl<'a> IntoIterator for &'a ParameterList {
    type Item = &'a Parameter;
    type IntoIter = std::slice::Iter<'a, Parameter>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl FromIterator<Parameter> for ParameterList {
    fn from_iter<I: IntoIterator<Item = Parameter>>(iter: I) -> Self {
        Self {
            items: iter.into_iter().collect(),
        }
    }
}

impl Extend<Parameter> for ParameterList {
    fn extend<I: IntoIterator<Item = Parameter>>(&mut self, iter: I) {
        self.items.extend(iter);
    }
}
