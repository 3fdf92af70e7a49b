//! Request validation against declared parameters

use serde_json::{Map, Value};

use super::spec::{ElementType, ParameterSpec, ValueKind};
use crate::types::Command;
use crate::{MonitorError, Result};

/// Slack allowed on numeric bounds so `1.0000000000001` passes `max = 1`.
pub const RANGE_TOLERANCE: f64 = 1e-10;

/// Validate `args` against `specs`, in declaration order.
///
/// The first failing parameter aborts with its error. On success the returned
/// [`Arguments`] holds every declared parameter that was supplied or has a
/// default, with enum symbols normalized to their canonical spelling. Fields
/// not declared in `specs` are ignored.
pub fn validate(command: Command, specs: &[ParameterSpec], args: &Map<String, Value>) -> Result<Arguments> {
    let mut values = Map::new();

    for spec in specs {
        match args.get(spec.name) {
            None | Some(Value::Null) => {
                if !spec.optional {
                    return Err(MonitorError::missing_parameter(spec.name, command.as_str()));
                }
                if let Some(default) = &spec.default {
                    values.insert(spec.name.to_string(), default.clone());
                }
            }
            Some(value) => {
                values.insert(spec.name.to_string(), validate_value(spec, value)?);
            }
        }
    }

    Ok(Arguments { command, values })
}

/// Validate a single value against its spec, returning the normalized value.
pub(crate) fn validate_value(spec: &ParameterSpec, value: &Value) -> Result<Value> {
    match spec.kind {
        ValueKind::Scalar => {
            if value.is_array() {
                return Err(MonitorError::type_mismatch(
                    spec.name,
                    format!("a single {}", spec.element.describe()),
                    "a list",
                ));
            }
            validate_element(spec, value)
        }
        ValueKind::List => validate_list(spec, value, false),
        ValueKind::ListOfList => {
            let rows = non_empty_list(spec, value, "a non-empty list of lists")?;
            rows.iter().map(|row| validate_list(spec, row, true)).collect::<Result<Vec<_>>>().map(Value::Array)
        }
    }
}

fn validate_list(spec: &ParameterSpec, value: &Value, nested: bool) -> Result<Value> {
    let expected = if nested { "a non-empty inner list" } else { "a non-empty list" };
    let items = non_empty_list(spec, value, expected)?;
    items
        .iter()
        .map(|item| {
            if item.is_array() {
                return Err(MonitorError::type_mismatch(
                    spec.name,
                    format!("list elements of type {}", spec.element.describe()),
                    "a nested list",
                ));
            }
            validate_element(spec, item)
        })
        .collect::<Result<Vec<_>>>()
        .map(Value::Array)
}

fn non_empty_list<'a>(spec: &ParameterSpec, value: &'a Value, expected: &str) -> Result<&'a Vec<Value>> {
    match value.as_array() {
        Some(items) if !items.is_empty() => Ok(items),
        Some(_) => Err(MonitorError::type_mismatch(spec.name, expected, "an empty list")),
        None => Err(MonitorError::type_mismatch(spec.name, expected, json_kind(value))),
    }
}

fn validate_element(spec: &ParameterSpec, value: &Value) -> Result<Value> {
    match spec.element {
        ElementType::Number => {
            let number = value
                .as_f64()
                .ok_or_else(|| MonitorError::type_mismatch(spec.name, "a number", json_kind(value)))?;
            if number < spec.min - RANGE_TOLERANCE || number > spec.max + RANGE_TOLERANCE {
                return Err(MonitorError::OutOfRange {
                    name: spec.name.to_string(),
                    value: number,
                    min: spec.min,
                    max: spec.max,
                });
            }
            Ok(value.clone())
        }
        ElementType::Integer => {
            let number = value
                .as_f64()
                .filter(|number| number.fract() == 0.0)
                .ok_or_else(|| MonitorError::type_mismatch(spec.name, "an integer", json_kind(value)))?;
            if number < spec.min || number > spec.max {
                return Err(MonitorError::OutOfRange {
                    name: spec.name.to_string(),
                    value: number,
                    min: spec.min,
                    max: spec.max,
                });
            }
            Ok(Value::from(number as i64))
        }
        ElementType::Text => match value {
            Value::String(_) => Ok(value.clone()),
            other => Err(MonitorError::type_mismatch(spec.name, "a string", json_kind(other))),
        },
        ElementType::Enum(kind) => {
            let symbol = value
                .as_str()
                .ok_or_else(|| MonitorError::type_mismatch(spec.name, kind.describe(), json_kind(value)))?;
            let canonical = kind.canonical(symbol).ok_or_else(|| MonitorError::NotInEnum {
                name: spec.name.to_string(),
                value: symbol.to_string(),
                allowed: kind.describe(),
            })?;
            Ok(Value::String(canonical.to_string()))
        }
    }
}

pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

/// Validated arguments of one command, with defaults applied.
#[derive(Debug, Clone, PartialEq)]
pub struct Arguments {
    command: Command,
    values: Map<String, Value>,
}

impl Arguments {
    /// Arguments with no parameters, for commands that declare none.
    pub fn empty(command: Command) -> Self {
        Self { command, values: Map::new() }
    }

    pub fn command(&self) -> Command {
        self.command
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    fn require(&self, name: &str) -> Result<&Value> {
        self.values.get(name).ok_or_else(|| MonitorError::missing_parameter(name, self.command.as_str()))
    }

    /// Scalar number.
    pub fn number(&self, name: &str) -> Result<f64> {
        let value = self.require(name)?;
        value.as_f64().ok_or_else(|| MonitorError::type_mismatch(name, "a number", json_kind(value)))
    }

    /// Scalar integer.
    pub fn integer(&self, name: &str) -> Result<i64> {
        let value = self.require(name)?;
        value.as_i64().ok_or_else(|| MonitorError::type_mismatch(name, "an integer", json_kind(value)))
    }

    /// List of numbers; a scalar is read as a one-element list.
    pub fn numbers(&self, name: &str) -> Result<Vec<f64>> {
        let value = self.require(name)?;
        as_numbers(name, value)
    }

    /// List of lists of numbers.
    pub fn number_lists(&self, name: &str) -> Result<Vec<Vec<f64>>> {
        let value = self.require(name)?;
        let rows = value
            .as_array()
            .ok_or_else(|| MonitorError::type_mismatch(name, "a list of lists", json_kind(value)))?;
        rows.iter().map(|row| as_numbers(name, row)).collect()
    }

    /// Scalar string or enum symbol.
    pub fn text(&self, name: &str) -> Result<&str> {
        let value = self.require(name)?;
        value.as_str().ok_or_else(|| MonitorError::type_mismatch(name, "a string", json_kind(value)))
    }

    /// Canonical enum symbol.
    pub fn symbol(&self, name: &str) -> Result<&str> {
        self.text(name)
    }

    /// List of enum symbols or strings; a scalar is read as a one-element list.
    pub fn symbols(&self, name: &str) -> Result<Vec<&str>> {
        let value = self.require(name)?;
        match value {
            Value::Array(items) => items
                .iter()
                .map(|item| {
                    item.as_str()
                        .ok_or_else(|| MonitorError::type_mismatch(name, "a string", json_kind(item)))
                })
                .collect(),
            Value::String(text) => Ok(vec![text.as_str()]),
            other => Err(MonitorError::type_mismatch(name, "a list of strings", json_kind(other))),
        }
    }

    /// Arguments as a Json object.
    pub fn to_json(&self) -> Value {
        Value::Object(self.values.clone())
    }
}

fn as_numbers(name: &str, value: &Value) -> Result<Vec<f64>> {
    match value {
        Value::Array(items) => items
            .iter()
            .map(|item| item.as_f64().ok_or_else(|| MonitorError::type_mismatch(name, "a number", json_kind(item))))
            .collect(),
        other => other
            .as_f64()
            .map(|number| vec![number])
            .ok_or_else(|| MonitorError::type_mismatch(name, "a list of numbers", json_kind(other))),
    }
}
