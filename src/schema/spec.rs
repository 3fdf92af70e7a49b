//! Declarative parameter and return metadata

use std::collections::HashMap;

use serde_json::{Map, Value, json};

use super::enums::EnumKind;
use super::validate::{Arguments, validate, validate_value};
use crate::types::Command;
use crate::{MonitorError, Result};

/// Shape of a parameter value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// A single element
    Scalar,
    /// A non-empty list of elements
    List,
    /// A non-empty list of non-empty lists of elements
    ListOfList,
}

/// Type of each element of a parameter value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementType {
    Number,
    /// Whole number, `8080.0` is accepted and `8080.5` is not
    Integer,
    Text,
    Enum(EnumKind),
}

impl ElementType {
    pub fn describe(self) -> String {
        match self {
            ElementType::Number => "number".to_string(),
            ElementType::Integer => "integer".to_string(),
            ElementType::Text => "string".to_string(),
            ElementType::Enum(kind) => kind.describe(),
        }
    }
}

/// Declared parameter of one driver command.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub kind: ValueKind,
    pub element: ElementType,
    /// Inclusive lower bound for numbers
    pub min: f64,
    /// Inclusive upper bound for numbers
    pub max: f64,
    pub optional: bool,
    /// Value used when an optional parameter is absent
    pub default: Option<Value>,
}

impl ParameterSpec {
    fn new(name: &'static str, element: ElementType) -> Self {
        Self {
            name,
            description: "",
            kind: ValueKind::Scalar,
            element,
            min: f64::MIN,
            max: f64::MAX,
            optional: false,
            default: None,
        }
    }

    /// Required scalar number in `[min, max]`.
    pub fn number(name: &'static str, min: f64, max: f64) -> Self {
        Self { min, max, ..Self::new(name, ElementType::Number) }
    }

    /// Required scalar integer in `[min, max]`.
    pub fn integer(name: &'static str, min: i64, max: i64) -> Self {
        Self { min: min as f64, max: max as f64, ..Self::new(name, ElementType::Integer) }
    }

    /// Required scalar string.
    pub fn text(name: &'static str) -> Self {
        Self::new(name, ElementType::Text)
    }

    /// Required scalar symbol from `kind`.
    pub fn symbol(name: &'static str, kind: EnumKind) -> Self {
        Self::new(name, ElementType::Enum(kind))
    }

    /// Expect a list of elements instead of a scalar.
    pub fn list(mut self) -> Self {
        self.kind = ValueKind::List;
        self
    }

    /// Expect a list of lists of elements.
    pub fn list_of_list(mut self) -> Self {
        self.kind = ValueKind::ListOfList;
        self
    }

    /// Optional without a default.
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Optional, using `default` when absent.
    pub fn or_default(mut self, default: Value) -> Self {
        self.optional = true;
        self.default = Some(default);
        self
    }

    pub fn describe(mut self, description: &'static str) -> Self {
        self.description = description;
        self
    }

    /// Check the spec's own invariants: `min <= max` and a conforming default.
    pub fn check(&self) -> Result<()> {
        if self.min > self.max || self.min.is_nan() || self.max.is_nan() {
            return Err(MonitorError::config(format!(
                "parameter '{}' has min {} above max {}",
                self.name, self.min, self.max
            )));
        }
        if let Some(default) = &self.default {
            validate_value(self, default).map_err(|e| {
                MonitorError::config(format!("default of parameter '{}' is invalid: {}", self.name, e))
            })?;
        }
        Ok(())
    }

    /// Metadata as reported by QUERY.
    pub fn to_json(&self) -> Value {
        let mut entry = Map::new();
        entry.insert("name".into(), json!(self.name));
        entry.insert("description".into(), json!(self.description));
        entry.insert(
            "kind".into(),
            json!(match self.kind {
                ValueKind::Scalar => "scalar",
                ValueKind::List => "list",
                ValueKind::ListOfList => "list-of-list",
            }),
        );
        entry.insert("type".into(), json!(self.element.describe()));
        if matches!(self.element, ElementType::Number | ElementType::Integer) {
            entry.insert("min".into(), json!(self.min));
            entry.insert("max".into(), json!(self.max));
        }
        entry.insert("optional".into(), json!(self.optional));
        if let Some(default) = &self.default {
            entry.insert("default".into(), default.clone());
        }
        Value::Object(entry)
    }
}

/// Declared field of a command's response.
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnSpec {
    pub name: &'static str,
    pub description: &'static str,
}

impl ReturnSpec {
    pub fn new(name: &'static str, description: &'static str) -> Self {
        Self { name, description }
    }
}

/// Parameters and returns of one command.
#[derive(Debug, Clone, Default)]
pub struct CommandSchema {
    pub parameters: Vec<ParameterSpec>,
    pub returns: Vec<ReturnSpec>,
}

/// Registration table of a driver: each command with its declared metadata.
///
/// Tables are built once, checked on build, and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct CommandTable {
    machine: &'static str,
    commands: HashMap<Command, CommandSchema>,
}

impl CommandTable {
    pub fn builder(machine: &'static str) -> CommandTableBuilder {
        CommandTableBuilder { machine, commands: HashMap::new() }
    }

    /// Name of the machine this table belongs to.
    pub fn machine(&self) -> &'static str {
        self.machine
    }

    /// Declared parameters of `command`; empty when it takes none.
    pub fn parameters(&self, command: Command) -> &[ParameterSpec] {
        self.commands.get(&command).map(|schema| schema.parameters.as_slice()).unwrap_or(&[])
    }

    /// Declared returns of `command`.
    pub fn returns(&self, command: Command) -> &[ReturnSpec] {
        self.commands.get(&command).map(|schema| schema.returns.as_slice()).unwrap_or(&[])
    }

    /// Validate a request's fields against `command`'s parameters.
    pub fn validate(&self, command: Command, args: &Map<String, Value>) -> Result<Arguments> {
        validate(command, self.parameters(command), args)
    }

    /// Full metadata, as reported by QUERY.
    pub fn to_json(&self) -> Value {
        let mut commands = Map::new();
        for command in Command::ALL {
            let Some(schema) = self.commands.get(&command) else { continue };
            let parameters: Vec<Value> = schema.parameters.iter().map(ParameterSpec::to_json).collect();
            let returns: Vec<Value> = schema
                .returns
                .iter()
                .map(|r| json!({"name": r.name, "description": r.description}))
                .collect();
            commands.insert(
                command.as_str().to_lowercase(),
                json!({"parameters": parameters, "returns": returns}),
            );
        }
        json!({"machine": self.machine, "commands": commands})
    }
}

/// Builder for [`CommandTable`].
pub struct CommandTableBuilder {
    machine: &'static str,
    commands: HashMap<Command, CommandSchema>,
}

impl CommandTableBuilder {
    /// Register `command` with its parameters and returns.
    pub fn command(
        mut self,
        command: Command,
        parameters: Vec<ParameterSpec>,
        returns: Vec<ReturnSpec>,
    ) -> Self {
        self.commands.insert(command, CommandSchema { parameters, returns });
        self
    }

    /// Check every spec and freeze the table.
    pub fn build(self) -> Result<CommandTable> {
        for (command, schema) in &self.commands {
            for (i, spec) in schema.parameters.iter().enumerate() {
                spec.check()?;
                if schema.parameters[..i].iter().any(|other| other.name == spec.name) {
                    return Err(MonitorError::config(format!(
                        "{} {} declares parameter '{}' twice",
                        self.machine, command, spec.name
                    )));
                }
            }
        }
        Ok(CommandTable { machine: self.machine, commands: self.commands })
    }
}
