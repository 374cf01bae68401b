//! The interpreter's single variable namespace.

use crate::errors::ExprError;
use crate::expression::{self, Scope, ScopeMut};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::debug;

pub const FIN: &str = "fin";
pub const FOUT: &str = "fout";
pub const LAST_SCREEN: &str = "last_screen";
pub const CMP_RESULT: &str = "cmp_result";
pub const IN_EXCEPTION: &str = "in_exception";
pub const NET_CONNECTED: &str = "net_connected";
pub const SCROLL_RESOLUTION: &str = "scroll_resolution";
pub const MISSION_FAILED: &str = "mission_failed";

/// Globals reserved by the interpreter. They are never part of a snapshot.
pub const RESERVED: &[&str] = &[
    FIN,
    FOUT,
    LAST_SCREEN,
    CMP_RESULT,
    IN_EXCEPTION,
    NET_CONNECTED,
    SCROLL_RESOLUTION,
    MISSION_FAILED,
];

/// Values of the user-declared names at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    values: Vec<(String, Value)>,
}

impl Snapshot {
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.iter().map(|(name, _)| name.as_str())
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct SymbolTable {
    vars: HashMap<String, Value>,
    mission_vars: Vec<String>,
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolTable {
    pub fn new() -> Self {
        let mut vars = HashMap::new();
        vars.insert(FIN.to_string(), Value::Null);
        vars.insert(FOUT.to_string(), Value::Null);
        vars.insert(LAST_SCREEN.to_string(), Value::Array(Vec::new()));
        vars.insert(CMP_RESULT.to_string(), Value::Bool(false));
        vars.insert(IN_EXCEPTION.to_string(), Value::Bool(false));
        vars.insert(NET_CONNECTED.to_string(), Value::Bool(true));
        vars.insert(SCROLL_RESOLUTION.to_string(), Value::from(1));
        vars.insert(MISSION_FAILED.to_string(), Value::Bool(false));
        Self {
            vars,
            mission_vars: Vec::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    /// The value bound to `name`, or `null` when it was never declared.
    pub fn value(&self, name: &str) -> Value {
        self.vars.get(name).cloned().unwrap_or(Value::Null)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    pub fn set(&mut self, name: &str, value: Value) {
        self.vars.insert(name.to_string(), value);
    }

    /// Bind a user name and record it as a mission variable.
    pub fn declare(&mut self, name: &str, value: Value) {
        self.vars.insert(name.to_string(), value);
        if !self.mission_vars.iter().any(|n| n == name) {
            self.mission_vars.push(name.to_string());
        }
    }

    pub fn mission_vars(&self) -> &[String] {
        &self.mission_vars
    }

    pub fn flag(&self, name: &str) -> bool {
        self.vars
            .get(name)
            .map(expression::is_truthy)
            .unwrap_or(false)
    }

    pub fn set_flag(&mut self, name: &str, on: bool) {
        self.set(name, Value::Bool(on));
    }

    /// Bind every missing name to `null`. Returns the names that were created.
    pub fn declare_missing<'a, I>(&mut self, names: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let mut created = Vec::new();
        for name in names {
            if !self.vars.contains_key(name) {
                debug!("Auto-declaring '{}' as None", name);
                self.vars.insert(name.clone(), Value::Null);
                created.push(name.clone());
            }
        }
        created
    }

    /// Evaluate an expression, auto-declaring any name it reads as `null` first.
    pub fn evaluate(&mut self, source: &str) -> Result<Value, ExprError> {
        let expr = expression::parse(source)?;
        self.declare_missing(&expression::expr_free_names(&expr));
        expression::eval(&expr, &*self)
    }

    /// Evaluate a condition and bind its truth value to `cmp_result`.
    pub fn evaluate_condition(&mut self, source: &str) -> Result<bool, ExprError> {
        let result = expression::is_truthy(&self.evaluate(source)?);
        self.set(CMP_RESULT, Value::Bool(result));
        Ok(result)
    }

    /// Run a snippet of statements against the table.
    pub fn execute(&mut self, source: &str) -> Result<Value, ExprError> {
        let statements = expression::parse_snippet(source)?;
        self.declare_missing(&expression::statement_free_names(&statements));
        expression::run(&statements, self)
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            values: self
                .mission_vars
                .iter()
                .map(|name| (name.clone(), self.value(name)))
                .collect(),
        }
    }

    /// Return every user name to its snapshotted value. Names declared after
    /// the snapshot was taken are removed.
    pub fn restore(&mut self, snapshot: &Snapshot) {
        let later: Vec<String> = self
            .mission_vars
            .iter()
            .filter(|name| snapshot.get(name).is_none())
            .cloned()
            .collect();
        for name in &later {
            debug!("Rollback drops '{}'", name);
            self.vars.remove(name);
        }
        self.mission_vars.retain(|name| !later.contains(name));

        for (name, value) in &snapshot.values {
            self.declare(name, value.clone());
        }
    }

    /// Every binding as one JSON object, keys sorted.
    pub fn to_value(&self) -> Value {
        let mut names: Vec<&String> = self.vars.keys().collect();
        names.sort();
        let mut map = Map::new();
        for name in names {
            map.insert(name.clone(), self.vars[name].clone());
        }
        Value::Object(map)
    }
}

impl Scope for SymbolTable {
    fn lookup(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }
}

impl ScopeMut for SymbolTable {
    fn lookup_mut(&mut self, name: &str) -> Option<&mut Value> {
        self.vars.get_mut(name)
    }

    fn bind(&mut self, name: &str, value: Value) {
        self.set(name, value);
    }
}
