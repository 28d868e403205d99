//! MK-001: Values threaded through a recipe run.
//!
//! Parameters, action results and action arguments are all plain
//! `serde_json::Value`s keyed by name. Ordering is preserved everywhere
//! (`IndexMap`) so listings follow declaration order.

use super::error::ActionError;
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single parameter or result value.
pub type Value = serde_json::Value;

/// Name → value mapping accumulated across the steps of one permutation.
pub type Context = IndexMap<String, Value>;

/// Render a value for humans: strings without quotes, everything else as JSON.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

// ============================================================================
// Permutation
// ============================================================================

/// One concrete assignment of a value to every declared parameter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Permutation {
    values: IndexMap<String, Value>,
}

impl Permutation {
    pub fn new(values: IndexMap<String, Value>) -> Self {
        Self { values }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The permutation as a fresh context, with `results` layered on top.
    pub fn with_results(&self, results: &Context) -> Context {
        let mut merged = self.values.clone();
        for (k, v) in results {
            merged.insert(k.clone(), v.clone());
        }
        merged
    }
}

impl fmt::Display for Permutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .values
            .iter()
            .map(|(k, v)| format!("{}={}", k, display_value(v)))
            .collect();
        write!(f, "{}", parts.join(", "))
    }
}

// ============================================================================
// Action inputs and outputs
// ============================================================================

/// The context names an action consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inputs {
    /// Exactly these names, bound by name.
    Named(Vec<String>),
    /// The whole context.
    All,
}

impl Inputs {
    pub fn none() -> Self {
        Self::Named(Vec::new())
    }

    pub fn names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Named(names.into_iter().map(Into::into).collect())
    }

    /// Names required from the context (empty for `All`).
    pub fn required(&self) -> &[String] {
        match self {
            Self::Named(names) => names,
            Self::All => &[],
        }
    }
}

/// What an action resolved to.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ActionOutput {
    /// Nothing worth keeping.
    #[default]
    None,
    /// A single unnamed value. Discarded by the step.
    Value(Value),
    /// Named results merged into the context.
    Named(IndexMap<String, Value>),
}

impl ActionOutput {
    pub fn value(v: impl Into<Value>) -> Self {
        Self::Value(v.into())
    }

    pub fn named<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Self::Named(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Collapse into one value, as used when the output is stored under a key.
    pub fn into_value(self) -> Value {
        match self {
            Self::None => Value::Null,
            Self::Value(v) => v,
            Self::Named(map) => Value::Object(map.into_iter().collect()),
        }
    }
}

// ============================================================================
// Args
// ============================================================================

/// The arguments bound for one action invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args {
    values: IndexMap<String, Value>,
}

impl Args {
    pub fn new(values: IndexMap<String, Value>) -> Self {
        Self { values }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.values.keys()
    }

    /// A required argument rendered as text.
    pub fn str(&self, name: &str) -> Result<String, ActionError> {
        self.values
            .get(name)
            .map(display_value)
            .ok_or_else(|| ActionError::InvalidArgs(format!("missing argument '{}'", name)))
    }

    /// A required argument deserialized into `T`.
    pub fn require<T: DeserializeOwned>(&self, name: &str) -> Result<T, ActionError> {
        let value = self
            .values
            .get(name)
            .ok_or_else(|| ActionError::InvalidArgs(format!("missing argument '{}'", name)))?;
        serde_json::from_value(value.clone())
            .map_err(|e| ActionError::InvalidArgs(format!("argument '{}': {}", name, e)))
    }

    /// Deserialize the whole argument set into a typed struct.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, ActionError> {
        let object: serde_json::Map<String, Value> = self
            .values
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        serde_json::from_value(Value::Object(object))
            .map_err(|e| ActionError::InvalidArgs(e.to_string()))
    }

    pub fn into_inner(self) -> IndexMap<String, Value> {
        self.values
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Args {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_mk001_display_value() {
        assert_eq!(display_value(&json!("plain")), "plain");
        assert_eq!(display_value(&json!(3)), "3");
        assert_eq!(display_value(&json!(null)), "");
        assert_eq!(display_value(&json!(["a", 1])), "[\"a\",1]");
    }

    #[test]
    fn test_mk001_permutation_display_keeps_order() {
        let mut values = IndexMap::new();
        values.insert("zid".to_string(), json!("z123"));
        values.insert("lab".to_string(), json!("lab01"));
        let p = Permutation::new(values);
        assert_eq!(p.to_string(), "zid=z123, lab=lab01");
    }

    #[test]
    fn test_mk001_with_results_last_write_wins() {
        let mut values = IndexMap::new();
        values.insert("n".to_string(), json!(1));
        let p = Permutation::new(values);
        let mut results = Context::new();
        results.insert("dir".to_string(), json!("/tmp/x"));
        results.insert("n".to_string(), json!(7));
        let merged = p.with_results(&results);
        assert_eq!(merged["n"], json!(7));
        assert_eq!(merged["dir"], json!("/tmp/x"));
        assert_eq!(merged.keys().collect::<Vec<_>>(), vec!["n", "dir"]);
    }

    #[test]
    fn test_mk001_output_into_value() {
        assert_eq!(ActionOutput::None.into_value(), json!(null));
        assert_eq!(ActionOutput::value("x").into_value(), json!("x"));
        assert_eq!(
            ActionOutput::named([("a", 1)]).into_value(),
            json!({"a": 1})
        );
    }

    #[test]
    fn test_mk001_args_typed_access() {
        #[derive(Deserialize)]
        struct Spec {
            repo: String,
            #[serde(default)]
            fallback_to_main: bool,
        }

        let args: Args = [("repo", json!("git@host:x.git")), ("fallback_to_main", json!(true))]
            .into_iter()
            .collect();
        let spec: Spec = args.parse().unwrap();
        assert_eq!(spec.repo, "git@host:x.git");
        assert!(spec.fallback_to_main);
        assert_eq!(args.str("repo").unwrap(), "git@host:x.git");
        assert!(args.require::<u32>("repo").is_err());
        assert!(matches!(
            args.str("missing"),
            Err(ActionError::InvalidArgs(_))
        ));
    }

    #[test]
    fn test_mk001_inputs_required() {
        assert_eq!(Inputs::names(["a", "b"]).required().len(), 2);
        assert!(Inputs::All.required().is_empty());
        assert!(Inputs::none().required().is_empty());
    }
}
