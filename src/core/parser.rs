//! MK-023: YAML recipe files.
//!
//! Parses a recipe file and validates structural constraints:
//! - Version must be "1.0"
//! - Every parameter declares exactly one source
//! - Every `uses` names a registered built-in action
//! - Every template binds to a parameter or an earlier named result

use super::action::{Action, Named};
use super::error::ActionError;
use super::parameter::{ParameterStream, ReusePolicy};
use super::recipe::Recipe;
use super::resolver::{resolve_value, template_names};
use super::session::ActionSession;
use super::types::{ActionOutput, Args, Inputs, Value};
use crate::actions::{ActionRegistry, Builtin};
use crate::parameters::{self, ListDirOptions};
use crate::progress::render::PARTIAL_LOG_LINES;
use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A recipe as written on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipeFile {
    pub version: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub parameters: IndexMap<String, ParameterSpec>,
    #[serde(default)]
    pub policy: Policy,
    #[serde(default)]
    pub steps: Vec<StepDecl>,
}

/// Presentation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    /// Log lines shown per action when a step succeeds.
    #[serde(default = "default_log_lines")]
    pub log_lines: usize,
}

fn default_log_lines() -> usize {
    PARTIAL_LOG_LINES
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            log_lines: default_log_lines(),
        }
    }
}

/// Where a parameter's values come from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterSpec {
    /// `lab: [lab01, lab02]`
    List(Vec<Value>),
    Source(SourceSpec),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdin: Option<StdinSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_dir: Option<ListDirSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub glob: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<Value>>,
    /// Replay the first traversal instead of asking the source again.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reuse: Option<bool>,
}

impl SourceSpec {
    fn source_count(&self) -> usize {
        [
            self.stdin.is_some(),
            self.list_dir.is_some(),
            self.glob.is_some(),
            self.values.is_some(),
        ]
        .into_iter()
        .filter(|set| *set)
        .count()
    }

    fn policy(&self) -> ReusePolicy {
        if self.reuse.unwrap_or(false) {
            ReusePolicy::Reuse
        } else {
            ReusePolicy::Regenerate
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StdinSpec {
    #[serde(default)]
    pub prompt: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListDirSpec {
    pub path: PathBuf,
    #[serde(default)]
    pub directories: bool,
    #[serde(default)]
    pub files: bool,
    #[serde(default)]
    pub skip_hidden: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDecl {
    pub name: String,
    pub actions: ActionSet,
}

/// The actions of one step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ActionSet {
    /// A lone action, result discarded.
    Single(ActionDecl),
    /// Mapping form: each action's result is stored under its key.
    Named(IndexMap<String, ActionDecl>),
    /// List form: results discarded.
    Unnamed(Vec<ActionDecl>),
}

impl ActionSet {
    /// Every declaration with its result key, if any.
    pub fn entries(&self) -> Vec<(Option<&str>, &ActionDecl)> {
        match self {
            Self::Single(decl) => vec![(None, decl)],
            Self::Named(map) => map.iter().map(|(k, d)| (Some(k.as_str()), d)).collect(),
            Self::Unnamed(list) => list.iter().map(|d| (None, d)).collect(),
        }
    }
}

/// `uses:` a built-in, `with:` these arguments.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActionDecl {
    pub uses: String,
    #[serde(default)]
    pub with: IndexMap<String, Value>,
    /// Display name; defaults to the result key or the `uses` name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ActionDecl {
    fn arguments(&self) -> Value {
        Value::Object(
            self.with
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }
}

/// Validation error.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl ValidationError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Parse a recipe file from disk.
pub fn parse_recipe_file(path: &Path) -> Result<RecipeFile, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    parse_recipe(&content)
}

/// Parse a recipe from a string.
pub fn parse_recipe(yaml: &str) -> Result<RecipeFile, String> {
    serde_yaml_ng::from_str(yaml).map_err(|e| format!("YAML parse error: {}", e))
}

/// Validate a parsed recipe. Returns a list of errors (empty = valid).
pub fn validate_recipe(file: &RecipeFile, registry: &ActionRegistry) -> Vec<ValidationError> {
    validate_recipe_with(file, registry, &IndexMap::new())
}

/// Validate a parsed recipe as it will run with `overrides` applied, so
/// templates may use parameters defined only on the command line.
pub fn validate_recipe_with(
    file: &RecipeFile,
    registry: &ActionRegistry,
    overrides: &IndexMap<String, Vec<Value>>,
) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if file.version != "1.0" {
        errors.push(ValidationError::new(format!(
            "version must be \"1.0\", got \"{}\"",
            file.version
        )));
    }
    if file.name.trim().is_empty() {
        errors.push(ValidationError::new("name must not be empty"));
    }

    for (name, spec) in &file.parameters {
        match spec {
            ParameterSpec::List(values) if values.is_empty() => {
                errors.push(ValidationError::new(format!(
                    "parameter '{}' has no values",
                    name
                )));
            }
            ParameterSpec::List(_) => {}
            ParameterSpec::Source(source) => {
                if source.source_count() != 1 {
                    errors.push(ValidationError::new(format!(
                        "parameter '{}' must declare exactly one of stdin, list_dir, glob, values",
                        name
                    )));
                }
                if let Some(pattern) = &source.glob {
                    if let Err(e) = glob::Pattern::new(pattern) {
                        errors.push(ValidationError::new(format!(
                            "parameter '{}' has an invalid glob: {}",
                            name, e
                        )));
                    }
                }
            }
        }
    }

    for (index, step) in file.steps.iter().enumerate() {
        let entries = step.actions.entries();
        if entries.is_empty() {
            errors.push(ValidationError::new(format!(
                "step {} ('{}') has no actions",
                index + 1,
                step.name
            )));
        }
        for (key, decl) in entries {
            let label = key.unwrap_or(&decl.uses);
            if !registry.contains(&decl.uses) {
                errors.push(ValidationError::new(format!(
                    "step '{}' action '{}' uses unknown action '{}'",
                    step.name, label, decl.uses
                )));
            }
            if let Err(e) = template_names(&decl.arguments()) {
                errors.push(ValidationError::new(format!(
                    "step '{}' action '{}': {}",
                    step.name, label, e
                )));
            }
        }
    }

    // Binding is only meaningful once the structure holds.
    if errors.is_empty() {
        match build_recipe(file, registry, overrides) {
            Ok(recipe) => errors.extend(
                recipe
                    .validate()
                    .into_iter()
                    .map(|e| ValidationError::new(e.to_string())),
            ),
            Err(e) => errors.push(ValidationError::new(e)),
        }
    }

    errors
}

/// Parse `name=value` overrides. Repeating a name adds values in order.
pub fn parse_overrides(raw: &[String]) -> Result<IndexMap<String, Vec<Value>>, String> {
    let mut overrides: IndexMap<String, Vec<Value>> = IndexMap::new();
    for item in raw {
        let (name, value) = item
            .split_once('=')
            .ok_or_else(|| format!("invalid parameter '{}': expected name=value", item))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(format!("invalid parameter '{}': empty name", item));
        }
        overrides
            .entry(name.to_string())
            .or_default()
            .push(Value::String(value.to_string()));
    }
    Ok(overrides)
}

/// Turn a recipe file into a runnable [`Recipe`]. Overrides replace a
/// declared parameter in place or add a new one.
pub fn build_recipe(
    file: &RecipeFile,
    registry: &ActionRegistry,
    overrides: &IndexMap<String, Vec<Value>>,
) -> Result<Recipe, String> {
    let mut recipe = Recipe::new(file.name.clone());

    for (name, spec) in &file.parameters {
        let stream = match overrides.get(name) {
            Some(values) => ParameterStream::values(values.clone()),
            None => parameter_stream(name, spec)?,
        };
        recipe.add_parameter(name.clone(), stream);
    }
    for (name, values) in overrides {
        if !file.parameters.contains_key(name) {
            recipe.add_parameter(name.clone(), ParameterStream::values(values.clone()));
        }
    }

    for step in &file.steps {
        let mut actions: Vec<Arc<dyn Action>> = Vec::new();
        for (key, decl) in step.actions.entries() {
            let builtin = *registry
                .get(&decl.uses)
                .ok_or_else(|| format!("unknown action '{}'", decl.uses))?;
            let with = decl.arguments();
            let inputs = template_names(&with)
                .map_err(|e| format!("step '{}' action '{}': {}", step.name, decl.uses, e))?;
            let label = decl
                .name
                .clone()
                .or_else(|| key.map(str::to_string))
                .unwrap_or_else(|| decl.uses.clone());
            let declared: Arc<dyn Action> = Arc::new(DeclaredAction {
                label,
                with,
                inputs,
                builtin,
            });
            actions.push(match key {
                Some(key) => Arc::new(Named::from_arc(key, declared)),
                None => declared,
            });
        }
        recipe.add_step(step.name.clone(), actions);
    }

    Ok(recipe)
}

fn parameter_stream(name: &str, spec: &ParameterSpec) -> Result<ParameterStream, String> {
    let source = match spec {
        ParameterSpec::List(values) => return Ok(ParameterStream::values(values.clone())),
        ParameterSpec::Source(source) => source,
    };
    let policy = source.policy();
    if let Some(values) = &source.values {
        return Ok(ParameterStream::values(values.clone()));
    }
    if let Some(stdin) = &source.stdin {
        let prompt = stdin.prompt.as_deref().unwrap_or(name);
        return Ok(parameters::stdin(prompt, policy));
    }
    if let Some(dir) = &source.list_dir {
        let options = ListDirOptions {
            directories: dir.directories,
            files: dir.files,
            skip_hidden: dir.skip_hidden,
            filter: None,
        };
        return Ok(parameters::list_dir(dir.path.clone(), options).with_policy(policy));
    }
    if let Some(pattern) = &source.glob {
        return parameters::glob(pattern)
            .map(|stream| stream.with_policy(policy))
            .map_err(|e| e.to_string());
    }
    Err(format!("parameter '{}' declares no source", name))
}

/// A built-in bound to the arguments written in the recipe file.
struct DeclaredAction {
    label: String,
    with: Value,
    inputs: Vec<String>,
    builtin: Builtin,
}

#[async_trait]
impl Action for DeclaredAction {
    fn name(&self) -> &str {
        &self.label
    }

    fn inputs(&self) -> Inputs {
        Inputs::names(self.inputs.clone())
    }

    async fn run(&self, args: Args, session: ActionSession) -> Result<ActionOutput, ActionError> {
        let resolved = resolve_value(&self.with, &args).map_err(ActionError::InvalidArgs)?;
        let args = match resolved {
            Value::Object(map) => Args::new(map.into_iter().collect()),
            _ => Args::default(),
        };
        tracing::debug!(action = %self.label, uses = self.builtin.name, "invoking built-in");
        (self.builtin.run)(args, session).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::EventBus;
    use serde_json::json;

    const MARKING: &str = r#"
version: "1.0"
name: Lab marking
parameters:
  lab: [lab01, lab02]
  zid: { stdin: { prompt: zid } }
  notes: { stdin: {}, reuse: true }
  subs: { list_dir: { path: ./subs, directories: true } }
  logs: { glob: "logs/*.txt" }
policy:
  log_lines: 4
steps:
  - name: setup
    actions:
      directory:
        uses: git.clone
        with: { repo: "git@host:{{zid}}/{{lab}}.git", branch: submission, fallback_to_main: true }
  - name: open
    actions:
      - uses: editor.vs_code
        with: { path: "{{directory}}" }
      - uses: process.run
        with: { args: [ssh, cse, acc, "{{zid}}"] }
"#;

    fn messages(errors: &[ValidationError]) -> Vec<&str> {
        errors.iter().map(|e| e.message.as_str()).collect()
    }

    #[test]
    fn test_mk023_parse_valid() {
        let file = parse_recipe(MARKING).unwrap();
        assert_eq!(file.name, "Lab marking");
        assert_eq!(file.policy.log_lines, 4);
        assert_eq!(file.parameters.len(), 5);
        assert!(matches!(file.parameters["lab"], ParameterSpec::List(_)));
        assert!(matches!(file.steps[0].actions, ActionSet::Named(_)));
        assert!(matches!(file.steps[1].actions, ActionSet::Unnamed(_)));
        let errors = validate_recipe(&file, &ActionRegistry::builtin());
        assert!(errors.is_empty(), "unexpected errors: {:?}", messages(&errors));
    }

    #[test]
    fn test_mk023_defaults() {
        let file = parse_recipe("version: \"1.0\"\nname: bare\n").unwrap();
        assert_eq!(file.policy.log_lines, PARTIAL_LOG_LINES);
        assert!(file.parameters.is_empty());
        assert!(file.steps.is_empty());
    }

    #[test]
    fn test_mk023_bad_version() {
        let file = parse_recipe("version: \"2.0\"\nname: t\n").unwrap();
        let errors = validate_recipe(&file, &ActionRegistry::builtin());
        assert!(messages(&errors).iter().any(|m| m.contains("version")));
    }

    #[test]
    fn test_mk023_empty_name() {
        let file = parse_recipe("version: \"1.0\"\nname: \"\"\n").unwrap();
        let errors = validate_recipe(&file, &ActionRegistry::builtin());
        assert!(messages(&errors).iter().any(|m| m.contains("name")));
    }

    #[test]
    fn test_mk023_unknown_action() {
        let yaml = r#"
version: "1.0"
name: t
steps:
  - name: s
    actions:
      - uses: git.teleport
"#;
        let file = parse_recipe(yaml).unwrap();
        let errors = validate_recipe(&file, &ActionRegistry::builtin());
        assert!(messages(&errors)
            .iter()
            .any(|m| m.contains("unknown action 'git.teleport'")));
    }

    #[test]
    fn test_mk023_parameter_needs_one_source() {
        let yaml = r#"
version: "1.0"
name: t
parameters:
  both: { glob: "*.txt", values: [a] }
  none: { reuse: true }
  empty: []
"#;
        let file = parse_recipe(yaml).unwrap();
        let errors = validate_recipe(&file, &ActionRegistry::builtin());
        let msgs = messages(&errors);
        assert!(msgs.iter().any(|m| m.contains("'both'") && m.contains("exactly one")));
        assert!(msgs.iter().any(|m| m.contains("'none'") && m.contains("exactly one")));
        assert!(msgs.iter().any(|m| m.contains("'empty'") && m.contains("no values")));
    }

    #[test]
    fn test_mk023_unknown_source_field_rejected() {
        let yaml = r#"
version: "1.0"
name: t
parameters:
  x: { stdn: {} }
"#;
        assert!(parse_recipe(yaml).is_err());
    }

    #[test]
    fn test_mk023_step_without_actions() {
        let yaml = r#"
version: "1.0"
name: t
steps:
  - name: idle
    actions: []
"#;
        let file = parse_recipe(yaml).unwrap();
        let errors = validate_recipe(&file, &ActionRegistry::builtin());
        assert!(messages(&errors).iter().any(|m| m.contains("has no actions")));
    }

    #[test]
    fn test_mk023_unbound_template() {
        let yaml = r#"
version: "1.0"
name: t
parameters:
  zid: [z1]
steps:
  - name: open
    actions:
      - uses: editor.vs_code
        with: { path: "{{directory}}" }
"#;
        let file = parse_recipe(yaml).unwrap();
        let errors = validate_recipe(&file, &ActionRegistry::builtin());
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("directory"));
    }

    #[test]
    fn test_mk023_sibling_cannot_see_result() {
        let yaml = r#"
version: "1.0"
name: t
steps:
  - name: both
    actions:
      tmp:
        uses: fs.temp_dir
      file:
        uses: fs.write_file
        with: { path: "{{tmp}}/a", text: x }
"#;
        let file = parse_recipe(yaml).unwrap();
        let errors = validate_recipe(&file, &ActionRegistry::builtin());
        assert!(messages(&errors).iter().any(|m| m.contains("tmp")));
    }

    #[test]
    fn test_mk023_unclosed_template() {
        let yaml = r#"
version: "1.0"
name: t
steps:
  - name: s
    actions:
      - uses: fs.read_file
        with: { path: "{{oops" }
"#;
        let file = parse_recipe(yaml).unwrap();
        let errors = validate_recipe(&file, &ActionRegistry::builtin());
        assert!(messages(&errors).iter().any(|m| m.contains("unclosed")));
    }

    #[test]
    fn test_mk023_single_action_form() {
        let yaml = r#"
version: "1.0"
name: t
steps:
  - name: wait
    actions:
      uses: time.sleep
      with: { duration: 0 }
"#;
        let file = parse_recipe(yaml).unwrap();
        assert!(matches!(file.steps[0].actions, ActionSet::Single(_)));
        assert!(validate_recipe(&file, &ActionRegistry::builtin()).is_empty());
    }

    #[test]
    fn test_mk023_override_defines_parameter_for_validation() {
        let yaml = r#"
version: "1.0"
name: t
steps:
  - name: wait
    actions:
      - uses: time.sleep
        with: { duration: "{{wait}}" }
"#;
        let file = parse_recipe(yaml).unwrap();
        let registry = ActionRegistry::builtin();
        assert_eq!(validate_recipe(&file, &registry).len(), 1);
        let overrides = parse_overrides(&["wait=0".to_string()]).unwrap();
        let errors = validate_recipe_with(&file, &registry, &overrides);
        assert!(errors.is_empty(), "unexpected errors: {:?}", messages(&errors));
    }

    #[test]
    fn test_mk023_parse_overrides() {
        let raw = vec!["zid=z1".to_string(), "lab=a=b".to_string(), "zid=z2".to_string()];
        let overrides = parse_overrides(&raw).unwrap();
        assert_eq!(overrides["zid"], vec![json!("z1"), json!("z2")]);
        assert_eq!(overrides["lab"], vec![json!("a=b")]);
        assert!(parse_overrides(&["novalue".to_string()]).is_err());
        assert!(parse_overrides(&["=x".to_string()]).is_err());
    }

    #[test]
    fn test_mk023_overrides_replace_in_place() {
        let file = parse_recipe(MARKING).unwrap();
        let overrides = parse_overrides(&["zid=z9".to_string(), "extra=1".to_string()]).unwrap();
        let recipe = build_recipe(&file, &ActionRegistry::builtin(), &overrides).unwrap();
        let names: Vec<&str> = recipe.parameter_names().collect();
        assert_eq!(names, vec!["lab", "zid", "notes", "subs", "logs", "extra"]);
    }

    #[test]
    fn test_mk023_declared_inputs_and_outputs() {
        let file = parse_recipe(MARKING).unwrap();
        let recipe = build_recipe(&file, &ActionRegistry::builtin(), &IndexMap::new()).unwrap();
        let setup = &recipe.steps()[0].actions()[0];
        assert_eq!(setup.name(), "directory");
        assert_eq!(setup.inputs().required(), ["zid", "lab"]);
        assert_eq!(setup.outputs(), vec!["directory"]);
        let open = &recipe.steps()[1].actions()[0];
        assert_eq!(open.name(), "editor.vs_code");
        assert!(open.outputs().is_empty());
    }

    #[test]
    fn test_mk023_parse_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recipe.yaml");
        std::fs::write(&path, "version: \"1.0\"\nname: file-test\n").unwrap();
        let file = parse_recipe_file(&path).unwrap();
        assert_eq!(file.name, "file-test");
        assert!(parse_recipe_file(&dir.path().join("missing.yaml")).is_err());
    }

    #[test]
    fn test_mk023_parse_invalid_yaml() {
        assert!(parse_recipe("not: [valid: yaml: {{").is_err());
    }

    #[tokio::test]
    async fn test_mk023_run_from_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = r#"
version: "1.0"
name: greet
parameters:
  who: [ann, bob]
steps:
  - name: write
    actions:
      written:
        uses: fs.write_file
        with: { path: "{{dir}}/{{who}}.txt", text: "hello {{who}}" }
  - name: read back
    actions:
      text:
        uses: fs.read_file
        with: { path: "{{written}}" }
"#;
        let file = parse_recipe(yaml).unwrap();
        let overrides =
            parse_overrides(&[format!("dir={}", dir.path().display())]).unwrap();
        let mut recipe = build_recipe(&file, &ActionRegistry::builtin(), &overrides).unwrap();
        let summary = recipe.run(&EventBus::detached()).await.unwrap();

        assert_eq!(summary.permutations, 2);
        assert!(summary.is_success());
        assert_eq!(
            std::fs::read_to_string(dir.path().join("bob.txt")).unwrap(),
            "hello bob"
        );
        assert_eq!(summary.outcomes[0].context["text"], json!("hello ann"));
    }
}
