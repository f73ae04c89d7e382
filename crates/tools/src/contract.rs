//! Tool contract: schema, validation, invocation bookkeeping, envelopes.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use indexmap::IndexMap;
use parking_lot::Mutex;
use proto::envelope::UNKNOWN_PARAMS_KEY;
use proto::{
    EnvelopeErrorKind, EnvelopeMetadata, EnvelopeStatus, ResultEnvelope, ToolDefinition,
    ValidationErrors,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::docstring::{Signature, derive_parameters, fill_gaps, parse_docstring};
use crate::schema::{ParamType, ParameterSpec, object_schema};

/// Bucket for a payload that is not a JSON object at all.
pub const ARGUMENTS_KEY: &str = "_arguments";

/// Category tag used when a tool declares none.
pub const DEFAULT_CATEGORY: &str = "utility";

pub const DEFAULT_TIMEOUT_SECS: f64 = 30.0;

/// A fault raised by a tool entrypoint.
///
/// Faults never escape [`ToolContract::invoke`]; they are counted and
/// reported in the envelope's `exception` field.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ToolFault {
    pub kind: String,
    pub message: String,
}

impl ToolFault {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Generic execution failure.
    pub fn execution(message: impl Into<String>) -> Self {
        Self::new("ExecutionError", message)
    }

    /// The entrypoint rejected an argument value.
    pub fn invalid_value(message: impl Into<String>) -> Self {
        Self::new("ValueError", message)
    }
}

impl From<std::io::Error> for ToolFault {
    fn from(e: std::io::Error) -> Self {
        Self::new("IoError", e.to_string())
    }
}

impl From<serde_json::Error> for ToolFault {
    fn from(e: serde_json::Error) -> Self {
        Self::new("SerializationError", e.to_string())
    }
}

/// Executable body of a tool.
///
/// A handler that reports no [`signature`](Self::signature) is treated as
/// not yet describing its inputs: automatic discovery produces an empty
/// schema for it.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Runs the tool with validated, default-filled arguments.
    async fn call(&self, args: Map<String, Value>) -> Result<Value, ToolFault>;

    /// Declared parameter list used for schema discovery.
    fn signature(&self) -> Option<Signature> {
        None
    }

    /// Free-text documentation used for descriptions and constraints.
    fn documentation(&self) -> Option<&str> {
        None
    }
}

/// Adapts an async closure into a [`ToolHandler`].
pub struct FnHandler<F> {
    func: F,
    signature: Option<Signature>,
    documentation: Option<String>,
}

/// Wraps an async closure as a tool handler.
pub fn handler_fn<F, Fut>(func: F) -> FnHandler<F>
where
    F: Fn(Map<String, Value>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ToolFault>> + Send,
{
    FnHandler {
        func,
        signature: None,
        documentation: None,
    }
}

impl<F> FnHandler<F> {
    pub fn with_signature(mut self, signature: Signature) -> Self {
        self.signature = Some(signature);
        self
    }

    pub fn with_documentation(mut self, documentation: impl Into<String>) -> Self {
        self.documentation = Some(documentation.into());
        self
    }
}

#[async_trait]
impl<F, Fut> ToolHandler for FnHandler<F>
where
    F: Fn(Map<String, Value>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ToolFault>> + Send,
{
    async fn call(&self, args: Map<String, Value>) -> Result<Value, ToolFault> {
        (self.func)(args).await
    }

    fn signature(&self) -> Option<Signature> {
        self.signature.clone()
    }

    fn documentation(&self) -> Option<&str> {
        self.documentation.as_deref()
    }
}

/// Functional grouping of a tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCategory {
    Search,
    Calculation,
    Database,
    File,
    Network,
    System,
    Utility,
    Ai,
    Custom,
}

impl ToolCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            ToolCategory::Search => "search",
            ToolCategory::Calculation => "calculation",
            ToolCategory::Database => "database",
            ToolCategory::File => "file",
            ToolCategory::Network => "network",
            ToolCategory::System => "system",
            ToolCategory::Utility => "utility",
            ToolCategory::Ai => "ai",
            ToolCategory::Custom => "custom",
        }
    }
}

/// Access tier of a tool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolPermission {
    #[default]
    Public,
    Limited,
    Private,
    Admin,
}

/// Static description of a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolMetadata {
    pub name: String,
    pub description: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<ToolCategory>,
    #[serde(default)]
    pub permission: ToolPermission,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Calls per minute the tool is meant to tolerate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<u32>,
    /// Advisory execution budget in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: f64,
    #[serde(default)]
    pub requires_auth: bool,
    #[serde(default)]
    pub deprecated: bool,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn default_timeout_secs() -> f64 {
    DEFAULT_TIMEOUT_SECS
}

impl ToolMetadata {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            description: description.into(),
            version: "1.0.0".to_string(),
            author: None,
            category: None,
            permission: ToolPermission::default(),
            tags: Vec::new(),
            rate_limit: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            requires_auth: false,
            deprecated: false,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Mutable per-tool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RuntimeState {
    pub enabled: bool,
    pub call_count: u64,
    pub error_count: u64,
    pub last_called_at: Option<DateTime<Utc>>,
}

impl Default for RuntimeState {
    fn default() -> Self {
        Self {
            enabled: true,
            call_count: 0,
            error_count: 0,
            last_called_at: None,
        }
    }
}

/// A callable wrapped with its parameter schema and runtime bookkeeping.
pub struct ToolContract {
    metadata: ToolMetadata,
    parameters: IndexMap<String, ParameterSpec>,
    patterns: HashMap<String, Regex>,
    handler: Arc<dyn ToolHandler>,
    state: Mutex<RuntimeState>,
    settings: Mutex<Settings>,
}

/// Free-form configuration plus the time it last changed.
#[derive(Debug, Clone)]
struct Settings {
    config: Map<String, Value>,
    updated_at: DateTime<Utc>,
}

impl std::fmt::Debug for ToolContract {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolContract")
            .field("metadata", &self.metadata)
            .field("parameters", &self.parameters)
            .field("state", &*self.state.lock())
            .field("config", &self.settings.lock().config)
            .finish_non_exhaustive()
    }
}

impl ToolContract {
    /// Wraps a handler, discovering parameters from its signature and
    /// documentation.
    ///
    /// An empty `description` falls back to the documentation summary.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        handler: impl ToolHandler + 'static,
    ) -> Self {
        Self::from_handler(name, description, Arc::new(handler))
    }

    /// Same as [`new`](Self::new) for an already shared handler.
    pub fn from_handler(
        name: impl Into<String>,
        description: impl Into<String>,
        handler: Arc<dyn ToolHandler>,
    ) -> Self {
        let mut description = description.into();
        let documentation = handler.documentation();
        if description.is_empty()
            && let Some(doc) = documentation
        {
            description = parse_docstring(doc).summary;
        }
        let parameters = match handler.signature() {
            Some(signature) => derive_parameters(&signature, documentation),
            None => IndexMap::new(),
        };
        Self::assemble(
            ToolMetadata::new(name, description),
            parameters,
            Map::new(),
            handler,
        )
    }

    /// Starts an explicitly declared tool.
    pub fn builder(name: impl Into<String>, handler: impl ToolHandler + 'static) -> ToolBuilder {
        ToolBuilder::new(name, Arc::new(handler))
    }

    fn assemble(
        metadata: ToolMetadata,
        parameters: IndexMap<String, ParameterSpec>,
        config: Map<String, Value>,
        handler: Arc<dyn ToolHandler>,
    ) -> Self {
        let mut patterns = HashMap::new();
        for spec in parameters.values() {
            let Some(pattern) = spec.pattern.as_deref() else {
                continue;
            };
            if spec.param_type != ParamType::String {
                continue;
            }
            match Regex::new(pattern) {
                Ok(re) => {
                    patterns.insert(spec.name.clone(), re);
                }
                Err(e) => warn!(
                    tool = %metadata.name,
                    param = %spec.name,
                    error = %e,
                    "Ignoring invalid parameter pattern"
                ),
            }
        }
        let settings = Settings {
            config,
            updated_at: metadata.updated_at,
        };
        Self {
            metadata,
            parameters,
            patterns,
            handler,
            state: Mutex::new(RuntimeState::default()),
            settings: Mutex::new(settings),
        }
    }

    /// Returns this contract under a different registry name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.metadata.name = name.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn description(&self) -> &str {
        &self.metadata.description
    }

    pub fn version(&self) -> &str {
        &self.metadata.version
    }

    /// Snapshot of the metadata, `updated_at` included.
    pub fn metadata(&self) -> ToolMetadata {
        ToolMetadata {
            updated_at: self.settings.lock().updated_at,
            ..self.metadata.clone()
        }
    }

    /// Snapshot of the tool's configuration map.
    pub fn config(&self) -> Map<String, Value> {
        self.settings.lock().config.clone()
    }

    /// Merges `config` into the configuration, overwriting existing keys.
    pub fn update_config(&self, config: Map<String, Value>) {
        let mut settings = self.settings.lock();
        let keys: Vec<String> = config.keys().cloned().collect();
        settings.config.extend(config);
        settings.updated_at = Utc::now();
        info!(tool = %self.name(), keys = ?keys, "Tool config updated");
    }

    pub fn parameters(&self) -> &IndexMap<String, ParameterSpec> {
        &self.parameters
    }

    /// Category bucket name, `"utility"` when none was declared.
    pub fn category_tag(&self) -> &'static str {
        self.metadata
            .category
            .map_or(DEFAULT_CATEGORY, ToolCategory::as_str)
    }

    pub fn is_enabled(&self) -> bool {
        self.state.lock().enabled
    }

    /// Snapshot of the runtime counters.
    pub fn stats(&self) -> RuntimeState {
        *self.state.lock()
    }

    pub fn enable(&self) {
        self.state.lock().enabled = true;
        info!(tool = %self.name(), "Tool enabled");
    }

    pub fn disable(&self) {
        self.state.lock().enabled = false;
        info!(tool = %self.name(), "Tool disabled");
    }

    /// Zeroes both counters and clears the last-call timestamp.
    pub fn reset_stats(&self) {
        let mut state = self.state.lock();
        state.call_count = 0;
        state.error_count = 0;
        state.last_called_at = None;
        info!(tool = %self.name(), "Tool stats reset");
    }

    /// Checks `args` against the schema, filling defaults in place.
    ///
    /// A present `null` counts as absent unless the parameter is typed
    /// `null`. Keys missing from the schema are reported under `_unknown`.
    pub fn validate(&self, args: &mut Map<String, Value>) -> ValidationErrors {
        let mut errors = ValidationErrors::new();

        for (name, spec) in &self.parameters {
            let present = args
                .get(name)
                .is_some_and(|v| !v.is_null() || spec.param_type == ParamType::Null);
            if !present {
                if spec.required {
                    push_error(&mut errors, name, "parameter is required".to_string());
                } else if let Some(default) = &spec.default {
                    args.insert(name.clone(), default.clone());
                }
                continue;
            }

            let Some(value) = args.get(name) else {
                continue;
            };
            for problem in self.check_value(spec, value) {
                push_error(&mut errors, name, problem);
            }
        }

        let unknown: Vec<&str> = args
            .keys()
            .filter(|key| !self.parameters.contains_key(*key))
            .map(String::as_str)
            .collect();
        if !unknown.is_empty() {
            push_error(
                &mut errors,
                UNKNOWN_PARAMS_KEY,
                format!("unknown parameters: {}", unknown.join(", ")),
            );
        }
        errors
    }

    fn check_value(&self, spec: &ParameterSpec, value: &Value) -> Vec<String> {
        if !spec.param_type.accepts(value) {
            return vec![format!(
                "expected type {}, got {}",
                spec.param_type,
                ParamType::name_of(value)
            )];
        }

        let mut problems = Vec::new();
        if let Some(allowed) = &spec.enum_values
            && !allowed.iter().any(|candidate| same_value(candidate, value))
        {
            problems.push(format!(
                "value must be one of {}",
                Value::Array(allowed.clone())
            ));
        }
        if spec.param_type.is_numeric()
            && let Some(n) = value.as_f64()
        {
            if let Some(min) = spec.minimum
                && n < min
            {
                problems.push(format!("value must be >= {min}"));
            }
            if let Some(max) = spec.maximum
                && n > max
            {
                problems.push(format!("value must be <= {max}"));
            }
        }
        if let (Some(re), Some(text)) = (self.patterns.get(&spec.name), value.as_str())
            && !re.is_match(text)
        {
            problems.push(format!("value must match pattern {}", re.as_str()));
        }
        problems
    }

    /// Validates and runs the tool, always returning an envelope.
    pub async fn invoke(&self, args: Map<String, Value>) -> ResultEnvelope {
        self.run(Ok(args)).await
    }

    /// Like [`invoke`](Self::invoke) for an untyped payload; anything but an
    /// object (or `null`, read as no arguments) fails validation.
    pub async fn invoke_value(&self, args: Value) -> ResultEnvelope {
        match args {
            Value::Object(map) => self.run(Ok(map)).await,
            Value::Null => self.run(Ok(Map::new())).await,
            other => {
                let mut errors = ValidationErrors::new();
                push_error(
                    &mut errors,
                    ARGUMENTS_KEY,
                    format!("expected a JSON object, got {}", ParamType::name_of(&other)),
                );
                self.run(Err(errors)).await
            }
        }
    }

    async fn run(&self, args: Result<Map<String, Value>, ValidationErrors>) -> ResultEnvelope {
        let call_number = {
            let mut state = self.state.lock();
            if !state.enabled {
                debug!(tool = %self.name(), "Rejected call to disabled tool");
                return ResultEnvelope::failure(
                    EnvelopeErrorKind::Disabled,
                    format!("tool '{}' is disabled", self.name()),
                    self.envelope_metadata(state.call_count),
                    status_of(&state),
                );
            }
            state.call_count += 1;
            state.last_called_at = Some(Utc::now());
            state.call_count
        };

        let errors = match args {
            Ok(mut args) => {
                let errors = self.validate(&mut args);
                if errors.is_empty() {
                    return self.execute(call_number, args).await;
                }
                errors
            }
            Err(errors) => errors,
        };

        debug!(tool = %self.name(), call = call_number, ?errors, "Tool arguments rejected");
        let status = self.record_error();
        ResultEnvelope::failure(
            EnvelopeErrorKind::Validation,
            "parameter validation failed",
            self.envelope_metadata(call_number),
            status,
        )
        .with_details(errors)
    }

    async fn execute(&self, call_number: u64, args: Map<String, Value>) -> ResultEnvelope {
        debug!(tool = %self.name(), call = call_number, "Invoking tool");
        let t0 = std::time::Instant::now();
        let outcome = AssertUnwindSafe(self.handler.call(args))
            .catch_unwind()
            .await;
        debug!(
            tool = %self.name(),
            elapsed_ms = %t0.elapsed().as_millis(),
            "Tool returned"
        );

        let fault = match outcome {
            Ok(Ok(result)) => {
                let status = status_of(&self.state.lock());
                return ResultEnvelope::success(
                    result,
                    self.envelope_metadata(call_number),
                    status,
                );
            }
            Ok(Err(fault)) => fault,
            Err(payload) => ToolFault::new("panic", panic_message(payload.as_ref())),
        };

        warn!(tool = %self.name(), kind = %fault.kind, error = %fault.message, "Tool execution failed");
        let status = self.record_error();
        ResultEnvelope::failure(
            EnvelopeErrorKind::Execution,
            fault.message.clone(),
            self.envelope_metadata(call_number),
            status,
        )
        .with_exception(fault.kind, fault.message)
    }

    fn record_error(&self) -> EnvelopeStatus {
        let mut state = self.state.lock();
        state.error_count += 1;
        status_of(&state)
    }

    fn envelope_metadata(&self, call_number: u64) -> EnvelopeMetadata {
        EnvelopeMetadata {
            tool: self.metadata.name.clone(),
            version: self.metadata.version.clone(),
            call_id: format!("{}_{}", self.metadata.name, call_number),
            timestamp: Utc::now(),
        }
    }

    /// Renders `{name, description, parameters}` for the model.
    pub fn to_wire_function(&self) -> ToolDefinition {
        ToolDefinition::new(
            self.metadata.name.clone(),
            self.metadata.description.clone(),
            object_schema(&self.parameters),
        )
    }

    /// Full description: metadata, parameter specs, configuration, wire
    /// function and current status.
    pub fn schema(&self) -> Value {
        let state = self.stats();
        serde_json::json!({
            "metadata": self.metadata(),
            "parameters": self.parameters,
            "config": self.config(),
            "function": self.to_wire_function(),
            "status": state,
        })
    }
}

fn status_of(state: &RuntimeState) -> EnvelopeStatus {
    EnvelopeStatus {
        call_count: state.call_count,
        error_count: state.error_count,
        enabled: state.enabled,
    }
}

fn push_error(errors: &mut ValidationErrors, key: &str, message: String) {
    errors.entry(key.to_string()).or_default().push(message);
}

/// Numbers compare by value so `1` matches an enum entry of `1.0`.
fn same_value(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) if a.is_number() && b.is_number() => x == y,
        _ => a == b,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "tool panicked".to_string()
    }
}

/// Explicit schema declaration for a tool.
///
/// Parameters declared here are authoritative. A [`Signature`] adds the
/// parameters it lists that were not declared explicitly, typed and marked
/// required from the signature alone. Documentation only fills gaps:
/// descriptions and constraints that are still unset.
pub struct ToolBuilder {
    metadata: ToolMetadata,
    parameters: IndexMap<String, ParameterSpec>,
    config: Map<String, Value>,
    signature: Option<Signature>,
    documentation: Option<String>,
    handler: Arc<dyn ToolHandler>,
}

impl ToolBuilder {
    pub fn new(name: impl Into<String>, handler: Arc<dyn ToolHandler>) -> Self {
        Self {
            metadata: ToolMetadata::new(name, String::new()),
            parameters: IndexMap::new(),
            config: Map::new(),
            signature: None,
            documentation: None,
            handler,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.metadata.description = description.into();
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.metadata.version = version.into();
        self
    }

    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.metadata.author = Some(author.into());
        self
    }

    pub fn category(mut self, category: ToolCategory) -> Self {
        self.metadata.category = Some(category);
        self
    }

    pub fn permission(mut self, permission: ToolPermission) -> Self {
        self.metadata.permission = permission;
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.metadata.tags.push(tag.into());
        self
    }

    pub fn deprecated(mut self) -> Self {
        self.metadata.deprecated = true;
        self
    }

    pub fn rate_limit(mut self, calls_per_minute: u32) -> Self {
        self.metadata.rate_limit = Some(calls_per_minute);
        self
    }

    pub fn timeout_secs(mut self, secs: f64) -> Self {
        self.metadata.timeout_secs = secs;
        self
    }

    pub fn requires_auth(mut self) -> Self {
        self.metadata.requires_auth = true;
        self
    }

    /// Sets one initial configuration entry.
    pub fn config(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    /// Declares a parameter; a later declaration of the same name replaces
    /// the earlier one.
    pub fn param(mut self, spec: ParameterSpec) -> Self {
        self.parameters.insert(spec.name.clone(), spec);
        self
    }

    pub fn signature(mut self, signature: Signature) -> Self {
        self.signature = Some(signature);
        self
    }

    pub fn documentation(mut self, documentation: impl Into<String>) -> Self {
        self.documentation = Some(documentation.into());
        self
    }

    pub fn build(self) -> ToolContract {
        let ToolBuilder {
            mut metadata,
            mut parameters,
            config,
            signature,
            documentation,
            handler,
        } = self;

        if let Some(signature) = &signature {
            for (name, spec) in derive_parameters(signature, None) {
                parameters.entry(name).or_insert(spec);
            }
        }

        if let Some(doc) = documentation.as_deref().map(parse_docstring) {
            if metadata.description.is_empty() {
                metadata.description = doc.summary.clone();
            }
            for spec in parameters.values_mut() {
                if let Some(param_doc) = doc.params.get(&spec.name) {
                    if spec.description.starts_with("Parameter: ") {
                        spec.description.clear();
                    }
                    fill_gaps(spec, param_doc);
                }
            }
        }

        ToolContract::assemble(metadata, parameters, config, handler)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::docstring::SignatureParam;

    struct Panics;

    #[async_trait]
    impl ToolHandler for Panics {
        async fn call(&self, _args: Map<String, Value>) -> Result<Value, ToolFault> {
            panic!("kaboom")
        }
    }

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    fn noop() -> impl ToolHandler + 'static {
        handler_fn(|_args: Map<String, Value>| async { Ok::<_, ToolFault>(json!(null)) })
    }

    fn adder() -> ToolContract {
        let handler = handler_fn(|args: Map<String, Value>| async move {
            let a = args.get("a").and_then(Value::as_f64).unwrap_or_default();
            let b = args.get("b").and_then(Value::as_f64).unwrap_or_default();
            if a < 0.0 {
                return Err(ToolFault::invalid_value("a must not be negative"));
            }
            Ok(json!(a + b))
        })
        .with_signature(
            Signature::new()
                .param(SignatureParam::typed("a", "float"))
                .param(SignatureParam::typed("b", "float").with_default(0)),
        )
        .with_documentation("Adds two numbers.\n\nArgs:\n    a: first addend\n    b: second addend");
        ToolContract::new("add", "", handler)
    }

    #[test]
    fn discovery_uses_signature_and_documentation() {
        let tool = adder();
        assert_eq!(tool.description(), "Adds two numbers.");
        assert_eq!(tool.version(), "1.0.0");
        assert!(tool.parameters()["a"].required);
        assert!(!tool.parameters()["b"].required);
        assert_eq!(tool.parameters()["b"].description, "second addend");
        assert_eq!(tool.category_tag(), "utility");
    }

    #[test]
    fn handler_without_signature_yields_empty_schema() {
        let tool = ToolContract::new("raw", "no schema", handler_fn(|_| async { Ok(json!(null)) }));
        assert!(tool.parameters().is_empty());
        let wire = tool.to_wire_function();
        assert_eq!(wire.parameters["properties"], json!({}));
        assert_eq!(wire.parameters["required"], json!([]));
    }

    #[tokio::test]
    async fn successful_call_returns_result_and_call_id() {
        let tool = adder();
        let first = tool.invoke(args(json!({"a": 2, "b": 3}))).await;
        assert!(first.success);
        assert_eq!(first.result, Some(json!(5.0)));
        let metadata = first.metadata.expect("metadata");
        assert_eq!(metadata.call_id, "add_1");
        assert_eq!(metadata.tool, "add");

        let second = tool.invoke(args(json!({"a": 1}))).await;
        assert_eq!(second.result, Some(json!(1.0)));
        assert_eq!(second.metadata.expect("metadata").call_id, "add_2");
        assert_eq!(second.status.expect("status").call_count, 2);
    }

    #[test]
    fn validate_fills_defaults_and_rejects_unknown_keys() {
        let tool = adder();
        let mut input = args(json!({"a": 1}));
        assert!(tool.validate(&mut input).is_empty());
        assert_eq!(input["b"], json!(0));

        let mut input = args(json!({"a": 1, "zzz": true, "yyy": 1}));
        let errors = tool.validate(&mut input);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors["_unknown"], vec!["unknown parameters: zzz, yyy"]);
    }

    #[test]
    fn validate_reports_missing_type_enum_range_and_pattern() {
        let tool = ToolContract::builder("t", handler_fn(|_| async { Ok(json!(null)) }))
            .param(ParameterSpec::new("need", ParamType::String))
            .param(ParameterSpec::new("n", ParamType::Integer).range(1.0, 3.0).optional())
            .param(ParameterSpec::new("mode", ParamType::String).one_of(["a", "b"]).optional())
            .param(ParameterSpec::new("code", ParamType::String).pattern("^[A-Z]{3}$").optional())
            .build();

        let mut input = args(json!({"need": null, "n": 9, "mode": "c", "code": "abc"}));
        let errors = tool.validate(&mut input);
        assert_eq!(errors["need"], vec!["parameter is required"]);
        assert_eq!(errors["n"], vec!["value must be <= 3"]);
        assert!(errors["mode"][0].starts_with("value must be one of"));
        assert!(errors["code"][0].contains("^[A-Z]{3}$"));

        let mut input = args(json!({"need": 5, "n": 2.5}));
        let errors = tool.validate(&mut input);
        assert_eq!(errors["need"], vec!["expected type string, got integer"]);
        assert_eq!(errors["n"], vec!["expected type integer, got number"]);
    }

    #[test]
    fn numeric_enum_matches_by_value() {
        let tool = ToolContract::builder("t", handler_fn(|_| async { Ok(json!(null)) }))
            .param(ParameterSpec::new("x", ParamType::Number).one_of([1.0, 2.5]))
            .build();
        let mut input = args(json!({"x": 1}));
        assert!(tool.validate(&mut input).is_empty());
    }

    #[tokio::test]
    async fn validation_failure_counts_error_and_skips_handler() {
        let tool = ToolContract::builder("never", Panics)
            .param(ParameterSpec::new("x", ParamType::Integer))
            .build();

        let env = tool.invoke(Map::new()).await;
        assert!(!env.success);
        assert_eq!(env.error_kind, Some(EnvelopeErrorKind::Validation));
        assert!(env.details.expect("details").contains_key("x"));
        let stats = tool.stats();
        assert_eq!(stats.call_count, 1);
        assert_eq!(stats.error_count, 1);
    }

    #[tokio::test]
    async fn handler_fault_becomes_execution_envelope() {
        let tool = adder();
        let env = tool.invoke(args(json!({"a": -1}))).await;
        assert!(!env.success);
        assert_eq!(env.error_kind, Some(EnvelopeErrorKind::Execution));
        let exception = env.exception.expect("exception");
        assert_eq!(exception.kind, "ValueError");
        assert_eq!(exception.message, "a must not be negative");
        assert_eq!(env.status.expect("status").error_count, 1);
    }

    #[tokio::test]
    async fn handler_panic_is_caught() {
        let tool = ToolContract::builder("boom", Panics).build();
        let env = tool.invoke(Map::new()).await;
        let exception = env.exception.expect("exception");
        assert_eq!(exception.kind, "panic");
        assert_eq!(exception.message, "kaboom");
        assert_eq!(tool.stats().error_count, 1);
    }

    #[tokio::test]
    async fn counters_track_every_invocation() {
        let tool = adder();
        let inputs = [json!({"a": 1}), json!({}), json!({"a": -3}), json!([1, 2]), json!({"a": 2})];
        for (n, input) in inputs.into_iter().enumerate() {
            let _ = tool.invoke_value(input).await;
            let stats = tool.stats();
            assert_eq!(stats.call_count, n as u64 + 1);
            assert!(stats.error_count <= stats.call_count);
        }
        assert_eq!(tool.stats().error_count, 3);
    }

    #[tokio::test]
    async fn non_object_payload_is_rejected() {
        let tool = adder();
        let env = tool.invoke_value(json!("a=1")).await;
        assert_eq!(env.error_kind, Some(EnvelopeErrorKind::Validation));
        assert!(env.details.expect("details").contains_key(ARGUMENTS_KEY));
    }

    #[tokio::test]
    async fn disabled_tool_does_not_count_calls() {
        let tool = adder();
        let _ = tool.invoke(args(json!({"a": 1}))).await;
        tool.disable();

        let env = tool.invoke(args(json!({"a": 1}))).await;
        assert!(!env.success);
        assert_eq!(env.error_kind, Some(EnvelopeErrorKind::Disabled));
        assert_eq!(tool.stats().call_count, 1);
        assert!(!env.status.expect("status").enabled);

        tool.enable();
        assert!(tool.invoke(args(json!({"a": 1}))).await.success);
    }

    #[tokio::test]
    async fn reset_stats_clears_counters_and_timestamp() {
        let tool = adder();
        let _ = tool.invoke(args(json!({"a": 1}))).await;
        let _ = tool.invoke(Map::new()).await;
        assert!(tool.stats().last_called_at.is_some());

        tool.reset_stats();
        let stats = tool.stats();
        assert_eq!(stats.call_count, 0);
        assert_eq!(stats.error_count, 0);
        assert_eq!(stats.last_called_at, None);
        assert!(stats.enabled);
    }

    #[test]
    fn builder_documentation_only_fills_gaps() {
        let tool = ToolContract::builder("fetch", handler_fn(|_| async { Ok(json!(null)) }))
            .param(ParameterSpec::new("url", ParamType::String).optional())
            .param(ParameterSpec::new("retries", ParamType::Integer).describe("How often to retry"))
            .signature(Signature::new().param(SignatureParam::typed("timeout", "float")))
            .documentation(
                "Downloads a page.\n\nArgs:\n    url (int): address, required, format: url\n    retries: attempts, between 0 and 5\n    timeout: seconds, >= 1",
            )
            .category(ToolCategory::Network)
            .build();

        assert_eq!(tool.description(), "Downloads a page.");
        let url = &tool.parameters()["url"];
        assert_eq!(url.param_type, ParamType::String);
        assert!(!url.required);
        assert_eq!(url.description, "address, required, format: url");
        assert!(url.pattern.is_some());

        let retries = &tool.parameters()["retries"];
        assert_eq!(retries.description, "How often to retry");
        assert_eq!(retries.maximum, Some(5.0));

        let timeout = &tool.parameters()["timeout"];
        assert_eq!(timeout.param_type, ParamType::Number);
        assert!(timeout.required);
        assert_eq!(timeout.description, "seconds, >= 1");
        assert_eq!(timeout.minimum, Some(1.0));
        assert_eq!(tool.category_tag(), "network");
    }

    #[test]
    fn schema_includes_status_and_function() {
        let tool = adder();
        let schema = tool.schema();
        assert_eq!(schema["metadata"]["name"], "add");
        assert_eq!(schema["function"]["parameters"]["required"], json!(["a"]));
        assert_eq!(schema["status"]["call_count"], 0);
        assert_eq!(schema["status"]["enabled"], true);
        assert!(schema["status"]["last_called_at"].is_null());
        assert_eq!(schema["parameters"]["b"]["default"], 0);
        assert_eq!(schema["config"], json!({}));
    }

    #[test]
    fn update_config_merges_and_touches_updated_at() {
        let tool = ToolContract::builder("fetch", noop())
            .config("retries", 2)
            .config("endpoint", "local")
            .rate_limit(60)
            .timeout_secs(5.0)
            .requires_auth()
            .build();
        let before = tool.metadata();
        assert_eq!(before.rate_limit, Some(60));
        assert_eq!(before.timeout_secs, 5.0);
        assert!(before.requires_auth);
        assert_eq!(before.created_at, before.updated_at);

        std::thread::sleep(std::time::Duration::from_millis(2));
        tool.update_config(args(json!({"retries": 5, "verbose": true})));

        assert_eq!(
            tool.config(),
            args(json!({"retries": 5, "endpoint": "local", "verbose": true}))
        );
        let after = tool.metadata();
        assert_eq!(after.created_at, before.created_at);
        assert!(after.updated_at > before.updated_at);

        let schema = tool.schema();
        assert_eq!(schema["config"]["retries"], 5);
        assert_eq!(schema["config"]["endpoint"], "local");
        assert_eq!(schema["metadata"]["requires_auth"], true);
        assert_eq!(schema["metadata"]["timeout_secs"], 5.0);
    }

    #[test]
    fn default_metadata_uses_thirty_second_timeout() {
        let metadata = adder().metadata();
        assert_eq!(metadata.timeout_secs, DEFAULT_TIMEOUT_SECS);
        assert_eq!(metadata.rate_limit, None);
        assert!(!metadata.requires_auth);
        assert!(adder().config().is_empty());
    }

    #[test]
    fn required_null_parameter_accepts_explicit_null() {
        let tool = ToolContract::builder("clear", noop())
            .param(ParameterSpec::new("marker", ParamType::Null))
            .build();

        let mut input = args(json!({"marker": null}));
        assert!(tool.validate(&mut input).is_empty());

        let mut input = args(json!({}));
        assert_eq!(
            tool.validate(&mut input)["marker"],
            vec!["parameter is required"]
        );
    }

    #[test]
    fn with_name_renames_wire_function() {
        let tool = adder().with_name("math_add");
        assert_eq!(tool.to_wire_function().name, "math_add");
    }
}
