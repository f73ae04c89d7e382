//! Parameter discovery from a declared signature plus free-text docs.
//!
//! Documentation is parsed best-effort with a line-oriented state machine
//! that understands Google-style `Args:` blocks, NumPy-style
//! `Parameters` tables, reST `:param:` fields and bare `name: text`
//! lines. Every assembled description then runs through the enum, range,
//! pattern and required extractors. Nothing here ever fails: text that
//! does not match simply leaves the constraint unset.

use std::sync::LazyLock;

use indexmap::IndexMap;
use regex::Regex;
use serde_json::Value;

use crate::schema::{ParamType, ParameterSpec};

/// Lower-bound nudge applied to strict inequalities (`> 0` becomes `>= 0.001`).
pub const STRICT_BOUND_EPSILON: f64 = 0.001;

/// One declared parameter of a callable.
#[derive(Debug, Clone, PartialEq)]
pub struct SignatureParam {
    pub name: String,
    /// Declared type name; `None` when unannotated.
    pub type_name: Option<String>,
    /// Declared default; `Some(Value::Null)` is a present `None` default.
    pub default: Option<Value>,
}

impl SignatureParam {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: None,
            default: None,
        }
    }

    pub fn typed(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            type_name: Some(type_name.into()),
            ..Self::new(name)
        }
    }

    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }
}

/// Ordered parameter list of a callable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Signature {
    pub params: Vec<SignatureParam>,
}

impl Signature {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a parameter, keeping declaration order.
    pub fn param(mut self, param: SignatureParam) -> Self {
        self.params.push(param);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

impl FromIterator<SignatureParam> for Signature {
    fn from_iter<I: IntoIterator<Item = SignatureParam>>(iter: I) -> Self {
        Self {
            params: iter.into_iter().collect(),
        }
    }
}

/// What the documentation says about one parameter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamDoc {
    pub description: String,
    /// Documented type, e.g. from `:type x: int` or `x (int): ...`.
    pub type_name: Option<String>,
    /// Raw enum alternatives, converted to the parameter type later.
    pub enum_values: Option<Vec<String>>,
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
    pub pattern: Option<String>,
    /// The description says "required" or "must".
    pub required: bool,
}

impl ParamDoc {
    /// Runs all constraint extractors over one description string.
    pub fn from_description(description: &str) -> Self {
        let description = description.trim();
        let (minimum, maximum) = extract_range(description);
        Self {
            description: description.to_string(),
            type_name: None,
            enum_values: extract_enum(description),
            minimum,
            maximum,
            pattern: extract_pattern(description),
            required: mentions_required(description),
        }
    }
}

/// Parsed documentation block.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocInfo {
    /// Free text before the first section or field.
    pub summary: String,
    pub params: IndexMap<String, ParamDoc>,
    pub returns: Option<String>,
}

/// Derives one [`ParameterSpec`] per signature parameter.
///
/// `required` is true when no default is declared, unless the
/// documentation forces it with "required"/"must". Defaults come only from
/// the signature. A documented type is used only for unannotated
/// parameters. `self`, `cls` and variadic (`*args`) entries are skipped.
pub fn derive_parameters(
    signature: &Signature,
    documentation: Option<&str>,
) -> IndexMap<String, ParameterSpec> {
    let doc = documentation.map(parse_docstring).unwrap_or_default();
    let mut parameters = IndexMap::new();

    for param in &signature.params {
        if matches!(param.name.as_str(), "self" | "cls") || param.name.starts_with('*') {
            continue;
        }
        let param_doc = doc.params.get(&param.name);

        let declared = param.type_name.as_deref().filter(|t| !t.trim().is_empty());
        let documented = param_doc.and_then(|d| d.type_name.as_deref());
        let param_type = declared
            .or(documented)
            .map_or(ParamType::String, ParamType::from_type_name);

        let mut spec = ParameterSpec::new(&param.name, param_type);
        spec.required = param.default.is_none();
        spec.default = param.default.clone();

        match param_doc {
            Some(d) => {
                spec.description = if d.description.is_empty() {
                    default_description(&param.name)
                } else {
                    d.description.clone()
                };
                apply_constraints(&mut spec, d);
                if d.required {
                    spec.required = true;
                }
            }
            None => spec.description = default_description(&param.name),
        }

        parameters.insert(param.name.clone(), spec);
    }
    parameters
}

/// Fills description and constraints the explicit declaration left unset.
///
/// Never changes `param_type`, `required` or `default`.
pub fn fill_gaps(spec: &mut ParameterSpec, doc: &ParamDoc) {
    if spec.description.is_empty() && !doc.description.is_empty() {
        spec.description = doc.description.clone();
    }
    apply_constraints(spec, doc);
}

fn apply_constraints(spec: &mut ParameterSpec, doc: &ParamDoc) {
    if spec.enum_values.is_none()
        && let Some(raw) = &doc.enum_values
    {
        spec.enum_values = coerce_enum(raw, spec.param_type);
    }
    if spec.minimum.is_none() {
        spec.minimum = doc.minimum;
    }
    if spec.maximum.is_none() {
        spec.maximum = doc.maximum;
    }
    if spec.pattern.is_none() {
        spec.pattern = doc.pattern.clone();
    }
}

fn default_description(name: &str) -> String {
    format!("Parameter: {name}")
}

/// Converts raw enum text to the parameter's primitive; any value that
/// does not convert drops the whole enum.
fn coerce_enum(raw: &[String], param_type: ParamType) -> Option<Vec<Value>> {
    raw.iter()
        .map(|v| match param_type {
            ParamType::String => Some(Value::from(v.clone())),
            ParamType::Integer => v.parse::<i64>().ok().map(Value::from),
            ParamType::Number => v
                .parse::<i64>()
                .ok()
                .map(Value::from)
                .or_else(|| v.parse::<f64>().ok().map(Value::from)),
            ParamType::Boolean => match v.to_ascii_lowercase().as_str() {
                "true" => Some(Value::Bool(true)),
                "false" => Some(Value::Bool(false)),
                _ => None,
            },
            ParamType::Array | ParamType::Object | ParamType::Null => None,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Docstring state machine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Preamble,
    Args,
    Numpy { indent: usize },
    Returns,
    Other,
}

struct Pending {
    name: String,
    type_name: Option<String>,
    text: String,
}

struct DocParser {
    section: Section,
    pending: Option<Pending>,
    params: IndexMap<String, ParamDoc>,
    types: IndexMap<String, String>,
    summary: Vec<String>,
    summary_open: bool,
    returns: Vec<String>,
}

static GOOGLE_ITEM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\*{0,2}([A-Za-z_][A-Za-z0-9_]*)\s*(?:\(([^)]*)\))?\s*:\s*(.*)$")
        .expect("valid google item regex")
});
static NUMPY_ITEM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*)\s*:\s*(.*)$").expect("valid numpy item regex")
});
static BARE_ITEM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z_][A-Za-z0-9_]{0,28})\s*(?:\(([^)]*)\))?\s*:\s*(.*)$")
        .expect("valid bare item regex")
});
static RST_PARAM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^:param\s+(?:([^\s:]+)\s+)?([A-Za-z_][A-Za-z0-9_]*)\s*:\s*(.*)$")
        .expect("valid rst param regex")
});
static RST_TYPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^:type\s+([A-Za-z_][A-Za-z0-9_]*)\s*:\s*(.+)$").expect("valid rst type regex")
});

/// Parses a documentation block into a summary plus per-parameter docs.
pub fn parse_docstring(doc: &str) -> DocInfo {
    let lines: Vec<&str> = doc.lines().collect();
    let mut parser = DocParser {
        section: Section::Preamble,
        pending: None,
        params: IndexMap::new(),
        types: IndexMap::new(),
        summary: Vec::new(),
        summary_open: true,
        returns: Vec::new(),
    };

    for (i, raw) in lines.iter().enumerate() {
        let line = raw.trim();
        let indent = raw.len() - raw.trim_start().len();

        if line.is_empty() {
            parser.flush();
            if !parser.summary.is_empty() {
                parser.summary_open = false;
            }
            continue;
        }
        if is_underline(line) {
            continue;
        }
        let next = lines.get(i + 1).map(|l| l.trim()).unwrap_or_default();
        if let Some(section) = section_header(line, next, indent) {
            parser.flush();
            parser.summary_open = false;
            parser.section = section;
            continue;
        }
        parser.line(line, indent);
    }
    parser.finish()
}

impl DocParser {
    fn line(&mut self, line: &str, indent: usize) {
        if line.starts_with(":param") {
            self.flush();
            self.summary_open = false;
            if let Some(caps) = RST_PARAM.captures(line) {
                self.pending = Some(Pending {
                    name: caps[2].to_string(),
                    type_name: caps.get(1).map(|m| m.as_str().to_string()),
                    text: caps[3].to_string(),
                });
            }
            return;
        }
        if line.starts_with(":type") {
            if let Some(caps) = RST_TYPE.captures(line) {
                self.types.insert(caps[1].to_string(), caps[2].trim().to_string());
            }
            return;
        }
        if line.starts_with(':') {
            // :returns:, :raises ...:, :rtype:
            self.flush();
            self.summary_open = false;
            self.section = Section::Other;
            return;
        }

        match self.section {
            Section::Args => {
                if let Some(caps) = GOOGLE_ITEM.captures(strip_bullet(line)) {
                    self.start(&caps[1], caps.get(2).map(|m| m.as_str()), &caps[3]);
                } else {
                    self.append(line);
                }
            }
            Section::Numpy { indent: header } => match NUMPY_ITEM.captures(line) {
                Some(caps) if indent <= header => {
                    let type_name = caps[2].trim();
                    self.start(&caps[1], Some(type_name).filter(|t| !t.is_empty()), "");
                }
                _ => self.append(line),
            },
            Section::Returns => self.returns.push(line.to_string()),
            Section::Other => {}
            Section::Preamble => {
                if let Some(caps) = BARE_ITEM.captures(strip_bullet(line)) {
                    self.summary_open = false;
                    self.start(&caps[1], caps.get(2).map(|m| m.as_str()), &caps[3]);
                } else if self.pending.is_some() {
                    self.append(line);
                } else if self.summary_open {
                    self.summary.push(line.to_string());
                }
            }
        }
    }

    fn start(&mut self, name: &str, type_name: Option<&str>, text: &str) {
        self.flush();
        self.pending = Some(Pending {
            name: name.to_string(),
            type_name: type_name.map(str::to_string),
            text: text.to_string(),
        });
    }

    fn append(&mut self, line: &str) {
        if let Some(pending) = &mut self.pending {
            if !pending.text.is_empty() {
                pending.text.push(' ');
            }
            pending.text.push_str(line);
        }
    }

    fn flush(&mut self) {
        let Some(pending) = self.pending.take() else {
            return;
        };
        let mut doc = ParamDoc::from_description(&pending.text);
        doc.type_name = pending.type_name.as_deref().and_then(clean_doc_type);
        self.params.insert(pending.name, doc);
    }

    fn finish(mut self) -> DocInfo {
        self.flush();
        for (name, type_name) in std::mem::take(&mut self.types) {
            let entry = self.params.entry(name).or_default();
            if entry.type_name.is_none() {
                entry.type_name = clean_doc_type(&type_name);
            }
        }
        DocInfo {
            summary: self.summary.join(" "),
            params: self.params,
            returns: (!self.returns.is_empty()).then(|| self.returns.join(" ")),
        }
    }
}

fn section_header(line: &str, next: &str, indent: usize) -> Option<Section> {
    let has_colon = line.ends_with(':');
    let underlined = is_underline(next);
    if !has_colon && !underlined {
        return None;
    }
    let title = line.trim_end_matches(':').trim().to_ascii_lowercase();
    match title.as_str() {
        "args" | "arguments" | "parameters" | "params" | "keyword args" | "keyword arguments"
        | "other parameters" => Some(if underlined {
            Section::Numpy { indent }
        } else {
            Section::Args
        }),
        "returns" | "return" | "yields" | "yield" => Some(Section::Returns),
        "raises" | "raise" | "examples" | "example" | "notes" | "note" | "see also"
        | "references" | "attributes" | "warnings" | "warning" => Some(Section::Other),
        _ => None,
    }
}

fn is_underline(line: &str) -> bool {
    line.len() >= 3 && line.chars().all(|c| c == '-' || c == '=')
}

fn strip_bullet(line: &str) -> &str {
    line.strip_prefix("- ")
        .or_else(|| line.strip_prefix("* "))
        .unwrap_or(line)
        .trim_start()
}

/// `"int, optional"` becomes `"int"`.
fn clean_doc_type(raw: &str) -> Option<String> {
    let first = raw.split(',').next().unwrap_or_default().trim();
    (!first.is_empty() && !first.eq_ignore_ascii_case("optional")).then(|| first.to_string())
}

// ---------------------------------------------------------------------------
// Constraint extractors
// ---------------------------------------------------------------------------

const NUM: &str = r"(-?\d+(?:\.\d+)?)";

fn ci(pattern: &str) -> Regex {
    Regex::new(&format!("(?i){pattern}")).expect("valid constraint regex")
}

static ENUM_ONE_OF: LazyLock<Regex> = LazyLock::new(|| ci(r"\bone of \[([^\]]+)\]"));
static ENUM_OPTIONS: LazyLock<Regex> =
    LazyLock::new(|| ci(r"\boptions?:\s*([^,]+(?:\|[^,]+)+)"));
static ENUM_VALUES: LazyLock<Regex> = LazyLock::new(|| ci(r"\bvalues?:\s*([^,]+(?:\|[^,]+)+)"));
static ENUM_EITHER: LazyLock<Regex> =
    LazyLock::new(|| ci(r"\beither\s+([^,.]+?)\s+or\s+([^,.\s]+)"));
static ENUM_MUST_BE: LazyLock<Regex> = LazyLock::new(|| ci(r"\bmust be\s+(?:either\s+)?([^,.]+)"));
static ENUM_CHOICES: LazyLock<Regex> =
    LazyLock::new(|| ci(r"\bchoices?:\s*([^,]+(?:\|[^,]+)+)"));
static OR_SPLIT: LazyLock<Regex> = LazyLock::new(|| ci(r"\s+or\s+"));

/// Enum alternatives from "one of [...]", "options/values/choices: A|B",
/// "either A or B" or "must be A or B". First matching form wins.
pub fn extract_enum(description: &str) -> Option<Vec<String>> {
    if let Some(caps) = ENUM_ONE_OF.captures(description) {
        return non_empty(caps[1].split(',').map(unquote).collect());
    }
    if let Some(caps) = ENUM_OPTIONS.captures(description) {
        return non_empty(caps[1].split('|').map(unquote).collect());
    }
    if let Some(caps) = ENUM_VALUES.captures(description) {
        return non_empty(caps[1].split('|').map(unquote).collect());
    }
    if let Some(caps) = ENUM_EITHER.captures(description) {
        let values: Vec<String> = [&caps[1], &caps[2]].into_iter().map(unquote).collect();
        if values.iter().all(|v| is_single_token(v)) {
            return Some(values);
        }
    }
    if let Some(caps) = ENUM_MUST_BE.captures(description) {
        let raw: Vec<&str> = OR_SPLIT.split(caps[1].trim()).collect();
        let quoted = raw.iter().all(|v| is_quoted(v.trim()));
        let values: Vec<String> = raw.iter().map(|v| unquote(v)).collect();
        // A lone unquoted word ("must be positive") is a description, not an enum.
        if values.iter().all(|v| is_single_token(v)) && (values.len() > 1 || quoted) {
            return Some(values);
        }
    }
    if let Some(caps) = ENUM_CHOICES.captures(description) {
        return non_empty(caps[1].split('|').map(unquote).collect());
    }
    None
}

fn unquote(value: &str) -> String {
    value
        .trim()
        .trim_matches(|c| c == '\'' || c == '"' || c == '`')
        .trim()
        .to_string()
}

fn is_quoted(value: &str) -> bool {
    value.len() >= 2
        && ['\'', '"', '`']
            .iter()
            .any(|q| value.starts_with(*q) && value.ends_with(*q))
}

fn is_single_token(value: &str) -> bool {
    !value.is_empty() && !value.contains(char::is_whitespace)
}

fn non_empty(values: Vec<String>) -> Option<Vec<String>> {
    let values: Vec<String> = values.into_iter().filter(|v| !v.is_empty()).collect();
    (!values.is_empty()).then_some(values)
}

static RANGE_BETWEEN: LazyLock<Regex> =
    LazyLock::new(|| ci(&format!(r"\bbetween\s+{NUM}\s+and\s+{NUM}")));
static RANGE_SPAN: LazyLock<Regex> =
    LazyLock::new(|| ci(&format!(r"\brange[:\s]+{NUM}(?:\s*-\s*|\s+to\s+|\s+){NUM}")));

static LOWER_INCLUSIVE: LazyLock<[Regex; 3]> = LazyLock::new(|| {
    [
        ci(&format!(r">=\s*{NUM}")),
        ci(&format!(r"\bminimum(?:\s+of)?[:\s]+{NUM}")),
        ci(&format!(r"\b(?:greater than or equal to|at least)\s+{NUM}")),
    ]
});
static LOWER_STRICT: LazyLock<[Regex; 2]> = LazyLock::new(|| {
    [
        ci(&format!(r">\s*{NUM}")),
        ci(&format!(r"\bgreater than\s+{NUM}")),
    ]
});
static UPPER_INCLUSIVE: LazyLock<[Regex; 3]> = LazyLock::new(|| {
    [
        ci(&format!(r"<=\s*{NUM}")),
        ci(&format!(r"\bmaximum(?:\s+of)?[:\s]+{NUM}")),
        ci(&format!(r"\b(?:less than or equal to|at most)\s+{NUM}")),
    ]
});
static UPPER_STRICT: LazyLock<[Regex; 2]> = LazyLock::new(|| {
    [
        ci(&format!(r"<\s*{NUM}")),
        ci(&format!(r"\bless than\s+{NUM}")),
    ]
});

/// Numeric bounds from "between X and Y", "range: X-Y" or inequality
/// phrasing. Strict inequalities are nudged by [`STRICT_BOUND_EPSILON`].
pub fn extract_range(description: &str) -> (Option<f64>, Option<f64>) {
    for span in [&*RANGE_BETWEEN, &*RANGE_SPAN] {
        if let Some(caps) = span.captures(description)
            && let (Ok(min), Ok(max)) = (caps[1].parse::<f64>(), caps[2].parse::<f64>())
        {
            return (Some(min), Some(max));
        }
    }
    let min = first_number(&*LOWER_INCLUSIVE, description).or_else(|| {
        first_number(&*LOWER_STRICT, description).map(|v| v + STRICT_BOUND_EPSILON)
    });
    let max = first_number(&*UPPER_INCLUSIVE, description).or_else(|| {
        first_number(&*UPPER_STRICT, description).map(|v| v - STRICT_BOUND_EPSILON)
    });
    (min, max)
}

fn first_number(patterns: &[Regex], description: &str) -> Option<f64> {
    patterns
        .iter()
        .find_map(|re| re.captures(description))
        .and_then(|caps| caps[1].parse().ok())
}

static PATTERN_KEYWORD: LazyLock<Regex> =
    LazyLock::new(|| ci(r"\b(?:pattern|format|regex|match)\b[:\s]+([^\s,;]+)"));

const CANNED_PATTERNS: &[(&str, &str)] = &[
    ("email", r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$"),
    ("phone", r"^\+?[\d\s\-\(\)]+$"),
    ("url", r"^(https?|ftp)://[^\s/$.?#].[^\s]*$"),
    ("date", r"^\d{4}-\d{2}-\d{2}$"),
    ("time", r"^\d{2}:\d{2}(:\d{2})?$"),
    ("ip", r"^\d{1,3}(\.\d{1,3}){3}$"),
    (
        "uuid",
        r"^[a-fA-F0-9]{8}-[a-fA-F0-9]{4}-[a-fA-F0-9]{4}-[a-fA-F0-9]{4}-[a-fA-F0-9]{12}$",
    ),
    ("hex", r"^[0-9a-fA-F]+$"),
];

/// Regex from "pattern/format/regex/match <token>". Known names (email,
/// url, uuid, ...) resolve to canned expressions; other tokens are used
/// verbatim when they compile.
pub fn extract_pattern(description: &str) -> Option<String> {
    let caps = PATTERN_KEYWORD.captures(description)?;
    let token = caps[1].trim_matches(|c| c == '`' || c == '\'' || c == '"');
    let token = token.strip_suffix('.').unwrap_or(token);
    if token.is_empty() {
        return None;
    }
    let lowered = token.to_ascii_lowercase();
    if let Some((_, canned)) = CANNED_PATTERNS.iter().find(|(name, _)| *name == lowered) {
        return Some((*canned).to_string());
    }
    Regex::new(token).ok().map(|_| token.to_string())
}

static REQUIRED_WORD: LazyLock<Regex> = LazyLock::new(|| ci(r"\b(?:required|must)\b"));
static NOT_REQUIRED: LazyLock<Regex> = LazyLock::new(|| ci(r"\bnot\s+required\b"));

/// `true` when the text says the parameter is required.
pub fn mentions_required(description: &str) -> bool {
    REQUIRED_WORD.is_match(description) && !NOT_REQUIRED.is_match(description)
}
