//! Local tools registered alongside remote ones.

use std::fmt::Write as _;

use chrono::{Local, Utc};
use serde_json::{Map, Value, json};
use tools::{
    ParamType, ParameterSpec, Signature, SignatureParam, ToolCategory, ToolContract, ToolFault,
    ToolPermission, handler_fn,
};

const DEFAULT_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const DEFAULT_MAX_BYTES: u64 = 64 * 1024;

const CURRENT_TIME_DOC: &str = "Return the current date and time.

Args:
    format: strftime layout, for example %H:%M
    utc: report UTC instead of local time
";

/// Every built-in tool, in registration order.
pub fn builtin_tools() -> Vec<ToolContract> {
    vec![current_time(), read_file()]
}

/// Parameters come from the signature and the doc text.
fn current_time() -> ToolContract {
    let handler = handler_fn(|args: Map<String, Value>| async move {
        let format = args
            .get("format")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_TIME_FORMAT)
            .to_string();
        let utc = args.get("utc").and_then(Value::as_bool).unwrap_or(true);

        let mut out = String::new();
        let written = if utc {
            write!(out, "{}", Utc::now().format(&format))
        } else {
            write!(out, "{}", Local::now().format(&format))
        };
        written.map_err(|_| ToolFault::invalid_value(format!("invalid time format '{format}'")))?;
        Ok::<_, ToolFault>(Value::from(out))
    })
    .with_signature(
        Signature::new()
            .param(SignatureParam::typed("format", "str").with_default(DEFAULT_TIME_FORMAT))
            .param(SignatureParam::typed("utc", "bool").with_default(true)),
    )
    .with_documentation(CURRENT_TIME_DOC);

    ToolContract::new("current_time", "", handler)
}

fn read_file() -> ToolContract {
    ToolContract::builder(
        "read_file",
        handler_fn(|args: Map<String, Value>| async move {
            let path = args
                .get("path")
                .and_then(Value::as_str)
                .ok_or_else(|| ToolFault::invalid_value("path must be a string"))?
                .to_string();
            let max_bytes = args
                .get("max_bytes")
                .and_then(Value::as_u64)
                .unwrap_or(DEFAULT_MAX_BYTES);
            let max_bytes = usize::try_from(max_bytes).map_err(|_| {
                ToolFault::invalid_value(format!("max_bytes {max_bytes} exceeds addressable size"))
            })?;

            let content = tokio::fs::read_to_string(&path).await?;
            let (content, truncated) = truncate_on_char_boundary(&content, max_bytes);
            Ok::<_, ToolFault>(json!({
                "path": path,
                "content": content,
                "truncated": truncated,
            }))
        }),
    )
    .description("Read a UTF-8 text file from the local filesystem")
    .category(ToolCategory::File)
    .permission(ToolPermission::Limited)
    .param(ParameterSpec::new("path", ParamType::String).describe("Path of the file to read"))
    .param(
        ParameterSpec::new("max_bytes", ParamType::Integer)
            .describe("Maximum number of bytes returned")
            .with_default(DEFAULT_MAX_BYTES)
            .minimum(1.0),
    )
    .build()
}

fn truncate_on_char_boundary(text: &str, max_bytes: usize) -> (&str, bool) {
    if text.len() <= max_bytes {
        return (text, false);
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    (&text[..end], true)
}
