//! The tagged union of tool invocations the model can emit, and the
//! schemas advertised to it. A tagged union with exhaustive dispatch makes
//! the engine's branch on tool name total by construction, per the design
//! note in §9 of the distilled spec.

use serde_json::{json, Value};
use span_llm::{ToolCallRequest, ToolSchema};

pub const READ_FILE: &str = "read_file";
pub const APPLY_PATCH: &str = "apply_patch";
pub const RUN_SHELL: &str = "run_shell";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolCall {
    ReadFile { path: String },
    ApplyPatch { path: String, diff: String },
    RunShell { command: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchError {
    pub message: String,
}

impl std::fmt::Display for DispatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Maps a raw `{id, name, input}` request onto the tagged union. An
/// unrecognized name, or one missing its required fields, is a dispatch
/// error returned to the model as the tool result rather than a panic.
pub fn parse_tool_call(req: &ToolCallRequest) -> Result<ToolCall, DispatchError> {
    let field = |name: &str| -> Result<String, DispatchError> {
        req.input
            .get(name)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| DispatchError {
                message: format!("tool {} missing required field {name:?}", req.name),
            })
    };

    match req.name.as_str() {
        READ_FILE => Ok(ToolCall::ReadFile { path: field("path")? }),
        APPLY_PATCH => Ok(ToolCall::ApplyPatch {
            path: field("path")?,
            diff: field("diff")?,
        }),
        RUN_SHELL => Ok(ToolCall::RunShell { command: field("command")? }),
        other => Err(DispatchError {
            message: format!("unknown tool {other:?}"),
        }),
    }
}

pub fn is_apply_patch(req: &ToolCallRequest) -> bool {
    req.name == APPLY_PATCH
}

/// The three tool schemas exposed to the model, per §6.
pub fn tool_schemas() -> Vec<ToolSchema> {
    vec![
        ToolSchema {
            name: READ_FILE.to_string(),
            description: "Read a project file. Returns its contents with a \
                6-column right-aligned line-number prefix followed by a pipe."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "Project-relative path"},
                },
                "required": ["path"],
            }),
        },
        ToolSchema {
            name: APPLY_PATCH.to_string(),
            description: "Apply a unified diff to a project file. The diff must \
                carry at least 3 context lines before or after each change; file \
                headers are optional."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "Project-relative path"},
                    "diff": {"type": "string", "description": "Unified diff text"},
                },
                "required": ["path", "diff"],
            }),
        },
        ToolSchema {
            name: RUN_SHELL.to_string(),
            description: "Run a single allowlisted shell command string."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "command": {"type": "string", "description": "Command and arguments"},
                },
                "required": ["command"],
            }),
        },
    ]
}

/// `read_file`'s wire format: a 6-column right-aligned 1-based line number,
/// then a pipe, then the line text.
pub fn format_numbered(content: &str) -> String {
    content
        .lines()
        .enumerate()
        .map(|(i, line)| format!("{:>6}|{line}", i + 1))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_numbered_pads_to_six_columns() {
        let out = format_numbered("x = 1\ny = 2");
        assert_eq!(out, "     1|x = 1\n     2|y = 2");
    }

    #[test]
    fn parse_read_file_call() {
        let req = ToolCallRequest {
            id: "1".to_string(),
            name: READ_FILE.to_string(),
            input: json!({"path": "a.py"}),
        };
        assert_eq!(
            parse_tool_call(&req).unwrap(),
            ToolCall::ReadFile { path: "a.py".to_string() }
        );
    }

    #[test]
    fn parse_apply_patch_call() {
        let req = ToolCallRequest {
            id: "1".to_string(),
            name: APPLY_PATCH.to_string(),
            input: json!({"path": "a.py", "diff": "@@ -1,1 +1,1 @@\n-a\n+b\n"}),
        };
        match parse_tool_call(&req).unwrap() {
            ToolCall::ApplyPatch { path, diff } => {
                assert_eq!(path, "a.py");
                assert!(diff.contains("@@"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parse_missing_field_is_dispatch_error() {
        let req = ToolCallRequest {
            id: "1".to_string(),
            name: READ_FILE.to_string(),
            input: json!({}),
        };
        assert!(parse_tool_call(&req).is_err());
    }

    #[test]
    fn parse_unknown_tool_is_dispatch_error() {
        let req = ToolCallRequest {
            id: "1".to_string(),
            name: "delete_everything".to_string(),
            input: json!({}),
        };
        assert!(parse_tool_call(&req).is_err());
    }

    #[test]
    fn tool_schemas_cover_the_three_named_tools() {
        let names: Vec<&str> = tool_schemas().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec![READ_FILE, APPLY_PATCH, RUN_SHELL]);
    }
}
