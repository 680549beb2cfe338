//! Built-in tools: read_file, write_file, run_command.
//!
//! Unlike a local tool runner, these never touch the broker's own
//! filesystem or spawn processes. Every operation is a reverse RPC to the
//! connected client, which owns the workspace and the terminals.

use crate::ports::client_port::ClientError;
use crate::toolset::{InvokeDeps, client_error};
use broker_domain::core::string::clip_output;
use broker_domain::{
    ParameterSpec, ParameterType, ToolCallLocation, ToolDescriptor, ToolError, ToolKind,
    ToolResult,
};
use serde_json::Value;
use tracing::{debug, warn};

/// Tool name constants
pub const READ_FILE: &str = "read_file";
pub const WRITE_FILE: &str = "write_file";
pub const RUN_COMMAND: &str = "run_command";

/// Maximum tool output fed back to the model (1 MB)
const MAX_OUTPUT_SIZE: usize = 1024 * 1024;

/// A known local handler bound into a toolset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinTool {
    ReadFile,
    WriteFile,
    RunCommand,
}

impl BuiltinTool {
    /// Resolve a catalog name to a built-in handler.
    pub fn for_name(name: &str) -> Option<Self> {
        match name {
            READ_FILE => Some(BuiltinTool::ReadFile),
            WRITE_FILE => Some(BuiltinTool::WriteFile),
            RUN_COMMAND => Some(BuiltinTool::RunCommand),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            BuiltinTool::ReadFile => READ_FILE,
            BuiltinTool::WriteFile => WRITE_FILE,
            BuiltinTool::RunCommand => RUN_COMMAND,
        }
    }

    /// The default descriptor used when no catalog entry overrides it.
    pub fn descriptor(&self) -> ToolDescriptor {
        match self {
            BuiltinTool::ReadFile => ToolDescriptor::new(
                READ_FILE,
                ToolKind::Read,
                "Read the contents of a text file in the workspace",
            )
            .with_parameter(
                ParameterSpec::new("path", ParameterType::String, true)
                    .with_description("Path to the file to read"),
            )
            .with_parameter(
                ParameterSpec::new("line", ParameterType::Number, false)
                    .with_description("Line number to start reading from (0-indexed)"),
            )
            .with_parameter(
                ParameterSpec::new("limit", ParameterType::Number, false)
                    .with_description("Maximum number of lines to read"),
            ),

            BuiltinTool::WriteFile => ToolDescriptor::new(
                WRITE_FILE,
                ToolKind::Write,
                "Write content to a file in the workspace, creating or overwriting it",
            )
            .with_parameter(
                ParameterSpec::new("path", ParameterType::String, true)
                    .with_description("Path to the file to write"),
            )
            .with_parameter(
                ParameterSpec::new("content", ParameterType::String, true)
                    .with_description("Content to write"),
            ),

            BuiltinTool::RunCommand => ToolDescriptor::new(
                RUN_COMMAND,
                ToolKind::Execute,
                "Run a command in a terminal and return its output",
            )
            .with_parameter(
                ParameterSpec::new("command", ParameterType::String, true)
                    .with_description("The command to execute"),
            )
            .with_parameter(
                ParameterSpec::new("args", ParameterType::Array, false)
                    .with_description("Arguments passed to the command"),
            )
            .with_parameter(
                ParameterSpec::new("cwd", ParameterType::String, false)
                    .with_description("Working directory for the command"),
            ),
        }
    }

    /// Human-readable title for tracker updates.
    pub fn title(&self, args: &Value) -> String {
        match self {
            BuiltinTool::ReadFile => match args.get("path").and_then(|p| p.as_str()) {
                Some(path) => format!("Read {path}"),
                None => "Read file".to_string(),
            },
            BuiltinTool::WriteFile => match args.get("path").and_then(|p| p.as_str()) {
                Some(path) => format!("Write {path}"),
                None => "Write file".to_string(),
            },
            BuiltinTool::RunCommand => match args.get("command").and_then(|c| c.as_str()) {
                Some(command) => format!("Run {command}"),
                None => "Run command".to_string(),
            },
        }
    }

    /// File locations touched by this call, for tracker metadata.
    pub fn locations(&self, args: &Value) -> Vec<ToolCallLocation> {
        match self {
            BuiltinTool::ReadFile | BuiltinTool::WriteFile => args
                .get("path")
                .and_then(|p| p.as_str())
                .map(|path| {
                    vec![ToolCallLocation {
                        path: path.to_string(),
                        line: args.get("line").and_then(|l| l.as_u64()),
                    }]
                })
                .unwrap_or_default(),
            BuiltinTool::RunCommand => Vec::new(),
        }
    }

    /// Execute against the client. The permission gate has already run.
    pub async fn invoke(&self, args: &Value, deps: &InvokeDeps<'_>) -> ToolResult {
        match self {
            BuiltinTool::ReadFile => self.read_file(args, deps).await,
            BuiltinTool::WriteFile => self.write_file(args, deps).await,
            BuiltinTool::RunCommand => self.run_command(args, deps).await,
        }
    }

    async fn read_file(&self, args: &Value, deps: &InvokeDeps<'_>) -> ToolResult {
        let path = match require_str(args, "path") {
            Ok(p) => p,
            Err(e) => return ToolResult::failure(READ_FILE, e),
        };
        let limit = args.get("limit").and_then(|v| v.as_u64());
        let line = args.get("line").and_then(|v| v.as_u64());

        match deps
            .client
            .read_text_file(deps.session_id, path, limit, line)
            .await
        {
            Ok(content) => ToolResult::success(READ_FILE, clip_output(&content, MAX_OUTPUT_SIZE)),
            Err(e) => ToolResult::failure(READ_FILE, client_error(READ_FILE, e)),
        }
    }

    async fn write_file(&self, args: &Value, deps: &InvokeDeps<'_>) -> ToolResult {
        let path = match require_str(args, "path") {
            Ok(p) => p,
            Err(e) => return ToolResult::failure(WRITE_FILE, e),
        };
        let content = match require_str(args, "content") {
            Ok(c) => c,
            Err(e) => return ToolResult::failure(WRITE_FILE, e),
        };

        match deps
            .client
            .write_text_file(deps.session_id, path, content)
            .await
        {
            Ok(()) => ToolResult::success(
                WRITE_FILE,
                format!("Wrote {} bytes to {}", content.len(), path),
            ),
            Err(e) => ToolResult::failure(WRITE_FILE, client_error(WRITE_FILE, e)),
        }
    }

    /// The compound terminal chain. From the model's viewpoint this is one
    /// tool call; on the wire it is create -> wait -> output -> release.
    /// Partial failure still releases the terminal best-effort.
    async fn run_command(&self, args: &Value, deps: &InvokeDeps<'_>) -> ToolResult {
        let command = match require_str(args, "command") {
            Ok(c) => c,
            Err(e) => return ToolResult::failure(RUN_COMMAND, e),
        };
        let cmd_args: Vec<String> = args
            .get("args")
            .and_then(|a| a.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();
        let cwd = args.get("cwd").and_then(|c| c.as_str());

        let terminal_id = match deps
            .client
            .create_terminal(deps.session_id, command, &cmd_args, cwd)
            .await
        {
            Ok(id) => id,
            Err(e) => return ToolResult::failure(RUN_COMMAND, client_error(RUN_COMMAND, e)),
        };

        // Wait for exit, aborting the remote command if the prompt is
        // cancelled while we block.
        let exit_code = tokio::select! {
            biased;
            _ = deps.cancel.cancelled() => {
                debug!(terminal_id = %terminal_id, "prompt cancelled during terminal wait");
                self.abort_terminal(deps, &terminal_id).await;
                return ToolResult::failure(RUN_COMMAND, ToolError::cancelled());
            }
            result = deps.client.wait_for_terminal_exit(deps.session_id, &terminal_id) => {
                match result {
                    Ok(code) => code,
                    Err(e) => {
                        self.abort_terminal(deps, &terminal_id).await;
                        return ToolResult::failure(RUN_COMMAND, client_error(RUN_COMMAND, e));
                    }
                }
            }
        };

        let output = match deps
            .client
            .get_terminal_output(deps.session_id, &terminal_id)
            .await
        {
            Ok(output) => output,
            Err(e) => {
                self.release_quietly(deps, &terminal_id).await;
                return ToolResult::failure(RUN_COMMAND, client_error(RUN_COMMAND, e));
            }
        };

        self.release_quietly(deps, &terminal_id).await;

        let output = clip_output(&output, MAX_OUTPUT_SIZE);
        if exit_code == 0 {
            ToolResult::success(RUN_COMMAND, output)
        } else {
            // Non-zero exit is still tool-level success; the model decides
            // what to do with the code.
            ToolResult::success(
                RUN_COMMAND,
                format!("Command exited with code {exit_code}\n{output}"),
            )
        }
    }

    /// Kill then release, both best-effort.
    async fn abort_terminal(&self, deps: &InvokeDeps<'_>, terminal_id: &str) {
        if let Err(e) = deps.client.kill_terminal(deps.session_id, terminal_id).await {
            if !matches!(e, ClientError::ConnectionClosed) {
                warn!(terminal_id = %terminal_id, error = %e, "failed to kill terminal");
            }
        }
        self.release_quietly(deps, terminal_id).await;
    }

    async fn release_quietly(&self, deps: &InvokeDeps<'_>, terminal_id: &str) {
        if let Err(e) = deps
            .client
            .release_terminal(deps.session_id, terminal_id)
            .await
        {
            if !matches!(e, ClientError::ConnectionClosed) {
                warn!(terminal_id = %terminal_id, error = %e, "failed to release terminal");
            }
        }
    }
}

fn require_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    args.get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolError::invalid_argument(format!("Missing required argument: {key}")))
}
