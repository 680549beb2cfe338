//! Session-scoped toolsets.
//!
//! A [`Toolset`] is the bundle of named callables the model may invoke
//! during a prompt. Each entry is a tagged value: a built-in handler bound
//! to a known name, or a generic bridge that forwards an unknown catalog
//! tool verbatim to the client. The invocation path branches on the tag;
//! the prompt runner sees only "invoke by name with JSON arguments".
//!
//! Tools hold no long-lived back-pointers: everything an invocation needs
//! arrives in [`InvokeDeps`] at call time.

pub mod builder;
pub mod builtin;

use crate::ports::client_port::{ClientError, ClientPort};
use crate::tracker::{ProgressPatch, ToolTracker};
use broker_domain::{
    DiscoveryTier, SessionId, ToolDescriptor, ToolError, ToolKind, ToolResult,
};
use builtin::BuiltinTool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Dependencies handed to a tool at invocation time.
pub struct InvokeDeps<'a> {
    pub session_id: &'a SessionId,
    pub client: &'a Arc<dyn ClientPort>,
    pub tracker: &'a ToolTracker,
    pub cancel: &'a CancellationToken,
}

/// One callable entry in a session's toolset.
#[derive(Debug, Clone)]
pub enum SessionTool {
    /// A known name bound to a local handler. The descriptor is the
    /// catalog's when tier 1 matched it, or the built-in default.
    Builtin {
        tool: BuiltinTool,
        descriptor: ToolDescriptor,
    },
    /// An unknown catalog tool, forwarded verbatim through the extension
    /// channel. Exposes the descriptor's parameter schema unchanged.
    Bridge { descriptor: ToolDescriptor },
}

impl SessionTool {
    pub fn descriptor(&self) -> &ToolDescriptor {
        match self {
            SessionTool::Builtin { descriptor, .. } => descriptor,
            SessionTool::Bridge { descriptor } => descriptor,
        }
    }
}

/// The immutable set of tools for one session.
#[derive(Debug, Clone)]
pub struct Toolset {
    tier: DiscoveryTier,
    tools: Vec<SessionTool>,
    by_name: HashMap<String, usize>,
}

impl Toolset {
    pub fn new(tier: DiscoveryTier) -> Self {
        Self {
            tier,
            tools: Vec::new(),
            by_name: HashMap::new(),
        }
    }

    pub(crate) fn push(&mut self, tool: SessionTool) {
        let name = tool.descriptor().name.clone();
        if self.by_name.contains_key(&name) {
            debug!(tool = %name, "duplicate tool name in toolset, keeping first");
            return;
        }
        self.by_name.insert(name, self.tools.len());
        self.tools.push(tool);
    }

    pub fn tier(&self) -> DiscoveryTier {
        self.tier
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&SessionTool> {
        self.by_name.get(name).map(|&i| &self.tools[i])
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.iter().map(|t| t.descriptor().name.as_str())
    }

    /// OpenAI function definitions for every tool, in toolset order.
    pub fn function_definitions(&self) -> Vec<serde_json::Value> {
        self.tools
            .iter()
            .map(|t| t.descriptor().to_function_definition())
            .collect()
    }

    /// Invoke a tool by name, driving the full tracker lifecycle.
    ///
    /// Every path emits a `tool_call_start` and exactly one terminal
    /// `tool_call_update`, then forgets the record. Failures come back as
    /// structured [`ToolResult`]s for the conversation; nothing here
    /// escalates to a prompt failure.
    pub async fn invoke(
        &self,
        call_id: &str,
        name: &str,
        args: serde_json::Value,
        deps: &InvokeDeps<'_>,
    ) -> ToolResult {
        let Some(tool) = self.get(name) else {
            deps.tracker
                .start(call_id, name, ToolKind::Other, vec![], Some(args.clone()))
                .await;
            let result = ToolResult::failure(name, ToolError::not_found(format!("tool {name}")));
            self.finish(call_id, &result, deps).await;
            return result;
        };

        let descriptor = tool.descriptor();
        let (title, locations) = match tool {
            SessionTool::Builtin { tool, .. } => (tool.title(&args), tool.locations(&args)),
            SessionTool::Bridge { descriptor } => (descriptor.name.clone(), Vec::new()),
        };

        deps.tracker
            .start(
                call_id,
                title,
                descriptor.kind,
                locations,
                Some(args.clone()),
            )
            .await;

        let result = self.execute(tool, call_id, &args, deps).await;
        self.finish(call_id, &result, deps).await;
        result
    }

    /// Invoke with the model's raw argument string. Arguments that fail to
    /// parse still produce a tracked start/terminal pair; the model gets a
    /// structured invalid-argument error back.
    pub async fn invoke_raw(
        &self,
        call_id: &str,
        name: &str,
        raw_arguments: &str,
        deps: &InvokeDeps<'_>,
    ) -> ToolResult {
        let parsed = if raw_arguments.trim().is_empty() {
            Ok(serde_json::json!({}))
        } else {
            serde_json::from_str(raw_arguments)
        };
        match parsed {
            Ok(args) => self.invoke(call_id, name, args, deps).await,
            Err(e) => {
                let kind = self
                    .get(name)
                    .map(|t| t.descriptor().kind)
                    .unwrap_or_default();
                deps.tracker.start(call_id, name, kind, vec![], None).await;
                let result = ToolResult::failure(
                    name,
                    ToolError::invalid_argument(format!(
                        "tool arguments are not valid JSON: {e}"
                    )),
                );
                self.finish(call_id, &result, deps).await;
                result
            }
        }
    }

    async fn execute(
        &self,
        tool: &SessionTool,
        call_id: &str,
        args: &serde_json::Value,
        deps: &InvokeDeps<'_>,
    ) -> ToolResult {
        let descriptor = tool.descriptor();
        let name = descriptor.name.as_str();

        if deps.cancel.is_cancelled() {
            return ToolResult::failure(name, ToolError::cancelled());
        }

        if descriptor.gated() {
            let description = if descriptor.description.is_empty() {
                format!("{name} {args}")
            } else {
                format!("{name}: {}", descriptor.description)
            };
            match deps
                .client
                .request_permission(deps.session_id, call_id, &description)
                .await
            {
                Ok(outcome) if outcome.allowed() => {}
                Ok(outcome) => {
                    let reason = outcome.reason.unwrap_or_else(|| "denied by user".into());
                    return ToolResult::failure(name, ToolError::permission_denied(reason));
                }
                Err(e) => return ToolResult::failure(name, client_error(name, e)),
            }
        }

        match tool {
            SessionTool::Builtin { tool, .. } => tool.invoke(args, deps).await,
            SessionTool::Bridge { descriptor } => {
                match deps
                    .client
                    .call_extension(&descriptor.name, args.clone())
                    .await
                {
                    Ok(value) => ToolResult::structured(&descriptor.name, value),
                    Err(ClientError::Unsupported(_)) => ToolResult::failure(
                        &descriptor.name,
                        ToolError::unsupported_tool(&descriptor.name),
                    ),
                    Err(e) => {
                        ToolResult::failure(&descriptor.name, client_error(&descriptor.name, e))
                    }
                }
            }
        }
    }

    /// Emit the terminal update and drop the record.
    async fn finish(&self, call_id: &str, result: &ToolResult, deps: &InvokeDeps<'_>) {
        let patch = if result.is_success() {
            let mut patch = ProgressPatch::completed();
            if let Some(output) = result.output() {
                patch = patch.with_text(output.to_string());
            }
            if let Some(value) = &result.structured {
                patch = patch.with_raw_output(value.clone());
            }
            patch
        } else {
            let message = result
                .error()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "tool failed".into());
            ProgressPatch::failed().with_text(message)
        };
        deps.tracker.progress(call_id, patch).await;
        deps.tracker.forget(call_id).await;
    }
}

/// Map a reverse-RPC failure into a structured tool error.
pub(crate) fn client_error(name: &str, e: ClientError) -> ToolError {
    match e {
        ClientError::ConnectionClosed => ToolError::connection_closed(),
        ClientError::Timeout(d) => ToolError::timeout(format!("{name} after {d:?}")),
        ClientError::Unsupported(method) => ToolError::unsupported_tool(method),
        ClientError::Rpc { code, message } => {
            ToolError::execution_failed(format!("client error {code}: {message}"))
        }
        ClientError::Decode(message) => {
            ToolError::execution_failed(format!("bad client response: {message}"))
        }
    }
}
