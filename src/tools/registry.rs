//! Tool registry for ZeptoCord
//!
//! Holds the tools available to a conversation and dispatches the calls a
//! model round produced. Every call is isolated: an unknown name, bad
//! arguments or a failing handler turns into an error result for that call
//! only.

use std::collections::HashMap;
use std::time::Instant;

use futures::future::join_all;
use serde_json::Value;
use tracing::{info, warn};

use crate::error::CordError;
use crate::providers::ToolDefinition;
use crate::session::ToolCall;

use super::schema;
use super::{Tool, ToolContext, ToolFailure, ToolFailureKind, ToolResult};

/// A registry that holds and dispatches tools.
///
/// # Example
///
/// ```rust
/// use zeptocord::tools::{ToolRegistry, math::MathTool};
///
/// let mut registry = ToolRegistry::new();
/// registry.register(Box::new(MathTool));
/// assert!(registry.has("execute_math_expression"));
/// ```
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    /// Create a new empty tool registry.
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. A tool with the same name is replaced.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name().to_string();
        info!(tool = %name, "Registering tool");
        self.tools.insert(name, tool);
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    /// Definitions advertised to the model, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .tools
            .values()
            .map(|t| ToolDefinition::new(t.name(), t.description(), t.parameters()))
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Run every call concurrently.
    ///
    /// Returns exactly one result per call, in call order, each carrying
    /// its call id.
    pub async fn dispatch(&self, calls: &[ToolCall], ctx: &ToolContext) -> Vec<ToolResult> {
        crate::log_component!(debug, "tools", "Dispatching tool batch", calls = calls.len());
        join_all(calls.iter().map(|call| self.dispatch_one(call, ctx))).await
    }

    async fn dispatch_one(&self, call: &ToolCall, ctx: &ToolContext) -> ToolResult {
        let name = call.name();
        let start = Instant::now();
        let outcome = self.run_call(call, ctx).await;

        match &outcome {
            Ok(_) => info!(
                tool = name,
                call_id = %call.id,
                duration_ms = start.elapsed().as_millis() as u64,
                "Tool executed successfully"
            ),
            Err(failure) => warn!(
                tool = name,
                call_id = %call.id,
                kind = failure.kind.as_str(),
                error = %failure.message,
                duration_ms = start.elapsed().as_millis() as u64,
                "Tool call failed"
            ),
        }

        ToolResult {
            call_id: call.id.clone(),
            name: name.to_string(),
            outcome,
        }
    }

    async fn run_call(
        &self,
        call: &ToolCall,
        ctx: &ToolContext,
    ) -> std::result::Result<Value, ToolFailure> {
        let tool = self.get(call.name()).ok_or_else(|| {
            ToolFailure::from_error(CordError::ToolNotFound(call.name().to_string()))
        })?;

        let raw = call.arguments().trim();
        let args: Value = if raw.is_empty() {
            Value::Object(Default::default())
        } else {
            serde_json::from_str(raw).map_err(|e| {
                ToolFailure::new(
                    ToolFailureKind::Validation,
                    format!("Invalid JSON arguments: {}", e),
                )
            })?
        };

        schema::validate(&tool.parameters(), &args)
            .map_err(|msg| ToolFailure::new(ToolFailureKind::Validation, msg))?;

        tool.execute(args, ctx).await.map_err(ToolFailure::from_error)
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
