//! The Tool Processor: turns model-requested tool calls into
//! `tool_call`/`tool_result` events, with a scoped execution-tool-set
//! override that's guaranteed to release on every exit path.

use std::sync::{Arc, Mutex};

use chrono::Utc;

use crate::event::{EventPayload, EventStream};
use crate::hooks::AgentHooks;
use crate::registry::ToolRegistry;
use crate::tool::{MultimodalContent, Tool, ToolCall, ToolContext, ToolDefinition};

/// RAII guard returned by [`ToolProcessor::set_execution_tools`]. Dropping it
/// (by any path — normal return, early `?`, or panic unwind) restores the
/// processor to its full, unfiltered tool set in place of a manual
/// try/finally.
pub struct ExecutionToolsGuard<'a> {
    processor: &'a ToolProcessor,
}

impl Drop for ExecutionToolsGuard<'_> {
    fn drop(&mut self) {
        *self.processor.execution_tools.lock().unwrap() = None;
    }
}

/// Dispatches tool calls against a [`ToolRegistry`], reporting progress on an
/// [`EventStream`] and consulting [`AgentHooks`] at each extension point.
pub struct ToolProcessor {
    registry: ToolRegistry,
    events: Arc<EventStream>,
    /// The execution tool set installed by the current iteration's
    /// `onPrepareRequest` hook, if any — the exact list the LLM Processor
    /// resolved for this iteration only (spec §4.2/§4.4), not a general
    /// include/exclude filter. `None` means "use the full registry".
    execution_tools: Mutex<Option<Vec<ToolDefinition>>>,
}

impl ToolProcessor {
    pub fn new(events: Arc<EventStream>) -> Self {
        Self { registry: ToolRegistry::new(), events, execution_tools: Mutex::new(None) }
    }

    /// Register a tool, emitting a `system` warning if this replaces an
    /// existing registration under the same name.
    pub fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.definition().name.clone();
        if self.registry.register(tool) {
            self.events.send(EventPayload::System {
                level: crate::event::SystemLevel::Warning,
                message: format!("tool '{name}' re-registered, replacing the previous definition"),
                details: None,
            });
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.registry.get(name)
    }

    /// All tool definitions currently registered, unfiltered.
    pub fn all_tools(&self) -> Vec<ToolDefinition> {
        self.registry.list()
    }

    /// The tool set that should be offered to the model for the current
    /// iteration: the registry, unless an execution tool set is currently
    /// installed (spec §4.4: "while set, `getTools()` returns the iteration
    /// set; otherwise it returns the registry").
    pub fn active_tools(&self) -> Vec<ToolDefinition> {
        match self.execution_tools.lock().unwrap().as_ref() {
            Some(tools) => tools.clone(),
            None => self.registry.list(),
        }
    }

    /// Scope the tool set to exactly `tools` for the lifetime of the
    /// returned guard — the resolved list `onPrepareRequest` returned for
    /// this iteration only. A second call before the first guard drops
    /// simply overwrites it; the guard only ever clears (never restores a
    /// previous set), matching the single-iteration-scoped usage in the LLM
    /// Processor.
    pub fn set_execution_tools(&self, tools: Vec<ToolDefinition>) -> ExecutionToolsGuard<'_> {
        *self.execution_tools.lock().unwrap() = Some(tools);
        ExecutionToolsGuard { processor: self }
    }

    pub fn clear_execution_tools(&self) {
        *self.execution_tools.lock().unwrap() = None;
    }

    /// Execute a batch of tool calls, emitting one `tool_call` and one
    /// `tool_result` event per call, and return the raw (call, result)
    /// pairs for the caller (the LLM Processor) to fold into history.
    pub async fn process_tool_calls(
        &self,
        calls: &[ToolCall],
        session_id: &str,
        context: &ToolContext,
        hooks: &dyn AgentHooks,
        cancel: tokio_util::sync::CancellationToken,
    ) -> Vec<(ToolCall, MultimodalContent)> {
        let mut start_times = Vec::with_capacity(calls.len());
        for call in calls {
            let start_time = Utc::now();
            start_times.push(start_time);
            let definition = self
                .registry
                .get(&call.name)
                .map(|t| t.definition())
                .unwrap_or_else(|| ToolDefinition { name: call.name.clone(), description: String::new(), input_schema: serde_json::json!({}) });
            self.events.send(EventPayload::ToolCall {
                tool_call_id: call.id.clone(),
                name: call.name.clone(),
                arguments: call.arguments.clone(),
                start_time,
                tool: definition,
            });
        }

        // A test (or any other caller) may short-circuit real execution by
        // returning prebuilt outcomes. The processor still owns emitting the
        // tool_result events so timing/ordering stays consistent either way.
        if let Some(outcomes) = hooks.on_process_tool_calls(session_id, calls).await {
            let mut results = Vec::with_capacity(calls.len());
            for (call, start_time, outcome) in zip3(calls, &start_times, outcomes) {
                let elapsed_ms = (Utc::now() - start_time).num_milliseconds().max(0) as u64;
                self.events.send(EventPayload::ToolResult {
                    tool_call_id: outcome.tool_call_id.clone(),
                    name: call.name.clone(),
                    content: outcome.content.clone(),
                    error: outcome.error.clone(),
                    elapsed_ms,
                });
                results.push((call.clone(), outcome.content));
            }
            return results;
        }

        let mut results = Vec::with_capacity(calls.len());
        for (call, start_time) in calls.iter().zip(start_times.iter()) {
            let (content, error) = self.execute_one(call, context, hooks, cancel.clone()).await;
            let elapsed_ms = (Utc::now() - *start_time).num_milliseconds().max(0) as u64;
            self.events.send(EventPayload::ToolResult {
                tool_call_id: call.id.clone(),
                name: call.name.clone(),
                content: content.clone(),
                error,
                elapsed_ms,
            });
            results.push((call.clone(), content));
        }
        results
    }

    async fn execute_one(
        &self,
        call: &ToolCall,
        context: &ToolContext,
        hooks: &dyn AgentHooks,
        cancel: tokio_util::sync::CancellationToken,
    ) -> (MultimodalContent, Option<String>) {
        let arguments = match call.parsed_arguments() {
            Ok(args) => hooks.on_before_tool_call(call, args).await,
            Err(e) => {
                let content = hooks
                    .on_tool_call_error(call, &crate::tool::ToolError::InvalidInput(format!("malformed arguments: {e}")))
                    .await;
                return (content, Some(format!("malformed arguments: {e}")));
            }
        };

        let Some(tool) = self.registry.get(&call.name) else {
            let error = crate::tool::ToolError::InvalidInput(format!("unknown tool '{}'", call.name));
            let content = hooks.on_tool_call_error(call, &error).await;
            return (content, Some(error.to_string()));
        };

        match tool.execute(arguments, context, cancel).await {
            Ok(result) => {
                let content = hooks.on_after_tool_call(call, result.content).await;
                let error = if result.is_error { Some("tool reported an error".to_string()) } else { None };
                (content, error)
            }
            Err(e) => {
                let content = hooks.on_tool_call_error(call, &e).await;
                (content, Some(e.to_string()))
            }
        }
    }
}

/// Zips three equal-length sequences, tolerating a hook that returned fewer
/// outcomes than calls (the remainder is silently dropped rather than
/// panicking — a misbehaving test double shouldn't crash the kernel).
fn zip3(
    calls: &[ToolCall],
    start_times: &[chrono::DateTime<Utc>],
    outcomes: Vec<crate::hooks::ToolCallOutcome>,
) -> Vec<(ToolCall, chrono::DateTime<Utc>, crate::hooks::ToolCallOutcome)> {
    calls
        .iter()
        .zip(start_times.iter())
        .zip(outcomes)
        .map(|((call, start), outcome)| (call.clone(), *start, outcome))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::DefaultHooks;
    use crate::tool::EchoTool;

    fn processor() -> ToolProcessor {
        ToolProcessor::new(Arc::new(EventStream::new()))
    }

    #[tokio::test]
    async fn executes_registered_tool_and_emits_events() {
        let processor = processor();
        processor.register(Arc::new(EchoTool));
        let call = ToolCall { id: "call_1".into(), name: "echo".into(), arguments: r#"{"message":"hi"}"#.into() };
        let context = ToolContext { working_directory: std::env::temp_dir() };
        let hooks = DefaultHooks;

        let results = processor.process_tool_calls(&[call], "session-1", &context, &hooks, tokio_util::sync::CancellationToken::new()).await;

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].1.as_text(), "hi");

        let events = processor.events.get_events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].type_name(), "tool_call");
        assert_eq!(events[1].type_name(), "tool_result");
    }

    #[tokio::test]
    async fn unknown_tool_reports_error_without_panicking() {
        let processor = processor();
        let call = ToolCall { id: "call_1".into(), name: "does_not_exist".into(), arguments: "{}".into() };
        let context = ToolContext { working_directory: std::env::temp_dir() };
        let hooks = DefaultHooks;

        let results = processor.process_tool_calls(&[call], "session-1", &context, &hooks, tokio_util::sync::CancellationToken::new()).await;

        assert_eq!(results.len(), 1);
        let events = processor.events.get_events();
        let EventPayload::ToolResult { error, .. } = &events[1].payload else { panic!("expected tool_result") };
        assert!(error.is_some());
    }

    #[test]
    fn execution_tools_guard_clears_filter_on_drop() {
        let processor = processor();
        processor.register(Arc::new(EchoTool));
        {
            let _guard = processor.set_execution_tools(Vec::new());
            assert!(processor.active_tools().is_empty());
        }
        assert_eq!(processor.active_tools().len(), 1);
    }
}
