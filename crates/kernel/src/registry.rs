//! Name → `(schema, handler)` mapping with last-registration-wins semantics.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::tool::{Tool, ToolDefinition};

/// Thread-safe tool registry. Registration is last-write-wins by name; the
/// caller (the Tool Processor) is responsible for emitting the `system`
/// warning on a duplicate.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Mutex<HashMap<String, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a tool, replacing any prior registration under the same name.
    /// Returns `true` if this replaced an existing entry.
    pub fn register(&self, tool: Arc<dyn Tool>) -> bool {
        let name = tool.definition().name;
        self.tools.lock().unwrap().insert(name, tool).is_some()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.lock().unwrap().get(name).cloned()
    }

    /// All registered tool definitions, for sending to the model.
    pub fn list(&self) -> Vec<ToolDefinition> {
        self.tools.lock().unwrap().values().map(|t| t.definition()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.lock().unwrap().is_empty()
    }
}

/// Pure filter: `include` is a substring whitelist applied first, `exclude`
/// a substring blacklist applied second. Either may be omitted.
#[derive(Debug, Clone, Default)]
pub struct ToolFilter {
    pub include: Option<Vec<String>>,
    pub exclude: Option<Vec<String>>,
}

pub fn filter_tools(tools: Vec<ToolDefinition>, filter: &ToolFilter) -> Vec<ToolDefinition> {
    let included = match &filter.include {
        Some(patterns) => tools
            .into_iter()
            .filter(|t| patterns.iter().any(|p| t.name.contains(p.as_str())))
            .collect(),
        None => tools,
    };

    match &filter.exclude {
        Some(patterns) => included
            .into_iter()
            .filter(|t| !patterns.iter().any(|p| t.name.contains(p.as_str())))
            .collect(),
        None => included,
    }
}
