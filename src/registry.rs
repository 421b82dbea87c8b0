// SPDX-License-Identifier: MIT

//! Tool registry
//!
//! Registration happens once during setup and can fail on a name
//! collision; after that the registry is shared read-only behind an Arc,
//! so lookups and invocations take no lock.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::error::ToolError;
use crate::tool::{validate_args, Tool, ToolDecl};

#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    /// Registration order, so declarations are deterministic
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool under its own name. A collision is a setup
    /// error, not a runtime condition.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<(), ToolError> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(ToolError::DuplicateName(name));
        }
        log::debug!("Registered tool: {}", name);
        self.order.push(name.clone());
        self.tools.insert(name, tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Compiled declarations advertised to the model, in registration
    /// order.
    pub fn declarations(&self) -> Vec<ToolDecl> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| ToolDecl {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                schema: tool.schema().clone(),
            })
            .collect()
    }

    /// Look up a tool, validate the arguments against its schema, then
    /// run it. Unknown names and schema mismatches come back as typed
    /// failures without reaching the tool.
    pub async fn invoke(&self, name: &str, args: Value) -> Result<Value, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        validate_args(name, tool.schema(), &args)?;
        log::debug!("Invoking tool {} with args {}", name, args);
        tool.execute(args).await
    }
}
