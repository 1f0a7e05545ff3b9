use std::collections::HashMap;
use std::sync::Arc;

use conclave_core::agent::Access;
use conclave_core::tools::{Tool, ToolSchema};

use crate::error::RunError;

struct ToolEntry {
    tool: Arc<dyn Tool>,
    /// Derived once on registration.
    schema: ToolSchema,
}

/// Registry of available tools.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, ToolEntry>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Names must be unique.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<(), RunError> {
        let schema = tool.schema();
        if self.tools.contains_key(&schema.name) {
            return Err(RunError::DuplicateName(schema.name));
        }
        self.tools
            .insert(schema.name.clone(), ToolEntry { tool, schema });
        Ok(())
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).map(|e| Arc::clone(&e.tool))
    }

    /// Cached schema of a tool.
    pub fn schema(&self, name: &str) -> Option<&ToolSchema> {
        self.tools.get(name).map(|e| &e.schema)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Schemas of the tools `access` permits, sorted by name.
    pub fn definitions_for(&self, access: &Access) -> Vec<ToolSchema> {
        let mut defs: Vec<ToolSchema> = self
            .tools
            .iter()
            .filter(|(name, _)| access.permits(name))
            .map(|(_, e)| e.schema.clone())
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    pub fn count(&self) -> usize {
        self.tools.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conclave_core::schema::{Param, ParamKind};
    use conclave_core::tools::{FunctionTool, ToolResult};

    fn dummy(name: &str) -> Arc<dyn Tool> {
        Arc::new(FunctionTool::sync(
            name,
            format!("{name} tool"),
            &[Param::required("input", ParamKind::String)],
            |_| Ok(ToolResult::text("ok")),
        ))
    }

    #[test]
    fn register_and_get() {
        let mut registry = ToolRegistry::new();
        registry.register(dummy("read")).unwrap();

        assert!(registry.contains("read"));
        assert!(registry.get("read").is_some());
        assert!(registry.get("nonexistent").is_none());
        assert_eq!(registry.count(), 1);
        assert_eq!(registry.schema("read").unwrap().description, "read tool");
    }

    #[test]
    fn duplicate_name_rejected() {
        let mut registry = ToolRegistry::new();
        registry.register(dummy("read")).unwrap();
        let err = registry.register(dummy("read")).unwrap_err();
        assert!(matches!(err, RunError::DuplicateName(n) if n == "read"));
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn definitions_filtered_by_access() {
        let mut registry = ToolRegistry::new();
        registry.register(dummy("read")).unwrap();
        registry.register(dummy("write")).unwrap();
        registry.register(dummy("bash")).unwrap();

        let all = registry.definitions_for(&Access::All);
        let names: Vec<_> = all.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["bash", "read", "write"]);

        let except = registry.definitions_for(&Access::all_except(["bash"]));
        let names: Vec<_> = except.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["read", "write"]);

        let only = registry.definitions_for(&Access::only(["read"]));
        assert_eq!(only.len(), 1);
        assert_eq!(only[0].parameters["required"][0], "input");

        assert!(registry.definitions_for(&Access::None).is_empty());
    }
}
