//! Thread-safe name → descriptor map.
//!
//! Mutated from at least three places (boot, reload endpoint, tool-builder
//! success path) and read on every agent turn. Single-writer /
//! many-readers; readers get cloned descriptors (handlers are `Arc`s), so a
//! turn keeps working with its snapshot even if a writer replaces a tool
//! mid-iteration.

use std::sync::RwLock;

use serde_json::Value;
use tracing::debug;

use crate::descriptor::{ToolDescriptor, ToolOrigin};

#[derive(Default)]
pub struct ToolRegistry {
    // Vec keeps registration order, which is the order tools are presented
    // to the model. Names are unique.
    tools: RwLock<Vec<ToolDescriptor>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a descriptor. A later registration with the same name
    /// replaces the earlier one in place (hot-reload / edit path).
    pub fn register(&self, descriptor: ToolDescriptor) {
        let mut tools = self.tools.write().unwrap();
        match tools.iter_mut().find(|t| t.name == descriptor.name) {
            Some(slot) => {
                debug!(name = %descriptor.name, "tool replaced");
                *slot = descriptor;
            }
            None => {
                debug!(name = %descriptor.name, origin = %descriptor.origin, "tool registered");
                tools.push(descriptor);
            }
        }
    }

    pub fn unregister(&self, name: &str) {
        self.tools.write().unwrap().retain(|t| t.name != name);
    }

    /// Remove every tool with the given origin (e.g. all tools of one
    /// external server before reconnecting).
    pub fn unregister_by_origin(&self, origin: &ToolOrigin) {
        self.tools.write().unwrap().retain(|t| &t.origin != origin);
    }

    pub fn get(&self, name: &str) -> Option<ToolDescriptor> {
        self.tools
            .read()
            .unwrap()
            .iter()
            .find(|t| t.name == name)
            .cloned()
    }

    /// All descriptors in registration order.
    pub fn list(&self) -> Vec<ToolDescriptor> {
        self.tools.read().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.tools.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.read().unwrap().is_empty()
    }

    /// OpenAI function schemas for every registered tool.
    pub fn model_schemas(&self) -> Vec<Value> {
        self.tools
            .read()
            .unwrap()
            .iter()
            .map(|t| t.model_schema())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::descriptor::{HandlerContext, ToolHandler};
    use crate::error::Result;

    struct Tagged(&'static str);

    #[async_trait]
    impl ToolHandler for Tagged {
        async fn call(&self, _args: Value, _ctx: &HandlerContext) -> Result<Value> {
            Ok(json!({ "tag": self.0 }))
        }
    }

    fn tool(name: &str, origin: ToolOrigin, tag: &'static str) -> ToolDescriptor {
        ToolDescriptor::new(
            name,
            "desc",
            json!({"type":"object","properties":{}}),
            Arc::new(Tagged(tag)),
            origin,
        )
    }

    #[test]
    fn register_then_get_returns_descriptor() {
        let reg = ToolRegistry::new();
        reg.register(tool("a", ToolOrigin::Builtin, "one"));
        assert_eq!(reg.get("a").unwrap().name, "a");
        assert!(reg.get("b").is_none());
    }

    #[test]
    fn duplicate_name_replaces_and_keeps_position() {
        let reg = ToolRegistry::new();
        reg.register(tool("a", ToolOrigin::Builtin, "one"));
        reg.register(tool("b", ToolOrigin::Builtin, "one"));
        reg.register(tool("a", ToolOrigin::Custom, "two"));

        let listed = reg.list();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].name, "a");
        assert_eq!(listed[0].origin, ToolOrigin::Custom);
        assert_eq!(listed[1].name, "b");
    }

    #[test]
    fn unregister_by_origin_removes_only_that_source() {
        let reg = ToolRegistry::new();
        reg.register(tool("a", ToolOrigin::Builtin, "x"));
        reg.register(tool("b", ToolOrigin::External("s1".into()), "x"));
        reg.register(tool("c", ToolOrigin::External("s2".into()), "x"));

        reg.unregister_by_origin(&ToolOrigin::External("s1".into()));
        let names: Vec<String> = reg.list().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["a", "c"]);
    }

    #[test]
    fn model_schemas_match_registration_order() {
        let reg = ToolRegistry::new();
        reg.register(tool("first", ToolOrigin::Builtin, "x"));
        reg.register(tool("second", ToolOrigin::Builtin, "x"));

        let schemas = reg.model_schemas();
        assert_eq!(schemas[0]["function"]["name"], "first");
        assert_eq!(schemas[1]["function"]["name"], "second");
    }
}
