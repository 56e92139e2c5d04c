/// Lock-free handler registry using ArcSwap
///
/// Maps node type strings to handler instances. Lookups never block; every mutation
/// swaps in a fresh map, so a run that already captured its handlers keeps working
/// while registrations change. Tests construct their own isolated registries.

use crate::handlers::{builtin, HandlerDescriptor, NodeHandler};
use arc_swap::ArcSwap;
use std::{collections::HashMap, fmt, sync::Arc};

/// Catalog of node handlers keyed by node type
pub struct HandlerRegistry {
    /// Key: node type, Value: shared handler instance
    handlers: ArcSwap<HashMap<String, Arc<dyn NodeHandler>>>,
}

impl HandlerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            handlers: ArcSwap::new(Arc::new(HashMap::new())),
        }
    }

    /// Create a registry populated with the built-in handlers
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register_all(builtin::all());
        tracing::info!("Initialized {} node handlers", registry.count());
        registry
    }

    /// Register a handler, returning the one it replaced
    ///
    /// Overwriting an existing type is allowed but logged.
    pub fn register(&self, handler: Arc<dyn NodeHandler>) -> Option<Arc<dyn NodeHandler>> {
        let node_type = handler.node_type().to_string();

        let previous = self.handlers.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.insert(node_type.clone(), Arc::clone(&handler));
            next
        });

        let replaced = previous.get(&node_type).cloned();
        if replaced.is_some() {
            tracing::warn!("⚠️ Handler for type '{}' was already registered; overwriting", node_type);
        } else {
            tracing::debug!("➕ Registered handler '{}' ({})", node_type, handler.category());
        }
        replaced
    }

    /// Register several handlers in order
    pub fn register_all(&self, handlers: impl IntoIterator<Item = Arc<dyn NodeHandler>>) {
        for handler in handlers {
            self.register(handler);
        }
    }

    /// Get the handler for a node type (lock-free read)
    pub fn get(&self, node_type: &str) -> Option<Arc<dyn NodeHandler>> {
        self.handlers.load().get(node_type).cloned()
    }

    pub fn contains(&self, node_type: &str) -> bool {
        self.handlers.load().contains_key(node_type)
    }

    /// Handlers in a category, sorted by node type
    pub fn list_by_category(&self, category: &str) -> Vec<Arc<dyn NodeHandler>> {
        let mut matching: Vec<Arc<dyn NodeHandler>> = self
            .handlers
            .load()
            .values()
            .filter(|handler| handler.category() == category)
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.node_type().cmp(b.node_type()));
        matching
    }

    /// Remove a handler; returns whether one was registered
    pub fn unregister(&self, node_type: &str) -> bool {
        let previous = self.handlers.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.remove(node_type);
            next
        });

        let removed = previous.contains_key(node_type);
        if removed {
            tracing::info!("Removed handler from registry: {}", node_type);
        }
        removed
    }

    pub fn count(&self) -> usize {
        self.handlers.load().len()
    }

    /// All registered node types, sorted
    pub fn node_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.load().keys().cloned().collect();
        types.sort();
        types
    }

    /// Catalog entries for every handler, sorted by node type
    pub fn descriptors(&self) -> Vec<HandlerDescriptor> {
        let handlers = self.handlers.load();
        let mut descriptors: Vec<HandlerDescriptor> = handlers
            .values()
            .map(|handler| HandlerDescriptor::of(handler.as_ref()))
            .collect();
        descriptors.sort_by(|a, b| a.node_type.cmp(&b.node_type));
        descriptors
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("node_types", &self.node_types())
            .finish()
    }
}
