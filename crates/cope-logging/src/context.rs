//! Node context for multi-node logging
//!
//! A simulation runs many engines on one thread. [`NodeContextGuard`] sets
//! the node label in thread-local storage for a scope, and
//! [`crate::layers::NodeContextLayer`] attaches it to every span opened in
//! that scope.

use std::cell::RefCell;

use uuid::Uuid;

/// Node context data stored in thread-local storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeContextData {
    /// Human-readable node label, e.g. "alice" or "n3"
    pub node: String,
    /// Position of the node in its simulation, when it has one
    pub index: Option<u64>,
    /// Unique id of this guard's scope
    pub instance_id: Uuid,
}

thread_local! {
    static NODE_CONTEXT: RefCell<Option<NodeContextData>> = const { RefCell::new(None) };
}

/// RAII guard for node context
///
/// Creating the guard sets the node context for the current thread; dropping
/// it restores whatever was set before.
///
/// # Example
///
/// ```ignore
/// use cope_logging::NodeContextGuard;
///
/// let _guard = NodeContextGuard::new("relay");
/// let _span = tracing::info_span!("on_receive").entered();
/// ```
pub struct NodeContextGuard {
    previous: Option<NodeContextData>,
}

impl NodeContextGuard {
    pub fn new(node: impl Into<String>) -> Self {
        Self::install(node.into(), None)
    }

    /// Guard for a node that also has a numeric index (simulated nodes)
    pub fn with_index(node: impl Into<String>, index: u64) -> Self {
        Self::install(node.into(), Some(index))
    }

    fn install(node: String, index: Option<u64>) -> Self {
        let previous = NODE_CONTEXT.with(|ctx| ctx.borrow().clone());
        let data = NodeContextData {
            node,
            index,
            instance_id: Uuid::new_v4(),
        };
        NODE_CONTEXT.with(|ctx| *ctx.borrow_mut() = Some(data));
        Self { previous }
    }

    /// Get the current node context (if any)
    pub fn current() -> Option<NodeContextData> {
        NODE_CONTEXT.with(|ctx| ctx.borrow().clone())
    }

    pub fn current_node() -> Option<String> {
        Self::current().map(|ctx| ctx.node)
    }
}

impl Drop for NodeContextGuard {
    fn drop(&mut self) {
        NODE_CONTEXT.with(|ctx| *ctx.borrow_mut() = self.previous.take());
    }
}

/// Run a block with the node context set
///
/// ```ignore
/// with_node_context!("alice", {
///     engine.on_timer(&mut host, kind, handle)?;
/// });
/// ```
#[macro_export]
macro_rules! with_node_context {
    ($node:expr, $body:block) => {{
        let _guard = $crate::context::NodeContextGuard::new($node);
        $body
    }};
}
