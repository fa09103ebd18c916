use crate::{error::CheckError, models::SubjectRef, schema::Schema};
use ahash::AHashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::time::Instant;

/// Boxed future used where evaluation recurses.
pub(crate) type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// `(namespace, object id, relation or permission)` of an evaluation node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct NodeKey {
    pub namespace: String,
    pub object_id: String,
    pub name: String,
}

impl NodeKey {
    pub fn new(namespace: &str, object_id: &str, name: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            object_id: object_id.to_string(),
            name: name.to_string(),
        }
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}#{}", self.namespace, self.object_id, self.name)
    }
}

/// State of one top-level check. Never shared between queries.
pub(crate) struct EvalContext {
    pub schema: Arc<Schema>,
    pub subject: SubjectRef,
    pub deadline: Instant,
    pub max_depth: u32,
    pub depth: u32,
    /// Branches cut at `max_depth` so far.
    pub depth_hits: u32,
    /// Shallowest open node a cycle cut has looped back to; `u32::MAX` if none.
    pub cycle_floor: u32,
    pub lookups: u32,
    /// Nodes open on the current call path, with the depth they were entered at.
    visited: AHashMap<NodeKey, u32>,
    memo: AHashMap<NodeKey, bool>,
}

impl EvalContext {
    pub fn new(
        schema: Arc<Schema>,
        subject: SubjectRef,
        deadline: Instant,
        max_depth: u32,
    ) -> Self {
        Self {
            schema,
            subject,
            deadline,
            max_depth,
            depth: 0,
            depth_hits: 0,
            cycle_floor: u32::MAX,
            lookups: 0,
            visited: AHashMap::new(),
            memo: AHashMap::new(),
        }
    }

    /// Depth at which `key` was entered, if it is open on the current path.
    pub fn open_depth(&self, key: &NodeKey) -> Option<u32> {
        self.visited.get(key).copied()
    }

    /// Record a branch cut because it reached the open node entered at `depth`.
    pub fn cut_cycle(&mut self, depth: u32) {
        self.cycle_floor = self.cycle_floor.min(depth);
    }

    /// Mark `key` open on the path and return its depth.
    pub fn enter(&mut self, key: &NodeKey) -> u32 {
        self.depth += 1;
        self.visited.insert(key.clone(), self.depth);
        self.depth
    }

    pub fn leave(&mut self, key: &NodeKey) {
        self.visited.remove(key);
        self.depth = self.depth.saturating_sub(1);
    }

    pub fn at_depth_limit(&self) -> bool {
        self.depth >= self.max_depth
    }

    pub fn memoized(&self, key: &NodeKey) -> Option<bool> {
        self.memo.get(key).copied()
    }

    pub fn remember(&mut self, key: NodeKey, allowed: bool) {
        self.memo.insert(key, allowed);
    }

    pub fn check_deadline(&self) -> Result<(), CheckError> {
        if Instant::now() >= self.deadline {
            return Err(CheckError::StoreUnavailable(
                "deadline exceeded during evaluation".to_string(),
            ));
        }
        Ok(())
    }
}
