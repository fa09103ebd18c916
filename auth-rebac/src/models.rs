use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::time::Instant;

/// An object in a namespace, e.g. `service_profile:tenant-1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectRef {
    pub namespace: String,
    pub id: String,
}

impl ObjectRef {
    pub fn new(namespace: &str, id: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            id: id.to_string(),
        }
    }

    /// The subject set "everyone holding `relation` on this object".
    pub fn subject_set(&self, relation: &str) -> SubjectRef {
        SubjectRef::set(&self.namespace, &self.id, relation)
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.id)
    }
}

/// The subject side of a tuple.
///
/// Without a relation this is a concrete subject. With one it is an indirect
/// subject (a userset): all subjects holding `relation` on `namespace:id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubjectRef {
    pub namespace: String,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation: Option<String>,
}

impl SubjectRef {
    pub fn id(namespace: &str, id: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            id: id.to_string(),
            relation: None,
        }
    }

    pub fn set(namespace: &str, id: &str, relation: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            id: id.to_string(),
            relation: Some(relation.to_string()),
        }
    }

    pub fn is_set(&self) -> bool {
        self.relation.is_some()
    }

    /// The object this subject names, ignoring any relation.
    pub fn object(&self) -> ObjectRef {
        ObjectRef::new(&self.namespace, &self.id)
    }
}

impl fmt::Display for SubjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.relation {
            Some(ref relation) => write!(f, "{}:{}#{}", self.namespace, self.id, relation),
            None => write!(f, "{}:{}", self.namespace, self.id),
        }
    }
}

/// A relation tuple: `object#relation@subject`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RelationTuple {
    pub object: ObjectRef,
    pub relation: String,
    pub subject: SubjectRef,
}

impl RelationTuple {
    pub fn new(object: ObjectRef, relation: &str, subject: SubjectRef) -> Self {
        Self {
            object,
            relation: relation.to_string(),
            subject,
        }
    }
}

impl fmt::Display for RelationTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}@{}", self.object, self.relation, self.subject)
    }
}

/// A single permission check query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckRequest {
    pub namespace: String,
    pub object_id: String,
    pub permission: String,
    pub subject: SubjectRef,
    /// Absolute deadline; the engine's default timeout applies when unset.
    #[serde(skip)]
    pub deadline: Option<Instant>,
}

impl CheckRequest {
    pub fn new(namespace: &str, object_id: &str, permission: &str, subject: SubjectRef) -> Self {
        Self {
            namespace: namespace.to_string(),
            object_id: object_id.to_string(),
            permission: permission.to_string(),
            subject,
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

impl fmt::Display for CheckRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}#{}@{}",
            self.namespace, self.object_id, self.permission, self.subject
        )
    }
}

/// Outcome of a check that could be decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResponse {
    pub allowed: bool,
    /// Some branch was cut at the depth bound and counted as denied.
    pub depth_limited: bool,
}

/// Pagination cursor for index reads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub token: Option<String>,
    pub size: usize,
}

impl PageRequest {
    pub fn first(size: usize) -> Self {
        Self { token: None, size }
    }

    pub fn next(size: usize, token: String) -> Self {
        Self {
            token: Some(token),
            size,
        }
    }
}

/// One page of index results. `next_token` is `None` on the last page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_token: Option<String>,
}

impl<T> Page<T> {
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            next_token: None,
        }
    }
}

/// Node kinds in an expansion tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectTreeKind {
    /// A concrete subject.
    Leaf,
    /// Members of a subject set; children are its tuples' subjects.
    Union,
    /// The subject set was already open on this path.
    Cycle,
    /// Expansion stopped at the depth bound.
    DepthLimited,
}

/// Tree of subjects produced by expanding a relation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectTree {
    pub kind: SubjectTreeKind,
    pub subject: SubjectRef,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<SubjectTree>,
}

impl SubjectTree {
    pub fn leaf(subject: SubjectRef) -> Self {
        Self {
            kind: SubjectTreeKind::Leaf,
            subject,
            children: Vec::new(),
        }
    }

    /// Concrete subjects in the tree, depth first, without duplicates.
    pub fn leaves(&self) -> Vec<SubjectRef> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves(&self, out: &mut Vec<SubjectRef>) {
        if self.kind == SubjectTreeKind::Leaf && !out.contains(&self.subject) {
            out.push(self.subject.clone());
        }
        for child in &self.children {
            child.collect_leaves(out);
        }
    }
}

/// Batch of tuple writes and deletes applied together.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WriteRequest {
    pub writes: Vec<RelationTuple>,
    pub deletes: Vec<RelationTuple>,
}
