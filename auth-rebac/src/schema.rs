use crate::error::{CheckError, SchemaError};
use parking_lot::RwLock;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::info;

// =============================================================================
// Schema definitions (load input)
// =============================================================================

/// Uncompiled schema as produced by namespace tooling.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaDefinition {
    pub namespaces: Vec<NamespaceDefinition>,
}

impl SchemaDefinition {
    pub fn from_yaml(document: &str) -> Result<Self, SchemaError> {
        serde_yaml::from_str(document).map_err(|e| SchemaError::InvalidDocument(e.to_string()))
    }

    pub fn from_json(document: &str) -> Result<Self, SchemaError> {
        serde_json::from_str(document).map_err(|e| SchemaError::InvalidDocument(e.to_string()))
    }
}

/// Definition of a namespace (object type)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamespaceDefinition {
    pub name: String,
    #[serde(default)]
    pub relations: Vec<RelationDefinition>,
    #[serde(default)]
    pub permissions: Vec<PermissionDefinition>,
}

impl NamespaceDefinition {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            relations: Vec::new(),
            permissions: Vec::new(),
        }
    }

    pub fn relation(mut self, name: &str, subject_types: Vec<SubjectType>) -> Self {
        self.relations.push(RelationDefinition {
            name: name.to_string(),
            subject_types,
        });
        self
    }

    pub fn permission(mut self, name: &str, expression: Expr) -> Self {
        self.permissions.push(PermissionDefinition {
            name: name.to_string(),
            expression,
        });
        self
    }
}

/// Definition of a relation within a namespace
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationDefinition {
    pub name: String,
    #[serde(default)]
    pub subject_types: Vec<SubjectType>,
}

/// A subject-set type a relation admits: a concrete namespace, or
/// `namespace#relation` for indirect subjects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubjectType {
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation: Option<String>,
}

impl SubjectType {
    pub fn namespace(namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            relation: None,
        }
    }

    pub fn set(namespace: &str, relation: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            relation: Some(relation.to_string()),
        }
    }
}

/// Definition of a permission with its expression
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionDefinition {
    pub name: String,
    pub expression: Expr,
}

/// Permission expression tree.
///
/// Every node kind is monotonic: adding tuples can only turn results to `true`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum Expr {
    /// Membership in a relation of the same object, following subject sets.
    Relation { name: String },
    /// Another permission of the same object.
    Permission { name: String },
    /// Logical OR, evaluated left to right.
    Union { children: Vec<Expr> },
    /// `permission` evaluated on every object related through `relation`.
    Traverse { relation: String, permission: String },
}

impl Expr {
    pub fn relation(name: &str) -> Self {
        Expr::Relation {
            name: name.to_string(),
        }
    }

    pub fn permission(name: &str) -> Self {
        Expr::Permission {
            name: name.to_string(),
        }
    }

    pub fn union(children: Vec<Expr>) -> Self {
        Expr::Union { children }
    }

    pub fn traverse(relation: &str, permission: &str) -> Self {
        Expr::Traverse {
            relation: relation.to_string(),
            permission: permission.to_string(),
        }
    }

    /// Relation names read directly on the checked object.
    pub fn relation_leaves(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.walk(&mut |node| match node {
            Expr::Relation { name } => out.push(name.as_str()),
            Expr::Traverse { relation, .. } => out.push(relation.as_str()),
            _ => {}
        });
        out
    }

    fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Expr)) {
        visit(self);
        if let Expr::Union { children } = self {
            for child in children {
                child.walk(visit);
            }
        }
    }
}

// =============================================================================
// Compiled schema
// =============================================================================

/// Compiled, read-only schema snapshot.
#[derive(Debug, Clone)]
pub struct Schema {
    namespaces: HashMap<String, Namespace>,
}

/// Compiled namespace
#[derive(Debug, Clone)]
pub struct Namespace {
    pub name: String,
    relations: HashMap<String, Relation>,
    permissions: HashMap<String, Permission>,
}

/// Compiled relation
#[derive(Debug, Clone)]
pub struct Relation {
    pub name: String,
    pub subject_types: Vec<SubjectType>,
}

/// Compiled permission
#[derive(Debug, Clone)]
pub struct Permission {
    pub name: String,
    pub expression: Expr,
}

/// What a name inside a namespace refers to.
#[derive(Debug, Clone, Copy)]
pub enum Member<'a> {
    Relation(&'a Relation),
    Permission(&'a Permission),
}

impl Namespace {
    pub fn relation(&self, name: &str) -> Option<&Relation> {
        self.relations.get(name)
    }

    pub fn permission(&self, name: &str) -> Option<&Permission> {
        self.permissions.get(name)
    }

    pub fn member(&self, name: &str) -> Option<Member<'_>> {
        if let Some(relation) = self.relations.get(name) {
            return Some(Member::Relation(relation));
        }
        self.permissions.get(name).map(Member::Permission)
    }

    pub fn relations(&self) -> impl Iterator<Item = &Relation> {
        self.relations.values()
    }

    fn declares(&self, name: &str) -> bool {
        self.relations.contains_key(name) || self.permissions.contains_key(name)
    }
}

impl Schema {
    /// Compile a definition, collecting every error rather than stopping at the first.
    pub fn compile(definition: SchemaDefinition) -> Result<Self, Vec<SchemaError>> {
        let mut errors = Vec::new();
        let mut namespaces: HashMap<String, Namespace> = HashMap::new();

        for ns_def in definition.namespaces {
            if namespaces.contains_key(&ns_def.name) {
                errors.push(SchemaError::DuplicateNamespace(ns_def.name));
                continue;
            }

            let mut namespace = Namespace {
                name: ns_def.name.clone(),
                relations: HashMap::new(),
                permissions: HashMap::new(),
            };

            for rel in ns_def.relations {
                if namespace.declares(&rel.name) {
                    errors.push(SchemaError::DuplicateDeclaration {
                        namespace: ns_def.name.clone(),
                        name: rel.name,
                    });
                    continue;
                }
                namespace.relations.insert(
                    rel.name.clone(),
                    Relation {
                        name: rel.name,
                        subject_types: rel.subject_types,
                    },
                );
            }

            for perm in ns_def.permissions {
                if namespace.declares(&perm.name) {
                    errors.push(SchemaError::DuplicateDeclaration {
                        namespace: ns_def.name.clone(),
                        name: perm.name,
                    });
                    continue;
                }
                namespace.permissions.insert(
                    perm.name.clone(),
                    Permission {
                        name: perm.name,
                        expression: perm.expression,
                    },
                );
            }

            namespaces.insert(ns_def.name, namespace);
        }

        let schema = Self { namespaces };
        schema.validate_subject_types(&mut errors);
        schema.validate_expressions(&mut errors);
        schema.validate_permission_cycles(&mut errors);

        if errors.is_empty() {
            Ok(schema)
        } else {
            Err(errors)
        }
    }

    /// Expression tree of `namespace#permission`.
    pub fn resolve(&self, namespace: &str, permission: &str) -> Result<&Expr, CheckError> {
        self.namespace(namespace)?
            .permission(permission)
            .map(|p| &p.expression)
            .ok_or_else(|| CheckError::UnknownPermission {
                namespace: namespace.to_string(),
                permission: permission.to_string(),
            })
    }

    /// Allowed subject-set types of `namespace#relation`.
    pub fn relation(&self, namespace: &str, relation: &str) -> Option<&[SubjectType]> {
        self.namespaces
            .get(namespace)?
            .relation(relation)
            .map(|r| r.subject_types.as_slice())
    }

    pub fn namespace(&self, name: &str) -> Result<&Namespace, CheckError> {
        self.namespaces
            .get(name)
            .ok_or_else(|| CheckError::UnknownNamespace(name.to_string()))
    }

    pub fn namespace_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.namespaces.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Distinct `(namespace, relation)` subject sets admitted by any relation.
    pub fn subject_set_types(&self) -> Vec<(&str, &str)> {
        let mut sets: Vec<(&str, &str)> = self
            .namespaces
            .values()
            .flat_map(Namespace::relations)
            .flat_map(|r| r.subject_types.iter())
            .filter_map(|st| st.relation.as_deref().map(|rel| (st.namespace.as_str(), rel)))
            .collect();
        sets.sort_unstable();
        sets.dedup();
        sets
    }

    fn validate_subject_types(&self, errors: &mut Vec<SchemaError>) {
        for namespace in self.namespaces.values() {
            for relation in namespace.relations.values() {
                for subject_type in &relation.subject_types {
                    let Some(target) = self.namespaces.get(&subject_type.namespace) else {
                        errors.push(SchemaError::UnknownSubjectNamespace {
                            namespace: namespace.name.clone(),
                            relation: relation.name.clone(),
                            subject_namespace: subject_type.namespace.clone(),
                        });
                        continue;
                    };
                    if let Some(ref subject_relation) = subject_type.relation {
                        if !target.declares(subject_relation) {
                            errors.push(SchemaError::UnknownSubjectRelation {
                                namespace: namespace.name.clone(),
                                relation: relation.name.clone(),
                                subject_namespace: subject_type.namespace.clone(),
                                subject_relation: subject_relation.clone(),
                            });
                        }
                    }
                }
            }
        }
    }

    fn validate_expressions(&self, errors: &mut Vec<SchemaError>) {
        for namespace in self.namespaces.values() {
            for permission in namespace.permissions.values() {
                permission.expression.walk(&mut |node| match node {
                    Expr::Relation { name } if namespace.relation(name).is_none() => {
                        errors.push(SchemaError::UnresolvedRelation {
                            namespace: namespace.name.clone(),
                            permission: permission.name.clone(),
                            relation: name.clone(),
                        });
                    }
                    Expr::Permission { name } if namespace.permission(name).is_none() => {
                        errors.push(SchemaError::UnresolvedPermission {
                            namespace: namespace.name.clone(),
                            permission: permission.name.clone(),
                            reference: name.clone(),
                        });
                    }
                    Expr::Traverse {
                        relation,
                        permission: target,
                    } => match namespace.relation(relation) {
                        None => errors.push(SchemaError::UnresolvedRelation {
                            namespace: namespace.name.clone(),
                            permission: permission.name.clone(),
                            relation: relation.clone(),
                        }),
                        Some(rel) => {
                            let reachable = rel.subject_types.iter().any(|st| {
                                self.namespaces
                                    .get(&st.namespace)
                                    .is_some_and(|ns| ns.permission(target).is_some())
                            });
                            if !reachable {
                                errors.push(SchemaError::UnresolvedPermission {
                                    namespace: namespace.name.clone(),
                                    permission: permission.name.clone(),
                                    reference: target.clone(),
                                });
                            }
                        }
                    },
                    _ => {}
                });
            }
        }
    }

    /// Reject permissions that only reference each other in a loop.
    ///
    /// A permission is grounded if it reads a relation directly or references a
    /// grounded permission. Ungrounded permissions on a reference cycle would always
    /// evaluate to `false` and are almost certainly a typo.
    fn validate_permission_cycles(&self, errors: &mut Vec<SchemaError>) {
        for namespace in self.namespaces.values() {
            let mut graph: DiGraph<&str, ()> = DiGraph::new();
            let mut nodes: HashMap<&str, NodeIndex> = HashMap::new();
            for name in namespace.permissions.keys() {
                nodes.insert(name.as_str(), graph.add_node(name.as_str()));
            }

            let mut grounded: HashSet<&str> = HashSet::new();
            for permission in namespace.permissions.values() {
                let Some(&from) = nodes.get(permission.name.as_str()) else {
                    continue;
                };
                permission.expression.walk(&mut |node| match node {
                    Expr::Permission { name } => {
                        if let Some(&to) = nodes.get(name.as_str()) {
                            graph.add_edge(from, to, ());
                        }
                    }
                    Expr::Relation { .. } | Expr::Traverse { .. } => {
                        grounded.insert(permission.name.as_str());
                    }
                    Expr::Union { .. } => {}
                });
            }

            loop {
                let before = grounded.len();
                for index in graph.node_indices() {
                    let name = graph[index];
                    if !grounded.contains(name)
                        && graph.neighbors(index).any(|n| grounded.contains(graph[n]))
                    {
                        grounded.insert(name);
                    }
                }
                if grounded.len() == before {
                    break;
                }
            }

            for component in tarjan_scc(&graph) {
                let cyclic = component.len() > 1
                    || component
                        .first()
                        .is_some_and(|&n| graph.contains_edge(n, n));
                if !cyclic {
                    continue;
                }
                let mut names: Vec<&str> = component.iter().map(|&n| graph[n]).collect();
                names.sort_unstable();
                for name in names {
                    if !grounded.contains(name) {
                        errors.push(SchemaError::CyclicPermission {
                            namespace: namespace.name.clone(),
                            permission: name.to_string(),
                        });
                    }
                }
            }
        }
    }
}

// =============================================================================
// Snapshot handle
// =============================================================================

/// Shared pointer to the active schema.
///
/// Readers take an `Arc` snapshot and keep using it for the whole query, so a
/// reload never exposes a partially updated model.
#[derive(Debug)]
pub struct SchemaHandle {
    current: RwLock<Arc<Schema>>,
}

impl SchemaHandle {
    pub fn new(schema: Schema) -> Self {
        Self {
            current: RwLock::new(Arc::new(schema)),
        }
    }

    pub fn snapshot(&self) -> Arc<Schema> {
        self.current.read().clone()
    }

    /// Replace the active schema, returning the previous snapshot.
    pub fn replace(&self, schema: Schema) -> Arc<Schema> {
        let namespaces = schema.namespaces.len();
        let previous = std::mem::replace(&mut *self.current.write(), Arc::new(schema));
        info!(namespaces, "Activated new schema snapshot");
        previous
    }
}
