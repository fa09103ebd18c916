use crate::{
    check::PermissionChecker,
    config::EngineConfig,
    error::{CheckError, SchemaError},
    expand::SubjectTreeExpander,
    index::TupleIndex,
    models::*,
    profile_service,
    schema::{Expr, Member, Schema, SchemaDefinition, SchemaHandle},
};
use ahash::AHashSet;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, error, info};

/// Relationship-based authorization engine.
///
/// Holds the active schema snapshot and the tuple index. Checks are independent:
/// each one evaluates against the snapshot taken when it started and keeps its own
/// path, depth and memo state, so any number may run concurrently.
pub struct AuthorizationEngine {
    /// Read side of the tuple store
    index: Arc<dyn TupleIndex>,

    /// Active schema, replaced atomically on reload
    schema: SchemaHandle,

    /// Expression interpreter for checks
    checker: PermissionChecker,

    /// Subject tree builder for expand requests
    expander: SubjectTreeExpander,

    config: EngineConfig,
}

impl AuthorizationEngine {
    /// Create an engine over `index` with an already compiled schema
    pub fn new(index: Arc<dyn TupleIndex>, schema: Schema) -> Self {
        Self::with_config(index, schema, EngineConfig::default())
    }

    pub fn with_config(index: Arc<dyn TupleIndex>, schema: Schema, config: EngineConfig) -> Self {
        let checker = PermissionChecker::new(Arc::clone(&index), config.clone());
        let expander = SubjectTreeExpander::new(Arc::clone(&index), config.page_size);
        Self {
            index,
            schema: SchemaHandle::new(schema),
            checker,
            expander,
            config,
        }
    }

    /// Engine loaded with the profile service namespaces
    pub fn profile_service(
        index: Arc<dyn TupleIndex>,
        config: EngineConfig,
    ) -> Result<Self, Vec<SchemaError>> {
        let schema = Schema::compile(profile_service::definition())?;
        Ok(Self::with_config(index, schema, config))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // =============================================================================
    // Core Authorization Operations
    // =============================================================================

    /// Check if `subject_namespace:subject_id` holds `permission` on
    /// `namespace:object_id`.
    ///
    /// `Ok(false)` is a denial. An error means the answer is unknown and must not
    /// be treated as one.
    pub async fn check(
        &self,
        namespace: &str,
        object_id: &str,
        permission: &str,
        subject_namespace: &str,
        subject_id: &str,
        deadline: Option<Instant>,
    ) -> Result<bool, CheckError> {
        let mut request = CheckRequest::new(
            namespace,
            object_id,
            permission,
            SubjectRef::id(subject_namespace, subject_id),
        );
        request.deadline = deadline;
        Ok(self.check_request(&request).await?.allowed)
    }

    /// Check a prepared request
    pub async fn check_request(&self, request: &CheckRequest) -> Result<CheckResponse, CheckError> {
        let schema = self.schema.snapshot();
        match self.checker.check(schema, request).await {
            Ok(response) => Ok(response),
            Err(err) => {
                error!(check = %request, error = %err, "Check failed");
                Err(err)
            }
        }
    }

    /// A caller acting on its own profile is allowed without a lookup.
    pub async fn check_self_or(
        &self,
        caller_profile_id: &str,
        target_profile_id: &str,
        request: &CheckRequest,
    ) -> Result<bool, CheckError> {
        if !caller_profile_id.is_empty() && caller_profile_id == target_profile_id {
            debug!(profile = caller_profile_id, "Self access granted");
            return Ok(true);
        }
        Ok(self.check_request(request).await?.allowed)
    }

    /// Evaluate several checks; each one succeeds or fails on its own.
    pub async fn batch_check(
        &self,
        requests: Vec<CheckRequest>,
    ) -> Vec<Result<CheckResponse, CheckError>> {
        let mut responses = Vec::with_capacity(requests.len());
        for request in &requests {
            responses.push(self.check_request(request).await);
        }
        responses
    }

    // =============================================================================
    // Expansion
    // =============================================================================

    /// Tree of subjects holding `relation` on `namespace:object_id`
    pub async fn expand(
        &self,
        namespace: &str,
        object_id: &str,
        relation: &str,
        max_depth: Option<u32>,
    ) -> Result<SubjectTree, CheckError> {
        let schema = self.schema.snapshot();
        if schema.namespace(namespace)?.relation(relation).is_none() {
            return Err(CheckError::UnknownPermission {
                namespace: namespace.to_string(),
                permission: relation.to_string(),
            });
        }

        let max_depth = max_depth
            .unwrap_or(self.config.max_depth)
            .min(self.config.max_depth);
        let deadline = Instant::now() + self.config.default_timeout();
        self.expander
            .expand(&ObjectRef::new(namespace, object_id), relation, max_depth, deadline)
            .await
    }

    /// Ids of objects in `namespace` on which `subject` holds `permission`.
    ///
    /// Candidates come from reverse index lookups on the permission's relation
    /// leaves for the subject and every subject set containing it; each candidate
    /// is then confirmed with a full check.
    pub async fn list_objects(
        &self,
        namespace: &str,
        permission: &str,
        subject: &SubjectRef,
    ) -> Result<Vec<String>, CheckError> {
        let schema = self.schema.snapshot();
        let ns = schema.namespace(namespace)?;
        if ns.member(permission).is_none() {
            return Err(CheckError::UnknownPermission {
                namespace: namespace.to_string(),
                permission: permission.to_string(),
            });
        }

        let deadline = Instant::now() + self.config.default_timeout();
        let containing = self.containing_sets(&schema, subject, deadline).await?;

        let mut candidates = BTreeSet::new();
        for relation in relation_leaves(&schema, namespace, permission) {
            for holder in &containing {
                candidates.extend(
                    self.reverse_lookup(namespace, &relation, holder, deadline)
                        .await?,
                );
            }
        }

        let mut allowed = Vec::new();
        for object_id in candidates {
            let request = CheckRequest::new(namespace, &object_id, permission, subject.clone())
                .with_deadline(deadline);
            if self.checker.check(Arc::clone(&schema), &request).await?.allowed {
                allowed.push(object_id);
            }
        }
        Ok(allowed)
    }

    /// `subject` plus every subject set it may be a member of, following the
    /// subject-set types the schema declares.
    ///
    /// A set naming a permission has no tuples of its own, so it is reached through
    /// the relation leaves of that permission. Sets found that way are candidates
    /// only; `list_objects` confirms every object with a full check.
    async fn containing_sets(
        &self,
        schema: &Schema,
        subject: &SubjectRef,
        deadline: Instant,
    ) -> Result<Vec<SubjectRef>, CheckError> {
        let set_types: Vec<(&str, &str, Vec<String>)> = schema
            .subject_set_types()
            .into_iter()
            .map(|(namespace, name)| {
                (namespace, name, relation_leaves(schema, namespace, name))
            })
            .collect();

        let mut seen: AHashSet<SubjectRef> = AHashSet::new();
        seen.insert(subject.clone());
        let mut found = vec![subject.clone()];
        let mut frontier = vec![subject.clone()];

        for _ in 0..self.config.max_depth {
            let mut next = Vec::new();
            for holder in &frontier {
                for (set_namespace, set_name, leaves) in &set_types {
                    for leaf in leaves {
                        for id in self
                            .reverse_lookup(set_namespace, leaf, holder, deadline)
                            .await?
                        {
                            let set = SubjectRef::set(set_namespace, &id, set_name);
                            if seen.insert(set.clone()) {
                                found.push(set.clone());
                                next.push(set);
                            }
                        }
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }
        Ok(found)
    }

    async fn reverse_lookup(
        &self,
        namespace: &str,
        relation: &str,
        subject: &SubjectRef,
        deadline: Instant,
    ) -> Result<Vec<String>, CheckError> {
        let mut ids = Vec::new();
        let mut request = PageRequest::first(self.config.page_size);
        loop {
            let lookup = self.index.list_objects(namespace, relation, subject, request);
            let page = match timeout_at(deadline, lookup).await {
                Ok(page) => page?,
                Err(_) => {
                    return Err(CheckError::StoreUnavailable(
                        "deadline exceeded during reverse lookup".to_string(),
                    ))
                }
            };
            ids.extend(page.items);
            match page.next_token {
                Some(token) => request = PageRequest::next(self.config.page_size, token),
                None => return Ok(ids),
            }
        }
    }

    // =============================================================================
    // Schema Management
    // =============================================================================

    /// Get the current schema
    pub fn schema(&self) -> Arc<Schema> {
        self.schema.snapshot()
    }

    /// Compile and activate a new schema. On failure the active schema is kept.
    pub fn reload_schema(&self, definition: SchemaDefinition) -> Result<(), Vec<SchemaError>> {
        match Schema::compile(definition) {
            Ok(schema) => {
                self.schema.replace(schema);
                Ok(())
            }
            Err(errors) => {
                for err in &errors {
                    error!(error = %err, "Schema rejected");
                }
                info!(errors = errors.len(), "Keeping active schema after failed reload");
                Err(errors)
            }
        }
    }
}

/// Relations read on the checked object by `name`, following same-object
/// permission references.
fn relation_leaves(schema: &Schema, namespace: &str, name: &str) -> Vec<String> {
    let Ok(ns) = schema.namespace(namespace) else {
        return Vec::new();
    };
    let mut leaves = Vec::new();
    let mut pending = vec![name.to_string()];
    let mut seen = AHashSet::new();

    while let Some(current) = pending.pop() {
        if !seen.insert(current.clone()) {
            continue;
        }
        match ns.member(&current) {
            Some(Member::Relation(relation)) => leaves.push(relation.name.clone()),
            Some(Member::Permission(permission)) => {
                collect_references(&permission.expression, &mut leaves, &mut pending);
            }
            None => {}
        }
    }
    leaves.sort();
    leaves.dedup();
    leaves
}

fn collect_references(expr: &Expr, leaves: &mut Vec<String>, pending: &mut Vec<String>) {
    match expr {
        Expr::Relation { name } | Expr::Permission { name } => pending.push(name.clone()),
        Expr::Union { children } => {
            for child in children {
                collect_references(child, leaves, pending);
            }
        }
        Expr::Traverse { relation, .. } => leaves.push(relation.clone()),
    }
}
