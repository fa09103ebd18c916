use crate::{
    check::PermissionChecker,
    context::{BoxFuture, EvalContext, NodeKey},
    error::{CheckError, IndexError},
    index::TupleIndex,
    models::*,
};
use ahash::AHashSet;
use std::sync::Arc;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, error};

/// Read one page of `namespace:object_id#relation`, bounded by `deadline`.
pub(crate) async fn read_subjects_page(
    index: &dyn TupleIndex,
    object: &ObjectRef,
    relation: &str,
    page: PageRequest,
    deadline: Instant,
) -> Result<Page<RelationTuple>, CheckError> {
    let lookup = index.list_subjects(&object.namespace, &object.id, relation, page);
    match timeout_at(deadline, lookup).await {
        Ok(Ok(page)) => Ok(page),
        Ok(Err(err)) => {
            error!(object = %object, relation, error = %err, "Tuple index lookup failed");
            Err(err.into())
        }
        Err(_) => {
            error!(object = %object, relation, "Tuple index lookup hit the check deadline");
            Err(IndexError::Timeout.into())
        }
    }
}

/// Resolves relation membership through indirect subjects.
///
/// A tuple whose subject is `namespace:id#relation` is expanded into the sub-check
/// "does the query subject hold `relation` on `namespace:id`", which re-enters the
/// checker with the same context so the path guard and depth bound still apply.
pub struct UsersetExpander<'a> {
    checker: &'a PermissionChecker,
}

impl<'a> UsersetExpander<'a> {
    pub(crate) fn new(checker: &'a PermissionChecker) -> Self {
        Self { checker }
    }

    /// Whether the context subject holds `relation` on `object`.
    pub(crate) async fn relation_contains(
        &self,
        ctx: &mut EvalContext,
        object: &ObjectRef,
        relation: &str,
    ) -> Result<bool, CheckError> {
        let page_size = self.checker.page_size();
        let mut request = PageRequest::first(page_size);

        loop {
            ctx.check_deadline()?;
            ctx.lookups += 1;
            let page = read_subjects_page(
                self.checker.index(),
                object,
                relation,
                request,
                ctx.deadline,
            )
            .await?;

            if page.items.iter().any(|tuple| tuple.subject == ctx.subject) {
                debug!(object = %object, relation, "Direct membership found");
                return Ok(true);
            }

            for tuple in &page.items {
                if tuple.subject.is_set() && self.expand(ctx, &tuple.subject).await? {
                    return Ok(true);
                }
            }

            match page.next_token {
                Some(token) => request = PageRequest::next(page_size, token),
                None => return Ok(false),
            }
        }
    }

    /// Whether the context subject is a member of the subject set `set`.
    pub(crate) async fn expand(
        &self,
        ctx: &mut EvalContext,
        set: &SubjectRef,
    ) -> Result<bool, CheckError> {
        let Some(ref relation) = set.relation else {
            return Ok(*set == ctx.subject);
        };
        debug!(subject_set = %set, "Expanding subject set");
        self.checker
            .evaluate_member(ctx, &set.object(), relation)
            .await
    }
}

/// Builds subject trees for a relation, following subject sets through tuples.
pub struct SubjectTreeExpander {
    index: Arc<dyn TupleIndex>,
    page_size: usize,
}

impl SubjectTreeExpander {
    pub fn new(index: Arc<dyn TupleIndex>, page_size: usize) -> Self {
        Self { index, page_size }
    }

    /// Expand all subjects that hold `relation` on `object`.
    pub async fn expand(
        &self,
        object: &ObjectRef,
        relation: &str,
        max_depth: u32,
        deadline: Instant,
    ) -> Result<SubjectTree, CheckError> {
        let mut visited = AHashSet::new();
        let root = object.subject_set(relation);
        self.expand_recursive(root, &mut visited, 0, max_depth, deadline)
            .await
    }

    fn expand_recursive<'a>(
        &'a self,
        set: SubjectRef,
        visited: &'a mut AHashSet<NodeKey>,
        depth: u32,
        max_depth: u32,
        deadline: Instant,
    ) -> BoxFuture<'a, Result<SubjectTree, CheckError>> {
        Box::pin(async move {
            let Some(relation) = set.relation.clone() else {
                return Ok(SubjectTree::leaf(set));
            };

            if depth >= max_depth {
                return Ok(SubjectTree {
                    kind: SubjectTreeKind::DepthLimited,
                    subject: set,
                    children: Vec::new(),
                });
            }

            let key = NodeKey::new(&set.namespace, &set.id, &relation);
            if !visited.insert(key.clone()) {
                return Ok(SubjectTree {
                    kind: SubjectTreeKind::Cycle,
                    subject: set,
                    children: Vec::new(),
                });
            }

            debug!("Expanding: {}", set);

            let object = set.object();
            let mut children = Vec::new();
            let mut request = PageRequest::first(self.page_size);
            loop {
                if Instant::now() >= deadline {
                    visited.remove(&key);
                    return Err(CheckError::StoreUnavailable(
                        "deadline exceeded during expansion".to_string(),
                    ));
                }
                let page = match read_subjects_page(
                    self.index.as_ref(),
                    &object,
                    &relation,
                    request,
                    deadline,
                )
                .await
                {
                    Ok(page) => page,
                    Err(err) => {
                        visited.remove(&key);
                        return Err(err);
                    }
                };

                for tuple in page.items {
                    let child = self
                        .expand_recursive(tuple.subject, visited, depth + 1, max_depth, deadline)
                        .await;
                    match child {
                        Ok(child) => children.push(child),
                        Err(err) => {
                            visited.remove(&key);
                            return Err(err);
                        }
                    }
                }

                match page.next_token {
                    Some(token) => request = PageRequest::next(self.page_size, token),
                    None => break,
                }
            }

            visited.remove(&key);
            Ok(SubjectTree {
                kind: SubjectTreeKind::Union,
                subject: set,
                children,
            })
        })
    }
}
