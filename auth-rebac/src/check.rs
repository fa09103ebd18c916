use crate::{
    config::{DepthPolicy, EngineConfig},
    context::{BoxFuture, EvalContext, NodeKey},
    error::CheckError,
    expand::{read_subjects_page, UsersetExpander},
    index::TupleIndex,
    models::*,
    schema::{Expr, Member, Schema},
};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Permission checker evaluates permission expressions with support for:
/// - Direct relation membership
/// - Indirect subjects (subject sets), expanded recursively
/// - Permissions referencing other permissions of the same object
/// - Permissions evaluated through related objects
///
/// Every relation and permission node goes through one guard that tracks the
/// current path, the depth bound, the deadline and the per-query memo table.
pub struct PermissionChecker {
    index: Arc<dyn TupleIndex>,
    config: EngineConfig,
}

impl PermissionChecker {
    pub fn new(index: Arc<dyn TupleIndex>, config: EngineConfig) -> Self {
        Self { index, config }
    }

    pub(crate) fn index(&self) -> &dyn TupleIndex {
        self.index.as_ref()
    }

    pub(crate) fn page_size(&self) -> usize {
        self.config.page_size
    }

    /// Check `request` against the given schema snapshot.
    pub async fn check(
        &self,
        schema: Arc<Schema>,
        request: &CheckRequest,
    ) -> Result<CheckResponse, CheckError> {
        let namespace = schema.namespace(&request.namespace)?;
        if namespace.member(&request.permission).is_none() {
            return Err(CheckError::UnknownPermission {
                namespace: request.namespace.clone(),
                permission: request.permission.clone(),
            });
        }

        let deadline = request
            .deadline
            .unwrap_or_else(|| Instant::now() + self.config.default_timeout());
        let mut ctx = EvalContext::new(
            Arc::clone(&schema),
            request.subject.clone(),
            deadline,
            self.config.max_depth,
        );

        let object = ObjectRef::new(&request.namespace, &request.object_id);
        let allowed = self
            .evaluate_member(&mut ctx, &object, &request.permission)
            .await?;

        if ctx.depth_hits > 0 {
            warn!(
                check = %request,
                allowed,
                branches = ctx.depth_hits,
                max_depth = self.config.max_depth,
                "Check cut branches at the depth bound"
            );
        }
        debug!(check = %request, allowed, lookups = ctx.lookups, "Check completed");

        Ok(CheckResponse {
            allowed,
            depth_limited: ctx.depth_hits > 0,
        })
    }

    /// Evaluate relation or permission `name` on `object` for the context subject.
    ///
    /// A node already open on the current path evaluates to `false`. Names the
    /// schema does not know are looked up as plain relations.
    pub(crate) fn evaluate_member<'a>(
        &'a self,
        ctx: &'a mut EvalContext,
        object: &'a ObjectRef,
        name: &'a str,
    ) -> BoxFuture<'a, Result<bool, CheckError>> {
        Box::pin(async move {
            ctx.check_deadline()?;

            let key = NodeKey::new(&object.namespace, &object.id, name);
            if let Some(allowed) = ctx.memoized(&key) {
                return Ok(allowed);
            }

            if let Some(open_at) = ctx.open_depth(&key) {
                debug!(node = %key, "Cycle detected, branch denied");
                ctx.cut_cycle(open_at);
                return Ok(false);
            }

            if ctx.at_depth_limit() {
                ctx.depth_hits += 1;
                warn!(
                    node = %key,
                    max_depth = ctx.max_depth,
                    "Maximum recursion depth exceeded"
                );
                return match self.config.depth_policy {
                    DepthPolicy::Deny => Ok(false),
                    DepthPolicy::Error => Err(CheckError::DepthExceeded {
                        max_depth: ctx.max_depth,
                    }),
                };
            }

            let depth = ctx.enter(&key);
            debug!(node = %key, depth, "Evaluating");
            let hits_before = ctx.depth_hits;
            let floor_before = std::mem::replace(&mut ctx.cycle_floor, u32::MAX);

            let schema = Arc::clone(&ctx.schema);
            let member = schema
                .namespace(&object.namespace)
                .ok()
                .and_then(|ns| ns.member(name));
            let result = match member {
                Some(Member::Permission(permission)) => {
                    self.evaluate_expr(ctx, object, &permission.expression).await
                }
                Some(Member::Relation(_)) | None => {
                    UsersetExpander::new(self)
                        .relation_contains(ctx, object, name)
                        .await
                }
            };

            ctx.leave(&key);
            let floor = ctx.cycle_floor;
            ctx.cycle_floor = floor_before.min(floor);
            let allowed = result?;

            // Denials are cached only when no depth cut and no cycle cut to an
            // ancestor still open contributed to them.
            if allowed || (ctx.depth_hits == hits_before && floor >= depth) {
                ctx.remember(key, allowed);
            }
            Ok(allowed)
        })
    }

    /// Interpret an expression node. Unions short-circuit left to right.
    fn evaluate_expr<'a>(
        &'a self,
        ctx: &'a mut EvalContext,
        object: &'a ObjectRef,
        expr: &'a Expr,
    ) -> BoxFuture<'a, Result<bool, CheckError>> {
        Box::pin(async move {
            match expr {
                Expr::Relation { name } | Expr::Permission { name } => {
                    self.evaluate_member(ctx, object, name).await
                }
                Expr::Union { children } => {
                    for child in children {
                        if self.evaluate_expr(ctx, object, child).await? {
                            return Ok(true);
                        }
                    }
                    Ok(false)
                }
                Expr::Traverse {
                    relation,
                    permission,
                } => self.evaluate_traverse(ctx, object, relation, permission).await,
            }
        })
    }

    /// `permission` on any object related to `object` through `relation`.
    async fn evaluate_traverse(
        &self,
        ctx: &mut EvalContext,
        object: &ObjectRef,
        relation: &str,
        permission: &str,
    ) -> Result<bool, CheckError> {
        let mut request = PageRequest::first(self.config.page_size);
        loop {
            ctx.check_deadline()?;
            ctx.lookups += 1;
            let page =
                read_subjects_page(self.index(), object, relation, request, ctx.deadline).await?;

            for tuple in &page.items {
                let target = tuple.subject.object();
                if self.evaluate_member(ctx, &target, permission).await? {
                    return Ok(true);
                }
            }

            match page.next_token {
                Some(token) => request = PageRequest::next(self.config.page_size, token),
                None => return Ok(false),
            }
        }
    }
}
