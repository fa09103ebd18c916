//! Integration tests for the check engine
//!
//! These tests exercise the engine end to end against the profile service schema:
//! 1. Permission composition (`devices_view` includes `devices_manage`)
//! 2. Indirect subjects through nested tenancies
//! 3. Cyclic tenancy membership
//! 4. Store failures surfaced as errors
//! 5. Deadlines
//! 6. Schema reload while checks are running
//! 7. Expand, list objects and batch checks

use async_trait::async_trait;
use auth_rebac::profile_service::*;
use auth_rebac::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

fn create_test_engine() -> (Arc<InMemoryTupleIndex>, Arc<AuthorizationEngine>) {
    let index = Arc::new(InMemoryTupleIndex::new());
    let engine =
        AuthorizationEngine::profile_service(index.clone(), EngineConfig::default()).unwrap();
    (index, Arc::new(engine))
}

async fn can(engine: &AuthorizationEngine, tenancy: &str, permission: &str, profile: &str) -> bool {
    engine
        .check(
            NAMESPACE_SERVICE_PROFILE,
            tenancy,
            permission,
            NAMESPACE_PROFILE_USER,
            profile,
            None,
        )
        .await
        .unwrap()
}

fn tenancy_member(tenancy: &str, subject: SubjectRef) -> RelationTuple {
    RelationTuple::new(
        ObjectRef::new(NAMESPACE_TENANCY_ACCESS, tenancy),
        ROLE_MEMBER,
        subject,
    )
}

fn service_from_tenancy(profile: &str, tenancy: &str) -> RelationTuple {
    RelationTuple::new(
        ObjectRef::new(NAMESPACE_SERVICE_PROFILE, profile),
        ROLE_SERVICE,
        SubjectRef::set(NAMESPACE_TENANCY_ACCESS, tenancy, ROLE_MEMBER),
    )
}

/// Index that fails every lookup of one relation.
struct UnavailableRelation {
    inner: InMemoryTupleIndex,
    relation: &'static str,
}

#[async_trait]
impl TupleIndex for UnavailableRelation {
    async fn list_subjects(
        &self,
        namespace: &str,
        object_id: &str,
        relation: &str,
        page: PageRequest,
    ) -> Result<Page<RelationTuple>, IndexError> {
        if relation == self.relation {
            return Err(IndexError::Unavailable("replica lagging".into()));
        }
        self.inner.list_subjects(namespace, object_id, relation, page).await
    }

    async fn list_objects(
        &self,
        namespace: &str,
        relation: &str,
        subject: &SubjectRef,
        page: PageRequest,
    ) -> Result<Page<String>, IndexError> {
        self.inner.list_objects(namespace, relation, subject, page).await
    }
}

/// Index whose lookups take `delay` each.
struct SlowIndex {
    inner: InMemoryTupleIndex,
    delay: Duration,
}

#[async_trait]
impl TupleIndex for SlowIndex {
    async fn list_subjects(
        &self,
        namespace: &str,
        object_id: &str,
        relation: &str,
        page: PageRequest,
    ) -> Result<Page<RelationTuple>, IndexError> {
        tokio::time::sleep(self.delay).await;
        self.inner.list_subjects(namespace, object_id, relation, page).await
    }

    async fn list_objects(
        &self,
        namespace: &str,
        relation: &str,
        subject: &SubjectRef,
        page: PageRequest,
    ) -> Result<Page<String>, IndexError> {
        tokio::time::sleep(self.delay).await;
        self.inner.list_objects(namespace, relation, subject, page).await
    }
}

// ============================================================================
// Composition
// ============================================================================

#[tokio::test]
async fn test_view_includes_manage_but_not_reverse() {
    let (index, engine) = create_test_engine();
    index.write_tuple(role_tuple("t1", ROLE_OPERATOR, "sam"));

    assert!(can(&engine, "t1", PERMISSION_DEVICES_VIEW, "sam").await);
    assert!(!can(&engine, "t1", PERMISSION_DEVICES_MANAGE, "sam").await);

    // An admin manages and therefore views.
    index.write_tuple(role_tuple("t1", ROLE_ADMIN, "ada"));
    assert!(can(&engine, "t1", PERMISSION_DEVICES_MANAGE, "ada").await);
    assert!(can(&engine, "t1", PERMISSION_DEVICES_VIEW, "ada").await);

    // Grants are per object.
    assert!(!can(&engine, "t2", PERMISSION_DEVICES_VIEW, "sam").await);
}

#[tokio::test]
async fn test_granted_relation_only_grants_its_permit() {
    let (index, engine) = create_test_engine();
    index.write_tuple(role_tuple("t1", "granted_settings_view", "gus"));

    assert!(can(&engine, "t1", PERMISSION_SETTINGS_VIEW, "gus").await);
    assert!(!can(&engine, "t1", PERMISSION_SETTINGS_MANAGE, "gus").await);
    assert!(!can(&engine, "t1", PERMISSION_PROFILE_VIEW, "gus").await);
}

// ============================================================================
// Indirect subjects
// ============================================================================

#[tokio::test]
async fn test_transitive_tenancy_membership() {
    let (index, engine) = create_test_engine();

    // service_profile:p1#service@tenancy_access:t1#member
    // tenancy_access:t1#member@tenancy_access:t2#member
    // tenancy_access:t2#member@profile_user:sue
    index.write_tuple(service_from_tenancy("p1", "t1"));
    index.write_tuple(tenancy_member(
        "t1",
        SubjectRef::set(NAMESPACE_TENANCY_ACCESS, "t2", ROLE_MEMBER),
    ));
    index.write_tuple(access_tuple("t2", "sue"));

    assert!(can(&engine, "p1", PERMISSION_PROFILE_VIEW, "sue").await);
    assert!(can(&engine, "p1", PERMISSION_PROFILES_MERGE, "sue").await);
    assert!(!can(&engine, "p1", PERMISSION_PROFILE_VIEW, "tom").await);
}

#[tokio::test]
async fn test_subject_set_query_matches_identical_set() {
    let (index, engine) = create_test_engine();
    index.write_tuple(service_from_tenancy("p1", "t1"));

    let request = CheckRequest::new(
        NAMESPACE_SERVICE_PROFILE,
        "p1",
        ROLE_SERVICE,
        SubjectRef::set(NAMESPACE_TENANCY_ACCESS, "t1", ROLE_MEMBER),
    );
    assert!(engine.check_request(&request).await.unwrap().allowed);
}

// ============================================================================
// Cycles
// ============================================================================

#[tokio::test]
async fn test_cyclic_tenancies_terminate() {
    let (index, engine) = create_test_engine();
    index.write_tuple(service_from_tenancy("p1", "a"));
    index.write_tuple(tenancy_member(
        "a",
        SubjectRef::set(NAMESPACE_TENANCY_ACCESS, "b", ROLE_MEMBER),
    ));
    index.write_tuple(tenancy_member(
        "b",
        SubjectRef::set(NAMESPACE_TENANCY_ACCESS, "a", ROLE_MEMBER),
    ));

    let response = engine
        .check_request(&CheckRequest::new(
            NAMESPACE_SERVICE_PROFILE,
            "p1",
            PERMISSION_PROFILE_VIEW,
            profile_user("eve"),
        ))
        .await
        .unwrap();
    assert!(!response.allowed);
    assert!(!response.depth_limited);

    index.write_tuple(access_tuple("b", "eve"));
    assert!(can(&engine, "p1", PERMISSION_PROFILE_VIEW, "eve").await);
}

#[tokio::test]
async fn test_self_referencing_tenancy() {
    let (index, engine) = create_test_engine();
    index.write_tuple(service_from_tenancy("p1", "loop"));
    index.write_tuple(tenancy_member(
        "loop",
        SubjectRef::set(NAMESPACE_TENANCY_ACCESS, "loop", ROLE_MEMBER),
    ));

    assert!(!can(&engine, "p1", PERMISSION_PROFILE_VIEW, "eve").await);
}

#[tokio::test]
async fn test_deep_acyclic_chain_hits_depth_bound() {
    let index = Arc::new(InMemoryTupleIndex::new());
    let engine = AuthorizationEngine::profile_service(
        index.clone(),
        EngineConfig::default().with_max_depth(6),
    )
    .unwrap();

    index.write_tuple(service_from_tenancy("p1", "t0"));
    for i in 0..10 {
        index.write_tuple(tenancy_member(
            &format!("t{i}"),
            SubjectRef::set(NAMESPACE_TENANCY_ACCESS, &format!("t{}", i + 1), ROLE_MEMBER),
        ));
    }
    index.write_tuple(access_tuple("t10", "deep"));

    let response = engine
        .check_request(&CheckRequest::new(
            NAMESPACE_SERVICE_PROFILE,
            "p1",
            PERMISSION_PROFILE_VIEW,
            profile_user("deep"),
        ))
        .await
        .unwrap();
    assert!(!response.allowed);
    assert!(response.depth_limited);

    let (index, engine) = create_test_engine();
    index.write_tuple(service_from_tenancy("p1", "t0"));
    for i in 0..10 {
        index.write_tuple(tenancy_member(
            &format!("t{i}"),
            SubjectRef::set(NAMESPACE_TENANCY_ACCESS, &format!("t{}", i + 1), ROLE_MEMBER),
        ));
    }
    index.write_tuple(access_tuple("t10", "deep"));
    assert!(can(&engine, "p1", PERMISSION_PROFILE_VIEW, "deep").await);
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn test_store_failure_is_reported_not_denied() {
    let inner = InMemoryTupleIndex::with_tuples([role_tuple("t1", ROLE_VIEWER, "vic")]);
    let index = Arc::new(UnavailableRelation {
        inner,
        relation: ROLE_SERVICE,
    });
    let engine = AuthorizationEngine::profile_service(index, EngineConfig::default()).unwrap();

    // `service` is the first relation every permit reads.
    let result = engine
        .check(
            NAMESPACE_SERVICE_PROFILE,
            "t1",
            PERMISSION_PROFILE_VIEW,
            NAMESPACE_PROFILE_USER,
            "vic",
            None,
        )
        .await;
    assert!(
        matches!(
            &result,
            Err(CheckError::StoreUnavailable(reason)) if reason.contains("replica lagging")
        ),
        "expected StoreUnavailable, got {result:?}"
    );
}

#[tokio::test(start_paused = true)]
async fn test_deadline_surfaces_as_store_unavailable() {
    let inner = InMemoryTupleIndex::with_tuples([role_tuple("t1", "granted_profile_view", "vic")]);
    let index = Arc::new(SlowIndex {
        inner,
        delay: Duration::from_millis(40),
    });
    let engine = AuthorizationEngine::profile_service(index, EngineConfig::default()).unwrap();

    // profile_view reads seven relations; 100ms covers only two lookups.
    let result = engine
        .check(
            NAMESPACE_SERVICE_PROFILE,
            "t1",
            PERMISSION_PROFILE_VIEW,
            NAMESPACE_PROFILE_USER,
            "vic",
            Some(Instant::now() + Duration::from_millis(100)),
        )
        .await;
    assert!(matches!(result, Err(CheckError::StoreUnavailable(_))));

    let allowed = engine
        .check(
            NAMESPACE_SERVICE_PROFILE,
            "t1",
            PERMISSION_PROFILE_VIEW,
            NAMESPACE_PROFILE_USER,
            "vic",
            Some(Instant::now() + Duration::from_secs(1)),
        )
        .await
        .unwrap();
    assert!(allowed);
}

#[tokio::test]
async fn test_unknown_names_are_errors() {
    let (_, engine) = create_test_engine();

    let result = engine
        .check(NAMESPACE_SERVICE_PROFILE, "t1", "launch", NAMESPACE_PROFILE_USER, "x", None)
        .await;
    assert!(matches!(result, Err(CheckError::UnknownPermission { .. })));

    let result = engine
        .check("billing", "t1", PERMISSION_PROFILE_VIEW, NAMESPACE_PROFILE_USER, "x", None)
        .await;
    assert!(matches!(result, Err(CheckError::UnknownNamespace(_))));
}

// ============================================================================
// Schema reload and concurrency
// ============================================================================

#[tokio::test]
async fn test_failed_reload_keeps_active_schema() {
    let (index, engine) = create_test_engine();
    index.write_tuple(role_tuple("t1", ROLE_OWNER, "olga"));

    let broken = SchemaDefinition {
        namespaces: vec![
            NamespaceDefinition::new("doc").permission("view", Expr::relation("viewer"))
        ],
    };
    let errors = engine.reload_schema(broken).unwrap_err();
    assert_eq!(errors.len(), 1);

    assert!(can(&engine, "t1", PERMISSION_PROFILE_UPDATE, "olga").await);
}

#[tokio::test]
async fn test_reload_changes_permission_semantics() {
    let (index, engine) = create_test_engine();
    index.write_tuple(role_tuple("t1", ROLE_VIEWER, "val"));
    assert!(can(&engine, "t1", PERMISSION_PROFILE_VIEW, "val").await);

    let restricted = SchemaDefinition {
        namespaces: vec![
            NamespaceDefinition::new(NAMESPACE_PROFILE_USER),
            NamespaceDefinition::new(NAMESPACE_SERVICE_PROFILE)
                .relation(ROLE_OWNER, vec![SubjectType::namespace(NAMESPACE_PROFILE_USER)])
                .relation(ROLE_VIEWER, vec![SubjectType::namespace(NAMESPACE_PROFILE_USER)])
                .permission(PERMISSION_PROFILE_VIEW, Expr::relation(ROLE_OWNER)),
        ],
    };
    engine.reload_schema(restricted).unwrap();

    assert!(!can(&engine, "t1", PERMISSION_PROFILE_VIEW, "val").await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_checks_during_reload() {
    let (index, engine) = create_test_engine();
    for i in 0..20 {
        index.write_tuple(role_tuple(&format!("t{i}"), ROLE_ADMIN, "ada"));
    }

    let mut handles = Vec::new();
    for i in 0..20 {
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            let tenancy = format!("t{i}");
            can(&engine, &tenancy, PERMISSION_ROSTER_MANAGE, "ada").await
        }));
    }
    // Same semantics, fresh snapshot.
    engine.reload_schema(definition()).unwrap();

    for handle in handles {
        assert!(handle.await.unwrap());
    }
}

// ============================================================================
// Expand, list objects, batch
// ============================================================================

#[tokio::test]
async fn test_expand_service_relation() {
    let (index, engine) = create_test_engine();
    index.write_tuple(service_from_tenancy("p1", "t1"));
    index.write_tuple(access_tuple("t1", "amy"));
    index.write_tuple(access_tuple("t1", "ben"));
    index.write_tuple(role_tuple("p1", ROLE_SERVICE, "bot"));

    let tree = engine
        .expand(NAMESPACE_SERVICE_PROFILE, "p1", ROLE_SERVICE, None)
        .await
        .unwrap();
    assert_eq!(tree.kind, SubjectTreeKind::Union);

    let mut leaves: Vec<String> = tree.leaves().into_iter().map(|s| s.id).collect();
    leaves.sort();
    assert_eq!(leaves, vec!["amy", "ben", "bot"]);

    let result = engine
        .expand(NAMESPACE_SERVICE_PROFILE, "p1", PERMISSION_PROFILE_VIEW, None)
        .await;
    assert!(matches!(result, Err(CheckError::UnknownPermission { .. })));
}

#[tokio::test]
async fn test_list_objects_follows_tenancy_membership() {
    let (index, engine) = create_test_engine();
    index.write_tuple(role_tuple("p1", ROLE_VIEWER, "amy"));
    index.write_tuple(role_tuple("p2", "granted_devices_manage", "amy"));
    index.write_tuple(service_from_tenancy("p3", "t1"));
    index.write_tuple(tenancy_member(
        "t1",
        SubjectRef::set(NAMESPACE_TENANCY_ACCESS, "t2", ROLE_MEMBER),
    ));
    index.write_tuple(access_tuple("t2", "amy"));
    index.write_tuple(role_tuple("p4", ROLE_OWNER, "ben"));

    let objects = engine
        .list_objects(NAMESPACE_SERVICE_PROFILE, PERMISSION_DEVICES_VIEW, &profile_user("amy"))
        .await
        .unwrap();
    assert_eq!(objects, vec!["p1", "p2", "p3"]);

    let objects = engine
        .list_objects(NAMESPACE_SERVICE_PROFILE, PERMISSION_DEVICES_MANAGE, &profile_user("amy"))
        .await
        .unwrap();
    assert_eq!(objects, vec!["p2", "p3"]);
}

#[tokio::test]
async fn test_batch_check_isolates_failures() {
    let (index, engine) = create_test_engine();
    index.write_tuple(role_tuple("t1", ROLE_MEMBER, "mo"));

    let responses = engine
        .batch_check(vec![
            CheckRequest::new(
                NAMESPACE_SERVICE_PROFILE,
                "t1",
                PERMISSION_PROFILE_VIEW,
                profile_user("mo"),
            ),
            CheckRequest::new(NAMESPACE_SERVICE_PROFILE, "t1", "unknown", profile_user("mo")),
            CheckRequest::new(
                NAMESPACE_SERVICE_PROFILE,
                "t1",
                PERMISSION_PROFILE_CREATE,
                profile_user("mo"),
            ),
        ])
        .await;

    assert_eq!(responses.len(), 3);
    assert!(responses[0].as_ref().unwrap().allowed);
    assert!(matches!(responses[1], Err(CheckError::UnknownPermission { .. })));
    assert!(!responses[2].as_ref().unwrap().allowed);
}
