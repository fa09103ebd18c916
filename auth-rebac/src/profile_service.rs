//! Namespaces of the profile service and helpers for writing its tuples.
//!
//! `tenancy_access` groups users per tenancy and may contain other tenancies as
//! members. `service_profile` carries the role relations and `granted_*`
//! relations that the service's permits are built from.

use crate::models::{ObjectRef, RelationTuple, SubjectRef};
use crate::schema::{Expr, NamespaceDefinition, SchemaDefinition, SubjectType};

pub const NAMESPACE_PROFILE_USER: &str = "profile_user";
pub const NAMESPACE_TENANCY_ACCESS: &str = "tenancy_access";
pub const NAMESPACE_SERVICE_PROFILE: &str = "service_profile";

pub const ROLE_OWNER: &str = "owner";
pub const ROLE_ADMIN: &str = "admin";
pub const ROLE_OPERATOR: &str = "operator";
pub const ROLE_VIEWER: &str = "viewer";
pub const ROLE_MEMBER: &str = "member";
pub const ROLE_SERVICE: &str = "service";

pub const PERMISSION_PROFILE_VIEW: &str = "profile_view";
pub const PERMISSION_PROFILE_CREATE: &str = "profile_create";
pub const PERMISSION_PROFILE_UPDATE: &str = "profile_update";
pub const PERMISSION_PROFILES_MERGE: &str = "profiles_merge";
pub const PERMISSION_CONTACTS_MANAGE: &str = "contacts_manage";
pub const PERMISSION_ROSTER_MANAGE: &str = "roster_manage";
pub const PERMISSION_RELATIONSHIPS_MANAGE: &str = "relationships_manage";
pub const PERMISSION_DEVICES_MANAGE: &str = "devices_manage";
pub const PERMISSION_DEVICES_VIEW: &str = "devices_view";
pub const PERMISSION_GEOLOCATION_MANAGE: &str = "geolocation_manage";
pub const PERMISSION_GEOLOCATION_VIEW: &str = "geolocation_view";
pub const PERMISSION_LOCATION_INGEST: &str = "location_ingest";
pub const PERMISSION_SETTINGS_MANAGE: &str = "settings_manage";
pub const PERMISSION_SETTINGS_VIEW: &str = "settings_view";

/// Permits granted to service, owner and admin plus their own `granted_*` relation.
const MANAGED_PERMITS: [&str; 10] = [
    PERMISSION_PROFILE_CREATE,
    PERMISSION_PROFILE_UPDATE,
    PERMISSION_PROFILES_MERGE,
    PERMISSION_CONTACTS_MANAGE,
    PERMISSION_ROSTER_MANAGE,
    PERMISSION_RELATIONSHIPS_MANAGE,
    PERMISSION_DEVICES_MANAGE,
    PERMISSION_GEOLOCATION_MANAGE,
    PERMISSION_SETTINGS_MANAGE,
    PERMISSION_LOCATION_INGEST,
];

/// View permits that inherit from a manage permit: `(view, manage)`.
const VIEW_PERMITS: [(&str, &str); 3] = [
    (PERMISSION_DEVICES_VIEW, PERMISSION_DEVICES_MANAGE),
    (PERMISSION_GEOLOCATION_VIEW, PERMISSION_GEOLOCATION_MANAGE),
    (PERMISSION_SETTINGS_VIEW, PERMISSION_SETTINGS_MANAGE),
];

/// Name of the relation granting `permission` explicitly, e.g. `granted_devices_view`.
pub fn granted_relation(permission: &str) -> String {
    format!("granted_{permission}")
}

/// Permits in declaration order.
pub fn permissions() -> Vec<&'static str> {
    let mut all = vec![PERMISSION_PROFILE_VIEW];
    all.extend(MANAGED_PERMITS);
    all.extend(VIEW_PERMITS.iter().map(|(view, _)| *view));
    all
}

/// The profile service schema.
pub fn definition() -> SchemaDefinition {
    let user = || SubjectType::namespace(NAMESPACE_PROFILE_USER);
    let profile_service_set = || SubjectType::set(NAMESPACE_SERVICE_PROFILE, ROLE_SERVICE);

    let tenancy_access = NamespaceDefinition::new(NAMESPACE_TENANCY_ACCESS)
        .relation(
            ROLE_MEMBER,
            vec![user(), SubjectType::set(NAMESPACE_TENANCY_ACCESS, ROLE_MEMBER)],
        )
        .relation(ROLE_SERVICE, vec![user()]);

    let mut service_profile = NamespaceDefinition::new(NAMESPACE_SERVICE_PROFILE);
    for role in [ROLE_OWNER, ROLE_ADMIN, ROLE_OPERATOR, ROLE_VIEWER, ROLE_MEMBER] {
        service_profile = service_profile.relation(role, vec![user()]);
    }
    service_profile = service_profile.relation(
        ROLE_SERVICE,
        vec![
            user(),
            SubjectType::set(NAMESPACE_TENANCY_ACCESS, ROLE_MEMBER),
            SubjectType::set(NAMESPACE_TENANCY_ACCESS, ROLE_SERVICE),
        ],
    );
    for permission in permissions() {
        service_profile = service_profile.relation(
            &granted_relation(permission),
            vec![user(), profile_service_set()],
        );
    }

    let roles = |names: &[&str]| names.iter().map(|n| Expr::relation(n)).collect::<Vec<_>>();

    let mut view = roles(&[
        ROLE_SERVICE,
        ROLE_OWNER,
        ROLE_ADMIN,
        ROLE_OPERATOR,
        ROLE_VIEWER,
        ROLE_MEMBER,
    ]);
    view.push(Expr::relation(&granted_relation(PERMISSION_PROFILE_VIEW)));
    service_profile = service_profile.permission(PERMISSION_PROFILE_VIEW, Expr::union(view));

    for permission in MANAGED_PERMITS {
        let mut children = roles(&[ROLE_SERVICE, ROLE_OWNER, ROLE_ADMIN]);
        if permission == PERMISSION_LOCATION_INGEST {
            children.push(Expr::relation(ROLE_OPERATOR));
        }
        children.push(Expr::relation(&granted_relation(permission)));
        service_profile = service_profile.permission(permission, Expr::union(children));
    }

    for (permission, manage) in VIEW_PERMITS {
        let mut children = vec![Expr::permission(manage)];
        children.extend(roles(&[ROLE_OPERATOR, ROLE_VIEWER, ROLE_MEMBER]));
        children.push(Expr::relation(&granted_relation(permission)));
        service_profile = service_profile.permission(permission, Expr::union(children));
    }

    SchemaDefinition {
        namespaces: vec![
            NamespaceDefinition::new(NAMESPACE_PROFILE_USER),
            tenancy_access,
            service_profile,
        ],
    }
}

pub fn profile_user(profile_id: &str) -> SubjectRef {
    SubjectRef::id(NAMESPACE_PROFILE_USER, profile_id)
}

/// `tenancy_access:<tenancy>#member@profile_user:<profile>`
pub fn access_tuple(tenancy_path: &str, profile_id: &str) -> RelationTuple {
    RelationTuple::new(
        ObjectRef::new(NAMESPACE_TENANCY_ACCESS, tenancy_path),
        ROLE_MEMBER,
        profile_user(profile_id),
    )
}

/// `tenancy_access:<tenancy>#service@profile_user:<profile>` for a service bot.
pub fn service_access_tuple(tenancy_path: &str, profile_id: &str) -> RelationTuple {
    RelationTuple::new(
        ObjectRef::new(NAMESPACE_TENANCY_ACCESS, tenancy_path),
        ROLE_SERVICE,
        profile_user(profile_id),
    )
}

/// Role tuple on the tenancy's `service_profile` object.
pub fn role_tuple(tenancy_path: &str, role: &str, profile_id: &str) -> RelationTuple {
    RelationTuple::new(
        ObjectRef::new(NAMESPACE_SERVICE_PROFILE, tenancy_path),
        role,
        profile_user(profile_id),
    )
}

/// Bridge tuples letting a tenancy's service bots act on its `service_profile`.
///
/// The first tuple makes `tenancy_access#service` members hold `service`; the rest
/// grant every `granted_*` relation to the `service_profile#service` subject set.
pub fn service_inheritance_tuples(tenancy_path: &str) -> Vec<RelationTuple> {
    let profile = ObjectRef::new(NAMESPACE_SERVICE_PROFILE, tenancy_path);
    let bridge = RelationTuple::new(
        profile.clone(),
        ROLE_SERVICE,
        SubjectRef::set(NAMESPACE_TENANCY_ACCESS, tenancy_path, ROLE_SERVICE),
    );

    let permissions = permissions();
    let mut tuples = Vec::with_capacity(1 + permissions.len());
    tuples.push(bridge);
    for permission in permissions {
        tuples.push(RelationTuple::new(
            profile.clone(),
            &granted_relation(permission),
            profile.subject_set(ROLE_SERVICE),
        ));
    }
    tuples
}
