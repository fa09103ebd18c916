//! Relationship-based authorization evaluator for the profile service
//!
//! This crate answers "may subject S perform permission P on object O?" for a
//! schema of namespaces, relations and permission expressions, reading relation
//! tuples from an external tuple index:
//! - Schema compilation with load-time validation of every reference
//! - Userset expansion of indirect subjects (`namespace:id#relation`)
//! - Short-circuiting evaluation of permission expressions
//! - Cycle detection, a depth bound and deadlines on every check
//! - Store failures reported as errors, never as denials
//!
//! # Core Concepts
//!
//! - **Namespace**: an object type such as `service_profile` or `tenancy_access`
//! - **Relation**: a named set of subjects on an object (e.g. `owner`, `member`)
//! - **Permission**: an expression over relations and other permissions
//! - **Tuple**: a fact `object#relation@subject`; the subject may itself be a
//!   subject set such as `tenancy_access:t1#member`
//!
//! # Example
//!
//! ```rust,no_run
//! use auth_rebac::{profile_service, AuthorizationEngine, EngineConfig, InMemoryTupleIndex};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let index = Arc::new(InMemoryTupleIndex::new());
//! index.write_tuple(profile_service::role_tuple("tenant-1", "operator", "alice"));
//!
//! let engine = AuthorizationEngine::profile_service(index, EngineConfig::default())
//!     .map_err(|errors| format!("{errors:?}"))?;
//!
//! let allowed = engine
//!     .check("service_profile", "tenant-1", "devices_view", "profile_user", "alice", None)
//!     .await?;
//! assert!(allowed);
//! # Ok(())
//! # }
//! ```

pub mod check;
pub mod config;
mod context;
pub mod engine;
pub mod error;
pub mod expand;
pub mod index;
pub mod logging;
pub mod models;
pub mod profile_service;
pub mod schema;

pub use crate::config::*;
pub use engine::*;
pub use error::*;
pub use index::{InMemoryTupleIndex, TupleIndex};
pub use models::*;
pub use schema::*;
