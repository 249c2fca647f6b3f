//! predacl - Predicate-level access control for a multi-tenant graph database
//!
//! Users belong to groups; groups carry per-predicate rules with READ, WRITE
//! and MODIFY bits. A periodically refreshed, atomically swapped permission
//! snapshot backs every check. Queries lose the references the caller may not
//! read, mutations and alters are rejected as a whole, and system predicates
//! keep their schema no matter who asks.
//!
//! ```no_run
//! use predacl::{AclConfig, AclService, Credentials, Query};
//!
//! let config = AclConfig { secret: vec![7; 32], ..AclConfig::default() };
//! let service = AclService::open(config)?;
//! service.start()?;
//! let pair = service.login("groot", "password")?;
//! let query = Query::parse("{ me(func: has(name)) { name } }")?;
//! let authorized = service.enforcer().authorize_query(&Credentials::from_pair(&pair), query)?;
//! assert_eq!(authorized.request.blocks.len(), 1);
//! # Ok::<(), predacl::AclError>(())
//! ```

pub mod admin;
pub mod auth;
pub mod cache;
pub mod config;
pub mod constants;
pub mod db;
pub mod enforce;
pub mod error;
pub mod parser;
pub mod request;
pub mod reserved;
pub mod rules;
pub mod service;
pub mod token;
pub mod tx;

#[cfg(feature = "server")]
pub mod server;

pub use admin::{AclAdmin, GroupInfo, UserInfo};
pub use cache::{PermissionCache, Refresher, Snapshot};
pub use config::AclConfig;
pub use constants::{perms_to_names, names_to_perms, ALL, GROOT_USER, GUARDIANS_GROUP, MODIFY, READ, WRITE};
pub use db::{RuleEntry, Store};
pub use enforce::{Authorized, Caller, Credentials, Enforcer, Resolved, SchemaEntry};
pub use error::{AclError, Result};
pub use request::{Alter, Field, Filter, Func, Mutation, NQuad, Order, Query, QueryBlock, Request, SchemaQuery, SchemaUpdate};
pub use reserved::{check_alter, is_reserved};
pub use rules::RuleStore;
pub use service::AclService;
pub use token::{Session, TokenManager, TokenPair};
pub use tx::Tx;
