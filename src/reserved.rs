//! Reserved predicate guard
//!
//! Predicates in the system namespace keep their bootstrap definition for
//! the lifetime of the store. Re-declaring the identical definition is
//! allowed; any other change, or a drop, is rejected for every caller.
//! The check runs before, and independently of, the ACL bitmask check.

use crate::constants::{ACL_PREDICATES, RESERVED_PREFIX};
use crate::error::{AclError, Result};

/// Case-insensitive namespace-prefix match
pub fn is_reserved(predicate: &str) -> bool {
    let prefix = RESERVED_PREFIX.as_bytes();
    predicate.len() >= prefix.len() && predicate.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix)
}

/// Predicates holding the ACL graph; readable and writable by guardians only
pub fn is_acl_predicate(predicate: &str) -> bool {
    ACL_PREDICATES.iter().any(|p| p.eq_ignore_ascii_case(predicate))
}

/// Collapse whitespace and strip a trailing statement terminator
pub fn normalize_schema(definition: &str) -> String {
    let joined = definition.split_whitespace().collect::<Vec<_>>().join(" ");
    joined
        .strip_suffix(" .")
        .or_else(|| joined.strip_suffix('.'))
        .unwrap_or(joined.as_str())
        .trim_end()
        .to_string()
}

/// Decide whether an alter of `predicate` may proceed.
///
/// `proposed` is the new definition, `None` for a drop; `current` is the
/// stored definition, if any.
pub fn check_alter(predicate: &str, proposed: Option<&str>, current: Option<&str>) -> Result<()> {
    if !is_reserved(predicate) {
        return Ok(());
    }
    match proposed {
        None => Err(AclError::ReservedPredicateViolation(format!(
            "predicate {predicate} is reserved and is not allowed to be dropped"
        ))),
        Some(new) => {
            let unchanged = current
                .map(|cur| normalize_schema(cur) == normalize_schema(new))
                .unwrap_or(false);
            if unchanged {
                Ok(())
            } else {
                Err(AclError::ReservedPredicateViolation(format!(
                    "predicate {predicate} is reserved and is not allowed to be modified"
                )))
            }
        }
    }
}
