//! Permission bits and well-known names

// Permission bit constants
pub const READ: u8 = 4;
pub const WRITE: u8 = 2;
pub const MODIFY: u8 = 1;
pub const ALL: u8 = READ | WRITE | MODIFY;

// Bootstrap identities
pub const GUARDIANS_GROUP: &str = "guardians";
pub const GROOT_USER: &str = "groot";

/// Namespace prefix of system predicates, matched case-insensitively
pub const RESERVED_PREFIX: &str = "dgraph.";

/// Predicates that persist the ACL graph itself. Only guardians may touch them.
pub const ACL_PREDICATES: &[&str] = &[
    "dgraph.xid",
    "dgraph.password",
    "dgraph.user.group",
    "dgraph.acl.rule",
    "dgraph.rule.predicate",
    "dgraph.rule.permission",
];

/// Schema written by the bootstrap path on first start
pub const INITIAL_SCHEMA: &[(&str, &str)] = &[
    ("dgraph.xid", "string @index(exact) @upsert"),
    ("dgraph.password", "password"),
    ("dgraph.user.group", "[uid] @reverse"),
    ("dgraph.acl.rule", "[uid]"),
    ("dgraph.rule.predicate", "string @index(exact) @upsert"),
    ("dgraph.rule.permission", "int"),
    ("dgraph.type", "[string] @index(exact)"),
    ("dgraph.graphql.schema", "string"),
];

// Permission name mappings
const PERMS: &[(&str, u8)] = &[("read", READ), ("write", WRITE), ("modify", MODIFY)];

/// Convert a permission mask to a list of permission names
pub fn perms_to_names(mask: u8) -> Vec<&'static str> {
    PERMS
        .iter()
        .filter(|(_, b)| mask & b == *b)
        .map(|(n, _)| *n)
        .collect()
}

/// Convert a list of permission names to a mask (unknown names are ignored)
pub fn names_to_perms(names: &[&str]) -> u8 {
    names
        .iter()
        .filter_map(|n| PERMS.iter().find(|(k, _)| k.eq_ignore_ascii_case(n)).map(|(_, v)| v))
        .fold(0, |a, b| a | b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_names() {
        assert_eq!(perms_to_names(6), vec!["read", "write"]);
        assert_eq!(perms_to_names(ALL), vec!["read", "write", "modify"]);
        assert!(perms_to_names(0).is_empty());
        assert_eq!(names_to_perms(&["READ", "modify", "bogus"]), READ | MODIFY);
    }

    #[test]
    fn initial_schema_is_reserved() {
        assert!(INITIAL_SCHEMA.iter().all(|(p, _)| p.starts_with(RESERVED_PREFIX)));
        assert!(ACL_PREDICATES.iter().all(|p| INITIAL_SCHEMA.iter().any(|(s, _)| s == p)));
    }
}
