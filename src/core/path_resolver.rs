//! Lookup-key canonicalization and trailing numeric id elision.
//!
//! Route keys from configuration (`orders.items`) and request paths
//! (`/Orders/Items/42`) are brought to the same lowercase, `/`-separated form
//! before they meet in the schema index. When a path has no exact entry and its
//! last segment is all decimal digits, that one segment is dropped and the
//! lookup retried once.
use std::collections::HashMap;

/// Result of resolving a request path against one method's path table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModifiedPath {
    pub found: bool,
    pub used_fallback: bool,
    pub resolved_path: String,
}

impl ModifiedPath {
    fn exact(path: String) -> Self {
        Self {
            found: true,
            used_fallback: false,
            resolved_path: path,
        }
    }

    fn fallback(path: String) -> Self {
        Self {
            found: true,
            used_fallback: true,
            resolved_path: path,
        }
    }

    fn not_found(path: String) -> Self {
        Self {
            found: false,
            used_fallback: false,
            resolved_path: path,
        }
    }
}

/// Turn a configured dotted property key into an index path:
/// dots become `/`, a leading `/` is ensured and the result is lowercased.
/// Applying it twice yields the same key.
pub fn normalize_route_key(key: &str) -> String {
    let replaced = key.replace('.', "/").to_lowercase();
    if replaced.starts_with('/') {
        replaced
    } else {
        format!("/{replaced}")
    }
}

/// Request paths are only lowercased; trailing slashes are left as supplied.
pub fn canonicalize_request_path(path: &str) -> String {
    path.to_lowercase()
}

/// Split `/orders/42` into `/orders` when the last segment is all digits.
fn strip_numeric_tail(path: &str) -> Option<&str> {
    let (head, last) = path.rsplit_once('/')?;
    if !last.is_empty() && last.bytes().all(|b| b.is_ascii_digit()) {
        Some(head)
    } else {
        None
    }
}

/// Resolve `request_path` against a single method's `path -> value` table.
///
/// Exact matches always win. Only one trailing numeric segment is elided;
/// `/orders/1/2` never falls back to `/orders`.
pub fn resolve<T>(paths: &HashMap<String, T>, request_path: &str) -> ModifiedPath {
    let path = canonicalize_request_path(request_path);
    if paths.contains_key(&path) {
        return ModifiedPath::exact(path);
    }

    match strip_numeric_tail(&path) {
        Some(head) if paths.contains_key(head) => ModifiedPath::fallback(head.to_string()),
        _ => ModifiedPath::not_found(path),
    }
}

/// Resolve within a `method -> path -> value` table. Unknown methods are not found.
pub fn resolve_in<T>(
    index: &HashMap<String, HashMap<String, T>>,
    http_method: &str,
    request_path: &str,
) -> ModifiedPath {
    match index.get(&http_method.to_ascii_lowercase()) {
        Some(paths) => resolve(paths, request_path),
        None => ModifiedPath::not_found(canonicalize_request_path(request_path)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(paths: &[&str]) -> HashMap<String, ()> {
        paths.iter().map(|p| (p.to_string(), ())).collect()
    }

    #[test]
    fn test_normalize_route_key() {
        assert_eq!(normalize_route_key("orders.Items"), "/orders/items");
        assert_eq!(normalize_route_key("/orders"), "/orders");
        assert_eq!(normalize_route_key("orders"), "/orders");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        for key in ["orders.items", "/Orders", "a.b.c", "v1.Users.list", ""] {
            let once = normalize_route_key(key);
            assert_eq!(normalize_route_key(&once), once, "key {key:?}");
        }
    }

    #[test]
    fn test_exact_match_wins_over_fallback() {
        let paths = table(&["/orders/42", "/orders"]);
        let resolved = resolve(&paths, "/orders/42");
        assert!(resolved.found);
        assert!(!resolved.used_fallback);
        assert_eq!(resolved.resolved_path, "/orders/42");
    }

    #[test]
    fn test_numeric_tail_is_elided() {
        let paths = table(&["/orders"]);
        let resolved = resolve(&paths, "/orders/42");
        assert_eq!(
            resolved,
            ModifiedPath {
                found: true,
                used_fallback: true,
                resolved_path: "/orders".to_string(),
            }
        );
    }

    #[test]
    fn test_non_numeric_tail_is_not_elided() {
        let paths = table(&["/orders"]);
        assert!(!resolve(&paths, "/orders/42a").found);
        assert!(!resolve(&paths, "/orders/").found);
    }

    #[test]
    fn test_elision_is_single_level() {
        let paths = table(&["/orders"]);
        assert!(!resolve(&paths, "/orders/1/2").found);
    }

    #[test]
    fn test_request_path_is_lowercased() {
        let paths = table(&["/orders/items"]);
        let resolved = resolve(&paths, "/Orders/ITEMS/7");
        assert!(resolved.found);
        assert_eq!(resolved.resolved_path, "/orders/items");
    }

    #[test]
    fn test_path_without_separator_is_not_found() {
        let paths = table(&[""]);
        assert!(!resolve(&paths, "42").found);
    }

    #[test]
    fn test_resolve_in_unknown_method() {
        let mut index = HashMap::new();
        index.insert("post".to_string(), table(&["/orders"]));
        assert!(resolve_in(&index, "POST", "/orders").found);
        assert!(!resolve_in(&index, "delete", "/orders").found);
    }
}
