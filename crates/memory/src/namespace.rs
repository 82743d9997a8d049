//! Namespace access policy. The source material references a `shared`
//! namespace without fully encoding who may read it from where; per the
//! design note this is pulled out as an explicit predicate rather than
//! inferred from scattered config checks.

/// `canRead(principal, namespace) -> bool`. `principal` is the calling
/// session key (or an empty string for an unscoped caller). A principal can
/// always read its own namespace and the configured shared namespace;
/// nothing else, so one tenant's `namespaces/<ns>/` tree is never fanned
/// into another's recall without being explicitly named as shared.
#[derive(Debug, Clone)]
pub struct NamespacePolicy {
    pub own_namespace: String,
    pub shared_namespace: String,
}

impl NamespacePolicy {
    pub fn new(own_namespace: impl Into<String>, shared_namespace: impl Into<String>) -> Self {
        Self { own_namespace: own_namespace.into(), shared_namespace: shared_namespace.into() }
    }

    pub fn can_read(&self, principal: &str, namespace: &str) -> bool {
        let _ = principal;
        namespace == self.own_namespace || namespace == self.shared_namespace
    }

    /// Filter a candidate namespace list down to the ones `principal` may
    /// read, preserving order.
    pub fn filter_readable<'a>(&self, principal: &str, namespaces: &'a [String]) -> Vec<&'a str> {
        namespaces.iter().filter(|ns| self.can_read(principal, ns)).map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn own_namespace_is_always_readable() {
        let policy = NamespacePolicy::new("default", "shared");
        assert!(policy.can_read("session-1", "default"));
    }

    #[test]
    fn shared_namespace_is_readable_by_any_principal() {
        let policy = NamespacePolicy::new("default", "shared");
        assert!(policy.can_read("session-1", "shared"));
        assert!(policy.can_read("", "shared"));
    }

    #[test]
    fn unrelated_namespace_is_rejected() {
        let policy = NamespacePolicy::new("default", "shared");
        assert!(!policy.can_read("session-1", "namespaces/other-tenant"));
    }

    #[test]
    fn filter_readable_preserves_order_and_drops_unreadable() {
        let policy = NamespacePolicy::new("default", "shared");
        let namespaces = vec!["default".to_string(), "private-other".to_string(), "shared".to_string()];
        assert_eq!(policy.filter_readable("session-1", &namespaces), vec!["default", "shared"]);
    }
}
