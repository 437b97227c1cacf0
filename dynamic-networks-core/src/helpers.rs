use std::any::type_name;

use kube::Resource;

pub fn pretty_type_name<'a, T>() -> &'a str {
    type_name::<T>().split("::").last().unwrap_or_default()
}

pub fn namespaced_name(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}

/// Splits a `namespace/name` key. A third segment (an interface name in index keys) is tolerated
/// and dropped.
pub fn split_namespaced_name(namespaced_name: &str) -> Option<(&str, &str)> {
    let mut segments = namespaced_name.split('/');
    let namespace = segments.next()?;
    let name = segments.next()?;

    match segments.count() {
        0 | 1 => Some((namespace, name)),
        _ => None,
    }
}

pub trait RequireMetadata<E> {
    fn require_name_or(&self, error: E) -> Result<&str, E>;
    fn require_namespace_or(&self, error: E) -> Result<&str, E>;
    fn require_uid_or(&self, error: E) -> Result<&str, E>;
    fn require_name_or_else(&self, error: impl FnOnce() -> E) -> Result<&str, E>;
    fn require_namespace_or_else(&self, error: impl FnOnce() -> E) -> Result<&str, E>;
    fn require_uid_or_else(&self, error: impl FnOnce() -> E) -> Result<&str, E>;
}

impl<T: Resource, E> RequireMetadata<E> for T {
    fn require_name_or(&self, error: E) -> Result<&str, E> {
        Ok(self.meta().name.as_ref().ok_or(error)?.as_str())
    }

    fn require_namespace_or(&self, error: E) -> Result<&str, E> {
        Ok(self.meta().namespace.as_ref().ok_or(error)?.as_str())
    }

    fn require_uid_or(&self, error: E) -> Result<&str, E> {
        Ok(self.meta().uid.as_ref().ok_or(error)?.as_str())
    }

    fn require_name_or_else(&self, error: impl FnOnce() -> E) -> Result<&str, E> {
        Ok(self.meta().name.as_ref().ok_or_else(error)?.as_str())
    }

    fn require_namespace_or_else(&self, error: impl FnOnce() -> E) -> Result<&str, E> {
        Ok(self.meta().namespace.as_ref().ok_or_else(error)?.as_str())
    }

    fn require_uid_or_else(&self, error: impl FnOnce() -> E) -> Result<&str, E> {
        Ok(self.meta().uid.as_ref().ok_or_else(error)?.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::{namespaced_name, split_namespaced_name};

    #[test]
    fn splits_namespaced_names() {
        assert_eq!(split_namespaced_name("ns1/pod"), Some(("ns1", "pod")));
        assert_eq!(split_namespaced_name("ns1/net1/eth1"), Some(("ns1", "net1")));
        assert_eq!(split_namespaced_name("pod"), None);
        assert_eq!(split_namespaced_name("a/b/c/d"), None);
    }

    #[test]
    fn joins_namespaced_names() {
        assert_eq!(namespaced_name("ns1", "pod"), "ns1/pod");
    }
}
