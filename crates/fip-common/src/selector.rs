//! Kubernetes label selector builder
//!
//! Serializes a set of equality requirements (`key=value`) into the selector
//! string accepted by list calls. Keys are kept sorted so the same label set
//! always renders the same string, no matter the order it was built in.

use std::collections::BTreeMap;
use std::fmt;

/// Equality-based label selector
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LabelSelector {
    requirements: BTreeMap<String, String>,
}

impl LabelSelector {
    /// Build a selector requiring every label in the given map
    pub fn from_labels<'a, I>(labels: I) -> Self
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        Self {
            requirements: labels
                .into_iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    /// True when the selector has no requirements
    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    /// Render the selector, or `None` when it is empty
    pub fn to_query(&self) -> Option<String> {
        (!self.is_empty()).then(|| self.to_string())
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (key, value) in &self.requirements {
            if !first {
                f.write_str(",")?;
            }
            write!(f, "{key}={value}")?;
            first = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(labels: &[(&str, &str)]) -> Vec<(String, String)> {
        labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn selector(labels: &[(String, String)]) -> LabelSelector {
        LabelSelector::from_labels(labels.iter().map(|(k, v)| (k, v)))
    }

    #[test]
    fn renders_sorted_requirements() {
        let labels = pairs(&[
            ("app", "fip-controller"),
            ("release", "prod"),
            ("component", "controller"),
        ]);
        assert_eq!(
            selector(&labels).to_string(),
            "app=fip-controller,component=controller,release=prod"
        );
    }

    #[test]
    fn insertion_order_does_not_matter() {
        let a = selector(&pairs(&[("b", "2"), ("a", "1")]));
        let b = selector(&pairs(&[("a", "1"), ("b", "2")]));
        assert_eq!(a, b);
        assert_eq!(a.to_string(), b.to_string());
    }

    #[test]
    fn from_pod_labels() {
        let mut labels = BTreeMap::new();
        labels.insert("pod-template-hash".to_string(), "abc123".to_string());
        labels.insert("app".to_string(), "fip".to_string());
        let selector = LabelSelector::from_labels(&labels);
        assert_eq!(selector.to_string(), "app=fip,pod-template-hash=abc123");
    }

    #[test]
    fn empty_selector_has_no_query() {
        let selector = LabelSelector::from_labels(&BTreeMap::<String, String>::new());
        assert!(selector.is_empty());
        assert_eq!(selector.to_query(), None);
        assert_eq!(selector.to_string(), "");
    }

    #[test]
    fn later_value_replaces_earlier() {
        let selector = selector(&pairs(&[("app", "old"), ("app", "new")]));
        assert_eq!(selector.to_query().as_deref(), Some("app=new"));
    }
}
