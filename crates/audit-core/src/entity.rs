//! Known entity kinds. Audit events for anything else are refused.

use std::collections::BTreeSet;

/// Entity kinds of the model-assessment schema.
const ASSESSMENT_ENTITIES: &[&str] = &[
    "Comments",
    "ConfParam",
    "Configuration",
    "Dataset",
    "Datashape",
    "Derived",
    "Direct",
    "Element",
    "Evaluation",
    "Feature",
    "LegalRequirement",
    "Measure",
    "Metric",
    "MetricCategory",
    "Model",
    "Observation",
    "Project",
    "Tool",
];

/// Set of entity names the gateway declares. Matching is exact and case-sensitive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityRegistry {
    names: BTreeSet<String>,
}

impl EntityRegistry {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names
                .into_iter()
                .map(Into::into)
                .filter(|n: &String| !n.is_empty())
                .collect(),
        }
    }

    pub fn assessment_domain() -> Self {
        Self::new(ASSESSMENT_ENTITIES.iter().copied())
    }

    pub fn with(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !name.is_empty() {
            self.names.insert(name);
        }
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_is_case_sensitive() {
        let reg = EntityRegistry::assessment_domain();
        assert!(reg.contains("Comments"));
        assert!(!reg.contains("comments"));
        assert!(!reg.contains("NotARealEntity"));
        assert!(!reg.contains(""));
    }

    #[test]
    fn empty_names_are_never_registered() {
        let reg = EntityRegistry::new(["", "Tool"]).with("");
        assert_eq!(reg.len(), 1);
        assert!(reg.contains("Tool"));
    }
}
