//! Model matching rules for a provider.

use serde::{Deserialize, Serialize};

/// Separators that qualify a model id with a namespace (`alpha:7b`,
/// `org/model`).
pub const NAMESPACE_SEPARATORS: &[char] = &[':', '/'];

/// Precedence tiers evaluated by the router, highest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchTier {
    /// Qualified identifiers go to namespaced (local/gateway) providers.
    Namespaced,
    /// Static allowlist of known model names.
    Listed,
    /// The designated catch-all provider.
    Fallback,
}

impl MatchTier {
    pub const ORDERED: [MatchTier; 3] = [Self::Namespaced, Self::Listed, Self::Fallback];
}

/// Declarative `supports(model)` predicate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelMatcher {
    /// Exact names, or prefixes when the entry ends in `*`.
    #[serde(default)]
    pub allowlist: Vec<String>,
    /// Accept namespace-qualified model ids.
    #[serde(default)]
    pub namespaced: bool,
    /// Accept any model no other tier claimed.
    #[serde(default)]
    pub fallback: bool,
}

impl ModelMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_models<I, S>(mut self, models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowlist.extend(models.into_iter().map(Into::into));
        self
    }

    pub const fn namespaced(mut self, namespaced: bool) -> Self {
        self.namespaced = namespaced;
        self
    }

    pub const fn fallback(mut self, fallback: bool) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn matches(&self, tier: MatchTier, model: &str) -> bool {
        match tier {
            MatchTier::Namespaced => self.namespaced && is_namespaced(model),
            MatchTier::Listed => self.allowlist.iter().any(|entry| match entry.strip_suffix('*') {
                Some(prefix) => model.starts_with(prefix),
                None => entry == model,
            }),
            MatchTier::Fallback => self.fallback,
        }
    }

    pub fn supports(&self, model: &str) -> bool {
        MatchTier::ORDERED
            .iter()
            .any(|tier| self.matches(*tier, model))
    }
}

pub fn is_namespaced(model: &str) -> bool {
    model.contains(NAMESPACE_SEPARATORS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allowlist_exact_and_prefix() {
        let matcher = ModelMatcher::new().with_models(["gpt-4o", "claude-*"]);
        assert!(matcher.matches(MatchTier::Listed, "gpt-4o"));
        assert!(!matcher.matches(MatchTier::Listed, "gpt-4o-mini"));
        assert!(matcher.matches(MatchTier::Listed, "claude-3-haiku"));
        assert!(!matcher.supports("llama3"));
    }

    #[test]
    fn namespace_detection() {
        assert!(is_namespaced("alpha:7b"));
        assert!(is_namespaced("org/model"));
        assert!(!is_namespaced("gpt-4o"));
        let matcher = ModelMatcher::new().namespaced(true);
        assert!(matcher.matches(MatchTier::Namespaced, "alpha:7b"));
        assert!(!matcher.matches(MatchTier::Namespaced, "alpha"));
    }

    #[test]
    fn fallback_accepts_anything() {
        assert!(ModelMatcher::new().fallback(true).supports("whatever"));
    }
}
