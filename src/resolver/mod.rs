//! Element resolution: the accessibility fast path.
//!
//! Searches a snapshot of the active application's element tree for the
//! best fuzzy match against a spoken target, checking a priority-ordered
//! list of text attributes per candidate.

pub mod fuzzy;

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::accessibility::{AccessError, RoleSet, TreeAdapter, UiElement};
use crate::config::ResolverConfig;

/// Which attribute produced a candidate's winning score.
///
/// Declaration order is the search priority order: the first attribute
/// scoring at or above the threshold wins for that candidate; an absent
/// or low-scoring attribute advances to the next one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchedAttribute {
    Title,
    Description,
    Value,
}

/// One considered candidate, kept for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct CandidateScore {
    pub text: String,
    pub score: u8,
}

/// Outcome of one element search.
///
/// If `element` is set, `confidence` is at or above the threshold the
/// search ran with.
#[derive(Debug, Clone)]
pub struct MatchResult {
    pub element: Option<UiElement>,
    pub matched_attribute: Option<MatchedAttribute>,
    pub confidence: u8,
    pub candidates_considered: Vec<CandidateScore>,
}

impl MatchResult {
    fn none(candidates_considered: Vec<CandidateScore>) -> Self {
        Self {
            element: None,
            matched_attribute: None,
            confidence: 0,
            candidates_considered,
        }
    }
}

/// Accessibility-tree element search.
pub struct ElementResolver {
    provider: Arc<TreeAdapter>,
    config: ResolverConfig,
}

impl ElementResolver {
    pub fn new(provider: Arc<TreeAdapter>, config: ResolverConfig) -> Self {
        Self { provider, config }
    }

    /// The threshold this resolver searches with by default.
    pub fn threshold(&self) -> u8 {
        self.config.match_threshold
    }

    #[cfg(test)]
    pub(crate) fn provider(&self) -> &TreeAdapter {
        &self.provider
    }

    /// Search with the configured match threshold.
    pub async fn resolve(
        &self,
        roles: &RoleSet,
        target: &str,
        app_scope: Option<&str>,
    ) -> Result<MatchResult, AccessError> {
        self.resolve_with_threshold(roles, target, app_scope, self.config.match_threshold)
            .await
    }

    /// Search with an explicit threshold (used by relaxed retry
    /// strategies). The whole operation, snapshot included, runs under
    /// the search budget.
    pub async fn resolve_with_threshold(
        &self,
        roles: &RoleSet,
        target: &str,
        app_scope: Option<&str>,
        threshold: u8,
    ) -> Result<MatchResult, AccessError> {
        let budget = self.config.search_timeout();
        match tokio::time::timeout(budget, self.search(roles, target, app_scope, threshold)).await
        {
            Ok(result) => result,
            Err(_) => Err(AccessError::Timeout(self.config.search_timeout_ms)),
        }
    }

    async fn search(
        &self,
        roles: &RoleSet,
        target: &str,
        app_scope: Option<&str>,
        threshold: u8,
    ) -> Result<MatchResult, AccessError> {
        let elements = self.provider.snapshot(app_scope).await?;

        let mut considered: Vec<CandidateScore> = Vec::new();
        let mut best: Option<(usize, u8, MatchedAttribute)> = None;

        for (idx, element) in elements.iter().enumerate() {
            if !roles.contains(&element.role) || !element.enabled || !element.bounds.is_visible()
            {
                continue;
            }

            let Some((text, score_value, attribute)) = score_candidate(element, target, threshold)
            else {
                // No readable text attribute on this element; skip it
                // rather than failing the whole search.
                debug!(role = %element.role, "Candidate has no readable text attributes");
                continue;
            };

            considered.push(CandidateScore {
                text,
                score: score_value,
            });

            let Some(attribute) = attribute else {
                continue; // below threshold everywhere
            };

            let replace = match best {
                None => true,
                Some((_, best_score, _)) if score_value > best_score => true,
                Some((best_idx, best_score, _)) if score_value == best_score => {
                    // Ties: shallower tree depth wins, then first-encountered.
                    element.depth < elements[best_idx].depth
                }
                _ => false,
            };
            if replace {
                best = Some((idx, score_value, attribute));
            }
        }

        match best {
            Some((idx, confidence, attribute)) => {
                debug!(
                    target = %target,
                    matched = ?elements[idx].title,
                    confidence,
                    attribute = ?attribute,
                    candidates = considered.len(),
                    "Element resolved"
                );
                Ok(MatchResult {
                    element: Some(elements[idx].clone()),
                    matched_attribute: Some(attribute),
                    confidence,
                    candidates_considered: considered,
                })
            }
            None => {
                debug!(
                    target = %target,
                    candidates = considered.len(),
                    "No element above threshold"
                );
                Ok(MatchResult::none(considered))
            }
        }
    }
}

/// Score one candidate against the target.
///
/// Returns the best text/score seen for diagnostics, plus the attribute
/// that won (first attribute at or above the threshold, in priority
/// order), or `None` for the attribute if nothing cleared it. Returns
/// `None` entirely when the element has no text attributes at all.
fn score_candidate(
    element: &UiElement,
    target: &str,
    threshold: u8,
) -> Option<(String, u8, Option<MatchedAttribute>)> {
    let attributes = [
        (MatchedAttribute::Title, element.title.as_deref()),
        (MatchedAttribute::Description, element.description.as_deref()),
        (MatchedAttribute::Value, element.value.as_deref()),
    ];

    let mut best_text: Option<(String, u8)> = None;
    for (attribute, text) in attributes {
        let Some(text) = text else {
            continue; // absent attribute: advance to the next one
        };
        let score_value = fuzzy::score(target, text);
        if best_text.as_ref().map(|(_, s)| score_value > *s).unwrap_or(true) {
            best_text = Some((text.to_string(), score_value));
        }
        if score_value >= threshold {
            // First attribute clearing the threshold wins for this
            // candidate; lower-priority attributes are not consulted.
            return Some((text.to_string(), score_value, Some(attribute)));
        }
    }

    best_text.map(|(text, score_value)| (text, score_value, None))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessibility::{Bounds, ScriptedTree};

    fn element(role: &str, title: &str, depth: usize) -> UiElement {
        UiElement {
            role: role.to_string(),
            title: Some(title.to_string()),
            description: None,
            value: None,
            bounds: Bounds {
                x: 100,
                y: 100,
                width: 80,
                height: 24,
            },
            enabled: true,
            app: "TestApp".to_string(),
            depth,
        }
    }

    fn resolver(tree: ScriptedTree) -> ElementResolver {
        ElementResolver::new(
            Arc::new(TreeAdapter::Scripted(tree)),
            ResolverConfig::default(),
        )
    }

    #[tokio::test]
    async fn fuzzy_title_match_resolves() {
        // "Google Mail" scores 87 against "gmail link" -- above the
        // default threshold of 85.
        let tree = ScriptedTree::always(vec![element("link", "Google Mail", 4)]);
        let result = resolver(tree)
            .resolve(&RoleSet::of(["link"]), "gmail link", None)
            .await
            .unwrap();

        let matched = result.element.expect("should match");
        assert_eq!(matched.title.as_deref(), Some("Google Mail"));
        assert_eq!(result.confidence, 87);
        assert_eq!(result.matched_attribute, Some(MatchedAttribute::Title));
    }

    #[tokio::test]
    async fn highest_score_above_threshold_wins() {
        let tree = ScriptedTree::always(vec![
            element("link", "Google Mail", 3),
            element("link", "Gmail Link", 5),
        ]);
        let result = resolver(tree)
            .resolve(&RoleSet::of(["link"]), "gmail link", None)
            .await
            .unwrap();

        assert_eq!(
            result.element.unwrap().title.as_deref(),
            Some("Gmail Link")
        );
        assert_eq!(result.confidence, 100);
        assert_eq!(result.candidates_considered.len(), 2);
    }

    #[tokio::test]
    async fn ties_prefer_shallower_depth() {
        let tree = ScriptedTree::always(vec![
            element("button", "Save", 6),
            element("button", "Save", 2),
        ]);
        let result = resolver(tree)
            .resolve(&RoleSet::of(["button"]), "save", None)
            .await
            .unwrap();
        assert_eq!(result.element.unwrap().depth, 2);
    }

    #[tokio::test]
    async fn equal_ties_prefer_first_encountered() {
        let mut first = element("button", "Save", 3);
        first.app = "first".into();
        let mut second = element("button", "Save", 3);
        second.app = "second".into();
        let tree = ScriptedTree::always(vec![first, second]);
        let result = resolver(tree)
            .resolve(&RoleSet::of(["button"]), "save", None)
            .await
            .unwrap();
        assert_eq!(result.element.unwrap().app, "first");
    }

    #[tokio::test]
    async fn role_filter_excludes_other_roles() {
        let tree = ScriptedTree::always(vec![element("window", "Save", 1)]);
        let result = resolver(tree)
            .resolve(&RoleSet::of(["button"]), "save", None)
            .await
            .unwrap();
        assert!(result.element.is_none());
        assert!(result.candidates_considered.is_empty());
    }

    #[tokio::test]
    async fn disabled_and_invisible_elements_are_skipped() {
        let mut disabled = element("button", "Save", 1);
        disabled.enabled = false;
        let mut invisible = element("button", "Save", 1);
        invisible.bounds = Bounds::default();
        let tree = ScriptedTree::always(vec![disabled, invisible]);
        let result = resolver(tree)
            .resolve(&RoleSet::of(["button"]), "save", None)
            .await
            .unwrap();
        assert!(result.element.is_none());
    }

    #[tokio::test]
    async fn low_scoring_title_advances_to_description() {
        let mut el = element("button", "Toolbar Item", 2);
        el.description = Some("Save Document".to_string());
        let tree = ScriptedTree::always(vec![el]);
        let result = resolver(tree)
            .resolve(&RoleSet::of(["button"]), "save", None)
            .await
            .unwrap();
        assert_eq!(
            result.matched_attribute,
            Some(MatchedAttribute::Description)
        );
        assert!(result.confidence >= 85);
    }

    #[tokio::test]
    async fn empty_snapshot_yields_no_match_not_error() {
        let tree = ScriptedTree::always(vec![]);
        let result = resolver(tree)
            .resolve(&RoleSet::of(["button"]), "save", None)
            .await
            .unwrap();
        assert!(result.element.is_none());
        assert_eq!(result.confidence, 0);
    }

    #[tokio::test]
    async fn below_threshold_candidates_are_recorded() {
        let tree = ScriptedTree::always(vec![element("button", "Print Preview", 2)]);
        let result = resolver(tree)
            .resolve(&RoleSet::of(["button"]), "save document", None)
            .await
            .unwrap();
        assert!(result.element.is_none());
        assert_eq!(result.candidates_considered.len(), 1);
        assert_eq!(result.candidates_considered[0].text, "Print Preview");
    }

    #[tokio::test]
    async fn lowered_threshold_admits_weaker_matches() {
        let tree = ScriptedTree::always(vec![element("button", "Google Mail", 2)]);
        let resolver = resolver(tree);
        let strict = resolver
            .resolve_with_threshold(&RoleSet::any(), "gmail link", None, 95)
            .await
            .unwrap();
        assert!(strict.element.is_none());
        let relaxed = resolver
            .resolve_with_threshold(&RoleSet::any(), "gmail link", None, 80)
            .await
            .unwrap();
        assert!(relaxed.element.is_some());
    }

    #[tokio::test]
    async fn slow_snapshot_times_out() {
        let tree =
            ScriptedTree::always(vec![element("button", "Save", 1)]).with_delay_ms(200);
        let resolver = ElementResolver::new(
            Arc::new(TreeAdapter::Scripted(tree)),
            ResolverConfig {
                search_timeout_ms: 20,
                ..ResolverConfig::default()
            },
        );
        let err = resolver
            .resolve(&RoleSet::any(), "save", None)
            .await
            .unwrap_err();
        assert!(matches!(err, AccessError::Timeout(_)));
    }
}
