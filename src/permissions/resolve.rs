//! The single precedence rule shared by permission checks and storage filters.
//!
//! Specificity, most specific first:
//! 1. a rule naming the exact record key beats a collection-wide rule;
//! 2. an exact collection beats a wildcard pattern, and a longer wildcard
//!    prefix beats a shorter one (`*` is the least specific);
//! 3. at equal specificity `Deny` beats `Allow`.
//!
//! No matching rule yields `None`, which callers treat as deny.

use super::types::{Effect, ScopeRule};

/// Whether `pattern` covers `collection`. Patterns are an exact name,
/// `prefix.*` or `*`.
pub fn collection_matches(pattern: &str, collection: &str) -> bool {
    if pattern == "*" || pattern == collection {
        return true;
    }
    match pattern.strip_suffix('*') {
        Some(prefix) if prefix.ends_with('.') => collection.starts_with(prefix),
        _ => false,
    }
}

/// Whether two collection patterns can match a common collection.
pub fn collections_overlap(a: &str, b: &str) -> bool {
    collection_matches(a, b) || collection_matches(b, a)
}

/// Ordering key for how specific a rule is. Larger is more specific.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Specificity {
    names_record: bool,
    exact_collection: bool,
    prefix_len: usize,
}

impl Specificity {
    pub fn of(rule: &ScopeRule) -> Self {
        let exact_collection = !(rule.collection == "*" || rule.collection.ends_with(".*"));
        Self {
            names_record: rule.record_key.is_some(),
            exact_collection,
            prefix_len: rule.collection.len(),
        }
    }
}

/// Whether `rule` applies to the record `(collection, record_key)`.
///
/// An empty `record_key` asks about the collection as a whole, which only
/// collection-wide rules answer.
pub fn rule_matches(rule: &ScopeRule, collection: &str, record_key: &str) -> bool {
    if !collection_matches(&rule.collection, collection) {
        return false;
    }
    match rule.record_key.as_deref() {
        None => true,
        Some(key) => !record_key.is_empty() && key == record_key,
    }
}

/// Returns the decisive rule among `rules` for `(collection, record_key)`.
pub fn decisive<'a, I>(rules: I, collection: &str, record_key: &str) -> Option<&'a ScopeRule>
where
    I: IntoIterator<Item = &'a ScopeRule>,
{
    let mut best: Option<(Specificity, &'a ScopeRule)> = None;
    for rule in rules {
        if !rule_matches(rule, collection, record_key) {
            continue;
        }
        let specificity = Specificity::of(rule);
        let replace = match &best {
            None => true,
            Some((current, current_rule)) => {
                specificity > *current
                    || (specificity == *current
                        && rule.effect == Effect::Deny
                        && current_rule.effect == Effect::Allow)
            }
        };
        if replace {
            best = Some((specificity, rule));
        }
    }
    best.map(|(_, rule)| rule)
}

/// Resolves the effect `rules` give `(collection, record_key)`.
pub fn resolve<'a, I>(rules: I, collection: &str, record_key: &str) -> Option<Effect>
where
    I: IntoIterator<Item = &'a ScopeRule>,
{
    decisive(rules, collection, record_key).map(|rule| rule.effect)
}

/// Convenience wrapper: true only when the decisive rule allows.
pub fn is_allowed<'a, I>(rules: I, collection: &str, record_key: &str) -> bool
where
    I: IntoIterator<Item = &'a ScopeRule>,
{
    resolve(rules, collection, record_key) == Some(Effect::Allow)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_rules_fails_closed() {
        let rules: Vec<ScopeRule> = Vec::new();
        assert_eq!(resolve(&rules, "app.posts", "p1"), None);
        assert!(!is_allowed(&rules, "app.posts", "p1"));
    }

    #[test]
    fn record_key_beats_collection_wide() {
        let rules = vec![
            ScopeRule::allow("app.posts", None),
            ScopeRule::deny("app.posts", Some("p1")),
        ];
        assert_eq!(resolve(&rules, "app.posts", "p1"), Some(Effect::Deny));
        assert_eq!(resolve(&rules, "app.posts", "p2"), Some(Effect::Allow));

        let rules = vec![
            ScopeRule::deny("app.posts", None),
            ScopeRule::allow("app.posts", Some("p1")),
        ];
        assert_eq!(resolve(&rules, "app.posts", "p1"), Some(Effect::Allow));
        assert_eq!(resolve(&rules, "app.posts", "p2"), Some(Effect::Deny));
    }

    #[test]
    fn deny_wins_at_equal_specificity() {
        let rules = vec![
            ScopeRule::allow("app.posts", None),
            ScopeRule::deny("app.posts", None),
        ];
        assert_eq!(resolve(&rules, "app.posts", "p1"), Some(Effect::Deny));
        let reversed: Vec<_> = rules.into_iter().rev().collect();
        assert_eq!(resolve(&reversed, "app.posts", "p1"), Some(Effect::Deny));
    }

    #[test]
    fn longest_wildcard_match_wins() {
        let rules = vec![
            ScopeRule::allow("*", None),
            ScopeRule::deny("app.*", None),
            ScopeRule::allow("app.posts.*", None),
        ];
        assert_eq!(resolve(&rules, "app.posts.drafts", "k"), Some(Effect::Allow));
        assert_eq!(resolve(&rules, "app.likes", "k"), Some(Effect::Deny));
        assert_eq!(resolve(&rules, "other.thing", "k"), Some(Effect::Allow));

        let exact_over_wildcard = vec![
            ScopeRule::deny("app.*", None),
            ScopeRule::allow("app.likes", None),
        ];
        assert_eq!(
            resolve(&exact_over_wildcard, "app.likes", "k"),
            Some(Effect::Allow)
        );
    }

    #[test]
    fn wildcard_matching_respects_segment_boundaries() {
        assert!(collection_matches("app.*", "app.posts"));
        assert!(!collection_matches("app.*", "apple.posts"));
        assert!(!collection_matches("app.*", "app"));
        assert!(collection_matches("*", "anything"));
        assert!(!collection_matches("app.posts", "app.posts2"));
    }

    #[test]
    fn empty_record_key_only_sees_collection_rules() {
        let rules = vec![ScopeRule::allow("app.posts", Some("p1"))];
        assert_eq!(resolve(&rules, "app.posts", ""), None);
    }
}
