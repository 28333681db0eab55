//! Recursion policy engine.
//!
//! Pure decision logic: given the per-job visited set and a batch of links
//! discovered on a page, select the subset to enqueue and tag it with the
//! next depth. The visited set is keyed by canonical URL strings and is the
//! sole dedup authority; it only ever grows.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::PolicyError;
use crate::job::JobId;

/// Schemes eligible for fetching. Everything else is counted `ignored`.
pub const SCHEME_ALLOWLIST: [&str; 2] = ["http", "https"];

/// A discovered URL queued for fetching. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlRecord {
    /// Canonical absolute URL.
    pub url: String,
    /// Distance from the root; the root itself has depth 0.
    pub depth: u32,
    /// Owning job.
    pub job: JobId,
}

/// Canonicalize a URL for dedup and policy checks: must parse as an absolute
/// http(s) URL; the fragment is stripped; scheme, host, path and query are
/// kept as-is (in particular a trailing slash stays significant).
pub fn canonicalize(raw: &str) -> Result<String, PolicyError> {
    let mut url = Url::parse(raw).map_err(|_| PolicyError(raw.to_string()))?;
    if !SCHEME_ALLOWLIST.contains(&url.scheme()) {
        return Err(PolicyError(raw.to_string()));
    }
    url.set_fragment(None);
    Ok(url.to_string())
}

/// Rule deciding which discovered links are queued for further fetching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecursionPolicy {
    /// Maximum link distance from the root. `DepthLimit(0)` fetches only the
    /// root itself.
    DepthLimit(u32),
    /// Literal string prefix the canonical URL must start with. The trailing
    /// slash is significant: `https://x/dir/` rejects `https://x/dir-other`.
    PrefixLimit(String),
}

impl RecursionPolicy {
    /// Parse a policy spec from the control channel: a non-negative decimal
    /// integer selects [`RecursionPolicy::DepthLimit`], the literal token
    /// `prefix` bounds recursion to the (canonical) root URL.
    pub fn parse(spec: &str, root: &str) -> Result<Self, PolicyError> {
        if spec == "prefix" {
            Ok(Self::PrefixLimit(root.to_string()))
        } else if !spec.is_empty() && spec.bytes().all(|b| b.is_ascii_digit()) {
            spec.parse::<u32>()
                .map(Self::DepthLimit)
                .map_err(|_| PolicyError(spec.to_string()))
        } else {
            Err(PolicyError(spec.to_string()))
        }
    }

    /// Whether a link discovered at `parent_depth` with canonical URL
    /// `candidate` may be fetched at all.
    #[must_use]
    pub fn accepts(&self, parent_depth: u32, candidate: &str) -> bool {
        match self {
            Self::DepthLimit(max) => parent_depth < *max,
            Self::PrefixLimit(prefix) => candidate.starts_with(prefix.as_str()),
        }
    }
}

/// Outcome of feeding one batch of discovered links through the engine.
#[derive(Debug, Default)]
pub struct LinkDecision {
    /// Links to enqueue, tagged with `parent_depth + 1`, in discovery order.
    pub accepted: Vec<UrlRecord>,
    /// Malformed or non-http(s) links, to be counted `ignored`.
    pub ignored: u64,
}

/// Per-job recursion state: the policy plus the monotonically growing
/// visited set.
#[derive(Debug)]
pub struct RecursionEngine {
    job: JobId,
    policy: RecursionPolicy,
    visited: HashSet<String>,
}

impl RecursionEngine {
    #[must_use]
    pub fn new(job: JobId, policy: RecursionPolicy) -> Self {
        Self {
            job,
            policy,
            visited: HashSet::new(),
        }
    }

    /// Admit the root URL at depth 0, marking it visited.
    pub fn admit_root(&mut self, root: &str) -> Result<UrlRecord, PolicyError> {
        let canonical = canonicalize(root)?;
        self.visited.insert(canonical.clone());
        Ok(UrlRecord {
            url: canonical,
            depth: 0,
            job: self.job.clone(),
        })
    }

    /// Decide a batch of links discovered at `parent_depth`.
    ///
    /// First-seen wins: a URL already in the visited set is dropped silently
    /// without touching any counter. Malformed links count toward
    /// [`LinkDecision::ignored`]; policy-rejected links are dropped silently.
    pub fn decide(&mut self, parent_depth: u32, links: &[String]) -> LinkDecision {
        let mut decision = LinkDecision::default();
        for link in links {
            let canonical = match canonicalize(link) {
                Ok(c) => c,
                Err(_) => {
                    decision.ignored += 1;
                    continue;
                }
            };
            if !self.policy.accepts(parent_depth, &canonical) {
                continue;
            }
            if !self.visited.insert(canonical.clone()) {
                continue;
            }
            decision.accepted.push(UrlRecord {
                url: canonical,
                depth: parent_depth + 1,
                job: self.job.clone(),
            });
        }
        decision
    }

    /// Number of distinct canonical URLs seen so far.
    #[must_use]
    pub fn visited_len(&self) -> usize {
        self.visited.len()
    }

    #[must_use]
    pub fn policy(&self) -> &RecursionPolicy {
        &self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(policy: RecursionPolicy) -> RecursionEngine {
        RecursionEngine::new(JobId::from("gutih-tugad-gutih-tugad"), policy)
    }

    #[test]
    fn canonicalize_strips_fragment_only() {
        assert_eq!(
            canonicalize("https://example.com/a?x=1#frag").unwrap(),
            "https://example.com/a?x=1"
        );
        // trailing slash is preserved, not normalized away
        assert_eq!(
            canonicalize("https://example.com/dir/").unwrap(),
            "https://example.com/dir/"
        );
    }

    #[test]
    fn canonicalize_rejects_non_http_schemes() {
        assert!(canonicalize("ftp://example.com/").is_err());
        assert!(canonicalize("javascript:void(0)").is_err());
        assert!(canonicalize("not a url").is_err());
    }

    #[test]
    fn parse_policy_spec() {
        assert_eq!(
            RecursionPolicy::parse("0", "https://x/").unwrap(),
            RecursionPolicy::DepthLimit(0)
        );
        assert_eq!(
            RecursionPolicy::parse("3", "https://x/").unwrap(),
            RecursionPolicy::DepthLimit(3)
        );
        assert_eq!(
            RecursionPolicy::parse("prefix", "https://x/dir/").unwrap(),
            RecursionPolicy::PrefixLimit("https://x/dir/".to_string())
        );
        assert!(RecursionPolicy::parse("-1", "https://x/").is_err());
        assert!(RecursionPolicy::parse("deep", "https://x/").is_err());
        assert!(RecursionPolicy::parse("", "https://x/").is_err());
    }

    #[test]
    fn depth_zero_accepts_nothing_beyond_root() {
        let mut e = engine(RecursionPolicy::DepthLimit(0));
        e.admit_root("https://example.com/").unwrap();
        let d = e.decide(0, &["https://example.com/a".to_string()]);
        assert!(d.accepted.is_empty());
        assert_eq!(d.ignored, 0);
    }

    #[test]
    fn depth_limit_tags_children_with_parent_plus_one() {
        let mut e = engine(RecursionPolicy::DepthLimit(2));
        e.admit_root("https://example.com/").unwrap();
        let d = e.decide(0, &["https://example.com/a".to_string()]);
        assert_eq!(d.accepted.len(), 1);
        assert_eq!(d.accepted[0].depth, 1);

        let d = e.decide(1, &["https://example.com/b".to_string()]);
        assert_eq!(d.accepted[0].depth, 2);

        // parent at the limit: no further expansion
        let d = e.decide(2, &["https://example.com/c".to_string()]);
        assert!(d.accepted.is_empty());
    }

    #[test]
    fn prefix_trailing_slash_is_significant() {
        let mut e = engine(RecursionPolicy::PrefixLimit(
            "https://example.com/dir/".to_string(),
        ));
        e.admit_root("https://example.com/dir/").unwrap();
        let d = e.decide(
            0,
            &[
                "https://example.com/dir/a".to_string(),
                "https://example.com/dir-other".to_string(),
                "https://example.com/dir.html".to_string(),
                "https://example.com/dir/b/c".to_string(),
            ],
        );
        let urls: Vec<&str> = d.accepted.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(
            urls,
            vec!["https://example.com/dir/a", "https://example.com/dir/b/c"]
        );
    }

    #[test]
    fn rediscovery_is_dropped_without_counting() {
        let mut e = engine(RecursionPolicy::DepthLimit(5));
        e.admit_root("https://example.com/").unwrap();
        let first = e.decide(0, &["https://example.com/a#one".to_string()]);
        assert_eq!(first.accepted.len(), 1);

        // same canonical URL again, different fragment and depth
        let again = e.decide(1, &["https://example.com/a#two".to_string()]);
        assert!(again.accepted.is_empty());
        assert_eq!(again.ignored, 0);
        assert_eq!(e.visited_len(), 2);
    }

    #[test]
    fn malformed_links_count_as_ignored() {
        let mut e = engine(RecursionPolicy::DepthLimit(5));
        e.admit_root("https://example.com/").unwrap();
        let d = e.decide(
            0,
            &[
                "mailto:someone@example.com".to_string(),
                "::not-a-url::".to_string(),
                "https://example.com/ok".to_string(),
            ],
        );
        assert_eq!(d.ignored, 2);
        assert_eq!(d.accepted.len(), 1);
    }
}
