//! Link filtering by domain.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::Action;

static LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:https?://)?(?:www\.)?((?:[a-z0-9-]+\.)+[a-z]{2,})\b(?:[/?#][^\s]*)?")
        .unwrap_or_else(|e| unreachable!("link pattern is valid: {e}"))
});

/// Anti-link configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub enabled: bool,
    pub require_admin_for_links: bool,
    pub action_on_violation: Action,
    pub allowed_domains: Vec<String>,
    pub blocked_domains: Vec<String>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        let list = |items: &[&str]| items.iter().map(|s| (*s).to_owned()).collect();
        Self {
            enabled: true,
            require_admin_for_links: false,
            action_on_violation: Action::Delete,
            allowed_domains: list(&[
                "telegram.org",
                "t.me",
                "github.com",
                "wikipedia.org",
                "youtube.com",
                "google.com",
                "twitter.com",
                "reddit.com",
                "stackoverflow.com",
                "medium.com",
            ]),
            blocked_domains: list(&[
                "bit.ly",
                "tinyurl.com",
                "goo.gl",
                "ow.ly",
                "adf.ly",
                "shorte.st",
                "bc.vc",
                "ouo.io",
                "linkbucks.com",
            ]),
        }
    }
}

/// Per-chat link policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatLinkPolicy {
    #[serde(default)]
    pub allow_all_links: bool,
    #[serde(default)]
    pub allowed_domains: HashSet<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkViolationReason {
    BlockedDomain,
    UnknownDomain,
    AdminApprovalRequired,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkViolation {
    pub link: String,
    pub domain: String,
    pub reason: LinkViolationReason,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkCheck {
    NoLinks,
    Allowed { links: Vec<String> },
    Violation {
        violations: Vec<LinkViolation>,
        action: Action,
    },
    /// The sender is blacklisted from posting.
    Blacklisted,
}

/// Domain allow/block lists with per-chat overrides.
#[derive(Debug, Default)]
pub struct AntiLink {
    enabled: bool,
    require_admin_for_links: bool,
    action: Action,
    allowed: HashSet<String>,
    blocked: HashSet<String>,
    whitelist_users: HashSet<i64>,
    blacklist_users: HashSet<i64>,
    chats: HashMap<i64, ChatLinkPolicy>,
}

impl AntiLink {
    #[must_use]
    pub fn new(config: &LinkConfig) -> Self {
        Self {
            enabled: config.enabled,
            require_admin_for_links: config.require_admin_for_links,
            action: config.action_on_violation,
            allowed: config.allowed_domains.iter().map(|d| normalize_domain(d)).collect(),
            blocked: config.blocked_domains.iter().map(|d| normalize_domain(d)).collect(),
            ..Self::default()
        }
    }

    pub fn check(&self, text: &str, user_id: i64, chat_id: i64) -> LinkCheck {
        if !self.enabled || self.whitelist_users.contains(&user_id) {
            return LinkCheck::NoLinks;
        }
        if self.blacklist_users.contains(&user_id) {
            return LinkCheck::Blacklisted;
        }

        let links = extract_links(text);
        if links.is_empty() {
            return LinkCheck::NoLinks;
        }

        let policy = self.chats.get(&chat_id);
        let mut violations = Vec::new();
        let mut allowed = Vec::new();
        for (link, domain) in links {
            match self.judge(&domain, policy) {
                None => allowed.push(link),
                Some(reason) => violations.push(LinkViolation {
                    link,
                    domain,
                    reason,
                }),
            }
        }

        if violations.is_empty() {
            LinkCheck::Allowed { links: allowed }
        } else {
            LinkCheck::Violation {
                violations,
                action: self.action,
            }
        }
    }

    fn judge(&self, domain: &str, policy: Option<&ChatLinkPolicy>) -> Option<LinkViolationReason> {
        if self.blocked.contains(domain) {
            return Some(LinkViolationReason::BlockedDomain);
        }
        if self.allowed.contains(domain) {
            return None;
        }
        if let Some(policy) = policy
            && (policy.allow_all_links || policy.allowed_domains.contains(domain))
        {
            return None;
        }
        if self.require_admin_for_links {
            return Some(LinkViolationReason::AdminApprovalRequired);
        }
        Some(LinkViolationReason::UnknownDomain)
    }

    pub fn add_allowed_domain(&mut self, domain: &str) -> bool {
        let domain = normalize_domain(domain);
        if domain.is_empty() {
            return false;
        }
        info!("Added allowed domain: {}", domain);
        self.allowed.insert(domain)
    }

    pub fn remove_allowed_domain(&mut self, domain: &str) -> bool {
        self.allowed.remove(&normalize_domain(domain))
    }

    pub fn add_blocked_domain(&mut self, domain: &str) -> bool {
        let domain = normalize_domain(domain);
        if domain.is_empty() {
            return false;
        }
        info!("Added blocked domain: {}", domain);
        self.blocked.insert(domain)
    }

    pub fn remove_blocked_domain(&mut self, domain: &str) -> bool {
        self.blocked.remove(&normalize_domain(domain))
    }

    pub fn whitelist_user(&mut self, user_id: i64) {
        self.blacklist_users.remove(&user_id);
        self.whitelist_users.insert(user_id);
    }

    pub fn blacklist_user(&mut self, user_id: i64) {
        self.whitelist_users.remove(&user_id);
        self.blacklist_users.insert(user_id);
    }

    pub fn set_chat_policy(&mut self, chat_id: i64, policy: ChatLinkPolicy) {
        self.chats.insert(chat_id, policy);
    }
}

/// Lower-cases and strips a leading `www.`.
fn normalize_domain(domain: &str) -> String {
    let lower = domain.trim().to_lowercase();
    lower.strip_prefix("www.").unwrap_or(&lower).to_owned()
}

/// Finds links with or without a scheme, returning `(link, domain)` pairs
/// without duplicates.
#[must_use]
pub fn extract_links(text: &str) -> Vec<(String, String)> {
    let mut seen = HashSet::new();
    LINK_RE
        .captures_iter(text)
        .filter_map(|caps| {
            let link = caps.get(0)?.as_str().to_owned();
            let domain = normalize_domain(caps.get(1)?.as_str());
            seen.insert(link.clone()).then_some((link, domain))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> AntiLink {
        AntiLink::new(&LinkConfig::default())
    }

    #[test]
    fn test_extract_links() {
        let links = extract_links("see https://www.GitHub.com/foo and example.org, twice example.org");
        let domains: Vec<&str> = links.iter().map(|(_, d)| d.as_str()).collect();
        assert_eq!(domains, vec!["github.com", "example.org"]);
    }

    #[test]
    fn test_plain_text_has_no_links() {
        assert_eq!(engine().check("hello, how are you?", 1, 2), LinkCheck::NoLinks);
    }

    #[test]
    fn test_allowed_domain() {
        let result = engine().check("docs at https://github.com/rust-lang", 1, 2);
        assert!(matches!(result, LinkCheck::Allowed { .. }));
    }

    #[test]
    fn test_blocked_and_unknown_domains() {
        let result = engine().check("bit.ly/xyz or https://shady.example", 1, 2);
        let LinkCheck::Violation { violations, action } = result else {
            panic!("expected violation");
        };
        assert_eq!(action, Action::Delete);
        assert_eq!(violations[0].reason, LinkViolationReason::BlockedDomain);
        assert_eq!(violations[1].reason, LinkViolationReason::UnknownDomain);
    }

    #[test]
    fn test_chat_policy_allows_domain() {
        let mut anti = engine();
        let mut policy = ChatLinkPolicy::default();
        policy.allowed_domains.insert("rust-lang.org".to_owned());
        anti.set_chat_policy(-5, policy);
        assert!(matches!(anti.check("rust-lang.org", 1, -5), LinkCheck::Allowed { .. }));
        assert!(matches!(anti.check("rust-lang.org", 1, -6), LinkCheck::Violation { .. }));
    }

    #[test]
    fn test_user_lists() {
        let mut anti = engine();
        anti.whitelist_user(1);
        anti.blacklist_user(2);
        assert_eq!(anti.check("bit.ly/x", 1, 0), LinkCheck::NoLinks);
        assert_eq!(anti.check("hi", 2, 0), LinkCheck::Blacklisted);
    }

    #[test]
    fn test_admin_approval_required() {
        let config = LinkConfig {
            require_admin_for_links: true,
            ..LinkConfig::default()
        };
        let result = AntiLink::new(&config).check("new-site.io", 1, 0);
        let LinkCheck::Violation { violations, .. } = result else {
            panic!("expected violation");
        };
        assert_eq!(violations[0].reason, LinkViolationReason::AdminApprovalRequired);
    }
}
