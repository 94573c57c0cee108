//! Inline reference grammars
//!
//! Dependency references come in three shapes:
//! - short numeric agent refs (`003`), or plan-qualified ones (`0042#003`)
//! - explicit `agent:NNNN#NNN` tokens
//! - bare plan refs `NNNN`, which point at a whole plan
//!
//! Bare and short forms are only read where a dependency is clearly meant:
//! frontmatter `dependencies` entries and prose lines that talk about
//! dependencies. Explicit `agent:` tokens are recognised anywhere.

use crate::graph::{normalize_tag, CanonicalRef, EntityType};
use regex_lite::Regex;
use std::sync::OnceLock;

fn agent_token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\bagent:(\d{4})#(\d{3})\b").expect("valid agent token pattern"))
}

fn qualified_ref_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:^|[^\w#:])(\d{4})(?:#(\d{3}))?\b").expect("valid plan ref pattern")
    })
}

fn short_ref_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?:^|[^\w#:])(\d{3})\b").expect("valid short ref pattern"))
}

fn inline_tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?:^|\s)#([A-Za-z][\w-]*)").expect("valid tag pattern"))
}

fn path_like_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[\w.\-]+(?:/[\w.\-]+)*/?$").expect("valid path pattern"))
}

fn extension_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\.[A-Za-z][A-Za-z0-9]{0,7}$").expect("valid extension pattern"))
}

/// Parse a single dependency entry from frontmatter.
///
/// Accepts `agent:NNNN#NNN`, `plan:NNNN`, `NNNN#NNN`, `NNNN` and short
/// agent numbers of one to three digits (YAML turns `003` into `3`).
pub(crate) fn parse_dependency_entry(entry: &str, plan_id: &str) -> Option<CanonicalRef> {
    let entry = entry.trim();

    if let Some(parsed) = CanonicalRef::parse(entry) {
        return match parsed.entity_type {
            EntityType::Agent | EntityType::Plan
                if is_reference_value(&parsed.value) =>
            {
                Some(parsed)
            }
            _ => None,
        };
    }

    if let Some((plan, agent)) = entry.split_once('#') {
        return (is_digits(plan, 4) && is_digits(agent, 3)).then(|| CanonicalRef::agent(plan, agent));
    }

    if is_digits(entry, 4) {
        return Some(CanonicalRef::plan(entry));
    }

    if !entry.is_empty() && entry.len() <= 3 && entry.chars().all(|c| c.is_ascii_digit()) {
        return Some(CanonicalRef::agent(plan_id, &format!("{:0>3}", entry)));
    }

    None
}

fn is_reference_value(value: &str) -> bool {
    match value.split_once('#') {
        Some((plan, agent)) => is_digits(plan, 4) && is_digits(agent, 3),
        None => is_digits(value, 4),
    }
}

fn is_digits(s: &str, len: usize) -> bool {
    s.len() == len && s.chars().all(|c| c.is_ascii_digit())
}

/// Whether a prose line talks about dependencies
pub(crate) fn mentions_dependency(line: &str) -> bool {
    line.to_lowercase().contains("depend")
}

/// Explicit `agent:NNNN#NNN` tokens anywhere in the text
pub(crate) fn scan_agent_tokens(text: &str) -> Vec<CanonicalRef> {
    agent_token_re()
        .captures_iter(text)
        .map(|caps| CanonicalRef::agent(&caps[1], &caps[2]))
        .collect()
}

/// Bare and short references on a dependency line
pub(crate) fn scan_dependency_line(line: &str, plan_id: &str) -> Vec<CanonicalRef> {
    // Strip explicit tokens first so their digits are not read twice
    let stripped = agent_token_re().replace_all(line, " ");
    let mut refs = Vec::new();

    for caps in qualified_ref_re().captures_iter(&stripped) {
        let plan = &caps[1];
        match caps.get(2) {
            Some(agent) => refs.push(CanonicalRef::agent(plan, agent.as_str())),
            None => refs.push(CanonicalRef::plan(plan)),
        }
    }

    for caps in short_ref_re().captures_iter(&stripped) {
        refs.push(CanonicalRef::agent(plan_id, &caps[1]));
    }

    refs
}

/// Normalized inline `#tag` names; invalid ones are dropped
pub(crate) fn scan_tags(text: &str) -> Vec<String> {
    inline_tag_re()
        .captures_iter(text)
        .filter_map(|caps| normalize_tag(&caps[1]))
        .collect()
}

/// Whether an inline code span looks like a file path rather than code
pub(crate) fn looks_like_path(span: &str) -> bool {
    let span = span.trim();
    if span.is_empty() || !span.chars().any(|c| c.is_ascii_alphabetic()) {
        return false;
    }
    if !path_like_re().is_match(span) {
        return false;
    }
    span.contains('/') || extension_re().is_match(span)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(refs: &[CanonicalRef]) -> Vec<String> {
        refs.iter().map(|r| r.to_string()).collect()
    }

    #[test]
    fn dependency_entries() {
        let p = "0042";
        let parse = |s: &str| parse_dependency_entry(s, p).map(|r| r.to_string());

        assert_eq!(parse("003").as_deref(), Some("agent:0042#003"));
        assert_eq!(parse("3").as_deref(), Some("agent:0042#003"));
        assert_eq!(parse("0007#001").as_deref(), Some("agent:0007#001"));
        assert_eq!(parse("agent:0007#001").as_deref(), Some("agent:0007#001"));
        assert_eq!(parse("0007").as_deref(), Some("plan:0007"));
        assert_eq!(parse("plan:0007").as_deref(), Some("plan:0007"));
        assert_eq!(parse(" 12 ").as_deref(), Some("agent:0042#012"));

        assert_eq!(parse("tag:rust"), None);
        assert_eq!(parse("agent:42#1"), None);
        assert_eq!(parse("00071"), None);
        assert_eq!(parse("7#1"), None);
        assert_eq!(parse("soon"), None);
        assert_eq!(parse(""), None);
    }

    #[test]
    fn agent_tokens_anywhere() {
        let refs = scan_agent_tokens("Coordinate with agent:0001#002 and agent:0003#010.");
        assert_eq!(ids(&refs), vec!["agent:0001#002", "agent:0003#010"]);
        assert!(scan_agent_tokens("agent:01#002").is_empty());
    }

    #[test]
    fn dependency_line_grammars() {
        let refs = scan_dependency_line("Depends on 0001, 0003#002 and 004", "0042");
        assert_eq!(
            ids(&refs),
            vec!["plan:0001", "agent:0003#002", "agent:0042#004"]
        );
    }

    #[test]
    fn dependency_line_skips_explicit_tokens_and_long_numbers() {
        let refs = scan_dependency_line("depends on agent:0001#002 (ticket 123456)", "0042");
        assert!(refs.is_empty());
    }

    #[test]
    fn mentions_dependency_is_case_insensitive() {
        assert!(mentions_dependency("DEPENDS ON: 0001"));
        assert!(mentions_dependency("No dependencies"));
        assert!(!mentions_dependency("Shipped in 2024"));
    }

    #[test]
    fn inline_tags() {
        let tags = scan_tags("#Backend work with #api-v2, not issue#12 or #9lives");
        assert_eq!(tags, vec!["backend", "api-v2"]);
    }

    #[test]
    fn path_detection() {
        assert!(looks_like_path("src/lib.rs"));
        assert!(looks_like_path("Cargo.toml"));
        assert!(looks_like_path("docs/"));
        assert!(looks_like_path("shared.ts"));

        assert!(!looks_like_path("cargo test"));
        assert!(!looks_like_path("foo.bar()"));
        assert!(!looks_like_path("https://example.com/x"));
        assert!(!looks_like_path("v1.2"));
        assert!(!looks_like_path("1.0"));
        assert!(!looks_like_path("identifier"));
    }
}
