//! Content scanner for markup about to enter the document.
//!
//! Rules are evaluated in catalog order; the first match short-circuits.
//! The catalog only grows: rules can be appended at runtime but never
//! removed, so a scanner never becomes more permissive after startup.

use std::sync::{PoisonError, RwLock};

use guard_core::{ScannerConfig, Severity};
use regex::{Regex, RegexBuilder};

/// Errors building scan rules.
#[derive(Debug, thiserror::Error)]
pub enum ScanRuleError {
    #[error("invalid pattern for rule '{name}': {source}")]
    InvalidPattern {
        name: String,
        #[source]
        source: regex::Error,
    },

    #[error("duplicate rule name: {0}")]
    DuplicateRule(String),
}

/// Built-in catalog as `(name, pattern, severity)`.
const BUILTIN_RULES: &[(&str, &str, Severity)] = &[
    ("script_tag", r"<script\b", Severity::Critical),
    ("javascript_uri", r"javascript\s*:", Severity::Critical),
    ("event_handler", r"on\w+\s*=", Severity::High),
    ("iframe_tag", r"<iframe\b", Severity::High),
    ("object_tag", r"<object\b", Severity::High),
    ("embed_tag", r"<embed\b", Severity::High),
    ("link_tag", r"<link\b", Severity::Medium),
    ("meta_tag", r"<meta\b", Severity::Medium),
    ("css_expression", r"expression\s*\(", Severity::High),
    ("vbscript_uri", r"vbscript\s*:", Severity::Critical),
    ("data_html_uri", r"data\s*:\s*text/html", Severity::High),
];

/// One compiled catalog entry.
#[derive(Debug, Clone)]
pub struct ScanRule {
    name: String,
    pattern: Regex,
    severity: Severity,
}

impl ScanRule {
    /// Compile a rule. Patterns are matched case-insensitively.
    pub fn new(
        name: impl Into<String>,
        pattern: &str,
        severity: Severity,
    ) -> Result<Self, ScanRuleError> {
        let name = name.into();
        let pattern = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|source| ScanRuleError::InvalidPattern {
                name: name.clone(),
                source,
            })?;
        Ok(Self {
            name,
            pattern,
            severity,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    /// Source text of the pattern.
    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }
}

/// The first rule that matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanMatch {
    pub rule: String,
    pub severity: Severity,
    /// Byte offset of the match in the scanned markup.
    pub offset: usize,
}

/// Outcome of scanning one markup string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Safe,
    Unsafe(ScanMatch),
}

impl Verdict {
    pub fn is_safe(&self) -> bool {
        matches!(self, Self::Safe)
    }

    pub fn is_unsafe(&self) -> bool {
        !self.is_safe()
    }

    /// Names of the matched rules (at most one, scanning short-circuits).
    pub fn matched_patterns(&self) -> Vec<&str> {
        match self {
            Self::Safe => Vec::new(),
            Self::Unsafe(found) => vec![found.rule.as_str()],
        }
    }
}

/// Ordered, growable catalog of unsafe-markup rules.
#[derive(Debug)]
pub struct ContentScanner {
    rules: RwLock<Vec<ScanRule>>,
}

impl ContentScanner {
    /// Create a scanner with an empty catalog.
    pub fn empty() -> Self {
        Self {
            rules: RwLock::new(Vec::new()),
        }
    }

    /// Create a scanner with the built-in catalog.
    pub fn builtin() -> Result<Self, ScanRuleError> {
        let scanner = Self::empty();
        for (name, pattern, severity) in BUILTIN_RULES {
            scanner.add_rule(ScanRule::new(*name, pattern, *severity)?)?;
        }
        Ok(scanner)
    }

    /// Build the catalog described by configuration.
    pub fn from_config(config: &ScannerConfig) -> Result<Self, ScanRuleError> {
        let scanner = if config.include_builtin {
            Self::builtin()?
        } else {
            Self::empty()
        };
        for rule in &config.extra_rules {
            scanner.add_rule(ScanRule::new(
                rule.name.clone(),
                &rule.pattern,
                rule.severity,
            )?)?;
        }
        Ok(scanner)
    }

    /// Append a rule to the end of the catalog.
    pub fn add_rule(&self, rule: ScanRule) -> Result<(), ScanRuleError> {
        let mut rules = self.rules.write().unwrap_or_else(PoisonError::into_inner);
        if rules.iter().any(|existing| existing.name == rule.name) {
            return Err(ScanRuleError::DuplicateRule(rule.name));
        }
        tracing::debug!(rule = %rule.name, severity = %rule.severity, "scan rule added");
        rules.push(rule);
        Ok(())
    }

    /// Number of rules in the catalog.
    pub fn rule_count(&self) -> usize {
        self.rules.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Rule names in evaluation order.
    pub fn rule_names(&self) -> Vec<String> {
        self.rules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|rule| rule.name.clone())
            .collect()
    }

    /// Scan markup against the catalog.
    pub fn scan(&self, markup: &str) -> Verdict {
        let rules = self.rules.read().unwrap_or_else(PoisonError::into_inner);
        for rule in rules.iter() {
            if let Some(found) = rule.pattern.find(markup) {
                return Verdict::Unsafe(ScanMatch {
                    rule: rule.name.clone(),
                    severity: rule.severity,
                    offset: found.start(),
                });
            }
        }
        Verdict::Safe
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use guard_core::ScanRuleConfig;
    use proptest::prelude::*;

    fn scanner() -> ContentScanner {
        ContentScanner::builtin().unwrap()
    }

    #[test]
    fn test_event_handler_rejected() {
        let verdict = scanner().scan("<img src=x onerror=alert(1)>");
        assert!(verdict.is_unsafe());
        assert_eq!(verdict.matched_patterns(), vec!["event_handler"]);
    }

    #[test]
    fn test_event_handler_matches_without_word_boundary() {
        for markup in ["<img src=x xonerror=alert(1)>", "<p data-bonus=1>"] {
            assert_eq!(scanner().scan(markup).matched_patterns(), vec!["event_handler"], "{markup}");
        }
        assert!(scanner().scan("<form action=/x>").is_safe());
    }

    #[test]
    fn test_plain_markup_accepted() {
        let verdict = scanner().scan("<b>hello</b>");
        assert_eq!(verdict, Verdict::Safe);
        assert!(verdict.matched_patterns().is_empty());
    }

    #[test]
    fn test_builtin_catalog_order() {
        let names = scanner().rule_names();
        assert_eq!(names.len(), 11);
        assert_eq!(names[0], "script_tag");
        assert_eq!(names[10], "data_html_uri");
    }

    #[test]
    fn test_first_match_short_circuits() {
        // matches both script_tag and event_handler, script_tag comes first
        let verdict = scanner().scan("<SCRIPT onload=x()>");
        match verdict {
            Verdict::Unsafe(found) => {
                assert_eq!(found.rule, "script_tag");
                assert_eq!(found.severity, Severity::Critical);
                assert_eq!(found.offset, 0);
            }
            Verdict::Safe => panic!("expected unsafe"),
        }
    }

    #[test]
    fn test_catalog_patterns() {
        let scanner = scanner();
        let cases = [
            ("<script>alert(1)</script>", "script_tag"),
            ("<a href=\"JavaScript:void(0)\">x</a>", "javascript_uri"),
            ("<div onclick=\"go()\">", "event_handler"),
            ("<iframe src=//evil>", "iframe_tag"),
            ("<object data=x>", "object_tag"),
            ("<embed src=x>", "embed_tag"),
            ("<link rel=stylesheet>", "link_tag"),
            ("<meta http-equiv=refresh>", "meta_tag"),
            ("<p style=\"width: expression(alert(1))\">", "css_expression"),
            ("<a href='vbscript:msgbox'>", "vbscript_uri"),
            ("<a href='data:text/html;base64,xx'>", "data_html_uri"),
        ];
        for (markup, rule) in cases {
            assert_eq!(scanner.scan(markup).matched_patterns(), vec![rule], "{markup}");
        }
    }

    #[test]
    fn test_catalog_is_growable() {
        let scanner = scanner();
        assert!(scanner.scan("<svg><animate>").is_safe());
        scanner
            .add_rule(ScanRule::new("svg_tag", r"<svg\b", Severity::High).unwrap())
            .unwrap();
        assert!(scanner.scan("<svg><animate>").is_unsafe());
    }

    #[test]
    fn test_duplicate_rule_rejected() {
        let scanner = scanner();
        let result = scanner.add_rule(ScanRule::new("script_tag", "x", Severity::Low).unwrap());
        assert!(matches!(result, Err(ScanRuleError::DuplicateRule(_))));
        assert_eq!(scanner.rule_count(), 11);
    }

    #[test]
    fn test_invalid_pattern() {
        let result = ScanRule::new("broken", "(unclosed", Severity::Low);
        assert!(matches!(result, Err(ScanRuleError::InvalidPattern { .. })));
    }

    #[test]
    fn test_from_config_extra_rules() {
        let config = ScannerConfig {
            include_builtin: false,
            extra_rules: vec![ScanRuleConfig {
                name: "form_tag".into(),
                pattern: r"<form\b".into(),
                severity: Severity::Medium,
            }],
        };
        let scanner = ContentScanner::from_config(&config).unwrap();
        assert_eq!(scanner.rule_count(), 1);
        assert!(scanner.scan("<script>").is_safe());
        assert!(scanner.scan("<form action=x>").is_unsafe());
    }

    proptest! {
        #[test]
        fn prop_plain_text_is_safe(text in "[a-zA-Z0-9 .,!?]{0,200}") {
            // no '<', ':', '=' or '(' in the alphabet
            prop_assert!(scanner().scan(&text).is_safe());
        }

        #[test]
        fn prop_embedded_script_is_unsafe(
            prefix in "[a-zA-Z0-9 ]{0,50}",
            suffix in "[a-zA-Z0-9 ]{0,50}",
        ) {
            let markup = format!("{prefix}<script>alert(1)</script>{suffix}");
            prop_assert!(scanner().scan(&markup).is_unsafe());
        }

        #[test]
        fn prop_handler_attribute_is_unsafe(event in "[a-z]{1,12}") {
            let markup = format!("<div on{event}=\"x()\">");
            prop_assert!(scanner().scan(&markup).is_unsafe());
        }
    }
}
