//! Guarded markup insertion.
//!
//! Every entry point that accepts a markup string scans it first. Unsafe
//! markup is dropped whole: the target is left untouched.

use std::sync::Arc;

use guard_core::{GuardError, GuardResult};
use guard_observability::{SecurityEvent, SecurityEventReporter};
use guard_security::{ContentScanner, Verdict};

/// Where `insert_adjacent_html` places markup relative to the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertPosition {
    BeforeBegin,
    AfterBegin,
    BeforeEnd,
    AfterEnd,
}

/// A node accepting raw markup.
pub trait MarkupTarget {
    fn set_inner_html(&mut self, markup: &str);
    fn insert_adjacent_html(&mut self, position: InsertPosition, markup: &str);
}

/// In-memory element: inner markup plus siblings inserted around it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MarkupBuffer {
    pub before: String,
    pub inner: String,
    pub after: String,
}

impl MarkupBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Outer markup as it would appear in the document.
    pub fn render(&self, tag: &str) -> String {
        format!("{}<{tag}>{}</{tag}>{}", self.before, self.inner, self.after)
    }
}

impl MarkupTarget for MarkupBuffer {
    fn set_inner_html(&mut self, markup: &str) {
        self.inner = markup.to_string();
    }

    fn insert_adjacent_html(&mut self, position: InsertPosition, markup: &str) {
        match position {
            InsertPosition::BeforeBegin => self.before.push_str(markup),
            InsertPosition::AfterBegin => self.inner.insert_str(0, markup),
            InsertPosition::BeforeEnd => self.inner.push_str(markup),
            InsertPosition::AfterEnd => self.after.insert_str(0, markup),
        }
    }
}

/// Scans markup before it reaches a `MarkupTarget`.
#[derive(Clone)]
pub struct RenderGuard {
    scanner: Arc<ContentScanner>,
    reporter: Arc<SecurityEventReporter>,
}

impl RenderGuard {
    pub fn new(scanner: Arc<ContentScanner>, reporter: Arc<SecurityEventReporter>) -> Self {
        Self { scanner, reporter }
    }

    /// Accept or reject markup without applying it.
    pub fn check(&self, markup: &str) -> GuardResult<()> {
        match self.scanner.scan(markup) {
            Verdict::Safe => Ok(()),
            Verdict::Unsafe(found) => {
                tracing::warn!(
                    rule = %found.rule,
                    severity = %found.severity,
                    offset = found.offset,
                    len = markup.len(),
                    "unsafe markup dropped"
                );
                let error = GuardError::UnsafeContentRejected {
                    pattern: found.rule.clone(),
                };
                self.reporter.report(
                    SecurityEvent::new(error.kind(), found.severity)
                        .with_field("rule", found.rule)
                        .with_field("offset", found.offset),
                );
                Err(error)
            }
        }
    }

    pub fn set_inner_html<T: MarkupTarget + ?Sized>(
        &self,
        target: &mut T,
        markup: &str,
    ) -> GuardResult<()> {
        self.check(markup)?;
        target.set_inner_html(markup);
        Ok(())
    }

    pub fn insert_adjacent_html<T: MarkupTarget + ?Sized>(
        &self,
        target: &mut T,
        position: InsertPosition,
        markup: &str,
    ) -> GuardResult<()> {
        self.check(markup)?;
        target.insert_adjacent_html(position, markup);
        Ok(())
    }
}

impl std::fmt::Debug for RenderGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderGuard")
            .field("rules", &self.scanner.rule_count())
            .finish()
    }
}
