// Copyright 2026 the Cadence Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Render-surface contract for platform integrations.
//!
//! The [`RenderSurface`] trait is the lowest-level write primitive: setting
//! one style property on one target, or replacing a target's whole style
//! text. Backends implement it over a platform-native tree (e.g. DOM
//! elements); the [`WriteBatcher`](crate::batch::WriteBatcher) is the only
//! component that calls it during normal operation.
//!
//! [`MemorySurface`] is an in-memory implementation that records every call.
//! It backs headless runs and the crate's own tests.

use hashbrown::HashMap;

use crate::batch::TargetId;
use crate::error::SurfaceError;

/// Applies style mutations to a platform-native presentation tree.
pub trait RenderSurface {
    /// Sets a single property on `target`.
    fn set_property(
        &mut self,
        target: TargetId,
        property: &str,
        value: &str,
    ) -> Result<(), SurfaceError>;

    /// Returns the full inline style text of `target`.
    fn style_text(&self, target: TargetId) -> Result<String, SurfaceError>;

    /// Replaces the full inline style text of `target`.
    fn set_style_text(&mut self, target: TargetId, text: &str) -> Result<(), SurfaceError>;

    /// Whether the surface is currently visible to the user.
    ///
    /// Hidden surfaces may not receive repaint callbacks, which changes how
    /// the batcher schedules its flush.
    fn is_visible(&self) -> bool {
        true
    }
}

/// One call recorded by [`MemorySurface`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SurfaceOp {
    /// A single-property write.
    SetProperty {
        /// Target written.
        target: TargetId,
        /// Property name.
        property: String,
        /// Value written.
        value: String,
    },
    /// A full style-text replacement.
    SetStyleText {
        /// Target written.
        target: TargetId,
        /// New style text.
        text: String,
    },
}

/// In-memory [`RenderSurface`] that keeps declarations per target and a log
/// of every mutation.
#[derive(Debug, Default)]
pub struct MemorySurface {
    styles: HashMap<TargetId, Vec<(String, String)>>,
    ops: Vec<SurfaceOp>,
    rejected: Vec<String>,
    hidden: bool,
}

impl MemorySurface {
    /// Creates an empty, visible surface.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of `property` on `target`.
    #[must_use]
    pub fn property(&self, target: TargetId, property: &str) -> Option<&str> {
        self.styles
            .get(&target)?
            .iter()
            .find(|(name, _)| name == property)
            .map(|(_, value)| value.as_str())
    }

    /// Every mutation applied so far, in order.
    #[must_use]
    pub fn ops(&self) -> &[SurfaceOp] {
        &self.ops
    }

    /// Number of mutations that touched `property`, either directly or by
    /// appearing in a style-text replacement.
    #[must_use]
    pub fn writes_to(&self, property: &str) -> usize {
        self.ops
            .iter()
            .filter(|op| match op {
                SurfaceOp::SetProperty { property: p, .. } => p == property,
                SurfaceOp::SetStyleText { text, .. } => parse_declarations(text)
                    .iter()
                    .any(|(name, _)| name == property),
            })
            .count()
    }

    /// Forgets the mutation log, keeping current styles.
    pub fn clear_ops(&mut self) {
        self.ops.clear();
    }

    /// Makes every write that mentions `property` fail with
    /// [`SurfaceError::InvalidValue`]. Useful for exercising error paths.
    pub fn reject_property(&mut self, property: impl Into<String>) {
        self.rejected.push(property.into());
    }

    /// Marks the surface hidden or visible.
    pub fn set_visible(&mut self, visible: bool) {
        self.hidden = !visible;
    }

    fn check(&self, property: &str, value: &str) -> Result<(), SurfaceError> {
        if self.rejected.iter().any(|r| r == property) {
            return Err(SurfaceError::InvalidValue {
                property: property.to_owned(),
                value: value.to_owned(),
            });
        }
        Ok(())
    }
}

impl RenderSurface for MemorySurface {
    fn set_property(
        &mut self,
        target: TargetId,
        property: &str,
        value: &str,
    ) -> Result<(), SurfaceError> {
        self.check(property, value)?;
        let decls = self.styles.entry(target).or_default();
        match decls.iter_mut().find(|(name, _)| name == property) {
            Some(slot) => value.clone_into(&mut slot.1),
            None => decls.push((property.to_owned(), value.to_owned())),
        }
        self.ops.push(SurfaceOp::SetProperty {
            target,
            property: property.to_owned(),
            value: value.to_owned(),
        });
        Ok(())
    }

    fn style_text(&self, target: TargetId) -> Result<String, SurfaceError> {
        Ok(self
            .styles
            .get(&target)
            .map(|decls| format_declarations(decls.iter().map(|(n, v)| (n.as_str(), v.as_str()))))
            .unwrap_or_default())
    }

    fn set_style_text(&mut self, target: TargetId, text: &str) -> Result<(), SurfaceError> {
        let decls = parse_declarations(text);
        for (name, value) in &decls {
            self.check(name, value)?;
        }
        self.styles.insert(target, decls);
        self.ops.push(SurfaceOp::SetStyleText {
            target,
            text: text.to_owned(),
        });
        Ok(())
    }

    fn is_visible(&self) -> bool {
        !self.hidden
    }
}

/// Splits inline style text into `(name, value)` declarations.
///
/// Semicolons inside quoted strings or parentheses (`url(...)`) belong to
/// the value. Empty declarations and declarations without a colon are
/// dropped.
pub(crate) fn parse_declarations(text: &str) -> Vec<(String, String)> {
    split_declarations(text)
        .into_iter()
        .filter_map(|decl| {
            let (name, value) = decl.split_once(':')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            Some((name.to_owned(), value.trim().to_owned()))
        })
        .collect()
}

fn split_declarations(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut quote: Option<char> = None;
    let mut depth = 0_u32;
    let mut escaped = false;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match (c, quote) {
            ('\\', _) => escaped = true,
            (c, Some(open)) if c == open => quote = None,
            (_, Some(_)) => {}
            ('"' | '\'', None) => quote = Some(c),
            ('(', None) => depth += 1,
            (')', None) => depth = depth.saturating_sub(1),
            (';', None) if depth == 0 => {
                parts.push(&text[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&text[start..]);
    parts
}

/// Joins declarations back into inline style text (`a: 1; b: 2;`).
pub(crate) fn format_declarations<'a>(decls: impl Iterator<Item = (&'a str, &'a str)>) -> String {
    let mut out = String::new();
    for (name, value) in decls {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(name);
        out.push_str(": ");
        out.push_str(value);
        out.push(';');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_property_upserts_in_place() {
        let mut s = MemorySurface::new();
        s.set_property(TargetId::ROOT, "--fx-hue", "10").unwrap();
        s.set_property(TargetId::ROOT, "--fx-glow", "0.5").unwrap();
        s.set_property(TargetId::ROOT, "--fx-hue", "20").unwrap();
        assert_eq!(s.property(TargetId::ROOT, "--fx-hue"), Some("20"));
        assert_eq!(
            s.style_text(TargetId::ROOT).unwrap(),
            "--fx-hue: 20; --fx-glow: 0.5;"
        );
        assert_eq!(s.writes_to("--fx-hue"), 2);
    }

    #[test]
    fn style_text_round_trips_through_parser() {
        let mut s = MemorySurface::new();
        let target = TargetId(3);
        s.set_style_text(target, "color: red;  --fx-a : 1 ;; junk").unwrap();
        assert_eq!(s.property(target, "color"), Some("red"));
        assert_eq!(s.property(target, "--fx-a"), Some("1"));
        assert_eq!(s.style_text(target).unwrap(), "color: red; --fx-a: 1;");
    }

    #[test]
    fn semicolons_inside_quotes_and_parens_stay_in_values() {
        let decls = parse_declarations(
            r#"background: url("data:image/png;base64,AAA="); content: 'a;b'; --fx-a: 1"#,
        );
        assert_eq!(
            decls,
            [
                (
                    "background".to_owned(),
                    r#"url("data:image/png;base64,AAA=")"#.to_owned()
                ),
                ("content".to_owned(), "'a;b'".to_owned()),
                ("--fx-a".to_owned(), "1".to_owned()),
            ]
        );
        assert_eq!(
            parse_declarations(r#"content: "say \"hi;\""; color: red"#).len(),
            2,
            "escaped quotes do not close the string"
        );
    }

    #[test]
    fn rejected_properties_fail_without_mutating() {
        let mut s = MemorySurface::new();
        s.reject_property("--fx-bad");
        let err = s.set_property(TargetId::ROOT, "--fx-bad", "x").unwrap_err();
        assert!(matches!(err, SurfaceError::InvalidValue { .. }));
        assert!(s.ops().is_empty());
        assert!(s.set_style_text(TargetId::ROOT, "--fx-bad: 1;").is_err());
    }

    #[test]
    fn visibility_flag() {
        let mut s = MemorySurface::new();
        assert!(s.is_visible());
        s.set_visible(false);
        assert!(!s.is_visible());
    }
}
