// Copyright 2026 the Cadence Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! DOM-backed render surface.
//!
//! Maps [`TargetId`]s to live `HtmlElement`s and applies style writes through
//! their inline `CSSStyleDeclaration`. [`TargetId::ROOT`] is the document
//! element, where custom properties cascade to the whole page.

use cadence_core::batch::TargetId;
use cadence_core::error::SurfaceError;
use cadence_core::surface::RenderSurface;
use wasm_bindgen::{JsCast as _, JsValue};
use web_sys::{Document, HtmlElement};

/// A [`RenderSurface`] over DOM elements.
pub struct DomSurface {
    document: Document,
    elements: Vec<Option<HtmlElement>>,
}

impl core::fmt::Debug for DomSurface {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DomSurface")
            .field("document", &"Document")
            .field("elements_len", &self.elements.len())
            .finish()
    }
}

impl DomSurface {
    /// Creates a surface whose root target is `document.documentElement`.
    pub fn new(document: Document) -> Result<Self, SurfaceError> {
        let root: HtmlElement = document
            .document_element()
            .ok_or_else(|| SurfaceError::Platform("document has no root element".into()))?
            .dyn_into()
            .map_err(|_| SurfaceError::Platform("root element is not an HTML element".into()))?;
        Ok(Self {
            document,
            elements: vec![Some(root)],
        })
    }

    /// Creates a surface over the current window's document.
    pub fn from_window() -> Result<Self, SurfaceError> {
        let document = web_sys::window()
            .and_then(|w| w.document())
            .ok_or_else(|| SurfaceError::Platform("no window document".into()))?;
        Self::new(document)
    }

    /// Registers an element as a write target.
    pub fn register(&mut self, element: HtmlElement) -> TargetId {
        let id = u32::try_from(self.elements.len()).unwrap_or(u32::MAX);
        self.elements.push(Some(element));
        TargetId(id)
    }

    /// Forgets a target. Later writes to it fail with
    /// [`SurfaceError::UnknownTarget`].
    pub fn unregister(&mut self, target: TargetId) -> Option<HtmlElement> {
        if target == TargetId::ROOT {
            return None;
        }
        self.elements.get_mut(target.0 as usize)?.take()
    }

    /// The element behind a target.
    #[must_use]
    pub fn element(&self, target: TargetId) -> Option<&HtmlElement> {
        self.elements
            .get(target.0 as usize)
            .and_then(|slot| slot.as_ref())
    }

    fn resolve(&self, target: TargetId) -> Result<&HtmlElement, SurfaceError> {
        self.element(target)
            .ok_or(SurfaceError::UnknownTarget(target))
    }
}

impl RenderSurface for DomSurface {
    fn set_property(
        &mut self,
        target: TargetId,
        property: &str,
        value: &str,
    ) -> Result<(), SurfaceError> {
        self.resolve(target)?
            .style()
            .set_property(property, value)
            .map_err(|err| platform(&err))
    }

    fn style_text(&self, target: TargetId) -> Result<String, SurfaceError> {
        Ok(self.resolve(target)?.style().css_text())
    }

    fn set_style_text(&mut self, target: TargetId, text: &str) -> Result<(), SurfaceError> {
        self.resolve(target)?.style().set_css_text(text);
        Ok(())
    }

    fn is_visible(&self) -> bool {
        !self.document.hidden()
    }
}

pub(crate) fn platform(err: &JsValue) -> SurfaceError {
    SurfaceError::Platform(
        err.as_string()
            .unwrap_or_else(|| format!("{err:?}")),
    )
}
