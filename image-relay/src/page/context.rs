//! Correlate an image locator with its element on the page.

use crate::page::document::{DocumentQuery, ImageElement};
use crate::types::{ContextReport, ImageContext};
use tracing::{debug, warn};

/// Maximum length, in characters, of the surrounding text
pub const CONTEXT_TEXT_LIMIT: usize = 200;

/// Find the element showing `locator` and describe its surroundings.
///
/// The first element in document order wins. Never fails: a broken document
/// yields `contextFound: false` with an error note.
pub fn correlate(document: &dyn DocumentQuery, locator: &str) -> ContextReport {
    match document.find_image(locator) {
        Ok(Some(element)) => ContextReport::found(describe(&element)),
        Ok(None) => {
            debug!("No image element matches {}", locator);
            ContextReport::not_found()
        }
        Err(e) => {
            warn!("Context lookup failed for {}: {}", locator, e);
            ContextReport::failed(e.to_string())
        }
    }
}

fn describe(element: &ImageElement) -> ImageContext {
    let alt_text = element
        .alt
        .as_deref()
        .filter(|alt| !alt.is_empty())
        .or(element.title.as_deref())
        .unwrap_or_default()
        .to_string();

    ImageContext {
        alt_text,
        context_text: element
            .parent
            .as_ref()
            .map(|parent| truncate_context(&parent.text_content))
            .unwrap_or_default(),
        position: element.rect,
        parent_tag_name: element.parent.as_ref().map(|parent| parent.tag_name.clone()),
        image_dimensions: element.dimensions,
    }
}

/// Cut to [`CONTEXT_TEXT_LIMIT`] characters, then trim
pub fn truncate_context(text: &str) -> String {
    let truncated: String = text.chars().take(CONTEXT_TEXT_LIMIT).collect();
    truncated.trim().to_string()
}
