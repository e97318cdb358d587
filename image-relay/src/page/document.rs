//! Read-only view of the page structure.
//!
//! The page context never touches a live DOM directly; it asks a
//! [`DocumentQuery`] for the document's identity and its image elements.
//! [`DocumentSnapshot`] is a serialized capture of that structure.

use crate::error::DocumentError;
use crate::types::{ElementRect, ImageDimensions};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, trace};
use url::Url;

/// The element enclosing an image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParentElement {
    pub tag_name: String,
    #[serde(default)]
    pub text_content: String,
}

/// An `<img>` element as seen by the page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageElement {
    /// Value of the `src` property (resolved against the document URL)
    pub src: String,
    /// Source actually selected by the browser (`srcset`, `<picture>`)
    #[serde(default)]
    pub current_src: Option<String>,
    #[serde(default)]
    pub alt: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub parent: Option<ParentElement>,
    #[serde(default)]
    pub rect: ElementRect,
    #[serde(default)]
    pub dimensions: ImageDimensions,
}

impl ImageElement {
    pub fn new(src: impl Into<String>) -> Self {
        Self {
            src: src.into(),
            current_src: None,
            alt: None,
            title: None,
            parent: None,
            rect: ElementRect::default(),
            dimensions: ImageDimensions::default(),
        }
    }

    /// True when either source of the element equals `locator`
    pub fn matches(&self, locator: &str) -> bool {
        self.src == locator || self.current_src.as_deref() == Some(locator)
    }
}

/// Capability to inspect the page's document
pub trait DocumentQuery: Send + Sync {
    fn url(&self) -> &str;

    fn title(&self) -> &str;

    /// Image elements in document order
    fn image_elements(&self) -> Result<Vec<ImageElement>, DocumentError>;

    /// First image element, in document order, whose source is `locator`
    fn find_image(&self, locator: &str) -> Result<Option<ImageElement>, DocumentError> {
        Ok(self
            .image_elements()?
            .into_iter()
            .find(|element| element.matches(locator)))
    }
}

/// Serialized page structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSnapshot {
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub images: Vec<ImageElement>,
}

impl DocumentSnapshot {
    /// A document with no image elements
    pub fn empty(url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            images: Vec::new(),
        }
    }

    /// Parse a snapshot from JSON, resolving relative sources
    pub fn from_json(json: &str) -> Result<Self, DocumentError> {
        let mut snapshot: DocumentSnapshot = serde_json::from_str(json)?;
        snapshot.resolve_sources();
        Ok(snapshot)
    }

    /// Load a snapshot file
    pub async fn load(path: &Path) -> Result<Self, DocumentError> {
        debug!("Loading document snapshot from {:?}", path);
        let json = tokio::fs::read_to_string(path).await?;
        Self::from_json(&json)
    }

    /// Origin of the document, as sent in an `Origin` header
    pub fn origin(&self) -> Option<String> {
        let url = Url::parse(&self.url).ok()?;
        match url.origin() {
            origin @ url::Origin::Tuple(..) => Some(origin.ascii_serialization()),
            url::Origin::Opaque(_) => None,
        }
    }

    fn resolve_sources(&mut self) {
        let Ok(base) = Url::parse(&self.url) else {
            trace!("Document URL {:?} is not absolute, sources left as-is", self.url);
            return;
        };

        for image in &mut self.images {
            image.src = resolve(&base, &image.src);
            if let Some(current) = image.current_src.as_mut() {
                *current = resolve(&base, current);
            }
        }
    }
}

fn resolve(base: &Url, src: &str) -> String {
    if src.is_empty() {
        return String::new();
    }
    base.join(src)
        .map(|url| url.to_string())
        .unwrap_or_else(|_| src.to_string())
}

impl DocumentQuery for DocumentSnapshot {
    fn url(&self) -> &str {
        &self.url
    }

    fn title(&self) -> &str {
        &self.title
    }

    fn image_elements(&self) -> Result<Vec<ImageElement>, DocumentError> {
        Ok(self.images.clone())
    }

    fn find_image(&self, locator: &str) -> Result<Option<ImageElement>, DocumentError> {
        Ok(self.images.iter().find(|image| image.matches(locator)).cloned())
    }
}
