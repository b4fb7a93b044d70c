//! Image extraction from scanner alert documents.
//!
//! Alert documents arrive in several shapes: the full StackRox notifier
//! envelope (`{"alert": {"alert": {...}}}`), the bare alert, a deployment, or
//! something hand-written with just an `image` field. [`PayloadExtractor`]
//! tries an ordered list of strategies and the first one that finds an image
//! wins:
//!
//! 1. Fixed paths to known image locations, most specific first.
//! 2. A depth-first search for any `fullName` string or `image` field.
//!
//! An image node is either a reference string or a StackRox image-name
//! object (`{"fullName": "...", "tag": "..."}`, possibly nested under
//! `name`). A non-empty `tag` next to `fullName` overrides the tag parsed
//! from the reference.

mod image;

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

pub use image::{is_valid_repository_name, parse_tag, repository_name, split_tag};

/// Errors from extracting an image out of an alert document.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractError {
    #[error("no container image found in alert payload")]
    MissingImage,

    #[error("cannot derive a repository name from image {image:?}")]
    NoRepository { image: String },

    #[error("image {image:?} yields invalid repository name {name:?}")]
    InvalidRepository { image: String, name: String },
}

/// An image reference found in an alert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedImage {
    /// The reference as it appeared in the alert, trimmed.
    pub image: String,

    /// A tag given explicitly next to the reference.
    pub explicit_tag: Option<String>,
}

impl ExtractedImage {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            explicit_tag: None,
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.explicit_tag = Some(tag.into());
        self
    }

    /// The effective tag: the explicit one if present, else the one parsed
    /// from the reference.
    pub fn tag(&self) -> Option<&str> {
        self.explicit_tag
            .as_deref()
            .or_else(|| parse_tag(&self.image))
    }

    /// The target repository name derived from the reference.
    pub fn repository(&self) -> Result<&str, ExtractError> {
        let name = repository_name(&self.image).ok_or_else(|| ExtractError::NoRepository {
            image: self.image.clone(),
        })?;
        if !is_valid_repository_name(name) {
            return Err(ExtractError::InvalidRepository {
                image: self.image.clone(),
                name: name.to_string(),
            });
        }
        Ok(name)
    }
}

/// One way of locating an image in an alert document.
pub trait ImageStrategy: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    fn find(&self, document: &Value) -> Option<ExtractedImage>;
}

/// A step in a fixed path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Descend into an object field.
    Key(&'static str),

    /// Try each element of an array in order.
    Each,
}

use Step::{Each, Key};

/// Looks for an image node at a fixed path.
#[derive(Debug, Clone, Copy)]
pub struct FixedPath {
    name: &'static str,
    steps: &'static [Step],
}

impl FixedPath {
    pub const fn new(name: &'static str, steps: &'static [Step]) -> Self {
        Self { name, steps }
    }
}

/// Known image locations, most specific first.
pub const KNOWN_PATHS: &[FixedPath] = &[
    FixedPath::new(
        "notifier-envelope",
        &[Key("alert"), Key("alert"), Key("deployment"), Key("containers"), Each, Key("image")],
    ),
    FixedPath::new(
        "alert",
        &[Key("alert"), Key("deployment"), Key("containers"), Each, Key("image")],
    ),
    FixedPath::new("deployment", &[Key("deployment"), Key("containers"), Each, Key("image")]),
    FixedPath::new("alert-image", &[Key("alert"), Key("image")]),
    FixedPath::new("image", &[Key("image")]),
];

impl ImageStrategy for FixedPath {
    fn name(&self) -> &'static str {
        self.name
    }

    fn find(&self, document: &Value) -> Option<ExtractedImage> {
        walk(document, self.steps)
    }
}

fn walk(node: &Value, steps: &[Step]) -> Option<ExtractedImage> {
    let Some((step, rest)) = steps.split_first() else {
        return image_node(node);
    };
    match step {
        Key(key) => walk(node.get(key)?, rest),
        Each => node.as_array()?.iter().find_map(|item| walk(item, rest)),
    }
}

/// Interprets `node` as an image: a reference string, an object with
/// `fullName`, or an object whose `name` is one of those.
fn image_node(node: &Value) -> Option<ExtractedImage> {
    match node {
        Value::String(s) => non_empty(s).map(ExtractedImage::new),
        Value::Object(map) => {
            if let Some(full_name) = map.get("fullName").and_then(Value::as_str).and_then(non_empty) {
                let image = ExtractedImage::new(full_name);
                return Some(match map.get("tag").and_then(Value::as_str).and_then(non_empty) {
                    Some(tag) => image.with_tag(tag),
                    None => image,
                });
            }
            map.get("name").and_then(image_node)
        }
        _ => None,
    }
}

fn non_empty(s: &str) -> Option<&str> {
    let s = s.trim();
    (!s.is_empty()).then_some(s)
}

/// Depth-first search for the first image node anywhere in the document.
///
/// Objects are visited in key order. A `fullName` string or an `image` field
/// that resolves to an image node both count.
#[derive(Debug, Clone, Copy, Default)]
pub struct DepthFirstSearch;

impl ImageStrategy for DepthFirstSearch {
    fn name(&self) -> &'static str {
        "depth-first-search"
    }

    fn find(&self, document: &Value) -> Option<ExtractedImage> {
        let mut stack = vec![document];
        while let Some(node) = stack.pop() {
            match node {
                Value::Object(map) => {
                    if map.get("fullName").is_some_and(Value::is_string)
                        && let Some(found) = image_node(node)
                    {
                        return Some(found);
                    }
                    if let Some(found) = map.get("image").and_then(image_node) {
                        return Some(found);
                    }
                    // Reversed so the first key is popped first.
                    stack.extend(map.values().rev());
                }
                Value::Array(items) => stack.extend(items.iter().rev()),
                _ => {}
            }
        }
        None
    }
}

/// Finds the image an alert is about.
pub struct PayloadExtractor {
    strategies: Vec<Box<dyn ImageStrategy>>,
}

impl PayloadExtractor {
    /// An extractor with a custom strategy list, tried in order.
    pub fn new(strategies: Vec<Box<dyn ImageStrategy>>) -> Self {
        Self { strategies }
    }

    /// Returns the first image any strategy finds.
    pub fn extract(&self, document: &Value) -> Result<ExtractedImage, ExtractError> {
        for strategy in &self.strategies {
            if let Some(found) = strategy.find(document) {
                debug!(strategy = strategy.name(), image = %found.image, "Extracted image");
                return Ok(found);
            }
        }
        Err(ExtractError::MissingImage)
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }
}

impl Default for PayloadExtractor {
    fn default() -> Self {
        let mut strategies: Vec<Box<dyn ImageStrategy>> = KNOWN_PATHS
            .iter()
            .map(|path| Box::new(*path) as Box<dyn ImageStrategy>)
            .collect();
        strategies.push(Box::new(DepthFirstSearch));
        Self::new(strategies)
    }
}

impl std::fmt::Debug for PayloadExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayloadExtractor")
            .field("strategies", &self.strategy_names())
            .finish()
    }
}
