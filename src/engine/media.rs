use serde::{Deserialize, Serialize};

/// What kind of collection the locators point to. The engines only ever see resolved,
/// image-like locators; the kind is informational for hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    #[default]
    Image,
    Document,
    Remote,
}

/// The media collection handed to an engine. Immutable once an engine has been built from it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MediaSource {
    pub kind: MediaKind,
    pub locators: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt_text: Option<String>,
}

impl MediaSource {
    /// A single image.
    pub fn image(locator: impl Into<String>) -> Self {
        Self {
            kind: MediaKind::Image,
            locators: vec![locator.into()],
            alt_text: None,
        }
    }

    /// A list of images, one per page.
    pub fn images<I, S>(locators: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            kind: MediaKind::Image,
            locators: locators.into_iter().map(Into::into).collect(),
            alt_text: None,
        }
    }

    pub fn with_kind(mut self, kind: MediaKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_alt_text(mut self, alt: impl Into<String>) -> Self {
        self.alt_text = Some(alt.into());
        self
    }

    pub fn len(&self) -> usize {
        self.locators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locators.is_empty()
    }
}
