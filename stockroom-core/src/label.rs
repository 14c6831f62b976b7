//! Names for cache stores.

use smol_str::SmolStr;
use std::fmt;

/// Name of a cache store, attached to its log lines and metric labels.
///
/// ```
/// use stockroom_core::BackendLabel;
///
/// const PAGES: BackendLabel = BackendLabel::new_static("pages");
/// assert_eq!(PAGES.as_str(), "pages");
/// assert_eq!(BackendLabel::from("pages"), PAGES);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct BackendLabel(SmolStr);

impl BackendLabel {
    /// Wraps any string.
    pub fn new(name: impl Into<SmolStr>) -> Self {
        BackendLabel(name.into())
    }

    /// Wraps a string literal; usable in `const` items.
    pub const fn new_static(name: &'static str) -> Self {
        BackendLabel(SmolStr::new_static(name))
    }

    /// The name.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl AsRef<str> for BackendLabel {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for BackendLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for BackendLabel {
    fn from(name: &str) -> Self {
        BackendLabel::new(name)
    }
}

impl From<String> for BackendLabel {
    fn from(name: String) -> Self {
        BackendLabel::new(name)
    }
}
