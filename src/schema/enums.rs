//! Symbolic parameter vocabularies

use serde::{Deserialize, Serialize};

/// Named set of symbols an enum-typed parameter may take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EnumKind {
    /// Eye a stimulus is shown to
    Eye,
    /// Outline of a stimulus or fixation target
    Shape,
    /// Luminance profile painted inside a shape
    Texture,
    /// Monocular or stereoscopic display
    ViewMode,
}

impl EnumKind {
    /// Type name shown in error messages and QUERY output.
    pub fn name(self) -> &'static str {
        match self {
            EnumKind::Eye => "Eye",
            EnumKind::Shape => "Shape",
            EnumKind::Texture => "Texture",
            EnumKind::ViewMode => "ViewMode",
        }
    }

    /// Canonical (upper-case) symbols.
    pub fn symbols(self) -> &'static [&'static str] {
        match self {
            EnumKind::Eye => &["LEFT", "RIGHT", "BOTH", "NONE"],
            EnumKind::Shape => &["CIRCLE", "SQUARE", "TRIANGLE", "CROSS", "ANNULUS"],
            EnumKind::Texture => &["FLAT", "SINE", "SQUARESINE", "CHECKERBOARD", "G1", "G2", "G3"],
            EnumKind::ViewMode => &["MONO", "STEREO"],
        }
    }

    /// Canonical symbol matching `value` case-insensitively.
    pub fn canonical(self, value: &str) -> Option<&'static str> {
        self.symbols().iter().copied().find(|symbol| symbol.eq_ignore_ascii_case(value.trim()))
    }

    /// Symbols joined for display, e.g. `[LEFT, RIGHT]`.
    pub fn describe(self) -> String {
        format!("{} [{}]", self.name(), self.symbols().join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_ignores_case() {
        assert_eq!(EnumKind::Eye.canonical("left"), Some("LEFT"));
        assert_eq!(EnumKind::Shape.canonical("Circle"), Some("CIRCLE"));
        assert_eq!(EnumKind::Texture.canonical("g2"), Some("G2"));
        assert_eq!(EnumKind::Eye.canonical("middle"), None);
    }
}
