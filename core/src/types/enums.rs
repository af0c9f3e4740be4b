use std::fmt;

/// Breast side of a crosswalk row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "json", derive(serde::Serialize))]
#[cfg_attr(feature = "json", serde(rename_all = "lowercase"))]
pub enum Laterality {
    Unknown,
    Left,
    Right,
}

impl Laterality {
    /// Parses the `laterality` column (`L`, `R`, or the spelled-out side)
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Self {
        match s.trim().to_ascii_uppercase().as_str() {
            "L" | "LEFT" => Laterality::Left,
            "R" | "RIGHT" => Laterality::Right,
            _ => Laterality::Unknown,
        }
    }
}

impl fmt::Display for Laterality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Laterality::Left => "left",
            Laterality::Right => "right",
            Laterality::Unknown => "unknown",
        })
    }
}

/// Acquisition view of a mammogram
///
/// Only the CC and MLO families feed the two trunks of a multi-view network.
/// The other positions are kept so single-view training can still use them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "json", derive(serde::Serialize))]
#[cfg_attr(feature = "json", serde(rename_all = "lowercase"))]
pub enum ViewPosition {
    Unknown,
    Cc,
    Xccl,
    Xccm,
    Mlo,
    Ml,
    Lmo,
    Lm,
    At,
    Cv,
}

// Exact codes and spelled-out names
const ALIASES: &[(&str, ViewPosition)] = &[
    ("cc", ViewPosition::Cc),
    ("cranio-caudal", ViewPosition::Cc),
    ("caudal-cranial", ViewPosition::Cc),
    ("xccl", ViewPosition::Xccl),
    ("xccm", ViewPosition::Xccm),
    ("mlo", ViewPosition::Mlo),
    ("medio-lateral oblique", ViewPosition::Mlo),
    ("ml", ViewPosition::Ml),
    ("medio-lateral", ViewPosition::Ml),
    ("lmo", ViewPosition::Lmo),
    ("latero-medial oblique", ViewPosition::Lmo),
    ("lm", ViewPosition::Lm),
    ("latero-medial", ViewPosition::Lm),
    ("at", ViewPosition::At),
    ("cv", ViewPosition::Cv),
];

// Phrases matched anywhere in the value
const PHRASES: &[(&str, ViewPosition)] = &[
    ("exaggerated laterally", ViewPosition::Xccl),
    ("exaggerated medially", ViewPosition::Xccm),
    ("axillary tail", ViewPosition::At),
    ("cleavage", ViewPosition::Cv),
    ("valley-view", ViewPosition::Cv),
];

impl ViewPosition {
    pub fn is_unknown(&self) -> bool {
        *self == ViewPosition::Unknown
    }

    /// CC input of a multi-view exam
    pub fn is_cc_like(&self) -> bool {
        matches!(
            self,
            ViewPosition::Cc | ViewPosition::Xccl | ViewPosition::Xccm
        )
    }

    /// MLO input of a multi-view exam
    pub fn is_mlo_like(&self) -> bool {
        matches!(
            self,
            ViewPosition::Mlo | ViewPosition::Ml | ViewPosition::Lmo | ViewPosition::Lm
        )
    }

    /// Lowercase crosswalk code, empty for `Unknown`
    pub fn code(&self) -> &'static str {
        ALIASES
            .iter()
            .find(|(_, position)| position == self)
            .map_or("", |&(code, _)| code)
    }

    /// Parses a view code or descriptive view name
    ///
    /// Anything not recognized is `Unknown`.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Self {
        let s = s.trim().to_lowercase();
        ALIASES
            .iter()
            .find(|(alias, _)| *alias == s)
            .or_else(|| PHRASES.iter().find(|(phrase, _)| s.contains(phrase)))
            .map_or(ViewPosition::Unknown, |&(_, position)| position)
    }
}

impl fmt::Display for ViewPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Photometric interpretation of DICOM pixel data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhotometricInterpretation {
    Monochrome1,
    Monochrome2,
    /// Color and palette encodings
    Other,
}

impl PhotometricInterpretation {
    pub fn is_monochrome(&self) -> bool {
        !matches!(self, PhotometricInterpretation::Other)
    }

    /// Low values render white and must be flipped before training
    pub fn is_inverted(&self) -> bool {
        matches!(self, PhotometricInterpretation::Monochrome1)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Self {
        match s.trim_end_matches(['\0', ' ']).trim_start() {
            v if v.eq_ignore_ascii_case("MONOCHROME1") => PhotometricInterpretation::Monochrome1,
            v if v.eq_ignore_ascii_case("MONOCHROME2") => PhotometricInterpretation::Monochrome2,
            _ => PhotometricInterpretation::Other,
        }
    }
}

impl fmt::Display for PhotometricInterpretation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PhotometricInterpretation::Monochrome1 => "MONOCHROME1",
            PhotometricInterpretation::Monochrome2 => "MONOCHROME2",
            PhotometricInterpretation::Other => "non-monochrome",
        })
    }
}
