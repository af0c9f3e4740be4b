use super::ViewPosition;
use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

/// View code from the image crosswalk
///
/// Crosswalk codes are a view position optionally suffixed with `ID`
/// for implant displaced acquisitions (`CC`, `MLOID`, `XCCL`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ViewCode {
    pub position: ViewPosition,
    pub implant_displaced: bool,
}

impl ViewCode {
    /// Parses a crosswalk view code
    ///
    /// Unrecognized codes parse to an `Unknown` position rather than failing;
    /// such images are still usable in single-view training.
    pub fn parse(code: &str) -> Self {
        static REGEX: OnceLock<Regex> = OnceLock::new();
        let re = REGEX.get_or_init(|| {
            Regex::new(r"^(?P<view>[A-Z]+?)(?P<id>ID)?$").expect("Failed to compile regex")
        });

        let upper = code.trim().to_uppercase();
        if let Some(caps) = re.captures(&upper) {
            let position = ViewPosition::from_str(&caps["view"]);
            if !position.is_unknown() {
                return Self {
                    position,
                    implant_displaced: caps.name("id").is_some(),
                };
            }
        }

        Self {
            position: ViewPosition::from_str(code),
            implant_displaced: false,
        }
    }
}

impl fmt::Display for ViewCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.position.code().to_uppercase())?;
        if self.implant_displaced {
            write!(f, "ID")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("CC", ViewPosition::Cc, false)]
    #[case("MLO", ViewPosition::Mlo, false)]
    #[case("MLOID", ViewPosition::Mlo, true)]
    #[case("ccid", ViewPosition::Cc, true)]
    #[case("XCCL", ViewPosition::Xccl, false)]
    #[case("LMO", ViewPosition::Lmo, false)]
    #[case(" AT ", ViewPosition::At, false)]
    #[case("cranio-caudal", ViewPosition::Cc, false)]
    #[case("FOO", ViewPosition::Unknown, false)]
    fn test_view_code_parse(
        #[case] code: &str,
        #[case] position: ViewPosition,
        #[case] implant_displaced: bool,
    ) {
        let parsed = ViewCode::parse(code);
        assert_eq!(parsed.position, position);
        assert_eq!(parsed.implant_displaced, implant_displaced);
    }

    #[test]
    fn test_view_code_display() {
        assert_eq!(ViewCode::parse("mloid").to_string(), "MLOID");
        assert_eq!(ViewCode::parse("CC").to_string(), "CC");
    }
}
