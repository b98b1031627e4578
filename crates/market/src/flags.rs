use serde::{Deserialize, Serialize};

pub const BOM_DUAL_WRITE_ENV: &str = "ENABLE_BOM_DUAL_WRITE";

/// Runtime feature switches, resolved once at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureFlags {
    /// Also maintain the JSON BOM projection on the solution row.
    #[serde(default)]
    pub bom_dual_write: bool,
}

impl FeatureFlags {
    pub fn from_env() -> Self {
        FeatureFlags {
            bom_dual_write: std::env::var(BOM_DUAL_WRITE_ENV)
                .ok()
                .and_then(|v| parse_flag(&v))
                .unwrap_or(false),
        }
    }

    pub fn should_dual_write(&self) -> bool {
        self.bom_dual_write
    }
}

/// Parse a boolean switch. Unrecognized values yield `None`.
pub fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim() {
        "1" | "true" | "TRUE" | "True" | "yes" | "YES" | "on" | "ON" => Some(true),
        "0" | "false" | "FALSE" | "False" | "no" | "NO" | "off" | "OFF" | "" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_values() {
        assert_eq!(parse_flag("true"), Some(true));
        assert_eq!(parse_flag(" 1 "), Some(true));
        assert_eq!(parse_flag("off"), Some(false));
        assert_eq!(parse_flag(""), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }

    #[test]
    fn default_is_off() {
        assert!(!FeatureFlags::default().should_dual_write());
        assert!(FeatureFlags { bom_dual_write: true }.should_dual_write());
    }
}
