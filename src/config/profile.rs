use crate::domain::model::Verdict;
use crate::utils::error::{CompatError, Result};
use crate::utils::validation::{validate_non_empty_string, validate_positive_number, Validate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Highest operator versions a target runtime accepts.
///
/// ```toml
/// name = "tflite_flutter 0.11.0"
/// runtime_version = "2.14.0"
/// notes = ["TF 2.15+ uses FULLY_CONNECTED v12+"]
///
/// [max_versions]
/// FULLY_CONNECTED = 11
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeProfile {
    pub name: String,
    pub runtime_version: Option<String>,
    #[serde(default)]
    pub notes: Vec<String>,
    #[serde(default)]
    pub max_versions: BTreeMap<String, u32>,
}

impl Default for RuntimeProfile {
    fn default() -> Self {
        Self::tflite_flutter_0_11()
    }
}

impl RuntimeProfile {
    /// The runtime bundled with the `tflite_flutter 0.11.0` plugin.
    pub fn tflite_flutter_0_11() -> Self {
        Self {
            name: "tflite_flutter 0.11.0".to_string(),
            runtime_version: Some("2.14.0".to_string()),
            notes: vec![
                "TF 2.15+ uses FULLY_CONNECTED v12+ (incompatible with TFLite Flutter 0.11.0)"
                    .to_string(),
                "TF 2.8-2.14 uses FULLY_CONNECTED v11 (compatible)".to_string(),
                "TF 2.4-2.7 uses FULLY_CONNECTED v9-v10 (compatible)".to_string(),
            ],
            max_versions: BTreeMap::from([("FULLY_CONNECTED".to_string(), 11)]),
        }
    }

    /// 從 TOML 檔案載入執行環境設定
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed = super::substitute_env_vars(content);
        toml::from_str(&processed).map_err(|e| CompatError::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// Loads `path` when given, the built-in profile otherwise.
    pub fn load_or_default(path: Option<&str>) -> Result<Self> {
        match path {
            Some(p) => {
                let profile = Self::from_file(p)?;
                profile.validate()?;
                Ok(profile)
            }
            None => Ok(Self::default()),
        }
    }

    pub fn verdict_for(&self, op_name: &str, version: u32) -> Verdict {
        match self.max_versions.get(op_name) {
            Some(&max) if version <= max => Verdict::Compatible { max_supported: max },
            Some(&max) => Verdict::Incompatible { max_supported: max },
            None => Verdict::Unchecked,
        }
    }

    /// Whether a model that declares `min_runtime_version` can run here.
    /// `None` when either side is missing or unparsable.
    pub fn accepts_runtime_version(&self, min_runtime_version: &str) -> Option<bool> {
        let ours = parse_version(self.runtime_version.as_deref()?)?;
        let needed = parse_version(min_runtime_version)?;
        Some(compare_versions(&needed, &ours) != std::cmp::Ordering::Greater)
    }
}

/// "2.14.0" -> [2, 14, 0]; suffixes such as "-rc1" are ignored.
pub fn parse_version(text: &str) -> Option<Vec<u64>> {
    let parts: Vec<u64> = text
        .trim()
        .split('.')
        .map(|part| {
            let digits: String = part.chars().take_while(|c| c.is_ascii_digit()).collect();
            digits.parse::<u64>().ok()
        })
        .collect::<Option<Vec<_>>>()?;
    (!parts.is_empty()).then_some(parts)
}

fn compare_versions(a: &[u64], b: &[u64]) -> std::cmp::Ordering {
    let len = a.len().max(b.len());
    for i in 0..len {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        match x.cmp(&y) {
            std::cmp::Ordering::Equal => continue,
            other => return other,
        }
    }
    std::cmp::Ordering::Equal
}

impl Validate for RuntimeProfile {
    fn validate(&self) -> Result<()> {
        validate_non_empty_string("name", &self.name)?;

        if let Some(version) = &self.runtime_version {
            if parse_version(version).is_none() {
                return Err(CompatError::InvalidConfigValueError {
                    field: "runtime_version".to_string(),
                    value: version.clone(),
                    reason: "Expected a dotted version such as 2.14.0".to_string(),
                });
            }
        }

        for (op, &max) in &self.max_versions {
            validate_non_empty_string("max_versions", op)?;
            validate_positive_number(&format!("max_versions.{}", op), max as usize, 1)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_profile_flags_fully_connected_v12() {
        let profile = RuntimeProfile::default();
        assert_eq!(
            profile.verdict_for("FULLY_CONNECTED", 12),
            Verdict::Incompatible { max_supported: 11 }
        );
        assert_eq!(
            profile.verdict_for("FULLY_CONNECTED", 11),
            Verdict::Compatible { max_supported: 11 }
        );
        assert_eq!(profile.verdict_for("SOFTMAX", 3), Verdict::Unchecked);
    }

    #[test]
    fn test_parse_profile_toml() {
        let toml_content = r#"
name = "legacy-android"
runtime_version = "2.8.0"

[max_versions]
FULLY_CONNECTED = 9
CONV_2D = 5
"#;
        let profile = RuntimeProfile::from_toml_str(toml_content).unwrap();
        assert!(profile.validate().is_ok());
        assert!(profile.notes.is_empty());
        assert_eq!(profile.max_versions.get("CONV_2D"), Some(&5));
        assert!(profile.verdict_for("FULLY_CONNECTED", 11).is_incompatible());
    }

    #[test]
    fn test_invalid_profile_values() {
        let zero_limit = r#"
name = "broken"

[max_versions]
FULLY_CONNECTED = 0
"#;
        let profile = RuntimeProfile::from_toml_str(zero_limit).unwrap();
        assert!(profile.validate().is_err());

        assert!(RuntimeProfile::from_toml_str("name = ").is_err());
    }

    #[test]
    fn test_runtime_version_comparison() {
        let profile = RuntimeProfile::default();
        assert_eq!(profile.accepts_runtime_version("1.14.0"), Some(true));
        assert_eq!(profile.accepts_runtime_version("2.14"), Some(true));
        assert_eq!(profile.accepts_runtime_version("2.15.0"), Some(false));
        assert_eq!(profile.accepts_runtime_version("not-a-version"), None);
        assert_eq!(parse_version("2.16.0-rc1"), Some(vec![2, 16, 0]));
    }
}
