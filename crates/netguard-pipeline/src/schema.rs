//! Expected column schema for network traffic records.

use crate::error::{PipelineError, PipelineResult};
use crate::table::Value;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Feature columns of the phishing/network traffic dataset served by default.
pub const NETWORK_FEATURES: [&str; 30] = [
    "having_IP_Address",
    "URL_Length",
    "Shortining_Service",
    "having_At_Symbol",
    "double_slash_redirecting",
    "Prefix_Suffix",
    "having_Sub_Domain",
    "SSLfinal_State",
    "Domain_registeration_length",
    "Favicon",
    "port",
    "HTTPS_token",
    "Request_URL",
    "URL_of_Anchor",
    "Links_in_tags",
    "SFH",
    "Submitting_to_email",
    "Abnormal_URL",
    "Redirect",
    "on_mouseover",
    "RightClick",
    "popUpWidnow",
    "Iframe",
    "age_of_domain",
    "DNSRecord",
    "web_traffic",
    "Page_Rank",
    "Google_Index",
    "Links_pointing_to_page",
    "Statistical_report",
];

pub const NETWORK_TARGET: &str = "Result";

/// Classification label. `0` is safe, `1` is not safe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Label {
    Safe,
    NotSafe,
}

impl Label {
    #[must_use]
    pub fn from_code(code: u8) -> Self {
        if code == 0 { Self::Safe } else { Self::NotSafe }
    }

    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            Self::Safe => 0,
            Self::NotSafe => 1,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Safe => "safe",
            Self::NotSafe => "not_safe",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    Numeric,
    Categorical,
}

/// Why a single value does not satisfy its column spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    Null,
    NotNumeric,
    OutOfRange,
    NotAllowed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    #[serde(default = "default_kind")]
    pub kind: ColumnKind,
    /// Rows with a null in a required column are rejected instead of imputed.
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    /// Allowed value keys (see [`Value::key`]).
    #[serde(default)]
    pub allowed: Option<Vec<String>>,
}

fn default_kind() -> ColumnKind {
    ColumnKind::Numeric
}

impl ColumnSpec {
    #[must_use]
    pub fn numeric(name: impl Into<String>) -> Self {
        Self { name: name.into(), kind: ColumnKind::Numeric, required: false, min: None, max: None, allowed: None }
    }

    #[must_use]
    pub fn categorical(name: impl Into<String>) -> Self {
        Self { kind: ColumnKind::Categorical, ..Self::numeric(name) }
    }

    #[must_use]
    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    #[must_use]
    pub fn with_allowed<I, S>(mut self, allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed = Some(allowed.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn check(&self, value: &Value) -> Result<(), Violation> {
        if value.is_null() {
            return if self.required { Err(Violation::Null) } else { Ok(()) };
        }
        if self.kind == ColumnKind::Numeric {
            let n = value.as_f64().ok_or(Violation::NotNumeric)?;
            if self.min.is_some_and(|min| n < min) || self.max.is_some_and(|max| n > max) {
                return Err(Violation::OutOfRange);
            }
        }
        if let (Some(allowed), Some(key)) = (&self.allowed, value.key()) {
            if !allowed.iter().any(|a| *a == key) {
                return Err(Violation::NotAllowed);
            }
        }
        Ok(())
    }
}

/// Maps raw target values to [`Label`]s.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetSpec {
    pub column: String,
    pub safe: Vec<String>,
    pub not_safe: Vec<String>,
}

impl TargetSpec {
    #[must_use]
    pub fn encode(&self, value: &Value) -> Option<Label> {
        let key = value.key()?;
        if self.safe.contains(&key) {
            Some(Label::Safe)
        } else if self.not_safe.contains(&key) {
            Some(Label::NotSafe)
        } else {
            None
        }
    }
}

impl Default for TargetSpec {
    fn default() -> Self {
        Self {
            column: NETWORK_TARGET.to_string(),
            safe: vec!["-1".to_string(), "0".to_string()],
            not_safe: vec!["1".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpectedSchema {
    pub features: Vec<ColumnSpec>,
    #[serde(default)]
    pub target: TargetSpec,
}

impl Default for ExpectedSchema {
    fn default() -> Self {
        Self::network_default()
    }
}

impl ExpectedSchema {
    #[must_use]
    pub fn new(features: Vec<ColumnSpec>, target: TargetSpec) -> Self {
        Self { features, target }
    }

    /// The 30 ternary network features, each in `[-1, 1]`.
    #[must_use]
    pub fn network_default() -> Self {
        let features = NETWORK_FEATURES
            .iter()
            .map(|name| ColumnSpec::numeric(*name).with_range(-1.0, 1.0))
            .collect();
        Self { features, target: TargetSpec::default() }
    }

    #[must_use]
    pub fn feature(&self, name: &str) -> Option<&ColumnSpec> {
        self.features.iter().find(|c| c.name == name)
    }

    /// Feature names followed by the target column.
    #[must_use]
    pub fn column_names(&self) -> Vec<String> {
        self.features
            .iter()
            .map(|c| c.name.clone())
            .chain(std::iter::once(self.target.column.clone()))
            .collect()
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        name == self.target.column || self.feature(name).is_some()
    }

    pub fn validate(&self) -> PipelineResult<()> {
        if self.features.is_empty() {
            return Err(PipelineError::InvalidConfig("schema must declare at least one feature".to_string()));
        }
        let mut seen = HashSet::new();
        for spec in &self.features {
            if spec.name.trim().is_empty() {
                return Err(PipelineError::InvalidConfig("feature names must not be empty".to_string()));
            }
            if !seen.insert(spec.name.as_str()) {
                return Err(PipelineError::InvalidConfig(format!("duplicate feature `{}`", spec.name)));
            }
            if let (Some(min), Some(max)) = (spec.min, spec.max) {
                if min > max {
                    return Err(PipelineError::InvalidConfig(format!(
                        "feature `{}` has min {min} > max {max}",
                        spec.name
                    )));
                }
            }
        }
        if seen.contains(self.target.column.as_str()) {
            return Err(PipelineError::InvalidConfig(format!(
                "target column `{}` is also declared as a feature",
                self.target.column
            )));
        }
        if self.target.safe.is_empty() || self.target.not_safe.is_empty() {
            return Err(PipelineError::InvalidConfig("target must map values to both labels".to_string()));
        }
        if self.target.safe.iter().any(|v| self.target.not_safe.contains(v)) {
            return Err(PipelineError::InvalidConfig("target label values overlap".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_default_is_valid() {
        let schema = ExpectedSchema::network_default();
        assert!(schema.validate().is_ok());
        assert_eq!(schema.features.len(), 30);
        assert_eq!(schema.column_names().last().map(String::as_str), Some("Result"));
    }

    #[test]
    fn test_column_check() {
        let spec = ColumnSpec::numeric("SFH").with_range(-1.0, 1.0);
        assert_eq!(spec.check(&Value::Number(0.0)), Ok(()));
        assert_eq!(spec.check(&Value::Null), Ok(()));
        assert_eq!(spec.check(&Value::Number(3.0)), Err(Violation::OutOfRange));
        assert_eq!(spec.check(&Value::from("abc")), Err(Violation::NotNumeric));
        assert_eq!(spec.clone().required().check(&Value::Null), Err(Violation::Null));

        let proto = ColumnSpec::categorical("protocol").with_allowed(["tcp", "udp"]);
        assert_eq!(proto.check(&Value::from("tcp")), Ok(()));
        assert_eq!(proto.check(&Value::from("icmp")), Err(Violation::NotAllowed));
    }

    #[test]
    fn test_target_encoding() {
        let target = TargetSpec::default();
        assert_eq!(target.encode(&Value::Number(-1.0)), Some(Label::Safe));
        assert_eq!(target.encode(&Value::from("1")), Some(Label::NotSafe));
        assert_eq!(target.encode(&Value::Number(5.0)), None);
        assert_eq!(target.encode(&Value::Null), None);
    }

    #[test]
    fn test_validate_rejects_target_as_feature() {
        let schema = ExpectedSchema::new(vec![ColumnSpec::numeric("Result")], TargetSpec::default());
        assert!(schema.validate().is_err());
    }

    #[test]
    fn test_schema_deserializes_with_defaults() {
        let toml_src = r#"
            [[features]]
            name = "SFH"
            min = -1.0
            max = 1.0

            [[features]]
            name = "protocol"
            kind = "categorical"
        "#;
        let schema: ExpectedSchema = toml::from_str(toml_src).unwrap();
        assert_eq!(schema.features[1].kind, ColumnKind::Categorical);
        assert_eq!(schema.target.column, "Result");
        assert!(schema.validate().is_ok());
    }
}
