use chrono::{DateTime, Utc};
use schemars::gen::SchemaSettings;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::analysis::ContractMetrics;

/// Shared severity scale for audit findings and monitor events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum Severity {
    High,
    Medium,
    Low,
    Info,
}

impl Severity {
    fn rank(self) -> u8 {
        match self {
            Severity::Info => 0,
            Severity::Low => 1,
            Severity::Medium => 2,
            Severity::High => 3,
        }
    }

    pub fn at_least(self, other: Severity) -> bool {
        self.rank() >= other.rank()
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Severity::High => "High",
            Severity::Medium => "Medium",
            Severity::Low => "Low",
            Severity::Info => "Info",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum Confidence {
    High,
    Medium,
    Low,
}

/// A security vulnerability reported by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    /// SWC ID or detector name
    pub id: String,
    pub title: String,
    pub severity: Severity,
    pub description: String,
    pub line_number: i64,
    pub remediation: String,
    pub code_fix: String,
    /// What happens if exploited
    pub impact: String,
    pub confidence: Confidence,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GasOptimization {
    pub category: String,
    pub description: String,
    pub potential_savings: String,
    pub code_snippet: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EconomicRisk {
    pub vector: String,
    pub risk_level: Severity,
    pub scenario: String,
    pub mitigation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeabilityRisk {
    /// Kind of upgrade issue, e.g. Storage Collision
    #[serde(rename = "type")]
    pub risk_type: String,
    pub severity: Severity,
    /// Detected proxy pattern (UUPS, Transparent, Beacon, Diamond, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_type: Option<String>,
    pub description: String,
    pub recommendation: String,
}

/// The object the model is instructed to return. Every field is required.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ModelReport {
    pub contract_name: String,
    /// 0-100 security score
    pub overall_score: f64,
    /// Executive summary of findings
    pub summary: String,
    pub vulnerabilities: Vec<Finding>,
    pub gas_analysis: Vec<GasOptimization>,
    pub economic_analysis: Vec<EconomicRisk>,
    pub upgradeability_analysis: Vec<UpgradeabilityRisk>,
    pub formal_verification_suggestions: Vec<String>,
}

impl ModelReport {
    /// JSON schema sent with every generation request, fully inlined.
    pub fn response_schema() -> Value {
        let settings = SchemaSettings::draft07().with(|s| {
            s.inline_subschemas = true;
            s.meta_schema = None;
        });
        let schema = settings.into_generator().into_root_schema_for::<ModelReport>();
        serde_json::to_value(schema).unwrap_or(Value::Null)
    }
}

/// Final audit result handed to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditReport {
    pub contract_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_address: Option<String>,
    pub network: String,
    pub audit_date: DateTime<Utc>,
    pub overall_score: f64,
    pub summary: String,
    pub vulnerabilities: Vec<Finding>,
    pub gas_analysis: Vec<GasOptimization>,
    pub economic_analysis: Vec<EconomicRisk>,
    pub upgradeability_analysis: Vec<UpgradeabilityRisk>,
    pub formal_verification_suggestions: Vec<String>,
    pub model_used: String,
    pub metrics: ContractMetrics,
    pub detected_libraries: Vec<String>,
}

impl AuditReport {
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.contract_address = Some(address.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::High.at_least(Severity::Medium));
        assert!(Severity::Medium.at_least(Severity::Medium));
        assert!(!Severity::Low.at_least(Severity::Medium));
        assert!(!Severity::Info.at_least(Severity::Low));
    }

    #[test]
    fn test_response_schema_requires_every_field() {
        let schema = ModelReport::response_schema();
        let required: Vec<&str> = schema["required"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap())
            .collect();
        for field in [
            "contractName",
            "overallScore",
            "summary",
            "vulnerabilities",
            "gasAnalysis",
            "economicAnalysis",
            "upgradeabilityAnalysis",
            "formalVerificationSuggestions",
        ] {
            assert!(required.contains(&field), "missing {}", field);
        }

        let finding = &schema["properties"]["vulnerabilities"]["items"];
        assert_eq!(finding["required"].as_array().unwrap().len(), 9);
        assert!(schema.get("definitions").is_none());
        assert!(schema.get("$schema").is_none());
    }

    #[test]
    fn test_upgradeability_proxy_type_is_optional() {
        let risk: UpgradeabilityRisk = serde_json::from_str(
            r#"{"type":"Storage Collision","severity":"High","description":"d","recommendation":"r"}"#,
        )
        .unwrap();
        assert_eq!(risk.risk_type, "Storage Collision");
        assert!(risk.proxy_type.is_none());
    }

    #[test]
    fn test_finding_rejects_unknown_severity() {
        let result: Result<Finding, _> = serde_json::from_str(
            r#"{"id":"SWC-107","title":"t","severity":"Critical","description":"d","lineNumber":1,
                "remediation":"r","codeFix":"c","impact":"i","confidence":"High"}"#,
        );
        assert!(result.is_err());
    }
}
