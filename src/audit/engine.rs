use chrono::Utc;
use std::sync::Arc;
use tracing::warn;

use super::extract::extract_json_payload;
use super::gemini::{GeminiClient, GenerationRequest, ModelBackend};
use super::report::{AuditReport, ModelReport};
use crate::analysis::{detect_libraries, extract_metrics};
use crate::config::ModelConfig;
use crate::error::AuditError;
use crate::progress::Progress;

/// Pasted source shorter than this (ignoring surrounding whitespace) is rejected.
pub const MIN_SOURCE_CHARS: usize = 50;

const SYSTEM_INSTRUCTION: &str = r#"You are AuditGPT, a world-class Smart Contract Auditor and Security Researcher.

YOUR MISSION:
Perform a rigorous, production-grade security audit on the provided Solidity source code.
You must simulate the capabilities of static analysis tools (like Slither, Mythril) and manual economic review.

ANALYSIS REQUIREMENTS:

1. SECURITY & VULNERABILITY (Simulate Slither Detectors):
   - Detect Reentrancy (SWC-107)
   - Detect Unhandled External Calls (SWC-104)
   - Detect Integer Overflow/Underflow (SWC-101) - Context aware (SafeMath vs 0.8+)
   - Detect Access Control Issues (SWC-105)
   - Detect Weak Randomness (SWC-120)
   - Detect Proxy Implementation/Storage Collisions
   - For every finding, provide a CONFIDENCE level and strict line numbers.

2. GAS OPTIMIZATION:
   - Analyze storage layout packing.
   - Identify inefficient loops or expensive operations in hot paths.
   - Recommend "calldata" vs "memory" usage.

3. ECONOMIC SECURITY:
   - Identify Flash Loan attack vectors.
   - Analyze Oracle manipulation risks (Spot price dependency).
   - Assess Front-running/Sandwich attack opportunities.

4. UPGRADEABILITY & PROXY ANALYSIS:
   - Classify Proxy Pattern: UUPS, Transparent, Beacon, Diamond (EIP-2535), or Minimal.
   - Beacon/Diamond Specifics: Check for selector clashes, facet management safety, and beacon upgrade authorization.
   - Storage Layout: Deep analysis of storage slot collisions between versions. Check for variable ordering and gap usage (__gap) in upgradeable parent contracts.
   - Implementation Safety: Verify '_authorizeUpgrade' exists and is protected. Check for unsafe 'selfdestruct' or 'delegatecall' usage.

OUTPUT FORMAT:
Return strict JSON adhering to the provided schema. Do not output markdown code blocks.
"#;

/// Runs the model-backed audit and merges the result with local metrics.
pub struct AuditEngine {
    backend: Arc<dyn ModelBackend>,
    config: ModelConfig,
    progress: Progress,
}

impl AuditEngine {
    pub fn new(config: &ModelConfig, progress: Progress) -> anyhow::Result<Self> {
        let backend = Arc::new(GeminiClient::new(config)?);
        Ok(Self::with_backend(backend, config.clone(), progress))
    }

    pub fn with_backend(
        backend: Arc<dyn ModelBackend>,
        config: ModelConfig,
        progress: Progress,
    ) -> Self {
        Self {
            backend,
            config,
            progress,
        }
    }

    fn request(
        &self,
        model: &str,
        thinking_budget: Option<u32>,
        source: &str,
        contract_name: Option<&str>,
    ) -> GenerationRequest {
        GenerationRequest {
            model: model.to_string(),
            system_instruction: SYSTEM_INSTRUCTION.to_string(),
            user_message: format!(
                "AUDIT TARGET SOURCE CODE ({}):\n\n{}",
                contract_name.unwrap_or("Unknown"),
                source
            ),
            response_schema: ModelReport::response_schema(),
            temperature: self.config.temperature,
            top_k: self.config.top_k,
            top_p: self.config.top_p,
            seed: self.config.seed,
            thinking_budget,
        }
    }

    /// Call the primary model, then the fallback once. Returns the raw text
    /// and the identifier of the model that produced it.
    async fn invoke(
        &self,
        source: &str,
        contract_name: Option<&str>,
    ) -> Result<(String, String), AuditError> {
        let primary = &self.config.primary_model;
        let fallback = &self.config.fallback_model;

        self.progress
            .info(format!("Running deep analysis with {}...", primary));
        let request = self.request(primary, self.config.thinking_budget, source, contract_name);
        let primary_error = match self.backend.generate(&request).await {
            Ok(text) => return Ok((text, primary.clone())),
            Err(e) => e,
        };

        warn!("Primary model {} failed: {:#}", primary, primary_error);
        self.progress
            .warning(format!("{} unavailable, falling back to {}...", primary, fallback));

        let request = self.request(
            fallback,
            self.config.fallback_thinking_budget,
            source,
            contract_name,
        );
        match self.backend.generate(&request).await {
            Ok(text) => Ok((text, fallback.clone())),
            Err(e) => {
                self.progress
                    .error(format!("Fallback model {} failed as well", fallback));
                Err(AuditError::ModelInvocationFailed {
                primary: primary.clone(),
                fallback: fallback.clone(),
                    last_error: format!("{:#}", e),
                })
            }
        }
    }

    /// Audit `source`, optionally labelled with the caller's `contract_name`.
    /// The contract address is left for the caller to attach.
    pub async fn audit(
        &self,
        source: &str,
        contract_name: Option<&str>,
    ) -> Result<AuditReport, AuditError> {
        let length = source.trim().chars().count();
        if length < MIN_SOURCE_CHARS {
            return Err(AuditError::InputInvalid(format!(
                "source code too short ({} characters, need at least {})",
                length, MIN_SOURCE_CHARS
            )));
        }
        if !self.backend.is_configured() {
            return Err(AuditError::MissingCredentials);
        }

        let contract_name = contract_name.map(str::trim).filter(|n| !n.is_empty());
        let (raw, model_used) = self.invoke(source, contract_name).await?;
        let parsed = parse_model_report(&raw)?;

        let metrics = extract_metrics(source);
        let detected_libraries = detect_libraries(source);

        self.progress.success(format!(
            "Analysis complete ({}): {} vulnerabilities, {} gas optimizations, {} economic risks, {} upgradeability risks",
            model_used,
            parsed.vulnerabilities.len(),
            parsed.gas_analysis.len(),
            parsed.economic_analysis.len(),
            parsed.upgradeability_analysis.len(),
        ));

        let name = Some(parsed.contract_name.trim())
            .filter(|n| !n.is_empty())
            .or(contract_name)
            .unwrap_or("SmartContract")
            .to_string();

        Ok(AuditReport {
            contract_name: name,
            contract_address: None,
            network: self.config.network_label.clone(),
            audit_date: Utc::now(),
            overall_score: parsed.overall_score,
            summary: parsed.summary,
            vulnerabilities: parsed.vulnerabilities,
            gas_analysis: parsed.gas_analysis,
            economic_analysis: parsed.economic_analysis,
            upgradeability_analysis: parsed.upgradeability_analysis,
            formal_verification_suggestions: parsed.formal_verification_suggestions,
            model_used,
            metrics,
            detected_libraries,
        })
    }
}

/// Parse and validate the model's text into a [`ModelReport`].
pub fn parse_model_report(raw: &str) -> Result<ModelReport, AuditError> {
    let malformed = |reason: String| AuditError::MalformedModelOutput {
        reason,
        raw: raw.to_string(),
    };

    let payload = extract_json_payload(raw);
    let report: ModelReport = serde_json::from_str(payload)
        .map_err(|e| malformed(format!("model output is not a valid report: {}", e)))?;

    if !report.overall_score.is_finite() || !(0.0..=100.0).contains(&report.overall_score) {
        return Err(malformed(format!(
            "overall score {} is outside 0-100",
            report.overall_score
        )));
    }

    Ok(report)
}
