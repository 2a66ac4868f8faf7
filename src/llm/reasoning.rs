//! Reasoning collaborator: turns a batch of document content into raw
//! findings.
//!
//! `ReasoningEngine` is the seam the dispatcher's workers call. The bundled
//! `LlmReasoningEngine` prompts an `LlmProvider` and parses its answer against
//! a strict serde schema; anything that does not parse is a
//! `ReasoningError::Schema`.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::ReasoningError;
use crate::llm::provider::{ChatMessage, CompletionRequest, LlmProvider};
use crate::risk::{Category, Evidence, Likelihood, RawFinding, Severity};
use crate::store::Page;

/// Content of one document as handed to the reasoning collaborator.
#[derive(Debug, Clone)]
pub struct AnalysisDocument {
    pub doc_id: String,
    pub title: Option<String>,
    /// Document summary plus page summaries.
    pub summary: String,
    /// Pages selected for full reading.
    pub pages: Vec<Page>,
}

/// What one task sends for analysis.
#[derive(Debug, Clone)]
pub struct AnalysisBatch {
    pub sequence: usize,
    pub documents: Vec<AnalysisDocument>,
}

impl AnalysisBatch {
    pub fn document_ids(&self) -> Vec<&str> {
        self.documents.iter().map(|d| d.doc_id.as_str()).collect()
    }
}

/// Ambient information about the call.
#[derive(Debug, Clone)]
pub struct AnalysisContext {
    pub job_id: Uuid,
    pub task_id: Uuid,
    pub attempt: u32,
    pub focus_terms: Vec<String>,
}

#[async_trait]
pub trait ReasoningEngine: Send + Sync {
    /// Analyze one batch. `Transient` errors are retried by the caller;
    /// `Schema` and `Permanent` are not.
    async fn analyze(
        &self,
        batch: &AnalysisBatch,
        ctx: &AnalysisContext,
    ) -> Result<Vec<RawFinding>, ReasoningError>;
}

const ANALYSIS_PROMPT: &str = r#"You are a legal risk analysis expert reviewing documents from a data room.

For each document you are given its ID, title, summary, page-by-page summaries, and the text of selected pages.

Identify legal risks in these categories:
- Contractual: obligations, termination clauses, warranties, indemnities, payment terms
- Regulatory: compliance requirements, licensing, data privacy (GDPR, CCPA), industry regulations
- Litigation: dispute resolution, arbitration clauses, limitation of liability
- IP: intellectual property ownership, licensing terms, trade secrets
- Operational: service continuity, dependencies, business interruption

For each risk provide a category, a short title, a detailed description, a severity (Critical, High, Medium, Low), a likelihood (Very Likely, Likely, Possible, Unlikely), evidence (doc_id, page_num and a citation from the document), the legal basis, and a recommended mitigation.

Only cite documents and pages you were given. Respond with valid JSON only, no text before or after, in exactly this structure:
{
  "analysis_summary": "Brief 2-3 sentence summary",
  "risks": [
    {
      "risk_id": "RISK_001",
      "category": "Contractual",
      "title": "Risk title",
      "description": "Detailed description",
      "severity": "High",
      "likelihood": "Likely",
      "evidence": [{"doc_id": "DOC001", "page_num": 1, "citation": "Quoted text"}],
      "legal_basis": "Relevant law or regulation",
      "recommended_mitigation": "Specific action steps"
    }
  ]
}"#;

/// Wire shape of the model's answer.
#[derive(Debug, Deserialize)]
struct AnalysisResponse {
    #[serde(default)]
    analysis_summary: Option<String>,
    risks: Vec<WireRisk>,
}

#[derive(Debug, Deserialize)]
struct WireRisk {
    #[serde(default)]
    risk_id: Option<String>,
    category: Category,
    title: String,
    #[serde(default)]
    description: String,
    severity: Severity,
    likelihood: Likelihood,
    evidence: Vec<Evidence>,
    #[serde(default)]
    legal_basis: String,
    #[serde(default)]
    recommended_mitigation: String,
}

impl From<WireRisk> for RawFinding {
    fn from(w: WireRisk) -> Self {
        RawFinding {
            local_id: w.risk_id,
            title: w.title,
            description: w.description,
            category: w.category,
            severity: w.severity,
            likelihood: w.likelihood,
            evidence: w.evidence,
            legal_basis: w.legal_basis,
            mitigation: w.recommended_mitigation,
        }
    }
}

/// `ReasoningEngine` that asks an LLM.
pub struct LlmReasoningEngine {
    llm: Arc<dyn LlmProvider>,
    max_tokens: u32,
}

impl LlmReasoningEngine {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self {
            llm,
            max_tokens: 4096,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    fn build_prompt(batch: &AnalysisBatch, ctx: &AnalysisContext) -> String {
        let mut out = String::from("Here are the documents to analyze:\n");
        for doc in &batch.documents {
            out.push_str(&format!(
                "\n=== Document ID: {} ===\nTitle: {}\nSummary:\n{}\n",
                doc.doc_id,
                doc.title.as_deref().unwrap_or("(untitled)"),
                doc.summary
            ));
            for page in &doc.pages {
                let body = page.text.as_deref().unwrap_or(page.summary.as_str());
                out.push_str(&format!("\n--- Page {} ---\n{}\n", page.page_num, body));
            }
        }
        if !ctx.focus_terms.is_empty() {
            out.push_str(&format!(
                "\nPay particular attention to: {}\n",
                ctx.focus_terms.join(", ")
            ));
        }
        out
    }
}

#[async_trait]
impl ReasoningEngine for LlmReasoningEngine {
    async fn analyze(
        &self,
        batch: &AnalysisBatch,
        ctx: &AnalysisContext,
    ) -> Result<Vec<RawFinding>, ReasoningError> {
        let request = CompletionRequest::new(vec![
            ChatMessage::system(ANALYSIS_PROMPT),
            ChatMessage::user(Self::build_prompt(batch, ctx)),
        ])
        .with_max_tokens(self.max_tokens)
        .with_temperature(0.0);

        let response = self.llm.complete(request).await?;
        debug!(
            job_id = %ctx.job_id,
            task_id = %ctx.task_id,
            attempt = ctx.attempt,
            output_tokens = response.output_tokens,
            "Analysis response received"
        );

        parse_findings(&response.content).inspect_err(|e| {
            warn!(
                task_id = %ctx.task_id,
                error = %e,
                "Model output did not match the findings schema"
            );
        })
    }
}

/// Parse a model answer into raw findings.
pub fn parse_findings(text: &str) -> Result<Vec<RawFinding>, ReasoningError> {
    let json = extract_json_object(text)
        .ok_or_else(|| ReasoningError::Schema("no JSON object in response".to_string()))?;
    let parsed: AnalysisResponse =
        serde_json::from_str(json).map_err(|e| ReasoningError::Schema(e.to_string()))?;
    if let Some(summary) = &parsed.analysis_summary {
        debug!(summary = %summary, "Batch analysis summary");
    }
    Ok(parsed.risks.into_iter().map(RawFinding::from).collect())
}

/// Find the JSON object in a model response (bare, fenced, or surrounded by
/// prose).
fn extract_json_object(text: &str) -> Option<&str> {
    let trimmed = text.trim();

    if trimmed.starts_with('{') {
        return Some(trimmed);
    }

    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return Some(after[..end].trim());
        }
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (end > start).then(|| &trimmed[start..=end])
}
