//! Markdown risk report.

use async_trait::async_trait;

use super::{ArtifactRef, DeliverableContext, DeliverableGenerator, write_artifact};
use crate::error::GeneratorError;
use crate::risk::{Category, RiskFinding, RiskRegister, Severity};

const TOP_PRIORITY_LIMIT: usize = 5;

/// Writes `<output_dir>/<job_id>_report.md`.
#[derive(Debug, Default, Clone)]
pub struct MarkdownReportGenerator;

impl MarkdownReportGenerator {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DeliverableGenerator for MarkdownReportGenerator {
    fn name(&self) -> &str {
        "report"
    }

    async fn generate(
        &self,
        ctx: &DeliverableContext,
        register: &RiskRegister,
    ) -> Result<ArtifactRef, GeneratorError> {
        let markdown = render(ctx, register);
        write_artifact(
            self.name(),
            ctx.artifact_path("report.md"),
            "text/markdown",
            &markdown,
        )
        .await
    }
}

/// Render the full report.
pub fn render(ctx: &DeliverableContext, register: &RiskRegister) -> String {
    let mut out = String::new();

    out.push_str(&format!("# Legal Risk Analysis Report: {}\n\n", ctx.job_name));
    out.push_str(&format!("- **Analysis ID:** {}\n", ctx.job_id));
    out.push_str(&format!(
        "- **Generated:** {}\n",
        ctx.generated_at.format("%Y-%m-%d %H:%M UTC")
    ));
    out.push_str(&format!("- **Documents reviewed:** {}\n", ctx.document_ids.len()));
    out.push_str(&format!("- **Risks identified:** {}\n\n", register.risks.len()));

    executive_summary(&mut out, register);
    top_priority(&mut out, register);

    out.push_str("## Documents Reviewed\n\n");
    for doc_id in &ctx.document_ids {
        out.push_str(&format!("- {doc_id}\n"));
    }
    out.push('\n');

    detailed_risks(&mut out, register);
    recommendations(&mut out, register);

    if !register.limitations.is_empty() {
        out.push_str("## Limitations\n\n");
        for limitation in &register.limitations {
            out.push_str(&format!("- {limitation}\n"));
        }
        out.push('\n');
    }

    out
}

fn executive_summary(out: &mut String, register: &RiskRegister) {
    out.push_str("## Executive Summary\n\n");
    if register.is_empty() {
        out.push_str("No risks were identified in the reviewed documents.\n\n");
        return;
    }

    let counts = register.by_severity();
    out.push_str("| Severity | Count |\n|---|---|\n");
    for severity in Severity::ALL {
        let count = counts.get(severity.as_str()).copied().unwrap_or(0);
        out.push_str(&format!("| {severity} | {count} |\n"));
    }
    out.push('\n');
}

fn top_priority(out: &mut String, register: &RiskRegister) {
    let urgent: Vec<&RiskFinding> = register
        .risks
        .iter()
        .filter(|r| matches!(r.severity, Severity::Critical | Severity::High))
        .take(TOP_PRIORITY_LIMIT)
        .collect();
    if urgent.is_empty() {
        return;
    }

    out.push_str("## Top Priority Risks\n\n");
    for (i, risk) in urgent.iter().enumerate() {
        out.push_str(&format!(
            "{}. **{}** ({}, {}): {}\n",
            i + 1,
            risk.title,
            risk.risk_id,
            risk.severity,
            risk.category
        ));
    }
    out.push('\n');
}

fn detailed_risks(out: &mut String, register: &RiskRegister) {
    if register.is_empty() {
        return;
    }
    out.push_str("## Detailed Risk Analysis\n\n");

    for category in Category::ALL {
        let risks: Vec<&RiskFinding> =
            register.risks.iter().filter(|r| r.category == category).collect();
        if risks.is_empty() {
            continue;
        }
        out.push_str(&format!("### {category} Risks\n\n"));
        for risk in risks {
            risk_section(out, risk);
        }
    }
}

fn risk_section(out: &mut String, risk: &RiskFinding) {
    out.push_str(&format!("#### {}: {}\n\n", risk.risk_id, risk.title));
    out.push_str(&format!(
        "**Severity:** {} | **Likelihood:** {}\n\n",
        risk.severity, risk.likelihood
    ));
    if !risk.description.is_empty() {
        out.push_str(&format!("{}\n\n", risk.description));
    }

    out.push_str("**Evidence:**\n\n");
    for evidence in &risk.evidence {
        if evidence.citation.is_empty() {
            out.push_str(&format!("- {}, page {}\n", evidence.doc_id, evidence.page_num));
        } else {
            out.push_str(&format!(
                "- {}, page {}: \"{}\"\n",
                evidence.doc_id, evidence.page_num, evidence.citation
            ));
        }
    }
    out.push('\n');

    if !risk.legal_basis.is_empty() {
        out.push_str(&format!("**Legal basis:** {}\n\n", risk.legal_basis));
    }
    if !risk.mitigation.is_empty() {
        out.push_str("**Recommended mitigation:**\n\n");
        for line in risk.mitigation.lines().filter(|l| !l.trim().is_empty()) {
            out.push_str(&format!("- {}\n", line.trim()));
        }
        out.push('\n');
    }
    if !risk.merged_from.is_empty() {
        let ids: Vec<String> = risk.merged_from.iter().map(ToString::to_string).collect();
        out.push_str(&format!("_Consolidated from {}._\n\n", ids.join(", ")));
    }
}

fn recommendations(out: &mut String, register: &RiskRegister) {
    if register.is_empty() {
        return;
    }
    out.push_str("## Recommendations\n\n");

    for severity in Severity::ALL {
        let risks: Vec<&RiskFinding> = register
            .risks
            .iter()
            .filter(|r| r.severity == severity && !r.mitigation.is_empty())
            .collect();
        if risks.is_empty() {
            continue;
        }
        let heading = match severity {
            Severity::Critical => "Immediate Actions Required",
            Severity::High => "Near-Term Actions",
            Severity::Medium => "Medium-Term Improvements",
            Severity::Low => "Monitoring Items",
        };
        out.push_str(&format!("### {heading}\n\n"));
        for risk in risks {
            let first = risk.mitigation.lines().next().unwrap_or_default().trim();
            out.push_str(&format!("- **{}** ({}): {first}\n", risk.title, risk.risk_id));
        }
        out.push('\n');
    }
}
