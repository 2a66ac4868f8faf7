//! Self-contained HTML dashboard with the register embedded as JSON.

use async_trait::async_trait;
use serde::Serialize;

use super::{ArtifactRef, DeliverableContext, DeliverableGenerator, write_artifact};
use crate::error::GeneratorError;
use crate::risk::{RiskFinding, RiskRegister};

/// Writes `<output_dir>/<job_id>_dashboard.html`.
#[derive(Debug, Default, Clone)]
pub struct DashboardGenerator;

impl DashboardGenerator {
    pub fn new() -> Self {
        Self
    }
}

#[derive(Serialize)]
struct DashboardData<'a> {
    job_id: String,
    job_name: &'a str,
    generated_at: String,
    documents: &'a [String],
    by_severity: std::collections::BTreeMap<&'static str, usize>,
    by_category: std::collections::BTreeMap<&'static str, usize>,
    risks: &'a [RiskFinding],
    limitations: &'a [String],
}

#[async_trait]
impl DeliverableGenerator for DashboardGenerator {
    fn name(&self) -> &str {
        "dashboard"
    }

    async fn generate(
        &self,
        ctx: &DeliverableContext,
        register: &RiskRegister,
    ) -> Result<ArtifactRef, GeneratorError> {
        let html = render(ctx, register)?;
        write_artifact(
            self.name(),
            ctx.artifact_path("dashboard.html"),
            "text/html",
            &html,
        )
        .await
    }
}

/// Render the dashboard page.
pub fn render(ctx: &DeliverableContext, register: &RiskRegister) -> Result<String, GeneratorError> {
    let data = DashboardData {
        job_id: ctx.job_id.to_string(),
        job_name: &ctx.job_name,
        generated_at: ctx.generated_at.to_rfc3339(),
        documents: &ctx.document_ids,
        by_severity: register.by_severity(),
        by_category: register.by_category(),
        risks: &register.risks,
        limitations: &register.limitations,
    };
    // Keep "</script>" inside string values from closing the data block.
    let json = serde_json::to_string(&data)?.replace("</", "<\\/");

    Ok(TEMPLATE
        .replace("{{TITLE}}", &escape_html(&ctx.job_name))
        .replace("{{DATA}}", &json))
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

const TEMPLATE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>Legal Risk Dashboard - {{TITLE}}</title>
<style>
  body { font-family: system-ui, sans-serif; margin: 0; background: #f5f6f8; color: #1f2933; }
  header { background: #1f2933; color: #fff; padding: 1.5rem 2rem; }
  main { padding: 1.5rem 2rem; }
  .cards { display: flex; gap: 1rem; margin-bottom: 1.5rem; }
  .card { background: #fff; border-radius: 6px; padding: 1rem 1.5rem; flex: 1; }
  .card .n { font-size: 2rem; font-weight: 600; }
  .Critical { color: #b42318; } .High { color: #c4320a; }
  .Medium { color: #b54708; } .Low { color: #027a48; }
  .filters { margin-bottom: 1rem; display: flex; gap: .5rem; }
  table { width: 100%; border-collapse: collapse; background: #fff; }
  th, td { text-align: left; padding: .5rem .75rem; border-bottom: 1px solid #e4e7ec; vertical-align: top; }
  tr.detail td { background: #f9fafb; font-size: .9rem; }
  ul.limitations { background: #fffaeb; padding: 1rem 2rem; border-radius: 6px; }
</style>
</head>
<body>
<header>
  <h1>Legal Risk Dashboard</h1>
  <div id="meta"></div>
</header>
<main>
  <section class="cards" id="cards"></section>
  <section class="filters">
    <select id="categoryFilter"><option value="">All categories</option></select>
    <select id="severityFilter"><option value="">All severities</option></select>
    <input type="text" id="searchInput" placeholder="Search risks...">
  </section>
  <table>
    <thead><tr><th>ID</th><th>Title</th><th>Category</th><th>Severity</th><th>Likelihood</th><th>Evidence</th></tr></thead>
    <tbody id="risks"></tbody>
  </table>
  <section id="limitationsSection"></section>
</main>
<script id="dashboard-data" type="application/json">{{DATA}}</script>
<script>
  const data = JSON.parse(document.getElementById('dashboard-data').textContent);
  const severityOrder = ['Critical', 'High', 'Medium', 'Low'];
  const esc = s => String(s).replace(/[&<>"]/g, c => ({'&':'&amp;','<':'&lt;','>':'&gt;','"':'&quot;'}[c]));

  document.getElementById('meta').textContent =
    `${data.job_name} | ${data.documents.length} documents | generated ${data.generated_at}`;

  document.getElementById('cards').innerHTML = severityOrder.map(s =>
    `<div class="card"><div class="n ${s}">${data.by_severity[s] || 0}</div>${s}</div>`).join('');

  const categoryFilter = document.getElementById('categoryFilter');
  Object.keys(data.by_category).forEach(c => categoryFilter.add(new Option(c, c)));
  const severityFilter = document.getElementById('severityFilter');
  severityOrder.forEach(s => severityFilter.add(new Option(s, s)));
  const searchInput = document.getElementById('searchInput');

  function renderRisks() {
    const category = categoryFilter.value;
    const severity = severityFilter.value;
    const query = searchInput.value.toLowerCase();
    const rows = data.risks
      .filter(r => !category || r.category === category)
      .filter(r => !severity || r.severity === severity)
      .filter(r => !query || (r.title + ' ' + r.description).toLowerCase().includes(query))
      .sort((a, b) => severityOrder.indexOf(a.severity) - severityOrder.indexOf(b.severity));
    document.getElementById('risks').innerHTML = rows.map(r => `
      <tr>
        <td>${esc(r.risk_id)}</td><td>${esc(r.title)}</td><td>${esc(r.category)}</td>
        <td class="${esc(r.severity)}">${esc(r.severity)}</td><td>${esc(r.likelihood)}</td>
        <td>${r.evidence.map(e => `${esc(e.doc_id)} p.${e.page_num}`).join('<br>')}</td>
      </tr>
      <tr class="detail"><td></td><td colspan="5">
        ${esc(r.description)}
        ${r.legal_basis ? `<p><b>Legal basis:</b> ${esc(r.legal_basis)}</p>` : ''}
        ${r.mitigation ? `<p><b>Mitigation:</b> ${esc(r.mitigation).replace(/\n/g, '<br>')}</p>` : ''}
      </td></tr>`).join('');
  }

  [categoryFilter, severityFilter].forEach(el => el.addEventListener('change', renderRisks));
  searchInput.addEventListener('input', renderRisks);
  renderRisks();

  if (data.limitations.length) {
    document.getElementById('limitationsSection').innerHTML =
      '<h2>Limitations</h2><ul class="limitations">' +
      data.limitations.map(l => `<li>${esc(l)}</li>`).join('') + '</ul>';
  }
</script>
</body>
</html>
"#;

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::*;
    use crate::risk::{Category, Evidence, Likelihood, RiskId, Severity};

    fn ctx(dir: &std::path::Path, name: &str) -> DeliverableContext {
        DeliverableContext {
            job_id: Uuid::new_v4(),
            job_name: name.into(),
            document_ids: vec!["D1".into()],
            output_dir: dir.to_path_buf(),
            generated_at: Utc::now(),
        }
    }

    fn register(title: &str) -> RiskRegister {
        RiskRegister {
            risks: vec![RiskFinding {
                risk_id: RiskId(1),
                title: title.into(),
                description: String::new(),
                category: Category::Ip,
                severity: Severity::High,
                likelihood: Likelihood::Possible,
                evidence: vec![Evidence {
                    doc_id: "D1".into(),
                    page_num: 2,
                    citation: String::new(),
                }],
                legal_basis: String::new(),
                mitigation: String::new(),
                merged_from: vec![],
            }],
            limitations: vec![],
        }
    }

    fn embedded(html: &str) -> serde_json::Value {
        let start = html.find(r#"type="application/json">"#).unwrap()
            + r#"type="application/json">"#.len();
        let end = start + html[start..].find("</script>").unwrap();
        serde_json::from_str(&html[start..end]).unwrap()
    }

    #[test]
    fn register_embedded_as_json() {
        let dir = tempfile::tempdir().unwrap();
        let html = render(&ctx(dir.path(), "Acme"), &register("Patent lapse")).unwrap();

        let data = embedded(&html);
        assert_eq!(data["job_name"], "Acme");
        assert_eq!(data["risks"][0]["risk_id"], "RISK-0001");
        assert_eq!(data["risks"][0]["category"], "IP");
        assert_eq!(data["by_severity"]["High"], 1);
        assert!(html.contains("<title>Legal Risk Dashboard - Acme</title>"));
    }

    #[test]
    fn hostile_text_cannot_break_out() {
        let dir = tempfile::tempdir().unwrap();
        let html = render(
            &ctx(dir.path(), "<b>Acme</b>"),
            &register("</script><script>alert(1)</script>"),
        )
        .unwrap();

        assert!(html.contains("&lt;b&gt;Acme&lt;/b&gt;"));
        assert_eq!(
            embedded(&html)["risks"][0]["title"],
            "</script><script>alert(1)</script>"
        );
    }

    #[tokio::test]
    async fn writes_html_file() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx(dir.path(), "Acme");
        let artifact = DashboardGenerator::new()
            .generate(&ctx, &register("Patent lapse"))
            .await
            .unwrap();
        assert_eq!(artifact.media_type, "text/html");
        assert!(artifact.path.exists());
    }
}
