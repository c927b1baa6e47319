//! A minimal built-in report renderer.
//!
//! The production deployment points the renderer port at the external PDF
//! service; this fallback emits a small single-page PDF describing the
//! run's governance context so evidence bundles stay complete in
//! single-process deployments and tests. Output is deterministic for a
//! given context.

use async_trait::async_trait;

use animus_api::report::{ReportContext, ReportError, ReportRenderer};

#[derive(Debug, Clone, Copy, Default)]
pub struct PlainReportRenderer;

fn escape_pdf_text(s: &str) -> String {
    s.replace('\\', "\\\\").replace('(', "\\(").replace(')', "\\)")
}

/// Assembles a one-page PDF with the given text lines, computing the xref
/// table offsets by hand.
fn render_pdf(lines: &[String]) -> Vec<u8> {
    let mut content = String::from("BT\n/F1 10 Tf\n50 742 Td\n14 TL\n");
    for line in lines {
        content.push_str(&format!("({}) Tj\nT*\n", escape_pdf_text(line)));
    }
    content.push_str("ET\n");

    let objects = [
        "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
        "<< /Type /Pages /Kids [3 0 R] /Count 1 >>".to_string(),
        "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >>".to_string(),
        format!("<< /Length {} >>\nstream\n{}endstream", content.len(), content),
        "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>".to_string(),
    ];

    let mut pdf = String::from("%PDF-1.4\n");
    let mut offsets = Vec::with_capacity(objects.len());
    for (i, body) in objects.iter().enumerate() {
        offsets.push(pdf.len());
        pdf.push_str(&format!("{} 0 obj\n{}\nendobj\n", i + 1, body));
    }

    let xref_offset = pdf.len();
    pdf.push_str(&format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1));
    for offset in &offsets {
        pdf.push_str(&format!("{offset:010} 00000 n \n"));
    }
    pdf.push_str(&format!(
        "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
        objects.len() + 1,
        xref_offset
    ));
    pdf.into_bytes()
}

#[async_trait]
impl ReportRenderer for PlainReportRenderer {
    async fn render(&self, ctx: &ReportContext) -> Result<Vec<u8>, ReportError> {
        let mut lines = vec![
            "Animus execution report".to_string(),
            String::new(),
            format!("Run: {}", ctx.run.run_id),
            format!("Experiment: {}", ctx.run.experiment_id),
            format!(
                "Status: {}",
                ctx.status.map(|s| s.as_str()).unwrap_or("created")
            ),
            format!("Dataset version: {}", ctx.run.dataset_version_id),
            format!("Git: {} @ {}", ctx.run.git_repo, ctx.run.git_commit),
            format!("Image: {}", ctx.run.image_digest),
            String::new(),
            format!("Policy decisions: {}", ctx.decisions.len()),
        ];
        for d in &ctx.decisions {
            lines.push(format!(
                "  {} -> {}{}",
                d.policy_id,
                d.decision.as_str(),
                d.rule_id
                    .as_deref()
                    .map(|r| format!(" (rule {r})"))
                    .unwrap_or_default()
            ));
        }
        lines.push(format!("Approvals: {}", ctx.approvals.len()));
        for a in &ctx.approvals {
            lines.push(format!(
                "  {}: {} requested_by={} decided_by={}",
                a.approval_id,
                a.status.as_str(),
                a.requested_by,
                a.decided_by.as_deref().unwrap_or("-")
            ));
        }
        Ok(render_pdf(&lines))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use animus_types::execution::Resources;
    use animus_types::run::{Run, RunStatus};
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn ctx() -> ReportContext {
        ReportContext {
            run: Run {
                run_id: "run_1".into(),
                experiment_id: "exp_1".into(),
                dataset_version_id: "dv_1".into(),
                git_repo: "acme/train".into(),
                git_commit: "0123abc".into(),
                git_ref: None,
                image_ref: "ghcr.io/acme/train@sha256:aa".into(),
                image_digest: "sha256:aa".into(),
                params: json!({}),
                resources: Resources::default(),
                artifacts_prefix: "runs/run_1".into(),
                created_by: "u1".into(),
                created_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
                integrity_sha256: "x".into(),
            },
            status: Some(RunStatus::Succeeded),
            decisions: vec![],
            approvals: vec![],
        }
    }

    #[tokio::test]
    async fn output_is_a_pdf_and_deterministic() {
        let renderer = PlainReportRenderer;
        let a = renderer.render(&ctx()).await.unwrap();
        let b = renderer.render(&ctx()).await.unwrap();
        assert!(a.starts_with(b"%PDF-1.4"));
        assert!(a.ends_with(b"%%EOF\n"));
        assert_eq!(a, b);
    }

    #[test]
    fn parens_are_escaped() {
        assert_eq!(escape_pdf_text("a(b)c"), "a\\(b\\)c");
    }
}
