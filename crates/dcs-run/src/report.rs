//! # Deterministic HTML Report
//!
//! Renders the compliance report for a completed run: executive summary,
//! coverage metrics, gap summary, per-datapoint table with citations, and
//! the obligation coverage matrix. The only non-deterministic field is the
//! `generated-at` footer span, which [`normalize_report_html`] replaces for
//! snapshot comparison. Nothing in the report participates in any
//! fingerprint.

use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

use dcs_assess::{Assessment, AssessmentStatus, CoverageMatrix};

/// Minimal HTML escaping for text content.
fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn citations(assessment: &Assessment) -> String {
    if assessment.evidence_chunk_ids.is_empty() {
        return "-".to_string();
    }
    assessment
        .evidence_chunk_ids
        .iter()
        .map(|id| format!("<code>[{}]</code>", escape(id.as_str())))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Render the deterministic report HTML.
pub fn render_html_report(
    run_id: Uuid,
    assessments: &[Assessment],
    coverage: &CoverageMatrix,
    generated_at: Option<DateTime<Utc>>,
) -> String {
    let total = assessments.len();
    let present = count(assessments, AssessmentStatus::Present);
    let partial = count(assessments, AssessmentStatus::Partial);
    let absent = count(assessments, AssessmentStatus::Absent);
    let na = count(assessments, AssessmentStatus::NotApplicable);
    let needs_review = count(assessments, AssessmentStatus::NeedsReview);
    let covered = present + partial;
    let coverage_pct = if total > 0 {
        covered as f64 / total as f64 * 100.0
    } else {
        0.0
    };

    let gap_items: String = assessments
        .iter()
        .filter(|a| matches!(a.status, AssessmentStatus::Absent | AssessmentStatus::Partial))
        .map(|a| {
            format!(
                "<li><strong>{}</strong>: {}</li>",
                escape(a.datapoint_key.as_str()),
                escape(a.status.as_str())
            )
        })
        .collect();
    let gap_items = if gap_items.is_empty() {
        "<li>No gaps identified.</li>".to_string()
    } else {
        gap_items
    };

    let table_rows: String = assessments
        .iter()
        .map(|a| {
            format!(
                "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
                escape(a.datapoint_key.as_str()),
                escape(a.status.as_str()),
                escape(a.value.as_deref().unwrap_or("-")),
                citations(a),
                escape(&a.rationale),
            )
        })
        .collect();

    let matrix_rows: String = coverage
        .sections
        .iter()
        .map(|section| {
            if section.empty {
                format!(
                    "<tr><td>{}</td><td colspan=\"6\">No obligations in scope.</td></tr>",
                    escape(&section.section)
                )
            } else {
                section
                    .obligations
                    .iter()
                    .map(|o| {
                        format!(
                            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
                            escape(&section.section),
                            escape(o.obligation_code.as_str()),
                            o.total_mandatory,
                            o.present,
                            o.absent,
                            o.na,
                            escape(o.level.as_str()),
                        )
                    })
                    .collect()
            }
        })
        .collect();

    let generated_at_text = generated_at
        .unwrap_or_else(Utc::now)
        .to_rfc3339_opts(SecondsFormat::Secs, true);

    format!(
        concat!(
            "<!doctype html>",
            "<html lang=\"en\">",
            "<head><meta charset=\"utf-8\"><title>Compliance Report</title></head>",
            "<body>",
            "<h1>Compliance Report for Run {run_id}</h1>",
            "<section id=\"executive-summary\">",
            "<h2>Executive Summary</h2>",
            "<p>Coverage: {covered}/{total} datapoints ({pct:.1}%).</p>",
            "</section>",
            "<section id=\"coverage-metrics\">",
            "<h2>Coverage Metrics</h2>",
            "<ul>",
            "<li>Present: {present}</li>",
            "<li>Partial: {partial}</li>",
            "<li>Absent: {absent}</li>",
            "<li>NA: {na}</li>",
            "<li>Needs-Review: {needs_review}</li>",
            "</ul>",
            "</section>",
            "<section id=\"gap-summary\">",
            "<h2>Gap Summary</h2>",
            "<ul>{gap_items}</ul>",
            "</section>",
            "<section id=\"datapoint-table\">",
            "<h2>Datapoint Table</h2>",
            "<table>",
            "<thead><tr><th>Datapoint</th><th>Status</th><th>Value</th>",
            "<th>Citations</th><th>Rationale</th></tr></thead>",
            "<tbody>{table_rows}</tbody>",
            "</table>",
            "</section>",
            "<section id=\"coverage-matrix\">",
            "<h2>Obligation Coverage Matrix</h2>",
            "<table>",
            "<thead><tr><th>Section</th><th>Obligation</th><th>Mandatory</th>",
            "<th>Present</th><th>Absent</th><th>NA</th><th>Level</th></tr></thead>",
            "<tbody>{matrix_rows}</tbody>",
            "</table>",
            "</section>",
            "<footer>Generated at <span id=\"generated-at\">{generated_at}</span></footer>",
            "</body>",
            "</html>",
        ),
        run_id = run_id,
        covered = covered,
        total = total,
        pct = coverage_pct,
        present = present,
        partial = partial,
        absent = absent,
        na = na,
        needs_review = needs_review,
        gap_items = gap_items,
        table_rows = table_rows,
        matrix_rows = matrix_rows,
        generated_at = generated_at_text,
    )
}

fn count(assessments: &[Assessment], status: AssessmentStatus) -> usize {
    assessments.iter().filter(|a| a.status == status).count()
}

/// Replace the generated-at span for snapshot comparison.
pub fn normalize_report_html(html: &str) -> String {
    let marker_start = "<span id=\"generated-at\">";
    let Some(start) = html.find(marker_start) else {
        return html.to_string();
    };
    let value_start = start + marker_start.len();
    let Some(end_rel) = html[value_start..].find("</span>") else {
        return html.to_string();
    };
    format!(
        "{}{}TIMESTAMP{}",
        &html[..start],
        marker_start,
        &html[value_start + end_rel..]
    )
}
