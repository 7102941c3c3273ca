//! Course export as a two-column design table.
//!
//! Every text format renders the same rows: title, teaching goal, and
//! teaching method, then one row per topic and one per reference under a
//! section header. JSON is the full serialized [`Course`].

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::Deserialize;

use coursewright_core::models::Course;

const TABLE_CAPTION: &str = "Course Design Table";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Json,
    Csv,
    Markdown,
    Html,
}

impl ExportFormat {
    pub fn content_type(self) -> &'static str {
        match self {
            ExportFormat::Json => "application/json",
            ExportFormat::Csv => "text/csv; charset=utf-8",
            ExportFormat::Markdown => "text/markdown; charset=utf-8",
            ExportFormat::Html => "text/html; charset=utf-8",
        }
    }
}

/// One line of the design table.
#[derive(Debug, Clone, PartialEq)]
enum Row {
    Section(&'static str),
    Field(String, String),
}

fn table_rows(course: &Course) -> Vec<Row> {
    let mut rows = vec![
        Row::Field("Title".into(), course.title.clone()),
        Row::Field("Teaching Goal".into(), course.goal.clone()),
        Row::Field("Teaching Method".into(), course.method.clone()),
        Row::Section("Course Content"),
    ];
    for (i, topic) in course.topics.iter().enumerate() {
        let mut cell = topic.title.clone();
        if !topic.duration.trim().is_empty() {
            cell = format!("{cell} ({})", topic.duration.trim());
        }
        rows.push(Row::Field(format!("Topic {}", i + 1), cell));
    }
    if !course.references.is_empty() {
        rows.push(Row::Section("References"));
        for (i, reference) in course.references.iter().enumerate() {
            rows.push(Row::Field(format!("Reference {}", i + 1), reference.clone()));
        }
    }
    rows
}

/// Render a finished course in the requested format.
pub fn render_course(course: &Course, format: ExportFormat) -> Result<String> {
    match format {
        ExportFormat::Json => Ok(serde_json::to_string_pretty(course)?),
        ExportFormat::Csv => render_csv(&table_rows(course)),
        ExportFormat::Markdown => Ok(render_markdown(&table_rows(course))),
        ExportFormat::Html => Ok(render_html(&table_rows(course))),
    }
}

fn render_csv(rows: &[Row]) -> Result<String> {
    let mut writer = csv::WriterBuilder::new()
        .flexible(true)
        .from_writer(Vec::new());
    writer.write_record([TABLE_CAPTION])?;
    for row in rows {
        match row {
            Row::Section(name) => writer.write_record([*name])?,
            Row::Field(label, value) => writer.write_record([label.as_str(), value.as_str()])?,
        }
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("flushing CSV export: {e}"))?;
    String::from_utf8(bytes).context("CSV export is not UTF-8")
}

fn render_markdown(rows: &[Row]) -> String {
    let mut out = format!("| {TABLE_CAPTION} | |\n|---|---|\n");
    for row in rows {
        match row {
            Row::Section(name) => out.push_str(&format!("| **{name}** | |\n")),
            Row::Field(label, value) => {
                out.push_str(&format!("| {} | {} |\n", label, markdown_cell(value)))
            }
        }
    }
    out
}

fn markdown_cell(s: &str) -> String {
    s.replace('|', "\\|")
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn render_html(rows: &[Row]) -> String {
    let mut out = String::from("<table class=\"course-design\">\n");
    out.push_str(&format!("  <tr><th colspan=\"2\">{TABLE_CAPTION}</th></tr>\n"));
    for row in rows {
        match row {
            Row::Section(name) => {
                out.push_str(&format!("  <tr><th colspan=\"2\">{name}</th></tr>\n"))
            }
            Row::Field(label, value) => out.push_str(&format!(
                "  <tr><th>{}</th><td>{}</td></tr>\n",
                escape_html(label),
                escape_html(value)
            )),
        }
    }
    out.push_str("</table>\n");
    out
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}
