//! Export artifact of a completed session, rendered as JSON or CSV.

use std::io::{self, Write};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{ExportFormat, JobRecord};

const CSV_HEADER: [&str; 10] = [
    "id",
    "title",
    "company",
    "location",
    "published_at",
    "description",
    "link",
    "skills",
    "quality_score",
    "extracted_at",
];

/// One exported record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportRow {
    /// 1-based sequence within the export
    pub id: usize,
    pub title: String,
    pub company: String,
    pub location: String,
    pub published_at: Option<NaiveDate>,
    pub description: String,
    pub link: Option<String>,
    pub skills: Vec<String>,
    pub quality_score: f64,
    pub extracted_at: DateTime<Utc>,
}

/// Ordered records of a completed session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportArtifact {
    pub session_id: Uuid,
    pub target_url: String,
    pub format: ExportFormat,
    pub generated_at: DateTime<Utc>,
    pub rows: Vec<ExportRow>,
}

impl ExportArtifact {
    pub fn new(
        session_id: Uuid,
        target_url: impl Into<String>,
        format: ExportFormat,
        records: &[JobRecord],
    ) -> Self {
        let generated_at = Utc::now();
        let rows = records
            .iter()
            .enumerate()
            .map(|(i, r)| ExportRow {
                id: i + 1,
                title: r.title.clone(),
                company: r.company.clone(),
                location: r.location.clone(),
                published_at: r.published_at,
                description: r.description.clone(),
                link: r.link.clone(),
                skills: r.skills.iter().cloned().collect(),
                quality_score: r.quality_score,
                extracted_at: generated_at,
            })
            .collect();
        Self {
            session_id,
            target_url: target_url.into(),
            format,
            generated_at,
            rows,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// File extension of the rendered artifact.
    pub fn extension(&self) -> &'static str {
        self.format.extension()
    }

    /// Serialize in the artifact's format.
    pub fn render(&self) -> Result<Vec<u8>> {
        match self.format {
            ExportFormat::Json => Ok(serde_json::to_vec_pretty(self)?),
            ExportFormat::Csv => {
                let mut out = Vec::new();
                self.write_csv(&mut out)?;
                Ok(out)
            }
        }
    }

    fn write_csv<W: Write>(&self, mut w: W) -> io::Result<()> {
        let header: Vec<String> = CSV_HEADER.iter().map(|h| h.to_string()).collect();
        write_row(&mut w, &header)?;
        for row in &self.rows {
            let cells = vec![
                row.id.to_string(),
                row.title.clone(),
                row.company.clone(),
                row.location.clone(),
                row.published_at.map(|d| d.to_string()).unwrap_or_default(),
                row.description.clone(),
                row.link.clone().unwrap_or_default(),
                row.skills.join("; "),
                format!("{:.2}", row.quality_score),
                row.extracted_at.to_rfc3339(),
            ];
            write_row(&mut w, &cells)?;
        }
        Ok(())
    }
}

fn needs_quotes(field: &str) -> bool {
    field.contains(',') || field.contains('"') || field.contains('\n') || field.contains('\r')
}

fn write_row<W: Write>(mut w: W, row: &[String]) -> io::Result<()> {
    let mut first = true;
    for cell in row {
        if !first {
            write!(w, ",")?;
        } else {
            first = false;
        }
        if needs_quotes(cell) {
            write!(w, "\"{}\"", cell.replace('"', "\"\""))?;
        } else {
            write!(w, "{cell}")?;
        }
    }
    writeln!(w)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;

    fn record(title: &str) -> JobRecord {
        JobRecord {
            title: title.into(),
            company: "Acme, Inc.".into(),
            location: "Berlin".into(),
            published_at: NaiveDate::from_ymd_opt(2024, 5, 1),
            description: "Says \"hi\"".into(),
            link: Some("https://example.com/j/1".into()),
            skills: BTreeSet::from(["rust".to_string(), "sql".to_string()]),
            quality_score: 1.0,
        }
    }

    #[test]
    fn test_csv_quotes_special_cells() {
        let artifact = ExportArtifact::new(
            Uuid::new_v4(),
            "https://example.com/jobs",
            ExportFormat::Csv,
            &[record("Engineer")],
        );
        let text = String::from_utf8(artifact.render().unwrap()).unwrap();
        let mut lines = text.lines();

        assert_eq!(lines.next().unwrap(), CSV_HEADER.join(","));
        let row = lines.next().unwrap();
        assert!(row.starts_with("1,Engineer,\"Acme, Inc.\",Berlin,2024-05-01,\"Says \"\"hi\"\"\","));
        assert!(row.contains(",rust; sql,1.00,"));
    }

    #[test]
    fn test_json_keeps_order_and_ids() {
        let artifact = ExportArtifact::new(
            Uuid::new_v4(),
            "https://example.com/jobs",
            ExportFormat::Json,
            &[record("First"), record("Second")],
        );
        let parsed: ExportArtifact = serde_json::from_slice(&artifact.render().unwrap()).unwrap();
        assert_eq!(parsed, artifact);
        assert_eq!(parsed.rows[1].id, 2);
        assert_eq!(parsed.rows[1].title, "Second");
        assert_eq!(parsed.extension(), "json");
    }
}
