// src/trace/export.rs
//! Export trace recordings
//!
//! Supports:
//! - JSON (pretty array, for inspection)
//! - JSON lines (one record per line, for log shipping)
//! - JUnit XML (compliance report per key, for CI)

use crate::trace::compliance::{ComplianceChecker, Violation};
use crate::trace::events::TraceRecord;
use crate::utils::errors::{EngineError, Result};
use std::collections::BTreeMap;
use tracing::debug;

/// Export formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    JsonLines,
    JUnit,
}

/// Exporter for trace recordings
pub struct Exporter {
    format: ExportFormat,
}

impl Exporter {
    pub fn new(format: ExportFormat) -> Self {
        Self { format }
    }

    /// Export records to a string
    pub fn export(&self, records: &[TraceRecord]) -> Result<String> {
        debug!("Exporting {} trace records to {:?} format", records.len(), self.format);

        match self.format {
            ExportFormat::Json => self.export_json(records),
            ExportFormat::JsonLines => self.export_json_lines(records),
            ExportFormat::JUnit => Ok(self.export_junit(records)),
        }
    }

    fn export_json(&self, records: &[TraceRecord]) -> Result<String> {
        serde_json::to_string_pretty(records)
            .map_err(|e| EngineError::ExportFailed(format!("JSON serialization error: {}", e)))
    }

    fn export_json_lines(&self, records: &[TraceRecord]) -> Result<String> {
        let mut out = String::new();
        for record in records {
            let line = serde_json::to_string(record).map_err(|e| {
                EngineError::ExportFailed(format!("JSON serialization error: {}", e))
            })?;
            out.push_str(&line);
            out.push('\n');
        }
        Ok(out)
    }

    /// One test suite, one test case per execution key
    fn export_junit(&self, records: &[TraceRecord]) -> String {
        let report = ComplianceChecker::new().check(records);

        let mut per_key: BTreeMap<String, Vec<&Violation>> = BTreeMap::new();
        for record in records {
            per_key.entry(record.event.key().to_string()).or_default();
        }
        for violation in &report.violations {
            per_key
                .entry(violation.key.to_string())
                .or_default()
                .push(violation);
        }

        let failures = per_key.values().filter(|v| !v.is_empty()).count();
        let cases: Vec<String> = per_key
            .iter()
            .map(|(key, violations)| {
                let body: String = violations
                    .iter()
                    .map(|v| {
                        format!(
                            "    <failure type=\"{}\" message=\"{}\">seq {}: {}</failure>\n",
                            v.code.as_str(),
                            v.severity,
                            v.seq,
                            xml_escape(&v.message)
                        )
                    })
                    .collect();
                format!(
                    "  <testcase name=\"{}\" classname=\"host_engine.compliance\">\n{}  </testcase>",
                    xml_escape(key),
                    body
                )
            })
            .collect();

        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<testsuite name=\"Host Engine Trace Compliance\" tests=\"{}\" failures=\"{}\" time=\"0\">\n{}\n</testsuite>",
            per_key.len(),
            failures,
            cases.join("\n")
        )
    }
}

fn xml_escape(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::events::TraceEvent;

    fn create_test_records() -> Vec<TraceRecord> {
        vec![
            TraceRecord {
                seq: 0,
                timestamp_ns: 1_700_000_000_000_000_000,
                event: TraceEvent::RunnerStart { key: "world-1".into() },
            },
            TraceRecord {
                seq: 1,
                timestamp_ns: 1_700_000_000_000_000_100,
                event: TraceEvent::RequirementClear {
                    key: "world-2".into(),
                    requirement_id: "req<1>".into(),
                },
            },
        ]
    }

    #[test]
    fn test_json_export() {
        let exporter = Exporter::new(ExportFormat::Json);
        let json = exporter.export(&create_test_records()).unwrap();
        assert!(json.contains("runner:start"));
        assert!(json.contains("world-1"));
    }

    #[test]
    fn test_json_lines_export() {
        let exporter = Exporter::new(ExportFormat::JsonLines);
        let out = exporter.export(&create_test_records()).unwrap();

        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: TraceRecord = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.seq, 0);
    }

    #[test]
    fn test_junit_export() {
        let exporter = Exporter::new(ExportFormat::JUnit);
        let xml = exporter.export(&create_test_records()).unwrap();

        assert!(xml.contains("<?xml"));
        assert!(xml.contains("tests=\"2\""));
        assert!(xml.contains("failures=\"1\""));
        assert!(xml.contains("CLEAR_WITHOUT_DISPATCH"));
        assert!(xml.contains("req&lt;1&gt;"));
    }
}
