//! Auxiliary analyzers.
//!
//! Analyzers look at the whole text and report a finding that the cross
//! validator may combine with gate results. They never take part in risk
//! scoring or correction directly.

pub mod patterns;

use serde_json::json;

use crate::types::{AnalyzerFinding, Severity, Status};
use patterns::find_entities;

/// Contract for auxiliary detectors.
pub trait Analyzer: Send + Sync {
    /// Key under which the finding is reported.
    fn name(&self) -> &str;

    fn analyze(&self, text: &str) -> AnalyzerFinding;
}

/// Personal-data and credential detector.
///
/// Reports `details.entities[]` with `type`, `severity`, `start`, `end`.
#[derive(Debug, Default, Clone, Copy)]
pub struct PiiAnalyzer;

impl Analyzer for PiiAnalyzer {
    fn name(&self) -> &str {
        "pii"
    }

    fn analyze(&self, text: &str) -> AnalyzerFinding {
        let entities = find_entities(text);
        let worst = entities
            .iter()
            .map(|e| e.kind.severity())
            .max()
            .unwrap_or(Severity::None);

        let (status, message) = match worst {
            Severity::None => (Status::Pass, "No personal data detected".to_string()),
            Severity::Critical => (
                Status::Fail,
                format!(
                    "{} personal data item(s) detected, including severe categories",
                    entities.len()
                ),
            ),
            _ => (
                Status::Warning,
                format!("{} personal data item(s) detected", entities.len()),
            ),
        };

        let details = json!({
            "entities": entities
                .iter()
                .map(|e| json!({
                    "type": e.kind.as_str(),
                    "severity": e.kind.severity(),
                    "start": e.span.start,
                    "end": e.span.end,
                }))
                .collect::<Vec<_>>(),
        });

        AnalyzerFinding {
            status,
            severity: worst,
            message,
            details: Some(details),
        }
    }
}
