//! Text and JSON rendering of cache records

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::path::Path;
use wfref_cache::{
    ActionCache, ActionRecord, CacheStats, ParameterSide, RecordChange, RecordEvent,
};
use wfref_foundation::{ActionIdentity, ParameterMap, ReferenceKind};

/// Serializable view of one record at a point in time
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordView {
    pub identity: String,
    pub kind: ReferenceKind,
    pub local: bool,
    pub resolved: bool,
    pub fresh: bool,
    pub suppressed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub inputs: ParameterMap,
    pub outputs: ParameterMap,
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub ignored_inputs: BTreeSet<String>,
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub ignored_outputs: BTreeSet<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_version: Option<String>,
    pub outdated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl RecordView {
    pub fn new(record: &ActionRecord, now: DateTime<Utc>) -> Self {
        let identity = record.identity();
        let state = record.state();
        Self {
            identity: identity.key().to_string(),
            kind: identity.kind(),
            local: identity.is_local(),
            resolved: state.resolved,
            fresh: state.is_fresh(now),
            suppressed: record.is_suppressed(),
            expires_at: state
                .expires_at
                .map(|at| at.to_rfc3339_opts(SecondsFormat::Secs, true)),
            error: state.last_error.as_ref().map(ToString::to_string),
            inputs: state.inputs.clone(),
            outputs: state.outputs.clone(),
            ignored_inputs: record.ignored(ParameterSide::Input),
            ignored_outputs: record.ignored(ParameterSide::Output),
            latest_version: state.latest_version.clone(),
            outdated: record.is_outdated(),
            url: identity.github_url(),
        }
    }

    /// Needs attention: neither resolved nor silenced by the user
    pub fn is_unresolved(&self) -> bool {
        !self.resolved && !self.suppressed
    }

    fn status_line(&self) -> String {
        let mut line = if self.resolved {
            format!(
                "✓ {}  {} input{}, {} output{}",
                self.identity,
                self.inputs.len(),
                plural(self.inputs.len()),
                self.outputs.len(),
                plural(self.outputs.len())
            )
        } else if let Some(error) = &self.error {
            format!("✗ {}  {}", self.identity, error)
        } else {
            format!("… {}  unresolved", self.identity)
        };

        if self.resolved && !self.fresh && !self.local {
            line.push_str("  (stale)");
        }
        if let (true, Some(latest)) = (self.outdated, &self.latest_version) {
            line.push_str(&format!("  (latest: {})", latest));
        }
        if self.suppressed {
            line.push_str("  [suppressed]");
        }
        line
    }
}

/// A reference that never reached the cache
#[derive(Debug, Clone, Serialize)]
pub struct InvalidReference {
    pub reference: String,
    pub reason: String,
}

/// Resolution outcome for the references of one document
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentReport {
    pub document: String,
    pub records: Vec<RecordView>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub invalid: Vec<InvalidReference>,
}

impl DocumentReport {
    /// Build the report from the raw references of `document`, first
    /// occurrence order, duplicates collapsed
    pub fn new(
        document: &Path,
        references: &[String],
        cache: &ActionCache,
        now: DateTime<Utc>,
    ) -> Self {
        let mut seen = HashSet::new();
        let mut records = Vec::new();
        let mut invalid = Vec::new();

        for reference in references {
            match ActionIdentity::parse(reference) {
                Ok(identity) => {
                    if seen.insert(identity.key().to_string()) {
                        records.push(RecordView::new(&cache.get(&identity), now));
                    }
                }
                Err(e) => invalid.push(InvalidReference {
                    reference: reference.clone(),
                    reason: e.to_string(),
                }),
            }
        }

        Self {
            document: document.display().to_string(),
            records,
            invalid,
        }
    }

    pub fn unresolved(&self) -> usize {
        self.records.iter().filter(|r| r.is_unresolved()).count()
    }
}

pub fn print_document(report: &DocumentReport) {
    println!("{}", report.document);
    if report.records.is_empty() && report.invalid.is_empty() {
        println!("  (no references)");
    }
    for record in &report.records {
        println!("  {}", record.status_line());
    }
    for invalid in &report.invalid {
        println!("  ? {}  {}", invalid.reference, invalid.reason);
    }
}

/// One record with its declared parameters
pub fn print_record(view: &RecordView) {
    println!("{}", view.status_line());
    print_parameters("inputs", &view.inputs, &view.ignored_inputs);
    print_parameters("outputs", &view.outputs, &view.ignored_outputs);
    if let Some(expires_at) = &view.expires_at {
        println!("  expires: {}", expires_at);
    }
    if let Some(latest) = &view.latest_version {
        println!("  latest release: {}", latest);
    }
    if let Some(url) = &view.url {
        println!("  {}", url);
    }
}

fn print_parameters(label: &str, declared: &ParameterMap, ignored: &BTreeSet<String>) {
    if declared.is_empty() && ignored.is_empty() {
        return;
    }
    println!("  {}:", label);
    for (name, description) in declared {
        if description.is_empty() {
            println!("    {}", name);
        } else {
            println!("    {}  {}", name, first_line(description));
        }
    }
    for name in ignored.iter().filter(|name| !declared.contains_key(*name)) {
        println!("    {}  (ignored)", name);
    }
}

pub fn print_stats(stats: &CacheStats) {
    println!(
        "{} record{}, {} resolved, {} fresh",
        stats.records,
        plural(stats.records),
        stats.resolved,
        stats.fresh
    );
}

/// Single-line rendering of a record-changed notification
pub fn event_line(event: &RecordEvent, cache: &ActionCache) -> String {
    let identity = &event.identity;
    match &event.change {
        RecordChange::Resolved => match cache.peek(identity) {
            Some(record) => RecordView::new(&record, Utc::now()).status_line(),
            None => format!("✓ {}", identity),
        },
        RecordChange::Failed(kind) => {
            let reason = cache
                .peek(identity)
                .and_then(|record| record.last_error())
                .map_or_else(|| format!("{:?}", kind), |e| e.to_string());
            format!("✗ {}  {}", identity, reason)
        }
        RecordChange::SuppressionChanged { suppressed: true } => {
            format!("🔕 {}  suppressed", identity)
        }
        RecordChange::SuppressionChanged { suppressed: false } => {
            format!("🔔 {}  unsuppressed", identity)
        }
        RecordChange::IgnoredChanged {
            side,
            name,
            ignored,
        } => {
            let side = match side {
                ParameterSide::Input => "input",
                ParameterSide::Output => "output",
            };
            let verb = if *ignored { "ignored" } else { "no longer ignored" };
            format!("• {}  {} '{}' {}", identity, side, name, verb)
        }
        RecordChange::Invalidated => format!("🧹 {}  cleared", identity),
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("")
}

fn plural(count: usize) -> &'static str {
    if count == 1 {
        ""
    } else {
        "s"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use wfref_cache::{CacheSettings, CacheSnapshot, SnapshotRecord};
    use wfref_resolver::{FetchSettings, FsLocalResolver, HttpFetcher};

    fn offline_cache(root: &Path) -> ActionCache {
        let fetcher = HttpFetcher::new(FetchSettings::default()).unwrap();
        ActionCache::new(
            Arc::new(fetcher),
            Arc::new(FsLocalResolver::new(root)),
            CacheSettings::default(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_document_report_collapses_duplicates_and_keeps_invalid() {
        let dir = tempfile::TempDir::new().unwrap();
        let cache = offline_cache(dir.path());
        let references: Vec<String> = [
            "actions/checkout@v4",
            "not-a-reference",
            "actions/checkout@v4",
            "'./.github/actions/build'",
        ]
        .iter()
        .map(|r| r.to_string())
        .collect();

        let report = DocumentReport::new(Path::new("ci.yml"), &references, &cache, Utc::now());

        let identities: Vec<&str> = report.records.iter().map(|r| r.identity.as_str()).collect();
        assert_eq!(identities, vec!["actions/checkout@v4", "./.github/actions/build"]);
        assert_eq!(report.invalid.len(), 1);
        assert_eq!(report.invalid[0].reference, "not-a-reference");
        assert_eq!(report.unresolved(), 2);
    }

    #[tokio::test]
    async fn test_suppressed_record_is_not_unresolved() {
        let dir = tempfile::TempDir::new().unwrap();
        let cache = offline_cache(dir.path());
        let identity = ActionIdentity::parse("octo/gone@v1").unwrap();
        cache.set_suppressed(&identity, true);

        let view = RecordView::new(&cache.get(&identity), Utc::now());
        assert!(!view.is_unresolved());
        assert_eq!(view.status_line(), "… octo/gone@v1  unresolved  [suppressed]");
    }

    #[tokio::test]
    async fn test_record_view_json_shape() {
        let dir = tempfile::TempDir::new().unwrap();
        let cache = offline_cache(dir.path());
        let identity = ActionIdentity::parse("actions/cache@v4").unwrap();
        cache.set_output_ignored(&identity, "cache-hit", true);

        let view = RecordView::new(&cache.get(&identity), Utc::now());
        let json = serde_json::to_value(view).unwrap();
        assert_eq!(json["identity"], "actions/cache@v4");
        assert_eq!(json["kind"], "action");
        assert_eq!(json["resolved"], false);
        assert_eq!(json["ignoredOutputs"][0], "cache-hit");
        assert!(json.get("ignoredInputs").is_none());
        assert_eq!(
            json["url"],
            "https://github.com/actions/cache/blob/v4/action.yml"
        );
    }

    #[tokio::test]
    async fn test_outdated_ref_shows_latest_release() {
        let dir = tempfile::TempDir::new().unwrap();
        let cache = offline_cache(dir.path());
        let in_one_hour = Utc::now().timestamp_millis() + 60 * 60 * 1000;
        cache.import_snapshot(CacheSnapshot {
            records: vec![
                SnapshotRecord {
                    identity: "actions/setup-java@v3".to_string(),
                    resolved: true,
                    expires_at: in_one_hour,
                    latest_version: Some("v4.0.0".to_string()),
                    ..SnapshotRecord::default()
                },
                SnapshotRecord {
                    identity: "actions/checkout@v4".to_string(),
                    resolved: true,
                    expires_at: in_one_hour,
                    latest_version: Some("v4.2.1".to_string()),
                    ..SnapshotRecord::default()
                },
            ],
            ..CacheSnapshot::default()
        });

        let setup_java = ActionIdentity::parse("actions/setup-java@v3").unwrap();
        let old = RecordView::new(&cache.get(&setup_java), Utc::now());
        assert!(old.outdated);
        assert_eq!(
            old.status_line(),
            "✓ actions/setup-java@v3  0 inputs, 0 outputs  (latest: v4.0.0)"
        );

        let checkout = ActionIdentity::parse("actions/checkout@v4").unwrap();
        let current = RecordView::new(&cache.get(&checkout), Utc::now());
        assert!(!current.outdated);
        assert_eq!(current.status_line(), "✓ actions/checkout@v4  0 inputs, 0 outputs");
    }

    #[test]
    fn test_plural() {
        assert_eq!(plural(0), "s");
        assert_eq!(plural(1), "");
        assert_eq!(plural(2), "s");
    }
}
