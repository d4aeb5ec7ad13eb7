//! Command implementations
//!
//! Per-document failures are recorded in the batch summary and never stop
//! the run. Only creating the output directory or writing the consolidated
//! file and summary is fatal.

use std::path::{Path, PathBuf};

use anyhow::Context;
use futures::stream::{self, StreamExt};
use serde::Serialize;

use ctix_core::{AppConfig, BatchConfig};
use ctix_reconcile::{
    BatchSummary, ConsolidatedResult, DocumentMerger, MergedDocument, ReconcileMerger,
};

use crate::loader::{base_name, discover, load_document};

pub const CONSOLIDATED_FILE: &str = "all_documents_consolidated.json";
pub const SUMMARY_FILE: &str = "_merge_summary.json";
const MERGED_SUFFIX: &str = "_merged.json";

/// Path of a document's merged output
pub fn merged_path(output_dir: &Path, base: &str) -> PathBuf {
    output_dir.join(format!("{base}{MERGED_SUFFIX}"))
}

// ============================================================================
// merge
// ============================================================================

/// Merge every document of a batch, then consolidate and summarize
pub async fn run_merge(config: &AppConfig) -> anyhow::Result<BatchSummary> {
    let batch = &config.batch;
    tokio::fs::create_dir_all(&batch.output_dir)
        .await
        .with_context(|| format!("creating output directory {}", batch.output_dir.display()))?;

    let files = discover(&batch.results_dir)
        .await
        .context("discovering entity extraction results")?;
    tracing::info!(
        documents = files.len(),
        concurrency = batch.concurrency,
        "starting merge"
    );

    let merger = ReconcileMerger::new(config.matching.clone());
    let mut results: Vec<(String, ctix_core::Result<MergedDocument>)> = stream::iter(files)
        .map(|path| merge_one(path, batch, &merger))
        .buffer_unordered(batch.concurrency.max(1))
        .collect()
        .await;
    results.sort_by(|a, b| a.0.cmp(&b.0));

    let mut summary = BatchSummary::start();
    let mut consolidated = ConsolidatedResult::new();

    for (base, result) in results {
        let document = match result {
            Ok(document) => document,
            Err(e) => {
                tracing::error!(document = %base, "merge failed: {}", e);
                summary.record_failure(&base, e.to_string());
                continue;
            }
        };

        let path = merged_path(&batch.output_dir, &base);
        if let Err(e) = write_json(&path, &document, batch.pretty_output).await {
            tracing::error!(document = %base, "write failed: {:#}", e);
            summary.record_failure(&base, format!("{e:#}"));
            continue;
        }

        tracing::info!(
            document = %base,
            entities = document.entities().len(),
            relations = document.validated_relations().len(),
            "merged"
        );
        summary.record_success(&base, &document);
        consolidated.insert(document);
    }

    write_json(
        &batch.output_dir.join(CONSOLIDATED_FILE),
        &consolidated,
        batch.pretty_output,
    )
    .await?;

    let summary = summary.finish();
    write_json(&batch.output_dir.join(SUMMARY_FILE), &summary, batch.pretty_output).await?;

    tracing::info!(
        succeeded = summary.processed_successfully,
        failed = summary.failed,
        "merge complete"
    );
    Ok(summary)
}

async fn merge_one(
    path: PathBuf,
    batch: &BatchConfig,
    merger: &dyn DocumentMerger,
) -> (String, ctix_core::Result<MergedDocument>) {
    let base = base_name(&path);
    let result = match load_document(&path, batch).await {
        Ok(sources) => merger.merge(&sources),
        Err(e) => Err(e),
    };
    (base, result)
}

// ============================================================================
// consolidate
// ============================================================================

/// Rebuild the consolidated file from existing merged outputs
pub async fn run_consolidate(output_dir: &Path, pretty: bool) -> anyhow::Result<ConsolidatedResult> {
    let mut entries = tokio::fs::read_dir(output_dir)
        .await
        .with_context(|| format!("reading {}", output_dir.display()))?;

    let mut paths = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_merged = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(MERGED_SUFFIX));
        if is_merged {
            paths.push(path);
        }
    }
    paths.sort();

    let mut documents = Vec::new();
    for path in paths {
        match read_merged(&path).await {
            Ok(document) => documents.push(document),
            Err(e) => tracing::warn!(path = %path.display(), "skipping: {:#}", e),
        }
    }

    let consolidated = ConsolidatedResult::from_documents(documents);
    write_json(&output_dir.join(CONSOLIDATED_FILE), &consolidated, pretty).await?;
    tracing::info!(documents = consolidated.len(), "consolidated");
    Ok(consolidated)
}

// ============================================================================
// inspect
// ============================================================================

/// Summary report of one merged output
pub async fn run_inspect(path: &Path) -> anyhow::Result<String> {
    let document = read_merged(path).await?;
    Ok(inspect_report(&document))
}

pub fn inspect_report(document: &MergedDocument) -> String {
    let entities = document.entity_summary();
    let relations = document.relation_summary();

    let mut lines = vec![
        format!("Document: {}", document.document_name()),
        format!(
            "Relation file: {}",
            document.metadata().source_files.relationship_extraction
        ),
        format!(
            "Entities: {} unique from {} mentions",
            entities.unique_entity_texts, entities.total_mentions
        ),
        format!(
            "Relations: {} validated, {} rejected, {} duplicates dropped ({} candidates)",
            relations.total_relations,
            relations.rejected_relations,
            relations.duplicates_dropped,
            relations.candidate_count
        ),
    ];

    for (reason, count) in &relations.rejection_reasons {
        lines.push(format!("  {reason}: {count}"));
    }
    lines.push(format!(
        "Validation rate: {:.1}%, entity coverage: {:.1}%",
        relations.validation_rate() * 100.0,
        entities.coverage() * 100.0
    ));

    let needing = document.entities_needing_relations();
    lines.push(format!("Needing relation extraction: {}", needing.len()));
    lines.extend(needing.iter().map(|key| format!("  - {key}")));

    let unresolved = document.unresolved_entity_texts();
    if !unresolved.is_empty() {
        lines.push(format!("Unresolved relation texts: {}", unresolved.len()));
        lines.extend(unresolved.iter().map(|text| format!("  - {text}")));
    }

    lines.join("\n")
}

// ============================================================================
// I/O helpers
// ============================================================================

async fn read_merged(path: &Path) -> anyhow::Result<MergedDocument> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("parsing {}", path.display()))
}

async fn write_json<T: Serialize>(path: &Path, value: &T, pretty: bool) -> anyhow::Result<()> {
    let bytes = if pretty {
        serde_json::to_vec_pretty(value)?
    } else {
        serde_json::to_vec(value)?
    };
    tokio::fs::write(path, bytes)
        .await
        .with_context(|| format!("writing {}", path.display()))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn write(path: &Path, value: serde_json::Value) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, serde_json::to_vec(&value).unwrap()).unwrap();
    }

    fn setup(root: &Path) -> AppConfig {
        let mut config = AppConfig::default();
        config.batch.results_dir = root.join("results");
        config.batch.relationship_dir = root.join("relationship");
        config.batch.output_dir = root.join("merged_final");
        config.batch.concurrency = 2;

        write(
            &root.join("results/merged/andariel.txt.json"),
            json!({
                "file": "andariel.txt",
                "entities": {"intrusion_sets": ["Andariel"], "tools": ["Tasklist"], "campaigns": ["Operation Black Mine"]}
            }),
        );
        write(
            &root.join("relationship/andariel_results.json"),
            json!({
                "document_name": "andariel",
                "total_sentences": 1,
                "sentences": [{"sentence_id": 1, "text": "Andariel uses Tasklist.", "relations": [
                    {"head": "Andariel", "head_type": "HackOrg", "relation": "uses", "tail": "Tasklist", "tail_type": "Tool"},
                    {"head": "APT28 has", "head_type": "HackOrg", "relation": "uses", "tail": "XAgent", "tail_type": "Tool"}
                ]}]
            }),
        );
        write(
            &root.join("results/merged/solo.txt.json"),
            json!({"file": "solo.txt", "entities": {"malware": ["XAgent"]}}),
        );
        std::fs::write(root.join("results/merged/broken.txt.json"), b"{").unwrap();

        config
    }

    #[tokio::test]
    async fn test_merge_writes_outputs_and_summary() {
        let dir = TempDir::new().unwrap();
        let config = setup(dir.path());

        let summary = run_merge(&config).await.unwrap();

        assert_eq!(summary.total_documents, 3);
        assert_eq!(summary.processed_successfully, 2);
        assert_eq!(summary.failed, 1);
        let names: Vec<_> = summary.documents.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["andariel", "broken", "solo"]);

        let out = &config.batch.output_dir;
        assert!(out.join("andariel_merged.json").exists());
        assert!(out.join("solo_merged.json").exists());
        assert!(!out.join("broken_merged.json").exists());

        let summary_json: serde_json::Value =
            serde_json::from_slice(&std::fs::read(out.join(SUMMARY_FILE)).unwrap()).unwrap();
        assert_eq!(summary_json["processedSuccessfully"], 2);

        let consolidated: serde_json::Value =
            serde_json::from_slice(&std::fs::read(out.join(CONSOLIDATED_FILE)).unwrap()).unwrap();
        assert_eq!(consolidated["metadata"]["totalDocuments"], 2);
        assert_eq!(
            consolidated["documents"]["solo.txt"]["metadata"]["sourceFiles"]["relationshipExtraction"],
            "MISSING"
        );

        let andariel = &consolidated["documents"]["andariel.txt"];
        assert_eq!(andariel["relationships"]["summary"]["totalRelations"], 1);
        assert_eq!(
            andariel["relationships"]["entitiesNeedingRelationshipExtraction"],
            json!(["operation black mine"])
        );
    }

    #[tokio::test]
    async fn test_merge_output_is_stable_across_runs() {
        let dir = TempDir::new().unwrap();
        let config = setup(dir.path());
        let out = config.batch.output_dir.join("andariel_merged.json");

        run_merge(&config).await.unwrap();
        let first = std::fs::read(&out).unwrap();
        run_merge(&config).await.unwrap();
        let second = std::fs::read(&out).unwrap();

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_consolidate_rebuilds_from_outputs() {
        let dir = TempDir::new().unwrap();
        let config = setup(dir.path());
        run_merge(&config).await.unwrap();

        let out = &config.batch.output_dir;
        std::fs::remove_file(out.join(CONSOLIDATED_FILE)).unwrap();
        std::fs::write(out.join("junk_merged.json"), b"[]").unwrap();

        let consolidated = run_consolidate(out, false).await.unwrap();
        assert_eq!(consolidated.len(), 2);
        assert!(out.join(CONSOLIDATED_FILE).exists());
    }

    #[tokio::test]
    async fn test_inspect_reports_counts() {
        let dir = TempDir::new().unwrap();
        let config = setup(dir.path());
        run_merge(&config).await.unwrap();

        let report = run_inspect(&config.batch.output_dir.join("andariel_merged.json"))
            .await
            .unwrap();
        assert!(report.contains("Document: andariel.txt"));
        assert!(report.contains("1 validated, 1 rejected"));
        assert!(report.contains("  - operation black mine"));
        assert!(report.contains("  - XAgent"));
    }

    #[tokio::test]
    async fn test_missing_results_dir_is_fatal() {
        let dir = TempDir::new().unwrap();
        let mut config = AppConfig::default();
        config.batch.results_dir = dir.path().join("absent");
        config.batch.output_dir = dir.path().join("out");

        assert!(run_merge(&config).await.is_err());
    }
}
