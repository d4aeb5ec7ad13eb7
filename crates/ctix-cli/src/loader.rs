//! Batch input discovery and loading
//!
//! Layout: `<results>/merged/<base>.txt.json` is the required entity
//! extraction result of a document; its `provenance` block points at the
//! per-channel files under `<results>/{ioc,kb,novel,attack_ttp}/`; the relation
//! result lives at `<relationship>/<base>_results.json`.

use std::path::{Path, PathBuf};

use ctix_core::{BatchConfig, CtixError, Result};
use ctix_reconcile::input::{
    parse_optional, parse_required, EntityExtraction, SourceFiles, MALFORMED_FILE, MISSING_FILE,
};
use ctix_reconcile::DocumentSources;
use serde::de::DeserializeOwned;

const ENTITY_SUFFIX: &str = ".txt.json";
const RELATION_SUFFIX: &str = "_results.json";

/// Per-channel result directory names
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Ioc,
    Kb,
    Novel,
    Ttp,
}

impl Channel {
    pub fn dir_name(&self) -> &'static str {
        match self {
            Self::Ioc => "ioc",
            Self::Kb => "kb",
            Self::Novel => "novel",
            Self::Ttp => "attack_ttp",
        }
    }

    /// File name suffixes tried after `<base>` when provenance is missing
    pub fn file_suffixes(&self) -> &'static [&'static str] {
        match self {
            Self::Ttp => &[".txt.ttps.json", ".txt.txt.json", ENTITY_SUFFIX],
            _ => &[ENTITY_SUFFIX, ".txt.txt.json"],
        }
    }
}

/// Outcome of reading an optional input file
enum OptionalFile<T> {
    Absent,
    Malformed,
    Loaded(T),
}

/// Entity extraction files of a batch, sorted by path
pub async fn discover(results_dir: &Path) -> Result<Vec<PathBuf>> {
    let merged_dir = results_dir.join("merged");
    let mut entries = tokio::fs::read_dir(&merged_dir)
        .await
        .map_err(|e| io_error(&merged_dir, e))?;

    let mut files = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| io_error(&merged_dir, e))?
    {
        let path = entry.path();
        let is_entity_file = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(ENTITY_SUFFIX));
        if is_entity_file {
            files.push(path);
        }
    }

    files.sort();
    Ok(files)
}

/// `reports/apt28.txt.json` -> `apt28`
pub fn base_name(path: &Path) -> String {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    file_name
        .strip_suffix(ENTITY_SUFFIX)
        .or_else(|| file_name.strip_suffix(".json"))
        .unwrap_or(file_name)
        .to_string()
}

/// Load everything known about one document
///
/// Only the entity extraction result is required. Optional files that are
/// missing or malformed are treated as absent.
pub async fn load_document(entity_file: &Path, config: &BatchConfig) -> Result<DocumentSources> {
    let base = base_name(entity_file);

    let bytes = tokio::fs::read(entity_file)
        .await
        .map_err(|e| CtixError::malformed(&base, format!("cannot read entity extraction: {e}")))?;
    let extraction: EntityExtraction = parse_required(&base, "entity extraction", &bytes)?;

    let provenance = extraction.provenance.clone();
    let results_dir = config.results_dir.as_path();

    let mut sources = DocumentSources::new(base.clone());

    let ioc_file = provenance.ioc_file.as_deref();
    let ioc_path = resolve_channel_path(results_dir, Channel::Ioc, ioc_file, &base).await;
    if let Some(indicators) = load_optional(&base, "ioc file", ioc_path).await {
        sources = sources.with_indicators(indicators);
    }

    let kb_file = provenance.kb_file.as_deref();
    let kb_path = resolve_channel_path(results_dir, Channel::Kb, kb_file, &base).await;
    if let Some(kb) = load_optional(&base, "kb file", kb_path).await {
        sources = sources.with_knowledge_base(kb);
    }

    let novel_file = provenance.novel_file.as_deref();
    let novel_path = resolve_channel_path(results_dir, Channel::Novel, novel_file, &base).await;
    if let Some(novel) = load_optional(&base, "novel file", novel_path).await {
        sources = sources.with_novel(novel);
    }

    let ttp_file = provenance.ttp_file.as_deref();
    let ttp_path = resolve_channel_path(results_dir, Channel::Ttp, ttp_file, &base).await;
    if let Some(techniques) = load_optional(&base, "ttp file", ttp_path).await {
        sources = sources.with_techniques(techniques);
    }

    let relation_path = config.relationship_dir.join(format!("{base}{RELATION_SUFFIX}"));
    let relations = read_optional(&base, "relation file", &relation_path).await;
    let relationship_extraction = match relations {
        OptionalFile::Loaded(relations) => {
            sources = sources.with_relations(relations);
            file_name_of(&relation_path)
        }
        OptionalFile::Malformed => {
            tracing::warn!(
                document = %base,
                path = %relation_path.display(),
                "relation file is malformed, merging entities only"
            );
            MALFORMED_FILE.to_string()
        }
        OptionalFile::Absent => {
            tracing::warn!(document = %base, "relation file not found, merging entities only");
            MISSING_FILE.to_string()
        }
    };

    sources.source_files = SourceFiles {
        entity_extraction: file_name_of(entity_file),
        relationship_extraction,
    };

    Ok(sources.with_entity_extraction(extraction))
}

/// Locate a per-channel file
///
/// Tries the recorded path as-is, then the part after `results/` under the
/// configured results directory, then `<channel>/<file name>`, and finally
/// `<channel>/<base><suffix>` for each of the channel's file suffixes.
pub async fn resolve_channel_path(
    results_dir: &Path,
    channel: Channel,
    recorded: Option<&str>,
    base: &str,
) -> Option<PathBuf> {
    let channel_dir = results_dir.join(channel.dir_name());
    let mut candidates = Vec::new();

    if let Some(recorded) = recorded.map(str::trim).filter(|r| !r.is_empty()) {
        let normalized = recorded.replace('\\', "/");
        candidates.push(PathBuf::from(&normalized));
        if let Some(idx) = normalized.find("results/") {
            candidates.push(results_dir.join(&normalized[idx + "results/".len()..]));
        }
        if let Some(file_name) = Path::new(&normalized).file_name() {
            candidates.push(channel_dir.join(file_name));
        }
    }
    candidates.extend(
        channel
            .file_suffixes()
            .iter()
            .map(|suffix| channel_dir.join(format!("{base}{suffix}"))),
    );

    for candidate in candidates {
        if tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
            return Some(candidate);
        }
    }
    None
}

async fn load_optional<T: DeserializeOwned>(
    document: &str,
    what: &str,
    path: Option<PathBuf>,
) -> Option<T> {
    match read_optional(document, what, &path?).await {
        OptionalFile::Loaded(value) => Some(value),
        OptionalFile::Absent | OptionalFile::Malformed => None,
    }
}

async fn read_optional<T: DeserializeOwned>(
    document: &str,
    what: &str,
    path: &Path,
) -> OptionalFile<T> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::debug!(document, path = %path.display(), "skipping {}: {}", what, e);
            return OptionalFile::Absent;
        }
    };
    match parse_optional(document, what, &bytes) {
        Some(value) => OptionalFile::Loaded(value),
        None => OptionalFile::Malformed,
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn io_error(path: &Path, source: std::io::Error) -> CtixError {
    CtixError::Io {
        path: path.to_path_buf(),
        source,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn write_json(path: &Path, value: serde_json::Value) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, serde_json::to_vec(&value).unwrap()).unwrap();
    }

    fn batch_config(root: &Path) -> BatchConfig {
        BatchConfig {
            results_dir: root.join("results"),
            relationship_dir: root.join("relationship"),
            output_dir: root.join("out"),
            ..Default::default()
        }
    }

    #[test]
    fn test_base_name_strips_suffix() {
        assert_eq!(base_name(Path::new("results/merged/apt28.txt.json")), "apt28");
        assert_eq!(base_name(Path::new("report.json")), "report");
    }

    #[tokio::test]
    async fn test_discover_only_entity_files() {
        let dir = TempDir::new().unwrap();
        let merged = dir.path().join("merged");
        write_json(&merged.join("b.txt.json"), json!({}));
        write_json(&merged.join("a.txt.json"), json!({}));
        write_json(&merged.join("notes.json"), json!({}));

        let files = discover(dir.path()).await.unwrap();
        let names: Vec<String> = files.iter().map(|p| base_name(p)).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_discover_missing_dir_is_io_error() {
        let dir = TempDir::new().unwrap();
        let err = discover(&dir.path().join("nope")).await.unwrap_err();
        assert!(matches!(err, CtixError::Io { .. }));
    }

    #[tokio::test]
    async fn test_load_document_with_all_channels() {
        let dir = TempDir::new().unwrap();
        let config = batch_config(dir.path());
        let results = &config.results_dir;

        write_json(
            &results.join("merged/apt28.txt.json"),
            json!({
                "file": "apt28.txt",
                "entities": {"intrusion_sets": ["APT28"]},
                "provenance": {
                    "ioc_file": "/home/someone/project/results/ioc/apt28.txt.json",
                    "kb_file": "elsewhere/kb_apt28.json"
                }
            }),
        );
        write_json(
            &results.join("ioc/apt28.txt.json"),
            json!({"iocs": {"domains": ["Evil.COM"]}}),
        );
        write_json(
            &results.join("kb/kb_apt28.json"),
            json!({"kb_matches": {"matches": [{"text": "APT28", "type": "intrusion-set"}]}}),
        );
        write_json(
            &results.join("novel/apt28.txt.json"),
            json!({"novel": [{"text": "XAgent", "type": "malware"}]}),
        );
        std::fs::create_dir_all(results.join("attack_ttp")).unwrap();
        std::fs::write(results.join("attack_ttp/apt28.txt.ttps.json"), b"{ broken").unwrap();
        write_json(
            &config.relationship_dir.join("apt28_results.json"),
            json!({"sentences": [{"sentence_id": 1, "text": "APT28 uses XAgent.", "relations": [
                {"head": "APT28", "relation": "uses", "tail": "XAgent"}
            ]}]}),
        );

        let sources = load_document(&results.join("merged/apt28.txt.json"), &config)
            .await
            .unwrap();

        assert_eq!(sources.document_name, "apt28");
        assert!(sources.indicators.is_some());
        assert!(sources.knowledge_base.is_some());
        assert!(sources.novel.is_some());
        assert!(sources.techniques.is_none());
        assert!(sources.relations.is_some());
        assert_eq!(sources.source_files.entity_extraction, "apt28.txt.json");
        assert_eq!(sources.source_files.relationship_extraction, "apt28_results.json");
    }

    #[tokio::test]
    async fn test_missing_relation_file_is_recorded() {
        let dir = TempDir::new().unwrap();
        let config = batch_config(dir.path());
        let path = config.results_dir.join("merged/solo.txt.json");
        write_json(&path, json!({"file": "solo.txt", "entities": {}}));

        let sources = load_document(&path, &config).await.unwrap();
        assert!(sources.relations.is_none());
        assert_eq!(sources.source_files.relationship_extraction, MISSING_FILE);
    }

    #[tokio::test]
    async fn test_malformed_relation_file_is_not_missing() {
        let dir = TempDir::new().unwrap();
        let config = batch_config(dir.path());
        let path = config.results_dir.join("merged/andariel.txt.json");
        write_json(
            &path,
            json!({"file": "andariel.txt", "entities": {"intrusion_sets": ["Andariel"]}}),
        );
        let relation_path = config.relationship_dir.join("andariel_results.json");
        std::fs::create_dir_all(&config.relationship_dir).unwrap();
        std::fs::write(&relation_path, b"{\"sentences\": [").unwrap();

        let sources = load_document(&path, &config).await.unwrap();
        assert!(sources.relations.is_none());
        assert_eq!(sources.source_files.relationship_extraction, MALFORMED_FILE);
    }

    #[tokio::test]
    async fn test_relation_file_with_null_sentence_fields_loads() {
        let dir = TempDir::new().unwrap();
        let config = batch_config(dir.path());
        let path = config.results_dir.join("merged/andariel.txt.json");
        write_json(
            &path,
            json!({"file": "andariel.txt", "entities": {"intrusion_sets": ["Andariel"], "tools": ["Tasklist"]}}),
        );
        write_json(
            &config.relationship_dir.join("andariel_results.json"),
            json!({"sentences": [
                {"sentence_id": 1, "text": "Andariel uses Tasklist.", "relations": [
                    {"head": "Andariel", "relation": "uses", "tail": "Tasklist"}
                ]},
                {"sentence_id": 2, "text": null}
            ]}),
        );

        let sources = load_document(&path, &config).await.unwrap();
        assert_eq!(sources.source_files.relationship_extraction, "andariel_results.json");
        assert_eq!(sources.relation_candidates().len(), 1);
    }

    #[tokio::test]
    async fn test_technique_file_found_by_original_names() {
        let dir = TempDir::new().unwrap();
        let results = dir.path().join("results");
        write_json(&results.join("attack_ttp/apt28.txt.txt.json"), json!({}));

        let found = resolve_channel_path(&results, Channel::Ttp, None, "apt28").await;
        assert_eq!(found, Some(results.join("attack_ttp/apt28.txt.txt.json")));

        write_json(&results.join("attack_ttp/apt28.txt.ttps.json"), json!({}));
        let found = resolve_channel_path(&results, Channel::Ttp, None, "apt28").await;
        assert_eq!(found, Some(results.join("attack_ttp/apt28.txt.ttps.json")));

        assert!(resolve_channel_path(&results, Channel::Kb, None, "apt28").await.is_none());
    }

    #[tokio::test]
    async fn test_malformed_entity_file_fails() {
        let dir = TempDir::new().unwrap();
        let config = batch_config(dir.path());
        let path = config.results_dir.join("merged/bad.txt.json");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"not json").unwrap();

        let err = load_document(&path, &config).await.unwrap_err();
        assert!(matches!(err, CtixError::InputMalformed { ref document, .. } if document == "bad"));
    }
}
