//! Manifest parsing and validation
//!
//! Rendered manifest files are split into YAML documents, parsed into
//! [`KubernetesResource`]s and sorted in creation order.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use tracing::debug;
use walkdir::WalkDir;

use crate::annotations::{SKIP_FILE_MARKER, kdeploy};
use crate::error::{CoreError, HintedError, Result};
use crate::kind;
use crate::log::ExecutionLog;
use crate::resource::{KubernetesResource, KubernetesResourceId};

/// Name of the values file that sits next to manifests and is never applied
const VALUES_FILE: &str = "values.yaml";

/// A file exchanged between the fetch, render and parse stages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileData {
    /// Path relative to the manifest directory
    pub file_path: String,
    pub content: String,
}

impl FileData {
    pub fn new(file_path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
            content: content.into(),
        }
    }

    fn file_name(&self) -> &str {
        Path::new(&self.file_path)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&self.file_path)
    }
}

/// `.yaml`/`.yml` files other than `values.yaml`
pub fn is_valid_manifest_file(file_path: &str) -> bool {
    let name = Path::new(file_path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(file_path);
    (name.ends_with(".yaml") || name.ends_with(".yml")) && name != VALUES_FILE
}

/// Split a multi-document YAML stream on `---` separator lines
pub fn split_documents(content: &str) -> Vec<String> {
    let mut documents = Vec::new();
    let mut current = String::new();

    for line in content.lines() {
        if line.trim_end() == "---" || line.starts_with("--- ") {
            if !current.trim().is_empty() {
                documents.push(std::mem::take(&mut current));
            }
            current.clear();
            continue;
        }
        current.push_str(line);
        current.push('\n');
    }

    if !current.trim().is_empty() {
        documents.push(current);
    }
    documents
}

/// Parse every document of one file; comment-only documents are skipped
fn parse_file(file: &FileData) -> std::result::Result<Vec<KubernetesResource>, CoreError> {
    let mut resources = Vec::new();
    for document in split_documents(&file.content) {
        let value: Value = serde_yaml::from_str(&document)?;
        if value.is_null() {
            continue;
        }
        resources.push(KubernetesResource::from_value(document, &value)?);
    }
    Ok(resources)
}

/// Parse rendered manifest files into resources sorted in creation order
///
/// Files that are not manifests (see [`is_valid_manifest_file`]) are ignored.
/// A malformed document fails the whole read with a hint naming the file.
pub fn read_manifests(files: &[FileData]) -> Result<Vec<KubernetesResource>> {
    let mut resources = Vec::new();

    for file in files.iter().filter(|f| is_valid_manifest_file(&f.file_path)) {
        let parsed = parse_file(file).map_err(|e| {
            let explanation = e.to_string();
            HintedError::new(
                format!("Error while reading manifest file [{}]", file.file_name()),
                format!(
                    "Check the manifest file [{}] for YAML syntax errors or missing kind/metadata.name",
                    file.file_path
                ),
                explanation,
            )
            .with_cause(e)
        })?;
        debug!(file = %file.file_path, count = parsed.len(), "parsed manifest file");
        resources.extend(parsed);
    }

    kind::sort_in_creation_order(&mut resources, |r| r.kind());
    Ok(resources)
}

/// Every managed workload must declare its steady-state condition
pub fn check_steady_state_condition(resources: &[KubernetesResource]) -> Result<()> {
    for resource in resources {
        if resource.steady_state_condition().is_none() {
            return Err(CoreError::InvalidArguments {
                argument: kdeploy::STEADY_STATE_CONDITION.to_string(),
                message: "Metadata annotation not provided.".to_string(),
            });
        }
    }
    Ok(())
}

/// Give every namespaced resource without a namespace the target namespace
pub fn set_namespace_if_required(
    resources: &mut [KubernetesResource],
    namespace: &str,
) -> Result<()> {
    for resource in resources.iter_mut().filter(|r| r.needs_namespace()) {
        resource.set_namespace(namespace)?;
    }
    Ok(())
}

/// Join the resources into a single multi-document manifest
pub fn resources_to_manifest(resources: &[KubernetesResource]) -> String {
    resources
        .iter()
        .map(|r| r.spec.trim_end().to_string())
        .collect::<Vec<_>>()
        .join("\n---\n")
        + "\n"
}

/// Kind/Name/Versioned table used in the execution log
pub fn resources_in_table_format(resources: &[KubernetesResource]) -> String {
    let kind_width = resources
        .iter()
        .map(|r| r.kind().len())
        .max()
        .unwrap_or(0)
        .max("Kind".len())
        + 4;
    let name_width = resources
        .iter()
        .map(|r| r.name().len())
        .max()
        .unwrap_or(0)
        .max("Name".len())
        + 4;

    let mut out = format!(
        "\n{:<kind_width$}{:<name_width$}{}\n",
        "Kind", "Name", "Versioned"
    );
    for resource in resources {
        out.push_str(&format!(
            "{:<kind_width$}{:<name_width$}{}\n",
            resource.kind(),
            resource.name(),
            resource.resource_id.versioned
        ));
    }
    out
}

/// One `- namespace/kind/name` line per id
pub fn resource_ids_in_string_format(ids: &[KubernetesResourceId]) -> String {
    ids.iter()
        .map(|id| format!("- {}", id.identifier()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Read every manifest file under a directory, with paths relative to it
pub fn read_manifest_files_from_directory(directory: &Path) -> Result<Vec<FileData>> {
    let mut files = Vec::new();

    for entry in WalkDir::new(directory).sort_by_file_name() {
        let entry = entry.map_err(|e| CoreError::Io(std::io::Error::other(e.to_string())))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(directory)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");
        if !is_valid_manifest_file(&relative) {
            continue;
        }
        let content = std::fs::read_to_string(entry.path())?;
        files.push(FileData::new(relative, content));
    }

    Ok(files)
}

/// Delete manifest files whose first line carries the skip marker
///
/// Returns the relative paths that were removed.
pub fn delete_skipped_manifest_files(
    directory: &Path,
    log: &dyn ExecutionLog,
) -> Result<Vec<String>> {
    let skipped: Vec<String> = read_manifest_files_from_directory(directory)?
        .into_iter()
        .filter(|f| {
            f.content
                .lines()
                .next()
                .map(|first| first.contains(SKIP_FILE_MARKER))
                .unwrap_or(false)
        })
        .map(|f| f.file_path)
        .collect();

    if !skipped.is_empty() {
        log.info("Following manifest files are skipped for applying");
        for file in &skipped {
            log.warn(file);
            std::fs::remove_file(directory.join(file))?;
        }
        log.info("");
    }

    Ok(skipped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::MemoryLog;

    fn deployment(name: &str) -> String {
        format!("apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: {name}\n")
    }

    #[test]
    fn test_is_valid_manifest_file() {
        assert!(is_valid_manifest_file("deploy.yaml"));
        assert!(is_valid_manifest_file("templates/svc.yml"));
        assert!(!is_valid_manifest_file("values.yaml"));
        assert!(!is_valid_manifest_file("nested/values.yaml"));
        assert!(!is_valid_manifest_file("README.md"));
    }

    #[test]
    fn test_split_documents() {
        let content = "---\nkind: A\n---\n# comment only\n---\nkind: B\n";
        let docs = split_documents(content);
        assert_eq!(docs.len(), 3);
        assert_eq!(docs[0], "kind: A\n");
        assert_eq!(docs[2], "kind: B\n");
    }

    #[test]
    fn test_read_manifests_sorts_and_filters() {
        let files = vec![
            FileData::new("deploy.yaml", deployment("web")),
            FileData::new(
                "config.yaml",
                "kind: ConfigMap\nmetadata:\n  name: cfg\n---\nkind: Namespace\nmetadata:\n  name: ns\n",
            ),
            FileData::new("values.yaml", "replicas: 3\n"),
            FileData::new("notes.txt", "not yaml at all: ["),
        ];

        let resources = read_manifests(&files).unwrap();
        let kinds: Vec<_> = resources.iter().map(|r| r.kind()).collect();
        assert_eq!(kinds, vec!["Namespace", "ConfigMap", "Deployment"]);
    }

    #[test]
    fn test_read_manifests_skips_comment_only_documents() {
        let files = vec![FileData::new(
            "a.yaml",
            "# nothing here\n---\nkind: Service\nmetadata:\n  name: svc\n",
        )];
        assert_eq!(read_manifests(&files).unwrap().len(), 1);
    }

    #[test]
    fn test_read_manifests_error_names_file() {
        let files = vec![FileData::new("broken.yaml", "kind: [unclosed\n")];
        let err = read_manifests(&files).unwrap_err();

        assert!(err.to_string().contains("broken.yaml"));
        assert!(err.hint().unwrap().contains("broken.yaml"));
        assert!(!err.explanation().unwrap().is_empty());
    }

    #[test]
    fn test_check_steady_state_condition() {
        let with = KubernetesResource::from_yaml(
            "kind: Foo\nmetadata:\n  name: a\n  annotations:\n    kdeploy.io/steadyStateCondition: ${response.ready}\n",
        )
        .unwrap();
        let without = KubernetesResource::from_yaml("kind: Foo\nmetadata:\n  name: b\n").unwrap();

        assert!(check_steady_state_condition(std::slice::from_ref(&with)).is_ok());
        let err = check_steady_state_condition(&[with, without]).unwrap_err();
        assert!(matches!(err, CoreError::InvalidArguments { .. }));
    }

    #[test]
    fn test_set_namespace_if_required() {
        let mut resources = read_manifests(&[FileData::new(
            "a.yaml",
            "kind: Namespace\nmetadata:\n  name: ns\n---\nkind: Service\nmetadata:\n  name: svc\n---\nkind: Service\nmetadata:\n  name: other\n  namespace: keep\n",
        )])
        .unwrap();

        set_namespace_if_required(&mut resources, "target").unwrap();
        let namespaces: Vec<_> = resources.iter().map(|r| r.namespace()).collect();
        assert_eq!(namespaces, vec!["", "target", "keep"]);
    }

    #[test]
    fn test_resources_to_manifest() {
        let resources = read_manifests(&[FileData::new(
            "a.yaml",
            format!("{}---\n{}", deployment("a"), deployment("b")),
        )])
        .unwrap();
        let manifest = resources_to_manifest(&resources);
        assert_eq!(split_documents(&manifest).len(), 2);
        assert!(manifest.contains("\n---\n"));
    }

    #[test]
    fn test_resources_in_table_format() {
        let resources = read_manifests(&[FileData::new(
            "a.yaml",
            "kind: ConfigMap\nmetadata:\n  name: settings\n",
        )])
        .unwrap();
        let table = resources_in_table_format(&resources);
        insta::assert_snapshot!(table.trim(), @r"
        Kind         Name        Versioned
        ConfigMap    settings    true
        ");
    }

    #[test]
    fn test_read_and_skip_files_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("a.yaml"), deployment("a")).unwrap();
        std::fs::write(
            dir.path().join("nested/b.yml"),
            format!("{SKIP_FILE_MARKER}\n{}", deployment("b")),
        )
        .unwrap();
        std::fs::write(dir.path().join("values.yaml"), "x: 1\n").unwrap();

        let files = read_manifest_files_from_directory(dir.path()).unwrap();
        let paths: Vec<_> = files.iter().map(|f| f.file_path.as_str()).collect();
        assert_eq!(paths, vec!["a.yaml", "nested/b.yml"]);

        let log = MemoryLog::new();
        let skipped = delete_skipped_manifest_files(dir.path(), &log).unwrap();
        assert_eq!(skipped, vec!["nested/b.yml".to_string()]);
        assert!(!dir.path().join("nested/b.yml").exists());
        assert!(log.contains("skipped for applying"));
    }
}
