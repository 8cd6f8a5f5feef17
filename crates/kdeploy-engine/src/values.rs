//! Values override files
//!
//! Overrides arrive as raw YAML strings. They are checked for well-formed
//! YAML, written next to the manifests under indexed names and handed to the
//! rendering tool as `-f <file>` pairs.

use std::path::Path;

use kdeploy_core::CoreError;

use crate::error::Result;

/// Reject content that is not well-formed YAML
pub fn validate_values_file_contents(content: &str) -> Result<()> {
    serde_yaml::from_str::<serde_yaml::Value>(content).map_err(|e| CoreError::InvalidValues {
        reason: e.to_string(),
    })?;
    Ok(())
}

/// Write each override as `<prefix>-N.yaml` in `directory`, returning the file names
pub fn write_indexed_files(directory: &Path, prefix: &str, contents: &[String]) -> Result<Vec<String>> {
    let mut names = Vec::with_capacity(contents.len());
    for (index, content) in contents.iter().enumerate() {
        validate_values_file_contents(content)?;
        let name = format!("{prefix}-{index}.yaml");
        std::fs::write(directory.join(&name), content)?;
        names.push(name);
    }
    Ok(names)
}

/// Write `values-N.yaml` files and return the matching `-f` arguments
pub fn write_values_to_file(directory: &Path, values: &[String]) -> Result<Vec<String>> {
    let names = write_indexed_files(directory, "values", values)?;
    tracing::debug!(files = ?names, "wrote values files");
    Ok(names
        .into_iter()
        .flat_map(|name| ["-f".to_string(), name])
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;

    #[test]
    fn test_write_values_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let args = write_values_to_file(
            dir.path(),
            &["replicas: 2\n".to_string(), "image: nginx\n".to_string()],
        )
        .unwrap();

        assert_eq!(args, vec!["-f", "values-0.yaml", "-f", "values-1.yaml"]);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("values-1.yaml")).unwrap(),
            "image: nginx\n"
        );
    }

    #[test]
    fn test_no_values_no_args() {
        let dir = tempfile::tempdir().unwrap();
        assert!(write_values_to_file(dir.path(), &[]).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = write_values_to_file(dir.path(), &["key: [unclosed\n".to_string()]).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Core(CoreError::InvalidValues { .. })
        ));
        assert!(!dir.path().join("values-0.yaml").exists());
    }
}
