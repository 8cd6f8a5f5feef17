use std::path::{Path, PathBuf};

use async_trait::async_trait;
use kdeploy_core::{CommandLine, ExecutionLog, FileData};
use serde_yaml::{Mapping, Value};

use super::{RENDERED_MANIFEST_FILE, RenderContext, Renderer};
use crate::error::{EngineError, Result};
use crate::values::write_indexed_files;

const KUSTOMIZATION_YAML: &str = "kustomization.yaml";
const KUSTOMIZATION_YML: &str = "kustomization.yml";
const PATCHES_DIR_PREFIX: &str = "kustomizePatches-";
const PATCH_FIELD: &str = "patchesStrategicMerge";

/// `kustomize build` over a kustomization directory
#[derive(Debug, Clone)]
pub struct KustomizeRenderer {
    /// Relative to the manifest directory; empty means the directory itself
    pub kustomize_dir_path: String,
    /// Exported as `XDG_CONFIG_HOME` and enables alpha plugins
    pub plugin_path: Option<String>,
}

impl KustomizeRenderer {
    fn kustomize_dir(&self, manifest_dir: &Path) -> PathBuf {
        match self.kustomize_dir_path.trim() {
            "" | "." => manifest_dir.to_path_buf(),
            dir => manifest_dir.join(dir),
        }
    }
}

fn kustomization_file(dir: &Path) -> Option<PathBuf> {
    [KUSTOMIZATION_YML, KUSTOMIZATION_YAML]
        .into_iter()
        .map(|name| dir.join(name))
        .find(|path| path.exists())
}

/// Write patch overrides into a fresh `kustomizePatches-XXXX` directory and
/// append them to `patchesStrategicMerge` of the kustomization file
///
/// Returns the patch paths as added to the kustomization, relative to it.
pub fn save_patches_to_directory(
    kustomize_dir: &Path,
    patches: &[String],
    log: &dyn ExecutionLog,
) -> Result<Vec<String>> {
    log.info("\nUpdating patchesStrategicMerge in Kustomization Yaml :\n");

    if patches.is_empty() {
        log.info("\nNo Patches files found. Skipping kustomization.yaml updation\n");
        return Ok(Vec::new());
    }

    let kustomization = kustomization_file(kustomize_dir).ok_or_else(|| {
        EngineError::KustomizationNotFound {
            path: kustomize_dir.display().to_string(),
        }
    })?;

    let patches_dir = tempfile::Builder::new()
        .prefix(PATCHES_DIR_PREFIX)
        .rand_bytes(4)
        .tempdir_in(kustomize_dir)?
        .keep();
    let dir_name = patches_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let added: Vec<String> = write_indexed_files(&patches_dir, "patches", patches)?
        .into_iter()
        .map(|file| format!("{dir_name}/{file}"))
        .collect();

    let content = std::fs::read_to_string(&kustomization)?;
    let mut document: Value = serde_yaml::from_str(&content)?;
    if document.is_null() {
        log.warn(&format!("File is Empty in the path {}", kustomization.display()));
        document = Value::Mapping(Mapping::new());
    }
    let Some(root) = document.as_mapping_mut() else {
        return Err(EngineError::KustomizationNotFound {
            path: kustomize_dir.display().to_string(),
        });
    };

    let field = root
        .entry(Value::from(PATCH_FIELD))
        .or_insert_with(|| Value::Sequence(Vec::new()));
    if let Value::Sequence(list) = field {
        list.extend(added.iter().map(|p| Value::from(p.as_str())));
    }

    let mut summary = Mapping::new();
    summary.insert(Value::from(PATCH_FIELD), root[PATCH_FIELD].clone());
    log.info("PatchesStrategicMerge Field in Kustomization Yaml after update :\n");
    log.info(&serde_yaml::to_string(&summary)?);

    std::fs::write(&kustomization, serde_yaml::to_string(&document)?)?;
    Ok(added)
}

#[async_trait]
impl Renderer for KustomizeRenderer {
    async fn render(&self, ctx: &RenderContext<'_>) -> Result<Vec<FileData>> {
        let kustomize_dir = self.kustomize_dir(ctx.manifest_dir);

        if ctx.tools.use_var_support_for_kustomize {
            save_patches_to_directory(&kustomize_dir, ctx.overrides, ctx.log)?;
        }

        let mut command = CommandLine::new(&ctx.tools.kustomize)
            .arg("build")
            .arg(kustomize_dir.display().to_string())
            .current_dir(ctx.manifest_dir);

        let plugin_path = self
            .plugin_path
            .clone()
            .or_else(|| {
                ctx.tools
                    .kustomize_plugin_path
                    .as_ref()
                    .map(|p| p.display().to_string())
            })
            .filter(|p| !p.trim().is_empty());
        if let Some(plugin_path) = plugin_path {
            command = command
                .arg("--enable_alpha_plugins")
                .env("XDG_CONFIG_HOME", plugin_path);
        }

        ctx.log.info("Rendering manifest files using kustomize");
        ctx.log.info(&command.printable());

        let content = ctx.run(command, "Failed to build kustomization.").await?;
        Ok(vec![FileData::new(RENDERED_MANIFEST_FILE, content)])
    }
}
