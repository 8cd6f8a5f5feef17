use async_trait::async_trait;
use kdeploy_core::manifest::{delete_skipped_manifest_files, read_manifest_files_from_directory};
use kdeploy_core::{CommandLine, FileData};

use super::{RenderContext, Renderer};
use crate::error::Result;
use crate::values::write_values_to_file;

/// Placeholder go-template emits for missing values
pub const VALUE_MISSING_REPLACEMENT: &str = "<no value>";

const TEMPLATE_FILE: &str = "template.yaml";

/// Plain manifests, optionally templated with values files
#[derive(Debug, Clone, Copy, Default)]
pub struct GoTemplateRenderer;

#[async_trait]
impl Renderer for GoTemplateRenderer {
    async fn render(&self, ctx: &RenderContext<'_>) -> Result<Vec<FileData>> {
        delete_skipped_manifest_files(ctx.manifest_dir, ctx.log)?;
        let manifest_files = read_manifest_files_from_directory(ctx.manifest_dir)?;

        if ctx.overrides.is_empty() {
            ctx.log
                .info("No values.yaml file found. Skipping template rendering.");
            return Ok(manifest_files);
        }

        let values_args = write_values_to_file(ctx.working_dir, ctx.overrides).inspect_err(|e| {
            ctx.log.error(&e.to_string());
        })?;

        ctx.log.info("\nRendering manifest files using go template");
        ctx.log
            .info("Only manifest files with [.yaml] or [.yml] extension will be processed");

        let mut rendered = Vec::with_capacity(manifest_files.len());
        for file in manifest_files {
            std::fs::write(ctx.working_dir.join(TEMPLATE_FILE), &file.content)?;

            let command = CommandLine::new(&ctx.tools.go_template)
                .args(["-t", TEMPLATE_FILE])
                .args(values_args.iter().cloned())
                .current_dir(ctx.working_dir);
            let failure = format!("Failed to render template for {}.", file.file_path);
            let content = ctx.run(command, &failure).await?;

            if content.contains(VALUE_MISSING_REPLACEMENT) {
                tracing::debug!(file = %file.file_path, "rendered template has missing values");
                ctx.log.warn(&format!(
                    "Rendered template is missing values (replaced with {VALUE_MISSING_REPLACEMENT})!"
                ));
            }
            rendered.push(FileData::new(file.file_path, content));
        }

        Ok(rendered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::render::test_support::Fixture;
    use kdeploy_core::{LogLevel, ProcessOutput};

    #[tokio::test]
    async fn test_no_values_returns_files_unchanged() {
        let fx = Fixture::new();
        fx.write("app.yaml", "kind: Service\nmetadata:\n  name: svc\n");
        fx.write("values.yaml", "replicas: 1\n");
        fx.write("skip.yaml", "# kdeploy:skip-file\nkind: Job\n");

        let files = GoTemplateRenderer.render(&fx.ctx()).await.unwrap();

        assert_eq!(files.len(), 1);
        assert_eq!(files[0].file_path, "app.yaml");
        assert!(fx.runner.invocations().is_empty());
        assert!(!fx.dir.path().join("skip.yaml").exists());
        assert_eq!(fx.log.lines_at(LogLevel::Warn), vec!["skip.yaml"]);
    }

    #[tokio::test]
    async fn test_renders_each_file_with_values() {
        let mut fx = Fixture::new();
        fx.overrides = vec!["name: web\n".to_string()];
        fx.write("a.yaml", "kind: Service\n");
        fx.write("b.yaml", "kind: Deployment\n");
        fx.runner
            .respond("go-template", ProcessOutput::success("kind: Rendered\n"));

        let files = GoTemplateRenderer.render(&fx.ctx()).await.unwrap();

        assert_eq!(files.len(), 2);
        assert_eq!(files[1].content, "kind: Rendered\n");
        insta::assert_snapshot!(
            fx.runner.printed_invocations()[0],
            @"go-template -t template.yaml -f values-0.yaml"
        );
        assert!(fx.work.path().join("values-0.yaml").exists());
    }

    #[tokio::test]
    async fn test_missing_values_warns() {
        let mut fx = Fixture::new();
        fx.overrides = vec!["{}".to_string()];
        fx.write("a.yaml", "image: {{ .image }}\n");
        fx.runner
            .respond("go-template", ProcessOutput::success("image: <no value>\n"));

        GoTemplateRenderer.render(&fx.ctx()).await.unwrap();

        assert_eq!(
            fx.log.lines_at(LogLevel::Warn),
            vec!["Rendered template is missing values (replaced with <no value>)!"]
        );
    }

    #[tokio::test]
    async fn test_render_failure_carries_output() {
        let mut fx = Fixture::new();
        fx.overrides = vec!["a: 1\n".to_string()];
        fx.write("a.yaml", "kind: Service\n");
        fx.runner.fail_on("go-template", 1, "template: bad action");

        let err = GoTemplateRenderer.render(&fx.ctx()).await.unwrap_err();

        match err {
            EngineError::RenderFailed { message, exit_code, .. } => {
                assert_eq!(message, "Failed to render template for a.yaml. Error template: bad action");
                assert_eq!(exit_code, 1);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(fx.log.contains("template: bad action"));
    }
}
