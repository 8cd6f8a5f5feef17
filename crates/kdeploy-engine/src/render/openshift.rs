use async_trait::async_trait;
use kdeploy_core::{CommandLine, FileData};
use serde_yaml::Value;

use super::{RENDERED_MANIFEST_FILE, RenderContext, Renderer};
use crate::error::Result;

/// `oc process` of an OpenShift template
#[derive(Debug, Clone)]
pub struct OpenshiftRenderer {
    /// Relative to the manifest directory
    pub template_path: String,
}

/// Split a `kind: List` document into one document per item
///
/// Anything else is returned unchanged.
pub fn flatten_list(output: &str) -> Result<String> {
    let value: Value = serde_yaml::from_str(output)?;
    let is_list = value.get("kind").and_then(Value::as_str) == Some("List");
    let Some(items) = value.get("items").and_then(Value::as_sequence).filter(|_| is_list) else {
        return Ok(output.to_string());
    };

    let documents = items
        .iter()
        .map(serde_yaml::to_string)
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(documents.join("---\n"))
}

#[async_trait]
impl Renderer for OpenshiftRenderer {
    async fn render(&self, ctx: &RenderContext<'_>) -> Result<Vec<FileData>> {
        let mut command = CommandLine::new(&ctx.tools.oc)
            .args(["process", "-f", self.template_path.as_str(), "--local", "-o", "yaml"])
            .current_dir(ctx.manifest_dir);

        for (index, params) in ctx.overrides.iter().enumerate() {
            let name = format!("params-{index}");
            std::fs::write(ctx.manifest_dir.join(&name), params)?;
            command = command.arg(format!("--param-file={name}"));
        }

        ctx.log.info("Processing OpenShift template");
        ctx.log.info(&command.printable());

        let output = ctx.run(command, "Failed to process template.").await?;
        let content = flatten_list(&output)?;
        Ok(vec![FileData::new(RENDERED_MANIFEST_FILE, content)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::test_support::Fixture;
    use kdeploy_core::ProcessOutput;
    use kdeploy_core::manifest::read_manifests;

    const LIST: &str = r#"apiVersion: v1
kind: List
items:
- apiVersion: v1
  kind: Service
  metadata:
    name: web
- apiVersion: apps.openshift.io/v1
  kind: DeploymentConfig
  metadata:
    name: web
"#;

    #[test]
    fn test_flatten_list() {
        let flattened = flatten_list(LIST).unwrap();
        let resources = read_manifests(&[FileData::new("manifest.yaml", flattened)]).unwrap();
        let kinds: Vec<_> = resources.iter().map(|r| r.kind()).collect();
        assert_eq!(kinds, vec!["Service", "DeploymentConfig"]);
    }

    #[test]
    fn test_flatten_non_list_unchanged() {
        let single = "kind: Service\nmetadata:\n  name: web\n";
        assert_eq!(flatten_list(single).unwrap(), single);
    }

    #[tokio::test]
    async fn test_process_with_param_files() {
        let mut fx = Fixture::new();
        fx.overrides = vec!["IMAGE=nginx\n".to_string(), "REPLICAS=2\n".to_string()];
        fx.runner.respond("oc process", ProcessOutput::success(LIST));

        let renderer = OpenshiftRenderer {
            template_path: "template.yaml".into(),
        };
        let files = renderer.render(&fx.ctx()).await.unwrap();

        assert_eq!(files.len(), 1);
        assert!(files[0].content.contains("DeploymentConfig"));
        insta::assert_snapshot!(
            fx.runner.printed_invocations()[0],
            @"oc process -f template.yaml --local -o yaml --param-file=params-0 --param-file=params-1"
        );
        assert_eq!(
            std::fs::read_to_string(fx.dir.path().join("params-1")).unwrap(),
            "REPLICAS=2\n"
        );
    }
}
