//! History command - show the release history of a release

use console::style;
use kdeploy_core::manifest::resource_ids_in_string_format;
use kdeploy_core::{Release, ReleaseStatus};
use kdeploy_kube::{
    KubeHistoryStore, ReleaseHistoryStore, fetch_all_resources_for_release, pod_details,
    track_and_color_labels,
};

use super::Globals;
use crate::error::Result;

/// What to show besides the release table
#[derive(Debug)]
pub struct HistoryOptions {
    pub max_releases: Option<usize>,
    pub all_resources: bool,
    pub pods: bool,
    pub track: Option<String>,
    pub color: Option<String>,
    pub output_json: bool,
}

/// Run the history command
pub async fn run(
    globals: &Globals,
    release_name: &str,
    namespace: &str,
    options: &HistoryOptions,
) -> Result<()> {
    let tools = globals.tool_paths()?;
    let client = globals.client(&tools).await?;
    let store = KubeHistoryStore::new(client.clone(), namespace);

    let mut history = store.load(release_name).await?;
    if let Some(max) = options.max_releases {
        history.releases.truncate(max);
    }

    if options.output_json {
        println!("{}", serde_json::to_string_pretty(&history.releases)?);
        return Ok(());
    }

    if history.is_empty() {
        println!(
            "No release history for {} in namespace {}",
            style(release_name).cyan(),
            style(namespace).yellow()
        );
        return Ok(());
    }

    println!(
        "Release history for {} in namespace {}:\n",
        style(release_name).cyan(),
        style(namespace).yellow()
    );
    println!(
        "{:<10} {:<12} {:<10} {:<20}",
        style("RELEASE").bold(),
        style("STATUS").bold(),
        style("RESOURCES").bold(),
        style("CREATED").bold()
    );
    for release in &history.releases {
        print_release(release);
    }

    if options.all_resources {
        let log = globals.execution_log();
        let ids = fetch_all_resources_for_release(&store, release_name, log.as_log()).await?;
        println!("\nResources created by any release:\n{}", resource_ids_in_string_format(&ids));
    }

    if options.pods {
        let selector = track_and_color_labels(options.track.as_deref(), options.color.as_deref());
        let running = pod_details(&client, namespace, release_name, &selector).await?;
        println!("\nRunning pods:");
        for pod in running {
            let images: Vec<&str> = pod.containers.iter().map(|c| c.image.as_str()).collect();
            println!("- {} {} {}", pod.name, pod.pod_ip, images.join(","));
        }
    }

    Ok(())
}

fn print_release(release: &Release) {
    let status = match release.status {
        ReleaseStatus::Succeeded => style(release.status).green(),
        ReleaseStatus::Failed => style(release.status).red(),
        ReleaseStatus::InProgress => style(release.status).yellow(),
    };
    let created = release
        .created_at
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string());

    println!(
        "{:<10} {:<12} {:<10} {:<20}",
        release.number,
        status,
        release.resources.len(),
        created
    );
}
