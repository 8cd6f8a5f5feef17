//! kdeploy CLI - rolling Kubernetes deployments with release history

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

mod commands;
mod error;
mod exit_codes;

use commands::deploy::DeployArgs;
use commands::render::RenderArgs;
use commands::Globals;

#[derive(Parser)]
#[command(name = "kdeploy")]
#[command(author = "kdeploy Contributors")]
#[command(version)]
#[command(about = "Rolling Kubernetes deployments with release history, steady-state checks and pruning", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug output
    #[arg(long, global = true)]
    debug: bool,

    /// Tool paths file (default: ~/.config/kdeploy/tools.yaml)
    #[arg(long, global = true, env = "KDEPLOY_TOOLS")]
    tools: Option<PathBuf>,

    /// Kubeconfig used by kubectl and the API client
    #[arg(long, global = true, env = "KDEPLOY_KUBECONFIG")]
    kubeconfig: Option<PathBuf>,

    /// kubectl binary
    #[arg(long, global = true, env = "KDEPLOY_KUBECTL")]
    kubectl: Option<String>,

    /// Execution log format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    output: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Styled lines on stderr
    Text,
    /// JSON lines on stdout
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Deploy a release: apply, wait for steady state, prune
    Deploy(DeployArgs),

    /// Fetch and render manifests locally without touching the cluster
    Render(RenderArgs),

    /// Show the release history of a release
    History {
        /// Release name
        release: String,

        /// Namespace holding the history
        #[arg(short, long, default_value = "default")]
        namespace: String,

        /// Show only the N most recent releases
        #[arg(long)]
        max: Option<usize>,

        /// Also list every resource any release created
        #[arg(long)]
        all_resources: bool,

        /// Also list the running pods of the release
        #[arg(long)]
        pods: bool,

        /// Only pods of this canary/primary track (with --pods)
        #[arg(long, requires = "pods")]
        track: Option<String>,

        /// Only pods of this blue/green color (with --pods)
        #[arg(long, requires = "pods")]
        color: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

/// `30s`, `5m`, `1h30m` or plain seconds
pub fn parse_timeout(value: &str) -> Result<Duration, String> {
    kdeploy_core::annotations::parse_duration(value)
        .ok_or_else(|| format!("invalid duration `{value}`, expected e.g. 90s, 10m or 1h30m"))
}

fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env("KDEPLOY_LOG").unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

#[tokio::main]
async fn main() {
    miette::set_panic_hook();

    let cli = Cli::parse();
    init_tracing(cli.debug);

    let globals = Globals {
        tools: cli.tools,
        kubeconfig: cli.kubeconfig,
        kubectl: cli.kubectl,
        output: cli.output,
    };

    let result = match cli.command {
        Commands::Deploy(args) => commands::deploy::run(&globals, args).await,
        Commands::Render(args) => commands::render::run(&globals, args).await,
        Commands::History {
            release,
            namespace,
            max,
            all_resources,
            pods,
            track,
            color,
            json,
        } => {
            let options = commands::history::HistoryOptions {
                max_releases: max,
                all_resources,
                pods,
                track,
                color,
                output_json: json,
            };
            commands::history::run(&globals, &release, &namespace, &options).await
        }
    };

    if let Err(e) = result {
        let code = e.exit_code();
        eprintln!("{:?}", miette::Report::new(e));
        std::process::exit(code);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_history_pod_filters_need_pods() {
        assert!(Cli::try_parse_from(["kdeploy", "history", "web", "--track", "canary"]).is_err());

        let cli =
            Cli::try_parse_from(["kdeploy", "history", "web", "--pods", "--color", "blue"]).unwrap();
        match cli.command {
            Commands::History { pods, color, track, .. } => {
                assert!(pods);
                assert_eq!(color.as_deref(), Some("blue"));
                assert!(track.is_none());
            }
            _ => panic!("expected history command"),
        }
    }

    #[test]
    fn test_parse_timeout() {
        assert_eq!(parse_timeout("90"), Ok(Duration::from_secs(90)));
        assert_eq!(parse_timeout("10m"), Ok(Duration::from_secs(600)));
        assert_eq!(parse_timeout("1h30m"), Ok(Duration::from_secs(5400)));
        assert!(parse_timeout("soon").is_err());
    }
}
