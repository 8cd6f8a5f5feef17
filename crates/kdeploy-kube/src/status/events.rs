//! Event watchers and status line formatting
//!
//! While resources are checked, one `kubectl get events --watch-only` runs
//! per namespace. Event lines mentioning a checked resource are copied into
//! the execution log. Watchers never influence the outcome of a check.

use std::future::Future;

use futures::StreamExt;
use kdeploy_core::{CommandRunner, ExecutionLog, KubernetesResourceId, OutputLine, RunningProcess};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, warn};

use crate::kubectl::Kubectl;

/// `Event  : <name>   <line>`
pub fn event_line(name: &str, width: usize, line: &str) -> String {
    format!("{:<7}: {:<width$}   {}", "Event", name, line)
}

/// Watcher stderr, without a resource column
pub fn event_error_line(line: &str) -> String {
    format!("{:<7}: {}", "Event", line)
}

/// `Status : <name>   <line>`, on a new line
pub fn status_line(name: &str, width: usize, line: &str) -> String {
    format!("\n{:<7}: {:<width$}   {}", "Status", name, line)
}

/// Column width for resource names in event and status lines
pub fn name_width<'a>(names: impl IntoIterator<Item = &'a str>) -> usize {
    names.into_iter().map(str::len).max().unwrap_or(0)
}

/// Forwards a command's output as status lines of one resource
pub fn status_sink<'a>(
    log: &'a dyn ExecutionLog,
    name: &'a str,
    width: usize,
) -> impl Fn(&OutputLine) + Send + Sync + 'a {
    move |line: &OutputLine| {
        let formatted = status_line(name, width, line.text());
        if line.is_stderr() {
            log.error(&formatted);
        } else {
            log.info(&formatted);
        }
    }
}

/// Distinct namespaces in first-seen order, the target namespace last
pub fn watch_namespaces<'a>(
    namespaces: impl IntoIterator<Item = &'a str>,
    target_namespace: &'a str,
) -> Vec<String> {
    let mut distinct: Vec<String> = Vec::new();
    for namespace in namespaces.into_iter().chain(std::iter::once(target_namespace)) {
        if !namespace.is_empty() && !distinct.iter().any(|n| n == namespace) {
            distinct.push(namespace.to_string());
        }
    }
    distinct
}

/// Background event streams of one status check
///
/// Dropping the guard drops the processes, which kills real children;
/// [`EventWatchers::kill_all`] must still be awaited on every exit path.
#[derive(Default)]
pub struct EventWatchers {
    processes: Vec<Box<dyn RunningProcess>>,
    streams: Vec<UnboundedReceiver<OutputLine>>,
}

impl EventWatchers {
    /// Start one watcher per namespace; watchers that fail to start are skipped
    pub async fn start(
        runner: &dyn CommandRunner,
        kubectl: &Kubectl,
        namespaces: &[String],
    ) -> Self {
        let mut watchers = Self::default();
        for namespace in namespaces {
            let command = kubectl.watch_events(namespace);
            match runner.spawn(&command).await {
                Ok(mut process) => {
                    watchers.streams.extend(process.take_lines());
                    watchers.processes.push(process);
                }
                Err(e) => warn!(namespace = %namespace, error = %e, "event watcher not started"),
            }
        }
        watchers
    }

    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    /// Future that copies matching event lines into the log until every
    /// stream closes
    ///
    /// A line matches a resource when it contains both the resource name and
    /// its namespace (the target namespace for namespace-less ids).
    pub fn forwarder<'a>(
        &mut self,
        targets: &'a [KubernetesResourceId],
        target_namespace: &'a str,
        log: &'a dyn ExecutionLog,
    ) -> impl Future<Output = ()> + use<'a> {
        let streams = std::mem::take(&mut self.streams)
            .into_iter()
            .map(|mut rx| futures::stream::poll_fn(move |cx| rx.poll_recv(cx)));
        let mut merged = futures::stream::select_all(streams);
        let width = name_width(targets.iter().map(|id| id.name.as_str()));

        async move {
            while let Some(line) = merged.next().await {
                if line.is_stderr() {
                    log.error(&event_error_line(line.text()));
                    continue;
                }
                for id in targets {
                    let namespace = if id.namespace.is_empty() {
                        target_namespace
                    } else {
                        &id.namespace
                    };
                    let text = line.text();
                    if text.contains(namespace) && text.contains(&id.name) {
                        log.info(&event_line(&id.name, width, text));
                    }
                }
            }
        }
    }

    /// Kill every watcher; safe to call more than once
    pub async fn kill_all(&mut self) {
        for mut process in self.processes.drain(..) {
            if let Err(e) = process.kill().await {
                debug!(error = %e, "event watcher kill failed");
            }
        }
    }
}

/// Run `work` while `forwarder` copies event lines
///
/// Pending event lines are drained first; once the event streams close the
/// work simply runs to completion.
pub async fn with_event_forwarding<F>(forwarder: impl Future<Output = ()>, work: F) -> F::Output
where
    F: Future,
{
    tokio::pin!(work);
    tokio::select! {
        biased;
        _ = forwarder => work.await,
        output = &mut work => output,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kdeploy_core::{LogLevel, MemoryLog, MockRunner, ToolPaths};

    #[test]
    fn test_line_formats() {
        insta::assert_snapshot!(
            event_line("web", 8, "Deployment web prod Scaled up replica set"),
            @"Event  : web        Deployment web prod Scaled up replica set"
        );
        assert_eq!(event_error_line("boom"), "Event  : boom");
        assert_eq!(status_line("db", 3, "rolled out"), "\nStatus : db    rolled out");
    }

    #[test]
    fn test_watch_namespaces() {
        assert_eq!(
            watch_namespaces(["a", "", "b", "a"], "target"),
            vec!["a", "b", "target"]
        );
        assert_eq!(watch_namespaces(["target"], "target"), vec!["target"]);
    }

    #[test]
    fn test_watch_namespaces_of_resource_ids() {
        let ids = vec![
            KubernetesResourceId::new("Deployment", "web", "prod"),
            KubernetesResourceId::new("ClusterRole", "reader", ""),
        ];
        let target = String::from("ops");

        let namespaces = watch_namespaces(ids.iter().map(|id| id.namespace.as_str()), &target);

        assert_eq!(namespaces, vec!["prod", "ops"]);
    }

    #[tokio::test]
    async fn test_forwarder_filters_by_name_and_namespace() {
        let runner = MockRunner::new();
        runner.with_watch_lines(vec![
            OutputLine::Stdout("Pod web-1 prod Pulling image".into()),
            OutputLine::Stdout("Pod web-1 staging Pulling image".into()),
            OutputLine::Stdout("Pod api-1 prod Started".into()),
            OutputLine::Stderr("watch closed".into()),
        ]);
        let log = MemoryLog::new();
        let kubectl = Kubectl::new(&ToolPaths::default());
        let targets = vec![KubernetesResourceId::new("Deployment", "web", "")];

        let mut watchers = EventWatchers::start(&runner, &kubectl, &["prod".to_string()]).await;
        assert_eq!(watchers.len(), 1);

        let forwarder = watchers.forwarder(&targets, "prod", &log);
        let answer = with_event_forwarding(forwarder, async { 42 }).await;
        watchers.kill_all().await;
        watchers.kill_all().await;

        assert_eq!(answer, 42);
        assert_eq!(
            log.lines_at(LogLevel::Info),
            vec!["Event  : web   Pod web-1 prod Pulling image"]
        );
        assert_eq!(log.lines_at(LogLevel::Error), vec!["Event  : watch closed"]);
        assert_eq!(runner.killed_count(), 1);
    }
}
