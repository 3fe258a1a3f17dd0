//! Heartbeat — periodic self-prompt so the agent can act without being
//! messaged.
//!
//! Every tick reads `memory/HEARTBEAT.md` from the workspace, builds a
//! prompt from the current time plus the file contents, and hands it to a
//! caller-supplied callback (the gateway feeds it to the agent loop). Ticks
//! with an empty notes file are skipped, callback errors are logged and the
//! loop keeps running. Each executed tick appends a line to
//! `memory/heartbeat.log`.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

/// Default interval: 30 minutes.
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 30 * 60;

/// Callback invoked on each tick with the built prompt.
pub type OnHeartbeatFn = Arc<
    dyn Fn(String) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send>>
        + Send
        + Sync,
>;

/// Periodic self-prompt daemon.
pub struct HeartbeatService {
    workspace: PathBuf,
    on_heartbeat: OnHeartbeatFn,
    interval_secs: u64,
    shutdown: Arc<Notify>,
}

impl HeartbeatService {
    pub fn new(workspace: PathBuf, on_heartbeat: OnHeartbeatFn, interval_secs: u64) -> Self {
        Self {
            workspace,
            on_heartbeat,
            interval_secs,
            shutdown: Arc::new(Notify::new()),
        }
    }

    fn notes_path(&self) -> PathBuf {
        self.workspace.join("memory").join("HEARTBEAT.md")
    }

    fn log_path(&self) -> PathBuf {
        self.workspace.join("memory").join("heartbeat.log")
    }

    /// Whether the notes file has actionable content. Blank lines, headers
    /// and comments do not count.
    fn has_tasks(content: &str) -> bool {
        content.lines().any(|line| {
            let trimmed = line.trim();
            !trimmed.is_empty() && !trimmed.starts_with('#') && !trimmed.starts_with("<!--")
        })
    }

    /// Run the ticker until `stop()` is called.
    pub async fn start(&self) -> anyhow::Result<()> {
        info!(interval_secs = self.interval_secs, "heartbeat started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(std::time::Duration::from_secs(self.interval_secs)) => {
                    self.tick().await;
                }
                _ = self.shutdown.notified() => {
                    info!("heartbeat shutting down");
                    return Ok(());
                }
            }
        }
    }

    pub fn stop(&self) {
        self.shutdown.notify_waiters();
    }

    /// Execute one tick. Public so the CLI can trigger it manually.
    pub async fn tick(&self) {
        let notes = std::fs::read_to_string(self.notes_path()).unwrap_or_default();
        if !Self::has_tasks(&notes) {
            debug!("heartbeat: nothing to do");
            return;
        }

        let now = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
        let prompt = format!(
            "Heartbeat at {now}. Review your heartbeat notes below and carry out \
             anything that needs attention. If nothing does, reply with just HEARTBEAT_OK.\n\n{notes}"
        );

        match (self.on_heartbeat)(prompt).await {
            Ok(response) => {
                let ok = response.to_uppercase().contains("HEARTBEAT_OK");
                if ok {
                    debug!("heartbeat: ok, no action needed");
                } else {
                    info!("heartbeat: acted on notes");
                }
                self.append_log(if ok { "ok" } else { "acted" });
            }
            Err(e) => {
                error!(error = %e, "heartbeat callback failed");
                self.append_log("error");
            }
        }
    }

    fn append_log(&self, status: &str) {
        let line = format!("{} {status}\n", chrono::Utc::now().to_rfc3339());
        let path = self.log_path();
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let result = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .and_then(|mut f| std::io::Write::write_all(&mut f, line.as_bytes()));
        if let Err(e) = result {
            warn!(error = %e, "failed to append heartbeat log");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_callback(counter: Arc<AtomicUsize>, reply: &'static str) -> OnHeartbeatFn {
        Arc::new(move |_prompt| {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(reply.to_string())
            })
        })
    }

    #[test]
    fn empty_notes_have_no_tasks() {
        assert!(!HeartbeatService::has_tasks(""));
        assert!(!HeartbeatService::has_tasks("  \n  \n"));
        assert!(!HeartbeatService::has_tasks("# Header\n\n<!-- note -->\n"));
        assert!(HeartbeatService::has_tasks("# Tasks\ncheck deploys\n"));
    }

    #[tokio::test]
    async fn tick_skips_when_notes_empty() {
        let dir = tempfile::tempdir().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let svc = HeartbeatService::new(
            dir.path().to_path_buf(),
            counting_callback(counter.clone(), "HEARTBEAT_OK"),
            60,
        );

        svc.tick().await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn tick_invokes_callback_and_logs() {
        let dir = tempfile::tempdir().unwrap();
        let mem = dir.path().join("memory");
        std::fs::create_dir_all(&mem).unwrap();
        std::fs::write(mem.join("HEARTBEAT.md"), "- water the plants\n").unwrap();

        let counter = Arc::new(AtomicUsize::new(0));
        let svc = HeartbeatService::new(
            dir.path().to_path_buf(),
            counting_callback(counter.clone(), "done"),
            60,
        );

        svc.tick().await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        let log = std::fs::read_to_string(mem.join("heartbeat.log")).unwrap();
        assert!(log.trim().ends_with("acted"));
    }

    #[tokio::test]
    async fn tick_survives_callback_error() {
        let dir = tempfile::tempdir().unwrap();
        let mem = dir.path().join("memory");
        std::fs::create_dir_all(&mem).unwrap();
        std::fs::write(mem.join("HEARTBEAT.md"), "- task\n").unwrap();

        let failing: OnHeartbeatFn =
            Arc::new(|_| Box::pin(async { Err(anyhow::anyhow!("boom")) }));
        let svc = HeartbeatService::new(dir.path().to_path_buf(), failing, 60);

        // Must not panic; logs the error instead.
        svc.tick().await;
        let log = std::fs::read_to_string(mem.join("heartbeat.log")).unwrap();
        assert!(log.contains("error"));
    }

    #[tokio::test]
    async fn stop_exits_loop() {
        let dir = tempfile::tempdir().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let svc = Arc::new(HeartbeatService::new(
            dir.path().to_path_buf(),
            counting_callback(counter, "HEARTBEAT_OK"),
            3600,
        ));

        let handle = {
            let svc = svc.clone();
            tokio::spawn(async move { svc.start().await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        svc.stop();
        assert!(handle.await.unwrap().is_ok());
    }
}
