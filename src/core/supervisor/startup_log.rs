use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub const TAIL_WINDOW: Duration = Duration::from_secs(60);
pub const TAIL_POLL: Duration = Duration::from_millis(500);
pub const TAIL_LINES: usize = 20;

pub type TailSink = Arc<dyn Fn(String) + Send + Sync>;

#[derive(Default)]
struct TailState {
    stop: Option<CancellationToken>,
    last_text: String,
    updating: bool,
    marker_seen: bool,
}

/// Follows a module's structured startup log and pushes its tail to a
/// sink until stopped or the window runs out. Seeing the ready marker is
/// only logged; readiness comes from the port probe.
#[derive(Clone, Default)]
pub struct StartupLogTail {
    state: Arc<Mutex<TailState>>,
}

impl StartupLogTail {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tailing `path`, replacing any tail already running.
    pub async fn start(
        &self,
        path: PathBuf,
        ready_marker: Option<String>,
        window: Duration,
        sink: TailSink,
    ) {
        let stop = CancellationToken::new();
        {
            let mut state = self.state.lock().await;
            if let Some(previous) = state.stop.replace(stop.clone()) {
                previous.cancel();
            }
            state.last_text.clear();
            state.marker_seen = false;
        }

        let tail = self.clone();
        tokio::spawn(async move {
            let deadline = tokio::time::Instant::now() + window;
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = tokio::time::sleep_until(deadline) => {
                        debug!("Startup log window for {:?} elapsed", path);
                        break;
                    }
                    _ = tokio::time::sleep(TAIL_POLL) => {}
                }
                let Ok(content) = tokio::fs::read_to_string(&path).await else {
                    continue;
                };
                tail.publish(&content, ready_marker.as_deref(), &sink).await;
            }
        });
    }

    async fn publish(&self, content: &str, ready_marker: Option<&str>, sink: &TailSink) {
        let text = last_lines(content, TAIL_LINES);
        {
            let mut state = self.state.lock().await;
            if state.updating || text == state.last_text {
                return;
            }
            state.updating = true;
            if let Some(marker) = ready_marker {
                if !state.marker_seen && text.contains(marker) {
                    state.marker_seen = true;
                    info!("Startup log reports ready ({})", marker);
                }
            }
            state.last_text = text.clone();
        }
        // The sink runs unlocked; a sink that reads the tail must not deadlock.
        sink(text);
        self.state.lock().await.updating = false;
    }

    pub async fn stop(&self) {
        if let Some(stop) = self.state.lock().await.stop.take() {
            stop.cancel();
        }
    }

    pub async fn last_text(&self) -> String {
        self.state.lock().await.last_text.clone()
    }

    pub async fn marker_seen(&self) -> bool {
        self.state.lock().await.marker_seen
    }
}

fn last_lines(content: &str, count: usize) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let start = lines.len().saturating_sub(count);
    lines[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use super::*;

    #[test]
    fn tail_keeps_last_lines() {
        let content = (1..=30).map(|i| format!("line {i}")).collect::<Vec<_>>().join("\n");
        let tail = last_lines(&content, 3);
        assert_eq!(tail, "line 28\nline 29\nline 30");
        assert_eq!(last_lines("", 3), "");
    }

    #[tokio::test]
    async fn tail_follows_file_until_stopped() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("startup.log");
        let seen: Arc<StdMutex<Vec<String>>> = Arc::default();
        let sink_seen = Arc::clone(&seen);

        let tail = StartupLogTail::new();
        tail.start(
            path.clone(),
            Some("Server ready".into()),
            Duration::from_secs(10),
            Arc::new(move |text| sink_seen.lock().unwrap().push(text)),
        )
        .await;

        tokio::time::sleep(Duration::from_millis(700)).await;
        std::fs::write(&path, "booting\n").unwrap();
        tokio::time::sleep(Duration::from_millis(1200)).await;
        std::fs::write(&path, "booting\nServer ready on 8080\n").unwrap();
        tokio::time::sleep(Duration::from_millis(1200)).await;
        tail.stop().await;

        assert!(tail.marker_seen().await);
        assert_eq!(tail.last_text().await, "booting\nServer ready on 8080");
        let seen = seen.lock().unwrap().clone();
        assert_eq!(seen, vec!["booting".to_string(), "booting\nServer ready on 8080".to_string()]);

        std::fs::write(&path, "later\n").unwrap();
        tokio::time::sleep(Duration::from_millis(800)).await;
        assert_eq!(tail.last_text().await, "booting\nServer ready on 8080");
    }
}
