//! Drains a child's stdout/stderr pipe line-by-line into its [`ProcessHandle`] (§4.3).
//!
//! Two of these run per service, one per stream. Both clean each line with [`crate::ansi`],
//! tag stderr, and periodically hand the catalog a fresh JSON snapshot of the ring so a
//! crash between persists loses at most a couple of seconds of history.

use crate::ansi::clean_line;
use crate::catalog::CatalogRepository;
use crate::logger::LogLevel;
use crate::log;
use crate::process_handle::ProcessHandle;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

pub const STDOUT_PREFIX: &str = "";
pub const STDERR_PREFIX: &str = "[ERROR] ";

/// Reads `reader` line-by-line until EOF, appending cleaned lines to `handle`'s ring and
/// live channel, persisting a snapshot to `catalog` every `persist_interval`.
pub async fn capture<R>(
    reader: R,
    handle: Arc<ProcessHandle>,
    catalog: Arc<dyn CatalogRepository>,
    is_stderr: bool,
    persist_interval: Duration,
) where
    R: AsyncRead + Unpin,
{
    let prefix = if is_stderr { STDERR_PREFIX } else { STDOUT_PREFIX };
    let mut lines = BufReader::new(reader).lines();
    let mut last_persist = tokio::time::Instant::now();

    loop {
        let next = lines.next_line().await;
        let line = match next {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                log!(LogLevel::Warn, "Error reading log stream for {}: {}", handle.id, e);
                break;
            }
        };

        if let Some(cleaned) = clean_line(&line) {
            let tagged = format!("{prefix}{cleaned}");
            handle.append_log(tagged.clone()).await;
            handle.publish(&tagged).await;
        }

        if last_persist.elapsed() >= persist_interval {
            persist(&handle, &catalog).await;
            last_persist = tokio::time::Instant::now();
        }
    }

    persist(&handle, &catalog).await;
}

async fn persist(handle: &ProcessHandle, catalog: &Arc<dyn CatalogRepository>) {
    let snapshot = handle.snapshot().await;
    if let Err(e) = catalog.update_logs(&handle.id, &snapshot).await {
        log!(LogLevel::Warn, "Failed to persist log snapshot for {}: {}", handle.id, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::InMemoryCatalog;
    use crate::service::{ServiceDefinition, ServiceType};
    use std::io::Cursor;

    #[tokio::test]
    async fn captures_and_persists_clean_lines() {
        let mem = InMemoryCatalog::new();
        mem.upsert(ServiceDefinition::new("svc", ServiceType::Backend, "/tmp"))
            .await
            .unwrap();
        let catalog: Arc<dyn CatalogRepository> = Arc::new(mem);

        let child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg("true")
            .spawn()
            .unwrap();
        let pid = child.id().unwrap();
        let handle = Arc::new(ProcessHandle::new("svc", pid, child, 0, 100, 100));

        let data = b"\x1b[31mBAD\x1b[0m\nplain line\n".to_vec();
        let reader = Cursor::new(data);

        capture(reader, handle.clone(), catalog.clone(), true, Duration::from_millis(50)).await;

        let snap = handle.snapshot().await;
        assert_eq!(snap, vec!["[ERROR] BAD", "[ERROR] plain line"]);

        let loaded = catalog.load("svc").await.unwrap();
        assert_eq!(loaded.logs, snap);
    }
}
