//! Concurrency-safe handle on a single supervised child process (§4.2).
//!
//! Holds the locked [`Child`], a [`CancelToken`] the exit watcher and `Stop` share, a
//! bounded log ring, and a broadcast channel for live log consumers. Killing a handle
//! recurses through its whole process group, mirroring how a shell job control signal
//! reaches every descendant a service may have forked off.

use crate::control::CancelToken;
use crate::errors::{Result, SupervisorError};
use crate::logger::LogLevel;
use crate::log;
use dusa_collection_utils::core::types::rwarc::LockWithTimeout;
use libc::{kill, SIGKILL, SIGTERM};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use procfs::process::all_processes;
use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Child;
use tokio::sync::{broadcast, Mutex};

/// One supervised child process: its OS handle, its cancellation signal, and the log
/// state its two [`crate::log_capturer::LogCapturer`] tasks feed.
pub struct ProcessHandle {
    pub id: String,
    pid: AtomicU32,
    pub start_time: u64,
    child: LockWithTimeout<Child>,
    cancel: Arc<CancelToken>,
    ring: Mutex<VecDeque<String>>,
    ring_capacity: usize,
    live: Mutex<Option<broadcast::Sender<String>>>,
}

impl ProcessHandle {
    pub fn new(
        id: impl Into<String>,
        pid: u32,
        child: Child,
        start_time: u64,
        ring_capacity: usize,
        live_channel_capacity: usize,
    ) -> Self {
        let (tx, _rx) = broadcast::channel(live_channel_capacity.max(1));
        Self {
            id: id.into(),
            pid: AtomicU32::new(pid),
            start_time,
            child: LockWithTimeout::new(child),
            cancel: Arc::new(CancelToken::new()),
            ring: Mutex::new(VecDeque::with_capacity(ring_capacity.min(4096))),
            ring_capacity,
            live: Mutex::new(Some(tx)),
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid.load(Ordering::SeqCst)
    }

    pub fn cancel_token(&self) -> Arc<CancelToken> {
        self.cancel.clone()
    }

    /// Appends a line to the ring, evicting the oldest entry once over capacity.
    pub async fn append_log(&self, line: String) {
        let mut ring = self.ring.lock().await;
        ring.push_back(line);
        while ring.len() > self.ring_capacity {
            ring.pop_front();
        }
    }

    /// A copy of the ring's current contents, oldest first.
    pub async fn snapshot(&self) -> Vec<String> {
        self.ring.lock().await.iter().cloned().collect()
    }

    /// Subscribes a new live-log consumer. Returns `None` once the channel has been closed.
    pub async fn subscribe(&self) -> Option<broadcast::Receiver<String>> {
        self.live.lock().await.as_ref().map(|tx| tx.subscribe())
    }

    /// Publishes a line to any live subscribers. Never blocks: a channel with no
    /// receivers, or one whose receivers are lagging, is simply not delivered to.
    pub async fn publish(&self, line: &str) {
        if let Some(tx) = self.live.lock().await.as_ref() {
            let _ = tx.send(line.to_string());
        }
    }

    /// Closes the live channel. Safe to call more than once; only the first call has
    /// any effect.
    pub async fn close_channel(&self) {
        let mut guard = self.live.lock().await;
        guard.take();
    }

    /// Waits for the child to exit and returns its exit status.
    pub async fn wait(&self) -> io::Result<std::process::ExitStatus> {
        let mut child = self
            .child
            .try_write_with_timeout(None)
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
        child.wait().await
    }

    /// Sends `SIGTERM` to this process's whole group immediately, without waiting. This is
    /// what actually requests graceful termination; cancelling the token is a separate,
    /// in-process-only signal to the exit watcher.
    pub fn signal_term(&self) -> Result<()> {
        send_term_to_group(self.pid() as i32)
    }

    /// Escalates a child that didn't exit after an earlier [`ProcessHandle::signal_term`]:
    /// waits `kill_wait` once more, then `SIGKILL`s whatever in its group is still alive.
    pub async fn kill(&self, kill_wait: Duration) -> Result<()> {
        let pid = self.pid() as i32;
        escalate_to_kill(pid, kill_wait)
    }

    /// A quick, non-blocking check for whether the child has already exited, used by
    /// `Status` to decide whether a dead handle can be reclaimed without waiting on it.
    pub async fn wait_is_finished(&self) -> bool {
        match self.child.try_write().await {
            Ok(mut child) => matches!(child.try_wait(), Ok(Some(_))),
            Err(_) => false,
        }
    }
}

/// Recursively collects all descendant PIDs of `root_pid`, including `root_pid` itself.
fn collect_descendants(root_pid: i32) -> Result<HashSet<i32>> {
    let mut children_map: HashMap<i32, Vec<i32>> = HashMap::new();
    let mut result: HashSet<i32> = HashSet::new();

    for prc in all_processes()
        .map_err(|e| SupervisorError::PortProbeError(e.to_string()))?
    {
        let process = match prc {
            Ok(p) => p,
            Err(_) => continue,
        };
        if let Ok(stat) = process.stat() {
            children_map.entry(stat.ppid).or_default().push(process.pid());
        }
    }

    let mut queue = VecDeque::new();
    queue.push_back(root_pid);
    result.insert(root_pid);

    while let Some(pid) = queue.pop_front() {
        if let Some(children) = children_map.get(&pid) {
            for child in children {
                if result.insert(*child) {
                    queue.push_back(*child);
                }
            }
        }
    }

    Ok(result)
}

fn reap_zombie(pid: i32) {
    match waitpid(Pid::from_raw(pid), Some(WaitPidFlag::WNOHANG)) {
        Ok(WaitStatus::Exited(_, status)) => {
            log!(LogLevel::Trace, "Reaped pid {} with exit status {}", pid, status)
        }
        Ok(WaitStatus::Signaled(_, sig, _)) => {
            log!(LogLevel::Trace, "Reaped pid {} terminated by signal {:?}", pid, sig)
        }
        Ok(status) => log!(LogLevel::Trace, "PID {} wait status: {:?}", pid, status),
        Err(e) => log!(LogLevel::Trace, "Failed to reap pid {}: {}", pid, e),
    }
}

fn is_running(pid: i32) -> bool {
    unsafe { kill(pid, 0) == 0 }
}

/// Sends `SIGTERM` to `pgid` and every descendant, without waiting for anything to exit.
fn send_term_to_group(pgid: i32) -> Result<()> {
    let pids = collect_descendants(pgid)?;
    for pid in &pids {
        let res = unsafe { kill(*pid, SIGTERM) };
        if res != 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::ESRCH) {
                log!(LogLevel::Warn, "Failed to send SIGTERM to pid {}: {}", pid, err);
            }
        }
    }
    Ok(())
}

/// Waits `kill_wait`, then reaps and `SIGKILL`s whatever in `pgid`'s group is still alive.
/// Descendants are re-collected here rather than reused from an earlier snapshot, since a
/// stubborn process may have forked more children during the grace window.
fn escalate_to_kill(pgid: i32, kill_wait: Duration) -> Result<()> {
    std::thread::sleep(kill_wait);
    let pids = collect_descendants(pgid)?;

    for pid in &pids {
        reap_zombie(*pid);
        if is_running(*pid) {
            log!(LogLevel::Warn, "PID {} still running; sending SIGKILL", pid);
            let res = unsafe { kill(*pid, SIGKILL) };
            if res != 0 {
                let err = io::Error::last_os_error();
                if err.raw_os_error() != Some(libc::ESRCH) {
                    return Err(SupervisorError::KillError(*pid, err.to_string()));
                }
            }
            reap_zombie(*pid);
        }
    }

    Ok(())
}

/// Terminates `pgid` and every descendant: `SIGTERM` first, a grace sleep, then
/// `SIGKILL` to whatever survives. Used where there is no handle to cooperatively wait on
/// (a bare persisted PID) or where immediate, unconditional termination is wanted
/// ([`crate::supervisor::Supervisor::force_kill`]).
pub fn kill_pgid_recursive(pgid: i32, kill_wait: Duration) -> Result<()> {
    log!(LogLevel::Trace, "Recursively killing pgid: {}", pgid);
    send_term_to_group(pgid)?;
    escalate_to_kill(pgid, kill_wait)
}
