//! Liveness probes (§4.4). Each primitive has a documented portability chain: start
//! with the cheapest/most precise source and fall back to blunter ones on failure, the
//! way the rest of this family of tools shells out to `lsof`/`ss` rather than trying to
//! own socket-table parsing end to end.

use crate::logger::LogLevel;
use crate::log;
use procfs::process::all_processes;
use std::io;
use tokio::process::Command;

/// `true` iff the OS reports `pid` exists (signal 0). A process that exists but that we
/// lack permission to signal (`EPERM`) is still reported alive — its existence, not our
/// ability to signal it, is what we're checking.
pub fn is_pid_live(pid: i32) -> bool {
    let ret = unsafe { libc::kill(pid, 0) };
    if ret == 0 {
        return true;
    }
    matches!(
        io::Error::last_os_error().raw_os_error(),
        Some(libc::EPERM)
    )
}

/// `true` iff `pid` has at least one live descendant process, per the host's
/// parent-index. Used by `IsLive` to detect services that forked and exited their
/// original parent (§ orphan-by-port scenario's sibling case).
pub fn has_child_processes(pid: i32) -> bool {
    let processes = match all_processes() {
        Ok(p) => p,
        Err(e) => {
            log!(LogLevel::Trace, "Failed to enumerate processes: {}", e);
            return false;
        }
    };

    for prc in processes {
        let process = match prc {
            Ok(p) => p,
            Err(_) => continue,
        };
        if let Ok(stat) = process.stat() {
            if stat.ppid == pid {
                return true;
            }
        }
    }
    false
}

/// `true` iff some process on the host has a listening TCP socket bound to `port`.
/// Tries, in order: `lsof` filtered to `LISTEN` state, `lsof` unfiltered, a parse of
/// `/proc/net/tcp{,6}`, then `ss -tlnp` as the last resort. Any attempt succeeding in
/// finding a match returns `true` immediately.
pub async fn is_port_listening(port: u16) -> bool {
    if lsof_listen_filtered(port).await.unwrap_or(false) {
        return true;
    }
    if lsof_unfiltered(port).await.unwrap_or(false) {
        return true;
    }
    if proc_net_tcp_has_listener(port).unwrap_or(false) {
        return true;
    }
    ss_has_listener(port).await.unwrap_or(false)
}

async fn lsof_listen_filtered(port: u16) -> io::Result<bool> {
    let output = Command::new("lsof")
        .arg(format!("-i:{port}"))
        .arg("-sTCP:LISTEN")
        .arg("-t")
        .output()
        .await?;
    Ok(output.status.success() && !output.stdout.is_empty())
}

async fn lsof_unfiltered(port: u16) -> io::Result<bool> {
    let output = Command::new("lsof")
        .arg("-ti")
        .arg(format!(":{port}"))
        .output()
        .await?;
    Ok(output.status.success() && !output.stdout.is_empty())
}

fn proc_net_tcp_has_listener(port: u16) -> io::Result<bool> {
    for path in ["/proc/net/tcp", "/proc/net/tcp6"] {
        if let Ok(contents) = std::fs::read_to_string(path) {
            if proc_net_tcp_contents_have_listener(&contents, port) {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

const TCP_LISTEN_STATE: &str = "0A";

fn proc_net_tcp_contents_have_listener(contents: &str, port: u16) -> bool {
    for line in contents.lines().skip(1) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 4 {
            continue;
        }
        let local_address = fields[1];
        let state = fields[3];
        if state.eq_ignore_ascii_case(TCP_LISTEN_STATE) {
            if let Some(hex_port) = local_address.rsplit(':').next() {
                if let Ok(parsed) = u16::from_str_radix(hex_port, 16) {
                    if parsed == port {
                        return true;
                    }
                }
            }
        }
    }
    false
}

async fn ss_has_listener(port: u16) -> io::Result<bool> {
    let output = Command::new("ss").arg("-tlnp").output().await?;
    if !output.status.success() {
        return Ok(false);
    }
    let text = String::from_utf8_lossy(&output.stdout);
    Ok(text
        .lines()
        .any(|line| line.contains("LISTEN") && crate::port_inventory::line_matches_port(line, port)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn self_pid_is_live() {
        let pid = std::process::id() as i32;
        assert!(is_pid_live(pid));
    }

    #[test]
    fn pid_zero_absurd_is_not_live() {
        assert!(!is_pid_live(i32::MAX));
    }

    #[test]
    fn parses_proc_net_tcp_listen_line() {
        let contents = "\
  sl  local_address rem_address   st\n\
   0: 0100007F:1F90 00000000:0000 0A\n";
        assert!(proc_net_tcp_contents_have_listener(contents, 8080));
        assert!(!proc_net_tcp_contents_have_listener(contents, 9090));
    }

    #[test]
    fn ignores_non_listen_proc_net_tcp_state() {
        let contents = "\
  sl  local_address rem_address   st\n\
   0: 0100007F:1F90 00000000:0000 01\n";
        assert!(!proc_net_tcp_contents_have_listener(contents, 8080));
    }
}
