//! Enumerates and resolves listening TCP ports (§4.5), the data behind the control
//! surface's "list ports" / "kill port" operations and the orphan-by-port liveness rule.

use crate::logger::LogLevel;
use crate::log;
use procfs::process::Process;
use tokio::process::Command;

/// One listening TCP socket, as seen by [`PortInventory::enumerate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortRecord {
    pub port: u16,
    pub pid: i32,
    pub process_name: String,
    pub command_line: String,
    pub state: String,
}

pub struct PortInventory;

impl PortInventory {
    /// One record per listening TCP socket on the host. Tries `lsof` (TCP/LISTEN
    /// filter) first, falling back to `ss -tlnp` if `lsof` is unavailable.
    pub async fn enumerate() -> Vec<PortRecord> {
        if let Some(records) = Self::enumerate_via_lsof().await {
            return records;
        }
        Self::enumerate_via_ss().await.unwrap_or_default()
    }

    async fn enumerate_via_lsof() -> Option<Vec<PortRecord>> {
        let output = Command::new("lsof")
            .args(["-iTCP", "-sTCP:LISTEN", "-n", "-P"])
            .output()
            .await
            .ok()?;
        if !output.status.success() {
            return None;
        }
        let text = String::from_utf8_lossy(&output.stdout);
        Some(parse_lsof_listing(&text))
    }

    async fn enumerate_via_ss() -> Option<Vec<PortRecord>> {
        let output = Command::new("ss").arg("-tlnp").output().await.ok()?;
        if !output.status.success() {
            return None;
        }
        let text = String::from_utf8_lossy(&output.stdout);
        Some(parse_ss_listing(&text))
    }

    /// Resolves the PID currently bound to `port`, if any. Tries `lsof` in terse mode
    /// first (`-ti :PORT`), falling back to a scan of the socket table.
    pub async fn find_pid_by_port(port: u16) -> Option<i32> {
        if let Some(pid) = Self::find_via_lsof_terse(port).await {
            return Some(pid);
        }
        Self::enumerate()
            .await
            .into_iter()
            .find(|r| r.port == port)
            .map(|r| r.pid)
    }

    async fn find_via_lsof_terse(port: u16) -> Option<i32> {
        let output = Command::new("lsof")
            .arg("-ti")
            .arg(format!(":{port}"))
            .output()
            .await
            .ok()?;
        if !output.status.success() {
            return None;
        }
        let text = String::from_utf8_lossy(&output.stdout);
        text.lines().next()?.trim().parse().ok()
    }
}

/// Extracts the port from one of the accepted address forms: `*:P`, `host:P`,
/// `[ipv6]:P`, `0.0.0.0:P`, `:::P`. The port is the substring after the last `:`,
/// stripped of a trailing `(...)` annotation; rejected if not a positive integer ≤ 65535.
fn extract_port(address: &str) -> Option<u16> {
    let without_annotation = match address.find('(') {
        Some(idx) => &address[..idx],
        None => address,
    };
    let port_str = without_annotation.rsplit(':').next()?.trim();
    let port: i64 = port_str.parse().ok()?;
    if port > 0 && port <= i64::from(u16::MAX) {
        Some(port as u16)
    } else {
        None
    }
}

fn parse_lsof_listing(text: &str) -> Vec<PortRecord> {
    let mut records = Vec::new();
    for line in text.lines().skip(1) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 9 {
            continue;
        }
        let process_name = fields[0];
        let Ok(pid) = fields[1].parse::<i32>() else {
            continue;
        };
        let name_field = fields[8];
        let Some(address) = name_field.split("->").next() else {
            continue;
        };
        let Some(port) = extract_port(address) else {
            continue;
        };

        records.push(PortRecord {
            port,
            pid,
            process_name: process_name.to_string(),
            command_line: command_line_for_pid(pid),
            state: "LISTEN".to_string(),
        });
    }
    records
}

/// Parses `ss -tlnp` output. The process column has the form
/// `users:(("name",pid=N,fd=M))`; we pull `pid=N` and `cmd=` (when present, as some
/// `ss` builds report `cmd=` rather than the quoted name) out of it.
fn parse_ss_listing(text: &str) -> Vec<PortRecord> {
    let mut records = Vec::new();
    for line in text.lines() {
        if !line.contains("LISTEN") {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 4 {
            continue;
        }
        let local_address = fields[3];
        let Some(port) = extract_port(local_address) else {
            continue;
        };
        let process_field = fields.last().copied().unwrap_or("");
        let (pid, cmd) = parse_ss_process_field(process_field);
        let Some(pid) = pid else { continue };

        records.push(PortRecord {
            port,
            pid,
            process_name: cmd.unwrap_or_default(),
            command_line: command_line_for_pid(pid),
            state: "LISTEN".to_string(),
        });
    }
    records
}

/// Parses the `pid=N,cmd=NAME` socket-stats process field by splitting on `,` and
/// stripping the `pid=`/`cmd=` prefixes.
fn parse_ss_process_field(field: &str) -> (Option<i32>, Option<String>) {
    let mut pid = None;
    let mut cmd = None;
    for part in field.split(',') {
        let part = part.trim_matches(|c: char| c == '(' || c == ')' || c == '"');
        if let Some(rest) = part.strip_prefix("pid=") {
            pid = rest.trim_end_matches(|c: char| c == ')' || c == '"').parse().ok();
        } else if let Some(rest) = part.strip_prefix("cmd=") {
            cmd = Some(rest.trim_end_matches(|c: char| c == ')' || c == '"').to_string());
        }
    }
    (pid, cmd)
}

fn command_line_for_pid(pid: i32) -> String {
    match Process::new(pid).and_then(|p| p.cmdline()) {
        Ok(parts) => parts.join(" "),
        Err(e) => {
            log!(LogLevel::Trace, "Failed to resolve cmdline for pid {}: {}", pid, e);
            String::new()
        }
    }
}

/// Whether `line` (one line of `ss -tlnp` output) names `port` in its local-address
/// column. Shared with [`crate::prober::is_port_listening`]'s `ss` fallback so both
/// paths agree on what counts as a match.
pub(crate) fn line_matches_port(line: &str, port: u16) -> bool {
    line.split_whitespace()
        .nth(3)
        .and_then(extract_port)
        .map(|p| p == port)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_port_from_wildcard_form() {
        assert_eq!(extract_port("*:8080"), Some(8080));
    }

    #[test]
    fn extracts_port_from_ipv4_bind_all() {
        assert_eq!(extract_port("0.0.0.0:8080"), Some(8080));
    }

    #[test]
    fn extracts_port_from_ipv6_bracketed_form() {
        assert_eq!(extract_port("[::1]:8080"), Some(8080));
    }

    #[test]
    fn extracts_port_from_ipv6_wildcard() {
        assert_eq!(extract_port(":::8080"), Some(8080));
    }

    #[test]
    fn strips_trailing_annotation() {
        assert_eq!(extract_port("127.0.0.1:8080(LISTEN)"), Some(8080));
    }

    #[test]
    fn rejects_out_of_range_port() {
        assert_eq!(extract_port("127.0.0.1:70000"), None);
    }

    #[test]
    fn rejects_non_numeric_port() {
        assert_eq!(extract_port("127.0.0.1:http"), None);
    }

    #[test]
    fn parses_pid_from_socket_stats_field() {
        let (pid, _cmd) = parse_ss_process_field(r#"users:(("nginx",pid=4821,fd=6))"#);
        assert_eq!(pid, Some(4821));
    }

    #[test]
    fn parses_explicit_cmd_equals_form() {
        let (pid, cmd) = parse_ss_process_field("pid=99,cmd=myproc");
        assert_eq!(pid, Some(99));
        assert_eq!(cmd.as_deref(), Some("myproc"));
    }

    #[test]
    fn line_matches_port_reads_fourth_column() {
        let line = "LISTEN 0 128 0.0.0.0:8080 0.0.0.0:* users:((\"nginx\",pid=1,fd=6))";
        assert!(line_matches_port(line, 8080));
        assert!(!line_matches_port(line, 9090));
    }
}
