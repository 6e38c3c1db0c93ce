//! SSH-login watcher.
//!
//! Follows the system journal for sshd and alerts the operator once for
//! every new `user@ip` pair that logs in successfully.

use chrono::{DateTime, FixedOffset, Utc};
use regex::Regex;
use std::collections::HashSet;
use std::process::Stdio;
use std::sync::LazyLock;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use vpsphere_core::{escape_html, Markup, OutgoingChunk, OutputSink, SessionKey};

use crate::config::SshWatchConfig;

static ACCEPTED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Accepted (password|publickey) for (\S+) from ([0-9A-Fa-f.:]+)")
        .expect("login regex is valid")
});

/// A successful login seen in the journal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshLogin {
    pub user: String,
    pub ip: String,
    pub method: String,
}

impl SshLogin {
    /// Identity used for de-duplication.
    pub fn dedup_key(&self) -> String {
        format!("{}@{}", self.user, self.ip)
    }
}

/// Extract a successful login from one journal line.
pub fn parse_login(line: &str) -> Option<SshLogin> {
    let caps = ACCEPTED.captures(line)?;
    Some(SshLogin {
        method: caps[1].to_string(),
        user: caps[2].to_string(),
        ip: caps[3].to_string(),
    })
}

/// HTML alert text for `login` observed at `at`.
pub fn render_alert(login: &SshLogin, at: DateTime<FixedOffset>, zone_label: &str) -> String {
    format!(
        "🚨 <b><u>WARNING: SSH ACCESS</u></b> 🚨\n\
         ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n\
         👤 <b>User:</b> <code>{}</code>\n\
         🌐 <b>IP:</b> <code>{}</code>\n\
         🔑 <b>Method:</b> <code>{}</code>\n\
         ⏰ <b>Time ({}):</b> <code>{}</code>\n\
         ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n\
         ⚠️ <b>Verify if this login is authorized!</b>",
        escape_html(&login.user),
        escape_html(&login.ip),
        escape_html(&login.method),
        escape_html(zone_label),
        at.format("%Y-%m-%d %H:%M:%S"),
    )
}

pub struct SshWatcher {
    config: SshWatchConfig,
    operator_chat: SessionKey,
    seen: HashSet<String>,
}

impl SshWatcher {
    pub fn new(config: SshWatchConfig, operator_chat: SessionKey) -> Self {
        Self {
            config,
            operator_chat,
            seen: HashSet::new(),
        }
    }

    /// Return the alert for `line` if it reports a login not seen before.
    pub fn observe(&mut self, line: &str, now: DateTime<Utc>) -> Option<String> {
        let login = parse_login(line)?;
        if !self.seen.insert(login.dedup_key()) {
            return None;
        }
        info!(user = %login.user, ip = %login.ip, method = %login.method, "ssh login detected");
        let local = now.with_timezone(&self.config.offset);
        Some(render_alert(&login, local, &self.config.zone_label))
    }

    /// Follow the journal until it ends or `shutdown` fires.
    pub async fn run(mut self, sink: &dyn OutputSink, shutdown: CancellationToken) {
        let command = self.config.command.clone();
        let Some((program, args)) = command.split_first() else {
            warn!("ssh watcher has no command");
            return;
        };
        let mut child = match Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                warn!(program = %program, error = %e, "ssh watcher not started");
                return;
            }
        };
        let Some(stdout) = child.stdout.take() else {
            warn!("ssh watcher stdout unavailable");
            return;
        };
        info!(program = %program, "watching ssh logins");

        let mut lines = BufReader::new(stdout).lines();
        loop {
            let line = tokio::select! {
                line = lines.next_line() => line,
                _ = shutdown.cancelled() => {
                    info!("ssh watcher stopped");
                    break;
                }
            };
            match line {
                Ok(Some(line)) => {
                    if let Some(alert) = self.observe(&line, Utc::now()) {
                        let chunk = OutgoingChunk::Text {
                            key: self.operator_chat,
                            rendered: alert,
                            markup: Markup::Html,
                        };
                        if let Err(e) = sink.deliver(chunk).await {
                            warn!(error = %e, "ssh alert not delivered");
                        }
                    }
                }
                Ok(None) => {
                    warn!("ssh watcher source closed");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "ssh watcher read failed");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use vpsphere_core::sink::MemorySink;

    fn config(command: &[&str]) -> SshWatchConfig {
        SshWatchConfig {
            command: command.iter().map(|s| s.to_string()).collect(),
            offset: FixedOffset::east_opt(8 * 3600).unwrap(),
            zone_label: "WITA".into(),
        }
    }

    const PASSWORD_LINE: &str = "Mar 02 10:00:01 vps sshd[1234]: Accepted password for root from 203.0.113.7 port 51122 ssh2";

    #[test]
    fn parses_password_and_publickey() {
        let login = parse_login(PASSWORD_LINE).unwrap();
        assert_eq!(login.user, "root");
        assert_eq!(login.ip, "203.0.113.7");
        assert_eq!(login.method, "password");

        let key_line = "sshd[9]: Accepted publickey for deploy from 2001:db8::1 port 2201 ssh2: ED25519 SHA256:x";
        let login = parse_login(key_line).unwrap();
        assert_eq!(login.user, "deploy");
        assert_eq!(login.ip, "2001:db8::1");
        assert_eq!(login.method, "publickey");
    }

    #[test]
    fn ignores_other_lines() {
        assert!(parse_login("sshd[1]: Failed password for root from 1.2.3.4 port 22").is_none());
        assert!(parse_login("sshd[1]: Connection closed by 1.2.3.4").is_none());
    }

    #[test]
    fn alert_uses_configured_offset() {
        let mut watcher = SshWatcher::new(config(&["true"]), SessionKey(1));
        let now = Utc.with_ymd_and_hms(2024, 3, 2, 2, 0, 1).unwrap();
        let alert = watcher.observe(PASSWORD_LINE, now).unwrap();
        assert!(alert.contains("<code>root</code>"));
        assert!(alert.contains("Time (WITA)"));
        assert!(alert.contains("2024-03-02 10:00:01"));
    }

    #[test]
    fn same_login_alerts_once() {
        let mut watcher = SshWatcher::new(config(&["true"]), SessionKey(1));
        let now = Utc::now();
        assert!(watcher.observe(PASSWORD_LINE, now).is_some());
        assert!(watcher.observe(PASSWORD_LINE, now).is_none());
        let other_ip = PASSWORD_LINE.replace("203.0.113.7", "198.51.100.2");
        assert!(watcher.observe(&other_ip, now).is_some());
    }

    #[test]
    fn user_is_html_escaped() {
        let login = SshLogin {
            user: "<script>".into(),
            ip: "1.1.1.1".into(),
            method: "password".into(),
        };
        let at = FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
            .unwrap();
        assert!(render_alert(&login, at, "UTC").contains("&lt;script&gt;"));
    }

    #[tokio::test]
    async fn run_alerts_from_command_output() {
        let script = format!("echo '{PASSWORD_LINE}'; echo '{PASSWORD_LINE}'; echo unrelated");
        let watcher = SshWatcher::new(config(&["sh", "-c", &script]), SessionKey(77));
        let sink = MemorySink::new();
        watcher.run(&sink, CancellationToken::new()).await;
        let texts = sink.texts();
        assert_eq!(texts.len(), 1);
        assert!(texts[0].contains("203.0.113.7"));
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let watcher = SshWatcher::new(config(&["sleep", "30"]), SessionKey(1));
        let sink = MemorySink::new();
        let token = CancellationToken::new();
        token.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(5), watcher.run(&sink, token))
            .await
            .unwrap();
        assert!(sink.delivered().is_empty());
    }

    #[tokio::test]
    async fn missing_command_is_not_fatal() {
        let watcher = SshWatcher::new(config(&["/nonexistent/journalctl"]), SessionKey(1));
        let sink = MemorySink::new();
        watcher.run(&sink, CancellationToken::new()).await;
        assert!(sink.delivered().is_empty());
    }
}
