//! End-of-run notifications.
//!
//! [`SendmailNotifier`] pipes a complete RFC 822 message into a
//! sendmail-compatible command and bounds the wait with a timeout.

use std::io::Write;
use std::process::{Command, Stdio};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, warn};
use wait_timeout::ChildExt;

use crate::io::config::NotifyConfig;

pub trait Notifier {
    fn send(&self, subject: &str, body: &str) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct SendmailNotifier {
    command: Vec<String>,
    from: String,
    recipients: Vec<String>,
    timeout: Duration,
}

impl SendmailNotifier {
    pub fn from_config(cfg: &NotifyConfig) -> Self {
        Self {
            command: cfg.command.clone(),
            from: cfg.from.clone(),
            recipients: cfg.recipients.clone(),
            timeout: Duration::from_secs(cfg.timeout_secs),
        }
    }

    fn message(&self, subject: &str, body: &str) -> String {
        format!(
            "From: {}\nTo: {}\nSubject: {}\nContent-Type: text/plain; charset=utf-8\n\n{}\n",
            self.from,
            self.recipients.join(", "),
            subject,
            body.trim_end()
        )
    }
}

impl Notifier for SendmailNotifier {
    fn send(&self, subject: &str, body: &str) -> Result<()> {
        if self.recipients.is_empty() {
            debug!("no notification recipients configured");
            return Ok(());
        }
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| anyhow!("notify command is empty"))?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("spawn {program}"))?;

        {
            let mut stdin = child
                .stdin
                .take()
                .ok_or_else(|| anyhow!("{program} stdin unavailable"))?;
            stdin
                .write_all(self.message(subject, body).as_bytes())
                .with_context(|| format!("write message to {program}"))?;
        }

        let status = match child
            .wait_timeout(self.timeout)
            .with_context(|| format!("wait for {program}"))?
        {
            Some(status) => status,
            None => {
                warn!(program = %program, timeout_secs = self.timeout.as_secs(), "notifier timed out");
                child.kill().with_context(|| format!("kill {program}"))?;
                child.wait().with_context(|| format!("reap {program}"))?;
                return Err(anyhow!("{program} timed out after {:?}", self.timeout));
            }
        };
        if !status.success() {
            return Err(anyhow!("{program} failed with status {:?}", status.code()));
        }
        debug!(recipients = self.recipients.len(), "notification sent");
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn notifier(command: &[&str], recipients: &[&str]) -> SendmailNotifier {
        SendmailNotifier::from_config(&NotifyConfig {
            command: command.iter().map(|part| part.to_string()).collect(),
            recipients: recipients.iter().map(|part| part.to_string()).collect(),
            timeout_secs: 5,
            ..NotifyConfig::default()
        })
    }

    #[test]
    fn message_is_piped_to_command() {
        let temp = tempfile::tempdir().expect("tempdir");
        let out = temp.path().join("mail.txt");
        let script = format!("cat > {}", out.display());
        let notifier = notifier(&["sh", "-c", &script], &["a@example.org", "b@example.org"]);

        notifier.send("subject line", "body text\n").expect("send");

        let sent = std::fs::read_to_string(&out).expect("read");
        assert!(sent.contains("To: a@example.org, b@example.org\n"));
        assert!(sent.contains("Subject: subject line\n"));
        assert!(sent.ends_with("\n\nbody text\n"));
    }

    #[test]
    fn failing_command_is_an_error() {
        let notifier = notifier(&["sh", "-c", "cat > /dev/null; exit 3"], &["a@example.org"]);
        let err = notifier.send("s", "b").unwrap_err();
        assert!(err.to_string().contains("failed with status Some(3)"));
    }

    #[test]
    fn no_recipients_skips_command() {
        let notifier = notifier(&["/nonexistent/sendmail"], &[]);
        notifier.send("s", "b").expect("skipped");
    }
}
