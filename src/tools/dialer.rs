//! Native dial action
//!
//! Fire-and-forget handoff of a `tel:` URI to the host environment.

use std::process::Stdio;

use crate::{Error, Result};

/// Hands a phone number to whatever places calls on this host
pub trait Dialer: Send + Sync {
    /// Start a call to `number`. Returns without observing the outcome.
    fn dial(&self, number: &str);
}

/// Keep only characters a dialer understands: leading `+`, digits, `*`, `#`
///
/// # Errors
///
/// Returns `Error::InvalidNumber` if no digits remain
pub fn dialable_number(number: &str) -> Result<String> {
    let trimmed = number.trim();
    let mut dialable = String::with_capacity(trimmed.len());
    if trimmed.starts_with('+') {
        dialable.push('+');
    }
    dialable.extend(
        trimmed
            .chars()
            .filter(|c| c.is_ascii_digit() || *c == '*' || *c == '#'),
    );

    if dialable.chars().any(|c| c.is_ascii_digit()) {
        Ok(dialable)
    } else {
        Err(Error::InvalidNumber(number.to_string()))
    }
}

/// Dials by spawning a host command
///
/// With no configured command the platform URI opener is used
/// (`open` on macOS, `xdg-open` elsewhere on Unix, `start` on Windows).
/// A configured argv may use `{number}` and `{uri}` placeholders.
#[derive(Debug, Clone, Default)]
pub struct SystemDialer {
    command: Option<Vec<String>>,
}

impl SystemDialer {
    /// Create a dialer with an optional argv template
    #[must_use]
    pub const fn new(command: Option<Vec<String>>) -> Self {
        Self { command }
    }

    /// Build the argv for dialing `number`
    #[must_use]
    pub fn argv(&self, number: &str) -> Vec<String> {
        let uri = format!("tel:{number}");

        match self.command.as_deref() {
            Some([_, ..]) => self
                .command
                .iter()
                .flatten()
                .map(|arg| arg.replace("{number}", number).replace("{uri}", &uri))
                .collect(),
            _ => default_opener(&uri),
        }
    }
}

#[cfg(target_os = "macos")]
fn default_opener(uri: &str) -> Vec<String> {
    vec!["open".to_string(), uri.to_string()]
}

#[cfg(target_os = "windows")]
fn default_opener(uri: &str) -> Vec<String> {
    vec![
        "cmd".to_string(),
        "/C".to_string(),
        "start".to_string(),
        String::new(),
        uri.to_string(),
    ]
}

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
fn default_opener(uri: &str) -> Vec<String> {
    vec!["xdg-open".to_string(), uri.to_string()]
}

impl Dialer for SystemDialer {
    fn dial(&self, number: &str) {
        let argv = self.argv(number);
        let Some((program, args)) = argv.split_first() else {
            tracing::error!("dial command is empty");
            return;
        };

        let mut cmd = tokio::process::Command::new(program);
        cmd.args(args);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::null());
        cmd.stderr(Stdio::null());

        match cmd.spawn() {
            Ok(mut child) => {
                tracing::info!(number, program = %program, "dial handed to host");
                tokio::spawn(async move {
                    match child.wait().await {
                        Ok(status) if !status.success() => {
                            tracing::warn!(%status, "dial command exited with failure");
                        }
                        Err(e) => tracing::warn!(error = %e, "dial command wait failed"),
                        Ok(_) => {}
                    }
                });
            }
            Err(e) => {
                tracing::error!(number, program = %program, error = %e, "failed to spawn dial command");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_formatting_from_numbers() {
        assert_eq!(dialable_number(" +31 (0)6-1234 ").unwrap(), "+31061234");
        assert_eq!(dialable_number("*31#0612").unwrap(), "*31#0612");
    }

    #[test]
    fn rejects_numbers_without_digits() {
        assert!(matches!(dialable_number("call me"), Err(Error::InvalidNumber(_))));
        assert!(matches!(dialable_number("+"), Err(Error::InvalidNumber(_))));
    }

    #[test]
    fn template_substitutes_placeholders() {
        let dialer = SystemDialer::new(Some(vec![
            "adb".to_string(),
            "shell".to_string(),
            "am start -a android.intent.action.CALL -d {uri}".to_string(),
            "{number}".to_string(),
        ]));
        let argv = dialer.argv("+3112345");
        assert_eq!(argv[2], "am start -a android.intent.action.CALL -d tel:+3112345");
        assert_eq!(argv[3], "+3112345");
    }

    #[test]
    fn empty_template_uses_platform_opener() {
        let dialer = SystemDialer::new(Some(Vec::new()));
        let argv = dialer.argv("112");
        assert_eq!(argv.last().map(String::as_str), Some("tel:112"));
    }
}
