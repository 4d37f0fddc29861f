/*
 * FeatherMail SMTP server framework
 * Copyright (C) 2022 viridIT SAS
 *
 * This program is free software: you can redistribute it and/or modify it under
 * the terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or any later version.
 *
 * This program is distributed in the hope that it will be useful, but WITHOUT
 * ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
 * FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * this program. If not, see https://www.gnu.org/licenses/.
 *
*/

//! The mail logging stage: pass-through on every phase, one line per
//! event to each configured backend. Backend failures never reach the
//! pipeline.

use crate::stage::{Stage, Verdict};
use feather_common::auth::Credentials;
use feather_common::{Address, ClientName, Meta, TerminateReason};

/// Where the mail log lines go.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum LogBackendConfig {
    /// Through the process `tracing` output.
    Console,
    /// Appended to a file.
    File {
        /// Path of the log file.
        path: std::path::PathBuf,
    },
}

#[derive(Debug)]
enum Backend {
    Console,
    File(std::path::PathBuf),
}

impl Backend {
    fn write_line(&self, line: &str) {
        match self {
            Self::Console => tracing::info!(target: "feather::mail", "{line}"),
            Self::File(path) => {
                let written = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .and_then(|mut file| {
                        std::io::Write::write_all(&mut file, line.as_bytes())
                            .and_then(|()| std::io::Write::write_all(&mut file, b"\n"))
                    });
                if let Err(error) = written {
                    tracing::warn!(path = %path.display(), %error, "Mail log write failure.");
                }
            }
        }
    }
}

/// Logs every phase of the session under a unique 8-hex session id with
/// monotonic millisecond timings.
#[derive(Debug)]
pub struct MailLogger {
    session_id: String,
    started: std::time::Instant,
    backends: Vec<Backend>,
    sanitize: bool,
}

impl MailLogger {
    ///
    #[must_use]
    pub fn new(backends: &[LogBackendConfig], sanitize: bool) -> Self {
        Self {
            session_id: format!("{:08x}", rand::random::<u32>()),
            started: std::time::Instant::now(),
            backends: backends
                .iter()
                .map(|config| match config {
                    LogBackendConfig::Console => Backend::Console,
                    LogBackendConfig::File { path } => Backend::File(path.clone()),
                })
                .collect(),
            sanitize,
        }
    }

    /// Session id shown in every line.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    fn emit(&self, event: &str, detail: &str) {
        let elapsed = self.started.elapsed().as_millis();
        let line = format!("[{}] +{elapsed}ms {event} {detail}", self.session_id);
        for backend in &self.backends {
            backend.write_line(&line);
        }
    }
}

#[async_trait::async_trait]
impl Stage for MailLogger {
    fn kind(&self) -> &'static str {
        "mail_logger"
    }

    async fn helo(&mut self, client_name: &ClientName, meta: &mut Meta) -> anyhow::Result<Verdict> {
        self.emit("helo", &format!("peer={} name={client_name}", meta.peer_ip));
        Ok(Verdict::Continue)
    }

    async fn auth(&mut self, credentials: &Credentials, _: &mut Meta) -> anyhow::Result<Verdict> {
        let password = if self.sanitize {
            "***"
        } else {
            credentials.authpass.as_str()
        };
        self.emit(
            "auth",
            &format!("user={} password={password}", credentials.authid),
        );
        Ok(Verdict::Continue)
    }

    async fn mail(&mut self, from: Option<&Address>, _: &mut Meta) -> anyhow::Result<Verdict> {
        self.emit(
            "mail",
            &from.map_or_else(|| "from=<>".to_string(), |from| format!("from={from}")),
        );
        Ok(Verdict::Continue)
    }

    async fn rcpt(&mut self, rcpt: &Address, _: &mut Meta) -> anyhow::Result<Verdict> {
        self.emit("rcpt", &format!("to={rcpt}"));
        Ok(Verdict::Continue)
    }

    async fn data(&mut self, raw: &[u8], meta: &mut Meta) -> anyhow::Result<Verdict> {
        self.emit(
            "data",
            &format!("bytes={} recipients={}", raw.len(), meta.to.len()),
        );
        Ok(Verdict::Continue)
    }

    async fn terminate(&mut self, reason: TerminateReason, _: &Meta) {
        self.emit("terminate", &format!("reason={reason}"));
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    #[tokio::test]
    async fn logs_are_written_and_sanitized() {
        let path = std::env::temp_dir().join(format!(
            "feather-maillog-{:08x}.log",
            rand::random::<u32>()
        ));
        let mut stage = MailLogger::new(
            &[LogBackendConfig::File { path: path.clone() }],
            true,
        );
        let mut meta = Meta::new("192.0.2.1".parse().unwrap());

        let credentials = Credentials {
            authid: "alice".to_string(),
            authpass: "hunter2".to_string(),
        };
        assert_eq!(
            stage.auth(&credentials, &mut meta).await.unwrap(),
            Verdict::Continue
        );
        stage.terminate(TerminateReason::Normal, &meta).await;

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("auth user=alice password=***"));
        assert!(!content.contains("hunter2"));
        assert!(content.contains("terminate reason=normal"));
        assert!(content.contains(&format!("[{}]", stage.session_id())));

        std::fs::remove_file(&path).unwrap();
    }

    #[tokio::test]
    async fn unsanitized_auth_keeps_password() {
        let path = std::env::temp_dir().join(format!(
            "feather-maillog-{:08x}.log",
            rand::random::<u32>()
        ));
        let mut stage = MailLogger::new(
            &[LogBackendConfig::File { path: path.clone() }],
            false,
        );
        let mut meta = Meta::new("192.0.2.1".parse().unwrap());

        let credentials = Credentials {
            authid: "alice".to_string(),
            authpass: "hunter2".to_string(),
        };
        stage.auth(&credentials, &mut meta).await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("password=hunter2"));

        std::fs::remove_file(&path).unwrap();
    }

    #[tokio::test]
    async fn unwritable_backend_fails_open() {
        let mut stage = MailLogger::new(
            &[LogBackendConfig::File {
                path: std::path::PathBuf::from("/nonexistent/dir/mail.log"),
            }],
            true,
        );
        let mut meta = Meta::new("192.0.2.1".parse().unwrap());

        // the pipeline never observes the backend failure
        assert_eq!(
            stage
                .helo(&ClientName::Domain("x".to_string()), &mut meta)
                .await
                .unwrap(),
            Verdict::Continue
        );
    }

    #[test]
    fn session_ids_are_8_hex() {
        let stage = MailLogger::new(&[], true);
        assert_eq!(stage.session_id().len(), 8);
        assert!(stage
            .session_id()
            .chars()
            .all(|c| c.is_ascii_hexdigit()));
    }
}
