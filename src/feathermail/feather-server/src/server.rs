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

use crate::Handler;
use feather_common::{CodeId, TerminateReason};
use feather_config::{get_rustls_config, Config, TlsMode};
use feather_pipeline::PipelineHandle;
use feather_protocol::{rustls, ConnectionKind, Receiver, ReceiverHandler};

/// TCP/IP server: binds, accepts, spawns one session task per client.
pub struct Server {
    config: std::sync::Arc<Config>,
    tls_config: Option<std::sync::Arc<rustls::ServerConfig>>,
    pipeline: PipelineHandle,
    store: std::sync::Arc<feather_store::TtlStore>,
}

/// Create a `TcpListener` ready to be consumed by [`Server::listen_and_serve`].
///
/// # Errors
///
/// * failed to bind to the socket address
/// * failed to set the listener to non blocking
pub fn socket_bind_anyhow<A: std::net::ToSocketAddrs + std::fmt::Debug>(
    addr: A,
) -> anyhow::Result<std::net::TcpListener> {
    let socket = std::net::TcpListener::bind(&addr)
        .map_err(|e| anyhow::anyhow!("Failed to bind socket on addr: '{addr:?}': {e}"))?;

    socket
        .set_nonblocking(true)
        .map_err(|e| anyhow::anyhow!("Failed to set non-blocking socket on addr: '{addr:?}': {e}"))?;

    Ok(socket)
}

impl Server {
    /// Create a server over the current pipeline handle and the
    /// process-wide store.
    ///
    /// # Errors
    ///
    /// * TLS is enabled but the certificate/key material is unusable
    pub fn new(
        config: std::sync::Arc<Config>,
        pipeline: PipelineHandle,
        store: std::sync::Arc<feather_store::TtlStore>,
    ) -> anyhow::Result<Self> {
        let tls_config = match config.server.session_options.tls {
            TlsMode::Never => None,
            TlsMode::Always | TlsMode::IfAvailable => Some(std::sync::Arc::new(
                get_rustls_config(&config.server.session_options)?,
            )),
        };

        Ok(Self {
            config,
            tls_config,
            pipeline,
            store,
        })
    }

    /// Accept clients forever.
    ///
    /// # Errors
    ///
    /// * the listener failed
    pub async fn listen_and_serve(self, listener: std::net::TcpListener) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::from_std(listener)?;
        tracing::info!(addr = %listener.local_addr()?, "Listening for clients.");

        let client_counter =
            std::sync::Arc::new(std::sync::atomic::AtomicI64::new(0));
        let mut session_counter: i64 = 0;

        loop {
            let (mut stream, client_addr) = listener.accept().await?;
            session_counter += 1;

            tracing::debug!(client = %client_addr, session = session_counter, "Client accepted.");

            if self.config.server.client_count_max != -1
                && client_counter.load(std::sync::atomic::Ordering::SeqCst)
                    >= self.config.server.client_count_max
            {
                if let Err(e) = tokio::io::AsyncWriteExt::write_all(
                    &mut stream,
                    self.config
                        .server
                        .smtp
                        .reply(CodeId::ConnectionMaxReached)
                        .fold()
                        .as_bytes(),
                )
                .await
                {
                    tracing::warn!(error = %e, "Greeting refusal failure.");
                }
                if let Err(e) = tokio::io::AsyncWriteExt::shutdown(&mut stream).await {
                    tracing::warn!(error = %e, "Socket shutdown failure.");
                }
                continue;
            }

            client_counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);

            let session = Self::run_session(
                stream,
                client_addr,
                self.config.clone(),
                self.tls_config.clone(),
                // the pipeline snapshot taken here stays with the session,
                // hot reloads only affect later sessions
                self.pipeline.snapshot(),
                self.store.clone(),
                session_counter,
            );
            let client_counter = client_counter.clone();
            tokio::spawn(async move {
                if let Err(e) = session.await {
                    tracing::warn!(error = %e, "Session failure.");
                }
                client_counter.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
            });
        }
    }

    /// Run one whole session, termination hooks included.
    ///
    /// # Errors
    ///
    /// * the socket failed
    pub async fn run_session(
        stream: tokio::net::TcpStream,
        client_addr: std::net::SocketAddr,
        config: std::sync::Arc<Config>,
        tls_config: Option<std::sync::Arc<rustls::ServerConfig>>,
        spec: std::sync::Arc<feather_pipeline::PipelineSpec>,
        store: std::sync::Arc<feather_store::TtlStore>,
        session_count: i64,
    ) -> anyhow::Result<()> {
        let begin = std::time::Instant::now();
        let server_addr = stream.local_addr()?;

        let kind = if config.server.session_options.tls == TlsMode::Always {
            ConnectionKind::Tunneled
        } else {
            ConnectionKind::Relay
        };

        let handler = Handler::new(
            config.clone(),
            tls_config,
            spec,
            store,
            client_addr.ip(),
            session_count,
        );

        let receiver = Receiver::new(
            stream,
            kind,
            handler,
            config.server.smtp.error.soft_count,
            config.server.smtp.error.hard_count,
            config.server.session_options.max_message_size,
            config.server.smtp.timeout_client,
        );

        let (mut handler, result) = receiver.receive(client_addr, server_addr).await;

        let reason = match &result {
            Ok(reason) => *reason,
            Err(error) => match error.kind() {
                std::io::ErrorKind::UnexpectedEof
                | std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::BrokenPipe => TerminateReason::ClientDisconnect,
                _ => TerminateReason::Fatal,
            },
        };
        handler.on_terminate(reason).await;

        let elapsed = begin.elapsed();
        match &result {
            Ok(_) => {
                tracing::info!(client = %client_addr, ?elapsed, %reason, "Connection closed cleanly.");
            }
            Err(error) => {
                tracing::warn!(client = %client_addr, ?elapsed, %error, "Connection closed with an error.");
            }
        }

        result.map(|_| ()).map_err(anyhow::Error::from)
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use feather_pipeline::PipelineSpec;

    fn local_config() -> std::sync::Arc<Config> {
        std::sync::Arc::new(Config::from_toml(r#"version_requirement = ">=0.1.0""#).unwrap())
    }

    #[tokio::test]
    async fn accepts_and_greets() {
        let listener = socket_bind_anyhow("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = Server::new(
            local_config(),
            PipelineHandle::new(PipelineSpec::default()),
            std::sync::Arc::new(feather_store::TtlStore::new()),
        )
        .unwrap();

        let serve = tokio::spawn(server.listen_and_serve(listener));

        let mut client = tokio::net::TcpStream::connect(addr).await.unwrap();
        let mut greeting = vec![0_u8; 128];
        let n = tokio::io::AsyncReadExt::read(&mut client, &mut greeting)
            .await
            .unwrap();
        let greeting = String::from_utf8_lossy(&greeting[..n]).to_string();

        assert!(greeting.starts_with("220 localhost feathermail ready 1"), "{greeting}");

        serve.abort();
    }

    #[tokio::test]
    async fn refuses_over_capacity() {
        let listener = socket_bind_anyhow("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let config = std::sync::Arc::new({
            let mut config = Config::from_toml(r#"version_requirement = ">=0.1.0""#).unwrap();
            config.server.client_count_max = 0;
            config
        });

        let server = Server::new(
            config,
            PipelineHandle::new(PipelineSpec::default()),
            std::sync::Arc::new(feather_store::TtlStore::new()),
        )
        .unwrap();
        let serve = tokio::spawn(server.listen_and_serve(listener));

        let mut client = tokio::net::TcpStream::connect(addr).await.unwrap();
        let mut reply = vec![0_u8; 128];
        let n = tokio::io::AsyncReadExt::read(&mut client, &mut reply)
            .await
            .unwrap();

        assert!(String::from_utf8_lossy(&reply[..n])
            .starts_with("554 Cannot process connection, closing"));

        serve.abort();
    }
}
