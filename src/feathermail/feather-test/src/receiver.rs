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

/// A type implementing Write+Read to emulate a socket: the scripted
/// client input on the read side, everything the server says captured on
/// the write side.
#[derive(Debug)]
pub struct Mock<'a, T: AsRef<[u8]> + Unpin> {
    read_cursor: std::io::Cursor<T>,
    write_cursor: std::io::Cursor<&'a mut Vec<u8>>,
}

impl<'a, T: AsRef<[u8]> + Unpin> Mock<'a, T> {
    /// Create a new instance.
    pub fn new(read: T, write: &'a mut Vec<u8>) -> Self {
        Self {
            read_cursor: std::io::Cursor::new(read),
            write_cursor: std::io::Cursor::new(write),
        }
    }
}

impl<T: AsRef<[u8]> + Unpin> tokio::io::AsyncRead for Mock<'_, T> {
    fn poll_read(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        std::pin::Pin::new(&mut self.read_cursor).poll_read(cx, buf)
    }
}

impl<T: AsRef<[u8]> + Unpin> tokio::io::AsyncWrite for Mock<'_, T> {
    fn poll_write(
        mut self: std::pin::Pin<&mut Self>,
        _: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> std::task::Poll<Result<usize, std::io::Error>> {
        std::task::Poll::Ready(std::io::Write::write(&mut self.write_cursor, buf))
    }

    fn poll_flush(
        mut self: std::pin::Pin<&mut Self>,
        _: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), std::io::Error>> {
        std::task::Poll::Ready(std::io::Write::flush(&mut self.write_cursor))
    }

    fn poll_shutdown(
        self: std::pin::Pin<&mut Self>,
        _: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), std::io::Error>> {
        std::task::Poll::Ready(Ok(()))
    }
}

/// Run one scripted session against the engine and assert the transcript
/// byte for byte. Evaluates to the [`feather_server::Handler`] after
/// termination, for envelope assertions.
///
/// ```ignore
/// let handler = run_test! {
///     input = ["EHLO client.com\r\n", "QUIT\r\n"].concat(),
///     expected = [/* every server line */].concat(),
///     pipeline = r#"[[stage]] kind = "no_auth""#,
/// };
/// ```
#[macro_export]
macro_rules! run_test {
    (
        input = $input:expr,
        expected = $expected:expr
        $(, config = $config:expr)?
        $(, pipeline = $pipeline:expr)?
        $(, spec = $spec:expr)?
        $(, store = $store:expr)?
        $(, peer = $peer:expr)?
        $(, tls_active = $tls_active:expr)?
        $(,)?
    ) => {{
        let expected: String = $expected.to_string();
        let input: Vec<u8> = $input.as_bytes().to_vec();

        let config: std::sync::Arc<feather_config::Config> = {
            let _f = || std::sync::Arc::new($crate::config::local_test()); $(
            let _f = || std::sync::Arc::new($config);                      )?
            _f()
        };
        let spec: std::sync::Arc<feather_pipeline::PipelineSpec> = {
            let _f = || std::sync::Arc::new(feather_pipeline::PipelineSpec::default()); $(
            let _f = || std::sync::Arc::new(
                feather_pipeline::PipelineSpec::from_toml($pipeline).expect("test pipeline is well formed"),
            ); )? $(
            let _f = || $spec;                                                          )?
            _f()
        };
        let store: std::sync::Arc<feather_store::TtlStore> = {
            let _f = || std::sync::Arc::new(feather_store::TtlStore::new()); $(
            let _f = || $store;                                              )?
            _f()
        };
        let peer: std::net::IpAddr = {
            let _f = || -> std::net::IpAddr { "192.0.2.1".parse().unwrap() }; $(
            let _f = || -> std::net::IpAddr { $peer.parse().unwrap() };       )?
            _f()
        };

        #[allow(unused_mut)]
        let mut handler = feather_server::Handler::new(
            config.clone(),
            None,
            spec,
            store,
            peer,
            1,
        );
        $( if $tls_active { handler = handler.with_tls_active(); } )?

        let mut written_data = Vec::new();
        let mock = $crate::receiver::Mock::new(input, &mut written_data);
        let (read, write) = tokio::io::split(mock);

        let receiver = feather_protocol::Receiver::from_parts(
            read,
            write,
            feather_protocol::ConnectionKind::Relay,
            handler,
            config.server.smtp.error.soft_count,
            config.server.smtp.error.hard_count,
            config.server.session_options.max_message_size,
            config.server.smtp.timeout_client,
        );

        let (mut handler, result) = receiver
            .receive_parts(
                "192.0.2.1:53844".parse().expect("valid socket addr"),
                "127.0.0.1:25".parse().expect("valid socket addr"),
            )
            .await;

        let reason = match &result {
            Ok(reason) => *reason,
            Err(_) => feather_common::TerminateReason::Fatal,
        };
        feather_protocol::ReceiverHandler::on_terminate(&mut handler, reason).await;

        pretty_assertions::assert_eq!(
            expected,
            std::str::from_utf8(&written_data).unwrap(),
        );

        handler
    }};
}
