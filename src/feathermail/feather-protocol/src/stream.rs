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

use tokio::io::AsyncReadExt;

fn find(bytes: &[u8], search: &[u8]) -> Option<usize> {
    bytes
        .windows(search.len())
        .position(|window| window == search)
}

/// Buffered reader side of the connection.
///
/// Bytes read beyond the line being served are kept in `buffer`, so
/// pipelined input survives switching between the command stream and the
/// message stream.
pub struct Stream<R: tokio::io::AsyncRead + Unpin + Send> {
    pub(crate) inner: R,
    buffer: bytes::BytesMut,
    additional_reserve: usize,
}

/// Error while processing the TCP/IP stream.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The buffer is longer than allowed.
    #[error("buffer is not supposed to be longer than {expected} bytes but got {got}")]
    BufferTooLong {
        /// Maximum size allowed.
        expected: usize,
        /// Actual size.
        got: usize,
    },
    /// Other IO error.
    #[error("{0}")]
    Io(#[from] std::io::Error),
}

impl<R: tokio::io::AsyncRead + Unpin + Send> Stream<R> {
    ///
    #[must_use]
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buffer: bytes::BytesMut::with_capacity(80),
            additional_reserve: 100,
        }
    }

    /// Read one `\r\n` terminated line, terminator included.
    /// `None` on a cleanly closed stream.
    pub async fn next_line(&mut self) -> std::io::Result<Option<Vec<u8>>> {
        loop {
            if let Some(pos) = find(&self.buffer, b"\r\n") {
                let line = self.buffer.split_to(pos + 2);
                return Ok(Some(Vec::<u8>::from(line)));
            }

            self.buffer.reserve(self.additional_reserve);
            let read_size = self.inner.read_buf(&mut self.buffer).await?;
            if read_size == 0 {
                if !self.buffer.is_empty() {
                    tracing::trace!(
                        remaining = self.buffer.len(),
                        "Connection closed mid-line."
                    );
                }
                return Ok(None);
            }
        }
    }

    /// The body of a message: one line per item, dot-stuffing removed.
    /// The stream ends at the `.` terminator line. Going over `size_limit`
    /// cumulated bytes yields one [`Error::BufferTooLong`]; the rest of
    /// the body is then drained up to the terminator so the command
    /// stream does not desynchronize.
    pub fn as_message_stream(
        &mut self,
        size_limit: usize,
    ) -> impl tokio_stream::Stream<Item = Result<Vec<u8>, Error>> + '_ {
        async_stream::stream! {
            let mut size = 0;
            let mut overflowed = false;

            loop {
                let mut line = match self.next_line().await {
                    Ok(Some(line)) => line,
                    Ok(None) => return,
                    Err(error) => {
                        yield Err(Error::Io(error));
                        return;
                    }
                };

                if line == b".\r\n" {
                    return;
                }
                if overflowed {
                    continue;
                }

                if line.first() == Some(&b'.') {
                    line.remove(0);
                }

                size += line.len();
                if size >= size_limit {
                    overflowed = true;
                    yield Err(Error::BufferTooLong { expected: size_limit, got: size });
                    continue;
                }

                yield Ok(line);
            }
        }
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use tokio_stream::StreamExt;

    fn stream_of(input: &[u8]) -> Stream<std::io::Cursor<Vec<u8>>> {
        Stream::new(std::io::Cursor::new(input.to_vec()))
    }

    #[tokio::test]
    async fn lines() {
        let mut stream = stream_of(b"EHLO x\r\nQUIT\r\n");
        assert_eq!(stream.next_line().await.unwrap().unwrap(), b"EHLO x\r\n");
        assert_eq!(stream.next_line().await.unwrap().unwrap(), b"QUIT\r\n");
        assert_eq!(stream.next_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn message_dot_unstuffing() {
        let mut stream = stream_of(b"Subject: hi\r\n\r\n..leading dot\r\n.\r\nQUIT\r\n");

        let body = stream
            .as_message_stream(1024)
            .collect::<Result<Vec<_>, _>>()
            .await
            .unwrap()
            .concat();
        assert_eq!(body, b"Subject: hi\r\n\r\n.leading dot\r\n");

        // bytes after the terminator are still there for the command stream
        assert_eq!(stream.next_line().await.unwrap().unwrap(), b"QUIT\r\n");
    }

    #[tokio::test]
    async fn message_size_cap() {
        let mut input = b"Subject: hi\r\n\r\n".to_vec();
        input.extend(std::iter::repeat(b'x').take(100));
        input.extend_from_slice(b"\r\n.\r\n");
        let mut stream = stream_of(&input);

        let items = stream
            .as_message_stream(50)
            .collect::<Vec<_>>()
            .await;
        assert!(matches!(
            items.last(),
            Some(Err(Error::BufferTooLong { expected: 50, .. }))
        ));
    }
}
