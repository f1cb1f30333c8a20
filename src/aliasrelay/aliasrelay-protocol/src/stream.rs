/*
 * aliasrelay email alias relay
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
use crate::command::{parse_command, Command};
use crate::{UnparsedArgs, Verb};
use tokio::io::AsyncReadExt;

fn find(bytes: &[u8], search: &[u8]) -> Option<usize> {
    bytes
        .windows(search.len())
        .position(|window| window == search)
}

// RFC5321 4.5.3.1.4, including the verb and the CRLF
const COMMAND_LINE_MAX: usize = 512;

// text lines are limited to 1000 bytes, but not every sender comply
const LINE_MAX: usize = 1 << 20;

/// The bytes read but not consumed yet are kept between two streams, so a client
/// pipelining its commands does not lose them.
pub struct Stream<R: tokio::io::AsyncRead + Unpin + Send> {
    pub(super) inner: R,
    buffer: bytes::BytesMut,
    additional_reserve: usize,
}

/// Error while processing the TCP/IP stream.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The buffer is longer than expected.
    #[error("buffer is not supposed to be longer than {expected} bytes but got {got}")]
    BufferTooLong {
        /// Maximum size expected.
        expected: usize,
        /// Actual size.
        got: usize,
    },
    /// Other IO error.
    #[error("{0}")]
    Io(#[from] std::io::Error),
}

impl<R: tokio::io::AsyncRead + Unpin + Send> Stream<R> {
    #[must_use]
    pub fn new(tcp_stream: R) -> Self {
        Self {
            inner: tcp_stream,
            buffer: bytes::BytesMut::new(),
            additional_reserve: 100,
        }
    }

    pub fn as_line_stream(
        &mut self,
    ) -> impl tokio_stream::Stream<Item = std::io::Result<Vec<u8>>> + '_ {
        async_stream::try_stream! {
            loop {
                if let Some(pos) = find(&self.buffer, b"\r\n") {
                    let out = self.buffer.split_to(pos + 2);
                    yield Vec::<u8>::from(out);
                } else if self.buffer.len() > LINE_MAX {
                    self.buffer.clear();
                    Err::<(), _>(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        format!("line longer than {LINE_MAX} bytes"),
                    ))?;
                } else {
                    self.buffer.reserve(self.additional_reserve);
                    let read_size = self.inner.read_buf(&mut self.buffer).await?;
                    if read_size == 0 {
                        if !self.buffer.is_empty() {
                            tracing::debug!(
                                "Connection closed with {} bytes without line ending.",
                                self.buffer.len()
                            );
                            self.buffer.clear();
                        }
                        return;
                    }
                }
            }
        }
    }

    /// The lines of the `DATA` section, with the dot-stuffing removed.
    ///
    /// When the message exceed `size_limit` the rest is still consumed until the
    /// final `.<CRLF>`, so the next command is read correctly, and the last item is
    /// an [`Error::BufferTooLong`].
    pub fn as_message_stream(
        &mut self,
        size_limit: usize,
    ) -> impl tokio_stream::Stream<Item = Result<Vec<u8>, Error>> + '_ {
        async_stream::stream! {
            let mut size = 0;

            for await line in self.as_line_stream() {
                let mut line = match line {
                    Ok(line) => line,
                    Err(error) => {
                        yield Err(Error::Io(error));
                        return;
                    }
                };

                if line == b".\r\n" {
                    if size > size_limit {
                        yield Err(Error::BufferTooLong { expected: size_limit, got: size });
                    }
                    return;
                }
                if line.first() == Some(&b'.') {
                    line.remove(0);
                }

                size += line.len();
                if size <= size_limit {
                    yield Ok(line);
                }
            }
        }
    }

    pub fn as_command_stream(
        &mut self,
    ) -> impl tokio_stream::Stream<Item = Result<Command<Verb, UnparsedArgs>, Error>> + '_ {
        async_stream::stream! {
            for await line in self.as_line_stream() {
                let line = match line {
                    Ok(line) => line,
                    Err(error) => {
                        yield Err(Error::Io(error));
                        return;
                    }
                };

                if line.len() > COMMAND_LINE_MAX {
                    yield Err(Error::BufferTooLong { expected: COMMAND_LINE_MAX, got: line.len() });
                    continue;
                }

                yield Ok(parse_command(line));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Error, Stream};
    use tokio_stream::StreamExt;

    #[tokio::test]
    async fn lines() {
        let input = b"EHLO a\r\nMAIL FROM:<a@b.c>\r\npartial".to_vec();
        let mut stream = Stream::new(std::io::Cursor::new(input));

        let lines = Box::pin(stream.as_line_stream())
            .collect::<std::io::Result<Vec<_>>>()
            .await
            .unwrap();
        assert_eq!(
            lines,
            vec![b"EHLO a\r\n".to_vec(), b"MAIL FROM:<a@b.c>\r\n".to_vec()]
        );
    }

    #[tokio::test]
    async fn message_dot_stuffing() {
        let input = b"Subject: a\r\n\r\n..line\r\n.\r\nQUIT\r\n".to_vec();
        let mut stream = Stream::new(std::io::Cursor::new(input));

        let message = Box::pin(stream.as_message_stream(1000))
            .collect::<Result<Vec<_>, Error>>()
            .await
            .unwrap()
            .concat();
        assert_eq!(message, b"Subject: a\r\n\r\n.line\r\n");

        let (verb, _) = Box::pin(stream.as_command_stream())
            .next()
            .await
            .unwrap()
            .unwrap();
        assert_eq!(verb, crate::Verb::Quit);
    }

    #[tokio::test]
    async fn message_too_long_is_drained() {
        let input = b"0123456789\r\n0123456789\r\n.\r\nQUIT\r\n".to_vec();
        let mut stream = Stream::new(std::io::Cursor::new(input));

        let items = Box::pin(stream.as_message_stream(15))
            .collect::<Vec<_>>()
            .await;
        assert_eq!(items.len(), 2);
        assert!(matches!(
            items[1],
            Err(Error::BufferTooLong {
                expected: 15,
                got: 24
            })
        ));

        let (verb, _) = Box::pin(stream.as_command_stream())
            .next()
            .await
            .unwrap()
            .unwrap();
        assert_eq!(verb, crate::Verb::Quit);
    }
}
