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
use crate::{
    sink::Sink,
    stream::{Error, Stream},
    AcceptArgs, AuthArgs, ConnectionKind, EhloArgs, HeloArgs, MailFromArgs, ParseArgsError,
    RcptToArgs, ReceiverHandler, Stage, Verb,
};
use aliasrelay_common::{auth::Mechanism, CodeID};
use tokio_stream::StreamExt;

enum HandshakeOutcome {
    Message,
    Authenticate {
        mechanism: Mechanism,
        initial_response: Option<Vec<u8>>,
    },
    Quit,
}

pub struct ErrorCounter {
    pub error_count: i64,
    pub threshold_soft_error: i64,
    pub threshold_hard_error: i64,
}

/// An handle to send event from the [`ReceiverHandler`] to the [`Receiver`].
#[derive(Default)]
pub struct ReceiverContext {
    outcome: Option<HandshakeOutcome>,
}

impl ReceiverContext {
    /// Make the [`Receiver`] quit the connection early, and close cleanly.
    pub fn deny(&mut self) {
        self.outcome = Some(HandshakeOutcome::Quit);
    }

    /// Make the [`Receiver`] initialize a SASL exchange.
    pub fn authenticate(&mut self, mechanism: Mechanism, initial_response: Option<Vec<u8>>) {
        self.outcome = Some(HandshakeOutcome::Authenticate {
            mechanism,
            initial_response,
        });
    }
}

/// Limits applied by the [`Receiver`] on the client.
#[derive(Debug, Clone)]
pub struct ReceiverLimits {
    /// Number of errors before [`ReceiverHandler::on_soft_error`], `-1` to disable.
    pub threshold_soft_error: i64,
    /// Number of errors before [`ReceiverHandler::on_hard_error`], `-1` to disable.
    pub threshold_hard_error: i64,
    /// Maximum size of a message, in bytes.
    pub message_size_max: usize,
    /// Delay waiting for the next command.
    pub command_timeout: std::time::Duration,
    /// Delay waiting for each response of the SASL exchange.
    pub auth_timeout: std::time::Duration,
}

/// A SMTP receiver.
pub struct Receiver<T, W, R>
where
    T: ReceiverHandler + Send,
    W: tokio::io::AsyncWrite + Unpin + Send,
    R: tokio::io::AsyncRead + Unpin + Send,
{
    pub(crate) handler: T,
    pub(crate) sink: Sink<W>,
    pub(crate) stream: Stream<R>,
    pub(crate) limits: ReceiverLimits,
    error_counter: ErrorCounter,
    context: ReceiverContext,
    kind: ConnectionKind,
}

impl<T: ReceiverHandler + Send>
    Receiver<T, tokio::net::tcp::OwnedWriteHalf, tokio::net::tcp::OwnedReadHalf>
{
    /// Create a new [`Receiver`] from a TCP/IP stream.
    pub fn new(
        tcp_stream: tokio::net::TcpStream,
        kind: ConnectionKind,
        handler: T,
        limits: ReceiverLimits,
    ) -> Self {
        let (read, write) = tcp_stream.into_split();
        Self::with_io(read, write, kind, handler, limits)
    }
}

impl<T, W, R> Receiver<T, W, R>
where
    T: ReceiverHandler + Send,
    W: tokio::io::AsyncWrite + Unpin + Send,
    R: tokio::io::AsyncRead + Unpin + Send,
{
    /// Create a new [`Receiver`] from any pair of reader and writer.
    pub fn with_io(
        read: R,
        write: W,
        kind: ConnectionKind,
        handler: T,
        limits: ReceiverLimits,
    ) -> Self {
        Self {
            handler,
            sink: Sink::new(write),
            stream: Stream::new(read),
            error_counter: ErrorCounter {
                error_count: 0,
                threshold_soft_error: limits.threshold_soft_error,
                threshold_hard_error: limits.threshold_hard_error,
            },
            limits,
            context: ReceiverContext::default(),
            kind,
        }
    }

    /// Handle the inner stream to produce a [`tokio_stream::Stream`], each item
    /// being a received message.
    pub fn into_stream(
        mut self,
        client_addr: std::net::SocketAddr,
        server_addr: std::net::SocketAddr,
        timestamp: time::OffsetDateTime,
        uuid: uuid::Uuid,
    ) -> impl tokio_stream::Stream<Item = std::io::Result<()>> {
        async_stream::try_stream! {
            let reply_accept = self.handler.on_accept(
                &mut self.context,
                AcceptArgs {
                    client_addr,
                    server_addr,
                    kind: self.kind,
                    timestamp,
                    uuid,
                }
            ).await;

            self.sink
                .send_reply(&mut self.context, &mut self.error_counter, &mut self.handler, reply_accept)
                .await?;

            let produced_context_accept = std::mem::take(&mut self.context);
            if matches!(produced_context_accept.outcome, Some(HandshakeOutcome::Quit)) {
                return;
            }

            loop {
                match self.smtp_handshake().await? {
                    HandshakeOutcome::Message => {
                        let message_stream = self.stream.as_message_stream(self.limits.message_size_max).fuse();
                        tokio::pin!(message_stream);

                        let reply = self.handler.on_message(&mut self.context, message_stream).await;
                        self.sink
                            .send_reply(&mut self.context, &mut self.error_counter, &mut self.handler, reply)
                            .await?;

                        yield ();

                        let produced_context = std::mem::take(&mut self.context);
                        if matches!(produced_context.outcome, Some(HandshakeOutcome::Quit)) {
                            return;
                        }
                    },
                    HandshakeOutcome::Authenticate { mechanism, initial_response } => {
                        let auth_result = self.authenticate(mechanism, initial_response).await;
                        if let Err(error) = &auth_result {
                            tracing::debug!(%error, %mechanism, "SASL exchange failed.");
                        }
                        let closed = matches!(
                            auth_result,
                            Err(crate::AuthError::ConnectionClosed | crate::AuthError::IO(_))
                        );

                        let reply = self.handler.on_post_auth(&mut self.context, auth_result).await;
                        if closed {
                            return;
                        }
                        self.sink
                            .send_reply(&mut self.context, &mut self.error_counter, &mut self.handler, reply)
                            .await?;

                        let produced_context = std::mem::take(&mut self.context);
                        if matches!(produced_context.outcome, Some(HandshakeOutcome::Quit)) {
                            return;
                        }
                    },
                    HandshakeOutcome::Quit => break,
                }
            }
        }
    }

    /// Read the commands until the client sends the message, starts an
    /// authentication or leaves.
    async fn smtp_handshake(&mut self) -> std::io::Result<HandshakeOutcome> {
        macro_rules! handle_args {
            ($args_output:ty, $args:expr, $on_event:tt) => {
                match <$args_output>::try_from($args) {
                    Ok(args) => self.handler.$on_event(&mut self.context, args).await,
                    Err(e) => self.handler.on_args_error(e).await,
                }
            };
            ($args_output:ty, $args:expr, Option: $on_event:tt) => {
                match <$args_output>::try_from($args) {
                    Ok(args) => self.handler.$on_event(&mut self.context, args).await,
                    Err(e) => Some(self.handler.on_args_error(e).await),
                }
            };
        }

        loop {
            let command = {
                let command_stream = self
                    .stream
                    .as_command_stream()
                    .timeout(self.limits.command_timeout);
                tokio::pin!(command_stream);
                command_stream.try_next().await
            };

            let command = match command {
                Ok(Some(command)) => command,
                Ok(None) => return Ok(HandshakeOutcome::Quit),
                Err(elapsed) => {
                    tracing::warn!("Closing after {} without receiving a command", elapsed);
                    let reply = self.handler.reply(CodeID::Timeout);
                    self.sink
                        .send_reply(
                            &mut self.context,
                            &mut self.error_counter,
                            &mut self.handler,
                            reply,
                        )
                        .await?;

                    return Ok(HandshakeOutcome::Quit);
                }
            };

            let (verb, args) = match command {
                Ok(command) => command,
                Err(Error::BufferTooLong { expected, got }) => {
                    let reply = self
                        .handler
                        .on_args_error(ParseArgsError::BufferTooLong { expected, got })
                        .await;
                    self.sink
                        .send_reply(
                            &mut self.context,
                            &mut self.error_counter,
                            &mut self.handler,
                            reply,
                        )
                        .await?;
                    continue;
                }
                Err(Error::Io(io)) => return Err(io),
            };
            tracing::trace!("<< {:?} ; {:?}", verb, std::str::from_utf8(&args.0));

            let stage = self.handler.get_stage();
            let reply = match (verb, stage) {
                (Verb::Helo, _) => Some(handle_args!(HeloArgs, args, on_helo)),
                (Verb::Ehlo, _) => Some(handle_args!(EhloArgs, args, on_ehlo)),
                (Verb::Noop, _) => Some(self.handler.on_noop().await),
                (Verb::Rset, _) => Some(self.handler.on_rset().await),
                (Verb::Auth, Stage::Helo) => {
                    handle_args!(AuthArgs, args, Option: on_auth)
                }
                (Verb::MailFrom, Stage::Helo) => {
                    Some(handle_args!(MailFromArgs, args, on_mail_from))
                }
                (Verb::RcptTo, Stage::MailFrom | Stage::RcptTo) => {
                    Some(handle_args!(RcptToArgs, args, on_rcpt_to))
                }
                (Verb::Data, Stage::RcptTo) => {
                    self.context.outcome = Some(HandshakeOutcome::Message);
                    Some(self.handler.on_data().await)
                }
                (Verb::Quit, _) => {
                    self.context.outcome = Some(HandshakeOutcome::Quit);
                    Some(self.handler.on_quit().await)
                }
                (Verb::Help, _) => Some(self.handler.on_help(args).await),
                (Verb::Unknown, _) => Some(self.handler.on_unknown(args.0).await),
                otherwise => Some(self.handler.on_bad_sequence(otherwise).await),
            };

            if let Some(reply) = reply {
                self.sink
                    .send_reply(
                        &mut self.context,
                        &mut self.error_counter,
                        &mut self.handler,
                        reply,
                    )
                    .await?;
            }

            let produced_context = std::mem::take(&mut self.context);
            if let Some(done) = produced_context.outcome {
                return Ok(done);
            }
        }
    }
}
