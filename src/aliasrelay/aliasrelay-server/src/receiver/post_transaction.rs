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
use super::handler::Handler;
use aliasrelay_common::{CodeID, Reply, Status, NULL_SENDER};
use aliasrelay_handler::Envelope;
use aliasrelay_mail_parser::{MailParser, MimeParser};
use aliasrelay_protocol::{ConnectionKind, Error};
use tokio_stream::StreamExt;

impl Handler {
    /// Read the body, then hand the transaction to the relay core.
    pub(super) async fn on_message_inner(
        &mut self,
        mut stream: impl tokio_stream::Stream<Item = Result<Vec<u8>, Error>> + Send + Unpin,
    ) -> Reply {
        let mut raw = Vec::new();
        let mut too_long = false;
        // the stream is consumed to the end even after an error
        while let Some(line) = stream.next().await {
            match line {
                Ok(line) if !too_long => raw.extend_from_slice(&line),
                Ok(_) => {}
                Err(Error::BufferTooLong { expected, got }) => {
                    tracing::warn!(expected, got, "Message too long.");
                    too_long = true;
                }
                Err(Error::Io(error)) => {
                    tracing::warn!(%error, "Connection failure while reading the message.");
                    self.reset_transaction();
                    return self.reply_in_config(CodeID::Failure);
                }
            }
        }

        let transaction = std::mem::take(&mut self.transaction);
        self.reset_transaction();

        if too_long {
            return self.reply_in_config(CodeID::MessageSizeExceeded);
        }

        let msg = match MimeParser.parse_sync(&raw) {
            Ok(msg) => msg,
            Err(error) => {
                tracing::warn!(%error, "Cannot parse the message.");
                return Status::E501.to_reply();
            }
        };

        let envelope = Envelope {
            mail_from: transaction
                .mail_from
                .unwrap_or_else(|| NULL_SENDER.to_string()),
            rcpt_tos: transaction.rcpt_tos,
            mail_options: transaction.mail_options,
            rcpt_options: transaction.rcpt_options,
        };

        let status = match (self.kind, self.username.as_deref()) {
            (ConnectionKind::Relay, _) => self.context.handle(envelope, msg).await,
            (ConnectionKind::Submission, Some(username)) => {
                self.context
                    .handle_submission(envelope, msg, username)
                    .await
            }
            (ConnectionKind::Submission, None) => {
                return self.reply_in_config(CodeID::AuthRequired);
            }
        };
        tracing::info!(%status, "Message handled.");
        status.to_reply()
    }
}
