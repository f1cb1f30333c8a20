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
    receiver::ReceiverContext, stream::Error, AcceptArgs, AuthArgs, AuthError, Credentials,
    EhloArgs, HeloArgs, MailFromArgs, ParseArgsError, RcptToArgs, Stage, UnparsedArgs, Verb,
};
use aliasrelay_common::{CodeID, Reply};

/// Trait to implement to handle the SMTP commands in pair with the [`Receiver`](crate::Receiver).
#[async_trait::async_trait]
pub trait ReceiverHandler {
    /// The [`Receiver`](crate::Receiver) does not store the context.
    /// This function is called after each command to get the context stage.
    fn get_stage(&self) -> Stage;

    /// The reply configured for the code.
    fn reply(&self, code: CodeID) -> Reply;

    /// Called when the client connects to the server.
    async fn on_accept(&mut self, ctx: &mut ReceiverContext, args: AcceptArgs) -> Reply;

    /// Called after receiving a [`Verb::Auth`] command.
    ///
    /// Return `None` after calling [`ReceiverContext::authenticate`] to start the
    /// exchange, or the reply refusing it.
    async fn on_auth(&mut self, ctx: &mut ReceiverContext, args: AuthArgs) -> Option<Reply>;

    /// Called at the end of the SASL exchange, the credentials have to be verified here.
    async fn on_post_auth(
        &mut self,
        ctx: &mut ReceiverContext,
        result: Result<Credentials, AuthError>,
    ) -> Reply;

    /// Called after receiving a [`Verb::Helo`] command.
    async fn on_helo(&mut self, ctx: &mut ReceiverContext, args: HeloArgs) -> Reply;

    /// Called after receiving a [`Verb::Ehlo`] command.
    async fn on_ehlo(&mut self, ctx: &mut ReceiverContext, args: EhloArgs) -> Reply;

    /// Called after receiving a [`Verb::MailFrom`] command.
    async fn on_mail_from(&mut self, ctx: &mut ReceiverContext, args: MailFromArgs) -> Reply;

    /// Called after receiving a [`Verb::RcptTo`] command.
    async fn on_rcpt_to(&mut self, ctx: &mut ReceiverContext, args: RcptToArgs) -> Reply;

    /// Called after receiving a [`Verb::Data`] command.
    /// The stream is the body of the message, with dot-stuffing handled.
    /// The stream return `None` when the message is finished (`.<CRLF>`).
    ///
    /// The stream must be consumed to the end, the next command follows it.
    async fn on_message(
        &mut self,
        ctx: &mut ReceiverContext,
        stream: impl tokio_stream::Stream<Item = Result<Vec<u8>, Error>> + Send + Unpin,
    ) -> Reply;

    /// Called when the number of reply considered as error reached a threshold (hard).
    async fn on_hard_error(&mut self, ctx: &mut ReceiverContext, reply: Reply) -> Reply;

    /// Called when the number of reply considered as error reached a threshold (soft).
    async fn on_soft_error(&mut self, ctx: &mut ReceiverContext, reply: Reply) -> Reply;

    /// Called after receiving a [`Verb::Rset`] command.
    async fn on_rset(&mut self) -> Reply;

    /// Called after receiving a [`Verb::Data`] command.
    async fn on_data(&mut self) -> Reply {
        self.reply(CodeID::DataStart)
    }

    /// Called after receiving a [`Verb::Quit`] command.
    async fn on_quit(&mut self) -> Reply {
        self.reply(CodeID::Closing)
    }

    /// Called after receiving a [`Verb::Noop`] command.
    async fn on_noop(&mut self) -> Reply {
        self.reply(CodeID::Ok)
    }

    /// Called after receiving a [`Verb::Help`] command.
    async fn on_help(&mut self, _: UnparsedArgs) -> Reply {
        self.reply(CodeID::Help)
    }

    /// Called after receiving an unknown command (unrecognized or unimplemented).
    async fn on_unknown(&mut self, buffer: Vec<u8>) -> Reply {
        let unimplemented_command = [b"VRFY" as &[u8], b"EXPN", b"TURN", b"STARTTLS"];

        if unimplemented_command
            .iter()
            .any(|c| buffer.len() >= c.len() && buffer[..c.len()].eq_ignore_ascii_case(c))
        {
            self.reply(CodeID::Unimplemented)
        } else {
            self.reply(CodeID::UnrecognizedCommand)
        }
    }

    /// Called when the stage of the transaction (obtained with [`get_stage`](Self::get_stage))
    /// and the command are not compatible.
    async fn on_bad_sequence(&mut self, _: (Verb, Stage)) -> Reply {
        self.reply(CodeID::BadSequence)
    }

    /// Called when an argument of a command is invalid.
    async fn on_args_error(&mut self, error: ParseArgsError) -> Reply {
        tracing::debug!(%error, "Invalid arguments.");
        match error {
            ParseArgsError::InvalidMechanism(_) => self.reply(CodeID::AuthMechNotSupported),
            _ => self.reply(CodeID::SyntaxErrorParams),
        }
    }
}
