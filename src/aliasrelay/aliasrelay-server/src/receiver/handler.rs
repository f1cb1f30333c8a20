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
use aliasrelay_common::{auth::Mechanism, CodeID, Reply, ReplyCode};
use aliasrelay_config::Config;
use aliasrelay_handler::{RelayContext, SubmissionAuthenticator};
use aliasrelay_protocol::{
    AcceptArgs, AuthArgs, AuthError, ConnectionKind, Credentials, EhloArgs, Error, HeloArgs,
    MailFromArgs, RcptToArgs, ReceiverContext, Stage,
};

/// The envelope received so far.
#[derive(Debug, Default)]
pub(super) struct Transaction {
    pub(super) mail_from: Option<String>,
    pub(super) mail_options: Vec<String>,
    pub(super) rcpt_tos: Vec<String>,
    pub(super) rcpt_options: Vec<String>,
}

/// Bridge between the SMTP [`aliasrelay_protocol::Receiver`] of one connection and the
/// relay core.
pub struct Handler {
    pub(super) config: std::sync::Arc<Config>,
    pub(super) context: std::sync::Arc<RelayContext>,
    pub(super) authenticator: SubmissionAuthenticator,
    pub(super) kind: ConnectionKind,
    pub(super) stage: Stage,
    pub(super) client_name: Option<String>,
    pub(super) mechanism: Option<Mechanism>,
    /// The alias the client authenticated as.
    pub(super) username: Option<String>,
    pub(super) transaction: Transaction,
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handler")
            .field("kind", &self.kind)
            .field("stage", &self.stage)
            .field("username", &self.username)
            .field("transaction", &self.transaction)
            .finish_non_exhaustive()
    }
}

impl Handler {
    ///
    #[must_use]
    pub fn new(
        config: std::sync::Arc<Config>,
        context: std::sync::Arc<RelayContext>,
        authenticator: SubmissionAuthenticator,
        kind: ConnectionKind,
    ) -> Self {
        Self {
            config,
            context,
            authenticator,
            kind,
            stage: Stage::Connect,
            client_name: None,
            mechanism: None,
            username: None,
            transaction: Transaction::default(),
        }
    }

    pub(super) fn reply_in_config(&self, code: CodeID) -> Reply {
        self.config
            .server
            .smtp
            .codes
            .get(&code)
            .cloned()
            .unwrap_or_else(|| {
                tracing::error!(%code, "No reply configured for the code.");
                Reply::new(
                    ReplyCode::Code { code: 451 },
                    "Requested action aborted: local error in processing",
                )
            })
    }

    pub(super) fn reset_transaction(&mut self) {
        self.transaction = Transaction::default();
        if self.stage != Stage::Connect {
            self.stage = Stage::Helo;
        }
    }
}

#[async_trait::async_trait]
impl aliasrelay_protocol::ReceiverHandler for Handler {
    fn get_stage(&self) -> Stage {
        self.stage
    }

    fn reply(&self, code: CodeID) -> Reply {
        self.reply_in_config(code)
    }

    async fn on_accept(&mut self, ctx: &mut ReceiverContext, args: AcceptArgs) -> Reply {
        self.on_accept_inner(ctx, &args)
    }

    async fn on_auth(&mut self, ctx: &mut ReceiverContext, args: AuthArgs) -> Option<Reply> {
        self.on_auth_inner(ctx, args)
    }

    async fn on_post_auth(
        &mut self,
        ctx: &mut ReceiverContext,
        result: Result<Credentials, AuthError>,
    ) -> Reply {
        self.on_post_auth_inner(ctx, result).await
    }

    async fn on_helo(&mut self, _: &mut ReceiverContext, args: HeloArgs) -> Reply {
        self.on_helo_inner(args.client_name, CodeID::Helo)
    }

    async fn on_ehlo(&mut self, _: &mut ReceiverContext, args: EhloArgs) -> Reply {
        let code = match self.kind {
            ConnectionKind::Relay => CodeID::EhloPlain,
            ConnectionKind::Submission => CodeID::EhloSubmission,
        };
        self.on_helo_inner(args.client_name.to_string(), code)
    }

    async fn on_mail_from(&mut self, _: &mut ReceiverContext, args: MailFromArgs) -> Reply {
        self.on_mail_from_inner(args)
    }

    async fn on_rcpt_to(&mut self, _: &mut ReceiverContext, args: RcptToArgs) -> Reply {
        self.on_rcpt_to_inner(args)
    }

    async fn on_message(
        &mut self,
        _: &mut ReceiverContext,
        stream: impl tokio_stream::Stream<Item = Result<Vec<u8>, Error>> + Send + Unpin,
    ) -> Reply {
        self.on_message_inner(stream).await
    }

    async fn on_hard_error(&mut self, ctx: &mut ReceiverContext, reply: Reply) -> Reply {
        tracing::warn!(%reply, "Too many errors, closing the connection.");
        ctx.deny();
        self.reply_in_config(CodeID::TooManyError)
    }

    async fn on_soft_error(&mut self, _: &mut ReceiverContext, reply: Reply) -> Reply {
        tokio::time::sleep(self.config.server.smtp.error.delay).await;
        reply
    }

    async fn on_rset(&mut self) -> Reply {
        self.reset_transaction();
        self.reply_in_config(CodeID::Ok)
    }
}
