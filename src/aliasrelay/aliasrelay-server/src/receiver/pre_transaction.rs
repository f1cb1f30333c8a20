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
use aliasrelay_common::{CodeID, Reply, NULL_SENDER};
use aliasrelay_handler::AuthOutcome;
use aliasrelay_protocol::{
    AcceptArgs, AuthArgs, AuthError, ConnectionKind, Credentials, MailFromArgs, RcptToArgs,
    ReceiverContext, Stage,
};

impl Handler {
    pub(super) fn on_accept_inner(&mut self, _: &mut ReceiverContext, args: &AcceptArgs) -> Reply {
        tracing::info!(
            client = %args.client_addr,
            server = %args.server_addr,
            kind = %args.kind,
            uuid = %args.uuid,
            "Connection accepted."
        );
        self.reply_in_config(CodeID::Greetings)
    }

    pub(super) fn on_helo_inner(&mut self, client_name: String, code: CodeID) -> Reply {
        tracing::debug!(%client_name, "Client identified.");
        self.client_name = Some(client_name);
        self.transaction = super::handler::Transaction::default();
        self.stage = Stage::Helo;
        self.reply_in_config(code)
    }

    pub(super) fn on_auth_inner(
        &mut self,
        ctx: &mut ReceiverContext,
        args: AuthArgs,
    ) -> Option<Reply> {
        if self.kind != ConnectionKind::Submission {
            tracing::warn!(mechanism = %args.mechanism, "AUTH on the relay listener.");
            return Some(self.reply_in_config(CodeID::Unimplemented));
        }
        if self.username.is_some() {
            return Some(self.reply_in_config(CodeID::BadSequence));
        }

        self.mechanism = Some(args.mechanism);
        ctx.authenticate(args.mechanism, args.initial_response);
        None
    }

    pub(super) async fn on_post_auth_inner(
        &mut self,
        ctx: &mut ReceiverContext,
        result: Result<Credentials, AuthError>,
    ) -> Reply {
        let mechanism = self
            .mechanism
            .take()
            .map(|m| m.to_string())
            .unwrap_or_default();

        let credentials = match result {
            Ok(credentials) => credentials,
            Err(AuthError::Canceled) => {
                tracing::info!("Authentication canceled by the client.");
                return self.reply_in_config(CodeID::AuthClientCanceled);
            }
            Err(AuthError::Base64 { .. }) => {
                return self.reply_in_config(CodeID::AuthErrorDecode64);
            }
            Err(AuthError::Timeout(_)) => {
                ctx.deny();
                return self.reply_in_config(CodeID::Timeout);
            }
            Err(error) => {
                tracing::warn!(%error, "SASL exchange failed.");
                return self.reply_in_config(CodeID::AuthInvalidCredentials);
            }
        };

        match self
            .authenticator
            .authenticate(&mechanism, &credentials.authid, &credentials.authpass)
            .await
        {
            AuthOutcome::Authenticated { username, .. } => {
                tracing::info!(%username, "Client authenticated.");
                self.username = Some(username);
                self.reply_in_config(CodeID::AuthSucceeded)
            }
            AuthOutcome::Refused(reply) => reply,
        }
    }

    pub(super) fn on_mail_from_inner(&mut self, args: MailFromArgs) -> Reply {
        if self.kind == ConnectionKind::Submission && self.username.is_none() {
            tracing::warn!("MAIL FROM before authentication on the submission listener.");
            return self.reply_in_config(CodeID::AuthRequired);
        }

        self.transaction = super::handler::Transaction {
            mail_from: Some(
                args.reverse_path
                    .unwrap_or_else(|| NULL_SENDER.to_string()),
            ),
            mail_options: args.mail_options,
            ..super::handler::Transaction::default()
        };
        self.stage = Stage::MailFrom;
        self.reply_in_config(CodeID::Ok)
    }

    pub(super) fn on_rcpt_to_inner(&mut self, args: RcptToArgs) -> Reply {
        if self.transaction.rcpt_tos.len() >= self.config.server.smtp.rcpt_count_max {
            tracing::warn!(
                max = self.config.server.smtp.rcpt_count_max,
                "Too many recipients."
            );
            return self.reply_in_config(CodeID::TooManyRecipients);
        }

        self.transaction.rcpt_tos.push(args.forward_path);
        for option in args.rcpt_options {
            if !self.transaction.rcpt_options.contains(&option) {
                self.transaction.rcpt_options.push(option);
            }
        }
        self.stage = Stage::RcptTo;
        self.reply_in_config(CodeID::Ok)
    }
}
