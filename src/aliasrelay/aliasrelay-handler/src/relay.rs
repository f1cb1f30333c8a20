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
//! Classification of an inbound transaction and dispatch to the phases.

use crate::{
    bounce::{is_automatic_out_of_office, is_bounce},
    complaint::Provider,
    envelope::Envelope,
    notify::{AlertType, Notification, Template},
    phase::{check_submission_sender, FanOut},
    reverse_alias::is_reverse_alias,
    transform::{get_queue_id, sanitize_headers},
    verp::VerpType,
    HandlerError, HandlerResult, RelayContext,
};
use aliasrelay_common::{utils::sanitize_email, Status};
use aliasrelay_mail_parser::Mail;

/// The status of a transaction from the statuses of its recipients.
///
/// One delivered recipient makes the transaction a success, otherwise the first
/// failure is returned.
#[must_use]
pub fn aggregate(statuses: &[Status]) -> Status {
    let Some(first) = statuses.first() else {
        return Status::E213;
    };
    match statuses.iter().find(|status| status.is_success()) {
        Some(success) => {
            if statuses.iter().any(|status| !status.is_success()) {
                tracing::warn!(?statuses, "Partial delivery, a success is returned.");
            }
            *success
        }
        None => *first,
    }
}

fn status_of_error(error: &HandlerError) -> Status {
    match error {
        HandlerError::CannotCreateContactForReverseAlias(_) => Status::E524,
        HandlerError::Verp(_) => Status::E213,
        _ => Status::E404,
    }
}

/// Outcome of the control addresses (VERP) among the recipients.
enum Control {
    /// The transaction is over.
    Done(Status),
    /// The recipients were rewritten, the message is classified as usual.
    Continue,
}

impl RelayContext {
    /// Handle an inbound transaction of the relay listener.
    ///
    /// Never fails: the errors are mapped to a status the upstream MTA understands.
    #[tracing::instrument(
        name = "relay",
        skip_all,
        fields(id = %uuid::Uuid::new_v4(), mail_from = %envelope.mail_from, rcpt_tos = ?envelope.rcpt_tos)
    )]
    pub async fn handle(&self, envelope: Envelope, msg: Mail) -> Status {
        let start = std::time::Instant::now();
        let queue_id = get_queue_id(&msg);

        let status = match self.try_handle(envelope, msg).await {
            Ok(status) => status,
            Err(error) => {
                let status = status_of_error(&error);
                tracing::error!(%error, %status, "Cannot handle the message.");
                status
            }
        };

        tracing::info!(%status, ?queue_id, elapsed = ?start.elapsed(), "Message handled.");
        status
    }

    /// Handle a message submitted by the authenticated alias `username`.
    #[tracing::instrument(
        name = "submission",
        skip_all,
        fields(id = %uuid::Uuid::new_v4(), username = %username, rcpt_tos = ?envelope.rcpt_tos)
    )]
    pub async fn handle_submission(&self, mut envelope: Envelope, msg: Mail, username: &str) -> Status {
        envelope.sanitize();
        if let Some(refused) = check_submission_sender(&envelope.mail_from, &msg, username) {
            return refused;
        }

        let Some((last, others)) = envelope.rcpt_tos.split_last() else {
            return Status::E213;
        };

        let mut statuses = Vec::with_capacity(envelope.rcpt_tos.len());
        for rcpt_to in others {
            statuses.push(self.submit_to(&envelope, msg.clone(), rcpt_to).await);
        }
        statuses.push(self.submit_to(&envelope, msg, last).await);

        let status = aggregate(&statuses);
        tracing::info!(%status, "Submission handled.");
        status
    }

    async fn submit_to(&self, envelope: &Envelope, msg: Mail, rcpt_to: &str) -> Status {
        match self.handle_smtp(envelope, msg, rcpt_to).await {
            Ok(status) => status,
            Err(error) => {
                tracing::error!(%error, %rcpt_to, "Cannot submit the message.");
                status_of_error(&error)
            }
        }
    }

    async fn warn_reverse_alias_sender(&self, reverse_alias: &str) {
        let Some(contact) = self.store.get_contact_by_reply_email(reverse_alias).await else {
            return;
        };
        let Some(user) = self.store.get_user(contact.user_id).await else {
            return;
        };

        self.notifier
            .send_at_most_times(
                user.id,
                AlertType::FromAddressIsReverseAlias,
                &Notification::new(
                    &user.email,
                    format!("An email was sent from the reverse alias {reverse_alias}"),
                    self.renderer.render(
                        Template::FromAddressIsReverseAlias,
                        &[("reverse_alias", reverse_alias)],
                    ),
                ),
                1,
            )
            .await;
    }

    async fn handle_noreply(&self, mail_from: &str) -> Status {
        let noreply = self.config.app.noreply();
        tracing::warn!(%mail_from, %noreply, "Email sent to the noreply address.");

        let Some(mailbox) = self.store.get_mailbox_by_email(mail_from).await else {
            return Status::E200;
        };
        let Some(user) = self.store.get_user(mailbox.user_id).await else {
            return Status::E200;
        };

        self.notifier
            .send_with_rate_control(
                user.id,
                AlertType::ToNoreply,
                &Notification::new(
                    &mailbox.email,
                    format!("Your email sent to {noreply} was not delivered"),
                    self.renderer.render(
                        Template::ToNoreply,
                        &[
                            ("noreply", &noreply),
                            ("support_name", &self.config.app.support_name),
                            ("url", &self.config.app.url),
                        ],
                    ),
                ),
                self.config.app.alerts.max_per_day,
                1,
                false,
            )
            .await;
        Status::E200
    }

    /// The recipients which are VERP addresses: bounces, automatic answers and
    /// unexpected messages.
    async fn handle_control_recipients(
        &self,
        envelope: &mut Envelope,
        msg: &mut Mail,
        fan_out: &mut FanOut,
    ) -> HandlerResult<Control> {
        for idx in 0..envelope.rcpt_tos.len() {
            let Some(control) = self.verp.parse_control(&envelope.rcpt_tos[idx]) else {
                continue;
            };
            let (verp_type, id) = control?;
            tracing::debug!(%verp_type, id, "Control address recipient.");

            if verp_type == VerpType::Transactional {
                return Ok(Control::Done(
                    self.handle_transactional_bounce(envelope, id, msg).await?,
                ));
            }

            let Some(email_log) = self.store.get_email_log(id).await else {
                tracing::warn!(email_log_id = id, "No such email log, unknown email ignored.");
                return Ok(Control::Done(Status::E213));
            };

            if is_bounce(envelope, msg) {
                return Ok(Control::Done(
                    self.handle_bounce(envelope, id, msg.clone(), fan_out).await?,
                ));
            }

            if !is_automatic_out_of_office(msg) {
                tracing::warn!(email_log_id = id, mail_from = %envelope.mail_from, "Unexpected email sent to a VERP address.");
                return Ok(Control::Done(Status::E213));
            }

            let new_rcpt = if verp_type == VerpType::BounceForward {
                self.store
                    .get_contact(email_log.contact_id)
                    .await
                    .map(|contact| contact.reply_email)
            } else {
                self.store
                    .get_alias(email_log.alias_id)
                    .await
                    .map(|alias| alias.email)
            };
            let Some(new_rcpt) = new_rcpt else {
                return Ok(Control::Done(Status::E512));
            };

            tracing::info!(%new_rcpt, "Out of office answer sent to a VERP address, redirected.");
            msg.add_or_replace_header("To", &new_rcpt);
            msg.delete_header("Reply-To");
            envelope.rcpt_tos[idx] = new_rcpt;
        }
        Ok(Control::Continue)
    }

    async fn handle_recipient(
        &self,
        envelope: &Envelope,
        msg: Mail,
        rcpt_to: &str,
        fan_out: &mut FanOut,
    ) -> HandlerResult<Status> {
        if is_reverse_alias(self.store.as_ref(), self.email_domain(), rcpt_to).await {
            tracing::debug!(%rcpt_to, "Reply phase.");
            self.handle_reply(envelope, msg, rcpt_to, fan_out).await
        } else {
            tracing::debug!(%rcpt_to, "Forward phase.");
            self.handle_forward(envelope, msg, rcpt_to, fan_out).await
        }
    }

    #[allow(clippy::too_many_lines)]
    async fn try_handle(&self, mut envelope: Envelope, mut msg: Mail) -> HandlerResult<Status> {
        envelope.sanitize();
        sanitize_headers(&mut msg);

        if self.config.app.is_ignored(&envelope.mail_from)
            || envelope
                .rcpt_tos
                .iter()
                .any(|rcpt| self.config.app.is_ignored(rcpt))
        {
            tracing::info!("Ignored address.");
            return Ok(Status::E204);
        }

        let from_address = msg
            .get_header_decoded("From")
            .and_then(|from| aliasrelay_mail_parser::parse_full_address(&from).ok())
            .map(|(_, address)| sanitize_email(&address));
        for sender in [Some(envelope.mail_from.clone()), from_address]
            .into_iter()
            .flatten()
        {
            if is_reverse_alias(self.store.as_ref(), self.email_domain(), &sender).await {
                tracing::warn!(%sender, "Email sent from a reverse alias.");
                self.warn_reverse_alias_sender(&sender).await;
            }
        }

        if let Some(unsubscriber) = self.unsubscribe.unsubscriber() {
            if envelope.rcpt_tos.iter().any(|rcpt| rcpt == unsubscriber) {
                tracing::debug!("Unsubscribe request.");
                return self.handle_unsubscribe_from_message(&envelope, &msg).await;
            }
        }

        let mut fan_out = FanOut::default();

        if let Control::Done(status) = self
            .handle_control_recipients(&mut envelope, &mut msg, &mut fan_out)
            .await?
        {
            return Ok(status);
        }

        match self.verp.parse_control(&envelope.mail_from) {
            Some(Ok((VerpType::BounceForward | VerpType::BounceReply, id))) => {
                tracing::debug!(email_log_id = id, "Bounce relayed with a VERP sender.");
                return self.handle_bounce(&envelope, id, msg, &mut fan_out).await;
            }
            Some(Err(error)) => {
                tracing::warn!(%error, "Invalid VERP sender, ignored.");
            }
            _ => {}
        }

        if let (Some(provider), Some(postmaster)) = (
            Provider::from_sender(&envelope.mail_from),
            self.config.app.postmaster.as_deref(),
        ) {
            if envelope.rcpt_tos.iter().any(|rcpt| rcpt == postmaster)
                && self.handle_complaint(provider, &msg).await?
            {
                return Ok(provider.handled_status());
            }
        }

        if self
            .rate_limited(&envelope.mail_from, &envelope.rcpt_tos)
            .await?
        {
            tracing::warn!("Rate limited.");
            return Ok(
                if self
                    .config
                    .app
                    .is_ignore_bounce_sender(&envelope.mail_from)
                {
                    Status::E207
                } else {
                    Status::E522
                },
            );
        }

        if let [rcpt] = envelope.rcpt_tos.as_slice() {
            if envelope.is_bounce()
                && is_reverse_alias(self.store.as_ref(), self.email_domain(), rcpt).await
            {
                tracing::debug!(%rcpt, "Bounce sent to a reverse alias.");
                return Ok(Status::E206);
            }
        }

        let Some((last, others)) = envelope.rcpt_tos.split_last() else {
            return Ok(Status::E213);
        };

        let mut statuses = Vec::with_capacity(envelope.rcpt_tos.len());
        for rcpt_to in others {
            if self.is_noreply(rcpt_to) {
                return Ok(self.handle_noreply(&envelope.mail_from).await);
            }
            statuses.push(
                self.handle_recipient(&envelope, msg.clone(), rcpt_to, &mut fan_out)
                    .await?,
            );
        }
        if self.is_noreply(last) {
            return Ok(self.handle_noreply(&envelope.mail_from).await);
        }
        statuses.push(
            self.handle_recipient(&envelope, msg, last, &mut fan_out)
                .await?,
        );

        tracing::debug!(nb_mailboxes_notified = fan_out.len(), "Recipients handled.");
        Ok(aggregate(&statuses))
    }
}
