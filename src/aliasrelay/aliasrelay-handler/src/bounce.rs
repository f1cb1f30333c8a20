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
//! Delivery status notifications received on the VERP addresses.

use crate::{
    envelope::Envelope,
    models::{Alias, Contact, EmailLog, Id, Mailbox, RefusedEmail, User},
    notify::{AlertType, Notification, Template},
    phase::FanOut,
    HandlerResult, RelayContext,
};
use aliasrelay_common::{Status, NULL_SENDER};
use aliasrelay_mail_parser::{Body, Mail};

/// Index in [`Mail::walk`] of the per-recipient block of a `multipart/report`.
const BOUNCE_INFO_PART: usize = 5;
/// Index in [`Mail::walk`] of the returned message of a `multipart/report`.
const ORIGINAL_MESSAGE_PART: usize = 7;

/// Maximum number of bounce alerts per day, per address.
const MAX_BOUNCE_ALERTS: usize = 10;

/// Is the message a delivery status notification.
#[must_use]
pub fn is_bounce(envelope: &Envelope, msg: &Mail) -> bool {
    envelope.mail_from == NULL_SENDER && msg.content_type() == "multipart/report"
}

/// Is the message an automatic answer (rfc3834), out of office replies for instance.
#[must_use]
pub fn is_automatic_out_of_office(msg: &Mail) -> bool {
    msg.get_header("Auto-Submitted").map_or(false, |value| {
        let value = value.trim().to_lowercase();
        value == "auto-replied" || value == "auto-generated"
    })
}

/// The status block of the failed recipient.
#[must_use]
pub fn get_mailbox_bounce_info(msg: &Mail) -> Option<&Mail> {
    msg.nth_part(BOUNCE_INFO_PART)
}

/// The message returned with the report, some MTAs do not return it.
#[must_use]
pub fn get_orig_message_from_bounce(msg: &Mail) -> Option<&Mail> {
    msg.nth_part(ORIGINAL_MESSAGE_PART).map(|part| match &part.body {
        Body::Embedded(original) => original.as_ref(),
        _ => part,
    })
}

fn forward_bounces(logs: &[EmailLog], since: time::OffsetDateTime) -> Vec<&EmailLog> {
    logs.iter()
        .filter(|log| log.bounced && !log.is_reply && log.created_at > since)
        .collect()
}

/// Should the bounces of the forward phase disable the alias.
///
/// `alias_logs` and `user_logs` are the logs of the alias and of its owner, created
/// in the last 10 days at least. Returns the reason when the alias should be disabled.
#[must_use]
pub fn should_disable(
    alias: &Alias,
    auto_disable: bool,
    alias_logs: &[EmailLog],
    user_logs: &[EmailLog],
    now: time::OffsetDateTime,
) -> Option<&'static str> {
    if alias.cannot_be_disabled {
        tracing::warn!(alias = %alias.email, "Alias cannot be disabled.");
        return None;
    }
    if !auto_disable {
        return None;
    }

    let yesterday = now - time::Duration::days(1);
    let one_week_ago = now - time::Duration::days(7);
    let ten_days_ago = now - time::Duration::days(10);

    let alias_bounces = forward_bounces(alias_logs, ten_days_ago);

    let nb_bounced_last_24h = alias_bounces
        .iter()
        .filter(|log| log.created_at > yesterday)
        .count();

    if nb_bounced_last_24h > 12 {
        return Some("+12 bounces in the last 24h");
    }
    if nb_bounced_last_24h > 5 {
        let nb_bounced_7d_1d = alias_bounces
            .iter()
            .filter(|log| log.created_at > one_week_ago && log.created_at < yesterday)
            .count();
        if nb_bounced_7d_1d > 10 {
            return Some("+5 bounces in the last 24h and +10 bounces in the last 7 days");
        }
        return None;
    }

    let alias_days = alias_bounces
        .iter()
        .map(|log| log.created_at.date())
        .collect::<std::collections::HashSet<_>>();
    if alias_days.len() >= 9 {
        return Some("Bounces every day for at least 9 days in the last 10 days");
    }

    let mut user_days = std::collections::HashMap::<time::Date, usize>::new();
    for log in forward_bounces(user_logs, ten_days_ago) {
        *user_days.entry(log.created_at.date()).or_default() += 1;
    }
    if user_days.values().filter(|nb| **nb > 10).count() > 4 {
        return Some("+10 bounces for +4 days in the last 10 days");
    }

    None
}

/// The entities a log refers to.
struct LogContext {
    contact: Contact,
    alias: Alias,
    user: User,
    mailbox: Mailbox,
}

impl RelayContext {
    async fn log_context(&self, email_log: &EmailLog) -> Option<LogContext> {
        let contact = self.store.get_contact(email_log.contact_id).await?;
        let alias = self.store.get_alias(contact.alias_id).await?;
        let user = self.store.get_user(alias.user_id).await?;

        let mailbox = match email_log.mailbox_id {
            Some(mailbox_id) => self.store.get_mailbox(mailbox_id).await,
            None => None,
        };
        let mailbox = match mailbox {
            Some(mailbox) => mailbox,
            None => {
                tracing::error!(alias = %alias.email, "Log without mailbox, using the alias one.");
                self.store.get_mailbox(alias.mailbox_id).await?
            }
        };

        Some(LogContext {
            contact,
            alias,
            user,
            mailbox,
        })
    }

    async fn record_bounce(&self, email: &str, msg: &Mail) -> HandlerResult<()> {
        let info = get_mailbox_bounce_info(msg).map(ToString::to_string);
        if info.is_none() {
            tracing::warn!(%email, "Cannot get the bounce info.");
        }
        self.store.create_bounce(email, info).await?;
        Ok(())
    }

    async fn store_refused(&self, user_id: Id, msg: &Mail) -> HandlerResult<RefusedEmail> {
        let original = get_orig_message_from_bounce(msg).map(Mail::to_bytes);
        if original.is_none() {
            tracing::warn!(user_id, "Cannot parse the original message of the bounce.");
        }
        Ok(self
            .store
            .create_refused_email(user_id, original, msg.to_bytes())
            .await?)
    }

    async fn mark_bounced(
        &self,
        email_log: &mut EmailLog,
        refused_email: &RefusedEmail,
        mailbox: &Mailbox,
    ) -> HandlerResult<()> {
        email_log.bounced = true;
        email_log.refused_email_id = Some(refused_email.id);
        email_log.bounced_mailbox_id = Some(mailbox.id);
        self.store.update_email_log(email_log).await?;
        Ok(())
    }

    /// Should the alias be disabled, see [`should_disable`].
    pub async fn should_disable_alias(&self, alias: &Alias) -> Option<&'static str> {
        let now = time::OffsetDateTime::now_utc();
        let since = now - time::Duration::days(10);

        should_disable(
            alias,
            self.config.app.bounce.auto_disable,
            &self.store.alias_email_logs(alias.id, since).await,
            &self.store.user_email_logs(alias.user_id, since).await,
            now,
        )
    }

    /// A forwarded message could not be delivered to the mailbox.
    ///
    /// # Errors
    ///
    /// * the store failed
    pub async fn handle_bounce_forward_phase(
        &self,
        msg: &Mail,
        mut email_log: EmailLog,
    ) -> HandlerResult<()> {
        let Some(LogContext {
            contact,
            mut alias,
            user,
            mailbox,
        }) = self.log_context(&email_log).await
        else {
            tracing::warn!(email_log = email_log.id, "Log of a deleted alias, bounce ignored.");
            return Ok(());
        };

        self.record_bounce(&mailbox.email, msg).await?;
        tracing::debug!(
            contact = %contact.website_email,
            alias = %alias.email,
            mailbox = %mailbox.email,
            email_log = email_log.id,
            "Handle forward bounce."
        );

        let refused_email = self.store_refused(user.id, msg).await?;
        self.mark_bounced(&mut email_log, &refused_email, &mailbox)
            .await?;

        let refused_email_url = format!(
            "{}/dashboard/refused_email?highlight_id={}",
            self.config.app.url, email_log.id
        );

        if let Some(reason) = self.should_disable_alias(&alias).await {
            tracing::warn!(alias = %alias.email, %reason, "Alias disabled.");
            alias.enabled = false;
            self.store.update_alias(&alias).await?;

            let url = format!(
                "{}/dashboard/?highlight_alias_id={}",
                self.config.app.url, alias.id
            );
            self.notifier
                .send_with_rate_control(
                    user.id,
                    AlertType::AliasDisabledBounce,
                    &Notification::new(
                        &user.email,
                        format!(
                            "Alias {} has been disabled due to multiple bounces",
                            alias.email
                        ),
                        self.renderer.render(
                            Template::AliasDisabledByBounces,
                            &[
                                ("alias", &alias.email),
                                ("mailbox", &mailbox.email),
                                ("url", &url),
                            ],
                        ),
                    ),
                    MAX_BOUNCE_ALERTS,
                    1,
                    true,
                )
                .await;
        } else {
            tracing::debug!(user = %user.email, "Inform the user about the bounce.");
            self.notifier
                .send_with_rate_control(
                    user.id,
                    AlertType::Bounce,
                    &Notification::new(
                        &user.email,
                        format!(
                            "Email from {} to {} cannot be delivered to your mailbox {}",
                            contact.website_email, alias.email, mailbox.email
                        ),
                        self.renderer.render(
                            Template::BounceForward,
                            &[
                                ("contact", &contact.website_email),
                                ("alias", &alias.email),
                                ("mailbox", &mailbox.email),
                                ("refused_email_url", &refused_email_url),
                            ],
                        ),
                    ),
                    MAX_BOUNCE_ALERTS,
                    1,
                    // the mailbox may be unreachable, which explains the bounce
                    true,
                )
                .await;
        }
        Ok(())
    }

    /// A reply could not be delivered to the contact.
    ///
    /// # Errors
    ///
    /// * the store failed
    pub async fn handle_bounce_reply_phase(
        &self,
        msg: &Mail,
        mut email_log: EmailLog,
    ) -> HandlerResult<()> {
        let Some(LogContext {
            contact,
            alias,
            user,
            mailbox,
        }) = self.log_context(&email_log).await
        else {
            tracing::warn!(email_log = email_log.id, "Log of a deleted alias, bounce ignored.");
            return Ok(());
        };
        tracing::debug!(
            mailbox = %mailbox.email,
            alias = %alias.email,
            contact = %contact.website_email,
            "Handle reply bounce."
        );

        self.record_bounce(&contact.website_email, msg).await?;
        let refused_email = self.store_refused(user.id, msg).await?;
        self.mark_bounced(&mut email_log, &refused_email, &mailbox)
            .await?;

        let refused_email_url = format!(
            "{}/dashboard/refused_email?highlight_id={}",
            self.config.app.url, email_log.id
        );
        self.notifier
            .send_with_rate_control(
                user.id,
                AlertType::BounceWhenReply,
                &Notification::new(
                    &mailbox.email,
                    format!(
                        "Email cannot be sent to {} from your alias {}",
                        contact.website_email, alias.email
                    ),
                    self.renderer.render(
                        Template::BounceReply,
                        &[
                            ("alias", &alias.email),
                            ("contact", &contact.website_email),
                            ("refused_email_url", &refused_email_url),
                        ],
                    ),
                ),
                self.config.app.alerts.max_per_day,
                1,
                false,
            )
            .await;
        Ok(())
    }

    /// A message sent to, or from, the VERP address of a log.
    ///
    /// An automatic answer to a reply is forwarded to the alias.
    ///
    /// # Errors
    ///
    /// * the store failed
    pub async fn handle_bounce(
        &self,
        envelope: &Envelope,
        email_log_id: Id,
        mut msg: Mail,
        fan_out: &mut FanOut,
    ) -> HandlerResult<Status> {
        let Some(mut email_log) = self.store.get_email_log(email_log_id).await else {
            tracing::warn!(email_log_id, "No such email log.");
            return Ok(Status::E512);
        };
        tracing::debug!(
            email_log = email_log.id,
            is_reply = email_log.is_reply,
            "Handle bounce."
        );

        if !email_log.is_reply {
            self.handle_bounce_forward_phase(&msg, email_log).await?;
            return Ok(Status::E211);
        }

        if is_bounce(envelope, &msg) {
            self.handle_bounce_reply_phase(&msg, email_log).await?;
            return Ok(Status::E212);
        }

        let Some(alias) = self.store.get_alias(email_log.alias_id).await else {
            return Ok(Status::E512);
        };
        tracing::info!(
            content_type = %msg.content_type(),
            mail_from = %envelope.mail_from,
            alias = %alias.email,
            "Automatic reply forwarded to the alias."
        );

        email_log.auto_replied = true;
        self.store.update_email_log(&email_log).await?;

        msg.add_or_replace_header("To", &alias.email);
        let envelope = envelope.for_recipient(&alias.email);
        self.handle_forward(&envelope, msg, &alias.email, fan_out)
            .await
    }

    /// A message sent to the VERP address of a transactional email.
    ///
    /// # Errors
    ///
    /// * the store failed
    pub async fn handle_transactional_bounce(
        &self,
        envelope: &Envelope,
        transactional_id: Id,
        msg: &Mail,
    ) -> HandlerResult<Status> {
        if is_bounce(envelope, msg) {
            // the transactional email may have been cleaned up already
            if let Some(transactional) = self.store.get_transactional_email(transactional_id).await
            {
                tracing::info!(email = %transactional.email, "Bounce of a transactional email.");
                self.record_bounce(&transactional.email, msg).await?;
            }
            return Ok(Status::E205);
        }
        if is_automatic_out_of_office(msg) {
            tracing::debug!("Out of office for a transactional email, ignored.");
            return Ok(Status::E206);
        }

        tracing::warn!(transactional_id, mail_from = %envelope.mail_from, "Unexpected email sent to a transactional VERP.");
        Ok(Status::E213)
    }
}
