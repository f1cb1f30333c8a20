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
use super::FanOut;
use crate::{
    envelope::Envelope,
    models::{Alias, Contact, EmailLog, Mailbox, User},
    notify::{AlertType, Notification, Template},
    pgp::prepare_pgp_message,
    reverse_alias::normalize_reply_email,
    transform::{add_date_if_missing, add_tracking_headers, apply_allow_list, Direction},
    verp::VerpType,
    HandlerError, HandlerResult, RelayContext,
};
use aliasrelay_common::{utils::email_domain_part, Status};
use aliasrelay_delivery::SendRequest;
use aliasrelay_mail_parser::Mail;

/// Who is sending a message as an alias.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Origin {
    /// A mailbox replying to a reverse alias.
    Reply,
    /// A client authenticated on the submission port.
    Submission,
}

/// The parties of a message sent as an alias.
pub(crate) struct Outgoing<'a> {
    pub alias: &'a Alias,
    pub contact: &'a Contact,
    pub user: &'a User,
    pub mailbox: &'a Mailbox,
    pub envelope: &'a Envelope,
    pub origin: Origin,
}

/// Status of a message sent as an alias, and whether it reached the contact.
pub(crate) struct Outcome {
    pub status: Status,
    pub delivered: bool,
}

impl Outcome {
    const fn refused(status: Status) -> Self {
        Self {
            status,
            delivered: false,
        }
    }
}

impl RelayContext {
    /// Is `domain` a domain the relay receives mail for.
    pub(crate) async fn is_relay_domain(&self, domain: &str) -> bool {
        domain == self.email_domain()
            || self.config.app.alias_domains.iter().any(|d| d == domain)
            || self.store.get_sl_domain(domain).await.is_some()
    }

    async fn is_valid_alias_domain(&self, alias: &Alias) -> bool {
        let domain = email_domain_part(&alias.email);
        if self.is_relay_domain(&domain).await {
            return true;
        }
        self.store
            .get_custom_domain_by_domain(&domain)
            .await
            .map_or(false, |custom_domain| custom_domain.verified)
    }

    /// Send a reply written in a mailbox to the contact behind a reverse alias.
    ///
    /// # Errors
    ///
    /// * the store failed
    #[tracing::instrument(name = "reply", skip_all, fields(rcpt_to = %rcpt_to))]
    pub async fn handle_reply(
        &self,
        envelope: &Envelope,
        msg: Mail,
        rcpt_to: &str,
        fan_out: &mut FanOut,
    ) -> HandlerResult<Status> {
        let reply_domain = email_domain_part(rcpt_to);
        if !self.is_relay_domain(&reply_domain).await {
            tracing::warn!(%reply_domain, "Reply to an unknown domain.");
            return Ok(Status::E501);
        }

        let reply_email = normalize_reply_email(rcpt_to);
        let Some(contact) = self.store.get_contact_by_reply_email(&reply_email).await else {
            tracing::warn!(%reply_email, "No contact with this reverse alias.");
            return Ok(Status::E502);
        };

        let alias = match self.store.get_alias(contact.alias_id).await {
            Some(alias) if self.is_valid_alias_domain(&alias).await => alias,
            _ => {
                tracing::error!(contact = %contact.website_email, "Alias of the contact unknown or on an unknown domain.");
                return Ok(Status::E503);
            }
        };
        let Some(user) = self.store.get_user(alias.user_id).await else {
            return Ok(Status::E503);
        };
        if user.disabled {
            tracing::warn!(user = %user.email, "User disabled, reply refused.");
            return Ok(Status::E504);
        }

        let mailboxes = self.store.alias_mailboxes(alias.id).await;
        let mailbox = match mailboxes
            .iter()
            .find(|mailbox| mailbox.is_authorized(&envelope.mail_from))
        {
            Some(mailbox) => mailbox,
            None if alias.disable_email_spoofing_check => {
                tracing::debug!(alias = %alias.email, mail_from = %envelope.mail_from, "Spoofing check disabled.");
                let Some(primary) = mailboxes.first() else {
                    return Ok(Status::E503);
                };
                primary
            }
            None => {
                tracing::warn!(alias = %alias.email, mail_from = %envelope.mail_from, "Reverse alias used by an unknown mailbox.");
                self.notifier
                    .send_with_rate_control(
                        user.id,
                        AlertType::ReverseAliasUnknownMailbox,
                        &Notification::new(
                            &user.email,
                            format!(
                                "Attempt to use your alias {} from {}",
                                alias.email, envelope.mail_from
                            ),
                            self.renderer.render(
                                Template::ReverseAliasUnknownMailbox,
                                &[
                                    ("reverse_alias", &reply_email),
                                    ("sender", &envelope.mail_from),
                                    ("alias", &alias.email),
                                ],
                            ),
                        ),
                        self.config.app.alerts.max_per_day,
                        1,
                        false,
                    )
                    .await;
                return Ok(Status::E214);
            }
        };

        let outgoing = Outgoing {
            alias: &alias,
            contact: &contact,
            user: &user,
            mailbox,
            envelope,
            origin: Origin::Reply,
        };
        let outcome = self.send_as_alias(&outgoing, msg).await?;

        if outcome.delivered {
            self.notify_other_mailboxes(&alias, mailbox, fan_out, |other| {
                Notification::new(
                    &other.email,
                    format!("Reply sent from your alias {}", alias.email),
                    self.renderer.render(
                        Template::FanOutReply,
                        &[
                            ("mailbox", &mailbox.email),
                            ("recipient", &contact.website_email),
                            ("alias", &alias.email),
                        ],
                    ),
                )
            })
            .await;
        }
        Ok(outcome.status)
    }

    fn replace_reverse_aliases(msg: &mut Mail, contacts: &[Contact]) {
        for contact in contacts.iter().filter(|c| !c.website_email.is_empty()) {
            msg.replace(&contact.reply_email, &contact.website_email);
        }
    }

    /// Relay a message written by a mailbox, or a submission client, to a contact,
    /// with the alias as sender.
    #[allow(clippy::too_many_lines)]
    pub(crate) async fn send_as_alias(
        &self,
        outgoing: &Outgoing<'_>,
        mut msg: Mail,
    ) -> HandlerResult<Outcome> {
        let Outgoing {
            alias,
            contact,
            user,
            mailbox,
            envelope,
            origin,
        } = *outgoing;
        let alias_domain = email_domain_part(&alias.email);

        let mut email_log = self
            .store
            .create_email_log(EmailLog {
                contact_id: contact.id,
                alias_id: alias.id,
                user_id: user.id,
                mailbox_id: Some(mailbox.id),
                is_reply: true,
                is_smtp: origin == Origin::Submission,
                message_id: msg.get_header("Message-ID").map(str::to_string),
                ..EmailLog::default()
            })
            .await?;
        tracing::debug!(email_log = email_log.id, ?origin, "Email log created.");

        let max_score = self.config.app.spam.max_reply_phase_score;
        let verdict = self.check_spam(&msg, max_score, Some(max_score)).await;
        if verdict.is_spam {
            tracing::warn!(alias = %alias.email, contact = %contact.website_email, score = ?verdict.score, "Reply detected as spam.");
            self.handle_spam(contact, alias, &msg, user, mailbox, &mut email_log, &verdict, true)
                .await?;
            return Ok(Outcome::refused(Status::E506));
        }
        if verdict.score.is_some() {
            email_log.spam_score = verdict.score;
            self.store.update_email_log(&email_log).await?;
        }

        apply_allow_list(&mut msg);

        if origin == Origin::Reply && user.replace_reverse_alias {
            let mut contacts = self
                .store
                .latest_contacts(alias.id, self.config.app.replace_reverse_alias_max_contacts)
                .await;
            if !contacts.iter().any(|c| c.id == contact.id) {
                contacts.push(contact.clone());
            }
            tracing::debug!(nb_contacts = contacts.len(), "Replace the reverse aliases of the body.");
            Self::replace_reverse_aliases(&mut msg, &contacts);
        }

        if let Some(fingerprint) = contact.pgp_finger_print.as_deref() {
            if user.is_premium {
                tracing::debug!(contact = %contact.website_email, "Encrypt the reply.");
                match prepare_pgp_message(
                    self.pgp.as_ref(),
                    &msg,
                    fingerprint,
                    contact.pgp_public_key.as_deref(),
                )
                .await
                {
                    Ok(encrypted) => msg = encrypted,
                    Err(error) => {
                        tracing::error!(%error, contact = %contact.website_email, alias = %alias.email, "Cannot encrypt the reply.");
                        self.store.delete_email_log(email_log.id).await?;
                        return Ok(Outcome::refused(Status::E402));
                    }
                }
            }
        }

        msg.add_or_replace_header("From", &self.alias_from_header(alias).await);

        if origin == Origin::Reply {
            for header in ["To", "Cc"] {
                match self.replace_header_when_reply(&mut msg, alias, header).await {
                    Ok(()) => {}
                    Err(HandlerError::NonReverseAliasInReplyPhase(recipient)) => {
                        self.store.delete_email_log(email_log.id).await?;
                        self.notify_non_reverse_alias_reply(user, mailbox, alias, &recipient)
                            .await;
                        return Ok(Outcome::refused(Status::E200));
                    }
                    Err(otherwise) => return Err(otherwise),
                }
            }
        }

        self.replace_original_message_id(alias, &mut email_log, &mut msg)
            .await?;
        add_date_if_missing(&mut msg);
        add_tracking_headers(&mut msg, Direction::Reply, email_log.id, None, None);
        self.dkim.sign(&mut msg, &alias_domain);

        let request = SendRequest::new(
            self.verp
                .generate(VerpType::BounceReply, email_log.id, Some(&alias_domain)),
            contact.website_email.clone(),
            msg.to_bytes(),
        )
        .with_options(envelope.mail_options.clone(), envelope.rcpt_options.clone())
        .no_spool();

        let delivered = match self.dispatcher.send(request).await {
            Ok(()) => true,
            Err(error) => {
                tracing::warn!(%error, alias = %alias.email, contact = %contact.website_email, "Reply not delivered.");
                self.store.delete_email_log(email_log.id).await?;
                self.notifier
                    .send(
                        &Notification::new(
                            &mailbox.email,
                            format!("Cannot send your reply to {}", contact.website_email),
                            self.renderer.render(
                                Template::ReplyError,
                                &[
                                    ("alias", &alias.email),
                                    ("contact", &contact.website_email),
                                    ("error", &error.to_string()),
                                ],
                            ),
                        ),
                        true,
                    )
                    .await;
                false
            }
        };
        // the mailbox is told, a retry would send the same notice again
        Ok(Outcome {
            status: Status::E200,
            delivered,
        })
    }

    async fn notify_non_reverse_alias_reply(
        &self,
        user: &User,
        mailbox: &Mailbox,
        alias: &Alias,
        recipient: &str,
    ) {
        tracing::info!(alias = %alias.email, %recipient, "Reply to a non reverse alias.");
        self.notifier
            .send_with_rate_control(
                user.id,
                AlertType::NonReverseAliasReplyPhase,
                &Notification::new(
                    &mailbox.email,
                    format!("Email sent to {recipient} contains non reverse-alias addresses"),
                    self.renderer.render(
                        Template::NonReverseAliasReply,
                        &[("alias", &alias.email), ("recipient", recipient)],
                    ),
                ),
                self.config.app.alerts.max_per_day,
                1,
                true,
            )
            .await;
    }
}
