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
use super::{count_recipients, FanOut};
use crate::{
    alias::CreateResult,
    envelope::Envelope,
    models::{Alias, BlockBehaviour, Contact, EmailLog, Mailbox, User},
    notify::{AlertType, Notification, Template},
    pgp::prepare_pgp_message,
    transform::{
        add_date_if_missing, add_tracking_headers, apply_forward_allow_list, Direction,
    },
    unsubscribe::UnsubscribeGenerator,
    verp::VerpType,
    HandlerResult, RelayContext,
};
use aliasrelay_common::{utils::email_domain_part, Status};
use aliasrelay_delivery::SendRequest;
use aliasrelay_mail_parser::Mail;

impl RelayContext {
    /// Status of a refused forward, the senders which do not want bounce reports get a success.
    fn refuse_forward(&self, envelope: &Envelope, status: Status) -> Status {
        if self.config.app.is_ignore_bounce_sender(&envelope.mail_from) {
            Status::E207
        } else {
            status
        }
    }

    async fn handle_email_sent_to_ourself(
        &self,
        alias: &Alias,
        from_addr: &str,
        msg: &Mail,
        user: &User,
    ) -> HandlerResult<()> {
        let refused_email = self
            .store
            .create_refused_email(user.id, None, msg.to_bytes())
            .await?;
        tracing::debug!(refused_email = refused_email.id, "Cycle email stored.");

        self.notifier
            .send_at_most_times(
                user.id,
                AlertType::Cycle,
                &Notification::new(
                    from_addr,
                    format!(
                        "Email sent to {} from its own mailbox {from_addr}",
                        alias.email
                    ),
                    self.renderer.render(
                        Template::Cycle,
                        &[("alias", &alias.email), ("mailbox", from_addr)],
                    ),
                ),
                1,
            )
            .await;
        Ok(())
    }

    /// Forward a message received by an alias to its mailboxes.
    ///
    /// The primary mailbox receives the message, the other mailboxes of the alias are
    /// notified once per transaction.
    ///
    /// # Errors
    ///
    /// * [`crate::HandlerError::CannotCreateContactForReverseAlias`] a correspondent is a reverse alias
    /// * the store failed
    #[tracing::instrument(name = "forward", skip_all, fields(rcpt_to = %rcpt_to))]
    pub async fn handle_forward(
        &self,
        envelope: &Envelope,
        msg: Mail,
        rcpt_to: &str,
        fan_out: &mut FanOut,
    ) -> HandlerResult<Status> {
        let alias = match self.get_or_auto_create_alias(rcpt_to).await? {
            CreateResult::Created(alias) | CreateResult::AlreadyExists(alias) => alias,
            refused => {
                tracing::debug!(?refused, "Alias cannot be created on the fly.");
                return Ok(self.refuse_forward(envelope, Status::E515));
            }
        };
        let Some(user) = self.store.get_user(alias.user_id).await else {
            tracing::error!(alias = %alias.email, "Alias without user.");
            return Ok(self.refuse_forward(envelope, Status::E515));
        };

        if user.disabled {
            tracing::warn!(user = %user.email, alias = %alias.email, "User disabled, forward refused.");
            return Ok(self.refuse_forward(envelope, Status::E504));
        }

        if self
            .is_authorized_for_alias(&envelope.mail_from, alias.id)
            .await
        {
            tracing::info!(mail_from = %envelope.mail_from, alias = %alias.email, "Cycle email sent from a mailbox to its alias.");
            self.handle_email_sent_to_ourself(&alias, &envelope.mail_from, &msg, &user)
                .await?;
            return Ok(Status::E209);
        }

        let from_header = msg.get_header_decoded("From").unwrap_or_default();
        let contact = self
            .get_or_create_contact(&from_header, &envelope.mail_from, &alias, &user)
            .await?;

        let reply_to_contact = match msg.get_header_decoded("Reply-To") {
            Some(reply_to) if aliasrelay_common::utils::sanitize_email(&reply_to) == alias.email => {
                tracing::info!(alias = %alias.email, "Reply-To is the alias itself.");
                None
            }
            Some(reply_to) => {
                self.get_or_create_reply_to_contact(&reply_to, &alias, &user)
                    .await?
            }
            None => None,
        };

        if !alias.enabled || contact.block_forward {
            tracing::debug!(alias = %alias.email, contact = %contact.website_email, "Alias disabled or contact blocked, not forwarded.");
            self.store
                .create_email_log(EmailLog {
                    contact_id: contact.id,
                    user_id: contact.user_id,
                    alias_id: contact.alias_id,
                    blocked: true,
                    ..EmailLog::default()
                })
                .await?;

            // 2xx so the messages come back once the alias is enabled again
            return Ok(match user.block_behaviour {
                BlockBehaviour::ReturnSuccess => Status::E200,
                BlockBehaviour::Return5xx => Status::E502,
            });
        }

        let nb_recipients = count_recipients(&msg);
        if nb_recipients > self.config.app.max_recipients {
            tracing::warn!(nb_recipients, alias = %alias.email, "Too many recipients.");
            return Ok(Status::E526);
        }

        let mailboxes = self.store.alias_mailboxes(alias.id).await;
        let Some(primary) = mailboxes.first() else {
            tracing::warn!(alias = %alias.email, "No valid mailbox.");
            return Ok(self.refuse_forward(envelope, Status::E516));
        };
        if !primary.verified {
            tracing::debug!(mailbox = %primary.email, "Mailbox unverified, not forwarded.");
            return Ok(Status::E517);
        }

        let status = self
            .forward_email_to_mailbox(
                &alias,
                msg,
                &contact,
                envelope,
                primary,
                &user,
                reply_to_contact.as_ref(),
            )
            .await?;

        if status == Status::E200 {
            let sender = contact.website_email.clone();
            self.notify_other_mailboxes(&alias, primary, fan_out, |mailbox| {
                Notification::new(
                    &mailbox.email,
                    format!("New email from {sender} to your alias {}", alias.email),
                    self.renderer.render(
                        Template::FanOutForward,
                        &[
                            ("sender", &sender),
                            ("alias", &alias.email),
                            ("mailbox", &primary.email),
                        ],
                    ),
                )
            })
            .await;
        }
        Ok(status)
    }

    #[allow(clippy::too_many_arguments, clippy::too_many_lines)]
    async fn forward_email_to_mailbox(
        &self,
        alias: &Alias,
        mut msg: Mail,
        contact: &Contact,
        envelope: &Envelope,
        mailbox: &Mailbox,
        user: &User,
        reply_to_contact: Option<&Contact>,
    ) -> HandlerResult<Status> {
        tracing::debug!(contact = %contact.website_email, alias = %alias.email, mailbox = %mailbox.email, "Forward.");

        if mailbox.disabled {
            tracing::debug!(mailbox = %mailbox.email, "Mailbox disabled, not forwarded.");
            return Ok(self.refuse_forward(envelope, Status::E518));
        }

        if email_domain_part(&alias.email) == email_domain_part(&mailbox.email) {
            tracing::warn!(mailbox = %mailbox.email, alias = %alias.email, "Mailbox has the same domain as the alias.");
            self.notifier
                .send_with_rate_control(
                    user.id,
                    AlertType::MailboxIsAlias,
                    &Notification::new(
                        &user.email,
                        format!(
                            "Your mailbox {} and alias {} use the same domain",
                            mailbox.email, alias.email
                        ),
                        self.renderer.render(
                            Template::MailboxIsAlias,
                            &[("mailbox", &mailbox.email), ("alias", &alias.email)],
                        ),
                    ),
                    1,
                    1,
                    false,
                )
                .await;
            // delivered once the mailbox is fixed
            return Ok(Status::E405);
        }

        let mut email_log = self
            .store
            .create_email_log(EmailLog {
                contact_id: contact.id,
                user_id: user.id,
                mailbox_id: Some(mailbox.id),
                alias_id: contact.alias_id,
                message_id: msg.get_header("Message-ID").map(str::to_string),
                ..EmailLog::default()
            })
            .await?;
        tracing::debug!(email_log = email_log.id, "Email log created.");

        let verdict = self
            .check_spam(
                &msg,
                user.max_spam_score
                    .unwrap_or(self.config.app.spam.max_score),
                user.max_spam_score,
            )
            .await;
        if verdict.is_spam {
            tracing::warn!(contact = %contact.website_email, alias = %alias.email, score = ?verdict.score, "Email detected as spam.");
            self.handle_spam(contact, alias, &msg, user, mailbox, &mut email_log, &verdict, false)
                .await?;
            return Ok(Status::E519);
        }
        if verdict.score.is_some() {
            email_log.spam_score = verdict.score;
            self.store.update_email_log(&email_log).await?;
        }

        if contact.invalid_email {
            tracing::debug!(alias = %alias.email, "Sender address invalid, banner added.");
            msg.add_banner(
                &format!(
                    "Email sent to {} from an invalid address and cannot be replied",
                    alias.email
                ),
                None,
                None,
            );
        }

        apply_forward_allow_list(&mut msg);

        if mailbox.pgp_enabled() && user.is_premium && !alias.disable_pgp {
            tracing::debug!(mailbox = %mailbox.email, "Encrypt the message.");
            if let Some(generic_subject) = &mailbox.generic_subject {
                let orig_subject = msg.get_header_decoded("Subject").unwrap_or_default();
                msg.add_or_replace_header("Subject", generic_subject);
                msg.add_banner(
                    &format!(
                        "Forwarded to {} with \"{orig_subject}\" as subject",
                        alias.email
                    ),
                    Some(&format!(
                        "Forwarded to {} with <b>{orig_subject}</b> as subject",
                        alias.email
                    )),
                    None,
                );
            }

            match prepare_pgp_message(
                self.pgp.as_ref(),
                &msg,
                mailbox.pgp_finger_print.as_deref().unwrap_or_default(),
                mailbox.pgp_public_key.as_deref(),
            )
            .await
            {
                Ok(encrypted) => msg = encrypted,
                Err(error) => {
                    tracing::error!(%error, contact = %contact.website_email, alias = %alias.email, mailbox = %mailbox.email, "Cannot encrypt the message.");
                    self.store.delete_email_log(email_log.id).await?;
                    return Ok(Status::E406);
                }
            }
        }

        add_tracking_headers(
            &mut msg,
            Direction::Forward,
            email_log.id,
            user.include_header_email_header
                .then_some(envelope.mail_from.as_str()),
            Some(&alias.email),
        );
        add_date_if_missing(&mut msg);
        self.replace_sl_message_id_by_original_message_id(&mut msg)
            .await;

        let new_from_header = contact.new_addr(user.sender_format);
        tracing::debug!(old = ?msg.get_header("From"), new = %new_from_header, "From header replaced.");
        msg.add_or_replace_header("From", &new_from_header);

        if let Some(reply_to_contact) = reply_to_contact {
            msg.add_or_replace_header("Reply-To", &reply_to_contact.new_addr(user.sender_format));
        }

        for header in ["Cc", "To"] {
            if let Err(error) = self
                .replace_header_when_forward(&mut msg, alias, user, header)
                .await
            {
                tracing::debug!(%error, email_log = email_log.id, "Header rewrite failed, email log deleted.");
                self.store.delete_email_log(email_log.id).await?;
                return Err(error);
            }
        }

        UnsubscribeGenerator::new(&self.unsubscribe).add_header_to_message(
            user,
            alias,
            contact,
            &mut msg,
        );
        // signed as the reverse alias, the address of the new From
        self.dkim.sign(&mut msg, &email_domain_part(&contact.reply_email));

        let request = SendRequest::new(
            self.verp
                .generate(VerpType::BounceForward, email_log.id, None),
            mailbox.email.clone(),
            msg.to_bytes(),
        )
        .with_options(envelope.mail_options.clone(), envelope.rcpt_options.clone())
        .forward()
        .no_spool();

        match self.dispatcher.send(request).await {
            Ok(()) => Ok(Status::E200),
            Err(error) if self.config.app.is_ignore_bounce_sender(&envelope.mail_from) => {
                tracing::warn!(%error, mailbox = %mailbox.email, "Forward failed for a sender without bounce report.");
                Ok(Status::E207)
            }
            Err(error) => {
                tracing::warn!(%error, contact = %contact.website_email, alias = %alias.email, mailbox = %mailbox.email, "Forward failed.");
                self.store.delete_email_log(email_log.id).await?;
                self.notifier
                    .send(
                        &Notification::new(
                            &user.email,
                            format!(
                                "Email sent to {} cannot be delivered to {}",
                                alias.email, mailbox.email
                            ),
                            self.renderer.render(
                                Template::ForwardFailed,
                                &[
                                    ("alias", &alias.email),
                                    ("mailbox", &mailbox.email),
                                    ("error", &error.to_string()),
                                ],
                            ),
                        ),
                        true,
                    )
                    .await;
                // the upstream MTA retries the whole transaction
                Ok(Status::E407)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        envelope::Envelope,
        models::{BlockBehaviour, Contact, Mailbox},
        phase::FanOut,
        pgp::tests::FakePgp,
        tests::{context, context_with, relayed, seed},
    };
    use aliasrelay_common::Status;
    use aliasrelay_delivery::Failure;
    use aliasrelay_mail_parser::Mail;
    extern crate alloc;

    fn message(from: &str, to: &str) -> Mail {
        format!(
            "From: {from}\r\nTo: {to}\r\nSubject: hello\r\nMessage-ID: <abc@world.com>\r\nReceived: from mx.world.com\r\n\r\nhi there"
        )
        .parse::<Mail>()
        .unwrap()
    }

    async fn forward(
        ctx: &crate::RelayContext,
        mail_from: &str,
        rcpt_to: &str,
        msg: Mail,
    ) -> Status {
        ctx.handle_forward(
            &Envelope::new(mail_from, &[rcpt_to]),
            msg,
            rcpt_to,
            &mut FanOut::default(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn delivered() {
        let (ctx, recorder) = context(seed()).await;
        let status = forward(
            &ctx,
            "john@world.com",
            "alias@sl.example.com",
            message("John <john@world.com>", "alias@sl.example.com"),
        )
        .await;
        assert_eq!(status, Status::E200);

        let sent = recorder.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].envelope_to, "user@example.com");
        assert!(sent[0].is_forward);
        assert!(ctx.verp.decode(&sent[0].envelope_from).is_ok());

        let relayed = relayed(&sent[0]);
        let contact = ctx
            .store
            .get_contact_by_alias_and_email(1, "john@world.com")
            .await
            .unwrap();
        assert!(relayed
            .get_header("From")
            .unwrap()
            .contains(&contact.reply_email));
        assert_eq!(relayed.get_header("Received"), None);
        assert_eq!(relayed.get_header("X-SimpleLogin-Type"), Some("Forward"));
        assert_eq!(
            relayed.get_header("X-SimpleLogin-Envelope-To"),
            Some("alias@sl.example.com")
        );
        assert!(relayed.get_header("Date").is_some());
    }

    #[tokio::test]
    async fn unknown_alias() {
        let (ctx, recorder) = context(seed()).await;
        assert_eq!(
            forward(
                &ctx,
                "john@world.com",
                "nobody@sl.example.com",
                message("john@world.com", "nobody@sl.example.com")
            )
            .await,
            Status::E515
        );
        assert!(recorder.sent().await.is_empty());
    }

    #[tokio::test]
    async fn cycle() {
        let (ctx, recorder) = context(seed()).await;
        assert_eq!(
            forward(
                &ctx,
                "user@example.com",
                "alias@sl.example.com",
                message("user@example.com", "alias@sl.example.com")
            )
            .await,
            Status::E209
        );
        let sent = recorder.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].envelope_to, "user@example.com");
    }

    #[rstest::rstest]
    #[case(BlockBehaviour::ReturnSuccess, Status::E200)]
    #[case(BlockBehaviour::Return5xx, Status::E502)]
    #[tokio::test]
    async fn disabled_alias(#[case] behaviour: BlockBehaviour, #[case] expected: Status) {
        let mut tables = seed();
        tables.aliases[0].enabled = false;
        tables.users[0].block_behaviour = behaviour;
        let (ctx, recorder) = context(tables).await;

        assert_eq!(
            forward(
                &ctx,
                "john@world.com",
                "alias@sl.example.com",
                message("john@world.com", "alias@sl.example.com")
            )
            .await,
            expected
        );
        assert!(recorder.sent().await.is_empty());
        let logs = ctx
            .store
            .alias_email_logs(1, time::OffsetDateTime::UNIX_EPOCH)
            .await;
        assert_eq!(logs.len(), 1);
        assert!(logs[0].blocked);
    }

    #[tokio::test]
    async fn too_many_recipients() {
        let (ctx, _) = context(seed()).await;
        let to = (0..=ctx.config.app.max_recipients)
            .map(|i| format!("r{i}@world.com"))
            .collect::<Vec<_>>()
            .join(", ");
        assert_eq!(
            forward(
                &ctx,
                "john@world.com",
                "alias@sl.example.com",
                message("john@world.com", &to)
            )
            .await,
            Status::E526
        );
    }

    #[tokio::test]
    async fn mailbox_is_alias() {
        let mut tables = seed();
        tables.mailboxes.push(Mailbox {
            id: 9,
            user_id: 1,
            email: "box@sl.example.com".to_string(),
            verified: true,
            ..Mailbox::default()
        });
        tables.aliases[0].mailbox_id = 9;
        let (ctx, recorder) = context(tables).await;

        assert_eq!(
            forward(
                &ctx,
                "john@world.com",
                "alias@sl.example.com",
                message("john@world.com", "alias@sl.example.com")
            )
            .await,
            Status::E405
        );
        let sent = recorder.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].envelope_to, "user@example.com");
    }

    #[tokio::test]
    async fn pgp_failure() {
        let mut tables = seed();
        tables.users[0].is_premium = true;
        tables.mailboxes[0].pgp_finger_print = Some("ABCD".to_string());
        let (ctx, recorder) = context_with(tables, |ctx| {
            ctx.with_pgp(alloc::sync::Arc::new(FakePgp { fail: true }))
        })
        .await;

        assert_eq!(
            forward(
                &ctx,
                "john@world.com",
                "alias@sl.example.com",
                message("john@world.com", "alias@sl.example.com")
            )
            .await,
            Status::E406
        );
        assert!(recorder.sent().await.is_empty());
        assert!(ctx
            .store
            .alias_email_logs(1, time::OffsetDateTime::UNIX_EPOCH)
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn pgp_encrypted() {
        let mut tables = seed();
        tables.users[0].is_premium = true;
        tables.mailboxes[0].pgp_finger_print = Some("ABCD".to_string());
        let (ctx, recorder) = context_with(tables, |ctx| {
            ctx.with_pgp(alloc::sync::Arc::new(FakePgp { fail: false }))
        })
        .await;

        assert_eq!(
            forward(
                &ctx,
                "john@world.com",
                "alias@sl.example.com",
                message("john@world.com", "alias@sl.example.com")
            )
            .await,
            Status::E200
        );
        let relayed = relayed(&recorder.sent().await[0]);
        assert_eq!(relayed.content_type(), "multipart/encrypted");
    }

    #[tokio::test]
    async fn delivery_failure() {
        let (ctx, recorder) = context(seed()).await;
        recorder.fail_next(Failure::Permanent, 1).await;

        assert_eq!(
            forward(
                &ctx,
                "john@world.com",
                "alias@sl.example.com",
                message("john@world.com", "alias@sl.example.com")
            )
            .await,
            Status::E407
        );
        assert!(ctx
            .store
            .alias_email_logs(1, time::OffsetDateTime::UNIX_EPOCH)
            .await
            .is_empty());
        // the failure notice
        assert_eq!(recorder.sent().await.len(), 1);
    }

    #[tokio::test]
    async fn failed_forward_is_not_spooled() {
        let unsent = std::env::temp_dir().join(uuid::Uuid::new_v4().to_string());
        let dir = unsent.clone();
        let (ctx, recorder) = crate::tests::context_with_config(seed(), move |config| {
            config.app.delivery.max_attempts = 3;
            config.app.delivery.unsent_dir = Some(dir);
        })
        .await;
        recorder.fail_next(Failure::Transient, 3).await;

        assert_eq!(
            forward(
                &ctx,
                "john@world.com",
                "alias@sl.example.com",
                message("john@world.com", "alias@sl.example.com")
            )
            .await,
            Status::E407
        );
        let spool = ctx.dispatcher.spool().unwrap();
        assert!(spool.entries().await.unwrap().is_empty());

        let report = ctx.dispatcher.resend_unsent().await.unwrap();
        assert_eq!(report.delivered, 0);
        // only the failure notice reached the transport
        assert_eq!(recorder.sent().await.len(), 1);

        let _ = tokio::fs::remove_dir_all(&unsent).await;
    }

    #[tokio::test]
    async fn signed_as_the_reverse_alias() {
        let (ctx, recorder) = crate::tests::context_with_config(seed(), |config| {
            config.app.dkim_domains = vec!["reverse.example.com".to_string()];
        })
        .await;
        ctx.store
            .create_contact(Contact {
                user_id: 1,
                alias_id: 1,
                website_email: "john@world.com".to_string(),
                reply_email: "ra+john@reverse.example.com".to_string(),
                ..Contact::default()
            })
            .await
            .unwrap();

        forward(
            &ctx,
            "john@world.com",
            "alias@sl.example.com",
            message("john@world.com", "alias@sl.example.com"),
        )
        .await;
        let relayed = relayed(&recorder.sent().await[0]);
        assert!(relayed
            .get_header("From")
            .unwrap()
            .contains("ra+john@reverse.example.com"));
        assert_eq!(
            relayed.get_header(crate::dkim::WANT_SIGNING_HEADER),
            Some("yes")
        );
    }

    #[tokio::test]
    async fn reverse_alias_in_cc() {
        let (ctx, _) = context(seed()).await;
        let contact = ctx
            .store
            .create_contact(Contact {
                user_id: 1,
                alias_id: 1,
                website_email: "friend@world.com".to_string(),
                reply_email: "ra+friend@sl.example.com".to_string(),
                ..Contact::default()
            })
            .await
            .unwrap();

        let msg = message(&contact.reply_email, "alias@sl.example.com");
        let result = ctx
            .handle_forward(
                &Envelope::new("john@world.com", &["alias@sl.example.com"]),
                msg,
                "alias@sl.example.com",
                &mut FanOut::default(),
            )
            .await;
        assert!(matches!(
            result,
            Err(crate::HandlerError::CannotCreateContactForReverseAlias(_))
        ));
    }
}
