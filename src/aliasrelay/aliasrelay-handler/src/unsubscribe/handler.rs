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
use super::{UnsubscribeData, UnsubscribeOriginalData};
use crate::{
    envelope::Envelope,
    models::{Id, Mailbox, User},
    notify::{Notification, Template},
    transform::{make_msgid, rfc2822_now},
    verp::VerpType,
    HandlerResult, RelayContext,
};
use aliasrelay_common::{utils::email_domain_part, utils::sanitize_email, Status};
use aliasrelay_delivery::SendRequest;
use aliasrelay_mail_parser::Mail;

impl RelayContext {
    /// Apply the request sent by a mailbox to the unsubscriber address.
    ///
    /// # Errors
    ///
    /// * the store failed
    pub async fn handle_unsubscribe_from_message(
        &self,
        envelope: &Envelope,
        msg: &Mail,
    ) -> HandlerResult<Status> {
        let Some(data) = msg
            .get_header_decoded("Subject")
            .and_then(|subject| self.unsubscribe.decode_subject(&subject))
        else {
            tracing::warn!(subject = ?msg.get_header("Subject"), "Wrong format subject.");
            return Ok(Status::E507);
        };

        let Some(mailbox) = self.store.get_mailbox_by_email(&envelope.mail_from).await else {
            tracing::warn!(mail_from = %envelope.mail_from, "Unknown mailbox.");
            return Ok(Status::E507);
        };
        let Some(user) = self.store.get_user(mailbox.user_id).await else {
            tracing::warn!(mail_from = %envelope.mail_from, "Mailbox without user.");
            return Ok(Status::E507);
        };

        self.apply_unsubscribe(&data, &user, Some(&mailbox)).await
    }

    /// Apply a request coming from the dashboard, on behalf of `user`.
    ///
    /// Returns the request when it was applied.
    ///
    /// # Errors
    ///
    /// * the store failed
    pub async fn handle_unsubscribe_from_request(
        &self,
        user: &User,
        request: &str,
    ) -> HandlerResult<Option<UnsubscribeData>> {
        let Some(data) = self.unsubscribe.decode_subject(request) else {
            tracing::warn!(%request, "Wrong unsubscribe request.");
            return Ok(None);
        };

        let status = self.apply_unsubscribe(&data, user, None).await?;
        Ok((status == Status::E202).then_some(data))
    }

    async fn apply_unsubscribe(
        &self,
        data: &UnsubscribeData,
        user: &User,
        mailbox: Option<&Mailbox>,
    ) -> HandlerResult<Status> {
        match data {
            UnsubscribeData::DisableAlias(alias_id) => {
                self.unsubscribe_disable_alias(*alias_id, user, mailbox).await
            }
            UnsubscribeData::DisableContact(contact_id) => {
                self.unsubscribe_disable_contact(*contact_id, user, mailbox)
                    .await
            }
            UnsubscribeData::UnsubscribeNewsletter(user_id) => {
                self.unsubscribe_newsletter(*user_id, user).await
            }
            UnsubscribeData::OriginalUnsubscribeMailto(original) => {
                self.unsubscribe_original(original, user).await
            }
        }
    }

    async fn unsubscribe_disable_alias(
        &self,
        alias_id: Id,
        user: &User,
        mailbox: Option<&Mailbox>,
    ) -> HandlerResult<Status> {
        let Some(mut alias) = self.store.get_alias(alias_id).await else {
            return Ok(Status::E508);
        };
        if alias.user_id != user.id {
            tracing::warn!(alias = %alias.email, "Alias does not belong to the user.");
            return Ok(Status::E508);
        }

        // only the mailboxes of the alias can send the request
        if let Some(mailbox) = mailbox {
            if !self.is_authorized_for_alias(&mailbox.email, alias.id).await {
                return Ok(Status::E509);
            }
        }

        tracing::info!(alias = %alias.email, "Alias disabled via unsubscribe header.");
        alias.enabled = false;
        self.store.update_alias(&alias).await?;

        let url = format!(
            "{}/dashboard/?highlight_alias_id={}",
            self.config.app.url, alias.id
        );
        for mailbox in self.store.alias_mailboxes(alias.id).await {
            self.notifier
                .send(
                    &Notification::new(
                        &mailbox.email,
                        format!("Alias {} has been disabled successfully", alias.email),
                        self.renderer.render(
                            Template::UnsubscribeDisableAlias,
                            &[("alias", &alias.email), ("url", &url)],
                        ),
                    ),
                    false,
                )
                .await;
        }
        Ok(Status::E202)
    }

    async fn unsubscribe_disable_contact(
        &self,
        contact_id: Id,
        user: &User,
        mailbox: Option<&Mailbox>,
    ) -> HandlerResult<Status> {
        let Some(mut contact) = self.store.get_contact(contact_id).await else {
            return Ok(Status::E508);
        };
        if contact.user_id != user.id {
            tracing::warn!(contact = %contact.website_email, "Contact does not belong to the user.");
            return Ok(Status::E508);
        }

        if let Some(mailbox) = mailbox {
            if !self
                .is_authorized_for_alias(&mailbox.email, contact.alias_id)
                .await
            {
                return Ok(Status::E509);
            }
        }
        let Some(alias) = self.store.get_alias(contact.alias_id).await else {
            return Ok(Status::E508);
        };

        contact.block_forward = true;
        self.store.update_contact(&contact).await?;

        let url = format!(
            "{}/dashboard/alias_contact_manager/{}?highlight_contact_id={}",
            self.config.app.url, alias.id, contact.id
        );
        for mailbox in self.store.alias_mailboxes(alias.id).await {
            self.notifier
                .send(
                    &Notification::new(
                        &mailbox.email,
                        format!(
                            "Emails from {} to {} are now blocked",
                            contact.website_email, alias.email
                        ),
                        self.renderer.render(
                            Template::UnsubscribeBlockContact,
                            &[
                                ("alias", &alias.email),
                                ("contact", &contact.website_email),
                                ("url", &url),
                            ],
                        ),
                    ),
                    false,
                )
                .await;
        }
        Ok(Status::E202)
    }

    async fn unsubscribe_newsletter(
        &self,
        user_id: Id,
        request_user: &User,
    ) -> HandlerResult<Status> {
        let Some(mut user) = self.store.get_user(user_id).await else {
            tracing::warn!(user_id, "No such user.");
            return Ok(Status::E510);
        };
        if user.id != request_user.id {
            tracing::warn!(user_id, request_user = request_user.id, "Unauthorized newsletter unsubscribe.");
            return Ok(Status::E511);
        }

        user.notification = false;
        self.store.update_user(&user).await?;

        self.notifier
            .send(
                &Notification::new(
                    &user.email,
                    format!(
                        "You have been unsubscribed from {} newsletter",
                        self.config.app.support_name
                    ),
                    self.renderer.render(
                        Template::UnsubscribeNewsletter,
                        &[("support_name", &self.config.app.support_name)],
                    ),
                ),
                false,
            )
            .await;
        Ok(Status::E202)
    }

    /// Send the mailto request of the original sender, from the alias.
    async fn unsubscribe_original(
        &self,
        original: &UnsubscribeOriginalData,
        user: &User,
    ) -> HandlerResult<Status> {
        let Some(alias) = self.store.get_alias(original.alias_id).await else {
            return Ok(Status::E508);
        };
        if alias.user_id != user.id {
            return Ok(Status::E509);
        }

        let email_domain = email_domain_part(&alias.email);
        let to_email = sanitize_email(&original.recipient);

        let mut msg = Mail::new(
            vec![
                ("To".to_string(), to_email.clone()),
                ("Subject".to_string(), original.subject.clone()),
                ("From".to_string(), alias.email.clone()),
                ("Message-ID".to_string(), make_msgid(&email_domain)),
                ("Date".to_string(), rfc2822_now()),
                ("Content-Type".to_string(), "text/plain".to_string()),
                ("MIME-Version".to_string(), "1.0".to_string()),
            ],
            vec![],
        );
        self.dkim.sign(&mut msg, &email_domain);

        let transaction = self.store.create_transactional_email(&to_email).await?;
        let request = SendRequest::new(
            self.verp
                .generate(VerpType::Transactional, transaction.id, Some(&email_domain)),
            to_email,
            msg.to_bytes(),
        )
        .ignore_smtp_errors();

        if let Err(error) = self.dispatcher.send(request).await {
            tracing::warn!(%error, alias = %alias.email, "Cannot relay the original unsubscribe request.");
        }
        Ok(Status::E202)
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        envelope::Envelope,
        tests::{context, seed},
        unsubscribe::{UnsubscribeData, UnsubscribeOriginalData},
    };
    use aliasrelay_common::Status;
    use aliasrelay_mail_parser::Mail;

    fn request(subject: &str) -> Mail {
        format!("Subject: {subject}\r\n\r\n").parse::<Mail>().unwrap()
    }

    #[tokio::test]
    async fn disable_alias() {
        let (ctx, recorder) = context(seed()).await;
        let subject = ctx
            .unsubscribe
            .encode_subject(&UnsubscribeData::DisableAlias(1));

        let stranger = Envelope::new("stranger@example.com", &["unsub@sl.example.com"]);
        assert_eq!(
            ctx.handle_unsubscribe_from_message(&stranger, &request(&subject))
                .await
                .unwrap(),
            Status::E507
        );

        let mailbox = Envelope::new("user@example.com", &["unsub@sl.example.com"]);
        assert_eq!(
            ctx.handle_unsubscribe_from_message(&mailbox, &request(&subject))
                .await
                .unwrap(),
            Status::E202
        );
        assert!(!ctx.store.get_alias(1).await.unwrap().enabled);
        assert!(!recorder.sent().await.is_empty());

        assert_eq!(
            ctx.handle_unsubscribe_from_message(&mailbox, &request("not a request"))
                .await
                .unwrap(),
            Status::E507
        );
        assert_eq!(
            ctx.handle_unsubscribe_from_message(&mailbox, &request("999="))
                .await
                .unwrap(),
            Status::E508
        );
    }

    #[tokio::test]
    async fn newsletter() {
        let (ctx, _) = context(seed()).await;
        let mailbox = Envelope::new("user@example.com", &["unsub@sl.example.com"]);

        assert_eq!(
            ctx.handle_unsubscribe_from_message(&mailbox, &request("1*"))
                .await
                .unwrap(),
            Status::E202
        );
        assert!(!ctx.store.get_user(1).await.unwrap().notification);

        assert_eq!(
            ctx.handle_unsubscribe_from_message(&mailbox, &request("2*"))
                .await
                .unwrap(),
            Status::E511
        );
        assert_eq!(
            ctx.handle_unsubscribe_from_message(&mailbox, &request("404*"))
                .await
                .unwrap(),
            Status::E510
        );
    }

    #[tokio::test]
    async fn original_mailto() {
        let (ctx, recorder) = context(seed()).await;
        let data = UnsubscribeData::OriginalUnsubscribeMailto(UnsubscribeOriginalData {
            alias_id: 1,
            recipient: "List@News.com".to_string(),
            subject: "stop".to_string(),
        });

        let user = ctx.store.get_user(1).await.unwrap();
        assert_eq!(
            ctx.handle_unsubscribe_from_request(&user, &ctx.unsubscribe.encode_subject(&data))
                .await
                .unwrap(),
            Some(data)
        );

        let sent = recorder.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].envelope_to, "list@news.com");
        assert!(ctx.verp.decode(&sent[0].envelope_from).is_ok());

        let msg = String::from_utf8(sent[0].msg.clone()).unwrap();
        assert!(msg.contains("Subject: stop\r\n"));
        assert!(msg.contains("From: alias@sl.example.com\r\n"));
    }
}
