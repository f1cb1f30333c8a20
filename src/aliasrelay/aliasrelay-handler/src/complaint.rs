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
//! Abuse reports of the mailbox providers (feedback loops).

use crate::{
    models::{Id, Phase, User},
    notify::{AlertType, Notification, Template},
    verp::VerpType,
    HandlerResult, RelayContext,
};
use aliasrelay_common::utils::sanitize_email;
use aliasrelay_mail_parser::{
    decode_header_value, parse_address_list, parse_full_address, Body, Mail,
};

/// Sender of the Hotmail complaints.
pub const HOTMAIL_COMPLAINT_SENDER: &str = "staff@hotmail.com";
/// Sender of the Yahoo complaints.
pub const YAHOO_COMPLAINT_SENDER: &str = "feedback@arf.mail.yahoo.com";

/// Header of the Yahoo feedback report holding the original recipient.
const YAHOO_ORIGINAL_RECIPIENT: &str = "original-rcpt-to";

/// A provider sending complaints about the messages the relay delivered to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::EnumIter)]
pub enum Provider {
    ///
    Hotmail,
    ///
    Yahoo,
}

impl Provider {
    ///
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Hotmail => "hotmail",
            Self::Yahoo => "yahoo",
        }
    }

    /// Name shown to the users.
    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::Hotmail => "Hotmail",
            Self::Yahoo => "Yahoo",
        }
    }

    /// Envelope sender of the complaints of this provider.
    #[must_use]
    pub const fn sender(self) -> &'static str {
        match self {
            Self::Hotmail => HOTMAIL_COMPLAINT_SENDER,
            Self::Yahoo => YAHOO_COMPLAINT_SENDER,
        }
    }

    /// The provider sending complaints from `mail_from`.
    #[must_use]
    pub fn from_sender(mail_from: &str) -> Option<Self> {
        <Self as strum::IntoEnumIterator>::iter().find(|provider| provider.sender() == mail_from)
    }

    const fn original_part(self) -> usize {
        match self {
            // container, explanation, message/rfc822
            Self::Hotmail => 3,
            // container, explanation, feedback report and its content, message/rfc822 and its content
            Self::Yahoo => 6,
        }
    }

    /// The message the complaint is about.
    #[must_use]
    pub fn original_message(self, msg: &Mail) -> Option<&Mail> {
        msg.nth_part(self.original_part()).map(|part| match &part.body {
            Body::Embedded(original) => original.as_ref(),
            _ => part,
        })
    }

    fn feedback_report(msg: &Mail) -> Option<&Mail> {
        msg.walk()
            .into_iter()
            .find(|part| part.content_type() == "message/feedback-report")
            .and_then(|part| match &part.body {
                Body::Embedded(report) => Some(report.as_ref()),
                _ => None,
            })
    }

    fn recipient_header(self, msg: &Mail, original: &Mail) -> Option<String> {
        match self {
            Self::Hotmail => original.get_header(crate::transform::ENVELOPE_TO_HEADER),
            Self::Yahoo => {
                Self::feedback_report(msg).and_then(|r| r.get_header(YAHOO_ORIGINAL_RECIPIENT))
            }
        }
        .map(str::to_string)
    }

    /// The sender and the recipient of the original message.
    ///
    /// The recipient given by the provider is preferred to the `To` header, which can
    /// contain several addresses.
    #[must_use]
    pub fn original_addresses(self, msg: &Mail) -> Option<(String, String)> {
        let Some(original) = self.original_message(msg) else {
            tracing::warn!(provider = self.name(), "Cannot find the original message.");
            return None;
        };

        let rcpt_header = self
            .recipient_header(msg, original)
            .or_else(|| original.get_header("To").map(str::to_string))?;
        let recipient = match parse_address_list(&decode_header_value("To", &rcpt_header)) {
            Ok(list) => list.into_iter().next().map(|(_, address)| address),
            Err(error) => {
                tracing::warn!(%error, %rcpt_header, "Cannot parse the complaint recipient.");
                None
            }
        };
        let Some(recipient) = recipient else {
            tracing::warn!(provider = self.name(), "Cannot find the complaint recipient.");
            return None;
        };

        let from = original.get_header_decoded("From").unwrap_or_default();
        match parse_full_address(&from) {
            Ok((_, sender)) => Some((sanitize_email(&sender), sanitize_email(&recipient))),
            Err(error) => {
                tracing::warn!(%error, %from, "Cannot parse the complaint sender.");
                None
            }
        }
    }

    /// Status of a handled complaint.
    #[must_use]
    pub const fn handled_status(self) -> aliasrelay_common::Status {
        match self {
            Self::Hotmail => aliasrelay_common::Status::E208,
            Self::Yahoo => aliasrelay_common::Status::E210,
        }
    }
}

/// The alias a complaint is about, alive or in the trash of its domain.
struct ComplainedAlias {
    email: String,
    user_id: Id,
    alias_id: Option<Id>,
    mailbox_email: Option<String>,
}

impl RelayContext {
    async fn complaint_mailbox(&self, original: &Mail) -> Option<String> {
        let (_, return_path) = parse_full_address(original.get_header("Return-Path")?).ok()?;
        let (verp_type, email_log_id) = self.verp.parse_control(&return_path)?.ok()?;
        if verp_type == VerpType::Transactional {
            return None;
        }
        let mailbox_id = self.store.get_email_log(email_log_id).await?.mailbox_id?;
        self.store.get_mailbox(mailbox_id).await.map(|m| m.email)
    }

    async fn find_complained_alias(&self, address: &str) -> Option<ComplainedAlias> {
        if let Some(alias) = self.store.get_alias_by_email(address).await {
            let mailbox_email = self.store.get_mailbox(alias.mailbox_id).await.map(|m| m.email);
            return Some(ComplainedAlias {
                email: alias.email,
                user_id: alias.user_id,
                alias_id: Some(alias.id),
                mailbox_email,
            });
        }

        let deleted = self.store.get_domain_deleted_alias(address).await?;
        let mailbox_id = match self.store.get_custom_domain(deleted.domain_id).await {
            Some(domain) if !domain.mailbox_ids.is_empty() => Some(domain.mailbox_ids[0]),
            _ => self
                .store
                .get_user(deleted.user_id)
                .await
                .map(|user| user.default_mailbox_id),
        };
        let mailbox_email = match mailbox_id {
            Some(id) => self.store.get_mailbox(id).await.map(|m| m.email),
            None => None,
        };
        Some(ComplainedAlias {
            email: deleted.email,
            user_id: deleted.user_id,
            alias_id: None,
            mailbox_email,
        })
    }

    async fn is_deleted_alias(&self, address: &str) -> bool {
        self.store.get_deleted_alias(address).await.is_some()
    }

    async fn store_provider_complaint(
        &self,
        provider: Provider,
        user_id: Id,
        phase: Phase,
        msg: &Mail,
    ) -> HandlerResult<()> {
        let original = provider.original_message(msg).map(Mail::to_bytes);
        let refused_email = self
            .store
            .create_refused_email(user_id, original, msg.to_bytes())
            .await?;
        let complaint = self
            .store
            .create_provider_complaint(user_id, phase, refused_email.id)
            .await?;
        tracing::info!(complaint = complaint.id, %phase, provider = provider.name(), "Complaint stored.");
        Ok(())
    }

    async fn report_complaint(
        &self,
        provider: Provider,
        phase: Phase,
        user: &User,
        to: &str,
        text: String,
    ) {
        self.notifier
            .send_with_rate_control(
                user.id,
                AlertType::Complaint {
                    phase,
                    provider: provider.name(),
                },
                &Notification::new(
                    to,
                    format!("Abuse report from {}", provider.display_name()),
                    text,
                ),
                1,
                7,
                false,
            )
            .await;
    }

    /// Handle a complaint, resolving the phase of the original message from its addresses.
    ///
    /// Returns `false` when the complaint does not relate to any user, the message is then
    /// classified as usual.
    ///
    /// # Errors
    ///
    /// * the store failed
    pub async fn handle_complaint(&self, provider: Provider, msg: &Mail) -> HandlerResult<bool> {
        let Some((sender, recipient)) = provider.original_addresses(msg) else {
            return Ok(false);
        };
        let mailbox = match provider.original_message(msg) {
            Some(original) => self.complaint_mailbox(original).await,
            None => None,
        };
        let provider_name = provider.display_name();

        if let Some(user) = self.store.get_user_by_email(&recipient).await {
            tracing::debug!(provider = provider.name(), user = %user.email, "Transactional phase complaint.");
            let to = mailbox.as_deref().unwrap_or(&user.email);
            let text = self
                .renderer
                .render(Template::ComplaintTransactional, &[("provider", provider_name)]);
            self.report_complaint(provider, Phase::Transactional, &user, to, text)
                .await;
            return Ok(true);
        }

        if let Some(alias) = self.find_complained_alias(&sender).await {
            tracing::info!(provider = provider.name(), alias = %alias.email, %recipient, "Reply phase complaint.");
            if let Some(user) = self.store.get_user(alias.user_id).await {
                let to = mailbox
                    .or(alias.mailbox_email)
                    .unwrap_or_else(|| user.email.clone());
                let text = self.renderer.render(
                    Template::ComplaintReply,
                    &[
                        ("provider", provider_name),
                        ("recipient", &recipient),
                        ("alias", &alias.email),
                    ],
                );
                self.report_complaint(provider, Phase::Reply, &user, &to, text)
                    .await;
            }
            self.store_provider_complaint(provider, alias.user_id, Phase::Reply, msg)
                .await?;
            return Ok(true);
        }

        if self.is_deleted_alias(&sender).await {
            tracing::info!(%sender, "Complaint about a deleted alias, nothing to do.");
            return Ok(true);
        }

        let alias = match self.store.get_contact_by_reply_email(&sender).await {
            Some(contact) => match self.store.get_alias(contact.alias_id).await {
                Some(alias) => self.find_complained_alias(&alias.email).await,
                None => None,
            },
            None => self.find_complained_alias(&recipient).await,
        };

        if self.is_deleted_alias(&recipient).await {
            tracing::info!(%recipient, "Complaint about a deleted alias, nothing to do.");
            return Ok(true);
        }

        let Some(alias) = alias else {
            tracing::error!(%sender, %recipient, "Cannot find the alias of the complaint.");
            return Ok(false);
        };

        tracing::info!(provider = provider.name(), alias = %alias.email, "Forward phase complaint.");
        if let Some(user) = self.store.get_user(alias.user_id).await {
            let to = mailbox
                .or(alias.mailbox_email)
                .unwrap_or_else(|| user.email.clone());
            let url = alias.alias_id.map_or_else(
                || format!("{}/dashboard/", self.config.app.url),
                |id| format!("{}/dashboard/?highlight_alias_id={id}", self.config.app.url),
            );
            let text = self.renderer.render(
                Template::ComplaintForward,
                &[
                    ("provider", provider_name),
                    ("alias", &alias.email),
                    ("url", &url),
                ],
            );
            self.report_complaint(provider, Phase::Forward, &user, &to, text)
                .await;
        }
        self.store_provider_complaint(provider, alias.user_id, Phase::Forward, msg)
            .await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::Provider;
    use crate::{
        models::Contact,
        tests::{context, seed},
    };
    use aliasrelay_mail_parser::Mail;

    fn hotmail(original: &str) -> Mail {
        format!(
            "From: staff@hotmail.com\r\n\
             Content-Type: multipart/mixed; boundary=\"c\"\r\n\
             \r\n\
             --c\r\n\
             Content-Type: text/plain\r\n\
             \r\n\
             This is an email abuse report.\r\n\
             --c\r\n\
             Content-Type: message/rfc822\r\n\
             \r\n\
             {original}\r\n\
             --c--\r\n"
        )
        .parse::<Mail>()
        .unwrap()
    }

    fn yahoo(original: &str, original_rcpt: &str) -> Mail {
        format!(
            "From: feedback@arf.mail.yahoo.com\r\n\
             Content-Type: multipart/report; report-type=feedback-report; boundary=\"y\"\r\n\
             \r\n\
             --y\r\n\
             Content-Type: text/plain\r\n\
             \r\n\
             Yahoo feedback loop.\r\n\
             --y\r\n\
             Content-Type: message/feedback-report\r\n\
             \r\n\
             Feedback-Type: abuse\r\n\
             original-rcpt-to: {original_rcpt}\r\n\
             \r\n\
             --y\r\n\
             Content-Type: message/rfc822\r\n\
             \r\n\
             {original}\r\n\
             --y--\r\n"
        )
        .parse::<Mail>()
        .unwrap()
    }

    #[rstest::rstest]
    #[case(Provider::Hotmail, "staff@hotmail.com")]
    #[case(Provider::Yahoo, "feedback@arf.mail.yahoo.com")]
    fn route(#[case] provider: Provider, #[case] sender: &str) {
        assert_eq!(Provider::from_sender(sender), Some(provider));
        assert_eq!(Provider::from_sender("someone@hotmail.com"), None);
    }

    #[test]
    fn original_addresses() {
        let msg = hotmail(
            "From: sender@world.com\r\nTo: a@b.com, alias@sl.example.com\r\nX-SimpleLogin-Envelope-To: alias@sl.example.com\r\n\r\nhi",
        );
        assert_eq!(
            Provider::Hotmail.original_addresses(&msg),
            Some(("sender@world.com".to_string(), "alias@sl.example.com".to_string()))
        );

        let msg = yahoo(
            "From: Sender <sender@world.com>\r\nTo: first@b.com\r\n\r\nhi",
            "alias@sl.example.com",
        );
        assert_eq!(
            Provider::Yahoo
                .original_message(&msg)
                .and_then(|m| m.get_header("To")),
            Some("first@b.com")
        );
        assert_eq!(
            Provider::Yahoo.original_addresses(&msg),
            Some(("sender@world.com".to_string(), "alias@sl.example.com".to_string()))
        );
    }

    #[tokio::test]
    async fn transactional_phase() {
        let (ctx, recorder) = context(seed()).await;
        let msg = hotmail("From: noreply@sl.example.com\r\nTo: user@example.com\r\n\r\nhi");

        assert!(ctx.handle_complaint(Provider::Hotmail, &msg).await.unwrap());
        // at most once a week
        assert!(ctx.handle_complaint(Provider::Hotmail, &msg).await.unwrap());

        let sent = recorder.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].envelope_to, "user@example.com");
    }

    #[tokio::test]
    async fn reply_phase() {
        let (ctx, recorder) = context(seed()).await;
        let msg = yahoo(
            "From: alias@sl.example.com\r\nTo: john@world.com\r\n\r\nhi",
            "john@world.com",
        );

        assert!(ctx.handle_complaint(Provider::Yahoo, &msg).await.unwrap());
        assert_eq!(recorder.sent().await.len(), 1);
    }

    #[tokio::test]
    async fn forward_phase() {
        let (ctx, recorder) = context(seed()).await;
        let contact = ctx
            .store
            .create_contact(Contact {
                user_id: 1,
                alias_id: 2,
                website_email: "shop@world.com".to_string(),
                reply_email: "ra+shop@sl.example.com".to_string(),
                ..Contact::default()
            })
            .await
            .unwrap();

        let msg = hotmail(&format!(
            "From: {}\r\nTo: user@example.com, second@example.com\r\nX-SimpleLogin-Envelope-To: second@example.com\r\n\r\nhi",
            contact.reply_email
        ));
        assert!(ctx.handle_complaint(Provider::Hotmail, &msg).await.unwrap());
        assert_eq!(recorder.sent().await.len(), 1);
    }

    #[rstest::rstest]
    #[case("From: deleted@sl.example.com\r\nTo: x@world.com\r\n\r\nhi", true)]
    #[case("From: x@world.com\r\nTo: deleted@sl.example.com\r\n\r\nhi", true)]
    #[case("From: x@world.com\r\nTo: nobody@elsewhere.com\r\n\r\nhi", false)]
    #[tokio::test]
    async fn not_reported(#[case] original: &str, #[case] handled: bool) {
        let (ctx, recorder) = context(seed()).await;
        assert_eq!(
            ctx.handle_complaint(Provider::Hotmail, &hotmail(original))
                .await
                .unwrap(),
            handled
        );
        assert!(recorder.sent().await.is_empty());
    }
}
