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
use super::reply::{Origin, Outgoing};
use crate::{envelope::Envelope, HandlerResult, RelayContext};
use aliasrelay_common::{utils::sanitize_email, Status};
use aliasrelay_mail_parser::Mail;

/// Anti-spoofing check of an authenticated submission: the envelope sender, the
/// `From` header and the login must be the same alias.
///
/// `None` when the message can be sent.
#[must_use]
pub fn check_submission_sender(mail_from: &str, msg: &Mail, username: &str) -> Option<Status> {
    let from_header = msg.get_header_decoded("From").unwrap_or_default();
    let Ok((_, from_address)) = aliasrelay_mail_parser::parse_full_address(&from_header) else {
        tracing::warn!(%from_header, "Cannot parse the From header of a submission.");
        return Some(Status::E501);
    };

    let username = sanitize_email(username);
    if sanitize_email(mail_from) != username || sanitize_email(&from_address) != username {
        tracing::warn!(%mail_from, %from_address, %username, "Submission sender spoofed.");
        return Some(Status::E509);
    }
    None
}

impl RelayContext {
    /// Send a message submitted by an authenticated alias to `rcpt_to`.
    ///
    /// `rcpt_to` may be a reverse alias, the message then goes to its contact.
    ///
    /// # Errors
    ///
    /// * [`crate::HandlerError::NonReverseAliasInReplyPhase`] the recipient is a reverse alias
    ///   and the message also carries other addresses
    /// * the store failed
    #[tracing::instrument(name = "submission", skip_all, fields(rcpt_to = %rcpt_to))]
    pub async fn handle_smtp(
        &self,
        envelope: &Envelope,
        mut msg: Mail,
        rcpt_to: &str,
    ) -> HandlerResult<Status> {
        let Some(alias) = self.store.get_alias_by_email(&envelope.mail_from).await else {
            tracing::warn!(mail_from = %envelope.mail_from, "Submission from an unknown alias.");
            return Ok(Status::E503);
        };
        if !alias.enabled {
            tracing::warn!(alias = %alias.email, "Alias disabled, submission refused.");
            return Ok(Status::E505);
        }
        let Some(user) = self.store.get_user(alias.user_id).await else {
            return Ok(Status::E503);
        };
        if user.disabled {
            tracing::warn!(user = %user.email, "User disabled, submission refused.");
            return Ok(Status::E504);
        }

        let recipient = match self.store.get_contact_by_reply_email(rcpt_to).await {
            Some(contact) => {
                tracing::debug!(reverse_alias = %rcpt_to, contact = %contact.website_email, "Submission to a reverse alias.");
                for header in ["To", "Cc"] {
                    self.replace_header_when_reply(&mut msg, &alias, header)
                        .await?;
                }
                contact.website_email
            }
            None => rcpt_to.to_string(),
        };

        let contact = self
            .get_or_create_contact_for_submission(&recipient, &alias, &user)
            .await?;

        let mailboxes = self.store.alias_mailboxes(alias.id).await;
        let Some(mailbox) = mailboxes.first() else {
            tracing::error!(alias = %alias.email, "Alias without mailbox.");
            return Ok(Status::E503);
        };

        let outgoing = Outgoing {
            alias: &alias,
            contact: &contact,
            user: &user,
            mailbox,
            envelope,
            origin: Origin::Submission,
        };
        Ok(self.send_as_alias(&outgoing, msg).await?.status)
    }
}

#[cfg(test)]
mod tests {
    use super::check_submission_sender;
    use crate::{
        envelope::Envelope,
        models::Contact,
        tests::{context, relayed, seed},
    };
    use aliasrelay_common::Status;
    use aliasrelay_mail_parser::Mail;

    #[rstest::rstest]
    #[case("alias@sl.example.com", "From: Me <alias@sl.example.com>", None)]
    #[case("Alias@SL.example.com", "From: alias@sl.example.com", None)]
    #[case("other@sl.example.com", "From: alias@sl.example.com", Some(Status::E509))]
    #[case("alias@sl.example.com", "From: other@sl.example.com", Some(Status::E509))]
    #[case("alias@sl.example.com", "Subject: no from", Some(Status::E501))]
    fn sender(#[case] mail_from: &str, #[case] header: &str, #[case] expected: Option<Status>) {
        let msg = format!("{header}\r\n\r\nbody").parse::<Mail>().unwrap();
        assert_eq!(
            check_submission_sender(mail_from, &msg, "alias@sl.example.com"),
            expected
        );
    }

    #[tokio::test]
    async fn to_new_contact() {
        let (ctx, recorder) = context(seed()).await;
        let msg = "From: alias@sl.example.com\r\nTo: shop@world.com\r\nSubject: order\r\n\r\nhi"
            .parse::<Mail>()
            .unwrap();

        assert_eq!(
            ctx.handle_smtp(
                &Envelope::new("alias@sl.example.com", &["shop@world.com"]),
                msg,
                "shop@world.com"
            )
            .await
            .unwrap(),
            Status::E200
        );

        let sent = recorder.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].envelope_to, "shop@world.com");
        assert_eq!(relayed(&sent[0]).get_header("From"), Some("alias@sl.example.com"));
        assert!(ctx
            .store
            .get_contact_by_alias_and_email(1, "shop@world.com")
            .await
            .is_some());

        let logs = ctx
            .store
            .alias_email_logs(1, time::OffsetDateTime::UNIX_EPOCH)
            .await;
        assert!(logs[0].is_smtp && logs[0].is_reply);
    }

    #[tokio::test]
    async fn to_reverse_alias() {
        let (ctx, recorder) = context(seed()).await;
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
        let msg = format!(
            "From: alias@sl.example.com\r\nTo: {}\r\nSubject: hi\r\n\r\nhi",
            contact.reply_email
        )
        .parse::<Mail>()
        .unwrap();

        assert_eq!(
            ctx.handle_smtp(
                &Envelope::new("alias@sl.example.com", &[&contact.reply_email]),
                msg,
                &contact.reply_email
            )
            .await
            .unwrap(),
            Status::E200
        );
        let sent = recorder.sent().await;
        assert_eq!(sent[0].envelope_to, "friend@world.com");
        assert_eq!(relayed(&sent[0]).get_header("To"), Some("friend@world.com"));
    }

    #[rstest::rstest]
    #[case("nobody@sl.example.com", false, true, Status::E503)]
    #[case("alias@sl.example.com", true, true, Status::E504)]
    #[case("alias@sl.example.com", false, false, Status::E505)]
    #[tokio::test]
    async fn refused(
        #[case] mail_from: &str,
        #[case] user_disabled: bool,
        #[case] alias_enabled: bool,
        #[case] expected: Status,
    ) {
        let mut tables = seed();
        tables.users[0].disabled = user_disabled;
        tables.aliases[0].enabled = alias_enabled;
        let (ctx, recorder) = context(tables).await;
        let msg = "Subject: x\r\n\r\nx".parse::<Mail>().unwrap();

        assert_eq!(
            ctx.handle_smtp(&Envelope::new(mail_from, &["a@b.c"]), msg, "a@b.c")
                .await
                .unwrap(),
            expected
        );
        assert!(recorder.sent().await.is_empty());
    }
}
