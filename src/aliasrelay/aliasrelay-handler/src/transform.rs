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
//! Header rewrites applied to a message before it is relayed.

use crate::{
    models::{Alias, Contact, EmailLog, MessageIdMatching, User},
    pgp::MIME_HEADERS,
    HandlerError, HandlerResult, RelayContext, StoreError,
};
use aliasrelay_common::{
    is_valid_email,
    utils::{email_domain_part, sanitize_email, sanitize_email_keep_case},
};
use aliasrelay_mail_parser::{decode_header_value, format_address, parse_address_list, Mail};

/// `Forward` or `Reply`.
pub const DIRECTION_HEADER: &str = "X-SimpleLogin-Type";
///
pub const EMAIL_LOG_ID_HEADER: &str = "X-SimpleLogin-EmailLog-ID";
///
pub const ENVELOPE_FROM_HEADER: &str = "X-SimpleLogin-Envelope-From";
/// The alias which received the message, it may not be in the `To` header.
pub const ENVELOPE_TO_HEADER: &str = "X-SimpleLogin-Envelope-To";

/// Headers surviving the relay, along with [`MIME_HEADERS`].
pub const ALLOWED_HEADERS: [&str; 8] = [
    "From",
    "To",
    "Cc",
    "Subject",
    "Date",
    // the thread of the conversation
    "Message-ID",
    "References",
    "In-Reply-To",
];

/// Headers rewritten by the unsubscribe generator of the forward phase.
const UNSUBSCRIBE_HEADERS: [&str; 2] = ["List-Unsubscribe", "List-Unsubscribe-Post"];

/// The identity headers of the sender, sanitized on reception.
const ADDRESS_HEADERS: [&str; 4] = ["From", "To", "Cc", "Reply-To"];

/// Direction of a relayed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum Direction {
    /// A contact writes to an alias.
    Forward,
    /// A mailbox writes to a contact.
    Reply,
}

/// The current date, as expected in a `Date` header.
#[must_use]
pub fn rfc2822_now() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc2822)
        .unwrap_or_default()
}

/// A new `Message-ID` on `domain`.
#[must_use]
pub fn make_msgid(domain: &str) -> String {
    format!("<{}@{domain}>", uuid::Uuid::new_v4().simple())
}

/// A new `Message-ID` on `domain` starting with `id`.
#[must_use]
pub fn make_msgid_with_id(id: crate::models::Id, domain: &str) -> String {
    let random = std::iter::repeat_with(fastrand::alphanumeric)
        .take(12)
        .collect::<String>();
    format!("<{id}.{random}@{domain}>")
}

/// Drop every header not in [`ALLOWED_HEADERS`] or [`MIME_HEADERS`].
pub fn apply_allow_list(msg: &mut Mail) {
    let keep = ALLOWED_HEADERS
        .iter()
        .chain(MIME_HEADERS.iter())
        .copied()
        .collect::<Vec<_>>();
    msg.delete_all_headers_except(&keep);
}

/// Same as [`apply_allow_list`], the unsubscribe methods of the sender are kept too.
pub fn apply_forward_allow_list(msg: &mut Mail) {
    let keep = ALLOWED_HEADERS
        .iter()
        .chain(MIME_HEADERS.iter())
        .chain(UNSUBSCRIBE_HEADERS.iter())
        .copied()
        .collect::<Vec<_>>();
    msg.delete_all_headers_except(&keep);
}

/// Synthesize the `Date` header, some clients do not send it.
pub fn add_date_if_missing(msg: &mut Mail) {
    if msg.get_header("Date").map_or(true, |date| date.trim().is_empty()) {
        tracing::warn!("Missing date header, adding one.");
        msg.add_or_replace_header("Date", &rfc2822_now());
    }
}

/// Strip the line breaks of the address headers.
pub fn sanitize_headers(msg: &mut Mail) {
    for header in ADDRESS_HEADERS {
        msg.sanitize_header(header);
    }
}

/// Stamp the headers identifying the relayed message.
pub fn add_tracking_headers(
    msg: &mut Mail,
    direction: Direction,
    email_log_id: crate::models::Id,
    envelope_from: Option<&str>,
    envelope_to: Option<&str>,
) {
    msg.add_or_replace_header(DIRECTION_HEADER, &direction.to_string());
    msg.add_or_replace_header(EMAIL_LOG_ID_HEADER, &email_log_id.to_string());
    if let Some(envelope_from) = envelope_from {
        msg.add_or_replace_header(ENVELOPE_FROM_HEADER, envelope_from);
    }
    if let Some(envelope_to) = envelope_to {
        msg.add_or_replace_header(ENVELOPE_TO_HEADER, envelope_to);
    }
}

/// The queue id given by the MTA in the `Received` header, for the logs.
#[must_use]
pub fn get_queue_id(msg: &Mail) -> Option<String> {
    let received = msg.get_header("Received")?;

    let esmtp = regex::Regex::new(r"with E?SMTP[AS]? id ([0-9a-zA-Z]{1,})").ok()?;
    if let Some(captures) = esmtp.captures(received) {
        return captures.get(1).map(|id| id.as_str().to_string());
    }

    // the local submissions of postfix: `by mx.com (Postfix) id 4FxQmw1DXdz2vK2;`
    let postfix = regex::Regex::new(r"\(Postfix\)\s+id ([0-9a-zA-Z]{1,});").ok()?;
    postfix
        .captures(received)
        .and_then(|captures| captures.get(1))
        .map(|id| id.as_str().to_string())
}

fn addresses_of(msg: &Mail, header: &str) -> Vec<(String, String)> {
    msg.get_headers(header)
        .map(|value| decode_header_value(header, value))
        .flat_map(|value| match parse_address_list(&value) {
            Ok(list) => list,
            Err(error) => {
                tracing::warn!(%error, %header, %value, "Cannot parse the address header.");
                vec![]
            }
        })
        .collect()
}

fn replace_or_delete(msg: &mut Mail, header: &str, new_addrs: &[String]) {
    if new_addrs.is_empty() {
        tracing::debug!(%header, "Address header is now empty, deleted.");
        msg.delete_header(header);
    } else {
        let new_header = new_addrs.join(",");
        tracing::debug!(%header, old = ?msg.get_header(header), new = %new_header, "Address header replaced.");
        msg.add_or_replace_header(header, &new_header);
    }
}

impl RelayContext {
    /// Rewrite the `To` or `Cc` header of a forwarded message: every correspondent
    /// becomes the reverse alias of its contact, created if needed.
    ///
    /// # Errors
    ///
    /// * [`HandlerError::CannotCreateContactForReverseAlias`] a correspondent is one of our reverse aliases
    /// * the store failed
    pub async fn replace_header_when_forward(
        &self,
        msg: &mut Mail,
        alias: &Alias,
        user: &User,
        header: &str,
    ) -> HandlerResult<()> {
        let mut new_addrs = vec![];

        for (name, address) in addresses_of(msg, header) {
            let contact_email = sanitize_email_keep_case(&address);

            if contact_email.to_lowercase() == alias.email {
                new_addrs.push(format_address(&name, &contact_email));
                continue;
            }
            if !is_valid_email(&contact_email) || !contact_email.is_ascii() {
                tracing::warn!(%contact_email, %header, "Invalid contact email, skipped.");
                continue;
            }

            let name = Some(name).filter(|name| !name.is_empty());
            let contact = match self
                .store
                .get_contact_by_alias_and_email(alias.id, &contact_email)
                .await
            {
                Some(mut contact) => {
                    if contact.name != name {
                        tracing::debug!(contact = %contact.website_email, ?name, "Contact name updated.");
                        contact.name = name;
                        self.store.update_contact(&contact).await?;
                    }
                    contact
                }
                None => {
                    tracing::debug!(alias = %alias.email, %contact_email, %header, "Contact created from header.");
                    let contact = Contact {
                        user_id: alias.user_id,
                        alias_id: alias.id,
                        website_email: contact_email,
                        name,
                        is_cc: header.eq_ignore_ascii_case("cc"),
                        automatic_created: true,
                        ..Contact::default()
                    };
                    self.insert_or_fetch_contact(contact, alias, user).await?.0
                }
            };

            new_addrs.push(contact.new_addr(user.sender_format));
        }

        replace_or_delete(msg, header, &new_addrs);
        Ok(())
    }

    /// Rewrite the `To` or `Cc` header of a reply: every reverse alias becomes the
    /// address of its contact.
    ///
    /// # Errors
    ///
    /// * [`HandlerError::NonReverseAliasInReplyPhase`] an address is not a reverse alias
    pub async fn replace_header_when_reply(
        &self,
        msg: &mut Mail,
        alias: &Alias,
        header: &str,
    ) -> HandlerResult<()> {
        let mut new_addrs = vec![];

        for (_, address) in addresses_of(msg, header) {
            let reply_email = sanitize_email(&address);
            if reply_email == alias.email {
                continue;
            }

            let Some(contact) = self.store.get_contact_by_reply_email(&reply_email).await else {
                tracing::warn!(%reply_email, alias = %alias.email, "Reply sent to a non reverse alias.");
                return Err(HandlerError::NonReverseAliasInReplyPhase(reply_email));
            };
            if contact.alias_id != alias.id {
                tracing::warn!(%reply_email, alias = %alias.email, "Reverse alias of another alias.");
            }

            new_addrs.push(format_address(
                contact.name.as_deref().unwrap_or_default(),
                &contact.website_email,
            ));
        }

        replace_or_delete(msg, header, &new_addrs);
        Ok(())
    }

    /// The relay `Message-ID` of `original`, the same one for every recipient of a reply.
    async fn sl_message_id_of(
        &self,
        original: &str,
        alias: &Alias,
        email_log: &EmailLog,
    ) -> HandlerResult<String> {
        if let Some(matching) = self.store.get_message_id_matching_by_original(original).await {
            tracing::debug!(sl_message_id = %matching.sl_message_id, "Message-ID reused.");
            return Ok(matching.sl_message_id);
        }

        let sl_message_id = make_msgid_with_id(email_log.id, &email_domain_part(&alias.email));
        match self
            .store
            .create_message_id_matching(MessageIdMatching {
                original_message_id: original.to_string(),
                sl_message_id: sl_message_id.clone(),
                email_log_id: Some(email_log.id),
            })
            .await
        {
            Ok(()) => Ok(sl_message_id),
            Err(StoreError::UniqueViolation(_)) => {
                tracing::warn!(%original, "Message-ID matching created in the meantime.");
                Ok(self
                    .store
                    .get_message_id_matching_by_original(original)
                    .await
                    .map_or(sl_message_id, |matching| matching.sl_message_id))
            }
            Err(otherwise) => Err(otherwise.into()),
        }
    }

    /// Replace the `Message-ID` of a reply by a relay one, which does not reveal the
    /// mailbox, and the matching entries of `References`.
    ///
    /// # Errors
    ///
    /// * the store failed
    pub async fn replace_original_message_id(
        &self,
        alias: &Alias,
        email_log: &mut EmailLog,
        msg: &mut Mail,
    ) -> HandlerResult<()> {
        let sl_message_id = match msg.get_header("Message-ID").map(str::trim) {
            Some(original) if !original.is_empty() => {
                let original = original.to_string();
                self.sl_message_id_of(&original, alias, email_log).await?
            }
            _ => make_msgid_with_id(email_log.id, &email_domain_part(&alias.email)),
        };
        msg.add_or_replace_header("Message-ID", &sl_message_id);
        email_log.sl_message_id = Some(sl_message_id);
        self.store.update_email_log(email_log).await?;

        if let Some(references) = msg.get_header("References").map(str::to_string) {
            let mut new_references = vec![];
            for message_id in references.split_whitespace() {
                new_references.push(
                    self.store
                        .get_message_id_matching_by_original(message_id)
                        .await
                        .map_or_else(|| message_id.to_string(), |m| m.sl_message_id),
                );
            }
            msg.add_or_replace_header("References", &new_references.join(" "));
        }
        Ok(())
    }

    /// The contact answers a message of the relay: put back the `Message-ID` the
    /// mailbox knows in `In-Reply-To` and `References`.
    pub async fn replace_sl_message_id_by_original_message_id(&self, msg: &mut Mail) {
        if let Some(in_reply_to) = msg.get_header("In-Reply-To").map(str::trim) {
            if let Some(matching) = self.store.get_message_id_matching_by_sl(in_reply_to).await {
                tracing::debug!(original = %matching.original_message_id, "In-Reply-To restored.");
                msg.add_or_replace_header("In-Reply-To", &matching.original_message_id);
            }
        }

        if let Some(references) = msg.get_header("References").map(str::to_string) {
            let mut new_references = vec![];
            for message_id in references.split_whitespace() {
                new_references.push(
                    self.store
                        .get_message_id_matching_by_sl(message_id)
                        .await
                        .map_or_else(|| message_id.to_string(), |m| m.original_message_id),
                );
            }
            msg.add_or_replace_header("References", &new_references.join(" "));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        add_date_if_missing, add_tracking_headers, apply_allow_list, get_queue_id,
        make_msgid_with_id, Direction,
    };
    use crate::{
        models::EmailLog,
        tests::{context, seed},
        HandlerError,
    };
    use aliasrelay_mail_parser::Mail;

    fn mail(headers: &str) -> Mail {
        format!("{headers}\r\n\r\nbody").parse::<Mail>().unwrap()
    }

    #[test]
    fn allow_list() {
        let mut msg = mail(
            "From: a@b.c\r\nReceived: from x\r\nX-Mailbox: real@mailbox.com\r\nSubject: hi\r\nContent-Type: text/plain",
        );
        apply_allow_list(&mut msg);

        pretty_assertions::assert_eq!(
            msg.headers
                .0
                .iter()
                .map(|(name, _)| name.as_str())
                .collect::<Vec<_>>(),
            vec!["From", "Subject", "Content-Type"]
        );
    }

    #[test]
    fn date_and_tracking() {
        let mut msg = mail("Subject: hi");
        add_date_if_missing(&mut msg);
        assert!(msg.get_header("Date").is_some());

        add_tracking_headers(&mut msg, Direction::Forward, 42, None, Some("alias@sl.example.com"));
        assert_eq!(msg.get_header("X-SimpleLogin-Type"), Some("Forward"));
        assert_eq!(msg.get_header("X-SimpleLogin-EmailLog-ID"), Some("42"));
        assert_eq!(msg.get_header("X-SimpleLogin-Envelope-From"), None);
        assert_eq!(
            msg.get_header("X-SimpleLogin-Envelope-To"),
            Some("alias@sl.example.com")
        );
    }

    #[rstest::rstest]
    #[case(
        "Received: from mail-wr1.google.com (mail-wr1.google.com [1.2.3.4]) by mx1.sl.co (Postfix) with ESMTPS id 4FxQmw1DXdz2vK2 for <a@b.c>",
        Some("4FxQmw1DXdz2vK2")
    )]
    #[case(
        "Received: by mx1.sl.co (Postfix) id 4FxZy2xp3Gz2vKr; Fri, 4 Jun 2021 14:55:43 +0000",
        Some("4FxZy2xp3Gz2vKr")
    )]
    #[case("Received: from nowhere", None)]
    #[case("Subject: no received", None)]
    fn queue_id(#[case] headers: &str, #[case] expected: Option<&str>) {
        assert_eq!(get_queue_id(&mail(headers)).as_deref(), expected);
    }

    #[test]
    fn msgid() {
        let id = make_msgid_with_id(7, "sl.example.com");
        assert!(id.starts_with("<7."));
        assert!(id.ends_with("@sl.example.com>"));
    }

    #[tokio::test]
    async fn forward_headers() {
        let (ctx, _) = context(seed()).await;
        let alias = ctx.store.get_alias(1).await.unwrap();
        let user = ctx.store.get_user(1).await.unwrap();

        let mut msg = mail("To: alias@sl.example.com, Jane <jane@example.org>\r\nCc: bob@example.org");
        ctx.replace_header_when_forward(&mut msg, &alias, &user, "To")
            .await
            .unwrap();
        ctx.replace_header_when_forward(&mut msg, &alias, &user, "Cc")
            .await
            .unwrap();

        let jane = ctx
            .store
            .get_contact_by_alias_and_email(alias.id, "jane@example.org")
            .await
            .unwrap();
        assert_eq!(jane.name.as_deref(), Some("Jane"));
        assert!(!jane.is_cc);
        assert!(ctx
            .store
            .get_contact_by_alias_and_email(alias.id, "bob@example.org")
            .await
            .unwrap()
            .is_cc);

        let to = msg.get_header("To").unwrap();
        assert!(to.starts_with("alias@sl.example.com,"));
        assert!(to.contains(&jane.reply_email));
        assert!(!to.contains("jane@example.org>"));

        let mut msg = mail("To: broken");
        ctx.replace_header_when_forward(&mut msg, &alias, &user, "To")
            .await
            .unwrap();
        assert_eq!(msg.get_header("To"), None);
    }

    #[tokio::test]
    async fn reply_headers() {
        let (ctx, _) = context(seed()).await;
        let alias = ctx.store.get_alias(1).await.unwrap();
        let user = ctx.store.get_user(1).await.unwrap();
        let contact = ctx
            .get_or_create_contact("Jane <jane@example.org>", "jane@example.org", &alias, &user)
            .await
            .unwrap();

        let mut msg = mail(&format!(
            "To: alias@sl.example.com, \"whatever\" <{}>",
            contact.reply_email
        ));
        ctx.replace_header_when_reply(&mut msg, &alias, "To")
            .await
            .unwrap();
        assert_eq!(msg.get_header("To"), Some("Jane <jane@example.org>"));

        let mut msg = mail("Cc: stranger@example.org");
        assert!(matches!(
            ctx.replace_header_when_reply(&mut msg, &alias, "Cc").await,
            Err(HandlerError::NonReverseAliasInReplyPhase(address)) if address == "stranger@example.org"
        ));
    }

    #[tokio::test]
    async fn message_id_matching() {
        let (ctx, _) = context(seed()).await;
        let alias = ctx.store.get_alias(1).await.unwrap();

        let mut first_log = ctx
            .store
            .create_email_log(EmailLog {
                user_id: 1,
                alias_id: 1,
                is_reply: true,
                ..EmailLog::default()
            })
            .await
            .unwrap();
        let mut second_log = ctx
            .store
            .create_email_log(EmailLog {
                user_id: 1,
                alias_id: 1,
                is_reply: true,
                ..EmailLog::default()
            })
            .await
            .unwrap();

        let headers = "Message-ID: <orig@mailbox.com>\r\nReferences: <older@mailbox.com> <other@x.y>";
        let mut first = mail(headers);
        ctx.replace_original_message_id(&alias, &mut first_log, &mut first)
            .await
            .unwrap();
        let mut second = mail(headers);
        ctx.replace_original_message_id(&alias, &mut second_log, &mut second)
            .await
            .unwrap();

        let sl_message_id = first.get_header("Message-ID").unwrap().to_string();
        assert!(sl_message_id.ends_with("@sl.example.com>"));
        assert_eq!(second.get_header("Message-ID"), Some(sl_message_id.as_str()));
        assert_eq!(
            ctx.store.get_email_log(second_log.id).await.unwrap().sl_message_id,
            Some(sl_message_id.clone())
        );

        let mut answer = mail(&format!(
            "In-Reply-To: {sl_message_id}\r\nReferences: <x@y.z> {sl_message_id}"
        ));
        ctx.replace_sl_message_id_by_original_message_id(&mut answer)
            .await;
        assert_eq!(answer.get_header("In-Reply-To"), Some("<orig@mailbox.com>"));
        assert_eq!(
            answer.get_header("References"),
            Some("<x@y.z> <orig@mailbox.com>")
        );
    }
}
