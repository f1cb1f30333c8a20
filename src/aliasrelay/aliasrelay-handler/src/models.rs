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
//! The entities read and written by the relay core.
//!
//! Every struct can be loaded from the JSON seed of the [`MemoryStore`](crate::MemoryStore),
//! the missing fields take their default value.

/// Primary key of every table.
pub type Id = u64;

fn now() -> time::OffsetDateTime {
    time::OffsetDateTime::now_utc()
}

/// How the sender of a forwarded message is displayed in the `From` header.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SenderFormat {
    /// `"john at example.com - John" <reverse-alias>`
    #[default]
    At,
    /// `"john(a)example.com - John" <reverse-alias>`
    A,
    /// `John <reverse-alias>`
    NameOnly,
    /// `"john at example.com" <reverse-alias>`
    AtOnly,
    /// `reverse-alias`
    NoName,
}

/// What the `List-Unsubscribe` header of a forwarded message does.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnsubscribeBehaviour {
    /// Disable the alias.
    DisableAlias,
    /// Block the sender.
    BlockContact,
    /// Keep the method of the sender.
    #[default]
    PreserveOriginal,
}

/// Reply given to a sender blocked by the user.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockBehaviour {
    /// The sender does not know it is blocked.
    #[default]
    ReturnSuccess,
    ///
    Return5xx,
}

/// Owner of the aliases and of the mailboxes.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct User {
    ///
    pub id: Id,
    /// Address of the account, the alerts about the account are sent there.
    pub email: String,
    ///
    pub name: Option<String>,
    ///
    pub disabled: bool,
    /// Premium users can encrypt and have no alias quota.
    pub is_premium: bool,
    /// Maximum number of aliases of a free user, unlimited if missing.
    pub alias_quota: Option<usize>,
    /// Free users flagged this way cannot create contacts by hand.
    pub flag_disable_create_contacts: bool,
    /// Forward phase spam threshold.
    pub max_spam_score: Option<f64>,
    ///
    pub sender_format: SenderFormat,
    /// The reverse aliases contain a readable form of the sender address.
    pub include_sender_in_reverse_alias: bool,
    /// The reverse aliases in the body of a reply are replaced by the contact address.
    pub replace_reverse_alias: bool,
    /// Forwarded messages carry the envelope sender in a header.
    pub include_header_email_header: bool,
    ///
    pub unsub_behaviour: UnsubscribeBehaviour,
    ///
    pub block_behaviour: BlockBehaviour,
    /// The user can send from the aliases through the submission port.
    pub enable_smtp_aliases: bool,
    /// The user receives the newsletter.
    pub notification: bool,
    /// Mailbox used when an auto-created alias has none.
    pub default_mailbox_id: Id,
}

impl Default for User {
    fn default() -> Self {
        Self {
            id: 0,
            email: String::new(),
            name: None,
            disabled: false,
            is_premium: false,
            alias_quota: None,
            flag_disable_create_contacts: false,
            max_spam_score: None,
            sender_format: SenderFormat::default(),
            include_sender_in_reverse_alias: false,
            replace_reverse_alias: false,
            include_header_email_header: false,
            unsub_behaviour: UnsubscribeBehaviour::default(),
            block_behaviour: BlockBehaviour::default(),
            enable_smtp_aliases: false,
            notification: true,
            default_mailbox_id: 0,
        }
    }
}

impl User {
    /// Contacts created by the relay itself are always allowed.
    #[must_use]
    pub const fn can_create_contacts(&self) -> bool {
        self.is_premium || !self.flag_disable_create_contacts
    }

    /// Can the user get one more alias, given its current number of aliases.
    #[must_use]
    pub fn can_create_new_alias(&self, alias_count: usize) -> bool {
        !self.disabled
            && (self.is_premium || self.alias_quota.map_or(true, |quota| alias_count < quota))
    }
}

/// A real address of a user.
#[derive(Debug, Default, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Mailbox {
    ///
    pub id: Id,
    ///
    pub user_id: Id,
    ///
    pub email: String,
    /// The user proved it owns the address.
    pub verified: bool,
    /// Forwards to this mailbox are refused.
    pub disabled: bool,
    ///
    pub pgp_finger_print: Option<String>,
    ///
    pub pgp_public_key: Option<String>,
    ///
    pub disable_pgp: bool,
    /// Subject replacing the original one of the encrypted messages.
    pub generic_subject: Option<String>,
    /// Other addresses allowed to send as the aliases of this mailbox.
    pub authorized_addresses: Vec<String>,
}

impl Mailbox {
    ///
    #[must_use]
    pub const fn pgp_enabled(&self) -> bool {
        self.pgp_finger_print.is_some() && !self.disable_pgp
    }

    /// Is the address the mailbox itself or one of its authorized addresses.
    #[must_use]
    pub fn is_authorized(&self, address: &str) -> bool {
        self.email == address || self.authorized_addresses.iter().any(|a| a == address)
    }
}

/// A disposable address.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Alias {
    ///
    pub id: Id,
    ///
    pub user_id: Id,
    ///
    pub email: String,
    /// Display name used in the replies.
    pub name: Option<String>,
    ///
    pub enabled: bool,
    /// The primary mailbox, the other ones are in [`AliasMailbox`].
    pub mailbox_id: Id,
    ///
    pub custom_domain_id: Option<Id>,
    ///
    pub directory_id: Option<Id>,
    ///
    pub automatic_creation: bool,
    ///
    pub note: Option<String>,
    ///
    pub disable_pgp: bool,
    /// Bounces never disable this alias.
    pub cannot_be_disabled: bool,
    /// Replies are accepted from any sender.
    pub disable_email_spoofing_check: bool,
    ///
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: time::OffsetDateTime,
}

impl Default for Alias {
    fn default() -> Self {
        Self {
            id: 0,
            user_id: 0,
            email: String::new(),
            name: None,
            enabled: true,
            mailbox_id: 0,
            custom_domain_id: None,
            directory_id: None,
            automatic_creation: false,
            note: None,
            disable_pgp: false,
            cannot_be_disabled: false,
            disable_email_spoofing_check: false,
            created_at: now(),
        }
    }
}

/// A secondary mailbox of an alias.
#[derive(Debug, Default, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AliasMailbox {
    ///
    pub alias_id: Id,
    ///
    pub mailbox_id: Id,
}

/// Rule creating the aliases of a custom domain on the fly.
#[derive(Debug, Default, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct AutoCreateRule {
    /// Rules are evaluated by ascending order.
    pub order: i32,
    /// Must match the whole local part.
    pub regex: String,
    ///
    pub mailbox_ids: Vec<Id>,
}

/// A domain owned by a user.
#[derive(Debug, Default, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct CustomDomain {
    ///
    pub id: Id,
    ///
    pub user_id: Id,
    ///
    pub domain: String,
    /// Default display name of the aliases of the domain.
    pub name: Option<String>,
    ///
    pub verified: bool,
    /// Any address of the domain gets an alias on its first message.
    pub catch_all: bool,
    /// Mailboxes of the catch-all aliases.
    pub mailbox_ids: Vec<Id>,
    ///
    pub auto_create_rules: Vec<AutoCreateRule>,
}

/// A prefix of the relay domains owned by a user, `{name}/anything@domain`.
#[derive(Debug, Default, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Directory {
    ///
    pub id: Id,
    ///
    pub user_id: Id,
    ///
    pub name: String,
    ///
    pub disabled: bool,
    ///
    pub mailbox_ids: Vec<Id>,
}

/// A domain of the relay, aliases can be created on it.
#[derive(Debug, Default, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct SlDomain {
    ///
    pub domain: String,
    /// Reverse aliases of the aliases of this domain use this domain.
    pub use_as_reverse_alias: bool,
}

/// An alias removed by its owner, it cannot be created again.
#[derive(Debug, Default, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct DeletedAlias {
    ///
    pub email: String,
}

/// An alias of a custom domain removed by its owner.
#[derive(Debug, Default, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct DomainDeletedAlias {
    ///
    pub email: String,
    ///
    pub domain_id: Id,
    ///
    pub user_id: Id,
}

/// A correspondent of an alias.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Contact {
    ///
    pub id: Id,
    ///
    pub user_id: Id,
    ///
    pub alias_id: Id,
    /// The address of the correspondent, empty when it was invalid.
    pub website_email: String,
    ///
    pub name: Option<String>,
    /// The reverse alias.
    pub reply_email: String,
    /// Envelope sender of the first message.
    pub mail_from: Option<String>,
    ///
    pub invalid_email: bool,
    /// Messages from this contact are not forwarded.
    pub block_forward: bool,
    /// Created by the relay, not by the user.
    pub automatic_created: bool,
    /// Created from a `Cc` header.
    pub is_cc: bool,
    ///
    pub pgp_finger_print: Option<String>,
    ///
    pub pgp_public_key: Option<String>,
    ///
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: time::OffsetDateTime,
}

impl Default for Contact {
    fn default() -> Self {
        Self {
            id: 0,
            user_id: 0,
            alias_id: 0,
            website_email: String::new(),
            name: None,
            reply_email: String::new(),
            mail_from: None,
            invalid_email: false,
            block_forward: false,
            automatic_created: false,
            is_cc: false,
            pgp_finger_print: None,
            pgp_public_key: None,
            created_at: now(),
        }
    }
}

impl Contact {
    /// Maximum length of the display name.
    pub const MAX_NAME_LENGTH: usize = 512;

    /// The `From` of a message forwarded from this contact.
    #[must_use]
    pub fn new_addr(&self, sender_format: SenderFormat) -> String {
        let name = self.name.as_deref().unwrap_or_default();
        let with_email = |formatted: String| {
            if name.is_empty() || name == self.website_email.trim() {
                formatted
            } else {
                format!("{name} - {formatted}")
            }
        };

        let display_name = match sender_format {
            SenderFormat::NoName => return self.reply_email.clone(),
            SenderFormat::NameOnly => name.to_string(),
            SenderFormat::AtOnly => self.website_email.replace('@', " at ").trim().to_string(),
            SenderFormat::At => with_email(self.website_email.replace('@', " at ").trim().to_string()),
            SenderFormat::A => with_email(self.website_email.replace('@', "(a)").trim().to_string()),
        };

        aliasrelay_mail_parser::format_address(&display_name, &self.reply_email)
            .trim()
            .to_string()
    }
}

/// One relayed message.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct EmailLog {
    ///
    pub id: Id,
    ///
    pub user_id: Id,
    ///
    pub alias_id: Id,
    ///
    pub contact_id: Id,
    /// The mailbox receiving (forward) or sending (reply) the message.
    pub mailbox_id: Option<Id>,
    /// Sent by a mailbox to a contact.
    pub is_reply: bool,
    /// Sent through the submission port.
    pub is_smtp: bool,
    /// Not forwarded, the alias is disabled or the contact blocked.
    pub blocked: bool,
    ///
    pub bounced: bool,
    /// The message was an automatic answer to a reply.
    pub auto_replied: bool,
    ///
    pub is_spam: bool,
    ///
    pub spam_score: Option<f64>,
    ///
    pub spam_status: Option<String>,
    ///
    pub spam_report: Option<String>,
    ///
    pub refused_email_id: Option<Id>,
    ///
    pub bounced_mailbox_id: Option<Id>,
    /// `Message-ID` of the message received.
    pub message_id: Option<String>,
    /// `Message-ID` of the message sent, replies only.
    pub sl_message_id: Option<String>,
    ///
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: time::OffsetDateTime,
}

impl Default for EmailLog {
    fn default() -> Self {
        Self {
            id: 0,
            user_id: 0,
            alias_id: 0,
            contact_id: 0,
            mailbox_id: None,
            is_reply: false,
            is_smtp: false,
            blocked: false,
            bounced: false,
            auto_replied: false,
            is_spam: false,
            spam_score: None,
            spam_status: None,
            spam_report: None,
            refused_email_id: None,
            bounced_mailbox_id: None,
            message_id: None,
            sl_message_id: None,
            created_at: now(),
        }
    }
}

/// A bounce received for an address.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Bounce {
    ///
    pub email: String,
    /// The delivery status part of the report.
    pub info: Option<String>,
    ///
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: time::OffsetDateTime,
}

/// An alert sent to a user, used to limit their number.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SentAlert {
    ///
    pub user_id: Id,
    ///
    pub alert_type: String,
    ///
    pub to_email: String,
    ///
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: time::OffsetDateTime,
}

/// A message generated by the relay, its bounces are only logged.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TransactionalEmail {
    ///
    pub id: Id,
    ///
    pub email: String,
    ///
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: time::OffsetDateTime,
}

/// A message refused by a mailbox or a contact, kept for the user.
#[serde_with::serde_as]
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RefusedEmail {
    ///
    pub id: Id,
    ///
    pub user_id: Id,
    /// The original message, when it can be extracted from the report.
    #[serde_as(as = "Option<serde_with::base64::Base64>")]
    pub original: Option<Vec<u8>>,
    /// The whole report.
    #[serde_as(as = "serde_with::base64::Base64")]
    pub full_report: Vec<u8>,
}

/// Link between the `Message-ID` of a reply and the one the relay sent.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MessageIdMatching {
    ///
    pub original_message_id: String,
    ///
    pub sl_message_id: String,
    ///
    pub email_log_id: Option<Id>,
}

/// Password of an alias on the submission port.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SmtpCredentials {
    ///
    pub alias_id: Id,
    /// see [`crate::auth::hash_password`]
    pub password_hash: String,
}

/// Direction of the message a complaint is about.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Phase {
    /// A message generated by the relay.
    Transactional,
    ///
    Forward,
    ///
    Reply,
}

/// An abuse report of a provider, kept for the administrators.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ProviderComplaint {
    ///
    pub id: Id,
    ///
    pub user_id: Id,
    ///
    pub phase: Phase,
    ///
    pub refused_email_id: Id,
}

#[cfg(test)]
mod tests {
    use super::{Contact, SenderFormat, User};

    fn contact(name: Option<&str>) -> Contact {
        Contact {
            website_email: "john@example.com".to_string(),
            name: name.map(str::to_string),
            reply_email: "ra+abc@sl.example.com".to_string(),
            ..Contact::default()
        }
    }

    #[rstest::rstest]
    #[case(SenderFormat::At, Some("John"), "\"John - john at example.com\" <ra+abc@sl.example.com>")]
    #[case(SenderFormat::At, None, "\"john at example.com\" <ra+abc@sl.example.com>")]
    #[case(SenderFormat::At, Some("john@example.com"), "\"john at example.com\" <ra+abc@sl.example.com>")]
    #[case(SenderFormat::A, Some("John"), "\"John - john(a)example.com\" <ra+abc@sl.example.com>")]
    #[case(SenderFormat::NameOnly, Some("John"), "John <ra+abc@sl.example.com>")]
    #[case(SenderFormat::AtOnly, Some("John"), "\"john at example.com\" <ra+abc@sl.example.com>")]
    #[case(SenderFormat::NoName, Some("John"), "ra+abc@sl.example.com")]
    fn new_addr(
        #[case] format: SenderFormat,
        #[case] name: Option<&str>,
        #[case] expected: &str,
    ) {
        pretty_assertions::assert_eq!(contact(name).new_addr(format), expected);
    }

    #[test]
    fn alias_quota() {
        let user = User {
            alias_quota: Some(2),
            ..User::default()
        };
        assert!(user.can_create_new_alias(1));
        assert!(!user.can_create_new_alias(2));

        let premium = User {
            is_premium: true,
            ..user.clone()
        };
        assert!(premium.can_create_new_alias(100));

        let disabled = User {
            disabled: true,
            ..premium
        };
        assert!(!disabled.can_create_new_alias(0));
    }
}
