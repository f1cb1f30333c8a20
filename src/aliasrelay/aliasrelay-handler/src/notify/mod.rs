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
//! Messages the relay sends to its users: alerts, warnings and confirmations.

mod notifier;
mod renderer;

pub use notifier::{Notification, Notifier};
pub use renderer::{DefaultRenderer, Renderer, Template};

use crate::models::Phase;

/// Kind of an alert, the rate limits are counted per kind and per recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertType {
    /// A forwarded message bounced on the mailbox.
    Bounce,
    /// A reply bounced on the contact.
    BounceWhenReply,
    /// An alias was disabled because of its bounces.
    AliasDisabledBounce,
    ///
    Spam,
    /// A mailbox sent a message to its own alias.
    Cycle,
    /// Someone else than a mailbox of the alias used a reverse alias.
    ReverseAliasUnknownMailbox,
    /// A reply was sent to an address which is not a reverse alias.
    NonReverseAliasReplyPhase,
    /// A message was sent from a reverse alias.
    FromAddressIsReverseAlias,
    ///
    ToNoreply,
    /// A mailbox is on the domain of its alias.
    MailboxIsAlias,
    /// An alias could not be created on the fly.
    CannotCreateAlias,
    /// A provider reported a message as abusive.
    Complaint {
        ///
        phase: Phase,
        /// see [`crate::complaint::Provider::name`]
        provider: &'static str,
    },
}

impl std::fmt::Display for AlertType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Bounce => "bounce",
            Self::BounceWhenReply => "bounce-when-reply",
            Self::AliasDisabledBounce => "alias_disabled_bounce",
            Self::Spam => "spam",
            Self::Cycle => "cycle",
            Self::ReverseAliasUnknownMailbox => "reverse_alias_unknown_mailbox",
            Self::NonReverseAliasReplyPhase => "non_reverse_alias_reply_phase",
            Self::FromAddressIsReverseAlias => "from_address_is_reverse_alias",
            Self::ToNoreply => "to_noreply",
            Self::MailboxIsAlias => "mailbox_is_alias",
            Self::CannotCreateAlias => "cannot_create_alias",
            Self::Complaint { phase, provider } => {
                return write!(f, "complaint_{phase}_{provider}");
            }
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::AlertType;
    use crate::models::Phase;

    #[rstest::rstest]
    #[case(AlertType::BounceWhenReply, "bounce-when-reply")]
    #[case(AlertType::ReverseAliasUnknownMailbox, "reverse_alias_unknown_mailbox")]
    #[case(AlertType::Complaint { phase: Phase::Forward, provider: "yahoo" }, "complaint_forward_yahoo")]
    #[case(AlertType::Complaint { phase: Phase::Transactional, provider: "hotmail" }, "complaint_transactional_hotmail")]
    fn names(#[case] alert: AlertType, #[case] expected: &str) {
        assert_eq!(alert.to_string(), expected);
    }
}
