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
//! The phases delivering a message: forward to the mailboxes, reply to a contact and
//! submission from an alias.

mod forward;
mod reply;
mod submission;

pub use submission::check_submission_sender;

use crate::{
    models::{Alias, Id, Mailbox},
    notify::Notification,
    RelayContext,
};
use aliasrelay_mail_parser::{format_address, Mail};

/// The mailboxes already notified during a transaction.
///
/// A mailbox is told once about a message, however many of its aliases or reverse
/// aliases the message is addressed to.
#[derive(Debug, Default)]
pub struct FanOut {
    notified: std::collections::HashSet<Id>,
}

impl FanOut {
    /// Record the notification of `mailbox_id`, `false` if it was notified already.
    pub fn first_time(&mut self, mailbox_id: Id) -> bool {
        self.notified.insert(mailbox_id)
    }

    /// Number of mailboxes notified.
    #[must_use]
    pub fn len(&self) -> usize {
        self.notified.len()
    }

    ///
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.notified.is_empty()
    }
}

impl RelayContext {
    /// The `From` header of a message sent as `alias`, with the name of the alias or
    /// of its custom domain.
    pub(crate) async fn alias_from_header(&self, alias: &Alias) -> String {
        if let Some(name) = alias.name.as_deref().filter(|n| !n.is_empty()) {
            tracing::debug!(%name, "Alias name used in the From header.");
            return format_address(name, &alias.email);
        }

        let domain_name = match alias.custom_domain_id {
            Some(id) => self.store.get_custom_domain(id).await.and_then(|d| d.name),
            None => None,
        };
        match domain_name.filter(|n| !n.is_empty()) {
            Some(name) => {
                tracing::debug!(%name, "Custom domain name used in the From header.");
                format_address(&name, &alias.email)
            }
            None => alias.email.clone(),
        }
    }

    /// Tell the mailboxes of `alias` other than `delivered` about a message, each one once
    /// per transaction.
    pub(crate) async fn notify_other_mailboxes(
        &self,
        alias: &Alias,
        delivered: &Mailbox,
        fan_out: &mut FanOut,
        notification: impl Fn(&Mailbox) -> Notification + Send,
    ) {
        for mailbox in self.store.alias_mailboxes(alias.id).await {
            if mailbox.id == delivered.id || !mailbox.verified || mailbox.disabled {
                continue;
            }
            if !fan_out.first_time(mailbox.id) {
                tracing::debug!(mailbox = %mailbox.email, "Mailbox already notified.");
                continue;
            }
            self.notifier.send(&notification(&mailbox), true).await;
        }
    }
}

/// Number of addresses in the `To` and `Cc` headers.
pub(crate) fn count_recipients(msg: &Mail) -> usize {
    ["To", "Cc"]
        .iter()
        .flat_map(|header| msg.get_headers(header))
        .map(|value| {
            aliasrelay_mail_parser::parse_address_list(value).map_or(0, |list| list.len())
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::{count_recipients, FanOut};
    use aliasrelay_mail_parser::Mail;

    #[rstest::rstest]
    #[case("To: a@b.c\r\n", 1)]
    #[case("To: a@b.c, D <d@e.f>\r\nCc: g@h.i\r\n", 3)]
    #[case("Subject: none\r\n", 0)]
    fn recipients(#[case] headers: &str, #[case] expected: usize) {
        let msg = format!("{headers}\r\nbody").parse::<Mail>().unwrap();
        assert_eq!(count_recipients(&msg), expected);
    }

    #[test]
    fn once_per_mailbox() {
        let mut fan_out = FanOut::default();
        assert!(fan_out.first_time(2));
        assert!(!fan_out.first_time(2));
        assert!(fan_out.first_time(3));
        assert_eq!(fan_out.len(), 2);
    }
}
