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
use super::{UnsubscribeData, UnsubscribeEncoder, UnsubscribeOriginalData};
use crate::models::{Alias, Contact, UnsubscribeBehaviour, User};
use aliasrelay_mail_parser::Mail;

const LIST_UNSUBSCRIBE: &str = "List-Unsubscribe";
const LIST_UNSUBSCRIBE_POST: &str = "List-Unsubscribe-Post";
const ONE_CLICK: &str = "List-Unsubscribe=One-Click";

/// Set the `List-Unsubscribe` header of a forwarded message.
#[derive(Debug)]
pub struct UnsubscribeGenerator<'a> {
    encoder: &'a UnsubscribeEncoder,
}

impl<'a> UnsubscribeGenerator<'a> {
    ///
    #[must_use]
    pub const fn new(encoder: &'a UnsubscribeEncoder) -> Self {
        Self { encoder }
    }

    fn add_unsubscribe_header(&self, msg: &mut Mail, data: &UnsubscribeData) {
        let link = self.encoder.encode(data, false);

        msg.add_or_replace_header(LIST_UNSUBSCRIBE, &format!("<{}>", link.link));
        if !link.via_email {
            msg.add_or_replace_header(LIST_UNSUBSCRIBE_POST, ONE_CLICK);
        }
    }

    /// Keep the http methods of the original header, they do not leak the mailbox,
    /// and relay its mailto method through the unsubscriber.
    fn preserve_original(&self, alias: &Alias, msg: &mut Mail) {
        let Some(header) = msg.get_header_decoded(LIST_UNSUBSCRIBE) else {
            tracing::debug!("Email has no unsubscribe header.");
            return;
        };

        let mut mailto = None;
        let mut others = vec![];

        for raw_method in header.split(',').map(str::trim) {
            let (Some(start), Some(end)) = (raw_method.find('<'), raw_method.rfind('>')) else {
                continue;
            };
            if start >= end {
                continue;
            }
            let method = &raw_method[start + 1..end];

            let url = match url::Url::parse(method) {
                Ok(url) => url,
                Err(error) => {
                    tracing::debug!(%error, %method, "Invalid unsubscribe method, ignored.");
                    continue;
                }
            };

            if url.scheme() == "mailto" {
                if Some(url.path()) == self.encoder.unsubscriber() {
                    tracing::debug!("The unsubscribe header already points to the unsubscriber.");
                    return;
                }
                let subject = url
                    .query_pairs()
                    .find(|(key, _)| key == "subject")
                    .map(|(_, value)| value.to_string())
                    .unwrap_or_default();
                mailto = Some((url.path().to_string(), subject));
            } else {
                tracing::debug!(scheme = url.scheme(), "Unsubscribe method kept.");
                others.push(method.to_string());
            }
        }

        if !others.is_empty() {
            msg.add_or_replace_header(
                LIST_UNSUBSCRIBE,
                &others
                    .iter()
                    .map(|method| format!("<{method}>"))
                    .collect::<Vec<_>>()
                    .join(", "),
            );
            msg.add_or_replace_header(LIST_UNSUBSCRIBE_POST, ONE_CLICK);
            return;
        }

        let Some((recipient, subject)) = mailto else {
            tracing::debug!("No usable unsubscribe method, headers deleted.");
            msg.delete_header(LIST_UNSUBSCRIBE);
            msg.delete_header(LIST_UNSUBSCRIBE_POST);
            return;
        };

        self.add_unsubscribe_header(
            msg,
            &UnsubscribeData::OriginalUnsubscribeMailto(UnsubscribeOriginalData {
                alias_id: alias.id,
                recipient,
                subject,
            }),
        );
    }

    /// Set the header according to the preference of the user.
    pub fn add_header_to_message(
        &self,
        user: &User,
        alias: &Alias,
        contact: &Contact,
        msg: &mut Mail,
    ) {
        match user.unsub_behaviour {
            UnsubscribeBehaviour::PreserveOriginal => self.preserve_original(alias, msg),
            UnsubscribeBehaviour::DisableAlias => {
                self.add_unsubscribe_header(msg, &UnsubscribeData::DisableAlias(alias.id));
            }
            UnsubscribeBehaviour::BlockContact => {
                self.add_unsubscribe_header(msg, &UnsubscribeData::DisableContact(contact.id));
            }
        }
    }
}
