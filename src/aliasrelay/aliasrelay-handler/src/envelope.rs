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
use aliasrelay_common::{utils::sanitize_email, NULL_SENDER};

/// The envelope of an inbound transaction, as received by the listener.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// `<>` for a bounce.
    pub mail_from: String,
    ///
    pub rcpt_tos: Vec<String>,
    /// The parameters of the `MAIL FROM` command.
    pub mail_options: Vec<String>,
    /// The parameters of the `RCPT TO` commands.
    pub rcpt_options: Vec<String>,
}

impl Envelope {
    ///
    #[must_use]
    pub fn new(mail_from: &str, rcpt_tos: &[&str]) -> Self {
        Self {
            mail_from: mail_from.to_string(),
            rcpt_tos: rcpt_tos.iter().map(ToString::to_string).collect(),
            ..Self::default()
        }
    }

    /// Trim, drop the inner spaces and lowercase the addresses.
    pub fn sanitize(&mut self) {
        if self.mail_from != NULL_SENDER {
            self.mail_from = sanitize_email(&self.mail_from);
        }
        for rcpt in &mut self.rcpt_tos {
            *rcpt = sanitize_email(rcpt);
        }
    }

    /// The envelope of the message once relayed to `rcpt` only.
    #[must_use]
    pub fn for_recipient(&self, rcpt: &str) -> Self {
        Self {
            rcpt_tos: vec![rcpt.to_string()],
            ..self.clone()
        }
    }

    /// The sender is the null reverse path.
    #[must_use]
    pub fn is_bounce(&self) -> bool {
        self.mail_from == NULL_SENDER
    }
}
