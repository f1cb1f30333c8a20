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
use crate::{Reply, ReplyCode};

/// Outcome of the relay for one transaction, sent back verbatim to the upstream MTA.
///
/// The exact text of each variant is consumed by the retry and bounce logic of the
/// upstream MTA, and must not change.
#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    strum::IntoStaticStr,
    strum::EnumIter,
    strum::EnumCount,
)]
#[must_use]
pub enum Status {
    /// The message has been relayed
    #[strum(serialize = "250 Message accepted for delivery")]
    E200,
    ///
    #[strum(serialize = "250 SL E201")]
    E201,
    ///
    #[strum(serialize = "250 Unsubscribe request accepted")]
    E202,
    ///
    #[strum(serialize = "250 SL E203 email can't be sent from a reverse-alias")]
    E203,
    /// The sender or the recipient is on the ignore list
    #[strum(serialize = "250 SL E204 ignore")]
    E204,
    ///
    #[strum(serialize = "250 SL E205 bounce handled")]
    E205,
    /// Out-of-office
    #[strum(serialize = "250 SL E206 Out of office")]
    E206,
    /// The sender is an ignore-bounce sender, no need to send back a bounce report
    #[strum(serialize = "250 SL E207 No bounce report")]
    E207,
    ///
    #[strum(serialize = "250 SL E208 Hotmail complaint handled")]
    E208,
    ///
    #[strum(serialize = "250 SL E209 Email Loop")]
    E209,
    ///
    #[strum(serialize = "250 SL E210 Yahoo complaint handled")]
    E210,
    ///
    #[strum(serialize = "250 SL E211 Bounce Forward phase handled")]
    E211,
    ///
    #[strum(serialize = "250 SL E212 Bounce Reply phase handled")]
    E212,
    ///
    #[strum(serialize = "250 SL E213 Unknown email ignored")]
    E213,
    /// 2xx on purpose, a 5xx would generate backscatter to a spoofed sender
    #[strum(serialize = "250 SL E214 Unauthorized for using reverse alias")]
    E214,
    ///
    #[strum(serialize = "250 SL E216 Handled spf policy")]
    E216,
    /// Encryption for the contact failed
    #[strum(serialize = "421 SL E402 Encryption failed - Retry later")]
    E402,
    ///
    #[strum(serialize = "421 SL E404 Unexpected error - Retry later")]
    E404,
    ///
    #[strum(serialize = "421 SL E405 Mailbox domain problem - Retry later")]
    E405,
    /// Encryption for the mailbox failed
    #[strum(serialize = "421 SL E406 Encryption failed - Retry later")]
    E406,
    ///
    #[strum(serialize = "421 SL E407 Retry later")]
    E407,
    ///
    #[strum(serialize = "550 SL E501")]
    E501,
    ///
    #[strum(serialize = "550 SL E502 Email not exist")]
    E502,
    ///
    #[strum(serialize = "550 SL E503")]
    E503,
    ///
    #[strum(serialize = "550 SL E504 Account disabled")]
    E504,
    /// The sending alias is disabled.
    #[strum(serialize = "550 SL E505 Alias disabled")]
    E505,
    ///
    #[strum(serialize = "550 SL E506 Email detected as spam")]
    E506,
    ///
    #[strum(serialize = "550 SL E507 Wrongly formatted subject")]
    E507,
    ///
    #[strum(serialize = "550 SL E508 Email not exist")]
    E508,
    ///
    #[strum(serialize = "550 SL E509 unauthorized")]
    E509,
    ///
    #[strum(serialize = "550 SL E510 so such user")]
    E510,
    ///
    #[strum(serialize = "550 SL E511 unsubscribe error")]
    E511,
    ///
    #[strum(serialize = "550 SL E512 No such email log")]
    E512,
    ///
    #[strum(serialize = "550 SL E514 Email sent to noreply address")]
    E514,
    ///
    #[strum(serialize = "550 SL E515 Email not exist")]
    E515,
    ///
    #[strum(serialize = "550 SL E516 invalid mailbox")]
    E516,
    ///
    #[strum(serialize = "550 SL E517 unverified mailbox")]
    E517,
    ///
    #[strum(serialize = "550 SL E518 Disabled mailbox")]
    E518,
    ///
    #[strum(serialize = "550 SL E519 Email detected as spam")]
    E519,
    ///
    #[strum(serialize = "550 SL E521 Cannot reach mailbox")]
    E521,
    ///
    #[strum(
        serialize = "550 SL E522 The user you are trying to contact is receiving mail at a rate that prevents additional messages from being delivered."
    )]
    E522,
    ///
    #[strum(serialize = "550 SL E523 Unknown error")]
    E523,
    ///
    #[strum(serialize = "550 SL E524 Wrong use of reverse-alias")]
    E524,
    ///
    #[strum(serialize = "550 SL E525 Alias loop")]
    E525,
    ///
    #[strum(serialize = "550 SL E526 Too many recipients")]
    E526,
}

impl Status {
    /// The status line, without the trailing CRLF.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        self.into()
    }

    /// The three digit reply code.
    #[must_use]
    pub fn code(self) -> u16 {
        self.as_str()
            .get(..3)
            .and_then(|c| c.parse().ok())
            .unwrap_or(550)
    }

    /// A status starting with `2` counts as a delivered message for aggregation.
    #[must_use]
    pub fn is_success(self) -> bool {
        self.as_str().starts_with('2')
    }

    /// Convert to a reply the protocol layer can write on the wire.
    pub fn to_reply(self) -> Reply {
        let text = self.as_str().get(4..).unwrap_or_default();
        Reply::new(ReplyCode::Code { code: self.code() }, text)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Status> for Reply {
    fn from(value: Status) -> Self {
        value.to_reply()
    }
}

#[cfg(test)]
mod tests {
    use super::Status;
    use strum::IntoEnumIterator;

    #[rstest::rstest]
    #[case(Status::E200, "250 Message accepted for delivery", true)]
    #[case(Status::E214, "250 SL E214 Unauthorized for using reverse alias", true)]
    #[case(Status::E402, "421 SL E402 Encryption failed - Retry later", false)]
    #[case(Status::E505, "550 SL E505 Alias disabled", false)]
    #[case(Status::E506, "550 SL E506 Email detected as spam", false)]
    #[case(Status::E526, "550 SL E526 Too many recipients", false)]
    fn stable_text(#[case] status: Status, #[case] text: &str, #[case] success: bool) {
        pretty_assertions::assert_eq!(status.to_string(), text);
        assert_eq!(status.is_success(), success);
    }

    #[test]
    fn every_status_is_a_valid_reply() {
        for status in Status::iter() {
            let reply = status.to_reply();
            assert_eq!(reply.code().value(), status.code());
            assert_eq!(reply.to_string(), format!("{status}\r\n"));
            assert_eq!(reply.is_error(), !status.is_success());
        }
    }
}
