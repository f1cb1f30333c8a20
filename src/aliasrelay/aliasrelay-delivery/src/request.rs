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
/// A message to hand to the downstream MTA, with its envelope.
///
/// It is saved as JSON in the unsent spool, the message being base64 encoded.
#[serde_with::serde_as]
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SendRequest {
    /// `MAIL FROM`, `<>` or empty for the null sender.
    pub envelope_from: String,
    /// `RCPT TO`
    pub envelope_to: String,
    /// The message, as it goes on the wire.
    #[serde_as(as = "serde_with::base64::Base64")]
    pub msg: Vec<u8>,
    /// Options of the inbound `MAIL FROM`.
    #[serde(default)]
    pub mail_options: Vec<String>,
    /// Options of the inbound `RCPT TO`.
    #[serde(default)]
    pub rcpt_options: Vec<String>,
    /// Is it a message forwarded to a mailbox.
    #[serde(default)]
    pub is_forward: bool,
    /// A failed request is neither spooled nor reported as an error by the logs.
    #[serde(skip)]
    pub ignore_smtp_errors: bool,
    /// The caller handles the failure itself, a failed request is not spooled.
    #[serde(skip)]
    pub no_spool: bool,
    /// Number of times the request was taken back from the spool.
    #[serde(default = "SendRequest::default_retries")]
    pub retries: usize,
}

impl SendRequest {
    /// A request without options.
    #[must_use]
    pub fn new(
        envelope_from: impl Into<String>,
        envelope_to: impl Into<String>,
        msg: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            envelope_from: envelope_from.into(),
            envelope_to: envelope_to.into(),
            msg: msg.into(),
            mail_options: vec![],
            rcpt_options: vec![],
            is_forward: false,
            ignore_smtp_errors: false,
            no_spool: false,
            retries: 0,
        }
    }

    /// Pass the options of the inbound envelope through.
    #[must_use]
    pub fn with_options(mut self, mail_options: Vec<String>, rcpt_options: Vec<String>) -> Self {
        self.mail_options = mail_options;
        self.rcpt_options = rcpt_options;
        self
    }

    ///
    #[must_use]
    pub const fn forward(mut self) -> Self {
        self.is_forward = true;
        self
    }

    ///
    #[must_use]
    pub const fn ignore_smtp_errors(mut self) -> Self {
        self.ignore_smtp_errors = true;
        self
    }

    ///
    #[must_use]
    pub const fn no_spool(mut self) -> Self {
        self.no_spool = true;
        self
    }

    /// Is the envelope sender the null one.
    #[must_use]
    pub fn has_null_sender(&self) -> bool {
        matches!(self.envelope_from.trim(), "" | "<>")
    }

    // requests spooled before the counter existed were tried once already
    const fn default_retries() -> usize {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::SendRequest;

    #[test]
    fn message_is_base64() {
        let request = SendRequest::new("a@b.c", "d@e.f", "Hello").forward();
        let json = serde_json::to_value(&request).unwrap();

        pretty_assertions::assert_eq!(
            json,
            serde_json::json!({
                "envelope_from": "a@b.c",
                "envelope_to": "d@e.f",
                "msg": "SGVsbG8=",
                "mail_options": [],
                "rcpt_options": [],
                "is_forward": true,
                "retries": 0,
            })
        );
    }

    #[test]
    fn missing_fields() {
        let request = serde_json::from_str::<SendRequest>(
            r#"{"envelope_from": "<>", "envelope_to": "d@e.f", "msg": "SGVsbG8="}"#,
        )
        .unwrap();

        assert_eq!(request.msg, b"Hello");
        assert_eq!(request.retries, 1);
        assert!(request.has_null_sender());
        assert!(!request.ignore_smtp_errors);
        assert!(!request.no_spool);
    }
}
