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
use crate::ReplyCode;

/// SMTP message send by the server to the client as defined in RFC5321#4.2
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq, serde_with::SerializeDisplay, serde_with::DeserializeFromStr)]
pub struct Reply {
    code: ReplyCode,
    text: Vec<String>,
    folded: String,
}

impl Reply {
    /// Build a single line reply.
    pub fn new(code: ReplyCode, text: impl Into<String>) -> Self {
        Self::from_parts(code, vec![text.into()])
    }

    fn from_parts(code: ReplyCode, text: Vec<String>) -> Self {
        let mut reply = Self {
            code,
            text,
            folded: String::new(),
        };
        reply.folded = reply.fold();
        reply
    }

    ///
    pub const fn code(&self) -> &ReplyCode {
        &self.code
    }

    /// The lines of the reply, without the code prefix.
    #[must_use]
    pub fn text(&self) -> &[String] {
        &self.text
    }

    /// Is the reply a transient or permanent failure.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.code.is_error()
    }

    fn fold(&self) -> String {
        let last = self.text.len().saturating_sub(1);

        self.text
            .iter()
            .enumerate()
            .map(|(idx, line)| {
                let sep = if idx == last { ' ' } else { '-' };
                match &self.code {
                    ReplyCode::Code { code } => format!("{code}{sep}{line}\r\n"),
                    ReplyCode::Enhanced { code, enhanced } => {
                        format!("{code}{sep}{enhanced} {line}\r\n")
                    }
                }
            })
            .collect()
    }

    /// Create a new reply with:
    /// * `text` = `self.text` + `other.text`
    /// * `code` = `other.code`
    /// ```
    /// # use aliasrelay_common::Reply;
    /// let first = "250 mydomain.tld".parse::<Reply>().unwrap();
    /// let second = "250 AUTH PLAIN LOGIN".parse::<Reply>().unwrap();
    ///
    /// assert_eq!(
    ///   first.extended(&second).to_string(),
    ///   [
    ///     "250-mydomain.tld\r\n",
    ///     "250 AUTH PLAIN LOGIN\r\n"
    ///   ].concat()
    /// );
    /// ```
    pub fn extended(mut self, other: &Self) -> Self {
        self.text.extend(other.text.iter().cloned());
        Self::from_parts(other.code.clone(), self.text)
    }
}

impl std::str::FromStr for Reply {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut code = None;
        let mut text = vec![];

        for line in s.split("\r\n").filter(|l| !l.is_empty()) {
            let (line_code, rest) = ReplyCode::parse_line(line)?;
            match &code {
                None => code = Some(line_code),
                Some(first) if *first == line_code => (),
                Some(_) => anyhow::bail!("Reply codes are not consistent in {s:?}"),
            }
            text.push(
                rest.strip_prefix([' ', '-'])
                    .unwrap_or(rest)
                    .to_string(),
            );
        }

        match code {
            Some(code) => Ok(Self::from_parts(code, text)),
            None => anyhow::bail!("empty reply"),
        }
    }
}

impl std::fmt::Display for Reply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.folded)
    }
}

impl AsRef<str> for Reply {
    fn as_ref(&self) -> &str {
        &self.folded
    }
}

#[cfg(test)]
mod tests {
    use crate::{Reply, ReplyCode};

    #[rstest::rstest]
    #[case(
        "220 this is a custom code.\r\n",
        ReplyCode::Code { code: 220 },
        &["this is a custom code."],
    )]
    #[case(
        "504 5.5.4 Mechanism not supported\r\n",
        ReplyCode::Enhanced { code: 504, enhanced: "5.5.4".to_string() },
        &["Mechanism not supported"],
    )]
    #[case(
        "550 SL E514 Email sent to noreply address\r\n",
        ReplyCode::Code { code: 550 },
        &["SL E514 Email sent to noreply address"],
    )]
    #[case(
        concat!(
            "250-relay.example.com\r\n",
            "250-8BITMIME\r\n",
            "250-AUTH PLAIN LOGIN\r\n",
            "250 SMTPUTF8\r\n",
        ),
        ReplyCode::Code { code: 250 },
        &["relay.example.com", "8BITMIME", "AUTH PLAIN LOGIN", "SMTPUTF8"],
    )]
    #[case(
        concat!(
            "451-4.7.0 first line\r\n",
            "451 4.7.0 second line\r\n",
        ),
        ReplyCode::Enhanced { code: 451, enhanced: "4.7.0".to_string() },
        &["first line", "second line"],
    )]
    fn parse_and_fold(#[case] input: &str, #[case] code: ReplyCode, #[case] text: &[&str]) {
        let reply = input.parse::<Reply>().unwrap();
        pretty_assertions::assert_eq!(reply.code(), &code);
        pretty_assertions::assert_eq!(reply.text(), text);
        pretty_assertions::assert_eq!(reply.to_string(), input);
    }

    #[test]
    fn inconsistent_codes() {
        assert!("250-first\r\n251 second\r\n".parse::<Reply>().is_err());
        assert!("".parse::<Reply>().is_err());
    }

    #[test]
    fn new_single_line() {
        let reply = Reply::new(ReplyCode::Code { code: 221 }, "Service closing transmission channel");
        assert_eq!(
            reply.to_string(),
            "221 Service closing transmission channel\r\n"
        );
        assert!(!reply.is_error());
    }

    #[test]
    fn serde() {
        let reply = serde_json::from_str::<Reply>(r#""421 SL E404 Unexpected error - Retry later""#)
            .unwrap();
        assert!(reply.is_error());
        assert_eq!(
            serde_json::to_string(&reply).unwrap(),
            r#""421 SL E404 Unexpected error - Retry later\r\n""#
        );
    }
}
