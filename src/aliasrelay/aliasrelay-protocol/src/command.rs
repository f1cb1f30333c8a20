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
use crate::ConnectionKind;
use aliasrelay_common::auth::Mechanism;

/// Buffer received from the client.
#[derive(Debug)]
pub struct UnparsedArgs(pub Vec<u8>);
pub type Command<Verb, Args> = (Verb, Args);

/// Information received from the client at the connection TCP/IP.
#[derive(Debug)]
pub struct AcceptArgs {
    /// Peer address of the connection.
    pub client_addr: std::net::SocketAddr,
    /// Address of the server which accepted the connection.
    pub server_addr: std::net::SocketAddr,
    /// Kind of connection.
    pub kind: ConnectionKind,
    /// Instant when the connection was accepted.
    pub timestamp: time::OffsetDateTime,
    /// Unique id of the connection, used to correlate the logs.
    pub uuid: uuid::Uuid,
}

/// Name given by the client in `EHLO`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientName {
    /// FQDN of the client.
    Domain(String),
    /// IPv4 address literal, `[127.0.0.1]`.
    Ip4(std::net::Ipv4Addr),
    /// IPv6 address literal, `[IPv6:::1]`.
    Ip6(std::net::Ipv6Addr),
}

impl std::fmt::Display for ClientName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Domain(domain) => write!(f, "{domain}"),
            Self::Ip4(ip) => write!(f, "[{ip}]"),
            Self::Ip6(ip) => write!(f, "[IPv6:{ip}]"),
        }
    }
}

/// Information received from the client at the HELO command.
#[derive(Debug)]
pub struct HeloArgs {
    /// Name of the client.
    pub client_name: String,
}

/// Information received from the client at the EHLO command.
#[derive(Debug)]
pub struct EhloArgs {
    /// Name of the client.
    pub client_name: ClientName,
}

/// Information received from the client at the MAIL FROM command.
#[derive(Debug, PartialEq, Eq)]
pub struct MailFromArgs {
    /// Sender address, `None` for the null reverse path `<>`.
    pub reverse_path: Option<String>,
    /// ESMTP parameters following the path, `BODY=8BITMIME` for instance.
    pub mail_options: Vec<String>,
}

/// Information received from the client at the RCPT TO command.
#[derive(Debug, PartialEq, Eq)]
pub struct RcptToArgs {
    /// Recipient address.
    pub forward_path: String,
    /// ESMTP parameters following the path.
    pub rcpt_options: Vec<String>,
}

/// Information received from the client at the AUTH command.
#[derive(Debug)]
pub struct AuthArgs {
    /// Authentication mechanism.
    pub mechanism: Mechanism,
    /// First buffer of the exchange, sent with the command.
    /// [`base64`] encoded buffer.
    pub initial_response: Option<Vec<u8>>,
}

/// Error while parsing the arguments of a command.
#[derive(Debug, thiserror::Error)]
pub enum ParseArgsError {
    /// Non-UTF8 buffer.
    #[error("{0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
    /// Invalid IP address.
    #[error("{0}")]
    BadTypeAddr(#[from] std::net::AddrParseError),
    /// The command line exceed the maximum size.
    #[error("buffer is not supposed to be longer than {expected} bytes but got {got}")]
    BufferTooLong {
        /// Maximum size expected.
        expected: usize,
        /// Actual size.
        got: usize,
    },
    /// The mechanism of `AUTH` is not LOGIN or PLAIN.
    #[error("mechanism '{0}' is not supported")]
    InvalidMechanism(String),
    /// Other
    #[error("invalid arguments")]
    InvalidArgs,
}

fn strip_line_ending(value: &[u8]) -> Result<&[u8], ParseArgsError> {
    value.strip_suffix(b"\r\n").ok_or(ParseArgsError::InvalidArgs)
}

impl TryFrom<UnparsedArgs> for HeloArgs {
    type Error = ParseArgsError;

    fn try_from(value: UnparsedArgs) -> Result<Self, Self::Error> {
        let client_name = String::from_utf8(strip_line_ending(&value.0)?.to_vec())?;
        if client_name.trim().is_empty() {
            return Err(ParseArgsError::InvalidArgs);
        }
        Ok(Self {
            client_name: client_name.trim().to_string(),
        })
    }
}

impl TryFrom<UnparsedArgs> for EhloArgs {
    type Error = ParseArgsError;

    fn try_from(value: UnparsedArgs) -> Result<Self, Self::Error> {
        let value = String::from_utf8(strip_line_ending(&value.0)?.to_vec())?;
        let value = value.trim();

        let client_name = match value {
            ipv6 if ipv6.to_lowercase().starts_with("[ipv6:") && ipv6.ends_with(']') => {
                ClientName::Ip6(ipv6["[IPv6:".len()..ipv6.len() - 1].parse()?)
            }
            ipv4 if ipv4.starts_with('[') && ipv4.ends_with(']') => {
                ClientName::Ip4(ipv4[1..ipv4.len() - 1].parse()?)
            }
            domain => ClientName::Domain(
                addr::parse_domain_name(domain)
                    .map_err(|_| ParseArgsError::InvalidArgs)?
                    .to_string(),
            ),
        };

        Ok(Self { client_name })
    }
}

impl TryFrom<UnparsedArgs> for AuthArgs {
    type Error = ParseArgsError;

    fn try_from(value: UnparsedArgs) -> Result<Self, Self::Error> {
        let value = strip_line_ending(&value.0)?;

        let (mechanism, initial_response) =
            match value.iter().position(u8::is_ascii_whitespace) {
                Some(idx) => (&value[..idx], Some(value[idx + 1..].to_vec())),
                None => (value, None),
            };

        let mechanism = String::from_utf8(mechanism.to_vec())?;
        let mechanism = mechanism
            .to_uppercase()
            .parse()
            .map_err(|_| ParseArgsError::InvalidMechanism(mechanism))?;

        Ok(Self {
            mechanism,
            initial_response,
        })
    }
}

/// Split `<path> PARAM=1 PARAM2` in the path and its parameters.
fn parse_path_and_options(value: &[u8]) -> Result<(String, Vec<String>), ParseArgsError> {
    let value = String::from_utf8(strip_line_ending(value)?.to_vec())?;
    let value = value.trim_start();

    let path_end = value.find('>').ok_or(ParseArgsError::InvalidArgs)?;
    let path = value
        .get(..path_end)
        .and_then(|path| path.strip_prefix('<'))
        .ok_or(ParseArgsError::InvalidArgs)?;

    let options = value[path_end + 1..]
        .split_whitespace()
        .map(str::to_string)
        .collect();

    Ok((path.trim().to_string(), options))
}

impl TryFrom<UnparsedArgs> for MailFromArgs {
    type Error = ParseArgsError;

    fn try_from(value: UnparsedArgs) -> Result<Self, Self::Error> {
        let (path, mail_options) = parse_path_and_options(&value.0)?;
        Ok(Self {
            reverse_path: if path.is_empty() { None } else { Some(path) },
            mail_options,
        })
    }
}

impl TryFrom<UnparsedArgs> for RcptToArgs {
    type Error = ParseArgsError;

    fn try_from(value: UnparsedArgs) -> Result<Self, Self::Error> {
        let (forward_path, rcpt_options) = parse_path_and_options(&value.0)?;
        if forward_path.is_empty() {
            return Err(ParseArgsError::InvalidArgs);
        }
        Ok(Self {
            forward_path,
            rcpt_options,
        })
    }
}

/// SMTP Command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::AsRefStr, strum::EnumString, strum::EnumVariantNames)]
pub enum Verb {
    /// Used to identify the SMTP client to the SMTP server. (historical)
    #[strum(serialize = "HELO ")]
    Helo,
    /// Used to identify the SMTP client to the SMTP server and request smtp extensions.
    #[strum(serialize = "EHLO ")]
    Ehlo,
    /// Initiate a mail transaction, with the reverse path.
    #[strum(serialize = "MAIL FROM:")]
    MailFrom,
    /// Identify an individual recipient of the mail data.
    #[strum(serialize = "RCPT TO:")]
    RcptTo,
    /// Start the transfer of the mail data.
    #[strum(serialize = "DATA\r\n")]
    Data,
    /// The receiver MUST send a "221 OK" reply, and then close the transmission channel.
    #[strum(serialize = "QUIT\r\n")]
    Quit,
    /// Abort the current mail transaction.
    #[strum(serialize = "RSET\r\n")]
    Rset,
    /// Ask for helpful information.
    #[strum(serialize = "HELP")]
    Help,
    /// Does not affect any parameters or previously entered commands.
    #[strum(serialize = "NOOP\r\n")]
    Noop,
    /// Authentication with SASL protocol
    /// <https://datatracker.ietf.org/doc/html/rfc4954>
    #[strum(serialize = "AUTH ")]
    Auth,
    /// Any other buffer received while expecting a command is considered an
    /// unknown.
    Unknown,
}

/// Find the verb at the start of a command line.
pub(crate) fn parse_command(line: Vec<u8>) -> Command<Verb, UnparsedArgs> {
    <Verb as strum::VariantNames>::VARIANTS
        .iter()
        .filter(|name| {
            line.len() >= name.len() && line[..name.len()].eq_ignore_ascii_case(name.as_bytes())
        })
        .find_map(|name| {
            name.parse::<Verb>()
                .ok()
                .filter(|verb| *verb != Verb::Unknown)
                .map(|verb| (verb, UnparsedArgs(line[name.len()..].to_vec())))
        })
        .unwrap_or((Verb::Unknown, UnparsedArgs(line)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[rstest::rstest]
    #[case("EHLO relay.example.com\r\n", Verb::Ehlo, "relay.example.com\r\n")]
    #[case("ehlo relay.example.com\r\n", Verb::Ehlo, "relay.example.com\r\n")]
    #[case("MAIL FROM:<a@b.c>\r\n", Verb::MailFrom, "<a@b.c>\r\n")]
    #[case("rcpt to:<a@b.c>\r\n", Verb::RcptTo, "<a@b.c>\r\n")]
    #[case("DATA\r\n", Verb::Data, "")]
    #[case("HELP me\r\n", Verb::Help, " me\r\n")]
    #[case("AUTH PLAIN\r\n", Verb::Auth, "PLAIN\r\n")]
    #[case("VRFY a@b.c\r\n", Verb::Unknown, "VRFY a@b.c\r\n")]
    #[case("Unknown\r\n", Verb::Unknown, "Unknown\r\n")]
    fn command(#[case] line: &str, #[case] verb: Verb, #[case] args: &str) {
        let (parsed_verb, parsed_args) = parse_command(line.as_bytes().to_vec());
        assert_eq!(parsed_verb, verb);
        pretty_assertions::assert_eq!(std::str::from_utf8(&parsed_args.0).unwrap(), args);
    }

    #[rstest::rstest]
    #[case("<a@b.c>\r\n", Some("a@b.c"), &[])]
    #[case("<>\r\n", None, &[])]
    #[case(" <a@b.c> BODY=8BITMIME SMTPUTF8\r\n", Some("a@b.c"), &["BODY=8BITMIME", "SMTPUTF8"])]
    fn mail_from(#[case] args: &str, #[case] path: Option<&str>, #[case] options: &[&str]) {
        let parsed = MailFromArgs::try_from(UnparsedArgs(args.as_bytes().to_vec())).unwrap();
        assert_eq!(
            parsed,
            MailFromArgs {
                reverse_path: path.map(str::to_string),
                mail_options: options.iter().map(|s| (*s).to_string()).collect(),
            }
        );
    }

    #[rstest::rstest]
    #[case("a@b.c\r\n")]
    #[case("<a@b.c\r\n")]
    #[case("<>\r\n")]
    #[case("<a@b.c>")]
    fn rcpt_to_invalid(#[case] args: &str) {
        assert!(RcptToArgs::try_from(UnparsedArgs(args.as_bytes().to_vec())).is_err());
    }

    #[rstest::rstest]
    #[case("relay.example.com\r\n", ClientName::Domain("relay.example.com".to_string()))]
    #[case("[127.0.0.1]\r\n", ClientName::Ip4("127.0.0.1".parse().unwrap()))]
    #[case("[IPv6:::1]\r\n", ClientName::Ip6("::1".parse().unwrap()))]
    fn ehlo(#[case] args: &str, #[case] expected: ClientName) {
        let parsed = EhloArgs::try_from(UnparsedArgs(args.as_bytes().to_vec())).unwrap();
        assert_eq!(parsed.client_name, expected);
    }

    #[test]
    fn auth() {
        let parsed = AuthArgs::try_from(UnparsedArgs(b"plain AGFAYi5jAHB3\r\n".to_vec())).unwrap();
        assert_eq!(parsed.mechanism, Mechanism::Plain);
        assert_eq!(parsed.initial_response, Some(b"AGFAYi5jAHB3".to_vec()));

        assert!(matches!(
            AuthArgs::try_from(UnparsedArgs(b"CRAM-MD5\r\n".to_vec())),
            Err(ParseArgsError::InvalidMechanism(mechanism)) if mechanism == "CRAM-MD5"
        ));
    }
}
