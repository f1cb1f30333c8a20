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
use crate::{Receiver, ReceiverHandler};
use aliasrelay_common::auth::Mechanism;
use base64::Engine;
use tokio_stream::StreamExt;

/// Identity sent by the client during the SASL exchange, still to be verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Authentication identity (the username).
    pub authid: String,
    /// The password, in clear.
    pub authpass: String,
}

/// The possible outcomes of a SMTP-SASL exchange.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The client send `*\r\n` during the SASL exchange.
    #[error("sasl challenge cancelled by the client")]
    Canceled,
    /// The buffer sent/received during the SMTP+SASL exchange must be [`base64`] encoded.
    #[error("base64 decoding fail: {source}")]
    Base64 {
        /// Inner error.
        #[from]
        #[source]
        source: base64::DecodeError,
    },
    /// The decoded response does not follow the mechanism.
    #[error("malformed response: {0}")]
    Malformed(String),
    /// The client took too long to answer a challenge.
    #[error("the client did not answer in {0:?}")]
    Timeout(std::time::Duration),
    /// The client closed the connection in the middle of the exchange.
    #[error("connection closed during the exchange")]
    ConnectionClosed,
    /// Error while reading/writing to the underlying stream.
    #[error("io error: {0}")]
    IO(#[from] std::io::Error),
}

fn decode(buffer: &[u8]) -> Result<Vec<u8>, AuthError> {
    // RFC4954 4: a single "=" is an empty initial response
    if buffer == b"=" {
        return Ok(vec![]);
    }
    Ok(base64::engine::general_purpose::STANDARD.decode(buffer)?)
}

fn utf8(buffer: Vec<u8>) -> Result<String, AuthError> {
    String::from_utf8(buffer).map_err(|e| AuthError::Malformed(e.to_string()))
}

/// `[authzid] NUL authcid NUL passwd`, see RFC4616.
fn parse_plain(response: &[u8]) -> Result<Credentials, AuthError> {
    let mut fields = response.split(|b| *b == 0);
    match (fields.next(), fields.next(), fields.next(), fields.next()) {
        (Some(_authzid), Some(authid), Some(authpass), None) if !authid.is_empty() => {
            Ok(Credentials {
                authid: utf8(authid.to_vec())?,
                authpass: utf8(authpass.to_vec())?,
            })
        }
        _ => Err(AuthError::Malformed(
            "expected '[authzid] NUL authcid NUL passwd'".to_string(),
        )),
    }
}

impl<T, W, R> Receiver<T, W, R>
where
    T: ReceiverHandler + Send,
    W: tokio::io::AsyncWrite + Unpin + Send,
    R: tokio::io::AsyncRead + Unpin + Send,
{
    async fn challenge(&mut self, payload: &[u8]) -> Result<Vec<u8>, AuthError> {
        let challenge = format!(
            "334 {}\r\n",
            base64::engine::general_purpose::STANDARD.encode(payload)
        );
        self.sink.write_all(&challenge).await?;

        let timeout = self.limits.auth_timeout;
        let line = {
            let lines = self.stream.as_line_stream();
            tokio::pin!(lines);
            tokio::time::timeout(timeout, lines.next())
                .await
                .map_err(|_| AuthError::Timeout(timeout))?
        };

        let line = line.ok_or(AuthError::ConnectionClosed)??;
        let line = line.strip_suffix(b"\r\n").unwrap_or(&line);
        if line == b"*" {
            return Err(AuthError::Canceled);
        }
        decode(line)
    }

    /// Run the SASL exchange of the mechanism, the credentials are not verified here.
    pub(crate) async fn authenticate(
        &mut self,
        mechanism: Mechanism,
        initial_response: Option<Vec<u8>>,
    ) -> Result<Credentials, AuthError> {
        match mechanism {
            Mechanism::Plain => {
                let response = match initial_response {
                    Some(initial_response) => decode(&initial_response)?,
                    None => self.challenge(b"").await?,
                };
                parse_plain(&response)
            }
            Mechanism::Login => {
                let username = match initial_response {
                    Some(initial_response) => decode(&initial_response)?,
                    None => self.challenge(b"Username:").await?,
                };
                let password = self.challenge(b"Password:").await?;
                Ok(Credentials {
                    authid: utf8(username)?,
                    authpass: utf8(password)?,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[rstest::rstest]
    #[case(b"\0user@sl.example.com\0secret", Some(("user@sl.example.com", "secret")))]
    #[case(b"admin\0user@sl.example.com\0secret", Some(("user@sl.example.com", "secret")))]
    #[case(b"\0\0secret", None)]
    #[case(b"user\0secret", None)]
    #[case(b"a\0b\0c\0d", None)]
    fn plain(#[case] response: &[u8], #[case] expected: Option<(&str, &str)>) {
        assert_eq!(
            parse_plain(response).ok(),
            expected.map(|(authid, authpass)| Credentials {
                authid: authid.to_string(),
                authpass: authpass.to_string()
            })
        );
    }

    #[test]
    fn empty_initial_response() {
        assert_eq!(decode(b"=").unwrap(), Vec::<u8>::new());
        assert!(matches!(decode(b"!!"), Err(AuthError::Base64 { .. })));
    }
}
