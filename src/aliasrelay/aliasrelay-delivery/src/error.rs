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
/// Errors produced while handing a message to the downstream MTA.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// The server answered with a `5xx`, sending again will not help.
    #[error("permanent error: {0}")]
    Permanent(String),
    /// A `4xx` answer, a broken connection or a refused one.
    #[error("transient error: {0}")]
    Transient(String),
    /// The envelope cannot be expressed, nothing was sent.
    #[error("invalid envelope: {0}")]
    Envelope(String),
    /// The attempt did not finish in time.
    #[error("delivery attempt timed out after {0:?}")]
    Timeout(std::time::Duration),
    /// The unsent spool cannot be read or written.
    #[error("spool: {0}")]
    Spool(#[from] std::io::Error),
    /// A spooled request is not valid.
    #[error("spooled request: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DeliveryError {
    /// Should the attempt be retried.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Timeout(_))
    }
}

impl From<lettre::transport::smtp::Error> for DeliveryError {
    fn from(error: lettre::transport::smtp::Error) -> Self {
        if error.is_permanent() {
            Self::Permanent(error.to_string())
        } else if error.is_client() {
            Self::Envelope(error.to_string())
        } else {
            // network, connection, 4xx and unparsable answers
            Self::Transient(error.to_string())
        }
    }
}

impl From<lettre::error::Error> for DeliveryError {
    fn from(error: lettre::error::Error) -> Self {
        Self::Envelope(error.to_string())
    }
}

impl From<lettre::address::AddressError> for DeliveryError {
    fn from(error: lettre::address::AddressError) -> Self {
        Self::Envelope(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::DeliveryError;

    #[rstest::rstest]
    #[case(DeliveryError::Transient("421 try later".to_string()), true)]
    #[case(DeliveryError::Timeout(std::time::Duration::from_secs(1)), true)]
    #[case(DeliveryError::Permanent("550 no such user".to_string()), false)]
    #[case(DeliveryError::Envelope("missing recipient".to_string()), false)]
    #[case(DeliveryError::Spool(std::io::ErrorKind::NotFound.into()), false)]
    fn transient(#[case] error: DeliveryError, #[case] expected: bool) {
        assert_eq!(error.is_transient(), expected);
    }

    #[test]
    fn address_error_is_envelope() {
        let error = "not an address".parse::<lettre::Address>().unwrap_err();
        assert!(matches!(
            DeliveryError::from(error),
            DeliveryError::Envelope(_)
        ));
    }
}
