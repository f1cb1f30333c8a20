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
use crate::{DeliveryError, SendRequest, Transport};

/// Where and how to connect to the downstream MTA.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SenderParameters {
    ///
    pub server: String,
    ///
    pub port: u16,
    /// Name given in the `EHLO`.
    pub hello_name: String,
    /// Timeout of the network operations of one attempt.
    pub timeout: std::time::Duration,
    ///
    pub pool_idle_timeout: std::time::Duration,
    ///
    pub pool_max_size: u32,
}

impl SenderParameters {
    /// Parameters of the `[app.delivery]` table, the pool is kept small as the MTA
    /// is local.
    #[must_use]
    pub fn from_config(
        delivery: &aliasrelay_config::field::FieldAppDelivery,
        hello_name: impl Into<String>,
    ) -> Self {
        Self {
            server: delivery.host.clone(),
            port: delivery.port,
            hello_name: hello_name.into(),
            timeout: delivery.timeout,
            pool_idle_timeout: std::time::Duration::from_secs(60),
            pool_max_size: 10,
        }
    }
}

/// [`Transport`] relaying to the downstream MTA with `lettre`, in plain text.
pub struct Sender {
    params: SenderParameters,
    inner: lettre::AsyncSmtpTransport<lettre::Tokio1Executor>,
}

impl std::fmt::Debug for Sender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sender")
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

impl Sender {
    /// Build the connection pool, no connection is made before the first send.
    #[must_use]
    pub fn new(params: SenderParameters) -> Self {
        tracing::trace!(?params, "Creating a transport");

        let inner = lettre::AsyncSmtpTransport::<lettre::Tokio1Executor>::builder_dangerous(
            params.server.clone(),
        )
        .port(params.port)
        .timeout(Some(params.timeout))
        .hello_name(lettre::transport::smtp::extension::ClientId::Domain(
            params.hello_name.clone(),
        ))
        .pool_config(
            lettre::transport::smtp::PoolConfig::new()
                .idle_timeout(params.pool_idle_timeout)
                .max_size(params.pool_max_size),
        )
        .build();

        Self { params, inner }
    }
}

fn to_lettre_envelope(request: &SendRequest) -> Result<lettre::address::Envelope, DeliveryError> {
    let from = if request.has_null_sender() {
        None
    } else {
        Some(
            request
                .envelope_from
                .trim_matches(|c| c == '<' || c == '>')
                .parse::<lettre::Address>()?,
        )
    };
    let to = request
        .envelope_to
        .trim_matches(|c| c == '<' || c == '>')
        .parse::<lettre::Address>()?;

    Ok(lettre::address::Envelope::new(from, vec![to])?)
}

#[async_trait::async_trait]
impl Transport for Sender {
    async fn send(&self, request: &SendRequest) -> Result<(), DeliveryError> {
        use lettre::AsyncTransport;

        let envelope = to_lettre_envelope(request)?;

        if !request.mail_options.is_empty() || !request.rcpt_options.is_empty() {
            // SMTPUTF8 and 8BITMIME are negotiated by lettre from the EHLO reply
            tracing::debug!(
                mail_options = ?request.mail_options,
                rcpt_options = ?request.rcpt_options,
                "Envelope options left to the transport negotiation."
            );
        }

        let response = self.inner.send_raw(&envelope, &request.msg).await?;

        tracing::debug!(
            server = %self.params.server,
            code = %response.code(),
            "Message handed to the MTA."
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::to_lettre_envelope;
    use crate::{DeliveryError, SendRequest};

    #[rstest::rstest]
    #[case("<>", None)]
    #[case("", None)]
    #[case("sender@example.com", Some("sender@example.com"))]
    #[case("<sender@example.com>", Some("sender@example.com"))]
    fn envelope_sender(#[case] from: &str, #[case] expected: Option<&str>) {
        let envelope = to_lettre_envelope(&SendRequest::new(from, "to@example.com", "")).unwrap();

        assert_eq!(
            envelope.from().map(ToString::to_string),
            expected.map(str::to_string)
        );
        assert_eq!(envelope.to().len(), 1);
    }

    #[test]
    fn invalid_recipient() {
        assert!(matches!(
            to_lettre_envelope(&SendRequest::new("<>", "nobody", "")),
            Err(DeliveryError::Envelope(_))
        ));
    }
}
