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
//! Envelope addresses carrying the id of a relayed message, so a bounce can be
//! traced back to it without any state.
//!
//! `{prefix}.{base32(payload)}.{base32(signature)}@{domain}`, where the payload is
//! `[type, id, minutes since 2022-01-01]` and the signature the 8 first bytes of its
//! HMAC-SHA256. The address is lowercased, as relays may do it anyway.

use crate::{models::Id, VerpError};

/// 2022-01-01T00:00:00Z
const TIME_START: i64 = 1_640_995_200;

const LEGACY_BOUNCE: &str = "bounce+";
const LEGACY_BOUNCE_REPLY: &str = "bounce_reply+";
const LEGACY_TRANSACTIONAL: &str = "transactional+";

/// What the id of a VERP address refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum VerpType {
    /// An [`EmailLog`](crate::models::EmailLog) of the forward phase.
    BounceForward = 0,
    /// An [`EmailLog`](crate::models::EmailLog) of the reply phase.
    BounceReply = 1,
    /// A [`TransactionalEmail`](crate::models::TransactionalEmail).
    Transactional = 2,
}

impl TryFrom<u8> for VerpType {
    type Error = VerpError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::BounceForward),
            1 => Ok(Self::BounceReply),
            2 => Ok(Self::Transactional),
            otherwise => Err(VerpError::UnknownType(otherwise)),
        }
    }
}

/// Generate and verify the VERP addresses.
pub struct VerpCodec {
    prefix: String,
    key: ring::hmac::Key,
    lifetime: std::time::Duration,
    email_domain: String,
}

impl std::fmt::Debug for VerpCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerpCodec")
            .field("prefix", &self.prefix)
            .field("lifetime", &self.lifetime)
            .field("email_domain", &self.email_domain)
            .finish_non_exhaustive()
    }
}

impl VerpCodec {
    ///
    #[must_use]
    pub fn new(
        prefix: &str,
        secret: &str,
        lifetime: std::time::Duration,
        email_domain: &str,
    ) -> Self {
        Self {
            prefix: prefix.to_lowercase(),
            key: ring::hmac::Key::new(ring::hmac::HMAC_SHA256, secret.as_bytes()),
            lifetime,
            email_domain: email_domain.to_string(),
        }
    }

    /// The codec of the `[app.verp]` table.
    #[must_use]
    pub fn from_config(app: &aliasrelay_config::field::FieldApp) -> Self {
        Self::new(
            &app.verp.prefix,
            &app.verp.secret,
            app.verp.message_lifetime,
            &app.email_domain,
        )
    }

    fn sign(&self, payload: &[u8]) -> Vec<u8> {
        ring::hmac::sign(&self.key, payload).as_ref()[..8].to_vec()
    }

    fn minutes(at: time::OffsetDateTime) -> i64 {
        (at.unix_timestamp() - TIME_START) / 60
    }

    /// The VERP address of an object, on `domain` or on the relay domain.
    #[must_use]
    pub fn generate(&self, verp_type: VerpType, id: Id, domain: Option<&str>) -> String {
        self.generate_at(verp_type, id, domain, time::OffsetDateTime::now_utc())
    }

    /// Same as [`Self::generate`] with the clock given.
    #[must_use]
    pub fn generate_at(
        &self,
        verp_type: VerpType,
        id: Id,
        domain: Option<&str>,
        at: time::OffsetDateTime,
    ) -> String {
        let payload = format!("[{}, {id}, {}]", verp_type as u8, Self::minutes(at));
        let signature = self.sign(payload.as_bytes());

        format!(
            "{}.{}.{}@{}",
            self.prefix,
            data_encoding::BASE32_NOPAD.encode(payload.as_bytes()),
            data_encoding::BASE32_NOPAD.encode(&signature),
            domain.unwrap_or(&self.email_domain)
        )
        .to_lowercase()
    }

    /// Read a VERP address back.
    ///
    /// # Errors
    ///
    /// * see [`VerpError`]
    pub fn decode(&self, address: &str) -> Result<(VerpType, Id), VerpError> {
        self.decode_at(address, time::OffsetDateTime::now_utc())
    }

    /// Same as [`Self::decode`] with the clock given.
    ///
    /// # Errors
    ///
    /// * see [`VerpError`]
    pub fn decode_at(
        &self,
        address: &str,
        now: time::OffsetDateTime,
    ) -> Result<(VerpType, Id), VerpError> {
        let (local_part, _) = address
            .rsplit_once('@')
            .ok_or_else(|| VerpError::MissingDomain(address.to_string()))?;

        let fields = local_part.split('.').collect::<Vec<_>>();
        let [prefix, payload, signature] = fields.as_slice() else {
            return Err(VerpError::Format(address.to_string()));
        };
        if !prefix.eq_ignore_ascii_case(&self.prefix) {
            return Err(VerpError::Format(address.to_string()));
        }

        let decode = |field: &str| {
            data_encoding::BASE32_NOPAD
                .decode(field.to_uppercase().as_bytes())
                .map_err(|e| VerpError::Encoding(e.to_string()))
        };
        let payload = decode(payload)?;
        let signature = decode(signature)?;

        ring::constant_time::verify_slices_are_equal(&self.sign(&payload), &signature)
            .map_err(|_| VerpError::Signature)?;

        let (verp_type, id, minutes) = serde_json::from_slice::<(u8, Id, i64)>(&payload)
            .map_err(|e| VerpError::Payload(e.to_string()))?;
        let verp_type = VerpType::try_from(verp_type)?;

        let lifetime = i64::try_from(self.lifetime.as_secs() / 60).unwrap_or(i64::MAX);
        if minutes < Self::minutes(now).saturating_sub(lifetime) {
            return Err(VerpError::Expired);
        }

        Ok((verp_type, id))
    }

    /// Is the local part one of the control prefixes, such an alias cannot be created.
    #[must_use]
    pub fn is_reserved(&self, address: &str) -> bool {
        let address = address.to_lowercase();
        address.starts_with(&format!("{}.", self.prefix))
            || [LEGACY_BOUNCE, LEGACY_BOUNCE_REPLY, LEGACY_TRANSACTIONAL]
                .iter()
                .any(|prefix| address.starts_with(prefix))
    }

    /// Decode a control address, in its current or in its legacy form.
    ///
    /// `None` when the address is not a control address at all.
    #[must_use]
    pub fn parse_control(&self, address: &str) -> Option<Result<(VerpType, Id), VerpError>> {
        let address = address.to_lowercase();

        if address.starts_with(&format!("{}.", self.prefix)) {
            return Some(self.decode(&address));
        }

        let legacy_suffix = format!("+@{}", self.email_domain);
        let legacy = |verp_type| Some(parse_id_from_bounce(&address).map(|id| (verp_type, id)));

        if address.starts_with(LEGACY_BOUNCE_REPLY) && address.contains("+@") {
            legacy(VerpType::BounceReply)
        } else if address.starts_with(LEGACY_BOUNCE) && address.ends_with(&legacy_suffix) {
            legacy(VerpType::BounceForward)
        } else if address.starts_with(LEGACY_TRANSACTIONAL) && address.ends_with(&legacy_suffix) {
            legacy(VerpType::Transactional)
        } else {
            None
        }
    }
}

/// The id between the first and the last `+` of a legacy bounce address.
///
/// # Errors
///
/// * there is no such id
pub fn parse_id_from_bounce(address: &str) -> Result<Id, VerpError> {
    let invalid = || VerpError::InvalidId(address.to_string());

    let first = address.find('+').ok_or_else(invalid)?;
    let last = address.rfind('+').ok_or_else(invalid)?;
    address
        .get(first + 1..last)
        .and_then(|id| id.parse().ok())
        .ok_or_else(invalid)
}
