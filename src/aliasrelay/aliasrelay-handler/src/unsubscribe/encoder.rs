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
use crate::models::Id;
use base64::Engine;

const UNSUB_PREFIX: &str = "un";
const MAX_REQUEST_LENGTH: usize = 512;
// bumped if the layout of the original mailto data changes
const ORIGINAL_DATA_VERSION: u8 = 0;

/// What an unsubscribe request asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[repr(u8)]
pub enum UnsubscribeAction {
    ///
    UnsubscribeNewsletter = 1,
    ///
    DisableAlias = 2,
    /// Block the messages of a contact.
    DisableContact = 3,
    /// Relay the unsubscribe mailto of the original sender.
    OriginalUnsubscribeMailto = 4,
}

/// The mailto method of the original `List-Unsubscribe` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsubscribeOriginalData {
    ///
    pub alias_id: Id,
    ///
    pub recipient: String,
    ///
    pub subject: String,
}

/// A decoded unsubscribe request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnsubscribeData {
    /// id of the user
    UnsubscribeNewsletter(Id),
    /// id of the alias
    DisableAlias(Id),
    /// id of the contact
    DisableContact(Id),
    ///
    OriginalUnsubscribeMailto(UnsubscribeOriginalData),
}

impl UnsubscribeData {
    ///
    #[must_use]
    pub const fn action(&self) -> UnsubscribeAction {
        match self {
            Self::UnsubscribeNewsletter(_) => UnsubscribeAction::UnsubscribeNewsletter,
            Self::DisableAlias(_) => UnsubscribeAction::DisableAlias,
            Self::DisableContact(_) => UnsubscribeAction::DisableContact,
            Self::OriginalUnsubscribeMailto(_) => UnsubscribeAction::OriginalUnsubscribeMailto,
        }
    }

    fn payload(&self) -> serde_json::Value {
        let data = match self {
            Self::UnsubscribeNewsletter(id) | Self::DisableAlias(id) | Self::DisableContact(id) => {
                serde_json::json!(id)
            }
            Self::OriginalUnsubscribeMailto(original) => serde_json::json!([
                ORIGINAL_DATA_VERSION,
                original.alias_id,
                original.recipient,
                original.subject
            ]),
        };
        serde_json::json!([self.action() as u8, data])
    }

    fn from_payload(payload: &serde_json::Value) -> Option<Self> {
        let [action, data] = payload.as_array()?.as_slice() else {
            return None;
        };

        Some(match action.as_u64()? {
            1 => Self::UnsubscribeNewsletter(data.as_u64()?),
            2 => Self::DisableAlias(data.as_u64()?),
            3 => Self::DisableContact(data.as_u64()?),
            4 => {
                // the version number is ignored, there is only one
                let [_version, alias_id, recipient, subject] = data.as_array()?.as_slice() else {
                    return None;
                };
                Self::OriginalUnsubscribeMailto(UnsubscribeOriginalData {
                    alias_id: alias_id.as_u64()?,
                    recipient: recipient.as_str()?.to_string(),
                    subject: subject.as_str()?.to_string(),
                })
            }
            _ => return None,
        })
    }
}

/// Where to send an unsubscribe request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsubscribeLink {
    /// A `mailto:` or an `https:` uri.
    pub link: String,
    /// `true` for a `mailto:`.
    pub via_email: bool,
}

/// Produce and read back the signed unsubscribe requests.
pub struct UnsubscribeEncoder {
    key: ring::hmac::Key,
    unsubscriber: Option<String>,
    url: String,
}

impl std::fmt::Debug for UnsubscribeEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnsubscribeEncoder")
            .field("unsubscriber", &self.unsubscriber)
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

impl UnsubscribeEncoder {
    ///
    #[must_use]
    pub fn new(secret: &str, unsubscriber: Option<String>, url: &str) -> Self {
        Self {
            key: ring::hmac::Key::new(ring::hmac::HMAC_SHA256, secret.as_bytes()),
            unsubscriber,
            url: url.trim_end_matches('/').to_string(),
        }
    }

    ///
    #[must_use]
    pub fn from_config(app: &aliasrelay_config::field::FieldApp) -> Self {
        Self::new(
            &app.unsubscribe_secret,
            app.unsubscriber.clone(),
            &app.url,
        )
    }

    /// The address receiving the unsubscribe requests by email, if any.
    #[must_use]
    pub fn unsubscriber(&self) -> Option<&str> {
        self.unsubscriber.as_deref()
    }

    fn sign(&self, payload: &[u8]) -> Vec<u8> {
        ring::hmac::sign(&self.key, payload).as_ref()[..8].to_vec()
    }

    /// `un.{payload}.{signature}`, both url-safe base64 without padding.
    #[must_use]
    pub fn encode_subject(&self, data: &UnsubscribeData) -> String {
        let payload = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .encode(data.payload().to_string().as_bytes());
        let signature =
            base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(self.sign(payload.as_bytes()));

        let encoded = format!("{UNSUB_PREFIX}.{payload}.{signature}");
        if encoded.len() > MAX_REQUEST_LENGTH {
            tracing::warn!(len = encoded.len(), "Encoded unsubscribe request is too long.");
        }
        encoded
    }

    fn encode_url(&self, data: &UnsubscribeData) -> String {
        match data {
            UnsubscribeData::DisableAlias(alias_id) => {
                format!("{}/dashboard/unsubscribe/{alias_id}", self.url)
            }
            UnsubscribeData::DisableContact(contact_id) => {
                format!("{}/dashboard/block_contact/{contact_id}", self.url)
            }
            UnsubscribeData::UnsubscribeNewsletter(_)
            | UnsubscribeData::OriginalUnsubscribeMailto(_) => format!(
                "{}/dashboard/unsubscribe/encoded?data={}",
                self.url,
                self.encode_subject(data)
            ),
        }
    }

    /// The link of a request: a mailto to the unsubscriber when there is one,
    /// a dashboard url otherwise or when `force_web` is set.
    #[must_use]
    pub fn encode(&self, data: &UnsubscribeData, force_web: bool) -> UnsubscribeLink {
        match &self.unsubscriber {
            Some(unsubscriber) if !force_web => UnsubscribeLink {
                link: format!("mailto:{unsubscriber}?subject={}", self.encode_subject(data)),
                via_email: true,
            },
            _ => UnsubscribeLink {
                link: self.encode_url(data),
                via_email: false,
            },
        }
    }

    fn decode_legacy(subject: &str) -> Option<UnsubscribeData> {
        let parse = |id: &str| id.parse::<Id>().ok();

        if let Some(alias_id) = subject.strip_suffix('=') {
            parse(alias_id).map(UnsubscribeData::DisableAlias)
        } else if let Some(contact_id) = subject.strip_suffix('_') {
            parse(contact_id).map(UnsubscribeData::DisableContact)
        } else if let Some(user_id) = subject.strip_suffix('*') {
            parse(user_id).map(UnsubscribeData::UnsubscribeNewsletter)
        } else {
            // some providers strip the `=` suffix
            parse(subject).map(UnsubscribeData::DisableAlias)
        }
    }

    /// Read a request back, from its current or its legacy form.
    ///
    /// `None` when it is malformed or its signature is invalid.
    #[must_use]
    pub fn decode_subject(&self, subject: &str) -> Option<UnsubscribeData> {
        let subject = subject.trim();
        if !subject.contains(UNSUB_PREFIX) {
            return Self::decode_legacy(subject);
        }

        let signed = subject.strip_prefix(&format!("{UNSUB_PREFIX}."))?;
        let (payload, signature) = signed.rsplit_once('.')?;
        let signature = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(signature)
            .ok()?;
        if ring::constant_time::verify_slices_are_equal(&self.sign(payload.as_bytes()), &signature)
            .is_err()
        {
            tracing::warn!("Unsubscribe request with a bad signature.");
            return None;
        }

        let payload = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(payload)
            .ok()?;
        UnsubscribeData::from_payload(&serde_json::from_slice(&payload).ok()?)
    }
}
