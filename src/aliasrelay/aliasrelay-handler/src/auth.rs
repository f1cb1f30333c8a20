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
//! Authentication of the aliases on the submission port.

use crate::{models::Id, Store};
use aliasrelay_common::{auth::Mechanism, utils::sanitize_email, Reply, ReplyCode, Status};
use anyhow::Context;
extern crate alloc;

const ALGORITHM: &str = "pbkdf2_sha256";
const ITERATIONS: u32 = 100_000;
const SALT_LEN: usize = 16;
const HASH_LEN: usize = ring::digest::SHA256_OUTPUT_LEN;

fn b64() -> base64::engine::GeneralPurpose {
    base64::engine::general_purpose::STANDARD
}

fn derive(iterations: core::num::NonZeroU32, salt: &[u8], password: &str) -> [u8; HASH_LEN] {
    let mut hash = [0u8; HASH_LEN];
    ring::pbkdf2::derive(
        ring::pbkdf2::PBKDF2_HMAC_SHA256,
        iterations,
        salt,
        password.as_bytes(),
        &mut hash,
    );
    hash
}

/// Hash a password for [`crate::models::SmtpCredentials`], with a random salt.
///
/// The format is `pbkdf2_sha256${iterations}${salt}${hash}`, both in base64.
///
/// # Errors
///
/// * no random salt could be generated
pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let mut salt = [0u8; SALT_LEN];
    ring::rand::SecureRandom::fill(&ring::rand::SystemRandom::new(), &mut salt)
        .map_err(|_| anyhow::anyhow!("cannot generate a salt"))?;

    let iterations =
        core::num::NonZeroU32::new(ITERATIONS).context("the iteration count is zero")?;
    let hash = derive(iterations, &salt, password);

    Ok(format!(
        "{ALGORITHM}${ITERATIONS}${}${}",
        base64::Engine::encode(&b64(), salt),
        base64::Engine::encode(&b64(), hash)
    ))
}

/// Does `password` match the output of [`hash_password`], in constant time.
#[must_use]
pub fn verify_password(password: &str, password_hash: &str) -> bool {
    let mut parts = password_hash.split('$');
    let (Some(ALGORITHM), Some(iterations), Some(salt), Some(hash), None) = (
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
    ) else {
        tracing::warn!("Unknown password hash format.");
        return false;
    };

    let Some(iterations) = iterations
        .parse::<u32>()
        .ok()
        .and_then(core::num::NonZeroU32::new)
    else {
        return false;
    };
    let (Ok(salt), Ok(hash)) = (
        base64::Engine::decode(&b64(), salt),
        base64::Engine::decode(&b64(), hash),
    ) else {
        return false;
    };

    ring::pbkdf2::verify(
        ring::pbkdf2::PBKDF2_HMAC_SHA256,
        iterations,
        &salt,
        password.as_bytes(),
        &hash,
    )
    .is_ok()
}

/// Result of an authentication attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    /// The client can send as the alias.
    Authenticated {
        ///
        alias_id: Id,
        /// The alias address.
        username: String,
    },
    /// The reply to send back.
    Refused(Reply),
}

fn refused(code: u16, enhanced: Option<&str>, text: &str) -> AuthOutcome {
    let code = match enhanced {
        Some(enhanced) => ReplyCode::Enhanced {
            code,
            enhanced: enhanced.to_string(),
        },
        None => ReplyCode::Code { code },
    };
    AuthOutcome::Refused(Reply::new(code, text))
}

/// Check the credentials of the aliases sending through the submission port.
#[derive(Clone)]
pub struct SubmissionAuthenticator {
    store: alloc::sync::Arc<dyn Store>,
}

impl std::fmt::Debug for SubmissionAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubmissionAuthenticator").finish_non_exhaustive()
    }
}

impl SubmissionAuthenticator {
    ///
    #[must_use]
    pub fn new(store: alloc::sync::Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Authenticate `login` with `password`, the login is an alias address.
    #[tracing::instrument(skip(self, password))]
    pub async fn authenticate(&self, mechanism: &str, login: &str, password: &str) -> AuthOutcome {
        if mechanism.parse::<Mechanism>().is_err() {
            tracing::warn!("Unsupported mechanism.");
            return refused(504, Some("5.5.4"), "Mechanism not supported");
        }

        let username = sanitize_email(login);
        let Some(alias) = self.store.get_alias_by_email(&username).await else {
            tracing::warn!("No such alias.");
            return AuthOutcome::Refused(Status::E502.to_reply());
        };
        if !alias.enabled {
            tracing::warn!(alias = %alias.email, "Alias disabled.");
            return AuthOutcome::Refused(Status::E505.to_reply());
        }

        match self.store.get_user(alias.user_id).await {
            Some(user) if user.disabled => {
                tracing::warn!(user = %user.email, "User disabled.");
                return AuthOutcome::Refused(Status::E504.to_reply());
            }
            Some(user) if !user.enable_smtp_aliases => {
                tracing::warn!(user = %user.email, "SMTP disabled by the user.");
                return refused(521, None, "SMTP disabled by user");
            }
            Some(_) => {}
            None => return AuthOutcome::Refused(Status::E502.to_reply()),
        }

        match self.store.get_smtp_credentials(alias.id).await {
            Some(credentials) if verify_password(password, &credentials.password_hash) => {
                tracing::info!("Alias authenticated.");
                AuthOutcome::Authenticated {
                    alias_id: alias.id,
                    username,
                }
            }
            _ => {
                tracing::warn!("Invalid credentials.");
                refused(535, Some("5.7.8"), "Authentication credentials invalid")
            }
        }
    }
}
