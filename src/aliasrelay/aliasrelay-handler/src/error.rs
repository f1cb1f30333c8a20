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

/// Errors of the persistence layer.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A row with the same key already exists, the caller lost a creation race.
    #[error("unique constraint violated on `{0}`")]
    UniqueViolation(&'static str),
    /// The address is in the global or in a domain trash.
    #[error("`{0}` is in the trash")]
    InTrash(String),
    ///
    #[error("{entity} `{id}` not found")]
    NotFound {
        /// table name
        entity: &'static str,
        ///
        id: Id,
    },
    /// The seed or the store file cannot be read or written.
    #[error("store file: `{0}`")]
    Io(#[from] std::io::Error),
    /// The seed or the store file is not valid.
    #[error("invalid store file: `{0}`")]
    Json(#[from] serde_json::Error),
}

/// A VERP address which cannot be trusted.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum VerpError {
    ///
    #[error("`{0}` has no domain")]
    MissingDomain(String),
    /// The local part is not `{prefix}.{payload}.{signature}`.
    #[error("`{0}` is not a VERP address")]
    Format(String),
    ///
    #[error("invalid base32: `{0}`")]
    Encoding(String),
    ///
    #[error("invalid signature")]
    Signature,
    /// The payload is not `[type, id, minutes]`.
    #[error("invalid payload: `{0}`")]
    Payload(String),
    ///
    #[error("unknown VERP type `{0}`")]
    UnknownType(u8),
    ///
    #[error("VERP address expired")]
    Expired,
    /// The id of a legacy bounce address is not an integer.
    #[error("`{0}` does not contain a valid id")]
    InvalidId(String),
}

/// Failure of the encryption capability.
#[derive(Debug, thiserror::Error)]
pub enum PgpError {
    /// No encryption backend is configured.
    #[error("no PGP backend available")]
    Unavailable,
    /// The backend failed, the key may be missing from its cache.
    #[error("encryption failed: `{0}`")]
    Encryption(String),
}

/// Errors interrupting the handling of a message.
///
/// The expected outcomes (unknown alias, spam, unauthorized sender...) are not errors,
/// they are mapped to a [`aliasrelay_common::Status`] directly.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// The sender of a forwarded message is one of our reverse aliases.
    #[error("cannot create a contact for the reverse alias `{0}`")]
    CannotCreateContactForReverseAlias(String),
    /// A reply is addressed to someone which is not a contact.
    #[error("`{0}` is not a reverse alias")]
    NonReverseAliasInReplyPhase(String),
    /// Every generated reverse alias collided.
    #[error("cannot generate a reverse alias")]
    CannotGenerateReverseAlias,
    ///
    #[error(transparent)]
    Verp(#[from] VerpError),
    ///
    #[error(transparent)]
    Store(#[from] StoreError),
    ///
    #[error(transparent)]
    Delivery(#[from] aliasrelay_delivery::DeliveryError),
    ///
    #[error(transparent)]
    Parser(#[from] aliasrelay_mail_parser::ParserError),
}

/// Result of the relay core.
pub type HandlerResult<T> = Result<T, HandlerError>;
