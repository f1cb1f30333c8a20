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

//! aliasrelay relay core
//!
//! Every inbound transaction is classified from its envelope and a few headers:
//! a message to an alias is forwarded to its mailboxes, a message to a reverse alias
//! is a reply sent as the alias, and the messages to the VERP addresses are bounces,
//! automatic answers or complaints about a previous relay.
//!
//! The core holds no state between two transactions, everything goes through the
//! [`Store`] of a [`RelayContext`].

#![doc(html_no_source)]
#![deny(missing_docs)]
#![forbid(unsafe_code)]
//
#![warn(rust_2018_idioms)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(clippy::cargo)]
//
#![allow(clippy::module_name_repetitions)]

mod alias;
mod auth;
mod bounce;
mod complaint;
mod contact;
mod context;
mod envelope;
mod error;
mod phase;
mod rate_limit;
mod relay;
mod reverse_alias;
mod store;
mod transform;

pub mod dkim;
pub mod models;
pub mod notify;
pub mod pgp;
pub mod spam;
pub mod unsubscribe;
pub mod verp;

pub use alias::{AutoCreateDecision, CreateResult};
pub use auth::{hash_password, verify_password, AuthOutcome, SubmissionAuthenticator};
pub use bounce::{is_automatic_out_of_office, is_bounce};
pub use complaint::Provider;
pub use contact::{ContactCreateError, ContactCreateResult};
pub use context::RelayContext;
pub use envelope::Envelope;
pub use error::{HandlerError, HandlerResult, PgpError, StoreError, VerpError};
pub use phase::{check_submission_sender, FanOut};
pub use relay::aggregate;
pub use reverse_alias::{is_reverse_alias, normalize_reply_email};
pub use store::{MemoryStore, Store, Tables};

#[cfg(test)]
mod tests;
