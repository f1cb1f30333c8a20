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
/// Replies of the listener itself, before the relay core takes a decision.
#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    serde::Deserialize,
    serde::Serialize,
    strum::EnumString,
    strum::EnumVariantNames,
    strum::Display,
    strum::EnumIter,
)]
#[strum(serialize_all = "PascalCase")]
#[serde(rename_all = "PascalCase")]
#[must_use]
pub enum CodeID {
    //
    // Specials Messages
    //
    /// First message sent by the server
    Greetings,
    ///
    Help,
    ///
    Closing,
    ///
    Helo,
    /// Multi-line EHLO reply, advertising AUTH when the listener is a submission one
    EhloPlain,
    ///
    EhloSubmission,
    ///
    DataStart,
    //
    // SessionStatus
    //
    /// Accepted
    Ok,
    ///
    Denied,
    ///
    Failure,
    //
    // Parsing Command
    //
    ///
    UnrecognizedCommand,
    ///
    SyntaxErrorParams,
    ///
    Unimplemented,
    ///
    BadSequence,
    ///
    MessageSizeExceeded,
    //
    // Auth extension
    //
    ///
    AuthSucceeded,
    ///
    AuthMechNotSupported,
    ///
    AuthInvalidCredentials,
    /// The submission listener require the client to be authenticated for a mail transaction
    AuthRequired,
    ///
    AuthClientCanceled,
    ///
    AuthErrorDecode64,
    //
    // Security mechanism
    //
    /// The number of connection maximum accepted as the same time as been reached
    ConnectionMaxReached,
    /// The threshold `error_count` has been passed, then server will shutdown the connection
    TooManyError,
    ///
    Timeout,
    ///
    TooManyRecipients,
}
