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
use crate::{
    config::field::{
        FieldApp, FieldAppAlerts, FieldAppBounce, FieldAppDelivery, FieldAppRateLimit,
        FieldAppSpam, FieldAppStore, FieldAppVerp, FieldServer, FieldServerInterfaces,
        FieldServerLogs, FieldServerSMTP, FieldServerSMTPError, FieldServerSMTPTimeoutClient,
    },
    Config,
};
use aliasrelay_common::{collection, CodeID, Reply, ReplyCode};

impl Config {
    pub(crate) fn default_version_requirement() -> semver::VersionReq {
        semver::VersionReq {
            comparators: vec![semver::Comparator {
                op: semver::Op::Caret,
                major: 0,
                minor: Some(1),
                patch: None,
                pre: semver::Prerelease::EMPTY,
            }],
        }
    }
}

impl Default for FieldServer {
    fn default() -> Self {
        Self {
            name: Self::hostname(),
            client_count_max: Self::default_client_count_max(),
            message_size_limit: Self::default_message_size_limit(),
            interfaces: FieldServerInterfaces::default(),
            logs: FieldServerLogs::default(),
            smtp: FieldServerSMTP::default(),
        }
    }
}

impl FieldServer {
    pub(crate) fn hostname() -> String {
        hostname::get()
            .ok()
            .and_then(|name| name.into_string().ok())
            .unwrap_or_else(|| "localhost".to_string())
    }

    pub(crate) const fn default_client_count_max() -> i64 {
        16
    }

    pub(crate) const fn default_message_size_limit() -> usize {
        20_000_000
    }
}

impl Default for FieldServerInterfaces {
    fn default() -> Self {
        Self {
            addr: Self::default_addr(),
            addr_submission: vec![],
        }
    }
}

impl FieldServerInterfaces {
    pub(crate) fn default_addr() -> Vec<std::net::SocketAddr> {
        vec![std::net::SocketAddr::new(
            std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST),
            20381,
        )]
    }
}

impl Default for FieldServerLogs {
    fn default() -> Self {
        Self {
            filepath: Self::default_filepath(),
            level: Self::default_level(),
        }
    }
}

impl FieldServerLogs {
    pub(crate) fn default_filepath() -> std::path::PathBuf {
        "/var/log/aliasrelay/aliasrelay.log".into()
    }

    pub(crate) fn default_level() -> Vec<tracing_subscriber::filter::Directive> {
        vec![tracing_subscriber::filter::LevelFilter::WARN.into()]
    }
}

impl Default for FieldServerSMTPError {
    fn default() -> Self {
        Self {
            soft_count: 10,
            hard_count: 20,
            delay: std::time::Duration::from_millis(5000),
        }
    }
}

impl Default for FieldServerSMTPTimeoutClient {
    fn default() -> Self {
        Self {
            command: std::time::Duration::from_secs(30),
            auth: std::time::Duration::from_secs(5),
        }
    }
}

impl Default for FieldServerSMTP {
    fn default() -> Self {
        Self {
            rcpt_count_max: Self::default_rcpt_count_max(),
            error: FieldServerSMTPError::default(),
            timeout_client: FieldServerSMTPTimeoutClient::default(),
            codes: Self::default_smtp_codes(),
        }
    }
}

impl FieldServerSMTP {
    pub(crate) const fn default_rcpt_count_max() -> usize {
        1000
    }

    /// The `EHLO` replies depend on the server name, they are produced by [`Config::ensure`].
    pub(crate) fn default_smtp_codes() -> std::collections::BTreeMap<CodeID, Reply> {
        collection! {
            CodeID::Greetings => Reply::new(
                ReplyCode::Code{ code: 220 }, "{name} Service ready"
            ),
            CodeID::Help => Reply::new(
                ReplyCode::Code{ code: 214 }, "Commands supported: HELO EHLO AUTH MAIL RCPT DATA RSET NOOP QUIT HELP"
            ),
            CodeID::Closing => Reply::new(
                ReplyCode::Code{ code: 221 }, "Service closing transmission channel"
            ),
            CodeID::Helo => Reply::new(
                ReplyCode::Code{ code: 250 }, "Ok"
            ),
            CodeID::DataStart => Reply::new(
                ReplyCode::Code{ code: 354 }, "Start mail input; end with <CRLF>.<CRLF>"
            ),
            CodeID::Ok => Reply::new(
                ReplyCode::Code{ code: 250 }, "Ok"
            ),
            CodeID::Failure => Reply::new(
                ReplyCode::Code{ code: 451 }, "Requested action aborted: local error in processing"
            ),
            CodeID::Denied => Reply::new(
                ReplyCode::Code{ code: 554 }, "permanent problems with the remote server"
            ),
            CodeID::UnrecognizedCommand => Reply::new(
                ReplyCode::Code{ code: 500 }, "Syntax error command unrecognized"
            ),
            CodeID::SyntaxErrorParams => Reply::new(
                ReplyCode::Code{ code: 501 }, "Syntax error in parameters or arguments"
            ),
            CodeID::Unimplemented => Reply::new(
                ReplyCode::Code{ code: 502 }, "Command not implemented"
            ),
            CodeID::BadSequence => Reply::new(
                ReplyCode::Code{ code: 503 }, "Bad sequence of commands"
            ),
            CodeID::MessageSizeExceeded => Reply::new(
                ReplyCode::Enhanced{ code: 552, enhanced: "5.3.4".to_string() }, "Message size exceeds fixed maximum message size"
            ),
            CodeID::AuthSucceeded => Reply::new(
                ReplyCode::Enhanced{ code: 235, enhanced: "2.7.0".to_string() }, "Authentication succeeded"
            ),
            CodeID::AuthMechNotSupported => Reply::new(
                ReplyCode::Enhanced{ code: 504, enhanced: "5.5.4".to_string() }, "Mechanism not supported"
            ),
            CodeID::AuthInvalidCredentials => Reply::new(
                ReplyCode::Enhanced{ code: 535, enhanced: "5.7.8".to_string() }, "Authentication credentials invalid"
            ),
            CodeID::AuthRequired => Reply::new(
                ReplyCode::Enhanced{ code: 530, enhanced: "5.7.0".to_string() }, "Authentication required"
            ),
            CodeID::AuthClientCanceled => Reply::new(
                ReplyCode::Code{ code: 501 }, "Authentication canceled by client"
            ),
            CodeID::AuthErrorDecode64 => Reply::new(
                ReplyCode::Enhanced{ code: 501, enhanced: "5.5.2".to_string() }, "Invalid, not base64"
            ),
            CodeID::ConnectionMaxReached => Reply::new(
                ReplyCode::Code{ code: 554 }, "Cannot process connection, closing"
            ),
            CodeID::TooManyError => Reply::new(
                ReplyCode::Code{ code: 451 }, "Too many errors from the client"
            ),
            CodeID::Timeout => Reply::new(
                ReplyCode::Code{ code: 451 }, "Timeout - closing connection"
            ),
            CodeID::TooManyRecipients => Reply::new(
                ReplyCode::Code{ code: 452 }, "Requested action not taken: too many recipients"
            ),
        }
    }
}

impl Default for FieldApp {
    fn default() -> Self {
        Self {
            email_domain: "localhost".to_string(),
            url: Self::default_url(),
            support_name: Self::default_support_name(),
            alias_domains: vec![],
            postmaster: None,
            unsubscriber: None,
            max_recipients: Self::default_max_recipients(),
            verp: FieldAppVerp::default(),
            unsubscribe_secret: Self::default_secret(),
            spam: FieldAppSpam::default(),
            alerts: FieldAppAlerts::default(),
            bounce: FieldAppBounce::default(),
            rate_limit: FieldAppRateLimit::default(),
            replace_reverse_alias_max_contacts: Self::default_replace_reverse_alias_max_contacts(),
            ignored_emails: vec![],
            ignore_bounce_senders: vec![],
            dkim_domains: vec![],
            delivery: FieldAppDelivery::default(),
            store: FieldAppStore::default(),
        }
    }
}

impl FieldApp {
    pub(crate) fn default_url() -> String {
        "http://localhost:7777".to_string()
    }

    pub(crate) fn default_support_name() -> String {
        "aliasrelay".to_string()
    }

    pub(crate) const fn default_max_recipients() -> usize {
        50
    }

    pub(crate) fn default_secret() -> String {
        "aliasrelay-insecure-secret".to_string()
    }

    pub(crate) const fn default_replace_reverse_alias_max_contacts() -> usize {
        50
    }
}

impl Default for FieldAppVerp {
    fn default() -> Self {
        Self {
            prefix: Self::default_prefix(),
            secret: FieldApp::default_secret(),
            message_lifetime: Self::default_message_lifetime(),
        }
    }
}

impl FieldAppVerp {
    pub(crate) fn default_prefix() -> String {
        "sl".to_string()
    }

    pub(crate) const fn default_message_lifetime() -> std::time::Duration {
        std::time::Duration::from_secs(5 * 24 * 60 * 60)
    }
}

impl Default for FieldAppSpam {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            max_score: Self::default_max_score(),
            max_reply_phase_score: Self::default_max_reply_phase_score(),
        }
    }
}

impl FieldAppSpam {
    pub(crate) const fn default_enabled() -> bool {
        true
    }

    pub(crate) const fn default_max_score() -> f64 {
        5.5
    }

    pub(crate) const fn default_max_reply_phase_score() -> f64 {
        5.0
    }
}

impl Default for FieldAppAlerts {
    fn default() -> Self {
        Self {
            max_per_day: Self::default_max_per_day(),
        }
    }
}

impl FieldAppAlerts {
    pub(crate) const fn default_max_per_day() -> usize {
        4
    }
}

impl Default for FieldAppBounce {
    fn default() -> Self {
        Self {
            auto_disable: Self::default_auto_disable(),
        }
    }
}

impl FieldAppBounce {
    pub(crate) const fn default_auto_disable() -> bool {
        true
    }
}

impl Default for FieldAppRateLimit {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            per_alias: Self::default_per_alias(),
            per_mailbox: Self::default_per_mailbox(),
        }
    }
}

impl FieldAppRateLimit {
    pub(crate) const fn default_enabled() -> bool {
        true
    }

    pub(crate) const fn default_per_alias() -> usize {
        5
    }

    pub(crate) const fn default_per_mailbox() -> usize {
        10
    }
}

impl Default for FieldAppDelivery {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            port: Self::default_port(),
            timeout: Self::default_timeout(),
            max_attempts: Self::default_max_attempts(),
            backoff: Self::default_backoff(),
            unsent_dir: None,
        }
    }
}

impl Default for FieldAppStore {
    fn default() -> Self {
        Self {
            seed: None,
            path: None,
            email_log_retention: Self::default_email_log_retention(),
        }
    }
}

impl FieldAppStore {
    pub(crate) const fn default_email_log_retention() -> std::time::Duration {
        std::time::Duration::from_secs(14 * 24 * 3600)
    }
}

impl FieldAppDelivery {
    pub(crate) fn default_host() -> String {
        "127.0.0.1".to_string()
    }

    pub(crate) const fn default_port() -> u16 {
        aliasrelay_common::SMTP_PORT
    }

    pub(crate) const fn default_timeout() -> std::time::Duration {
        std::time::Duration::from_secs(10)
    }

    pub(crate) const fn default_max_attempts() -> usize {
        3
    }

    pub(crate) const fn default_backoff() -> std::time::Duration {
        std::time::Duration::from_millis(300)
    }
}
