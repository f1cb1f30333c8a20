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
use aliasrelay_common::{CodeID, Reply};

/// This structure contains all the field to configure the relay at startup.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// This field is used to check the compatibility of the configuration file
    /// with the version of the binary. see [`semver::VersionReq`]
    pub version_requirement: semver::VersionReq,
    /// see [`field::FieldServer`]
    #[serde(default)]
    pub server: field::FieldServer,
    /// see [`field::FieldApp`]
    pub app: field::FieldApp,
}

/// The inner field of the configuration.
pub mod field {
    use super::{CodeID, Reply};

    /// Settings of the listener.
    #[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
    #[serde(deny_unknown_fields)]
    pub struct FieldServer {
        /// Name of the server, used in the greetings and the `EHLO` reply.
        #[serde(default = "FieldServer::hostname")]
        pub name: String,
        /// Maximum number of client served at the same time.
        ///
        /// The client will be rejected if the server is full.
        ///
        /// If this value is `-1`, then the server will accept any number of client.
        #[serde(default = "FieldServer::default_client_count_max")]
        pub client_count_max: i64,
        /// Maximum size in bytes of the message, bigger messages are rejected
        /// with [`CodeID::MessageSizeExceeded`].
        #[serde(default = "FieldServer::default_message_size_limit")]
        pub message_size_limit: usize,
        /// see [`FieldServerInterfaces`]
        #[serde(default)]
        pub interfaces: FieldServerInterfaces,
        /// see [`FieldServerLogs`]
        #[serde(default)]
        pub logs: FieldServerLogs,
        /// see [`FieldServerSMTP`]
        #[serde(default)]
        pub smtp: FieldServerSMTP,
    }

    /// Address served by the relay.
    #[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
    #[serde(deny_unknown_fields)]
    pub struct FieldServerInterfaces {
        /// Addresses receiving the hand-off of the upstream MTA, without authentication.
        #[serde(default = "FieldServerInterfaces::default_addr")]
        #[serde(deserialize_with = "crate::parser::socket_addr::deserialize")]
        pub addr: Vec<std::net::SocketAddr>,
        /// Addresses accepting mails sent by users as one of their aliases,
        /// `AUTH` is mandatory on them.
        #[serde(default)]
        #[serde(deserialize_with = "crate::parser::socket_addr::deserialize")]
        pub addr_submission: Vec<std::net::SocketAddr>,
    }

    /// The field related to the logs.
    #[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
    #[serde(deny_unknown_fields)]
    pub struct FieldServerLogs {
        /// Filepath of the server's log.
        #[serde(default = "FieldServerLogs::default_filepath")]
        pub filepath: std::path::PathBuf,
        /// Customize the log level of the different part of the program.
        ///
        /// See <https://docs.rs/tracing-subscriber/0.3.15/tracing_subscriber/filter/struct.EnvFilter.html>
        #[serde(
            default = "FieldServerLogs::default_level",
            serialize_with = "crate::parser::tracing_directive::serialize",
            deserialize_with = "crate::parser::tracing_directive::deserialize"
        )]
        pub level: Vec<tracing_subscriber::filter::Directive>,
    }

    /// Configuration of the error handling of the client.
    #[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
    #[serde(deny_unknown_fields)]
    pub struct FieldServerSMTPError {
        /// The maximum number of errors before the client is delay between each response.
        ///
        /// `-1` to disable
        pub soft_count: i64,
        /// The maximum number of errors before the client is disconnected.
        ///
        /// `-1` to disable
        pub hard_count: i64,
        /// The delay used between each response, after `soft_count` errors.
        /// Unused if `soft_count` is `-1`.
        #[serde(with = "humantime_serde")]
        pub delay: std::time::Duration,
    }

    /// Configuration of the receiver timeout.
    #[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
    #[serde(deny_unknown_fields)]
    pub struct FieldServerSMTPTimeoutClient {
        /// Maximum delay waiting for the next command of the client.
        #[serde(with = "humantime_serde")]
        pub command: std::time::Duration,
        /// Maximum delay waiting for each step of the SASL exchange.
        #[serde(with = "humantime_serde")]
        pub auth: std::time::Duration,
    }

    /// Configuration of the SMTP listener.
    #[serde_with::serde_as]
    #[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
    #[serde(deny_unknown_fields)]
    pub struct FieldServerSMTP {
        /// Maximum number of recipients received in the envelop, extra recipient
        /// will produce an [`CodeID::TooManyRecipients`].
        #[serde(default = "FieldServerSMTP::default_rcpt_count_max")]
        pub rcpt_count_max: usize,
        /// SMTP's error policy.
        #[serde(default)]
        pub error: FieldServerSMTPError,
        /// SMTP's timeout policy.
        #[serde(default)]
        pub timeout_client: FieldServerSMTPTimeoutClient,
        /// Dictionary of the reply sent by the listener during the SMTP transaction.
        ///
        /// The replies of the relay core itself are not configurable,
        /// see [`aliasrelay_common::Status`].
        #[serde(default)]
        #[serde_as(as = "std::collections::BTreeMap<serde_with::DisplayFromStr, _>")]
        pub codes: std::collections::BTreeMap<CodeID, Reply>,
    }

    /// Settings of the relay core.
    #[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
    #[serde(deny_unknown_fields)]
    pub struct FieldApp {
        /// Domain of the relay: reverse aliases, VERP addresses and the noreply
        /// address are generated on it.
        pub email_domain: String,
        /// Base url of the dashboard, used in the notification and unsubscribe links.
        #[serde(default = "FieldApp::default_url")]
        pub url: String,
        /// Display name of the notifications sender.
        #[serde(default = "FieldApp::default_support_name")]
        pub support_name: String,
        /// Domains where users can create aliases, including the directory ones.
        #[serde(default)]
        pub alias_domains: Vec<String>,
        /// Address receiving the feedback loop reports of the providers.
        #[serde(default)]
        pub postmaster: Option<String>,
        /// Address receiving the unsubscribe requests sent by email.
        #[serde(default)]
        pub unsubscriber: Option<String>,
        /// Maximum number of addresses in `To` and `Cc` of a forwarded message.
        #[serde(default = "FieldApp::default_max_recipients")]
        pub max_recipients: usize,
        /// see [`FieldAppVerp`]
        #[serde(default)]
        pub verp: FieldAppVerp,
        /// Secret of the signature of the unsubscribe subjects.
        #[serde(default = "FieldApp::default_secret")]
        pub unsubscribe_secret: String,
        /// see [`FieldAppSpam`]
        #[serde(default)]
        pub spam: FieldAppSpam,
        /// see [`FieldAppAlerts`]
        #[serde(default)]
        pub alerts: FieldAppAlerts,
        /// see [`FieldAppBounce`]
        #[serde(default)]
        pub bounce: FieldAppBounce,
        /// see [`FieldAppRateLimit`]
        #[serde(default)]
        pub rate_limit: FieldAppRateLimit,
        /// Maximum number of contacts scanned when replacing the reverse aliases
        /// of a reply body.
        #[serde(default = "FieldApp::default_replace_reverse_alias_max_contacts")]
        pub replace_reverse_alias_max_contacts: usize,
        /// Messages from or to these addresses are dropped with a success status.
        #[serde(default)]
        pub ignored_emails: Vec<String>,
        /// Senders for whom a failure does not produce a bounce.
        #[serde(default)]
        pub ignore_bounce_senders: Vec<String>,
        /// Messages sent from these domains ask the downstream MTA to sign them.
        #[serde(default)]
        pub dkim_domains: Vec<String>,
        /// see [`FieldAppDelivery`]
        #[serde(default)]
        pub delivery: FieldAppDelivery,
        /// see [`FieldAppStore`]
        #[serde(default)]
        pub store: FieldAppStore,
    }

    /// Envelope sender encoding.
    #[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
    #[serde(deny_unknown_fields)]
    pub struct FieldAppVerp {
        /// First label of the local part.
        #[serde(default = "FieldAppVerp::default_prefix")]
        pub prefix: String,
        /// Key of the HMAC signing the payload.
        #[serde(default = "FieldApp::default_secret")]
        pub secret: String,
        /// VERP addresses older than this are rejected.
        #[serde(
            with = "humantime_serde",
            default = "FieldAppVerp::default_message_lifetime"
        )]
        pub message_lifetime: std::time::Duration,
    }

    /// Spam gate.
    #[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
    #[serde(deny_unknown_fields)]
    pub struct FieldAppSpam {
        ///
        #[serde(default = "FieldAppSpam::default_enabled")]
        pub enabled: bool,
        /// Threshold of the forward phase, when the user has none.
        #[serde(default = "FieldAppSpam::default_max_score")]
        pub max_score: f64,
        /// Threshold of the reply phase.
        #[serde(default = "FieldAppSpam::default_max_reply_phase_score")]
        pub max_reply_phase_score: f64,
    }

    /// Notifications to the owners.
    #[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
    #[serde(deny_unknown_fields)]
    pub struct FieldAppAlerts {
        /// Maximum number of alerts of the same kind to the same address per day.
        #[serde(default = "FieldAppAlerts::default_max_per_day")]
        pub max_per_day: usize,
    }

    ///
    #[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
    #[serde(deny_unknown_fields)]
    pub struct FieldAppBounce {
        /// Disable aliases receiving too many bounces.
        #[serde(default = "FieldAppBounce::default_auto_disable")]
        pub auto_disable: bool,
    }

    /// Activity limits, computed on the email logs of the last minute.
    #[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
    #[serde(deny_unknown_fields)]
    pub struct FieldAppRateLimit {
        ///
        #[serde(default = "FieldAppRateLimit::default_enabled")]
        pub enabled: bool,
        ///
        #[serde(default = "FieldAppRateLimit::default_per_alias")]
        pub per_alias: usize,
        ///
        #[serde(default = "FieldAppRateLimit::default_per_mailbox")]
        pub per_mailbox: usize,
    }

    /// Downstream MTA.
    #[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
    #[serde(deny_unknown_fields)]
    pub struct FieldAppDelivery {
        ///
        #[serde(default = "FieldAppDelivery::default_host")]
        pub host: String,
        ///
        #[serde(default = "FieldAppDelivery::default_port")]
        pub port: u16,
        /// Timeout of one attempt.
        #[serde(with = "humantime_serde", default = "FieldAppDelivery::default_timeout")]
        pub timeout: std::time::Duration,
        /// Number of attempts before giving up, transient errors only.
        #[serde(default = "FieldAppDelivery::default_max_attempts")]
        pub max_attempts: usize,
        /// The delay before the attempt `k` is `backoff * k`.
        #[serde(with = "humantime_serde", default = "FieldAppDelivery::default_backoff")]
        pub backoff: std::time::Duration,
        /// Directory where failed send requests are saved for a later resend.
        #[serde(default)]
        pub unsent_dir: Option<std::path::PathBuf>,
    }

    /// Persistence.
    #[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
    #[serde(deny_unknown_fields)]
    pub struct FieldAppStore {
        /// JSON fixture loaded at startup when `path` does not exist yet.
        #[serde(default)]
        pub seed: Option<std::path::PathBuf>,
        /// File holding the tables, rewritten after every change.
        #[serde(default)]
        pub path: Option<std::path::PathBuf>,
        /// Email logs older than this are removed from `path`.
        #[serde(
            with = "humantime_serde",
            default = "FieldAppStore::default_email_log_retention"
        )]
        pub email_log_retention: std::time::Duration,
    }

    impl FieldApp {
        /// Address used as the sender of the notifications, mails sent to it are dropped.
        #[must_use]
        pub fn noreply(&self) -> String {
            format!("noreply@{}", self.email_domain)
        }

        /// Is the address one of the ignored ones.
        #[must_use]
        pub fn is_ignored(&self, address: &str) -> bool {
            self.ignored_emails.iter().any(|i| i == address)
        }

        /// Is the sender one of the no-bounce-report ones.
        #[must_use]
        pub fn is_ignore_bounce_sender(&self, address: &str) -> bool {
            self.ignore_bounce_senders.iter().any(|i| i == address)
        }
    }
}
