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
use crate::Config;
use aliasrelay_common::{CodeID, Reply, ReplyCode};

#[test]
fn full_example() {
    let config = Config::from_toml(include_str!("full.toml")).unwrap();

    pretty_assertions::assert_eq!(config.server.name, "relay.example.com");
    assert_eq!(config.server.client_count_max, 64);
    assert_eq!(config.server.interfaces.addr_submission.len(), 1);
    assert_eq!(config.server.logs.level.len(), 2);
    assert_eq!(
        config.server.smtp.error.delay,
        std::time::Duration::from_secs(5)
    );

    assert_eq!(config.app.postmaster.as_deref(), Some("postmaster@sl.example.com"));
    assert_eq!(
        config.app.verp.message_lifetime,
        std::time::Duration::from_secs(5 * 24 * 3600)
    );
    assert_eq!(config.app.delivery.backoff, std::time::Duration::from_millis(300));
    assert_eq!(
        config.app.delivery.unsent_dir,
        Some(std::path::PathBuf::from("/var/spool/aliasrelay"))
    );
    assert_eq!(
        config.app.store.path,
        Some(std::path::PathBuf::from("/var/lib/aliasrelay/store.json"))
    );
    assert_eq!(
        config.app.store.email_log_retention,
        std::time::Duration::from_secs(7 * 24 * 3600)
    );
    assert!(config.app.is_ignored("ignored@example.org"));
    assert!(config.app.is_ignore_bounce_sender("MAILER-DAEMON@example.org"));
}

#[test]
fn minimal() {
    let config = Config::from_toml(
        r#"
version_requirement = ">=0.1.0"

[app]
email_domain = "SL.example.com"
"#,
    )
    .unwrap();

    assert_eq!(config.app.email_domain, "sl.example.com");
    assert_eq!(config.app.alias_domains, vec!["sl.example.com".to_string()]);
    assert_eq!(config.app.noreply(), "noreply@sl.example.com");
    assert_eq!(config.app.verp.prefix, "sl");
    assert!(config.app.rate_limit.enabled);
    assert!((config.app.spam.max_score - 5.5).abs() < f64::EPSILON);
    assert_eq!(config.app.delivery.max_attempts, 3);
    assert!(config.app.delivery.unsent_dir.is_none());
    assert!(config.app.store.path.is_none());
    assert_eq!(
        config.app.store.email_log_retention,
        std::time::Duration::from_secs(14 * 24 * 3600)
    );
}

#[rstest::rstest]
#[case::version(
    r#"
version_requirement = ">=99.0.0"
[app]
email_domain = "sl.example.com"
"#
)]
#[case::missing_domain(
    r#"
version_requirement = ">=0.1.0"
[app]
"#
)]
#[case::unknown_field(
    r#"
version_requirement = ">=0.1.0"
foo = "bar"
[app]
email_domain = "sl.example.com"
"#
)]
#[case::zero_attempt(
    r#"
version_requirement = ">=0.1.0"
[app]
email_domain = "sl.example.com"
delivery = { max_attempts = 0 }
"#
)]
fn rejected(#[case] input: &str) {
    assert!(Config::from_toml(input).is_err());
}

#[test]
fn codes_are_completed() {
    let config = Config::from_toml(include_str!("full.toml")).unwrap();
    let codes = &config.server.smtp.codes;

    assert!(<CodeID as strum::IntoEnumIterator>::iter().all(|code| codes.contains_key(&code)));
    assert_eq!(
        codes[&CodeID::Help],
        Reply::new(ReplyCode::Code { code: 214 }, "see https://app.example.com/docs")
    );
    assert_eq!(
        codes[&CodeID::Greetings].to_string(),
        "220 relay.example.com Service ready\r\n"
    );
    pretty_assertions::assert_eq!(
        codes[&CodeID::EhloSubmission].to_string(),
        [
            "250-relay.example.com\r\n",
            "250-AUTH PLAIN LOGIN\r\n",
            "250-8BITMIME\r\n",
            "250 SMTPUTF8\r\n",
        ]
        .concat()
    );
    assert!(!codes[&CodeID::EhloPlain].to_string().contains("AUTH"));
}

#[test]
fn serialize_back() {
    let config = Config::with_email_domain("sl.example.com").unwrap();
    let json = serde_json::to_string(&config).unwrap();
    let back = serde_json::from_str::<Config>(&json).unwrap();
    pretty_assertions::assert_eq!(back.app, config.app);
}
