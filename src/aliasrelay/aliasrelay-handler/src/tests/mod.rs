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
    envelope::Envelope,
    models::{
        Alias, AliasMailbox, AutoCreateRule, Contact, CustomDomain, DeletedAlias, Directory,
        DomainDeletedAlias, EmailLog, Mailbox, SlDomain, User,
    },
    verp::VerpType,
    MemoryStore, RelayContext, Tables,
};
use aliasrelay_common::Status;
use aliasrelay_config::Config;
use aliasrelay_delivery::{Dispatcher, Recorder, SendRequest};
use aliasrelay_mail_parser::Mail;
extern crate alloc;

fn mailbox(id: u64, user_id: u64, email: &str) -> Mailbox {
    Mailbox {
        id,
        user_id,
        email: email.to_string(),
        verified: true,
        ..Mailbox::default()
    }
}

/// Two users, the first one owning the aliases, a catch-all domain, a domain with
/// an auto-create rule and two directories.
pub fn seed() -> Tables {
    Tables {
        users: vec![
            User {
                id: 1,
                email: "user@example.com".to_string(),
                default_mailbox_id: 1,
                ..User::default()
            },
            User {
                id: 2,
                email: "other@example.com".to_string(),
                default_mailbox_id: 3,
                ..User::default()
            },
        ],
        mailboxes: vec![
            Mailbox {
                authorized_addresses: vec!["alt@example.com".to_string()],
                ..mailbox(1, 1, "user@example.com")
            },
            mailbox(2, 1, "second@example.com"),
            mailbox(3, 2, "other@example.com"),
        ],
        aliases: vec![
            Alias {
                id: 1,
                user_id: 1,
                email: "alias@sl.example.com".to_string(),
                mailbox_id: 1,
                ..Alias::default()
            },
            Alias {
                id: 2,
                user_id: 1,
                email: "multi@sl.example.com".to_string(),
                mailbox_id: 1,
                ..Alias::default()
            },
        ],
        alias_mailboxes: vec![AliasMailbox {
            alias_id: 2,
            mailbox_id: 2,
        }],
        custom_domains: vec![
            CustomDomain {
                id: 1,
                user_id: 1,
                domain: "catchall-domain.com".to_string(),
                verified: true,
                catch_all: true,
                mailbox_ids: vec![1, 2],
                ..CustomDomain::default()
            },
            CustomDomain {
                id: 2,
                user_id: 1,
                domain: "rules.com".to_string(),
                verified: true,
                auto_create_rules: vec![AutoCreateRule {
                    order: 1,
                    regex: "news.*".to_string(),
                    mailbox_ids: vec![2],
                }],
                ..CustomDomain::default()
            },
        ],
        directories: vec![
            Directory {
                id: 1,
                user_id: 1,
                name: "dir".to_string(),
                disabled: false,
                mailbox_ids: vec![1],
            },
            Directory {
                id: 2,
                user_id: 1,
                name: "off".to_string(),
                disabled: true,
                mailbox_ids: vec![1],
            },
        ],
        sl_domains: vec![SlDomain {
            domain: "sl.example.com".to_string(),
            use_as_reverse_alias: false,
        }],
        deleted_aliases: vec![DeletedAlias {
            email: "deleted@sl.example.com".to_string(),
        }],
        domain_deleted_aliases: vec![DomainDeletedAlias {
            email: "gone@catchall-domain.com".to_string(),
            domain_id: 1,
            user_id: 1,
        }],
        ..Tables::default()
    }
}

/// A context over `tables` with `configure` applied to the configuration, the
/// messages are recorded instead of sent.
pub async fn context_with_config(
    tables: Tables,
    configure: impl FnOnce(&mut Config) + Send,
) -> (alloc::sync::Arc<RelayContext>, alloc::sync::Arc<Recorder>) {
    let mut config = Config::with_email_domain("sl.example.com").unwrap();
    config.app.unsubscriber = Some("unsub@sl.example.com".to_string());
    config.app.postmaster = Some("postmaster@sl.example.com".to_string());
    config.app.delivery.backoff = std::time::Duration::ZERO;
    configure(&mut config);

    let recorder = alloc::sync::Arc::new(Recorder::default());
    let dispatcher = Dispatcher::with_transport(&config.app.delivery, recorder.clone());
    let ctx = RelayContext::new(
        alloc::sync::Arc::new(config),
        alloc::sync::Arc::new(MemoryStore::new(tables)),
        alloc::sync::Arc::new(dispatcher),
    );
    (alloc::sync::Arc::new(ctx), recorder)
}

pub async fn context(
    tables: Tables,
) -> (alloc::sync::Arc<RelayContext>, alloc::sync::Arc<Recorder>) {
    context_with_config(tables, |_| ()).await
}

/// A context with its capabilities replaced by `build`.
pub async fn context_with(
    tables: Tables,
    build: impl FnOnce(RelayContext) -> RelayContext + Send,
) -> (alloc::sync::Arc<RelayContext>, alloc::sync::Arc<Recorder>) {
    let (ctx, recorder) = context(tables).await;
    let ctx = alloc::sync::Arc::try_unwrap(ctx).unwrap();
    (alloc::sync::Arc::new(build(ctx)), recorder)
}

/// The message of a recorded request.
pub fn relayed(request: &SendRequest) -> Mail {
    String::from_utf8_lossy(&request.msg).parse().unwrap()
}

fn message(from: &str, to: &str) -> Mail {
    format!("From: {from}\r\nTo: {to}\r\nSubject: hello\r\n\r\nhi there")
        .parse()
        .unwrap()
}

#[tokio::test]
async fn catch_all_first_message() {
    let (ctx, recorder) = context(seed()).await;
    let status = ctx
        .handle(
            Envelope::new("sender@world.com", &["random123@catchall-domain.com"]),
            message("sender@world.com", "random123@catchall-domain.com"),
        )
        .await;
    assert_eq!(status, Status::E200);

    let alias = ctx
        .store
        .get_alias_by_email("random123@catchall-domain.com")
        .await
        .unwrap();
    assert_eq!(ctx.store.alias_mailboxes(alias.id).await.len(), 2);

    let sent = recorder.sent().await;
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].envelope_to, "user@example.com");
    assert!(sent[0].is_forward);
    assert_eq!(sent[1].envelope_to, "second@example.com");
}

#[tokio::test]
async fn mailbox_notified_once() {
    let (ctx, recorder) = context(seed()).await;
    let rcpt_tos = ["multi@sl.example.com", "random@catchall-domain.com"];
    let status = ctx
        .handle(
            Envelope::new("sender@world.com", &rcpt_tos),
            message("sender@world.com", &rcpt_tos.join(", ")),
        )
        .await;
    assert_eq!(status, Status::E200);

    let sent = recorder.sent().await;
    assert_eq!(
        sent.iter()
            .filter(|r| r.envelope_to == "user@example.com")
            .count(),
        2
    );
    assert_eq!(
        sent.iter()
            .filter(|r| r.envelope_to == "second@example.com")
            .count(),
        1
    );
}

#[tokio::test]
async fn unknown_email_log() {
    let (ctx, recorder) = context(seed()).await;
    let verp = ctx.verp.generate(VerpType::BounceForward, 999, None);
    assert_eq!(
        ctx.handle(
            Envelope::new("<>", &[&verp]),
            message("MAILER-DAEMON@mx.world.com", &verp)
        )
        .await,
        Status::E213
    );
    assert!(recorder.sent().await.is_empty());
}

#[tokio::test]
async fn unexpected_message_to_verp() {
    let (ctx, recorder) = context(seed()).await;
    let email_log = ctx
        .store
        .create_email_log(EmailLog {
            user_id: 1,
            alias_id: 1,
            mailbox_id: Some(1),
            is_reply: true,
            ..EmailLog::default()
        })
        .await
        .unwrap();
    let verp = ctx
        .verp
        .generate(VerpType::BounceReply, email_log.id, None);

    assert_eq!(
        ctx.handle(
            Envelope::new("friend@world.com", &[&verp]),
            message("friend@world.com", &verp)
        )
        .await,
        Status::E213
    );
    assert!(recorder.sent().await.is_empty());
}

#[tokio::test]
async fn ignored() {
    let (ctx, recorder) = context_with_config(seed(), |config| {
        config.app.ignored_emails = vec!["spammer@world.com".to_string()];
    })
    .await;
    assert_eq!(
        ctx.handle(
            Envelope::new("Spammer@World.com", &["alias@sl.example.com"]),
            message("spammer@world.com", "alias@sl.example.com")
        )
        .await,
        Status::E204
    );
    assert!(recorder.sent().await.is_empty());
}

#[tokio::test]
async fn to_noreply() {
    let (ctx, recorder) = context(seed()).await;
    assert_eq!(
        ctx.handle(
            Envelope::new("user@example.com", &["noreply@sl.example.com"]),
            message("user@example.com", "noreply@sl.example.com")
        )
        .await,
        Status::E200
    );

    let sent = recorder.sent().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].envelope_to, "user@example.com");
}

#[rstest::rstest]
#[case("sender@world.com", Status::E522)]
#[case("monitor@world.com", Status::E207)]
#[tokio::test]
async fn rate_limited(#[case] sender: &str, #[case] expected: Status) {
    let (ctx, recorder) = context_with_config(seed(), |config| {
        config.app.rate_limit.per_alias = 0;
        config.app.ignore_bounce_senders = vec!["monitor@world.com".to_string()];
    })
    .await;

    let first = ctx
        .handle(
            Envelope::new(sender, &["alias@sl.example.com"]),
            message(sender, "alias@sl.example.com"),
        )
        .await;
    assert_eq!(first, Status::E200);

    let second = ctx
        .handle(
            Envelope::new(sender, &["alias@sl.example.com"]),
            message(sender, "alias@sl.example.com"),
        )
        .await;
    assert_eq!(second, expected);
    assert_eq!(recorder.sent().await.len(), 1);
}

#[tokio::test]
async fn bounce_to_reverse_alias() {
    let (ctx, recorder) = context(seed()).await;
    let contact = ctx
        .store
        .create_contact(Contact {
            user_id: 1,
            alias_id: 1,
            website_email: "friend@world.com".to_string(),
            reply_email: "ra+friend@sl.example.com".to_string(),
            ..Contact::default()
        })
        .await
        .unwrap();

    assert_eq!(
        ctx.handle(
            Envelope::new("<>", &[&contact.reply_email]),
            message("MAILER-DAEMON@mx.world.com", &contact.reply_email)
        )
        .await,
        Status::E206
    );
    assert!(recorder.sent().await.is_empty());
}

#[tokio::test]
async fn reply_then_forward() {
    let (ctx, recorder) = context(seed()).await;
    let status = ctx
        .handle(
            Envelope::new("friend@world.com", &["alias@sl.example.com"]),
            message("Friend <friend@world.com>", "alias@sl.example.com"),
        )
        .await;
    assert_eq!(status, Status::E200);

    let contact = ctx
        .store
        .get_contact_by_alias_and_email(1, "friend@world.com")
        .await
        .unwrap();
    recorder.purge().await;

    let status = ctx
        .handle(
            Envelope::new("user@example.com", &[&contact.reply_email]),
            message("user@example.com", &contact.reply_email),
        )
        .await;
    assert_eq!(status, Status::E200);

    let sent = recorder.sent().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].envelope_to, "friend@world.com");
    assert_eq!(
        relayed(&sent[0]).get_header("From"),
        Some("alias@sl.example.com")
    );
}

#[tokio::test]
async fn submission() {
    let (ctx, recorder) = context(seed()).await;
    let msg = message("alias@sl.example.com", "shop@world.com");

    assert_eq!(
        ctx.handle_submission(
            Envelope::new("other@sl.example.com", &["shop@world.com"]),
            msg.clone(),
            "alias@sl.example.com"
        )
        .await,
        Status::E509
    );
    assert_eq!(
        ctx.handle_submission(
            Envelope::new("alias@sl.example.com", &["shop@world.com", "b@world.com"]),
            msg,
            "alias@sl.example.com"
        )
        .await,
        Status::E200
    );
    assert_eq!(recorder.sent().await.len(), 2);
}
