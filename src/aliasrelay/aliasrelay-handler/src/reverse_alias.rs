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
//! The addresses the contacts see as the sender of the replies.

use crate::{
    models::{Alias, User},
    HandlerError, HandlerResult, Store,
};

const MAX_ATTEMPTS: usize = 1000;
const MAX_SENDER_LENGTH: usize = 45;
const RANDOM_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

fn random_string(length: usize) -> String {
    std::iter::repeat_with(|| char::from(RANDOM_CHARSET[fastrand::usize(..RANDOM_CHARSET.len())]))
        .take(length)
        .collect()
}

/// Transliterate to ascii, the characters without transliteration are dropped.
#[must_use]
pub fn to_ascii(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if c.is_ascii() {
            out.push(c);
        } else if let Some(folded) = deunicode::deunicode_char(c) {
            out.push_str(folded);
        }
    }
    out
}

/// The readable part of a reverse alias containing the sender address:
/// `John.Doe@Example.com` gives `john_doe_at_example_com`.
#[must_use]
pub fn sender_part(contact_email: &str) -> String {
    let ascii = aliasrelay_common::utils::sanitize_email(&to_ascii(contact_email));
    ascii
        .chars()
        .take(MAX_SENDER_LENGTH)
        .collect::<String>()
        .replace('@', "_at_")
        .replace('.', "_")
        .chars()
        .filter(|c| matches!(c, 'a'..='z' | '0'..='9' | '_'))
        .collect()
}

/// Map the characters that were wrongly generated in old reverse aliases to `_`.
#[must_use]
pub fn normalize_reply_email(reply_email: &str) -> String {
    let reply_email = if reply_email.is_ascii() {
        std::borrow::Cow::Borrowed(reply_email)
    } else {
        std::borrow::Cow::Owned(to_ascii(reply_email))
    };

    reply_email
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '+' | '@') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Is the address the reverse alias of a contact, or has the form of an old one.
pub async fn is_reverse_alias(store: &dyn Store, email_domain: &str, address: &str) -> bool {
    if store.get_contact_by_reply_email(address).await.is_some() {
        return true;
    }

    address.ends_with(&format!("@{email_domain}"))
        && (address.starts_with("reply+") || address.starts_with("ra+"))
}

async fn is_available(store: &dyn Store, address: &str) -> bool {
    store.get_alias_by_email(address).await.is_none()
        && store.get_contact_by_reply_email(address).await.is_none()
        && store.get_deleted_alias(address).await.is_none()
        && store.get_domain_deleted_alias(address).await.is_none()
}

/// Generate a new reverse alias for a contact of `alias`.
///
/// It is on the alias domain when that domain is flagged as a reverse alias domain,
/// on the relay domain otherwise.
///
/// # Errors
///
/// * [`HandlerError::CannotGenerateReverseAlias`] every attempt collided
pub async fn generate_reply_email(
    store: &dyn Store,
    app: &aliasrelay_config::field::FieldApp,
    contact_email: &str,
    alias: &Alias,
    user: &User,
) -> HandlerResult<String> {
    let sender = if user.include_sender_in_reverse_alias && !contact_email.is_empty() {
        Some(sender_part(contact_email))
    } else {
        None
    };

    let alias_domain = aliasrelay_common::utils::email_domain_part(&alias.email);
    let reply_domain = match store.get_sl_domain(&alias_domain).await {
        Some(sl_domain) if sl_domain.use_as_reverse_alias => alias_domain,
        _ => app.email_domain.clone(),
    };

    for _ in 0..MAX_ATTEMPTS {
        let reply_email = match &sender {
            Some(sender) => format!(
                "{sender}_{}@{reply_domain}",
                random_string(fastrand::usize(5..=10))
            ),
            None => format!("{}@{reply_domain}", random_string(fastrand::usize(20..=50))),
        };

        if is_available(store, &reply_email).await {
            return Ok(reply_email);
        }
        tracing::debug!(%reply_email, "Reverse alias already taken.");
    }

    tracing::error!(alias = %alias.email, "Cannot generate a reverse alias.");
    Err(HandlerError::CannotGenerateReverseAlias)
}

#[cfg(test)]
mod tests {
    use super::{generate_reply_email, is_reverse_alias, normalize_reply_email, sender_part};
    use crate::{
        models::{Alias, Contact, SlDomain, User},
        MemoryStore, Store, Tables,
    };

    #[rstest::rstest]
    #[case("John.Doe@Example.com", "john_doe_at_example_com")]
    #[case("jérôme@café.fr", "jerome_at_cafe_fr")]
    #[case("a+b-c@d.e", "abc_at_d_e")]
    #[case("王@example.com", "wang_at_example_com")]
    #[case("Œuvre.Straße@example.com", "oeuvre_strasse_at_example_com")]
    fn sender(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(sender_part(input), expected);
    }

    #[test]
    fn sender_is_truncated() {
        let long = format!("{}@example.com", "a".repeat(60));
        assert_eq!(sender_part(&long), "a".repeat(45));
    }

    #[rstest::rstest]
    #[case("ra+abc@sl.example.com", "ra+abc@sl.example.com")]
    #[case("ra+a\tbc@sl.example.com", "ra+a_bc@sl.example.com")]
    #[case("ra+é@sl.example.com", "ra+e@sl.example.com")]
    #[case("ra+a b@sl.example.com", "ra+a_b@sl.example.com")]
    fn normalize(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(normalize_reply_email(input), expected);
    }

    #[tokio::test]
    async fn generate() {
        let store = MemoryStore::new(Tables {
            sl_domains: vec![SlDomain {
                domain: "alias.example.com".to_string(),
                use_as_reverse_alias: true,
            }],
            ..Tables::default()
        });
        let app = aliasrelay_config::Config::with_email_domain("sl.example.com")
            .unwrap()
            .app;

        let alias = Alias {
            email: "a@sl.example.com".to_string(),
            ..Alias::default()
        };
        let user = User {
            include_sender_in_reverse_alias: true,
            ..User::default()
        };

        let reply_email = generate_reply_email(&store, &app, "John@Doe.com", &alias, &user)
            .await
            .unwrap();
        let (local, domain) = reply_email.split_once('@').unwrap();
        assert_eq!(domain, "sl.example.com");
        assert!(local.starts_with("john_at_doe_com_"));
        assert!((5..=10).contains(&(local.len() - "john_at_doe_com_".len())));

        let opaque = generate_reply_email(
            &store,
            &app,
            "john@doe.com",
            &Alias {
                email: "b@alias.example.com".to_string(),
                ..Alias::default()
            },
            &User::default(),
        )
        .await
        .unwrap();
        let (local, domain) = opaque.split_once('@').unwrap();
        assert_eq!(domain, "alias.example.com");
        assert!((20..=50).contains(&local.len()));
        assert!(local
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[tokio::test]
    async fn reverse_alias_detection() {
        let store = MemoryStore::default();
        store
            .create_contact(Contact {
                alias_id: 1,
                website_email: "john@doe.com".to_string(),
                reply_email: "opaque@sl.example.com".to_string(),
                ..Contact::default()
            })
            .await
            .unwrap();

        assert!(is_reverse_alias(&store, "sl.example.com", "opaque@sl.example.com").await);
        assert!(is_reverse_alias(&store, "sl.example.com", "ra+old@sl.example.com").await);
        assert!(is_reverse_alias(&store, "sl.example.com", "reply+old@sl.example.com").await);
        assert!(!is_reverse_alias(&store, "sl.example.com", "ra+old@other.com").await);
        assert!(!is_reverse_alias(&store, "sl.example.com", "john@sl.example.com").await);
    }
}
