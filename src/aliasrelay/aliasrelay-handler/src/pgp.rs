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
//! PGP/MIME wrapping (rfc3156) around an external encryption capability.

use crate::PgpError;
use aliasrelay_mail_parser::Mail;

/// Headers describing the content, they stay inside the encrypted part.
pub const MIME_HEADERS: [&str; 4] = [
    "MIME-Version",
    "Content-Type",
    "Content-Disposition",
    "Content-Transfer-Encoding",
];

/// An external PGP implementation.
#[async_trait::async_trait]
pub trait PgpEncryptor: Send + Sync {
    /// Encrypt `data` for the key `fingerprint`, `public_key` is the armored key to use
    /// when the backend does not know the fingerprint.
    ///
    /// # Errors
    ///
    /// * see [`PgpError`]
    async fn encrypt(
        &self,
        data: &[u8],
        fingerprint: &str,
        public_key: Option<&str>,
    ) -> Result<String, PgpError>;
}

/// Encryptor used when no backend is configured, it always fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailablePgp;

#[async_trait::async_trait]
impl PgpEncryptor for UnavailablePgp {
    async fn encrypt(
        &self,
        _data: &[u8],
        _fingerprint: &str,
        _public_key: Option<&str>,
    ) -> Result<String, PgpError> {
        Err(PgpError::Unavailable)
    }
}

fn is_mime_header(name: &str) -> bool {
    MIME_HEADERS.iter().any(|h| h.eq_ignore_ascii_case(name))
}

/// Replace the message by its `multipart/encrypted` version.
///
/// The outer message keeps the non-MIME headers, the encrypted one only the MIME
/// headers.
///
/// # Errors
///
/// * the encryption failed, the message is left untouched
pub async fn prepare_pgp_message(
    encryptor: &dyn PgpEncryptor,
    orig_msg: &Mail,
    fingerprint: &str,
    public_key: Option<&str>,
) -> Result<Mail, PgpError> {
    let mut inner = orig_msg.clone();
    inner.delete_all_headers_except(&MIME_HEADERS);
    if inner.get_header("Content-Type").is_none() {
        tracing::debug!("Content-Type missing");
        inner.add_header("Content-Type", "text/plain");
    }
    if inner.get_header("MIME-Version").is_none() {
        tracing::debug!("MIME-Version missing");
        inner.add_header("MIME-Version", "1.0");
    }

    let armored = encryptor
        .encrypt(&inner.to_bytes(), fingerprint, public_key)
        .await?;

    let version = Mail::new(
        vec![(
            "Content-Type".to_string(),
            "application/pgp-encrypted".to_string(),
        )],
        "Version: 1",
    );
    let encrypted = Mail::new(
        vec![
            (
                "Content-Type".to_string(),
                "application/octet-stream; name=\"encrypted.asc\"".to_string(),
            ),
            (
                "Content-Disposition".to_string(),
                "inline; filename=\"encrypted.asc\"".to_string(),
            ),
        ],
        armored,
    );

    let mut msg = Mail::new_multipart(
        "encrypted",
        &[("protocol", "application/pgp-encrypted")],
        vec![version, encrypted],
    );
    for (name, value) in orig_msg
        .headers
        .0
        .iter()
        .filter(|(name, _)| !is_mime_header(name))
    {
        msg.add_header(name, value);
    }

    Ok(msg)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::{prepare_pgp_message, PgpEncryptor, UnavailablePgp};
    use crate::PgpError;
    use aliasrelay_mail_parser::Mail;

    /// Armor the data in base64, or fail when asked.
    #[derive(Debug, Default)]
    pub struct FakePgp {
        pub fail: bool,
    }

    #[async_trait::async_trait]
    impl PgpEncryptor for FakePgp {
        async fn encrypt(
            &self,
            data: &[u8],
            fingerprint: &str,
            _public_key: Option<&str>,
        ) -> Result<String, PgpError> {
            if self.fail {
                return Err(PgpError::Encryption(format!("no key for {fingerprint}")));
            }
            Ok(format!(
                "-----BEGIN PGP MESSAGE-----\r\n{}\r\n-----END PGP MESSAGE-----\r\n",
                base64::Engine::encode(&base64::engine::general_purpose::STANDARD, data)
            ))
        }
    }

    fn message() -> Mail {
        "From: a@b.c\r\nSubject: secret\r\nContent-Type: text/plain\r\n\r\nhello\r\n"
            .parse::<Mail>()
            .unwrap()
    }

    #[tokio::test]
    async fn structure() {
        let msg = prepare_pgp_message(&FakePgp::default(), &message(), "ABCD", None)
            .await
            .unwrap();

        assert_eq!(msg.content_type(), "multipart/encrypted");
        assert_eq!(
            msg.content_type_param("protocol").as_deref(),
            Some("application/pgp-encrypted")
        );
        assert_eq!(msg.get_header("Subject"), Some("secret"));
        assert_eq!(msg.count_header("Content-Type"), 1);

        let parts = msg.parts();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].content_type(), "application/pgp-encrypted");
        assert_eq!(
            parts[1].get_header("Content-Disposition"),
            Some("inline; filename=\"encrypted.asc\"")
        );

        let armored = String::from_utf8(parts[1].to_bytes()).unwrap();
        assert!(armored.contains("-----BEGIN PGP MESSAGE-----"));
        assert!(!armored.contains("Subject"));
    }

    #[tokio::test]
    async fn failure() {
        assert!(matches!(
            prepare_pgp_message(&UnavailablePgp, &message(), "ABCD", None).await,
            Err(PgpError::Unavailable)
        ));
        assert!(matches!(
            prepare_pgp_message(&FakePgp { fail: true }, &message(), "ABCD", None).await,
            Err(PgpError::Encryption(_))
        ));
    }
}
