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
//! DKIM signing hook, the signature itself is computed by the downstream MTA.

use aliasrelay_mail_parser::Mail;

/// Header asking the downstream MTA to sign the message.
pub const WANT_SIGNING_HEADER: &str = "X-SimpleLogin-Want-Signing";

/// Sign, or prepare the signature of, an outgoing message.
pub trait DkimSigner: Send + Sync {
    /// `domain` is the domain of the address the message is sent as.
    fn sign(&self, msg: &mut Mail, domain: &str);
}

/// Delegate the signature to the downstream MTA for the configured domains.
#[derive(Debug, Default, Clone)]
pub struct MtaSigner {
    domains: Vec<String>,
}

impl MtaSigner {
    ///
    #[must_use]
    pub fn new(domains: &[String]) -> Self {
        Self {
            domains: domains.iter().map(|d| d.to_lowercase()).collect(),
        }
    }
}

impl DkimSigner for MtaSigner {
    fn sign(&self, msg: &mut Mail, domain: &str) {
        // a signature of the original sender is broken by the rewrite anyway
        msg.delete_header("DKIM-Signature");

        if self.domains.iter().any(|d| d.eq_ignore_ascii_case(domain)) {
            msg.add_or_replace_header(WANT_SIGNING_HEADER, "yes");
        } else {
            tracing::debug!(%domain, "Domain not configured for DKIM signing.");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{DkimSigner, MtaSigner, WANT_SIGNING_HEADER};
    use aliasrelay_mail_parser::Mail;

    #[rstest::rstest]
    #[case("sl.example.com", Some("yes"))]
    #[case("SL.Example.com", Some("yes"))]
    #[case("custom.org", None)]
    fn want_signing(#[case] domain: &str, #[case] expected: Option<&str>) {
        let mut msg = "DKIM-Signature: v=1; a=rsa-sha256\r\nSubject: x\r\n\r\nbody"
            .parse::<Mail>()
            .unwrap();
        MtaSigner::new(&["sl.example.com".to_string()]).sign(&mut msg, domain);

        assert_eq!(msg.get_header("DKIM-Signature"), None);
        assert_eq!(msg.get_header(WANT_SIGNING_HEADER), expected);
    }
}
