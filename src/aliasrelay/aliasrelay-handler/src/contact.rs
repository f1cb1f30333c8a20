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
    models::{Alias, Contact, User},
    reverse_alias::generate_reply_email,
    HandlerError, HandlerResult, RelayContext, StoreError,
};
use aliasrelay_common::{is_valid_email, utils::sanitize_email_keep_case, NULL_SENDER};

/// Why [`RelayContext::create_contact`] did not return a contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ContactCreateError {
    ///
    #[error("Invalid email")]
    InvalidEmail,
    ///
    #[error("Your plan does not allow to create contacts")]
    NotAllowed,
    ///
    #[error("Unknown error when trying to create contact")]
    Unknown,
}

/// Outcome of [`RelayContext::create_contact`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactCreateResult {
    ///
    pub contact: Option<Contact>,
    /// The contact did not exist before.
    pub created: bool,
    ///
    pub error: Option<ContactCreateError>,
}

impl ContactCreateResult {
    const fn existing(contact: Contact) -> Self {
        Self {
            contact: Some(contact),
            created: false,
            error: None,
        }
    }

    const fn failed(error: ContactCreateError) -> Self {
        Self {
            contact: None,
            created: false,
            error: Some(error),
        }
    }
}

// losing a race on the reverse alias means generating another one
const MAX_INSERT_ATTEMPTS: usize = 3;

fn clean_name(name: &str) -> Option<String> {
    if name.contains('\0') {
        tracing::warn!("Contact name contains a NUL character, dropped.");
        return None;
    }
    let name = name.chars().take(Contact::MAX_NAME_LENGTH).collect::<String>();
    (!name.is_empty()).then_some(name)
}

impl RelayContext {
    /// Insert a contact, or return the one a concurrent transaction inserted first.
    ///
    /// A new reverse alias is generated for every attempt, unless the contact uses the
    /// noreply address.
    pub(crate) async fn insert_or_fetch_contact(
        &self,
        mut contact: Contact,
        alias: &Alias,
        user: &User,
    ) -> HandlerResult<(Contact, bool)> {
        let website_email = contact.website_email.to_lowercase();
        if !website_email.is_empty() && !self.is_noreply(&website_email) {
            if let Some(existing) = self.store.get_contact_by_reply_email(&website_email).await {
                return Err(HandlerError::CannotCreateContactForReverseAlias(
                    existing.reply_email,
                ));
            }
        }

        for _ in 0..MAX_INSERT_ATTEMPTS {
            if !contact.invalid_email {
                contact.reply_email = generate_reply_email(
                    self.store.as_ref(),
                    &self.config.app,
                    &contact.website_email,
                    alias,
                    user,
                )
                .await?;
            }

            match self.store.create_contact(contact.clone()).await {
                Ok(created) => {
                    tracing::debug!(
                        contact = %created.website_email,
                        alias = %alias.email,
                        reverse_alias = %created.reply_email,
                        "Contact created."
                    );
                    return Ok((created, true));
                }
                Err(StoreError::UniqueViolation("contact.reply_email")) => continue,
                Err(StoreError::UniqueViolation(_)) => {
                    tracing::info!(
                        contact = %contact.website_email,
                        alias = %alias.email,
                        "Contact already exists, fetching it."
                    );
                    return self
                        .store
                        .get_contact_by_alias_and_email(alias.id, &contact.website_email)
                        .await
                        .map(|existing| (existing, false))
                        .ok_or(HandlerError::Store(StoreError::NotFound {
                            entity: "contact",
                            id: alias.id,
                        }));
                }
                Err(otherwise) => return Err(otherwise.into()),
            }
        }
        Err(HandlerError::CannotGenerateReverseAlias)
    }

    async fn update_contact_if_needed(
        &self,
        mut contact: Contact,
        name: Option<String>,
        mail_from: Option<&str>,
    ) -> HandlerResult<Contact> {
        let mut changed = false;
        if name.is_some() && contact.name != name {
            tracing::debug!(contact = %contact.website_email, ?name, "Contact name updated.");
            contact.name = name;
            changed = true;
        }
        if let (None, Some(mail_from)) = (&contact.mail_from, mail_from) {
            contact.mail_from = Some(mail_from.to_string());
            changed = true;
        }
        if changed {
            self.store.update_contact(&contact).await?;
        }
        Ok(contact)
    }

    /// Create a contact of `alias` for `email` (`name <address>` accepted).
    ///
    /// A contact created by the relay itself (`automatic_created`) is allowed even for
    /// the users who cannot create contacts.
    ///
    /// # Errors
    ///
    /// * the store failed
    #[allow(clippy::too_many_arguments)]
    pub async fn create_contact(
        &self,
        email: &str,
        alias: &Alias,
        user: &User,
        name: Option<&str>,
        mail_from: Option<&str>,
        allow_empty_email: bool,
        automatic_created: bool,
    ) -> HandlerResult<ContactCreateResult> {
        if !automatic_created && !user.can_create_contacts() {
            return Ok(ContactCreateResult::failed(ContactCreateError::NotAllowed));
        }

        let (parsed_name, parsed_email) =
            aliasrelay_mail_parser::parse_full_address(email).unwrap_or_default();
        let name = clean_name(name.unwrap_or(&parsed_name));

        let mut email = sanitize_email_keep_case(&parsed_email);
        if !is_valid_email(&email) {
            tracing::warn!(%email, "Invalid contact email.");
            if !allow_empty_email {
                return Ok(ContactCreateResult::failed(ContactCreateError::InvalidEmail));
            }
            email = String::new();
        }

        if let Some(existing) = self
            .store
            .get_contact_by_alias_and_email(alias.id, &email)
            .await
        {
            return Ok(ContactCreateResult::existing(
                self.update_contact_if_needed(existing, name, mail_from)
                    .await?,
            ));
        }

        let invalid_email = email.is_empty();
        let contact = Contact {
            user_id: alias.user_id,
            alias_id: alias.id,
            website_email: email,
            name: name.clone(),
            reply_email: self.config.app.noreply(),
            mail_from: mail_from.map(str::to_string),
            invalid_email,
            automatic_created,
            ..Contact::default()
        };

        match self.insert_or_fetch_contact(contact, alias, user).await {
            Ok((contact, true)) => Ok(ContactCreateResult {
                contact: Some(contact),
                created: true,
                error: None,
            }),
            Ok((contact, false)) => Ok(ContactCreateResult::existing(
                self.update_contact_if_needed(contact, name, mail_from)
                    .await?,
            )),
            Err(HandlerError::Store(StoreError::NotFound { .. })) => {
                tracing::warn!(alias = %alias.email, "Contact should exist but cannot be found.");
                Ok(ContactCreateResult::failed(ContactCreateError::Unknown))
            }
            Err(otherwise) => Err(otherwise),
        }
    }

    /// The contact of the sender of a forwarded message.
    ///
    /// The address comes from the `From` header, then from the envelope. An invalid
    /// sender gets a contact with an empty address, which cannot be replied to.
    ///
    /// # Errors
    ///
    /// * the store failed
    /// * no reverse alias can be generated
    pub async fn get_or_create_contact(
        &self,
        from_header: &str,
        mail_from: &str,
        alias: &Alias,
        user: &User,
    ) -> HandlerResult<Contact> {
        let (contact_name, mut contact_email) =
            aliasrelay_mail_parser::parse_full_address(from_header).unwrap_or_default();

        if !is_valid_email(&contact_email) && !mail_from.is_empty() && mail_from != NULL_SENDER {
            tracing::warn!(from_header, mail_from, "Invalid From header, using the envelope sender.");
            contact_email = mail_from.to_string();
        }
        if !is_valid_email(&contact_email) {
            tracing::warn!(from_header, mail_from, "Invalid contact email.");
            contact_email = String::new();
        }
        let contact_email = sanitize_email_keep_case(&contact_email);

        let contact_name = if contact_name.contains('\0') {
            tracing::warn!("Contact name contains a NUL character, dropped.");
            None
        } else {
            Some(contact_name).filter(|name| !name.is_empty())
        };

        if let Some(mut contact) = self
            .store
            .get_contact_by_alias_and_email(alias.id, &contact_email)
            .await
        {
            let mut changed = false;
            if contact.name != contact_name {
                contact.name = contact_name;
                changed = true;
            }
            if contact.mail_from.is_none() && !mail_from.is_empty() {
                contact.mail_from = Some(mail_from.to_string());
                changed = true;
            }
            if changed {
                self.store.update_contact(&contact).await?;
            }
            return Ok(contact);
        }

        let invalid_email = contact_email.is_empty();
        let contact = Contact {
            user_id: alias.user_id,
            alias_id: alias.id,
            website_email: contact_email,
            name: contact_name,
            reply_email: self.config.app.noreply(),
            mail_from: Some(mail_from.to_string()).filter(|m| !m.is_empty()),
            invalid_email,
            automatic_created: true,
            ..Contact::default()
        };
        Ok(self.insert_or_fetch_contact(contact, alias, user).await?.0)
    }

    /// The contact of the `Reply-To` header, `None` when the address is invalid.
    ///
    /// # Errors
    ///
    /// * the store failed
    /// * no reverse alias can be generated
    pub async fn get_or_create_reply_to_contact(
        &self,
        reply_to_header: &str,
        alias: &Alias,
        user: &User,
    ) -> HandlerResult<Option<Contact>> {
        let Ok((contact_name, contact_email)) =
            aliasrelay_mail_parser::parse_full_address(reply_to_header)
        else {
            return Ok(None);
        };
        if !is_valid_email(&contact_email) {
            tracing::warn!(reply_to_header, "Invalid Reply-To address.");
            return Ok(None);
        }

        if let Some(contact) = self
            .store
            .get_contact_by_alias_and_email(alias.id, &contact_email)
            .await
        {
            return Ok(Some(contact));
        }

        let contact = Contact {
            user_id: alias.user_id,
            alias_id: alias.id,
            website_email: contact_email,
            name: Some(contact_name).filter(|name| !name.is_empty()),
            automatic_created: true,
            ..Contact::default()
        };
        Ok(Some(self.insert_or_fetch_contact(contact, alias, user).await?.0))
    }

    /// The contact of a recipient of a message submitted by an alias.
    ///
    /// # Errors
    ///
    /// * the store failed
    /// * no reverse alias can be generated
    pub async fn get_or_create_contact_for_submission(
        &self,
        address: &str,
        alias: &Alias,
        user: &User,
    ) -> HandlerResult<Contact> {
        let contact_email = if is_valid_email(address) {
            sanitize_email_keep_case(address)
        } else {
            tracing::warn!(address, "Invalid contact email.");
            String::new()
        };

        if let Some(contact) = self
            .store
            .get_contact_by_alias_and_email(alias.id, &contact_email)
            .await
        {
            return Ok(contact);
        }

        let invalid_email = contact_email.is_empty();
        let contact = Contact {
            user_id: alias.user_id,
            alias_id: alias.id,
            website_email: contact_email,
            reply_email: self.config.app.noreply(),
            mail_from: Some(address.to_string()),
            invalid_email,
            automatic_created: true,
            ..Contact::default()
        };
        Ok(self.insert_or_fetch_contact(contact, alias, user).await?.0)
    }
}
