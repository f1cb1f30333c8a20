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
    models::{
        Alias, Contact, CustomDomain, DeletedAlias, Directory, DomainDeletedAlias, EmailLog, Id,
        Mailbox, MessageIdMatching, Phase, ProviderComplaint, RefusedEmail, SentAlert, SlDomain,
        SmtpCredentials, TransactionalEmail, User,
    },
    StoreError,
};

mod memory;

pub use memory::{MemoryStore, Tables};

/// Persistence of the relay core.
///
/// Every method is atomic. The creations enforce the uniqueness of
/// `Alias.email`, `Contact(alias_id, website_email)`, `Contact.reply_email` and
/// `MessageIdMatching.original_message_id`, returning [`StoreError::UniqueViolation`]
/// to the loser of a race, which is expected to fetch the winner's row.
#[async_trait::async_trait]
pub trait Store: Send + Sync {
    ///
    async fn get_user(&self, id: Id) -> Option<User>;
    ///
    async fn get_user_by_email(&self, email: &str) -> Option<User>;
    ///
    async fn update_user(&self, user: &User) -> Result<(), StoreError>;

    ///
    async fn get_mailbox(&self, id: Id) -> Option<Mailbox>;
    ///
    async fn get_mailbox_by_email(&self, email: &str) -> Option<Mailbox>;

    ///
    async fn get_alias(&self, id: Id) -> Option<Alias>;
    ///
    async fn get_alias_by_email(&self, email: &str) -> Option<Alias>;
    /// Insert an alias and its secondary mailboxes, the id is assigned by the store.
    ///
    /// # Errors
    ///
    /// * [`StoreError::UniqueViolation`] the address is taken
    /// * [`StoreError::InTrash`] the address was deleted
    async fn create_alias(&self, alias: Alias, other_mailbox_ids: &[Id])
        -> Result<Alias, StoreError>;
    ///
    async fn update_alias(&self, alias: &Alias) -> Result<(), StoreError>;
    /// Move an alias to the trash of its domain, or to the global one.
    async fn trash_alias(&self, id: Id) -> Result<(), StoreError>;
    ///
    async fn count_aliases(&self, user_id: Id) -> usize;
    /// The mailboxes of an alias, the primary one first.
    async fn alias_mailboxes(&self, alias_id: Id) -> Vec<Mailbox>;

    ///
    async fn get_deleted_alias(&self, email: &str) -> Option<DeletedAlias>;
    ///
    async fn get_domain_deleted_alias(&self, email: &str) -> Option<DomainDeletedAlias>;

    ///
    async fn get_custom_domain(&self, id: Id) -> Option<CustomDomain>;
    ///
    async fn get_custom_domain_by_domain(&self, domain: &str) -> Option<CustomDomain>;
    ///
    async fn get_sl_domain(&self, domain: &str) -> Option<SlDomain>;
    ///
    async fn get_directory_by_name(&self, name: &str) -> Option<Directory>;

    ///
    async fn get_contact(&self, id: Id) -> Option<Contact>;
    ///
    async fn get_contact_by_alias_and_email(
        &self,
        alias_id: Id,
        website_email: &str,
    ) -> Option<Contact>;
    ///
    async fn get_contact_by_reply_email(&self, reply_email: &str) -> Option<Contact>;
    /// Insert a contact, the id is assigned by the store.
    ///
    /// # Errors
    ///
    /// * [`StoreError::UniqueViolation`] the pair or the reverse alias exists
    async fn create_contact(&self, contact: Contact) -> Result<Contact, StoreError>;
    ///
    async fn update_contact(&self, contact: &Contact) -> Result<(), StoreError>;
    /// The most recent contacts of an alias.
    async fn latest_contacts(&self, alias_id: Id, limit: usize) -> Vec<Contact>;

    /// Insert a log, the id and the creation date are assigned by the store.
    async fn create_email_log(&self, log: EmailLog) -> Result<EmailLog, StoreError>;
    ///
    async fn get_email_log(&self, id: Id) -> Option<EmailLog>;
    ///
    async fn update_email_log(&self, log: &EmailLog) -> Result<(), StoreError>;
    ///
    async fn delete_email_log(&self, id: Id) -> Result<(), StoreError>;
    /// The logs of an alias created after `since`.
    async fn alias_email_logs(&self, alias_id: Id, since: time::OffsetDateTime) -> Vec<EmailLog>;
    /// The logs of a user created after `since`.
    async fn user_email_logs(&self, user_id: Id, since: time::OffsetDateTime) -> Vec<EmailLog>;
    /// Number of logs of the aliases whose primary mailbox is `mailbox_id`, after `since`.
    async fn count_mailbox_email_logs(&self, mailbox_id: Id, since: time::OffsetDateTime)
        -> usize;

    ///
    async fn create_bounce(&self, email: &str, info: Option<String>) -> Result<(), StoreError>;

    ///
    async fn create_sent_alert(&self, alert: SentAlert) -> Result<(), StoreError>;
    /// Number of alerts of a kind sent to an address, after `since` if given.
    async fn count_sent_alerts(
        &self,
        alert_type: &str,
        to_email: &str,
        since: Option<time::OffsetDateTime>,
    ) -> usize;

    ///
    async fn create_transactional_email(
        &self,
        email: &str,
    ) -> Result<TransactionalEmail, StoreError>;
    ///
    async fn get_transactional_email(&self, id: Id) -> Option<TransactionalEmail>;

    ///
    async fn create_refused_email(
        &self,
        user_id: Id,
        original: Option<Vec<u8>>,
        full_report: Vec<u8>,
    ) -> Result<RefusedEmail, StoreError>;

    ///
    async fn get_message_id_matching_by_original(
        &self,
        original_message_id: &str,
    ) -> Option<MessageIdMatching>;
    ///
    async fn get_message_id_matching_by_sl(&self, sl_message_id: &str)
        -> Option<MessageIdMatching>;
    ///
    /// # Errors
    ///
    /// * [`StoreError::UniqueViolation`] the original id has a matching already
    async fn create_message_id_matching(
        &self,
        matching: MessageIdMatching,
    ) -> Result<(), StoreError>;

    ///
    async fn get_smtp_credentials(&self, alias_id: Id) -> Option<SmtpCredentials>;
    ///
    async fn set_smtp_credentials(&self, credentials: SmtpCredentials) -> Result<(), StoreError>;

    ///
    async fn create_provider_complaint(
        &self,
        user_id: Id,
        phase: Phase,
        refused_email_id: Id,
    ) -> Result<ProviderComplaint, StoreError>;
}
