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
use super::Store;
use crate::{
    models::{
        Alias, AliasMailbox, Bounce, Contact, CustomDomain, DeletedAlias, Directory,
        DomainDeletedAlias, EmailLog, Id, Mailbox, MessageIdMatching, Phase, ProviderComplaint,
        RefusedEmail, SentAlert, SlDomain, SmtpCredentials, TransactionalEmail, User,
    },
    StoreError,
};
use aliasrelay_config::field::FieldAppStore;

/// Every table of the store, this is also the format of the JSON seed.
#[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
#[allow(missing_docs)]
pub struct Tables {
    pub users: Vec<User>,
    pub mailboxes: Vec<Mailbox>,
    pub aliases: Vec<Alias>,
    pub alias_mailboxes: Vec<AliasMailbox>,
    pub custom_domains: Vec<CustomDomain>,
    pub directories: Vec<Directory>,
    pub sl_domains: Vec<SlDomain>,
    pub deleted_aliases: Vec<DeletedAlias>,
    pub domain_deleted_aliases: Vec<DomainDeletedAlias>,
    pub contacts: Vec<Contact>,
    pub email_logs: Vec<EmailLog>,
    pub bounces: Vec<Bounce>,
    pub sent_alerts: Vec<SentAlert>,
    pub transactional_emails: Vec<TransactionalEmail>,
    pub refused_emails: Vec<RefusedEmail>,
    pub message_id_matchings: Vec<MessageIdMatching>,
    pub smtp_credentials: Vec<SmtpCredentials>,
    pub provider_complaints: Vec<ProviderComplaint>,
}

fn next_id<T>(rows: &[T], id: impl Fn(&T) -> Id) -> Id {
    rows.iter().map(id).max().unwrap_or(0) + 1
}

fn not_found(entity: &'static str, id: Id) -> StoreError {
    StoreError::NotFound { entity, id }
}

// bounces and transactional emails are only looked up for a few days
const SHORT_LIVED_RETENTION: std::time::Duration = std::time::Duration::from_secs(7 * 24 * 3600);

impl Tables {
    fn is_trashed(&self, email: &str) -> bool {
        self.deleted_aliases.iter().any(|d| d.email == email)
            || self.domain_deleted_aliases.iter().any(|d| d.email == email)
    }

    fn prune(&mut self, now: time::OffsetDateTime, email_log_retention: std::time::Duration) {
        let logs_before = now - email_log_retention;
        let short_lived_before = now - SHORT_LIVED_RETENTION;

        let before = self.email_logs.len();
        self.email_logs.retain(|l| l.created_at >= logs_before);
        self.bounces.retain(|b| b.created_at >= short_lived_before);
        self.transactional_emails
            .retain(|t| t.created_at >= short_lived_before);

        if before != self.email_logs.len() {
            tracing::debug!(
                removed = before - self.email_logs.len(),
                "Old email logs removed."
            );
        }
    }

    async fn read(path: &std::path::Path) -> Result<Option<Self>, StoreError> {
        let content = match tokio::fs::read(path).await {
            Ok(content) => content,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(error.into()),
        };
        Ok(Some(serde_json::from_slice::<Self>(&content)?))
    }
}

#[derive(Debug, Clone)]
struct Persistence {
    path: std::path::PathBuf,
    email_log_retention: std::time::Duration,
}

/// A [`Store`] keeping every table in memory, behind a single lock.
///
/// With [`MemoryStore::persisted`], the tables are written to a JSON file after
/// every change, the write lock being held until the file is replaced.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: tokio::sync::RwLock<Tables>,
    persistence: Option<Persistence>,
}

impl MemoryStore {
    ///
    #[must_use]
    pub fn new(tables: Tables) -> Self {
        Self {
            tables: tokio::sync::RwLock::new(tables),
            persistence: None,
        }
    }

    /// Load the tables from a JSON file.
    ///
    /// # Errors
    ///
    /// * the file cannot be read
    /// * the content is not a valid [`Tables`]
    pub async fn from_seed(path: &std::path::Path) -> Result<Self, StoreError> {
        let tables = Tables::read(path).await?.ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "no such seed file")
        })?;

        tracing::info!(
            path = %path.display(),
            users = tables.users.len(),
            aliases = tables.aliases.len(),
            "Store seeded."
        );
        Ok(Self::new(tables))
    }

    /// The store of the `[app.store]` table.
    ///
    /// The tables are read from `path` when the file exists, otherwise from the seed.
    /// With a `path`, every change is saved in it.
    ///
    /// # Errors
    ///
    /// * a file cannot be read
    /// * the content of a file is not a valid [`Tables`]
    pub async fn open(config: &FieldAppStore) -> Result<Self, StoreError> {
        let saved = match &config.path {
            Some(path) => Tables::read(path).await?,
            None => None,
        };

        let store = match (saved, &config.seed) {
            (Some(tables), _) => {
                tracing::info!(
                    users = tables.users.len(),
                    aliases = tables.aliases.len(),
                    contacts = tables.contacts.len(),
                    "Store loaded."
                );
                Self::new(tables)
            }
            (None, Some(seed)) => Self::from_seed(seed).await?,
            (None, None) => {
                tracing::warn!("No store file nor seed, starting with an empty store.");
                Self::default()
            }
        };

        Ok(match &config.path {
            Some(path) => store.persisted(path.clone(), config.email_log_retention),
            None => {
                tracing::warn!("No store file configured, changes are lost on restart.");
                store
            }
        })
    }

    /// Save the tables in `path` after every change. The email logs older than
    /// `email_log_retention` are removed on save.
    #[must_use]
    pub fn persisted(
        mut self,
        path: std::path::PathBuf,
        email_log_retention: std::time::Duration,
    ) -> Self {
        self.persistence = Some(Persistence {
            path,
            email_log_retention,
        });
        self
    }

    async fn commit(&self, tables: &mut Tables) -> Result<(), StoreError> {
        let Some(persistence) = &self.persistence else {
            return Ok(());
        };
        tables.prune(
            time::OffsetDateTime::now_utc(),
            persistence.email_log_retention,
        );

        // replaced in one rename, a crash never leaves a truncated file
        let tmp = persistence.path.with_extension("tmp");
        tokio::fs::write(&tmp, serde_json::to_vec(tables)?).await?;
        tokio::fs::rename(&tmp, &persistence.path).await?;
        Ok(())
    }

    /// A copy of every table.
    pub async fn snapshot(&self) -> Tables {
        self.tables.read().await.clone()
    }

    /// Modify the tables directly.
    pub async fn update<R>(&self, f: impl FnOnce(&mut Tables) -> R + Send) -> R {
        f(&mut *self.tables.write().await)
    }
}

#[async_trait::async_trait]
impl Store for MemoryStore {
    async fn get_user(&self, id: Id) -> Option<User> {
        self.tables.read().await.users.iter().find(|u| u.id == id).cloned()
    }

    async fn get_user_by_email(&self, email: &str) -> Option<User> {
        self.tables
            .read()
            .await
            .users
            .iter()
            .find(|u| u.email == email)
            .cloned()
    }

    async fn update_user(&self, user: &User) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let row = tables
            .users
            .iter_mut()
            .find(|u| u.id == user.id)
            .ok_or_else(|| not_found("user", user.id))?;
        *row = user.clone();
        self.commit(&mut tables).await
    }

    async fn get_mailbox(&self, id: Id) -> Option<Mailbox> {
        self.tables
            .read()
            .await
            .mailboxes
            .iter()
            .find(|m| m.id == id)
            .cloned()
    }

    async fn get_mailbox_by_email(&self, email: &str) -> Option<Mailbox> {
        self.tables
            .read()
            .await
            .mailboxes
            .iter()
            .find(|m| m.email == email)
            .cloned()
    }

    async fn get_alias(&self, id: Id) -> Option<Alias> {
        self.tables.read().await.aliases.iter().find(|a| a.id == id).cloned()
    }

    async fn get_alias_by_email(&self, email: &str) -> Option<Alias> {
        self.tables
            .read()
            .await
            .aliases
            .iter()
            .find(|a| a.email == email)
            .cloned()
    }

    async fn create_alias(
        &self,
        mut alias: Alias,
        other_mailbox_ids: &[Id],
    ) -> Result<Alias, StoreError> {
        let mut tables = self.tables.write().await;

        if tables.aliases.iter().any(|a| a.email == alias.email) {
            return Err(StoreError::UniqueViolation("alias.email"));
        }
        if tables.is_trashed(&alias.email) {
            return Err(StoreError::InTrash(alias.email));
        }

        alias.id = next_id(&tables.aliases, |a| a.id);
        alias.created_at = time::OffsetDateTime::now_utc();
        for mailbox_id in other_mailbox_ids {
            if *mailbox_id != alias.mailbox_id {
                tables.alias_mailboxes.push(AliasMailbox {
                    alias_id: alias.id,
                    mailbox_id: *mailbox_id,
                });
            }
        }
        tables.aliases.push(alias.clone());
        self.commit(&mut tables).await?;
        Ok(alias)
    }

    async fn update_alias(&self, alias: &Alias) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let row = tables
            .aliases
            .iter_mut()
            .find(|a| a.id == alias.id)
            .ok_or_else(|| not_found("alias", alias.id))?;
        *row = alias.clone();
        self.commit(&mut tables).await
    }

    async fn trash_alias(&self, id: Id) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let position = tables
            .aliases
            .iter()
            .position(|a| a.id == id)
            .ok_or_else(|| not_found("alias", id))?;
        let alias = tables.aliases.remove(position);
        tables.alias_mailboxes.retain(|am| am.alias_id != id);

        match alias.custom_domain_id {
            Some(domain_id) => tables.domain_deleted_aliases.push(DomainDeletedAlias {
                email: alias.email,
                domain_id,
                user_id: alias.user_id,
            }),
            None => tables.deleted_aliases.push(DeletedAlias { email: alias.email }),
        }
        self.commit(&mut tables).await
    }

    async fn count_aliases(&self, user_id: Id) -> usize {
        self.tables
            .read()
            .await
            .aliases
            .iter()
            .filter(|a| a.user_id == user_id)
            .count()
    }

    async fn alias_mailboxes(&self, alias_id: Id) -> Vec<Mailbox> {
        let tables = self.tables.read().await;
        let Some(alias) = tables.aliases.iter().find(|a| a.id == alias_id) else {
            return vec![];
        };

        std::iter::once(alias.mailbox_id)
            .chain(
                tables
                    .alias_mailboxes
                    .iter()
                    .filter(|am| am.alias_id == alias_id && am.mailbox_id != alias.mailbox_id)
                    .map(|am| am.mailbox_id),
            )
            .filter_map(|id| tables.mailboxes.iter().find(|m| m.id == id).cloned())
            .collect()
    }

    async fn get_deleted_alias(&self, email: &str) -> Option<DeletedAlias> {
        self.tables
            .read()
            .await
            .deleted_aliases
            .iter()
            .find(|d| d.email == email)
            .cloned()
    }

    async fn get_domain_deleted_alias(&self, email: &str) -> Option<DomainDeletedAlias> {
        self.tables
            .read()
            .await
            .domain_deleted_aliases
            .iter()
            .find(|d| d.email == email)
            .cloned()
    }

    async fn get_custom_domain(&self, id: Id) -> Option<CustomDomain> {
        self.tables
            .read()
            .await
            .custom_domains
            .iter()
            .find(|d| d.id == id)
            .cloned()
    }

    async fn get_custom_domain_by_domain(&self, domain: &str) -> Option<CustomDomain> {
        self.tables
            .read()
            .await
            .custom_domains
            .iter()
            .find(|d| d.domain == domain)
            .cloned()
    }

    async fn get_sl_domain(&self, domain: &str) -> Option<SlDomain> {
        self.tables
            .read()
            .await
            .sl_domains
            .iter()
            .find(|d| d.domain == domain)
            .cloned()
    }

    async fn get_directory_by_name(&self, name: &str) -> Option<Directory> {
        self.tables
            .read()
            .await
            .directories
            .iter()
            .find(|d| d.name == name)
            .cloned()
    }

    async fn get_contact(&self, id: Id) -> Option<Contact> {
        self.tables
            .read()
            .await
            .contacts
            .iter()
            .find(|c| c.id == id)
            .cloned()
    }

    async fn get_contact_by_alias_and_email(
        &self,
        alias_id: Id,
        website_email: &str,
    ) -> Option<Contact> {
        self.tables
            .read()
            .await
            .contacts
            .iter()
            .find(|c| c.alias_id == alias_id && c.website_email == website_email)
            .cloned()
    }

    async fn get_contact_by_reply_email(&self, reply_email: &str) -> Option<Contact> {
        self.tables
            .read()
            .await
            .contacts
            .iter()
            .find(|c| c.reply_email == reply_email)
            .cloned()
    }

    async fn create_contact(&self, mut contact: Contact) -> Result<Contact, StoreError> {
        let mut tables = self.tables.write().await;

        if tables
            .contacts
            .iter()
            .any(|c| c.alias_id == contact.alias_id && c.website_email == contact.website_email)
        {
            return Err(StoreError::UniqueViolation("contact.alias_id_website_email"));
        }
        // the noreply address is shared by the contacts with an invalid address
        if !contact.invalid_email
            && tables
                .contacts
                .iter()
                .any(|c| c.reply_email == contact.reply_email)
        {
            return Err(StoreError::UniqueViolation("contact.reply_email"));
        }

        contact.id = next_id(&tables.contacts, |c| c.id);
        contact.created_at = time::OffsetDateTime::now_utc();
        tables.contacts.push(contact.clone());
        self.commit(&mut tables).await?;
        Ok(contact)
    }

    async fn update_contact(&self, contact: &Contact) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let row = tables
            .contacts
            .iter_mut()
            .find(|c| c.id == contact.id)
            .ok_or_else(|| not_found("contact", contact.id))?;
        *row = contact.clone();
        self.commit(&mut tables).await
    }

    async fn latest_contacts(&self, alias_id: Id, limit: usize) -> Vec<Contact> {
        let tables = self.tables.read().await;
        let mut contacts = tables
            .contacts
            .iter()
            .filter(|c| c.alias_id == alias_id)
            .cloned()
            .collect::<Vec<_>>();
        contacts.sort_by(|a, b| b.id.cmp(&a.id));
        contacts.truncate(limit);
        contacts
    }

    async fn create_email_log(&self, mut log: EmailLog) -> Result<EmailLog, StoreError> {
        let mut tables = self.tables.write().await;
        log.id = next_id(&tables.email_logs, |l| l.id);
        log.created_at = time::OffsetDateTime::now_utc();
        tables.email_logs.push(log.clone());
        self.commit(&mut tables).await?;
        Ok(log)
    }

    async fn get_email_log(&self, id: Id) -> Option<EmailLog> {
        self.tables
            .read()
            .await
            .email_logs
            .iter()
            .find(|l| l.id == id)
            .cloned()
    }

    async fn update_email_log(&self, log: &EmailLog) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let row = tables
            .email_logs
            .iter_mut()
            .find(|l| l.id == log.id)
            .ok_or_else(|| not_found("email_log", log.id))?;
        *row = log.clone();
        self.commit(&mut tables).await
    }

    async fn delete_email_log(&self, id: Id) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let before = tables.email_logs.len();
        tables.email_logs.retain(|l| l.id != id);
        if before == tables.email_logs.len() {
            return Err(not_found("email_log", id));
        }
        self.commit(&mut tables).await
    }

    async fn alias_email_logs(&self, alias_id: Id, since: time::OffsetDateTime) -> Vec<EmailLog> {
        self.tables
            .read()
            .await
            .email_logs
            .iter()
            .filter(|l| l.alias_id == alias_id && l.created_at > since)
            .cloned()
            .collect()
    }

    async fn user_email_logs(&self, user_id: Id, since: time::OffsetDateTime) -> Vec<EmailLog> {
        self.tables
            .read()
            .await
            .email_logs
            .iter()
            .filter(|l| l.user_id == user_id && l.created_at > since)
            .cloned()
            .collect()
    }

    async fn count_mailbox_email_logs(
        &self,
        mailbox_id: Id,
        since: time::OffsetDateTime,
    ) -> usize {
        let tables = self.tables.read().await;
        tables
            .email_logs
            .iter()
            .filter(|l| l.created_at > since)
            .filter(|l| {
                tables
                    .aliases
                    .iter()
                    .any(|a| a.id == l.alias_id && a.mailbox_id == mailbox_id)
            })
            .count()
    }

    async fn create_bounce(&self, email: &str, info: Option<String>) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        tables.bounces.push(Bounce {
            email: email.to_string(),
            info,
            created_at: time::OffsetDateTime::now_utc(),
        });
        self.commit(&mut tables).await
    }

    async fn create_sent_alert(&self, alert: SentAlert) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        tables.sent_alerts.push(alert);
        self.commit(&mut tables).await
    }

    async fn count_sent_alerts(
        &self,
        alert_type: &str,
        to_email: &str,
        since: Option<time::OffsetDateTime>,
    ) -> usize {
        self.tables
            .read()
            .await
            .sent_alerts
            .iter()
            .filter(|a| a.alert_type == alert_type && a.to_email == to_email)
            .filter(|a| since.map_or(true, |since| a.created_at > since))
            .count()
    }

    async fn create_transactional_email(
        &self,
        email: &str,
    ) -> Result<TransactionalEmail, StoreError> {
        let mut tables = self.tables.write().await;
        let transactional = TransactionalEmail {
            id: next_id(&tables.transactional_emails, |t| t.id),
            email: email.to_string(),
            created_at: time::OffsetDateTime::now_utc(),
        };
        tables.transactional_emails.push(transactional.clone());
        self.commit(&mut tables).await?;
        Ok(transactional)
    }

    async fn get_transactional_email(&self, id: Id) -> Option<TransactionalEmail> {
        self.tables
            .read()
            .await
            .transactional_emails
            .iter()
            .find(|t| t.id == id)
            .cloned()
    }

    async fn create_refused_email(
        &self,
        user_id: Id,
        original: Option<Vec<u8>>,
        full_report: Vec<u8>,
    ) -> Result<RefusedEmail, StoreError> {
        let mut tables = self.tables.write().await;
        let refused = RefusedEmail {
            id: next_id(&tables.refused_emails, |r| r.id),
            user_id,
            original,
            full_report,
        };
        tables.refused_emails.push(refused.clone());
        self.commit(&mut tables).await?;
        Ok(refused)
    }

    async fn get_message_id_matching_by_original(
        &self,
        original_message_id: &str,
    ) -> Option<MessageIdMatching> {
        self.tables
            .read()
            .await
            .message_id_matchings
            .iter()
            .find(|m| m.original_message_id == original_message_id)
            .cloned()
    }

    async fn get_message_id_matching_by_sl(
        &self,
        sl_message_id: &str,
    ) -> Option<MessageIdMatching> {
        self.tables
            .read()
            .await
            .message_id_matchings
            .iter()
            .find(|m| m.sl_message_id == sl_message_id)
            .cloned()
    }

    async fn create_message_id_matching(
        &self,
        matching: MessageIdMatching,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if tables
            .message_id_matchings
            .iter()
            .any(|m| m.original_message_id == matching.original_message_id)
        {
            return Err(StoreError::UniqueViolation(
                "message_id_matching.original_message_id",
            ));
        }
        tables.message_id_matchings.push(matching);
        self.commit(&mut tables).await
    }

    async fn get_smtp_credentials(&self, alias_id: Id) -> Option<SmtpCredentials> {
        self.tables
            .read()
            .await
            .smtp_credentials
            .iter()
            .find(|c| c.alias_id == alias_id)
            .cloned()
    }

    async fn set_smtp_credentials(&self, credentials: SmtpCredentials) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        tables
            .smtp_credentials
            .retain(|c| c.alias_id != credentials.alias_id);
        tables.smtp_credentials.push(credentials);
        self.commit(&mut tables).await
    }

    async fn create_provider_complaint(
        &self,
        user_id: Id,
        phase: Phase,
        refused_email_id: Id,
    ) -> Result<ProviderComplaint, StoreError> {
        let mut tables = self.tables.write().await;
        let complaint = ProviderComplaint {
            id: next_id(&tables.provider_complaints, |c| c.id),
            user_id,
            phase,
            refused_email_id,
        };
        tables.provider_complaints.push(complaint.clone());
        self.commit(&mut tables).await?;
        Ok(complaint)
    }
}
