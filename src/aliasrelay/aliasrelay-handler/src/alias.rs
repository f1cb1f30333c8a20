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
//! Alias resolution and on-the-fly creation.

use crate::{
    models::{Alias, AutoCreateRule, CustomDomain, Directory, Id, User},
    notify::{AlertType, Notification, Template},
    HandlerResult, RelayContext, StoreError,
};
use aliasrelay_common::{
    is_valid_email,
    utils::{email_domain_part, email_local_part, sanitize_email},
};

/// Separators between the name of a directory and the rest of the local part.
const DIRECTORY_SEPARATORS: [char; 3] = ['/', '+', '#'];

/// Outcome of the resolution of a destination address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateResult {
    /// The alias did not exist, it has been created.
    Created(Alias),
    /// The alias exists, or a concurrent transaction created it first.
    AlreadyExists(Alias),
    /// The address was deleted by its owner, it cannot come back.
    RejectedTrashed,
    /// The owner cannot have more aliases.
    RejectedQuota,
    /// The owner, or the directory, is disabled.
    RejectedDisabled,
    /// No rule creates this address.
    NotEligible,
}

impl CreateResult {
    /// The alias, whether it was just created or not.
    #[must_use]
    pub fn alias(self) -> Option<Alias> {
        match self {
            Self::Created(alias) | Self::AlreadyExists(alias) => Some(alias),
            Self::RejectedTrashed
            | Self::RejectedQuota
            | Self::RejectedDisabled
            | Self::NotEligible => None,
        }
    }
}

/// Which rule would create an address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutoCreateDecision {
    /// The custom domain accepts every address.
    CatchAll(CustomDomain),
    /// The first rule of the custom domain matching the local part.
    Rule(CustomDomain, AutoCreateRule),
    /// `{directory}/anything@alias-domain`
    Directory(Directory),
    /// No alias is created.
    Refused(CreateResult),
}

fn rule_matches(rule: &AutoCreateRule, local_part: &str) -> bool {
    match regex::Regex::new(&format!("^(?:{})$", rule.regex)) {
        Ok(regex) => regex.is_match(local_part),
        Err(error) => {
            tracing::warn!(%error, regex = %rule.regex, "Invalid auto create rule, ignored.");
            false
        }
    }
}

impl RelayContext {
    /// Is `address` one of the mailboxes of the alias, or one of their authorized addresses.
    pub async fn is_authorized_for_alias(&self, address: &str, alias_id: Id) -> bool {
        let address = sanitize_email(address);
        self.store
            .alias_mailboxes(alias_id)
            .await
            .iter()
            .any(|mailbox| mailbox.is_authorized(&address))
    }

    async fn can_create_for(&self, user: &User) -> Result<(), CreateResult> {
        if user.disabled {
            tracing::info!(user = %user.email, "Disabled user cannot create aliases.");
            return Err(CreateResult::RejectedDisabled);
        }
        if !user.can_create_new_alias(self.store.count_aliases(user.id).await) {
            tracing::info!(user = %user.email, "Alias quota reached.");
            return Err(CreateResult::RejectedQuota);
        }
        Ok(())
    }

    async fn decide_for_custom_domain(
        &self,
        address: &str,
        custom_domain: CustomDomain,
        notify: bool,
    ) -> AutoCreateDecision {
        let Some(user) = self.store.get_user(custom_domain.user_id).await else {
            return AutoCreateDecision::Refused(CreateResult::NotEligible);
        };

        if let Err(refused) = self.can_create_for(&user).await {
            let template = match refused {
                CreateResult::RejectedQuota => Some(Template::CannotCreateAliasDomain),
                CreateResult::RejectedDisabled => Some(Template::CannotCreateAliasUserDisabled),
                _ => None,
            };
            if let Some(template) = template.filter(|_| notify) {
                self.notifier
                    .send(
                        &Notification::new(
                            &user.email,
                            format!("Alias {address} cannot be created"),
                            self.renderer.render(
                                template,
                                &[("alias", address), ("domain", &custom_domain.domain)],
                            ),
                        ),
                        false,
                    )
                    .await;
            }
            return AutoCreateDecision::Refused(refused);
        }

        if custom_domain.catch_all {
            return AutoCreateDecision::CatchAll(custom_domain);
        }

        let local_part = email_local_part(address);
        let mut rules = custom_domain.auto_create_rules.clone();
        rules.sort_by_key(|rule| rule.order);

        match rules.into_iter().find(|rule| rule_matches(rule, &local_part)) {
            Some(rule) => {
                tracing::debug!(%address, regex = %rule.regex, "Auto create rule matched.");
                AutoCreateDecision::Rule(custom_domain, rule)
            }
            None => {
                tracing::debug!(%address, domain = %custom_domain.domain, "No auto create rule matched.");
                AutoCreateDecision::Refused(CreateResult::NotEligible)
            }
        }
    }

    async fn decide_for_directory(&self, address: &str, notify: bool) -> AutoCreateDecision {
        let domain = email_domain_part(address);
        if !self.config.app.alias_domains.iter().any(|d| *d == domain) {
            return AutoCreateDecision::Refused(CreateResult::NotEligible);
        }

        let local_part = email_local_part(address);
        let Some(idx) = DIRECTORY_SEPARATORS
            .iter()
            .find_map(|separator| local_part.find(*separator))
        else {
            tracing::debug!(%address, "No directory separator.");
            return AutoCreateDecision::Refused(CreateResult::NotEligible);
        };

        let directory_name = &local_part[..idx];
        let Some(directory) = self.store.get_directory_by_name(directory_name).await else {
            tracing::debug!(%address, %directory_name, "No such directory.");
            return AutoCreateDecision::Refused(CreateResult::NotEligible);
        };
        let Some(user) = self.store.get_user(directory.user_id).await else {
            return AutoCreateDecision::Refused(CreateResult::NotEligible);
        };

        if let Err(refused) = self.can_create_for(&user).await {
            let template = match refused {
                CreateResult::RejectedQuota => Some(Template::CannotCreateAliasDirectory),
                CreateResult::RejectedDisabled => Some(Template::CannotCreateAliasUserDisabled),
                _ => None,
            };
            if let Some(template) = template.filter(|_| notify) {
                self.notifier
                    .send(
                        &Notification::new(
                            &user.email,
                            format!("Alias {address} cannot be created"),
                            self.renderer.render(
                                template,
                                &[("alias", address), ("directory", directory_name)],
                            ),
                        ),
                        false,
                    )
                    .await;
            }
            return AutoCreateDecision::Refused(refused);
        }

        if directory.disabled {
            tracing::info!(%address, %directory_name, "Directory disabled.");
            if notify {
                self.notifier
                    .send_with_rate_control(
                        user.id,
                        AlertType::CannotCreateAlias,
                        &Notification::new(
                            &user.email,
                            format!("Alias {address} cannot be created"),
                            self.renderer.render(
                                Template::CannotCreateAliasDirectoryDisabled,
                                &[("alias", address), ("directory", directory_name)],
                            ),
                        ),
                        self.config.app.alerts.max_per_day,
                        1,
                        false,
                    )
                    .await;
            }
            return AutoCreateDecision::Refused(CreateResult::RejectedDisabled);
        }

        AutoCreateDecision::Directory(directory)
    }

    /// Which rule would create `address`. If `notify` is set, the owner is told when
    /// the creation is refused because of the quota, or because the owner or the
    /// directory is disabled.
    pub async fn auto_create_decision(&self, address: &str, notify: bool) -> AutoCreateDecision {
        if self.verp.is_reserved(address) {
            tracing::warn!(%address, "Reserved prefix, no alias created.");
            return AutoCreateDecision::Refused(CreateResult::NotEligible);
        }
        if !address.is_ascii() || !is_valid_email(address) {
            tracing::info!(%address, "Invalid address, no alias created.");
            return AutoCreateDecision::Refused(CreateResult::NotEligible);
        }
        if self.store.get_domain_deleted_alias(address).await.is_some()
            || self.store.get_deleted_alias(address).await.is_some()
        {
            tracing::info!(%address, "Address in the trash, no alias created.");
            return AutoCreateDecision::Refused(CreateResult::RejectedTrashed);
        }

        if let Some(custom_domain) = self
            .store
            .get_custom_domain_by_domain(&email_domain_part(address))
            .await
            .filter(|custom_domain| custom_domain.verified)
        {
            return self
                .decide_for_custom_domain(address, custom_domain, notify)
                .await;
        }

        self.decide_for_directory(address, notify).await
    }

    /// Create `address` if a catch-all domain, an auto create rule or a directory allows it.
    ///
    /// # Errors
    ///
    /// * the store failed
    pub async fn try_auto_create(&self, address: &str) -> HandlerResult<CreateResult> {
        let (alias, mailbox_ids) = match self.auto_create_decision(address, true).await {
            AutoCreateDecision::Refused(refused) => return Ok(refused),
            AutoCreateDecision::CatchAll(custom_domain) => (
                Alias {
                    user_id: custom_domain.user_id,
                    custom_domain_id: Some(custom_domain.id),
                    automatic_creation: true,
                    note: Some("Created by catchall option".to_string()),
                    ..Alias::default()
                },
                custom_domain.mailbox_ids,
            ),
            AutoCreateDecision::Rule(custom_domain, rule) => (
                Alias {
                    user_id: custom_domain.user_id,
                    custom_domain_id: Some(custom_domain.id),
                    automatic_creation: true,
                    note: Some(format!(
                        "Created by rule {} with regex {}",
                        rule.order, rule.regex
                    )),
                    ..Alias::default()
                },
                rule.mailbox_ids,
            ),
            AutoCreateDecision::Directory(directory) => (
                Alias {
                    user_id: directory.user_id,
                    directory_id: Some(directory.id),
                    note: Some(format!("Created by directory {}", directory.name)),
                    ..Alias::default()
                },
                directory.mailbox_ids,
            ),
        };

        // a rule may have lost its mailboxes
        let mailbox_ids = if mailbox_ids.is_empty() {
            match self.store.get_user(alias.user_id).await {
                Some(user) => vec![user.default_mailbox_id],
                None => return Ok(CreateResult::NotEligible),
            }
        } else {
            mailbox_ids
        };

        let alias = Alias {
            email: address.to_string(),
            mailbox_id: mailbox_ids[0],
            ..alias
        };

        match self.store.create_alias(alias, &mailbox_ids[1..]).await {
            Ok(alias) => {
                tracing::info!(alias = %alias.email, mailboxes = mailbox_ids.len(), "Alias created on the fly.");
                Ok(CreateResult::Created(alias))
            }
            Err(StoreError::UniqueViolation(_)) => {
                tracing::warn!(%address, "Alias created in the meantime.");
                Ok(self
                    .store
                    .get_alias_by_email(address)
                    .await
                    .map_or(CreateResult::NotEligible, CreateResult::AlreadyExists))
            }
            Err(StoreError::InTrash(_)) => {
                tracing::warn!(%address, "Alias deleted before, cannot be created again.");
                Ok(CreateResult::RejectedTrashed)
            }
            Err(otherwise) => Err(otherwise.into()),
        }
    }

    /// The alias of `address`: the existing one, or a new one when allowed.
    ///
    /// # Errors
    ///
    /// * the store failed
    pub async fn get_or_auto_create_alias(&self, address: &str) -> HandlerResult<CreateResult> {
        if let Some(alias) = self.store.get_alias_by_email(address).await {
            return Ok(CreateResult::AlreadyExists(alias));
        }
        self.try_auto_create(address).await
    }
}
