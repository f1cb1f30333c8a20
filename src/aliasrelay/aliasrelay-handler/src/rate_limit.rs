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
//! Activity limits of the aliases and the mailboxes, on the email logs of the last minute.

use crate::{
    alias::CreateResult, models::Alias, reverse_alias::is_reverse_alias, HandlerResult,
    RelayContext,
};

fn one_minute_ago() -> time::OffsetDateTime {
    time::OffsetDateTime::now_utc() - time::Duration::minutes(1)
}

impl RelayContext {
    async fn rate_limited_for_alias(&self, alias: &Alias) -> bool {
        let nb_activity = self
            .store
            .alias_email_logs(alias.id, one_minute_ago())
            .await
            .len();

        if nb_activity > self.config.app.rate_limit.per_alias {
            tracing::warn!(alias = %alias.email, nb_activity, "Too much forward on alias.");
            return true;
        }
        false
    }

    async fn rate_limited_for_mailbox(&self, alias: &Alias) -> bool {
        let nb_activity = self
            .store
            .count_mailbox_email_logs(alias.mailbox_id, one_minute_ago())
            .await;

        if nb_activity > self.config.app.rate_limit.per_mailbox {
            tracing::warn!(alias = %alias.email, mailbox_id = alias.mailbox_id, nb_activity, "Too much forward on mailbox.");
            return true;
        }
        false
    }

    async fn rate_limited_forward_phase(&self, address: &str) -> HandlerResult<bool> {
        if let Some(alias) = self.store.get_alias_by_email(address).await {
            return Ok(self.rate_limited_for_alias(&alias).await
                || self.rate_limited_for_mailbox(&alias).await);
        }

        tracing::debug!(%address, "Alias does not exist, trying to create it on the fly.");
        Ok(match self.try_auto_create(address).await? {
            CreateResult::Created(alias) | CreateResult::AlreadyExists(alias) => {
                self.rate_limited_for_mailbox(&alias).await
            }
            _ => false,
        })
    }

    async fn rate_limited_reply_phase(&self, reply_email: &str) -> bool {
        let Some(contact) = self.store.get_contact_by_reply_email(reply_email).await else {
            return false;
        };
        let Some(alias) = self.store.get_alias(contact.alias_id).await else {
            return false;
        };
        self.rate_limited_for_alias(&alias).await || self.rate_limited_for_mailbox(&alias).await
    }

    /// Is one of the recipients too active.
    ///
    /// The alias of a recipient is created on the fly if it can be.
    ///
    /// # Errors
    ///
    /// * the store failed
    pub async fn rate_limited(&self, mail_from: &str, rcpt_tos: &[String]) -> HandlerResult<bool> {
        if !self.config.app.rate_limit.enabled {
            return Ok(false);
        }

        for rcpt_to in rcpt_tos {
            let limited = if is_reverse_alias(self.store.as_ref(), self.email_domain(), rcpt_to).await
            {
                self.rate_limited_reply_phase(rcpt_to).await
            } else {
                self.rate_limited_forward_phase(rcpt_to).await?
            };

            if limited {
                tracing::warn!(%mail_from, %rcpt_to, "Rate limited.");
                return Ok(true);
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        models::EmailLog,
        tests::{context, seed},
        Store,
    };

    async fn add_logs(store: &dyn Store, alias_id: u64, count: usize) {
        for _ in 0..count {
            store
                .create_email_log(EmailLog {
                    user_id: 1,
                    alias_id,
                    ..EmailLog::default()
                })
                .await
                .unwrap();
        }
    }

    #[rstest::rstest]
    #[case(5, false)]
    #[case(6, true)]
    #[tokio::test]
    async fn per_alias(#[case] nb_logs: usize, #[case] limited: bool) {
        let (ctx, _) = context(seed()).await;
        add_logs(ctx.store.as_ref(), 1, nb_logs).await;

        assert_eq!(
            ctx.rate_limited("sender@world.com", &["alias@sl.example.com".to_string()])
                .await
                .unwrap(),
            limited
        );
    }

    #[tokio::test]
    async fn per_mailbox() {
        let (ctx, _) = context(seed()).await;
        // aliases 1 and 2 share the primary mailbox 1
        add_logs(ctx.store.as_ref(), 1, 5).await;
        add_logs(ctx.store.as_ref(), 2, 5).await;
        assert!(!ctx
            .rate_limited("sender@world.com", &["multi@sl.example.com".to_string()])
            .await
            .unwrap());

        add_logs(ctx.store.as_ref(), 2, 1).await;
        // a new catch-all alias of the same mailbox is limited too
        assert!(ctx
            .rate_limited("sender@world.com", &["new@catchall-domain.com".to_string()])
            .await
            .unwrap());
        assert!(ctx
            .store
            .get_alias_by_email("new@catchall-domain.com")
            .await
            .is_some());
    }

    #[tokio::test]
    async fn disabled() {
        let mut tables = seed();
        for id in 0..20 {
            tables.email_logs.push(EmailLog {
                id: 100 + id,
                alias_id: 1,
                ..EmailLog::default()
            });
        }
        let (ctx, _) = context(tables).await;
        assert!(ctx
            .rate_limited("sender@world.com", &["alias@sl.example.com".to_string()])
            .await
            .unwrap());

        let mut config = (*ctx.config).clone();
        config.app.rate_limit.enabled = false;
        let ctx = crate::RelayContext::new(
            std::sync::Arc::new(config),
            ctx.store.clone(),
            ctx.dispatcher.clone(),
        );
        assert!(!ctx
            .rate_limited("sender@world.com", &["alias@sl.example.com".to_string()])
            .await
            .unwrap());
    }
}
