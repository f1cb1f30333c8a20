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
    dkim::{DkimSigner, MtaSigner},
    notify::{DefaultRenderer, Notifier, Renderer},
    pgp::{PgpEncryptor, UnavailablePgp},
    spam::SpamScorer,
    unsubscribe::UnsubscribeEncoder,
    verp::VerpCodec,
    MemoryStore, Store,
};
use aliasrelay_config::Config;
use aliasrelay_delivery::Dispatcher;
use anyhow::Context;
extern crate alloc;

/// Everything the relay core needs to handle a message, shared by every transaction.
pub struct RelayContext {
    ///
    pub config: alloc::sync::Arc<Config>,
    ///
    pub store: alloc::sync::Arc<dyn Store>,
    /// Outbound delivery of the relayed messages.
    pub dispatcher: alloc::sync::Arc<Dispatcher>,
    /// Outbound delivery of the notifications.
    pub notifier: Notifier,
    ///
    pub renderer: alloc::sync::Arc<dyn Renderer>,
    /// `None` to rely on the `X-Spam-Status` header only.
    pub spam: Option<alloc::sync::Arc<dyn SpamScorer>>,
    ///
    pub pgp: alloc::sync::Arc<dyn PgpEncryptor>,
    ///
    pub dkim: alloc::sync::Arc<dyn DkimSigner>,
    ///
    pub verp: alloc::sync::Arc<VerpCodec>,
    ///
    pub unsubscribe: UnsubscribeEncoder,
}

impl std::fmt::Debug for RelayContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayContext")
            .field("email_domain", &self.config.app.email_domain)
            .field("dispatcher", &self.dispatcher)
            .field("spam", &self.spam.is_some())
            .finish_non_exhaustive()
    }
}

impl RelayContext {
    /// A context with the default capabilities: no PGP backend, no spam scorer,
    /// signature delegated to the MTA and the built-in templates.
    #[must_use]
    pub fn new(
        config: alloc::sync::Arc<Config>,
        store: alloc::sync::Arc<dyn Store>,
        dispatcher: alloc::sync::Arc<Dispatcher>,
    ) -> Self {
        let verp = alloc::sync::Arc::new(VerpCodec::from_config(&config.app));
        Self {
            notifier: Notifier::new(
                &config.app,
                dispatcher.clone(),
                store.clone(),
                verp.clone(),
            ),
            renderer: alloc::sync::Arc::new(DefaultRenderer::new()),
            spam: None,
            pgp: alloc::sync::Arc::new(UnavailablePgp),
            dkim: alloc::sync::Arc::new(MtaSigner::new(&config.app.dkim_domains)),
            unsubscribe: UnsubscribeEncoder::from_config(&config.app),
            verp,
            store,
            dispatcher,
            config,
        }
    }

    /// Build the context of a running server: the store is opened from
    /// `app.store` and the messages are relayed to `app.delivery`.
    ///
    /// # Errors
    ///
    /// * the store file or the seed cannot be loaded
    pub async fn from_config(config: Config) -> anyhow::Result<Self> {
        let store = MemoryStore::open(&config.app.store)
            .await
            .context("cannot open the store")?;
        let dispatcher = Dispatcher::from_config(&config.app.delivery, &config.server.name);

        Ok(Self::new(
            alloc::sync::Arc::new(config),
            alloc::sync::Arc::new(store),
            alloc::sync::Arc::new(dispatcher),
        ))
    }

    ///
    #[must_use]
    pub fn with_spam_scorer(mut self, scorer: alloc::sync::Arc<dyn SpamScorer>) -> Self {
        self.spam = Some(scorer);
        self
    }

    ///
    #[must_use]
    pub fn with_pgp(mut self, pgp: alloc::sync::Arc<dyn PgpEncryptor>) -> Self {
        self.pgp = pgp;
        self
    }

    ///
    #[must_use]
    pub fn with_dkim(mut self, dkim: alloc::sync::Arc<dyn DkimSigner>) -> Self {
        self.dkim = dkim;
        self
    }

    ///
    #[must_use]
    pub fn with_renderer(mut self, renderer: alloc::sync::Arc<dyn Renderer>) -> Self {
        self.renderer = renderer;
        self
    }

    /// The relay domain.
    #[must_use]
    pub fn email_domain(&self) -> &str {
        &self.config.app.email_domain
    }

    /// Is `address` the noreply address, it is never forwarded.
    #[must_use]
    pub fn is_noreply(&self, address: &str) -> bool {
        address == self.config.app.noreply()
    }
}
