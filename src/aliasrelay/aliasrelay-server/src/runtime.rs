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
use crate::Server;
use aliasrelay_config::Config;
use aliasrelay_handler::RelayContext;

fn init_runtime<F>(
    sender: tokio::sync::mpsc::Sender<()>,
    name: impl Into<String>,
    future: F,
    timeout: Option<std::time::Duration>,
) -> anyhow::Result<std::thread::JoinHandle<anyhow::Result<()>>>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let name = name.into();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name(format!("{name}-child"))
        .build()?;

    std::thread::Builder::new()
        .name(format!("{name}-main"))
        .spawn(move || {
            let name_rt = name.clone();
            runtime.block_on(async move {
                tracing::info!(name = name_rt, "Runtime started successfully.");

                match timeout {
                    Some(duration) => {
                        if tokio::time::timeout(duration, future).await.is_ok() {
                            tracing::warn!(name = name_rt, "Runtime stopped before its timeout.");
                        }
                    }
                    None => future.await,
                }
            });

            sender.blocking_send(())?;
            Ok(())
        })
        .map_err(anyhow::Error::new)
}

/// Start the relay: one runtime serving the relay and submission listeners,
/// until `SIGTERM`/`SIGINT` or the optional `timeout`.
///
/// # Errors
///
/// * the runtime cannot be built
/// * the signal handler cannot be registered
pub fn start_runtime(
    config: Config,
    sockets: (Vec<std::net::TcpListener>, Vec<std::net::TcpListener>),
    timeout: Option<std::time::Duration>,
) -> anyhow::Result<()> {
    let mut error_handler = tokio::sync::mpsc::channel::<()>(2);

    let _tasks_receiver = init_runtime(
        error_handler.0.clone(),
        "receiver",
        async move {
            let context = match RelayContext::from_config(config.clone()).await {
                Ok(context) => std::sync::Arc::new(context),
                Err(error) => {
                    tracing::error!(error = %format!("{error:#}"), "Relay context build failure.");
                    return;
                }
            };
            let server = Server::new(std::sync::Arc::new(config), context);
            if let Err(error) = server.listen_and_serve(sockets).await {
                tracing::error!(%error, "Receiver failure.");
            }
        },
        timeout,
    )?;

    let error_handler_sig = error_handler.0.clone();
    let mut signals = signal_hook::iterator::Signals::new([
        // Send by `systemctl stop` (and then sending `SIGKILL`)
        signal_hook::consts::SIGTERM,
        // Ctrl+C on a terminal
        signal_hook::consts::SIGINT,
    ])?;
    let _signal_handler = std::thread::spawn(move || {
        for sig in signals.forever() {
            tracing::warn!(signal = sig, "Stopping the relay.");
            if error_handler_sig.blocking_send(()).is_err() {
                tracing::error!("Failed to send the terminating instruction.");
            }
        }
    });

    error_handler.1.blocking_recv();

    Ok(())
}
