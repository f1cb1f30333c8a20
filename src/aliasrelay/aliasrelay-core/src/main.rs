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
use aliasrelay::{Args, Commands};
use aliasrelay_config::Config;
use aliasrelay_delivery::Dispatcher;
use aliasrelay_server::{socket_bind_anyhow, start_runtime};
use anyhow::Context;
use clap::{crate_name, crate_version};

fn main() {
    if let Err(err) = try_main() {
        let error = format!("aliasrelay terminating error: '{err}'");

        eprintln!("{error}");
        tracing::error!(error);
        err.chain().skip(1).for_each(|cause| {
            let reason = format!("because: {cause}");

            eprintln!("{reason}");
            tracing::error!(reason);
        });
        std::process::exit(1);
    }
}

fn bind_sockets(addr: &[std::net::SocketAddr]) -> anyhow::Result<Vec<std::net::TcpListener>> {
    addr.iter()
        .copied()
        .map(socket_bind_anyhow)
        .collect::<anyhow::Result<Vec<std::net::TcpListener>>>()
}

fn resend_unsent(config: &Config) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    let report = runtime.block_on(async {
        Dispatcher::from_config(&config.app.delivery, &config.server.name)
            .resend_unsent()
            .await
    })?;

    tracing::info!(
        delivered = report.delivered,
        kept = report.kept,
        failed = report.failed,
        skipped = report.skipped,
        "Unsent messages processed."
    );
    println!(
        "delivered: {}, kept: {}, failed: {}, skipped: {}",
        report.delivered, report.kept, report.failed, report.skipped
    );
    Ok(())
}

fn try_main() -> anyhow::Result<()> {
    let args = <Args as clap::Parser>::parse();

    if args.version {
        println!(
            "{} v{}\ncommit: {}",
            crate_name!(),
            crate_version!(),
            env!("GIT_HASH")
        );
        return Ok(());
    }

    let config = args
        .config
        .as_ref()
        .context("No configuration file given, use `--config <path>`")
        .and_then(|config| {
            std::fs::read_to_string(config)
                .context(format!("Cannot read file '{config}'"))
                .and_then(|f| Config::from_toml(&f).context("File contains format error"))
                .context("Cannot parse the configuration")
        })?;

    if let Some(Commands::ConfigShow) = args.command {
        let stringified = serde_json::to_string_pretty(&config)?;
        println!("Loaded configuration: {stringified}");
        return Ok(());
    }

    aliasrelay::tracing_subscriber::initialize(&args, &config)?;

    tracing::info!(
        server = ?config.server.logs.filepath,
        email_domain = %config.app.email_domain,
        "aliasrelay logs initialized.",
    );

    if let Some(Commands::ResendUnsent) = args.command {
        return resend_unsent(&config);
    }

    let sockets = (
        bind_sockets(&config.server.interfaces.addr)?,
        bind_sockets(&config.server.interfaces.addr_submission)?,
    );

    start_runtime(config, sockets, args.timeout.map(|t| t.0))
}
