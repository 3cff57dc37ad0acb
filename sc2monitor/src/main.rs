#[macro_use]
extern crate tracing;

use anyhow::Context;
use sc2monitor::config::ConfHandle;
use sc2monitor::monitor::Monitor;
use sc2monitor::service::{self, MonitorService};
use tap::prelude::*;

enum CliAction {
    ShowHelp,
    Run,
    ConfigInitOnly,
    Add { url: String },
    Remove { url: String },
    Update,
    Stats,
}

#[allow(clippy::print_stdout)] // Command output is meant for the terminal.
fn main() -> anyhow::Result<()> {
    let mut args = std::env::args();

    let executable = args.next().context("executable name is missing from the environment")?;

    let action = match args.next().as_deref() {
        None => CliAction::Run,
        Some("--config-init-only") => CliAction::ConfigInitOnly,
        Some("add") => match args.next() {
            Some(url) => CliAction::Add { url },
            None => CliAction::ShowHelp,
        },
        Some("remove") => match args.next() {
            Some(url) => CliAction::Remove { url },
            None => CliAction::ShowHelp,
        },
        Some("update") => CliAction::Update,
        Some("stats") => CliAction::Stats,
        Some(_) => CliAction::ShowHelp,
    };

    match action {
        CliAction::ShowHelp => {
            println!(
                r#"HELP:

    Run:
        "{executable}"

    Initialize configuration only (will not override existing configuration):
        "{executable}" --config-init-only

    Track a player:
        "{executable}" add <profile URL>

    Stop tracking a player:
        "{executable}" remove <profile URL>

    Run a single polling cycle:
        "{executable}" update

    Print the players and their statistics as JSON:
        "{executable}" stats
"#
            )
        }
        CliAction::ConfigInitOnly => {
            let conf_file = sc2monitor::config::load_conf_file_or_generate_new()?;
            let conf_file_json =
                serde_json::to_string_pretty(&conf_file).context("couldn't represent config file as JSON")?;
            println!("{conf_file_json}");
        }
        CliAction::Add { url } => {
            let players = run_command(|monitor| async move { monitor.add_player(&url).await })?;
            for player in players {
                println!("{} {} ({}, {} MMR)", player.profile(), player.name, player.race, player.mmr);
            }
        }
        CliAction::Remove { url } => {
            let deleted = run_command(|monitor| async move { monitor.remove_player(&url).await })?;
            println!("{deleted} row(s) removed");
        }
        CliAction::Update => {
            let report = run_command(|monitor| async move { monitor.update_all().await })?;
            let report_json = serde_json::to_string_pretty(&report).context("couldn't represent report as JSON")?;
            println!("{report_json}");
        }
        CliAction::Stats => {
            let report = run_command(|monitor| async move { monitor.report().await })?;
            let report_json = serde_json::to_string_pretty(&report).context("couldn't represent report as JSON")?;
            println!("{report_json}");
        }
        CliAction::Run => {
            let conf_handle = ConfHandle::init().context("unable to initialize configuration")?;
            let mut service = MonitorService::load(conf_handle).context("Service loading failed")?;

            service
                .start()
                .tap_err(|error| error!(error = format!("{error:#}"), "Failed to start"))?;

            info!("{} service started", service::SERVICE_NAME);

            // Waiting for some stop signal (CTRL-C…)
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_io()
                .build()
                .context("failed to build the async runtime")?;
            rt.block_on(build_signals_fut())?;

            service.stop();
        }
    }

    Ok(())
}

/// Runs a one-shot command against the configured database.
fn run_command<F, Fut, T>(command: F) -> anyhow::Result<T>
where
    F: FnOnce(Monitor) -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let conf_handle = ConfHandle::init().context("unable to initialize configuration")?;
    let conf = conf_handle.get_conf();

    let _logger_guard = sc2monitor::log::init_log(&conf, None)?;

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build the async runtime")?;

    rt.block_on(async {
        let repo = service::open_repo(&conf).await?;
        let monitor = service::build_monitor(&conf, repo).await?;
        command(monitor).await
    })
    .tap_err(|error| error!(error = format!("{error:#}"), "Command failed"))
}

#[cfg(unix)]
async fn build_signals_fut() -> anyhow::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate_signal = signal(SignalKind::terminate()).context("failed to create terminate signal stream")?;
    let mut quit_signal = signal(SignalKind::quit()).context("failed to create quit signal stream")?;
    let mut interrupt_signal = signal(SignalKind::interrupt()).context("failed to create interrupt signal stream")?;

    futures::future::select_all(vec![
        Box::pin(terminate_signal.recv()),
        Box::pin(quit_signal.recv()),
        Box::pin(interrupt_signal.recv()),
    ])
    .await;

    Ok(())
}

#[cfg(not(unix))]
async fn build_signals_fut() -> anyhow::Result<()> {
    tokio::signal::ctrl_c().await.context("CTRL_C signal failed")
}
