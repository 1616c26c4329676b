use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use watchsync::config::{init::write_initial_config, ConfigSources, Profile};
use watchsync::ssh::CredentialRelay;
use watchsync::sync::{download_all, run_profiles, upload_all, BulkReport, RestartPolicy};

mod cli;

use cli::{Action, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cwd = match &cli.dir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir().context("cannot determine working directory")?,
    };

    if cli.action() == Action::Init {
        cli::init_tracing(cli.verbose);
        let path = write_initial_config(&cwd, &whoami::username())?;
        println!("Created {}", path.display());
        return Ok(());
    }

    let profiles = resolve_profiles(&cwd, &cli.profiles)?;
    cli::init_tracing(cli.verbose || profiles.iter().any(|p| p.debug));
    for profile in &profiles {
        tracing::debug!(
            profile = %profile.name,
            destination = %profile.remote_spec(),
            local = %profile.local_path.display(),
            ignore = ?profile.ignore.patterns(),
            watcher = ?profile.watcher,
            "resolved profile"
        );
    }

    match cli.action() {
        Action::Upload => {
            let report = upload_all(&profiles, &mut CredentialRelay::stdin()).await?;
            print_report(&report);
            Ok(())
        }
        Action::Download => {
            let report = download_all(&profiles, &mut CredentialRelay::stdin()).await?;
            print_report(&report);
            Ok(())
        }
        Action::Watch => watch(profiles).await,
        Action::Init => Ok(()),
    }
}

fn resolve_profiles(cwd: &Path, requested: &[String]) -> Result<Vec<Profile>> {
    let sources = ConfigSources::load(cwd)?;
    Ok(sources.resolve(requested)?)
}

fn print_report(report: &BulkReport) {
    println!(
        "{} complete: {} of {} files in {:.1}s",
        report.direction,
        report.transferred,
        report.enumerated,
        report.duration.as_secs_f64()
    );
}

async fn watch(profiles: Vec<Profile>) -> Result<()> {
    let relay = Arc::new(Mutex::new(CredentialRelay::stdin()));
    let count = profiles.len();

    tokio::select! {
        exits = run_profiles(profiles, relay, RestartPolicy::default()) => {
            let reasons: Vec<String> = exits
                .iter()
                .map(|exit| format!("{}: {}", exit.name, exit.error))
                .collect();
            anyhow::bail!("all {} profile(s) stopped ({})", count, reasons.join("; "))
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for ctrl-c")?;
            tracing::info!("interrupted, stopping");
            Ok(())
        }
    }
}
