use std::path::PathBuf;

use anyhow::Result;
use changelog_runner::{
    tracing::{init_tracing_logs_if_set, init_tracing_logs_with_filter},
    ChangelogPlugin, ConfigToml, DataSourceRegistry,
};

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Config file. Embedded defaults are used when omitted.
    #[clap(short, long)]
    config: Option<PathBuf>,
    /// [tracing_subscriber::EnvFilter], overrides `RUST_LOG` and `[logging]`
    #[clap(short, long)]
    tracing_env_filter: Option<String>,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, Default)]
enum Command {
    /// Apply every configured changeset (default).
    #[default]
    Update,
    /// List the change sets an update would run.
    Status,
    /// Parse every configured changelog without connecting to a database.
    Validate,
    /// Print a commented configuration template.
    Sample,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    match &args.tracing_env_filter {
        Some(filter) => init_tracing_logs_with_filter(filter)?,
        None => init_tracing_logs_if_set(args.config.as_deref())?,
    }

    let command = args.command.unwrap_or_default();
    if let Command::Sample = command {
        println!("{}", ConfigToml::sample_string());
        return Ok(());
    }

    let config = match &args.config {
        Some(path) => ConfigToml::from_file(path)?,
        None => ConfigToml::default(),
    };
    let registry = DataSourceRegistry::from_config(&config.datasources)?;
    let plugin = ChangelogPlugin::new(config);

    let result = match command {
        Command::Update => update(&plugin, &registry).await,
        Command::Status => status(&plugin, &registry).await,
        Command::Validate => validate(&plugin),
        Command::Sample => Ok(()),
    };
    registry.close().await;
    result
}

async fn update(plugin: &ChangelogPlugin, registry: &DataSourceRegistry) -> Result<()> {
    match plugin.init(registry).await {
        Ok(report) => {
            for result in report.failed() {
                println!(
                    "{}: not fully applied (changelog: {}, datasource: {})",
                    result.name, result.changelog, result.datasource
                );
            }
            Ok(())
        }
        Err(error) => {
            tracing::error!(
                code = %error.code(),
                changelog = %error.changelog,
                datasource = %error.datasource,
                "Startup aborted: {}",
                error
            );
            Err(error.into())
        }
    }
}

async fn status(plugin: &ChangelogPlugin, registry: &DataSourceRegistry) -> Result<()> {
    let mut failed = 0;
    for (config, pending) in plugin.status(registry).await {
        match pending {
            Ok(pending) => {
                println!(
                    "{} ({} on {}): {} pending",
                    config.name,
                    config.changelog,
                    config.datasource,
                    pending.len()
                );
                for change_set in pending {
                    println!(
                        "  {} [{}] {}",
                        change_set.id, change_set.reason, change_set.description
                    );
                }
            }
            Err(e) => {
                failed += 1;
                println!(
                    "{} ({} on {}): {}",
                    config.name, config.changelog, config.datasource, e
                );
            }
        }
    }
    if failed > 0 {
        anyhow::bail!("status of {} changesets could not be read", failed);
    }
    Ok(())
}

fn validate(plugin: &ChangelogPlugin) -> Result<()> {
    let mut invalid = 0;
    for (config, changelog) in plugin.validate() {
        match changelog {
            Ok(changelog) => println!(
                "{}: {} is valid ({} change sets)",
                config.name,
                changelog.path(),
                changelog.change_sets().len()
            ),
            Err(e) => {
                invalid += 1;
                println!("{}: {}", config.name, e);
            }
        }
    }
    if invalid > 0 {
        anyhow::bail!("{} changelogs are invalid", invalid);
    }
    Ok(())
}
