mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{ApplyArgs, Cli, Command};
use std::path::Path;
use std::time::Duration;
use tablerepl::changeset::encode_revision;
use tablerepl::{check_revision_at_least, Replicator, ReplicatorConfig, UnknownRevision};
use tokio::io::AsyncRead;
use tokio::time::Instant;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_filter()));
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    match cli.command {
        Command::Apply(args) => apply(args).await,
        Command::Check { revision, target } => {
            let reached = check_revision_at_least(
                &encode_revision(revision),
                &encode_revision(target),
            )?;
            if reached {
                println!("revision {} has reached {}", revision, target);
                Ok(())
            } else {
                println!("revision {} is behind {}", revision, target);
                std::process::exit(1);
            }
        }
    }
}

fn load_config(args: &ApplyArgs) -> Result<ReplicatorConfig> {
    let mut config = match &args.config {
        Some(path) => ReplicatorConfig::load(path)?,
        None => ReplicatorConfig::default(),
    };
    if let Some(count) = args.max_changesets {
        config = config.with_max_changesets(count);
    }
    Ok(config)
}

async fn open_input(input: Option<&Path>) -> Result<Box<dyn AsyncRead + Unpin + Send>> {
    Ok(match input {
        Some(path) => Box::new(
            tokio::fs::File::open(path)
                .await
                .with_context(|| format!("Failed to open changeset {}", path.display()))?,
        ),
        None => Box::new(tokio::io::stdin()),
    })
}

async fn apply(args: ApplyArgs) -> Result<()> {
    let config = load_config(&args)?;
    std::fs::create_dir_all(&args.db_dir)
        .with_context(|| format!("Failed to create {}", args.db_dir.display()))?;

    let replicator = match args.trusted_revision {
        Some(current) => Replicator::new(
            &args.db_dir,
            config,
            move |_: &Path| -> tablerepl::Result<u64> { Ok(current) },
        ),
        None => Replicator::new(&args.db_dir, config, UnknownRevision),
    };

    let mut conn = open_input(args.input.as_deref()).await?;
    let deadline = Instant::now() + Duration::from_secs(args.timeout);
    let applied = replicator
        .apply(&mut conn, deadline, args.trusted_revision.is_some())
        .await
        .with_context(|| format!("Failed to apply changeset to {}", args.db_dir.display()))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&applied)?);
    } else {
        println!(
            "applied {} -> {}, required revision {} ({})",
            applied.start_revision,
            applied.end_revision,
            applied.required_revision,
            hex::encode(applied.encoded_required_revision())
        );
    }
    Ok(())
}
