use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fernbook_core::{
    generator_configured, read_settings, resolve::stale_groups, write_settings, FileStore,
    GeneratorSettings, RecordStore, RulesetRegistry, RulesetVersion,
};
use fernbook_generate::{http_client, HttpTransport, Orchestrator, RefreshOutcome};

#[derive(Parser)]
#[command(name = "fernbook")]
#[command(about = "Keep generated plant record fields current with the ruleset")]
struct Cli {
    /// Directory holding one JSON file per record (default ~/.fernbook/records)
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Ruleset document to use instead of the built-in ruleset
    #[arg(long, global = true)]
    ruleset: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the fields a record stamped with version N must regenerate
    Forced {
        /// Negative versions count as never generated
        #[arg(long, allow_negative_numbers = true)]
        since: i64,
        /// Defaults to the ruleset's current version
        #[arg(long)]
        target: Option<RulesetVersion>,
    },
    /// List stored records with their ruleset version and stale groups
    List,
    /// Show what a refresh of a record would regenerate
    Plan {
        id: String,
        #[arg(long)]
        target: Option<RulesetVersion>,
    },
    /// Regenerate the stale fields of a record and save it
    Refresh {
        id: String,
        #[arg(long)]
        target: Option<RulesetVersion>,
    },
    /// Show or update generator settings
    Settings {
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        api_key: Option<String>,
        #[arg(long)]
        base_url: Option<String>,
    },
}

/// Logs go to stderr so stdout carries only command output.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "fernbook=info".into()),
    );
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_registry(path: Option<&PathBuf>) -> anyhow::Result<RulesetRegistry> {
    match path {
        Some(path) => RulesetRegistry::load(path)
            .with_context(|| format!("loading ruleset {}", path.display())),
        None => Ok(RulesetRegistry::builtin()),
    }
}

fn open_store(dir: Option<PathBuf>) -> FileStore {
    dir.map(FileStore::new).unwrap_or_else(FileStore::default_location)
}

fn open_orchestrator(
    registry: RulesetRegistry,
    store: Option<PathBuf>,
    settings: GeneratorSettings,
) -> anyhow::Result<Orchestrator<HttpTransport, FileStore>> {
    let store = open_store(store);
    tracing::debug!(store = %store.dir().display(), "opened record store");
    Ok(Orchestrator::new(
        Arc::new(registry),
        http_client(&settings)?,
        store,
        settings,
    ))
}

fn check_target(registry: &RulesetRegistry, target: Option<RulesetVersion>) -> anyhow::Result<()> {
    if let Some(target) = target {
        if target > registry.current_version() {
            bail!(
                "target version {} is newer than the ruleset's current version {}",
                target,
                registry.current_version()
            );
        }
    }
    Ok(())
}

fn masked(key: &str) -> String {
    if key.is_empty() {
        return "(not set)".into();
    }
    let chars: Vec<char> = key.chars().collect();
    let tail: String = chars[chars.len().saturating_sub(4)..].iter().collect();
    format!("****{}", tail)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    match cli.command {
        Commands::Forced { since, target } => {
            let registry = load_registry(cli.ruleset.as_ref())?;
            check_target(&registry, target)?;
            let target = target.unwrap_or_else(|| registry.current_version());
            let forced = registry.compute_forced_fields_since(Some(since), target);
            let names: Vec<&str> = forced.iter().map(|f| f.as_str()).collect();
            println!("{}", serde_json::to_string_pretty(&names)?);
        }
        Commands::List => {
            let registry = load_registry(cli.ruleset.as_ref())?;
            let store = open_store(cli.store);
            for id in store.list()? {
                let record = match store.load(&id) {
                    Ok(record) => record,
                    Err(e) => {
                        tracing::warn!(%id, "skipping unreadable record: {}", e);
                        continue;
                    }
                };
                let forced = registry.compute_forced_fields(record.ruleset_version);
                let stale: Vec<&str> = stale_groups(&forced).iter().map(|g| g.as_str()).collect();
                let version = record
                    .ruleset_version
                    .map_or_else(|| "-".to_string(), |v| v.to_string());
                if stale.is_empty() {
                    println!("{id}\tv{version}\tcurrent");
                } else {
                    println!("{id}\tv{version}\tstale: {}", stale.join(", "));
                }
            }
        }
        Commands::Plan { id, target } => {
            let registry = load_registry(cli.ruleset.as_ref())?;
            check_target(&registry, target)?;
            let settings = read_settings().with_env_overrides();
            let orchestrator = open_orchestrator(registry, cli.store, settings)?;
            let plan = orchestrator.plan(&id, target)?;
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "id": plan.record_id,
                    "storedVersion": plan.stored_version,
                    "targetVersion": plan.target_version,
                    "forced": plan.forced.iter().map(|f| f.as_str()).collect::<Vec<_>>(),
                    "groups": plan.groups.iter().map(|g| g.as_str()).collect::<Vec<_>>(),
                }))?
            );
        }
        Commands::Refresh { id, target } => {
            let registry = load_registry(cli.ruleset.as_ref())?;
            check_target(&registry, target)?;
            let settings = read_settings().with_env_overrides();
            if !generator_configured(&settings) {
                bail!(
                    "no API key configured; run `fernbook settings --api-key <key>` \
                     or set FERNBOOK_API_KEY"
                );
            }
            let orchestrator = open_orchestrator(registry, cli.store, settings)?;
            match orchestrator.refresh(&id, target).await? {
                RefreshOutcome::UpToDate {
                    stored_version,
                    target_version,
                } => {
                    println!(
                        "{} is up to date (stored {:?}, target {})",
                        id, stored_version, target_version
                    );
                }
                RefreshOutcome::Refreshed {
                    record,
                    groups,
                    written,
                } => {
                    for (group, tier) in &groups {
                        tracing::debug!(%group, %tier, "group regenerated");
                    }
                    println!("{}", serde_json::to_string_pretty(&record)?);
                    eprintln!(
                        "refreshed {} groups, wrote {} fields",
                        groups.len(),
                        written.len()
                    );
                }
            }
        }
        Commands::Settings {
            model,
            api_key,
            base_url,
        } => {
            let mut settings = read_settings();
            let changed = model.is_some() || api_key.is_some() || base_url.is_some();
            if let Some(model) = model {
                settings.model = model;
            }
            if let Some(key) = api_key {
                settings.api_key = key;
            }
            if let Some(url) = base_url {
                settings.base_url = url;
            }
            if changed {
                write_settings(&settings)?;
                tracing::info!("settings saved");
            }
            let effective = settings.with_env_overrides();
            println!("model:       {}", effective.model);
            println!("base url:    {}", effective.base_url);
            println!("api key:     {}", masked(&effective.api_key));
            println!("timeout ms:  {}", effective.timeout_ms);
            println!("max tokens:  {}", effective.max_output_tokens);
        }
    }

    Ok(())
}
