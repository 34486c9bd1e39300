//! Command-line interface for groupcast.
//!
//! Inspects the persisted mapping store and validates configuration.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use groupcast_core::config::env_vars;
use groupcast_core::{GroupMapping, GroupcastConfig, GroupingId};
use groupcast_orchestrator::{EntityStatus, GroupingState, GroupingStatus, StatusSnapshot};
use groupcast_storage::{create_backend, MappingStore};
use serde_json::json;

/// Groupcast - native group orchestration for smart-home backends.
#[derive(Parser, Debug)]
#[command(name = "groupcast")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform.
    #[command(subcommand)]
    command: Command,

    /// Config file. Falls back to $GROUPCAST_CONFIG, then built-in defaults.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Mapping store file, overriding the configured one.
    #[arg(short, long, global = true)]
    store: Option<PathBuf>,

    /// Output format.
    #[arg(short, long, global = true, value_enum, default_value_t = Format::Table)]
    format: Format,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List every stored grouping.
    List,
    /// Show the native groups of one grouping, e.g. `area.kitchen`.
    Show { grouping: String },
    /// Show where an entity is natively grouped.
    Entity { entity_id: String },
    /// Load and validate the configuration.
    CheckConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Table,
    Json,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = load_config(args.config.as_deref(), args.store.as_deref())?;
    let output = match &args.command {
        Command::CheckConfig => render_config(&config, args.format)?,
        Command::List => {
            let store = open_store(&config)?;
            render_list(&sorted(&store), args.format)?
        }
        Command::Show { grouping } => {
            let id = GroupingId::parse(grouping)
                .with_context(|| format!("'{grouping}' is not a grouping id (expected <kind>.<name>)"))?;
            let store = open_store(&config)?;
            let snapshot = match store.get(&id) {
                Some(mapping) => StatusSnapshot::Grouping(GroupingStatus::from_mapping(&mapping, stored_state(&mapping))),
                None => StatusSnapshot::Absent { grouping: id },
            };
            render_snapshot(&snapshot, args.format)?
        }
        Command::Entity { entity_id } => {
            let store = open_store(&config)?;
            let mappings = sorted(&store);
            let status = EntityStatus::locate(entity_id, mappings.iter());
            render_snapshot(&StatusSnapshot::Entity(status), args.format)?
        }
    };
    print!("{output}");
    Ok(())
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "groupcast=debug" } else { "groupcast=warn" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    // Logs go to stderr so JSON output on stdout stays parseable.
    if env_vars::log_json() {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .compact()
            .init();
    }
}

fn load_config(path: Option<&Path>, store: Option<&Path>) -> Result<GroupcastConfig> {
    let mut config = match path {
        Some(path) => GroupcastConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => GroupcastConfig::from_env().context("Failed to load config")?,
    };
    if let Some(store) = store {
        config.store.backend = "redb".into();
        config.store.path = store.display().to_string();
    }
    Ok(config)
}

fn open_store(config: &GroupcastConfig) -> Result<MappingStore> {
    if config.store.backend == "memory" {
        anyhow::bail!("The memory store keeps nothing between runs; pass --store to inspect a file");
    }
    let path = Path::new(&config.store.path);
    if !path.exists() {
        anyhow::bail!("No mapping store at {}", path.display());
    }
    let backend = create_backend(
        &config.store.backend,
        &json!({ "path": config.store.path, "create_dirs": false }),
    )
    .with_context(|| format!("Failed to open mapping store at {} (is the service running?)", path.display()))?;
    tracing::debug!(path = %path.display(), "Opened mapping store");
    Ok(MappingStore::open(backend)?)
}

fn sorted(store: &MappingStore) -> Vec<GroupMapping> {
    let mut mappings: Vec<GroupMapping> = store.list_all().iter().map(|m| (**m).clone()).collect();
    mappings.sort_by(|a, b| a.grouping.cmp(&b.grouping));
    mappings
}

/// State as far as the store can tell without a running orchestrator.
fn stored_state(mapping: &GroupMapping) -> GroupingState {
    if mapping.tombstone {
        GroupingState::Deprovisioning
    } else {
        GroupingState::Mapped
    }
}

fn format_timestamp(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| ts.to_string())
}

fn render_list(mappings: &[GroupMapping], format: Format) -> Result<String> {
    if format == Format::Json {
        let statuses: Vec<GroupingStatus> = mappings
            .iter()
            .map(|m| GroupingStatus::from_mapping(m, stored_state(m)))
            .collect();
        return Ok(serde_json::to_string_pretty(&statuses)? + "\n");
    }

    let mut out = String::new();
    if mappings.is_empty() {
        writeln!(out, "No groupings stored.")?;
        return Ok(out);
    }
    writeln!(
        out,
        "{:<32} {:<15} {:>5} {:>8} {:>7} {:>9}  {}",
        "GROUPING", "STATE", "KEYS", "MEMBERS", "SCENES", "REJECTED", "LAST SYNCED"
    )?;
    for mapping in mappings {
        let members: usize = mapping.groups.values().map(|g| g.members.len()).sum();
        writeln!(
            out,
            "{:<32} {:<15} {:>5} {:>8} {:>7} {:>9}  {}",
            mapping.grouping.to_string(),
            stored_state(mapping).to_string(),
            mapping.groups.len(),
            members,
            mapping.scene_entries().count(),
            mapping.rejected.len(),
            format_timestamp(mapping.last_synced)
        )?;
    }
    writeln!(out, "\nTotal: {} grouping(s)", mappings.len())?;
    Ok(out)
}

fn render_snapshot(snapshot: &StatusSnapshot, format: Format) -> Result<String> {
    if format == Format::Json {
        return Ok(serde_json::to_string_pretty(snapshot)? + "\n");
    }

    let mut out = String::new();
    match snapshot {
        StatusSnapshot::Absent { grouping } => {
            writeln!(out, "No mapping stored for {grouping}.")?;
        }
        StatusSnapshot::Grouping(status) => {
            writeln!(out, "Grouping:     {}", status.grouping)?;
            writeln!(out, "State:        {}", status.state)?;
            writeln!(out, "Last synced:  {}", format_timestamp(status.last_synced))?;
            if status.tombstone {
                writeln!(out, "Tombstone:    yes (teardown pending)")?;
            }
            writeln!(out, "\nNative groups")?;
            writeln!(out, "=============")?;
            if status.groups.is_empty() {
                writeln!(out, "  (none)")?;
            }
            for group in &status.groups {
                writeln!(out, "  {}/{}  {}", group.backend, group.capability, group.handle)?;
                writeln!(out, "    members: {}", group.members.join(", "))?;
                if !group.scene_slots.is_empty() {
                    let slots: Vec<String> = group
                        .scene_slots
                        .iter()
                        .map(|(entity_id, slot)| format!("{entity_id}@{slot}"))
                        .collect();
                    writeln!(out, "    scene slots: {}", slots.join(", "))?;
                }
            }
            if !status.rejected.is_empty() {
                writeln!(out, "\nRejected keys")?;
                writeln!(out, "=============")?;
                for (key, reason) in &status.rejected {
                    writeln!(out, "  {key}: {reason}")?;
                }
            }
        }
        StatusSnapshot::Entity(status) => {
            if status.placements.is_empty() {
                writeln!(out, "{} is not in any native group.", status.entity_id)?;
                return Ok(out);
            }
            writeln!(out, "{}", status.entity_id)?;
            for placement in &status.placements {
                write!(out, "  {}  {}  {}", placement.grouping, placement.key, placement.handle)?;
                if let Some(slot) = placement.scene_slot {
                    write!(out, "  slot {slot}")?;
                }
                writeln!(out)?;
            }
        }
    }
    Ok(out)
}

fn render_config(config: &GroupcastConfig, format: Format) -> Result<String> {
    if format == Format::Json {
        return Ok(serde_json::to_string_pretty(config)? + "\n");
    }

    let backends: Vec<String> = config.enabled_backends.iter().map(|b| b.to_string()).collect();
    let toggles = &config.groupings;
    let kinds: Vec<&str> = [
        ("group", toggles.groups),
        ("scene", toggles.scenes),
        ("area", toggles.areas),
        ("floor", toggles.floors),
        ("label", toggles.labels),
    ]
    .into_iter()
    .filter_map(|(name, enabled)| enabled.then_some(name))
    .collect();

    let mut out = String::new();
    writeln!(out, "Configuration OK")?;
    writeln!(out)?;
    writeln!(out, "Backends:            {}", backends.join(", "))?;
    writeln!(out, "Grouping kinds:      {}", kinds.join(", "))?;
    writeln!(out, "Store:               {} ({})", config.store.path, config.store.backend)?;
    writeln!(out, "Sync debounce:       {}ms", config.sync_debounce_ms)?;
    writeln!(out, "Reconcile interval:  {}s", config.reconcile_interval_secs)?;
    writeln!(out, "Call timeout:        {}ms", config.backend_call_timeout_ms)?;
    writeln!(out, "Max reconciles:      {}", config.max_concurrent_reconciles)?;
    writeln!(out, "Z2M base topic:      {}", config.zigbee2mqtt.base_topic)?;
    Ok(out)
}
