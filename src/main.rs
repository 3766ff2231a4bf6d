//! statsync - Main entry point
//!
//! Synchronizes ratings, play counts, play times and labels between the local
//! collection and the configured importers, and manages which providers and
//! fields take part.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use statsyncing::collection::LocalCollection;
use statsyncing::display;
use statsyncing::importers::create_provider;
use statsyncing::sync::{Controller, SyncConfig, SyncMode, SyncReport};
use statsyncing::{Config, Error, Fields, Result};

#[derive(Parser)]
#[command(name = "statsync")]
#[command(author, version, about = "Synchronize play statistics between music libraries")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file path
    #[arg(short, long, global = true, env = "STATSYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Synchronize statistics (the default)
    Sync {
        /// Use every registered provider, not only the enabled ones
        #[arg(short, long)]
        interactive: bool,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,

        /// Match and report without writing anything
        #[arg(long)]
        dry_run: bool,

        /// Resolve rating conflicts with this provider's ratings
        #[arg(long, value_name = "ID")]
        take_ratings_from: Option<String>,

        /// Resolve label conflicts with the labels of these providers only
        #[arg(long, value_name = "ID")]
        labels_from: Vec<String>,
    },

    /// List known providers
    Providers,

    /// Enable a provider for automatic synchronization
    Enable {
        /// Provider id
        id: String,
    },

    /// Disable a provider for automatic synchronization
    Disable {
        /// Provider id
        id: String,
    },

    /// Forget a provider that is no longer configured
    Forget {
        /// Provider id
        id: String,
    },

    /// Show or change the synchronized fields
    Fields {
        /// Comma separated field names, e.g. rating,playCount
        #[arg(long, value_delimiter = ',')]
        set: Option<Vec<String>>,
    },

    /// Never propagate or delete a label
    ExcludeLabel {
        /// Label name
        label: String,

        /// Stop excluding the label
        #[arg(long)]
        remove: bool,
    },

    /// Show or edit configuration
    Config {
        /// Print current configuration
        #[arg(long)]
        show: bool,

        /// Create default configuration file
        #[arg(long)]
        init: bool,
    },
}

/// Options of one `sync` invocation.
struct SyncOptions {
    mode: SyncMode,
    dry_run: bool,
    take_ratings_from: Option<String>,
    labels_from: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load and validate configuration
    let config_path = match cli.config {
        Some(ref path) => path.clone(),
        None => Config::config_path()?,
    };
    let mut config = if config_path.exists() {
        Config::load_from(&config_path)?
    } else {
        Config::default()
    };
    config.validate()?;

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new(&config.general.log_level)
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    // Importer ids must stay stable across runs
    if config.ensure_importer_uids() {
        config.save_to(&config_path)?;
        info!(path = %config_path.display(), "Assigned ids to importers");
    }

    match cli.command {
        Some(Commands::Sync {
            interactive,
            json,
            dry_run,
            take_ratings_from,
            labels_from,
        }) => {
            let options = SyncOptions {
                mode: if interactive {
                    SyncMode::Interactive
                } else {
                    SyncMode::NonInteractive
                },
                dry_run,
                take_ratings_from,
                labels_from,
            };
            run_sync(config, options, json).await
        }

        Some(Commands::Providers) => {
            let controller = blocking(move || build_controller(&config)).await?;
            display::print_section_simple("PROVIDERS");
            display::display_providers(controller.config());
            Ok(())
        }

        Some(Commands::Enable { id }) => set_enabled(&config, &id, true),
        Some(Commands::Disable { id }) => set_enabled(&config, &id, false),

        Some(Commands::Forget { id }) => {
            let mut controller = blocking(move || build_controller(&config)).await?;
            controller.forget_provider(&id)?;
            println!("Forgot provider {id}");
            Ok(())
        }

        Some(Commands::Fields { set }) => {
            let mut state = SyncConfig::load(&config.state_path()?)?;
            if let Some(names) = set {
                let fields = Fields::parse_names(&names)?;
                if !Controller::available_fields().contains(fields) {
                    return Err(Error::config(format!(
                        "only statistics fields can be synchronized, got '{fields}'"
                    )));
                }
                state.set_checked_fields(fields);
                state.save()?;
            }
            display::print_section_simple("FIELDS");
            display::display_fields(&state, Controller::available_fields());
            Ok(())
        }

        Some(Commands::ExcludeLabel { label, remove }) => {
            let mut state = SyncConfig::load(&config.state_path()?)?;
            let mut labels = state.excluded_labels().clone();
            if remove {
                labels.remove(&label);
            } else {
                labels.insert(label);
            }
            state.set_excluded_labels(labels);
            state.save()?;
            display::display_fields(&state, Controller::available_fields());
            Ok(())
        }

        Some(Commands::Config { show, init }) => {
            if init {
                let default_config = Config::default();
                default_config.save_to(&config_path)?;
                println!("Created default configuration at {}", config_path.display());
            } else if show {
                let contents = toml::to_string_pretty(&config)?;
                println!("{contents}");
            } else {
                println!("Configuration path: {}", config_path.display());
            }
            Ok(())
        }

        None => {
            let options = SyncOptions {
                mode: SyncMode::NonInteractive,
                dry_run: false,
                take_ratings_from: None,
                labels_from: Vec::new(),
            };
            run_sync(config, options, false).await
        }
    }
}

/// Run blocking database and file work off the async runtime.
async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::other(format!("worker task failed: {e}")))?
}

/// Register the local collection and every importer that can be created.
fn build_controller(config: &Config) -> Result<Controller> {
    let mut state = SyncConfig::load(&config.state_path()?)?;

    // Online flags only describe this run; registration sets them again
    let known: Vec<String> = state.providers().map(|(id, _)| id.to_string()).collect();
    for id in &known {
        state.set_provider_online(id, false);
    }

    let mut controller = Controller::new(state, config.match_fields()?);

    let collection = LocalCollection::open(&config.collection_path()?)?;
    controller.register_provider(Arc::new(collection))?;

    for importer in &config.importers {
        let provider = match create_provider(importer) {
            Ok(provider) => provider,
            Err(e) => {
                warn!(importer = %importer.kind, error = %e, "Skipping importer");
                continue;
            }
        };
        if let Err(e) = controller.register_provider(provider) {
            warn!(importer = %importer.kind, error = %e, "Skipping importer");
        }
    }
    Ok(controller)
}

fn set_enabled(config: &Config, id: &str, enabled: bool) -> Result<()> {
    let path = config.state_path()?;
    let mut state = SyncConfig::load(&path)?;
    if !state.set_provider_enabled(id, enabled) {
        return Err(Error::config(format!("unknown provider '{id}'")));
    }
    state.save()?;
    println!(
        "Provider {id} {}",
        if enabled { "enabled" } else { "disabled" }
    );
    Ok(())
}

async fn run_sync(config: Config, options: SyncOptions, json: bool) -> Result<()> {
    let controller = blocking(move || build_controller(&config)).await?;

    // Handle interrupt signals
    let handle = controller.abort_handle();
    let interrupt = tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("Received interrupt, aborting synchronization");
            handle.abort();
        }
    });

    let report = blocking(move || Ok(synchronize(&controller, &options))).await?;
    interrupt.abort();

    match report {
        None => {
            if !json {
                println!("Nothing to synchronize.");
                println!("Enable at least one importer with `statsync enable <id>`.");
            }
        }
        Some(report) if json => println!("{}", serde_json::to_string_pretty(&report)?),
        Some(report) => display::display_report(&report),
    }
    Ok(())
}

fn synchronize(controller: &Controller, options: &SyncOptions) -> Option<SyncReport> {
    let mut plan = controller.prepare(options.mode)?;
    if let Some(ref provider) = options.take_ratings_from {
        plan.take_ratings_from(provider);
    }
    for provider in &options.labels_from {
        plan.include_labels_from(provider);
    }
    if options.dry_run {
        info!(pending = plan.pending_updates(), "Dry run, nothing written");
        return Some(plan.report());
    }
    Some(plan.commit())
}
