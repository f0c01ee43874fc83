mod config;

use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use control_core::{
    AnimationCue, AppContext, Collaborators, CoreError, DoseRequest, FrameTick,
    HttpComputationService, Renderer,
};
use document_store::StoreConnection;
use shared::{domain::PanelId, protocol::NutrientProfile};
use storage::{MemoryStorage, Storage};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use crate::config::{
    computation_url, load_settings, store_target, StoreTarget, DEFAULT_CONFIG_FILE,
};

#[derive(Parser, Debug)]
#[command(name = "hydrodesk", about = "Hydroponic dosing control panel")]
struct Args {
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    /// `memory`, a sqlite url, or a database file path.
    #[arg(long)]
    database_url: Option<String>,
    #[arg(long)]
    computation_url: Option<String>,
    #[arg(long)]
    log_filter: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List panels, after applying any toggles in order.
    Panels {
        #[arg(long = "toggle")]
        toggles: Vec<String>,
    },
    Profiles,
    Inventory,
    History {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    SaveProfile {
        name: String,
        #[arg(long)]
        n: f64,
        #[arg(long)]
        p: f64,
        #[arg(long)]
        k: f64,
        #[arg(long)]
        ec: f64,
        #[arg(long)]
        ph: f64,
        #[arg(long)]
        ca: Option<f64>,
        #[arg(long)]
        mg: Option<f64>,
        /// Name the dose calculation backend knows the profile by.
        #[arg(long)]
        code: Option<String>,
    },
    DeleteProfile {
        name: String,
    },
    /// Compute a plan for the profile and commit it to inventory and history.
    Dose {
        #[arg(long)]
        profile: String,
        #[arg(long)]
        volume: f64,
        /// Print the plan without committing it.
        #[arg(long)]
        dry_run: bool,
        /// Seconds per simulated animation frame.
        #[arg(long, default_value_t = 1.0 / 60.0)]
        frame: f64,
    },
}

struct ConsoleRenderer;

impl Renderer for ConsoleRenderer {
    fn show_panel(&self, id: &PanelId) {
        debug!("render: show panel={id}");
    }

    fn hide_panel(&self, id: &PanelId) {
        debug!("render: hide panel={id}");
    }

    fn set_z_index(&self, id: &PanelId, z_index: i32) {
        debug!("render: z-index panel={id} z={z_index}");
    }

    fn set_inspector_active(&self, id: &PanelId, active: bool) {
        debug!("render: inspector panel={id} active={active}");
    }

    fn animation_cue(&self, cue: AnimationCue) {
        match cue {
            AnimationCue::Start => println!("pump: running"),
            AnimationCue::Progress { phase, progress } => {
                debug!("render: flow phase={phase:?} progress={progress:.2}")
            }
            AnimationCue::Stop => println!("pump: stopped"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut settings = load_settings(&args.config)?;
    if let Some(database_url) = args.database_url {
        settings.database_url = database_url;
    }
    if let Some(url) = args.computation_url {
        settings.computation_url = url;
    }
    if let Some(filter) = args.log_filter {
        settings.log_filter = filter;
    }

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.log_filter))
        .context("invalid log filter")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let store = open_store(store_target(&settings.database_url)).await?;
    let endpoint = computation_url(&settings.computation_url)?;
    let computation = HttpComputationService::new(endpoint.as_str())?;
    let context = AppContext::new(Collaborators {
        store,
        computation: Arc::new(computation),
        renderer: Arc::new(ConsoleRenderer),
        ..Collaborators::default()
    });

    context.start().await;
    if !context.wait_until_loaded(settings.snapshot_timeout()).await {
        info!(
            "hydrodesk: caches still loading after {}ms",
            settings.snapshot_timeout_ms
        );
    }

    let outcome = run(&context, args.command).await;
    context.shutdown().await;
    outcome
}

async fn open_store(target: StoreTarget) -> Result<Arc<dyn StoreConnection>> {
    match target {
        StoreTarget::Memory => Ok(Arc::new(MemoryStorage::new())),
        StoreTarget::Sqlite(url) => {
            let storage = Storage::new(&url)
                .await
                .with_context(|| format!("failed to open database {url}"))?;
            Ok(Arc::new(storage))
        }
    }
}

async fn run(context: &AppContext, command: Command) -> Result<()> {
    match command {
        Command::Panels { toggles } => {
            for id in toggles {
                if let Err(err) = context.toggle_panel(&PanelId::new(id), false).await {
                    println!("{err}");
                }
            }
            for (panel, state) in context.panel_states().await {
                println!(
                    "{:<20} {:<22} {:<9} {:<6} z={}{}",
                    panel.id,
                    panel.title,
                    format!("{:?}", panel.permanence).to_lowercase(),
                    if state.is_open() { "open" } else { "closed" },
                    state.z_index,
                    if state.focused { " *" } else { "" }
                );
            }
        }
        Command::Profiles => {
            for profile in context.profiles().view().await.profiles() {
                println!(
                    "{:<24} N={:<6} P={:<6} K={:<6} EC={:<5} pH={}",
                    profile.name, profile.n, profile.p, profile.k, profile.ec, profile.ph
                );
            }
        }
        Command::Inventory => {
            let view = context.inventory().view().await;
            for item in view.items() {
                println!(
                    "{:<22} {:>8.3} kg  {:>8.2}/kg{}",
                    item.name,
                    item.stock_kg,
                    item.cost_per_kg,
                    if view.is_low(&item.id) { "  LOW" } else { "" }
                );
            }
        }
        Command::History { limit } => {
            for entry in context.history().view().await.entries().iter().take(limit) {
                let doses: Vec<String> = entry
                    .doses_applied
                    .iter()
                    .map(|dose| {
                        let marker = if dose.persisted { "" } else { "!" };
                        format!("{}{marker} {:.2} g", dose.name, dose.grams)
                    })
                    .collect();
                println!(
                    "{} {:<24} {:>7.1} L EC={} pH={} [{}]",
                    entry.timestamp.format("%Y-%m-%d %H:%M"),
                    entry.profile_name,
                    entry.volume_liters,
                    entry.ec_final,
                    entry.ph_final,
                    doses.join(", ")
                );
            }
        }
        Command::SaveProfile {
            name,
            n,
            p,
            k,
            ec,
            ph,
            ca,
            mg,
            code,
        } => {
            context
                .save_profile(NutrientProfile {
                    name,
                    n,
                    p,
                    k,
                    ec,
                    ph,
                    ca,
                    mg,
                    code,
                })
                .await?;
        }
        Command::DeleteProfile { name } => context.delete_profile(&name).await?,
        Command::Dose {
            profile,
            volume,
            dry_run,
            frame,
        } => dose(context, &profile, volume, dry_run, frame).await?,
    }
    Ok(())
}

async fn dose(
    context: &AppContext,
    profile: &str,
    volume_liters: f64,
    dry_run: bool,
    frame: f64,
) -> Result<()> {
    if !frame.is_finite() || frame <= 0.0 {
        return Err(anyhow!("frame must be a positive number of seconds"));
    }

    let plan = context.compute_dose_plan(profile, volume_liters).await?;
    for line in &plan.line_items {
        println!("{:<22} {:>9.2} g", line.salt_name, line.grams);
    }
    if dry_run {
        return Ok(());
    }

    let result = context
        .commit_dose(DoseRequest {
            profile_name: profile.to_string(),
            volume_liters,
            plan,
        })
        .await;

    let mut frames = tokio::time::interval(Duration::from_secs_f64(frame));
    while context.is_pumping().await {
        frames.tick().await;
        if context.frame_tick(FrameTick { elapsed: frame }).await == Some(AnimationCue::Stop) {
            break;
        }
    }

    match result {
        Ok(receipt) => {
            println!("recorded history entry {}", receipt.history_id);
            Ok(())
        }
        Err(CoreError::PartialDoseFailure(failure)) => {
            for line in &failure.failed {
                println!("failed: {} {:.2} g ({})", line.salt_name, line.grams, line.reason);
            }
            Err(anyhow!("{failure}"))
        }
        Err(err) => Err(err.into()),
    }
}
