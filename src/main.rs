use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use chrono::Utc;
use tracing::warn;
use uuid::Uuid;

use playsync::adapters::{GogAdapter, PlatformAdapter, PsnAdapter, SteamAdapter, XboxAdapter};
use playsync::alerts::PriceAlertEvaluator;
use playsync::model::{PlatformId, PriceObservation, SyncMode};
use playsync::notify::TracingSink;
use playsync::orchestrator::{SyncOrchestrator, SyncRequest};
use playsync::store::{JobStore, LibraryStore, PgStore, SyncStore};
use playsync::tracing::init_tracing;
use playsync::util::env::{db_url, env_parse, init_env};

#[derive(Parser)]
#[command(name = "playsync", about = "Multi-platform game library sync engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one sync job to completion and print the job record.
    Sync {
        #[arg(long)]
        user: i64,
        #[arg(long)]
        platform: PlatformId,
        #[arg(long, default_value = "full")]
        mode: SyncMode,
    },
    /// Print the stored record for a sync task.
    Status {
        #[arg(long)]
        task: Uuid,
    },
    /// Inject one price observation (stand-in for the scraper feed) and
    /// print any alerts it fires.
    ObservePrice {
        #[arg(long)]
        game: i64,
        #[arg(long)]
        platform: PlatformId,
        /// Current price in minor units.
        #[arg(long)]
        price: i64,
        /// List price in minor units; defaults to the current price.
        #[arg(long)]
        original: Option<i64>,
        /// Discount percent 0-100.
        #[arg(long, default_value_t = 0)]
        discount: i64,
    },
    /// Recompute a user's library summary from a full scan.
    Recompute {
        #[arg(long)]
        user: i64,
    },
    /// Ask one platform adapter for a game's current storefront price.
    FetchPrice {
        #[arg(long)]
        platform: PlatformId,
        /// Platform-side game id (Steam appid, Xbox bigId, ...).
        #[arg(long)]
        game_ref: String,
    },
}

fn available_adapters() -> Vec<Arc<dyn PlatformAdapter>> {
    let mut adapters: Vec<Arc<dyn PlatformAdapter>> = vec![
        Arc::new(XboxAdapter::from_env()),
        Arc::new(PsnAdapter::from_env()),
        Arc::new(GogAdapter::from_env()),
    ];
    match SteamAdapter::from_env() {
        Ok(steam) => adapters.push(Arc::new(steam)),
        Err(err) => warn!(error = %err, "steam adapter unavailable"),
    }
    adapters
}

#[tokio::main]
async fn main() -> Result<()> {
    init_env();
    init_tracing("playsync=info")?;
    let cli = Cli::parse();

    let store = Arc::new(
        PgStore::connect(&db_url()?, env_parse("DB_MAX_CONNECTIONS", 5u32)).await?,
    );

    match cli.command {
        Command::Sync {
            user,
            platform,
            mode,
        } => {
            let sync_store: Arc<dyn SyncStore> = store.clone();
            let orchestrator = Arc::new(SyncOrchestrator::new(sync_store, available_adapters()));
            let ticket = orchestrator
                .submit(SyncRequest {
                    user_id: user,
                    platform,
                    mode,
                })
                .await?;
            println!("queued {} (estimated {}s)", ticket.task_id, ticket.estimated_secs);
            orchestrator.wait(ticket.task_id).await?;
            let job = orchestrator
                .status(ticket.task_id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("job record missing"))?;
            println!("{}", serde_json::to_string_pretty(&job)?);
        }
        Command::Status { task } => {
            match store.job(task).await? {
                Some(job) => println!("{}", serde_json::to_string_pretty(&job)?),
                None => println!("no job with task id {task}"),
            }
        }
        Command::ObservePrice {
            game,
            platform,
            price,
            original,
            discount,
        } => {
            let price_store: Arc<dyn playsync::store::PriceStore> = store.clone();
            let evaluator = PriceAlertEvaluator::new(price_store, Arc::new(TracingSink));
            let alerts = evaluator
                .on_observation(&PriceObservation {
                    observation_id: 0,
                    game_id: game,
                    platform,
                    current_price_minor: price,
                    original_price_minor: original.unwrap_or(price),
                    discount_rate: discount.clamp(0, 100),
                    recorded_at: Utc::now(),
                })
                .await?;
            println!("{} alert(s) emitted", alerts.len());
            for alert in alerts {
                println!("{}", serde_json::to_string(&alert)?);
            }
        }
        Command::Recompute { user } => {
            let summary = store.recompute_summary(user).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::FetchPrice { platform, game_ref } => {
            let adapter = available_adapters()
                .into_iter()
                .find(|a| a.platform() == platform)
                .ok_or_else(|| anyhow::anyhow!("no adapter available for {platform}"))?;
            match adapter.fetch_price(&game_ref).await? {
                Some(price) => println!(
                    "current {} original {} discount {}%",
                    price.current_minor, price.original_minor, price.discount_pct
                ),
                None => println!("no purchasable offer for {game_ref} on {platform}"),
            }
        }
    }
    Ok(())
}
