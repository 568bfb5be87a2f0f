//! Maintenance tool for a stratum database.
//!
//! ```bash
//! stratum types
//! stratum roots --type Experiment
//! stratum tree 42
//! stratum fsck
//! ```
//!
//! Settings come from `config/stratum.*` (or `$STRATUM_CONFIG`) and
//! `STRATUM__*` environment variables.

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use sea_orm::{EntityTrait, QueryOrder};
use store::entity::data;
use store::{ChunkedData, EntityHandle, PayloadStore, Session, Store, StoreConfig, database};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "stratum", version)]
#[command(about = "Inspect and check a stratum entity store")]
struct Args {
    /// Database URL, overrides the configured one
    #[arg(long, env = "STRATUM_DATABASE_URL", global = true)]
    database_url: Option<String>,

    /// More log output (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List registered types and their parameters
    Types,
    /// List entities without a parent
    Roots {
        /// Only entities of this type
        #[arg(long = "type")]
        type_name: Option<String>,
    },
    /// Print an entity and everything below it
    Tree {
        id: i32,
        /// Also print parameters
        #[arg(short, long)]
        params: bool,
    },
    /// Check every stored payload for missing or misordered chunks
    Fsck,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match args.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();

    let mut config = StoreConfig::load().context("Failed to load config")?;
    if let Some(url) = args.database_url {
        config.database.url = url;
    }

    let db = database::init_db(&config.database)
        .await
        .context("Failed to open database")?;
    let mut store = Store::new(db, config.data);
    store
        .register_from_db()
        .await
        .context("Failed to load registered types")?;

    match args.command {
        Command::Types => list_types(&store),
        Command::Roots { type_name } => list_roots(&store, type_name.as_deref()).await,
        Command::Tree { id, params } => print_tree(&store, id, params).await,
        Command::Fsck => fsck(&store).await,
    }
}

fn list_types(store: &Store) -> anyhow::Result<()> {
    for (identity, schema) in store.registry().iter() {
        println!("{identity}");
        for (name, kind) in schema.params() {
            println!("    {name}: {kind}");
        }
    }
    Ok(())
}

async fn list_roots(store: &Store, type_name: Option<&str>) -> anyhow::Result<()> {
    let mut session = store.begin().await?;
    for root in session.find_roots(type_name).await? {
        println!("{}", label(&session, root)?);
    }
    session.rollback().await?;
    Ok(())
}

async fn print_tree(store: &Store, id: i32, with_params: bool) -> anyhow::Result<()> {
    let mut session = store.begin().await?;
    let root = session
        .find_by_id(id)
        .await?
        .with_context(|| format!("No entity with id {id}"))?;

    let mut stack = vec![(root, 0usize)];
    while let Some((handle, depth)) = stack.pop() {
        let indent = "  ".repeat(depth);
        println!("{indent}{}", label(&session, handle)?);
        if with_params {
            for (name, value) in session.str_params(handle)? {
                println!("{indent}    {name} = {value}");
            }
        }
        let children = session.children(handle).await?;
        stack.extend(children.into_iter().rev().map(|child| (child, depth + 1)));
    }

    session.rollback().await?;
    Ok(())
}

async fn fsck(store: &Store) -> anyhow::Result<()> {
    let records = data::Entity::find()
        .order_by_asc(data::Column::EntityId)
        .order_by_asc(data::Column::Key)
        .all(store.connection())
        .await
        .context("Failed to list payloads")?;

    let mut failures = 0usize;
    for record in &records {
        let payload = ChunkedData::new(store.connection(), record.entity_id, store.data_config());
        if let Err(e) = payload.check_consistency(&record.key).await {
            failures += 1;
            warn!(entity = record.entity_id, key = %record.key, "Payload check failed");
            println!("entity {} key '{}': {e}", record.entity_id, record.key);
        }
    }

    info!(payloads = records.len(), failures, "Consistency check finished");
    if failures > 0 {
        bail!("{failures} of {} payloads are inconsistent", records.len());
    }
    println!("{} payloads ok", records.len());
    Ok(())
}

fn label(session: &Session, handle: EntityHandle) -> anyhow::Result<String> {
    let view = session.view(handle)?;
    Ok(format!(
        "{}#{} {}",
        view.short_type_name(),
        view.id.map_or_else(|| "?".to_string(), |id| id.to_string()),
        view.unique_id.unwrap_or("")
    ))
}
