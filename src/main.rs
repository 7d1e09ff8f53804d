use std::path::PathBuf;
use std::process::ExitCode;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use tag_vault::logging::{self, tilde};
use tag_vault::state::options::default_database_path;
use tag_vault::{Error, Result, Session};

/// Overrides the index location
const DB_ENV: &str = "TAG_VAULT_DB";

#[tokio::main]
async fn main() -> ExitCode {
    logging::init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{}", err);
            ExitCode::FAILURE
        }
    }
}

/// Usage: `tag-vault [ROOT]` (defaults to the home directory)
async fn run() -> Result<()> {
    let db_path = std::env::var_os(DB_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(default_database_path);
    let mut session = Session::open(db_path)?;
    session.library().seed_format_tags()?;

    let root = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .ok_or_else(|| Error::InvalidArgument("no scan root and no home directory".into()))?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping discovery");
            on_interrupt.cancel();
        }
    });

    info!("Scanning {}", tilde(&root));
    let report = session.discover(&root, cancel.clone()).await?;
    if !report.completed() {
        return Ok(());
    }

    // Warm the cache for the first screen
    let first_page = session.next_page()?;
    let size = session.options().thumbnail_size;
    let mut workers = JoinSet::new();
    for path in first_page {
        let pipeline = session.thumbnails().clone();
        let cancel = cancel.clone();
        workers.spawn(async move {
            pipeline
                .get_thumbnail_or_placeholder(&path, size, &cancel)
                .await
        });
    }
    while let Some(joined) = workers.join_next().await {
        if let Err(err) = joined? {
            warn!("Thumbnail failed: {}", err);
        }
    }

    let library = session.library();
    let stats = session.thumbnails().stats();
    info!(
        "Index holds {} files ({} duplicates), {} tags; {} thumbnails cached",
        library.file_count()?,
        library.duplicate_count()?,
        library.tag_count()?,
        stats.cache.entries
    );
    Ok(())
}
