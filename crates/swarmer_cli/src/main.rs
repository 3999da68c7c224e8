use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, Level};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::FmtSubscriber;

use swarmer::{
    config::Config,
    counter::Counter,
    disk::Disk,
    metainfo::MetaInfo,
    peer::PeerId,
    torrent::{ContentDescriptor, Torrent, TorrentCtx},
    tracker::{PeerList, TrackerClient, TrackerManager},
    utils::to_human_readable,
};

use args::Args;
use error::Error;

mod args;
mod error;

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    // logs are flushed when the guard is dropped
    let _guard = init_tracing(&args)?;

    let r = run(args).await;
    if let Err(e) = &r {
        error!("{e}");
    }
    r
}

fn init_tracing(args: &Args) -> Result<Option<WorkerGuard>, Error> {
    let level = match args.verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact();

    match &args.log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            let (writer, guard) = tracing_appender::non_blocking(file);

            let subscriber = builder.with_writer(writer).with_ansi(false).finish();
            tracing::subscriber::set_global_default(subscriber)?;

            Ok(Some(guard))
        }
        None => {
            tracing::subscriber::set_global_default(builder.finish())?;
            Ok(None)
        }
    }
}

async fn run(args: Args) -> Result<(), Error> {
    let mut config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load().await?,
    };

    if let Some(download_dir) = args.download_dir {
        config.download_dir = download_dir;
    }
    if let Some(max_peers) = args.max_peers {
        config.max_peers = max_peers;
    }
    if let Some(port) = args.port {
        config.listen_port = port;
    }

    let meta = MetaInfo::from_file(&args.torrent).await?;
    let content = ContentDescriptor::from(&meta);
    let local_id = PeerId::gen();

    info!(
        "{} ({}), info hash {}",
        content.name,
        to_human_readable(content.total_length),
        content.info_hash
    );

    let peers = match &args.peers {
        Some(arg) => {
            PeerList::from_arg(arg)
                .await?
                .get_peers(&local_id, config.listen_port, &content)
                .await?
        }
        None => {
            TrackerManager::new(&meta.trackers(), config.tracker_timeout())
                .get_peers(&local_id, config.listen_port, &content)
                .await?
        }
    };

    let disk = Disk::new(&config.download_dir, &content).await?;
    let ctx = TorrentCtx::new(content, local_id, config, Arc::new(Counter::new()));
    ctx.pool.add_peers(peers).await;

    Torrent::new(Arc::new(ctx), disk).run().await?;

    Ok(())
}
