use crate::{args::Args, logger::Logger, tui::App};
use btloadgen::{seeder, session::Registry, signal::StopSignal};
use clap::Parser;
use log::info;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::net::TcpListener;

mod args;
mod logger;
mod popup;
mod theme;
mod tui;

const REAPER_PERIOD: Duration = Duration::from_secs(30);

#[tokio::main(flavor = "multi_thread")]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    let args = Args::parse();

    if let Some(addr) = args.seed {
        Logger::stderr(args.log_level).init()?;
        return run_seeder(addr).await;
    }

    let registry = Arc::new(Registry::new(args.registry_config()));
    let _reaper = registry.spawn_reaper(REAPER_PERIOD);

    let (tx, rx) = std::sync::mpsc::channel();
    Logger::new(tx, args.log_level).init()?;
    let mut terminal = ratatui::init();
    let mut app = App::new(rx, registry, args.peer_addr.clone());
    let result = app.run(&mut terminal).await;

    ratatui::restore();
    result
}

async fn run_seeder(addr: SocketAddr) -> color_eyre::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("Seeding on {}", listener.local_addr()?);

    let signal = StopSignal::new();
    let server = tokio::spawn(seeder::serve(listener, signal.clone()));
    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    signal.cancel();
    server.await??;
    Ok(())
}
