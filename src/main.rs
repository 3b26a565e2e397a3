use std::time::{Duration, Instant};

use clap::Parser;
use ffmpeg_stream::{StreamSession, TransportKind, metadata};
use tokio_util::sync::CancellationToken;

mod config;
mod scene;

use config::CastConfig;
use scene::Scene;

fn init_logging() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .filter_module("ffmpeg_stream", log::LevelFilter::Debug)
        .filter_module("orbit_cast", log::LevelFilter::Debug)
        .parse_default_env()
        .init();
}

/// Renders and encodes until the frame limit is reached or `cancel` fires.
/// Runs on a blocking thread: every session call is synchronous.
fn cast(config: CastConfig, cancel: CancellationToken) -> anyhow::Result<()> {
    let mut scene = Scene::solar_system()?;
    scene.set_paused(config.paused);

    let mut session = StreamSession::new().with_bit_rate(config.bit_rate);
    session.initialize(&config.destination, config.width, config.height, config.fps)?;

    let realtime = config.realtime || session.transport() == Some(TransportKind::NetworkLowLatency);
    let frame_interval = Duration::from_secs_f64(1.0 / config.fps as f64);
    let dt = frame_interval.as_secs_f32();
    let mut buf = vec![0u8; config.width as usize * config.height as usize * 3];
    let mut dropped = 0u64;
    let started = Instant::now();
    let mut tick = 0u64;

    log::info!(
        "casting to {} (realtime={}, paused={})",
        session.destination(),
        realtime,
        scene.is_paused()
    );
    while config.frame_limit().is_none_or(|limit| tick < limit) {
        if cancel.is_cancelled() {
            log::info!("cast interrupted after {} frames", tick);
            break;
        }
        scene.update(dt);
        scene.render(&mut buf, config.width, config.height);
        // a failed frame is lost; keep going with the next one
        if let Err(e) = session.add_frame(&buf) {
            dropped += 1;
            log::warn!("frame {} dropped: {:#}", tick, e);
        }
        tick += 1;

        if realtime {
            let due = started + frame_interval.mul_f64(tick as f64);
            if let Some(wait) = due.checked_duration_since(Instant::now()) {
                std::thread::sleep(wait);
            }
        }
    }

    session.finalize()?;
    log::info!(
        "cast finished: {} frames encoded, {} dropped, {} packets in {:.1?}",
        session.frame_count(),
        dropped,
        session.packets_written(),
        started.elapsed()
    );

    if session.transport() == Some(TransportKind::File) {
        match metadata::probe(session.destination()) {
            Ok(info) => log::info!("wrote {}: {}", session.destination(), info),
            Err(e) => log::warn!("probe {}: {:#}", session.destination(), e),
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    let config = CastConfig::parse();
    config.validate()?;
    ffmpeg_stream::init()?;

    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    let mut worker = tokio::task::spawn_blocking(move || cast(config, cancel_clone));

    let result = tokio::select! {
        joined = &mut worker => joined,
        _ = tokio::signal::ctrl_c() => {
            log::info!("ctrl+c received, finishing stream");
            cancel.cancel();
            worker.await
        }
    };

    ffmpeg_stream::deinit();
    result?
}
