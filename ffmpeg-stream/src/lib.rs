use std::sync::atomic::{AtomicBool, Ordering};

static RUNTIME_READY: AtomicBool = AtomicBool::new(false);

/// Registers FFmpeg components and brings up the network layer. Call once at
/// startup, before the first [`session::StreamSession`] is initialized.
/// Repeated calls are no-ops.
pub fn init() -> anyhow::Result<()> {
    if RUNTIME_READY.load(Ordering::Acquire) {
        return Ok(());
    }
    ffmpeg_next::init().map_err(|e| anyhow::anyhow!("ffmpeg_next init: {}", e))?;
    ffmpeg_next::format::network::init();
    RUNTIME_READY.store(true, Ordering::Release);
    log::info!("media runtime initialized");
    Ok(())
}

/// Tears down the network layer. Call once after the last session has been
/// finalized; sessions cannot be initialized again until [`init`] runs.
pub fn deinit() {
    if RUNTIME_READY.swap(false, Ordering::AcqRel) {
        ffmpeg_next::format::network::deinit();
        log::info!("media runtime shut down");
    }
}

pub fn is_initialized() -> bool {
    RUNTIME_READY.load(Ordering::Acquire)
}

pub mod destination;
pub mod encoder;
pub mod frame;
pub mod metadata;
pub mod output;
pub mod packet;
pub mod scaler;
pub mod session;

pub use destination::{DestinationConfig, TransportKind};
pub use session::{SessionState, StreamSession};
