use anyhow::Context as _;

use crate::{
    destination::{self, DestinationConfig, TransportKind},
    encoder::{DEFAULT_BIT_RATE, Encoder, Settings},
    frame::rgb_len,
    output::AvOutput,
    packet::EncodedPacket,
    scaler::{ENCODER_PIXEL_FORMAT, Scaler},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Ready,
    Closed,
}

/// Everything a `Ready` session owns. Dropping it releases the encoder, the
/// scaler and the output context (and its I/O handle) in one go.
struct Pipeline {
    scaler: Scaler,
    encoder: Encoder,
    output: AvOutput,
}

impl Pipeline {
    fn open(config: &DestinationConfig, settings: &Settings) -> anyhow::Result<Self> {
        let mut output = AvOutput::new(config).context("open output")?;
        let encoder =
            Encoder::new(settings, output.global_header()).context("configure encoder")?;
        output
            .add_video_track(encoder.codec(), encoder.parameters(), encoder.time_base())
            .context("add video track")?;
        output.write_header().context("write header")?;
        let scaler = Scaler::new(settings.width, settings.height).context("create scaler")?;
        Ok(Self {
            scaler,
            encoder,
            output,
        })
    }

    /// Writes every packet the encoder has ready.
    fn drain(&mut self) -> anyhow::Result<usize> {
        let Self {
            encoder, output, ..
        } = self;
        encoder.drain(|packet| write_packet(output, packet))
    }

    fn flush(&mut self) -> anyhow::Result<usize> {
        let Self {
            encoder, output, ..
        } = self;
        encoder.flush(|packet| write_packet(output, packet))
    }
}

fn write_packet(output: &mut AvOutput, packet: EncodedPacket) -> anyhow::Result<()> {
    log::trace!(
        "packet pts={:?} dts={:?} size={} key={}",
        packet.pts(),
        packet.dts(),
        packet.size(),
        packet.is_key()
    );
    output.write_packet(packet).context("write packet")
}

/// Single-destination video output session.
///
/// `Uninitialized → Ready → Closed`. Frames go in as interleaved RGB24, come
/// out as H.264 in a container file or a live RTSP/RTMP push. All calls are
/// synchronous; a network session blocks while the receiver is slow.
pub struct StreamSession {
    state: SessionState,
    destination: String,
    width: u32,
    height: u32,
    frame_rate: u32,
    bit_rate: usize,
    transport: Option<TransportKind>,
    frame_count: u64,
    packets_written: u64,
    pipeline: Option<Pipeline>,
}

impl Default for StreamSession {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamSession {
    pub fn new() -> Self {
        Self {
            state: SessionState::Uninitialized,
            destination: String::new(),
            width: 0,
            height: 0,
            frame_rate: 0,
            bit_rate: DEFAULT_BIT_RATE,
            transport: None,
            frame_count: 0,
            packets_written: 0,
            pipeline: None,
        }
    }

    /// Overrides the 2 Mbps default; only meaningful before `initialize`.
    pub fn with_bit_rate(mut self, bit_rate: usize) -> Self {
        self.bit_rate = bit_rate;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == SessionState::Ready
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn frame_rate(&self) -> u32 {
        self.frame_rate
    }

    pub fn bit_rate(&self) -> usize {
        self.bit_rate
    }

    pub fn transport(&self) -> Option<TransportKind> {
        self.transport
    }

    /// Frames accepted by successful `add_frame` calls.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Packets written to the destination, flush packets included.
    pub fn packets_written(&self) -> u64 {
        self.packets_written
    }

    /// Resolves the destination, opens the encoder and output, and writes the
    /// header. On failure nothing stays allocated and the session remains
    /// `Uninitialized`.
    pub fn initialize(
        &mut self,
        destination: &str,
        width: u32,
        height: u32,
        fps: u32,
    ) -> anyhow::Result<()> {
        if self.state != SessionState::Uninitialized {
            anyhow::bail!("initialize: session is {:?}", self.state);
        }
        if width == 0 || height == 0 {
            anyhow::bail!("initialize: invalid video size {}x{}", width, height);
        }
        if fps == 0 {
            anyhow::bail!("initialize: frame rate must be positive");
        }
        if !crate::is_initialized() {
            anyhow::bail!("initialize: media runtime not initialized, call ffmpeg_stream::init()");
        }

        let config = destination::resolve(destination).context("resolve destination")?;
        let settings = Settings {
            width,
            height,
            frame_rate: fps,
            bit_rate: self.bit_rate,
            pixel_format: ENCODER_PIXEL_FORMAT,
            tuning: config.tuning.clone(),
        };
        let pipeline = Pipeline::open(&config, &settings)
            .with_context(|| format!("initialize {}", config.target))?;

        self.destination = config.target.clone();
        self.width = width;
        self.height = height;
        self.frame_rate = fps;
        self.transport = Some(config.kind);
        self.frame_count = 0;
        self.packets_written = 0;
        self.pipeline = Some(pipeline);
        self.state = SessionState::Ready;
        log::info!(
            "session ready: {} {}x{} @ {} fps, {:?}, {} bps",
            self.destination,
            width,
            height,
            fps,
            config.kind,
            self.bit_rate
        );
        Ok(())
    }

    /// Converts, encodes and writes one RGB24 frame of exactly
    /// `width * height * 3` bytes. A failure drops this frame only; the
    /// session stays usable.
    pub fn add_frame(&mut self, rgb: &[u8]) -> anyhow::Result<()> {
        if self.state != SessionState::Ready {
            anyhow::bail!("add_frame: session is {:?}", self.state);
        }
        let expected = rgb_len(self.width, self.height);
        if rgb.len() != expected {
            anyhow::bail!(
                "add_frame: buffer is {} bytes, expected {} for {}x{} rgb24",
                rgb.len(),
                expected,
                self.width,
                self.height
            );
        }
        let pipeline = self
            .pipeline
            .as_mut()
            .ok_or(anyhow::anyhow!("add_frame: pipeline missing"))?;

        let mut frame = pipeline.scaler.convert(rgb).context("convert frame")?;
        pipeline
            .encoder
            .submit(&mut frame)
            .context("submit frame to encoder")?;
        let written = pipeline.drain().context("drain encoder")?;

        self.frame_count += 1;
        self.packets_written += written as u64;
        log::trace!(
            "frame {} encoded, {} packets written",
            self.frame_count,
            written
        );
        Ok(())
    }

    /// Drains the encoder, writes the trailer and releases everything.
    /// Safe to call repeatedly. On a session that never became `Ready` it
    /// does nothing and the session can still be initialized. Flush and
    /// trailer errors are returned, but resources are released and the
    /// session is `Closed` either way.
    pub fn finalize(&mut self) -> anyhow::Result<()> {
        let Some(mut pipeline) = self.pipeline.take() else {
            return Ok(());
        };
        let previous = std::mem::replace(&mut self.state, SessionState::Closed);

        let flushed = pipeline.flush().context("flush encoder");
        if let Ok(count) = flushed {
            self.packets_written += count as u64;
        }
        let trailer = pipeline.output.write_trailer().context("write trailer");
        pipeline.output.close();
        drop(pipeline);

        log::info!(
            "session closed: {} ({:?} -> Closed), {} frames, {} packets",
            self.destination,
            previous,
            self.frame_count,
            self.packets_written
        );
        flushed?;
        trailer?;
        Ok(())
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        if self.is_ready() {
            if let Err(e) = self.finalize() {
                log::error!("finalize on drop {}: {:#}", self.destination, e);
            }
        }
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod session_test;
