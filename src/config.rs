use clap::Parser;

/// Renders an orbiting sun / planet / moon system and streams it as H.264
/// to a file (format from the extension) or an rtsp:// / rtmp:// endpoint.
#[derive(Debug, Clone, Parser)]
#[command(name = "orbit-cast", version)]
pub struct CastConfig {
    /// Output file path or streaming URL
    #[arg(short, long, env = "ORBIT_CAST_DESTINATION", default_value = "orbit.mp4")]
    pub destination: String,

    #[arg(long, env = "ORBIT_CAST_WIDTH", default_value_t = 800)]
    pub width: u32,

    #[arg(long, env = "ORBIT_CAST_HEIGHT", default_value_t = 600)]
    pub height: u32,

    #[arg(long, env = "ORBIT_CAST_FPS", default_value_t = 30)]
    pub fps: u32,

    /// Frames to render; 0 renders until interrupted
    #[arg(short, long, env = "ORBIT_CAST_FRAMES", default_value_t = 300)]
    pub frames: u64,

    /// Target bitrate in bits per second
    #[arg(long, env = "ORBIT_CAST_BIT_RATE", default_value_t = ffmpeg_stream::encoder::DEFAULT_BIT_RATE)]
    pub bit_rate: usize,

    /// Pace frames to wall-clock time (implied for streaming destinations)
    #[arg(long, env = "ORBIT_CAST_REALTIME")]
    pub realtime: bool,

    /// Start with the orbits frozen
    #[arg(long, env = "ORBIT_CAST_PAUSED")]
    pub paused: bool,
}

impl CastConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.width == 0 || self.height == 0 {
            anyhow::bail!("invalid size {}x{}", self.width, self.height);
        }
        if self.width % 2 != 0 || self.height % 2 != 0 {
            anyhow::bail!(
                "size {}x{} must be even for 4:2:0 output",
                self.width,
                self.height
            );
        }
        if self.fps == 0 {
            anyhow::bail!("fps must be positive");
        }
        Ok(())
    }

    pub fn frame_limit(&self) -> Option<u64> {
        (self.frames > 0).then_some(self.frames)
    }
}
