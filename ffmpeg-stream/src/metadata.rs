//! Read-back of a written container (similar to ffprobe), used to check
//! what a session produced.

use std::fmt;

/// Format-level info.
#[derive(Debug, Clone)]
pub struct FormatInfo {
    /// Format name, e.g. "mov,mp4,m4a,3gp,3g2,mj2"
    pub format_name: String,
    /// Duration in seconds; None if unknown (e.g. raw h264).
    pub duration_sec: Option<f64>,
    /// Total bitrate in bps; 0 if unknown.
    pub bit_rate: i64,
}

/// Per video stream info.
#[derive(Debug, Clone)]
pub struct VideoStreamInfo {
    pub index: usize,
    /// Codec name, e.g. "h264"
    pub codec_name: String,
    /// Time base, e.g. "1/15360"
    pub time_base: String,
    /// Average frame rate, e.g. "30/1"
    pub rate: String,
    /// Stream duration in time_base units; None if unknown.
    pub duration_ts: Option<i64>,
    /// Frame count stored in the container; 0 when the muxer does not record it.
    pub frames: i64,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone)]
pub struct MediaInfo {
    pub format: FormatInfo,
    pub streams: Vec<VideoStreamInfo>,
}

impl fmt::Display for MediaInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format.format_name)?;
        if let Some(d) = self.format.duration_sec {
            write!(f, " {:.3}s", d)?;
        }
        write!(f, " {} bps", self.format.bit_rate)?;
        for s in &self.streams {
            write!(
                f,
                "; #{} {} {}x{} rate={} time_base={} frames={}",
                s.index, s.codec_name, s.width, s.height, s.rate, s.time_base, s.frames
            )?;
        }
        Ok(())
    }
}

/// Opens `path` and describes its video streams.
pub fn probe(path: &str) -> anyhow::Result<MediaInfo> {
    let input = ffmpeg_next::format::input(path)?;

    let format_name = input.format().name().to_string();
    let bit_rate = input.bit_rate();
    // AV_TIME_BASE = 1_000_000; duration is in 1/AV_TIME_BASE seconds
    let duration_sec = {
        let d = input.duration();
        if d == ffmpeg_next::ffi::AV_NOPTS_VALUE as i64 || d <= 0 {
            None
        } else {
            Some(d as f64 / 1_000_000.0)
        }
    };

    let mut streams = Vec::new();
    for stream in input.streams() {
        let params = stream.parameters();
        if params.medium() != ffmpeg_next::media::Type::Video {
            continue;
        }
        let duration_ts = {
            let d = stream.duration();
            if d == ffmpeg_next::ffi::AV_NOPTS_VALUE as i64 || d < 0 {
                None
            } else {
                Some(d)
            }
        };
        let (width, height) = video_size_from_parameters(&params);
        let time_base = stream.time_base();
        let rate = stream.avg_frame_rate();
        streams.push(VideoStreamInfo {
            index: stream.index(),
            codec_name: format!("{:?}", params.id()).to_lowercase(),
            time_base: format!("{}/{}", time_base.numerator(), time_base.denominator()),
            rate: format!("{}/{}", rate.numerator(), rate.denominator()),
            duration_ts,
            frames: stream.frames(),
            width,
            height,
        });
    }

    Ok(MediaInfo {
        format: FormatInfo {
            format_name,
            duration_sec,
            bit_rate,
        },
        streams,
    })
}

/// Reads video width/height from codec parameters (not exposed by ffmpeg-next).
fn video_size_from_parameters(params: &ffmpeg_next::codec::Parameters) -> (u32, u32) {
    unsafe {
        let ptr = params.as_ptr();
        ((*ptr).width.max(0) as u32, (*ptr).height.max(0) as u32)
    }
}
