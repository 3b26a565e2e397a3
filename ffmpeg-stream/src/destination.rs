//! Destination classification.
//!
//! Maps a destination string to either a local container file or a live
//! push over a TCP streaming protocol, and derives the encoder and muxer
//! tuning each one needs.

/// Keyframe interval used for live pushes, so late joiners resync quickly.
pub const LOW_LATENCY_GOP: u32 = 12;

/// Upper bound the muxer may hold a packet before sending it (microseconds).
pub const LOW_LATENCY_MAX_DELAY_US: &str = "500000";

/// Streaming scheme prefixes and the muxer each one is written with.
const STREAMING_SCHEMES: &[(&str, &str)] = &[("rtsp://", "rtsp"), ("rtmp://", "flv")];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    File,
    NetworkLowLatency,
}

/// Encoder knobs derived from the transport.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncoderTuning {
    /// Keyframe interval; `None` keeps the encoder default.
    pub gop_size: Option<u32>,
    /// `Some(0)` disables frame reordering.
    pub max_b_frames: Option<usize>,
    /// Pin min/max/target bitrate and the VBV buffer to the same value.
    pub pin_rate_control: bool,
    /// Private encoder options (e.g. x264 preset/tune).
    pub codec_options: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationConfig {
    pub target: String,
    pub kind: TransportKind,
    /// Muxer short name; `None` lets ffmpeg infer it from the extension.
    pub format: Option<String>,
    pub tuning: EncoderTuning,
    /// Options for opening the I/O handle (protocol options).
    pub io_options: Vec<(String, String)>,
    /// Open the I/O handle unbuffered, so every muxer write reaches the
    /// connection immediately.
    pub direct_io: bool,
    /// Options for the muxer, applied when the header is written.
    pub header_options: Vec<(String, String)>,
    /// Write through the interleaving queue instead of directly.
    pub interleaved: bool,
}

impl DestinationConfig {
    pub fn is_network(&self) -> bool {
        self.kind == TransportKind::NetworkLowLatency
    }
}

fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
    items
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Returns the muxer name when `target` starts with a streaming scheme.
fn streaming_format(target: &str) -> Option<&'static str> {
    STREAMING_SCHEMES.iter().find_map(|(prefix, format)| {
        target
            .get(..prefix.len())
            .filter(|head| head.eq_ignore_ascii_case(prefix))
            .map(|_| *format)
    })
}

pub fn resolve(target: &str) -> anyhow::Result<DestinationConfig> {
    let target = target.trim();
    if target.is_empty() {
        anyhow::bail!("destination is empty");
    }

    if let Some(format) = streaming_format(target) {
        let mut header_options = pairs(&[
            ("flush_packets", "1"),
            ("max_delay", LOW_LATENCY_MAX_DELAY_US),
        ]);
        let mut io_options = Vec::new();
        match format {
            "rtsp" => header_options.push(("rtsp_transport".to_string(), "tcp".to_string())),
            "flv" => io_options = pairs(&[("rtmp_live", "live")]),
            _ => {}
        }
        let config = DestinationConfig {
            target: target.to_string(),
            kind: TransportKind::NetworkLowLatency,
            format: Some(format.to_string()),
            tuning: EncoderTuning {
                gop_size: Some(LOW_LATENCY_GOP),
                max_b_frames: Some(0),
                pin_rate_control: true,
                codec_options: pairs(&[("preset", "ultrafast"), ("tune", "zerolatency")]),
            },
            io_options,
            direct_io: true,
            header_options,
            interleaved: false,
        };
        log::debug!("destination {} resolved as {:?}", target, config.kind);
        return Ok(config);
    }

    Ok(DestinationConfig {
        target: target.to_string(),
        kind: TransportKind::File,
        format: None,
        tuning: EncoderTuning::default(),
        io_options: Vec::new(),
        direct_io: false,
        header_options: Vec::new(),
        interleaved: true,
    })
}

#[cfg(test)]
#[path = "destination_test.rs"]
mod destination_test;
