use ffmpeg_next::{Dictionary, Rational, Rescale, codec};

use crate::{destination::EncoderTuning, packet::EncodedPacket, scaler::ENCODER_PIXEL_FORMAT};

/// Default target bitrate (2 Mbps).
pub const DEFAULT_BIT_RATE: usize = 2_000_000;

#[derive(Debug, Clone)]
pub struct Settings {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    pub bit_rate: usize,
    pub pixel_format: ffmpeg_next::format::Pixel,
    pub tuning: EncoderTuning,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            frame_rate: 30,
            bit_rate: DEFAULT_BIT_RATE,
            pixel_format: ENCODER_PIXEL_FORMAT,
            tuning: EncoderTuning::default(),
        }
    }
}

/// Stateful H.264 encoder. Interframe codecs buffer input internally, so a
/// submission may yield zero or several packets; callers drain after every
/// [`Encoder::submit`] and once more through [`Encoder::flush`].
pub struct Encoder {
    inner: ffmpeg_next::codec::encoder::Video,
    codec: ffmpeg_next::Codec,
    encoder_time_base: Rational,
    frame_rate: Rational,
    frame_index: i64,
    flushed: bool,
}

impl Encoder {
    pub fn new(settings: &Settings, global_header: bool) -> anyhow::Result<Self> {
        if settings.frame_rate == 0 || settings.frame_rate > i32::MAX as u32 {
            anyhow::bail!("invalid frame rate {}", settings.frame_rate);
        }
        let codec = ffmpeg_next::encoder::find(codec::Id::H264)
            .ok_or(anyhow::anyhow!("codec not found: no H.264 encoder available"))?;

        let mut encoder = codec::Context::new_with_codec(codec).encoder().video()?;
        let fps = settings.frame_rate as i32;
        encoder.set_width(settings.width);
        encoder.set_height(settings.height);
        encoder.set_format(settings.pixel_format);
        encoder.set_time_base(Rational::new(1, fps));
        encoder.set_frame_rate(Some(Rational::new(fps, 1)));
        encoder.set_bit_rate(settings.bit_rate);

        let tuning = &settings.tuning;
        if let Some(gop) = tuning.gop_size {
            encoder.set_gop(gop);
        }
        if let Some(b_frames) = tuning.max_b_frames {
            encoder.set_max_b_frames(b_frames);
        }
        if tuning.pin_rate_control {
            encoder.set_max_bit_rate(settings.bit_rate);
            unsafe {
                let ctx = encoder.as_mut_ptr();
                (*ctx).rc_min_rate = settings.bit_rate as i64;
                (*ctx).rc_buffer_size = settings.bit_rate.min(i32::MAX as usize) as i32;
            }
        }
        if global_header {
            encoder.set_flags(codec::Flags::GLOBAL_HEADER);
        }

        let mut opts = Dictionary::new();
        for (key, value) in &tuning.codec_options {
            opts.set(key, value);
        }
        let encoder = encoder.open_with(opts).map_err(|e| {
            anyhow::anyhow!(
                "open encoder {} ({}x{} @ {} fps): {}",
                codec.name(),
                settings.width,
                settings.height,
                settings.frame_rate,
                e
            )
        })?;

        let encoder_time_base: Rational = unsafe { (*encoder.0.as_ptr()).time_base.into() };
        log::info!(
            "encoder opened: {} {}x{} time_base={:?} bit_rate={} gop={:?} b_frames={:?}",
            codec.name(),
            settings.width,
            settings.height,
            encoder_time_base,
            settings.bit_rate,
            tuning.gop_size,
            tuning.max_b_frames
        );

        Ok(Self {
            inner: encoder,
            codec,
            encoder_time_base,
            frame_rate: Rational::new(fps, 1),
            frame_index: 0,
            flushed: false,
        })
    }

    pub fn codec(&self) -> ffmpeg_next::Codec {
        self.codec
    }

    pub fn time_base(&self) -> Rational {
        self.encoder_time_base
    }

    /// Codec parameters (extradata included) for the container track.
    pub fn parameters(&self) -> ffmpeg_next::codec::Parameters {
        ffmpeg_next::codec::Parameters::from(&self.inner)
    }

    /// Number of frames accepted so far; also the next frame's pts.
    pub fn frame_index(&self) -> i64 {
        self.frame_index
    }

    /// Pushes one converted frame, stamping it with the next frame index.
    pub fn submit(&mut self, frame: &mut ffmpeg_next::frame::Video) -> anyhow::Result<()> {
        if self.flushed {
            anyhow::bail!("encoder already flushed");
        }
        frame.set_pts(Some(self.frame_index));
        self.inner.send_frame(frame)?;
        self.frame_index += 1;
        Ok(())
    }

    /// Pulls one packet; `None` means no output is available right now (or
    /// the stream ended after a flush).
    pub fn receive_packet(&mut self) -> anyhow::Result<Option<EncodedPacket>> {
        let mut packet = ffmpeg_next::codec::packet::Packet::empty();
        match self.inner.receive_packet(&mut packet) {
            Ok(()) => {
                // one frame per packet, in encoder ticks
                let duration = 1i64.rescale(self.frame_rate.invert(), self.encoder_time_base);
                Ok(Some(EncodedPacket::new(packet, self.encoder_time_base, duration)))
            }
            Err(ffmpeg_next::Error::Other { errno })
                if errno == ffmpeg_next::util::error::EAGAIN =>
            {
                Ok(None)
            }
            Err(ffmpeg_next::Error::Eof) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Hands every packet currently available to `sink`, in order.
    pub fn drain<F>(&mut self, mut sink: F) -> anyhow::Result<usize>
    where
        F: FnMut(EncodedPacket) -> anyhow::Result<()>,
    {
        let mut count = 0;
        while let Some(packet) = self.receive_packet()? {
            sink(packet)?;
            count += 1;
        }
        Ok(count)
    }

    /// Signals end of stream and drains everything the encoder still holds.
    /// Further submissions are rejected.
    pub fn flush<F>(&mut self, sink: F) -> anyhow::Result<usize>
    where
        F: FnMut(EncodedPacket) -> anyhow::Result<()>,
    {
        if self.flushed {
            return Ok(0);
        }
        self.flushed = true;
        self.inner.send_eof()?;
        let count = self.drain(sink)?;
        log::debug!(
            "encoder flushed: {} trailing packets after {} frames",
            count,
            self.frame_index
        );
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h264_available() -> bool {
        ffmpeg_next::encoder::find(codec::Id::H264).is_some()
    }

    fn gray_frame(width: u32, height: u32) -> ffmpeg_next::frame::Video {
        let mut frame = ffmpeg_next::frame::Video::new(ENCODER_PIXEL_FORMAT, width, height);
        for plane in 0..3 {
            frame.data_mut(plane).fill(128);
        }
        frame
    }

    #[test]
    fn test_drain_after_every_submit_and_flush() -> anyhow::Result<()> {
        crate::init()?;
        if !h264_available() {
            eprintln!("skip: no H.264 encoder in this ffmpeg build");
            return Ok(());
        }
        let settings = Settings {
            width: 64,
            height: 64,
            frame_rate: 25,
            ..Default::default()
        };
        let mut encoder = Encoder::new(&settings, false)?;
        assert_eq!(encoder.time_base(), Rational::new(1, 25));

        let mut pts = Vec::new();
        let mut keys = Vec::new();
        for _ in 0..20 {
            encoder.submit(&mut gray_frame(64, 64))?;
            encoder.drain(|p| {
                assert_eq!(p.time_base(), Rational::new(1, 25));
                assert!(p.size() > 0);
                pts.push(p.pts());
                keys.push(p.is_key());
                Ok(())
            })?;
        }
        encoder.flush(|p| {
            pts.push(p.pts());
            keys.push(p.is_key());
            Ok(())
        })?;

        assert_eq!(encoder.frame_index(), 20);
        assert!(!pts.is_empty() && pts.len() <= 20, "{} packets", pts.len());
        assert!(pts.iter().all(|p| p.is_some()));
        assert!(keys[0], "stream starts on a keyframe");

        // no submissions after flush
        assert!(encoder.submit(&mut gray_frame(64, 64)).is_err());
        assert_eq!(encoder.flush(|_| Ok(()))?, 0);
        Ok(())
    }

    #[test]
    fn test_rejects_zero_frame_rate() {
        let settings = Settings {
            frame_rate: 0,
            ..Default::default()
        };
        assert!(Encoder::new(&settings, false).is_err());
    }
}
