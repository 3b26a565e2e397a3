use ffmpeg_next::{Rational, codec::packet::Packet};

/// One compressed unit pulled from the encoder, timed in the encoder's time
/// base until the muxer moves it onto a track.
pub struct EncodedPacket {
    packet: Packet,
    time_base: Rational,
}

impl EncodedPacket {
    /// Wraps an encoder packet that covers `duration` ticks of `time_base`.
    pub(crate) fn new(mut packet: Packet, time_base: Rational, duration: i64) -> Self {
        packet.set_duration(duration);
        Self { packet, time_base }
    }

    pub fn pts(&self) -> Option<i64> {
        self.packet.pts()
    }

    pub fn dts(&self) -> Option<i64> {
        self.packet.dts()
    }

    pub fn is_key(&self) -> bool {
        self.packet.is_key()
    }

    pub fn size(&self) -> usize {
        self.packet.size()
    }

    pub fn time_base(&self) -> Rational {
        self.time_base
    }

    /// Retargets the packet at `stream` with timestamps in `track_time_base`.
    pub(crate) fn into_track(mut self, stream: usize, track_time_base: Rational) -> Packet {
        self.packet.set_stream(stream);
        self.packet.set_position(-1);
        self.packet.rescale_ts(self.time_base, track_time_base);
        self.packet
    }
}
