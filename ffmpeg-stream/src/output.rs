use std::{ffi::CString, ptr};

use ffmpeg_next::{Dictionary, Rational, ffi, format};

use crate::{destination::DestinationConfig, packet::EncodedPacket};

fn dictionary(options: &[(String, String)]) -> Dictionary<'static> {
    let mut dict = Dictionary::new();
    for (key, value) in options {
        dict.set(key, value);
    }
    dict
}

/// The single video track of an output.
#[derive(Debug, Clone, Copy)]
struct VideoTrack {
    index: usize,
    time_base: Rational,
    last_dts: Option<i64>,
}

/// Container muxer / transport writer for one destination.
pub struct AvOutput {
    inner: Option<format::context::Output>,
    target: String,
    track: Option<VideoTrack>,
    header_options: Vec<(String, String)>,
    interleaved: bool,
    owns_io: bool,
    have_written_header: bool,
    have_written_trailer: bool,
}

impl AvOutput {
    /// Allocates the output context and opens its I/O handle. Formats that
    /// drive their own transport (RTSP) get no handle here; they connect
    /// when the header is written.
    pub fn new(config: &DestinationConfig) -> anyhow::Result<Self> {
        let c_target = CString::new(config.target.as_str())?;
        let c_format = config
            .format
            .as_deref()
            .map(CString::new)
            .transpose()?;

        let mut inner = unsafe {
            let mut ps = ptr::null_mut();
            let ret = ffi::avformat_alloc_output_context2(
                &mut ps,
                ptr::null_mut(),
                c_format.as_ref().map_or(ptr::null(), |f| f.as_ptr()),
                c_target.as_ptr(),
            );
            if ret < 0 || ps.is_null() {
                return Err(anyhow::anyhow!(
                    "allocate output context for {:?} (format {:?}): {}",
                    config.target,
                    config.format,
                    ffmpeg_next::Error::from(ret)
                ));
            }
            format::context::Output::wrap(ps)
        };

        let owns_io = !inner.format().flags().contains(format::Flags::NO_FILE);
        if owns_io {
            let io_flags = if config.direct_io {
                ffi::AVIO_FLAG_WRITE | ffi::AVIO_FLAG_DIRECT
            } else {
                ffi::AVIO_FLAG_WRITE
            };
            unsafe {
                let mut opts = dictionary(&config.io_options).disown();
                let ret = ffi::avio_open2(
                    &mut (*inner.as_mut_ptr()).pb,
                    c_target.as_ptr(),
                    io_flags as i32,
                    ptr::null(),
                    &mut opts,
                );
                let unused = Dictionary::own(opts);
                for (key, value) in unused.iter() {
                    log::debug!("protocol ignored option {}={}", key, value);
                }
                if ret < 0 {
                    return Err(anyhow::anyhow!(
                        "open output {:?}: {}",
                        config.target,
                        ffmpeg_next::Error::from(ret)
                    ));
                }
            }
        }

        log::info!(
            "output opened: {} format={} owns_io={} direct_io={}",
            config.target,
            inner.format().name(),
            owns_io,
            owns_io && config.direct_io
        );

        Ok(Self {
            inner: Some(inner),
            target: config.target.clone(),
            track: None,
            header_options: config.header_options.clone(),
            interleaved: config.interleaved,
            owns_io,
            have_written_header: false,
            have_written_trailer: false,
        })
    }

    fn context(&mut self) -> anyhow::Result<&mut format::context::Output> {
        self.inner
            .as_mut()
            .ok_or(anyhow::anyhow!("output {} already closed", self.target))
    }

    /// Whether the container wants codec headers out of band (extradata).
    pub fn global_header(&self) -> bool {
        self.inner
            .as_ref()
            .map(|o| o.format().flags().contains(format::Flags::GLOBAL_HEADER))
            .unwrap_or(false)
    }

    pub fn add_video_track(
        &mut self,
        codec: ffmpeg_next::Codec,
        parameters: ffmpeg_next::codec::Parameters,
        time_base: Rational,
    ) -> anyhow::Result<()> {
        if self.track.is_some() {
            anyhow::bail!("output {} already has a video track", self.target);
        }
        if self.have_written_header {
            anyhow::bail!("cannot add a track after the header is written");
        }
        let output = self.context()?;
        let mut writer_stream = output.add_stream(codec)?;
        writer_stream.set_parameters(parameters);
        writer_stream.set_time_base(time_base);
        let index = writer_stream.index();
        self.track = Some(VideoTrack {
            index,
            time_base,
            last_dts: None,
        });
        Ok(())
    }

    pub fn write_header(&mut self) -> anyhow::Result<()> {
        if self.have_written_header {
            anyhow::bail!("header already written for {}", self.target);
        }
        let Some(mut track) = self.track else {
            anyhow::bail!("no track added to {}", self.target);
        };
        let options = dictionary(&self.header_options);
        let output = self.context()?;
        let unused = output.write_header_with(options)?;
        for (key, value) in unused.iter() {
            log::debug!("muxer ignored option {}={}", key, value);
        }
        // the muxer may pick its own track time base
        track.time_base = output
            .stream(track.index)
            .ok_or(anyhow::anyhow!("stream {} not found", track.index))?
            .time_base();
        self.track = Some(track);
        self.have_written_header = true;
        log::debug!(
            "header written for {}, track time_base={:?}",
            self.target,
            track.time_base
        );
        Ok(())
    }

    /// Rescales `packet` from its encoder time base to the track's and
    /// writes it.
    pub fn write_packet(&mut self, packet: EncodedPacket) -> anyhow::Result<()> {
        if !self.have_written_header {
            anyhow::bail!("write_packet before header");
        }
        if self.have_written_trailer {
            anyhow::bail!("write_packet after trailer");
        }
        let mut track = self
            .track
            .ok_or(anyhow::anyhow!("stream not found"))?;

        let p = packet.into_track(track.index, track.time_base);

        // decode order only; pts may reorder when B-frames are on
        if let (Some(last), Some(dts)) = (track.last_dts, p.dts()) {
            if dts < last {
                anyhow::bail!(
                    "dts went backwards on track {}: {} after {}",
                    track.index,
                    dts,
                    last
                );
            }
        }
        let dts = p.dts().or(p.pts());

        let interleaved = self.interleaved;
        let output = self.context()?;
        if interleaved {
            p.write_interleaved(output)?;
        } else {
            p.write(output)?;
        }

        if dts.is_some() {
            track.last_dts = dts;
        }
        self.track = Some(track);
        Ok(())
    }

    /// Finalizes container indices. A second call does nothing.
    pub fn write_trailer(&mut self) -> anyhow::Result<()> {
        if self.have_written_header && !self.have_written_trailer {
            self.have_written_trailer = true;
            self.context()?.write_trailer()?;
        }
        Ok(())
    }

    /// Releases the context and, when this output opened one, its I/O handle.
    pub fn close(&mut self) {
        if let Some(output) = self.inner.take() {
            drop(output);
            if self.owns_io {
                log::info!("output closed: {}", self.target);
            } else {
                log::info!("output released (no file handle): {}", self.target);
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_none()
    }

    pub fn has_written_trailer(&self) -> bool {
        self.have_written_trailer
    }
}

unsafe impl Send for AvOutput {}
