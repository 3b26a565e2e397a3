use std::path::Path;

use super::{Pipeline, SessionState, StreamSession};
use crate::{
    destination::{TransportKind, resolve},
    encoder::Settings,
    frame::rgb_len,
    metadata::probe,
    scaler::ENCODER_PIXEL_FORMAT,
};

const RED: [u8; 3] = [200, 40, 40];

fn h264_available() -> bool {
    ffmpeg_next::encoder::find(ffmpeg_next::codec::Id::H264).is_some()
}

fn solid(width: u32, height: u32, rgb: [u8; 3]) -> Vec<u8> {
    rgb.iter()
        .copied()
        .cycle()
        .take(rgb_len(width, height))
        .collect()
}

fn path_str(path: &Path) -> &str {
    path.to_str().expect("utf-8 temp path")
}

fn receive_all(decoder: &mut ffmpeg_next::decoder::Video, frames: &mut Vec<ffmpeg_next::frame::Video>) {
    loop {
        let mut frame = ffmpeg_next::frame::Video::empty();
        if decoder.receive_frame(&mut frame).is_err() {
            break;
        }
        frames.push(frame);
    }
}

/// Decodes every frame of the first video stream in `path`.
fn decode_frames(path: &Path) -> anyhow::Result<Vec<ffmpeg_next::frame::Video>> {
    let mut input = ffmpeg_next::format::input(&path)?;
    let (index, parameters) = {
        let stream = input
            .streams()
            .best(ffmpeg_next::media::Type::Video)
            .ok_or(anyhow::anyhow!("no video stream"))?;
        (stream.index(), stream.parameters())
    };
    let context = ffmpeg_next::codec::Context::from_parameters(parameters)?;
    let mut decoder = context.decoder().video()?;

    let mut frames = Vec::new();
    for (stream, packet) in input.packets() {
        if stream.index() == index {
            decoder.send_packet(&packet)?;
            receive_all(&mut decoder, &mut frames);
        }
    }
    decoder.send_eof()?;
    receive_all(&mut decoder, &mut frames);
    Ok(frames)
}

/// (dts, pts) of every packet of the first video stream, in file order.
fn packet_timestamps(path: &Path) -> anyhow::Result<Vec<(Option<i64>, Option<i64>)>> {
    let mut input = ffmpeg_next::format::input(&path)?;
    let index = input
        .streams()
        .best(ffmpeg_next::media::Type::Video)
        .ok_or(anyhow::anyhow!("no video stream"))?
        .index();
    Ok(input
        .packets()
        .filter(|(stream, _)| stream.index() == index)
        .map(|(_, packet)| (packet.dts(), packet.pts()))
        .collect())
}

fn plane_mean(frame: &ffmpeg_next::frame::Video, plane: usize) -> f64 {
    let (w, h) = if plane == 0 {
        (frame.width() as usize, frame.height() as usize)
    } else {
        (frame.width() as usize / 2, frame.height() as usize / 2)
    };
    let stride = frame.stride(plane);
    let data = frame.data(plane);
    let sum: u64 = (0..h)
        .flat_map(|row| data[row * stride..row * stride + w].iter())
        .map(|&v| v as u64)
        .sum();
    sum as f64 / (w * h) as f64
}

/// Requires an H.264 encoder in the linked ffmpeg.
#[test]
fn test_round_trip_mp4() -> anyhow::Result<()> {
    crate::init()?;
    if !h264_available() {
        eprintln!("skip: no H.264 encoder in this ffmpeg build");
        return Ok(());
    }
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("out.mp4");

    let mut session = StreamSession::new();
    session.initialize(path_str(&path), 64, 64, 30)?;
    assert_eq!(session.state(), SessionState::Ready);
    assert_eq!(session.transport(), Some(TransportKind::File));

    let frame = solid(64, 64, RED);
    for _ in 0..30 {
        session.add_frame(&frame)?;
    }
    assert_eq!(session.frame_count(), 30);
    session.finalize()?;
    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(session.frame_count(), 30);
    assert!(session.packets_written() > 0 && session.packets_written() <= 30);

    let info = probe(path_str(&path))?;
    assert_eq!(info.streams.len(), 1);
    assert_eq!(info.streams[0].codec_name, "h264");
    assert_eq!(info.streams[0].width, 64);
    assert_eq!(info.streams[0].height, 64);

    let frames = decode_frames(&path)?;
    assert!(
        !frames.is_empty() && frames.len() <= 30,
        "decoded {} frames",
        frames.len()
    );
    for (i, frame) in frames.iter().enumerate() {
        assert_eq!(frame.format(), ENCODER_PIXEL_FORMAT);
        // BT.601 limited range: Y ~ 91, Cr ~ 198 for (200, 40, 40)
        let y = plane_mean(frame, 0);
        let v = plane_mean(frame, 2);
        assert!((y - 91.0).abs() < 8.0, "frame {} luma {}", i, y);
        assert!((v - 198.0).abs() < 10.0, "frame {} cr {}", i, v);
    }
    Ok(())
}

#[test]
fn test_file_dts_never_goes_backwards() -> anyhow::Result<()> {
    crate::init()?;
    if !h264_available() {
        eprintln!("skip: no H.264 encoder in this ffmpeg build");
        return Ok(());
    }
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("ramp.mkv");

    let mut session = StreamSession::new();
    session.initialize(path_str(&path), 64, 48, 25)?;
    for i in 0..40u8 {
        session.add_frame(&solid(64, 48, [i * 6, 255 - i * 6, 128]))?;
    }
    session.finalize()?;

    let timestamps = packet_timestamps(&path)?;
    assert!(!timestamps.is_empty());
    let dts: Vec<i64> = timestamps.iter().filter_map(|(dts, _)| *dts).collect();
    assert!(
        dts.windows(2).all(|w| w[0] <= w[1]),
        "dts went backwards: {:?}",
        dts
    );
    Ok(())
}

/// The low-latency tuning disables reordering, so presentation order equals
/// write order.
#[test]
fn test_low_latency_tuning_keeps_pts_in_write_order() -> anyhow::Result<()> {
    crate::init()?;
    if !h264_available() {
        eprintln!("skip: no H.264 encoder in this ffmpeg build");
        return Ok(());
    }
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("live.mkv");

    let mut config = resolve(path_str(&path))?;
    config.tuning = resolve("rtsp://127.0.0.1:8554/live")?.tuning;
    let settings = Settings {
        width: 64,
        height: 64,
        frame_rate: 30,
        tuning: config.tuning.clone(),
        ..Default::default()
    };

    let mut pipeline = Pipeline::open(&config, &settings)?;
    let mut written = 0;
    for i in 0..36u8 {
        let mut frame = pipeline.scaler.convert(&solid(64, 64, [i * 7, 90, 200 - i * 5]))?;
        pipeline.encoder.submit(&mut frame)?;
        written += pipeline.drain()?;
    }
    written += pipeline.flush()?;
    pipeline.output.write_trailer()?;
    pipeline.output.close();
    assert!(written > 0);

    let timestamps = packet_timestamps(&path)?;
    let pts: Vec<i64> = timestamps.iter().filter_map(|(_, pts)| *pts).collect();
    assert_eq!(pts.len(), timestamps.len());
    assert!(
        pts.windows(2).all(|w| w[0] <= w[1]),
        "pts not in write order: {:?}",
        pts
    );
    Ok(())
}

#[test]
fn test_finalize_twice_writes_one_trailer() -> anyhow::Result<()> {
    crate::init()?;
    if !h264_available() {
        eprintln!("skip: no H.264 encoder in this ffmpeg build");
        return Ok(());
    }
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("twice.mp4");

    let mut session = StreamSession::new();
    session.initialize(path_str(&path), 32, 32, 10)?;
    for _ in 0..5 {
        session.add_frame(&solid(32, 32, [0, 0, 255]))?;
    }
    session.finalize()?;
    let size = std::fs::metadata(&path)?.len();
    assert!(size > 0);

    session.finalize()?;
    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(std::fs::metadata(&path)?.len(), size);

    // no way back out of Closed
    assert!(session.add_frame(&solid(32, 32, [0, 0, 255])).is_err());
    assert!(session.initialize(path_str(&path), 32, 32, 10).is_err());
    Ok(())
}

#[test]
fn test_finalize_without_initialize_is_noop() -> anyhow::Result<()> {
    let mut session = StreamSession::new();
    session.finalize()?;
    session.finalize()?;
    assert_eq!(session.state(), SessionState::Uninitialized);
    assert_eq!(session.frame_count(), 0);
    assert_eq!(session.packets_written(), 0);

    crate::init()?;
    if !h264_available() {
        eprintln!("skip: no H.264 encoder in this ffmpeg build");
        return Ok(());
    }
    // still usable afterwards
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("late.mp4");
    session.initialize(path_str(&path), 32, 32, 10)?;
    assert!(session.is_ready());
    session.add_frame(&solid(32, 32, RED))?;
    session.finalize()?;
    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(session.frame_count(), 1);
    Ok(())
}

#[test]
fn test_unopenable_destination_leaves_session_uninitialized() -> anyhow::Result<()> {
    crate::init()?;
    let mut session = StreamSession::new();
    let err = session
        .initialize("/nonexistent-orbit-cast-dir/nested/out.mp4", 64, 64, 30)
        .unwrap_err();
    assert!(format!("{:#}", err).contains("open output"), "{:#}", err);
    assert_eq!(session.state(), SessionState::Uninitialized);
    assert!(session.transport().is_none());

    assert!(session.add_frame(&solid(64, 64, RED)).is_err());
    assert_eq!(session.frame_count(), 0);
    session.finalize()?;
    Ok(())
}

#[test]
fn test_unreachable_stream_leaves_session_uninitialized() -> anyhow::Result<()> {
    crate::init()?;
    if !h264_available() {
        eprintln!("skip: no H.264 encoder in this ffmpeg build");
        return Ok(());
    }
    let mut session = StreamSession::new();
    // nothing listens on port 1
    assert!(session.initialize("rtsp://127.0.0.1:1/live", 64, 64, 30).is_err());
    assert_eq!(session.state(), SessionState::Uninitialized);
    assert!(session.add_frame(&solid(64, 64, RED)).is_err());
    Ok(())
}

#[test]
fn test_dimension_mismatch_keeps_session_ready() -> anyhow::Result<()> {
    crate::init()?;
    if !h264_available() {
        eprintln!("skip: no H.264 encoder in this ffmpeg build");
        return Ok(());
    }
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("mismatch.mp4");

    let mut session = StreamSession::new();
    session.initialize(path_str(&path), 64, 64, 30)?;

    let err = session.add_frame(&solid(32, 32, RED)).unwrap_err();
    assert!(format!("{:#}", err).contains("expected"), "{:#}", err);
    assert_eq!(session.state(), SessionState::Ready);
    assert_eq!(session.frame_count(), 0);

    session.add_frame(&solid(64, 64, RED))?;
    assert_eq!(session.frame_count(), 1);
    session.finalize()?;
    Ok(())
}

#[test]
fn test_initialize_rejects_invalid_arguments() -> anyhow::Result<()> {
    crate::init()?;
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("bad.mp4");
    let target = path_str(&path);

    let mut session = StreamSession::new();
    assert!(session.initialize(target, 0, 64, 30).is_err());
    assert!(session.initialize(target, 64, 0, 30).is_err());
    assert!(session.initialize(target, 64, 64, 0).is_err());
    assert!(session.initialize("", 64, 64, 30).is_err());
    assert!(session.initialize("no_extension", 64, 64, 30).is_err());
    assert_eq!(session.state(), SessionState::Uninitialized);
    assert!(!path.exists());
    Ok(())
}

#[test]
fn test_add_frame_before_initialize_fails() {
    let mut session = StreamSession::new();
    let err = session.add_frame(&solid(8, 8, RED)).unwrap_err();
    assert!(format!("{:#}", err).contains("Uninitialized"));
    assert_eq!(session.frame_count(), 0);
}

#[test]
fn test_initialize_twice_fails() -> anyhow::Result<()> {
    crate::init()?;
    if !h264_available() {
        eprintln!("skip: no H.264 encoder in this ffmpeg build");
        return Ok(());
    }
    let dir = tempfile::tempdir()?;
    let first = dir.path().join("first.mp4");
    let second = dir.path().join("second.mp4");

    let mut session = StreamSession::new().with_bit_rate(500_000);
    session.initialize(path_str(&first), 32, 32, 15)?;
    assert!(session.initialize(path_str(&second), 64, 64, 30).is_err());
    assert_eq!(session.dimensions(), (32, 32));
    assert_eq!(session.frame_rate(), 15);
    assert_eq!(session.bit_rate(), 500_000);
    assert!(!second.exists());
    session.finalize()?;
    Ok(())
}

#[test]
fn test_drop_finalizes_ready_session() -> anyhow::Result<()> {
    crate::init()?;
    if !h264_available() {
        eprintln!("skip: no H.264 encoder in this ffmpeg build");
        return Ok(());
    }
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("dropped.mp4");
    {
        let mut session = StreamSession::new();
        session.initialize(path_str(&path), 32, 32, 10)?;
        for _ in 0..10 {
            session.add_frame(&solid(32, 32, [30, 200, 30]))?;
        }
    }
    let frames = decode_frames(&path)?;
    assert!(!frames.is_empty() && frames.len() <= 10);
    Ok(())
}
