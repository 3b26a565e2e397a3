use ffmpeg_next::format::Pixel;

/// Bytes per pixel of interleaved RGB24 input.
pub const RGB_BYTES_PER_PIXEL: usize = 3;

/// Expected byte length of a tightly packed RGB24 buffer.
pub fn rgb_len(width: u32, height: u32) -> usize {
    width as usize * height as usize * RGB_BYTES_PER_PIXEL
}

/// Copies a caller-owned RGB24 buffer (stride = 3 * width) into an ffmpeg
/// frame. The frame's own line size may be padded, so rows are copied one
/// at a time.
pub fn rgb_to_video_frame(
    data: &[u8],
    width: u32,
    height: u32,
) -> anyhow::Result<ffmpeg_next::frame::Video> {
    if width == 0 || height == 0 {
        anyhow::bail!("invalid video size {}x{}", width, height);
    }
    let expected = rgb_len(width, height);
    if data.len() != expected {
        anyhow::bail!(
            "rgb buffer is {} bytes, expected {} for {}x{}",
            data.len(),
            expected,
            width,
            height
        );
    }

    let mut frame = ffmpeg_next::frame::Video::new(Pixel::RGB24, width, height);
    let src_stride = width as usize * RGB_BYTES_PER_PIXEL;
    let dst_stride = frame.stride(0);
    let dst = frame.data_mut(0);
    for (row, src_row) in data.chunks_exact(src_stride).enumerate() {
        let start = row * dst_stride;
        dst[start..start + src_stride].copy_from_slice(src_row);
    }
    Ok(frame)
}
