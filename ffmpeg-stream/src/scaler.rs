use ffmpeg_next::{
    format::Pixel,
    software::scaling::{self, flag::Flags},
};

use crate::frame::{rgb_len, rgb_to_video_frame};

/// Pixel format handed to the encoder.
pub const ENCODER_PIXEL_FORMAT: Pixel = Pixel::YUV420P;

/// RGB24 → planar YUV 4:2:0 converter for a fixed frame size.
pub struct Scaler {
    context: scaling::Context,
    width: u32,
    height: u32,
}

impl Scaler {
    pub fn new(width: u32, height: u32) -> anyhow::Result<Self> {
        let context = scaling::Context::get(
            Pixel::RGB24,
            width,
            height,
            ENCODER_PIXEL_FORMAT,
            width,
            height,
            Flags::BICUBIC,
        )
        .map_err(|e| anyhow::anyhow!("create scaler {}x{}: {}", width, height, e))?;
        Ok(Self {
            context,
            width,
            height,
        })
    }

    /// Converts one interleaved RGB frame. A fresh destination frame is
    /// allocated per call so the encoder may keep references to earlier ones.
    pub fn convert(&mut self, rgb: &[u8]) -> anyhow::Result<ffmpeg_next::frame::Video> {
        if rgb.len() != rgb_len(self.width, self.height) {
            anyhow::bail!(
                "frame size mismatch: got {} bytes, scaler expects {}x{} rgb24 ({} bytes)",
                rgb.len(),
                self.width,
                self.height,
                rgb_len(self.width, self.height)
            );
        }
        let source = rgb_to_video_frame(rgb, self.width, self.height)?;
        self.run(&source)
    }

    pub fn run(
        &mut self,
        frame: &ffmpeg_next::frame::Video,
    ) -> anyhow::Result<ffmpeg_next::frame::Video> {
        let mut dst =
            ffmpeg_next::frame::Video::new(ENCODER_PIXEL_FORMAT, self.width, self.height);
        self.context.run(frame, &mut dst)?;
        Ok(dst)
    }
}

unsafe impl Send for Scaler {}
