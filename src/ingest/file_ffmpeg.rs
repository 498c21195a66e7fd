//! FFmpeg-backed local file decoder.
//!
//! Decodes the best video stream to RGB24 in decode order. The decoder is
//! drained through `send_eof` when the demuxer runs out of packets, so every
//! frame the container holds is produced exactly once.

use anyhow::{Context, Result};
use ffmpeg_next as ffmpeg;

use crate::frame::{Frame, VideoMeta};

pub(crate) struct FfmpegFileSource {
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    meta: VideoMeta,
    next_index: u64,
    flushed: bool,
}

impl FfmpegFileSource {
    pub(crate) fn new(path: &str) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let input = ffmpeg::format::input(&path)
            .with_context(|| format!("failed to open file input '{}' with ffmpeg", path))?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow::anyhow!("file has no video track"))?;
        let stream_index = input_stream.index();

        let frame_count = match input_stream.frames() {
            n if n > 0 => Some(n as u64),
            _ => None,
        };
        let fps = {
            let avg = input_stream.avg_frame_rate();
            if avg.numerator() > 0 && avg.denominator() > 0 {
                avg
            } else {
                input_stream.rate()
            }
        };

        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .context("load video decoder parameters")?;
        let decoder = context
            .decoder()
            .video()
            .context("open ffmpeg video decoder")?;

        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        let meta = VideoMeta {
            width: decoder.width(),
            height: decoder.height(),
            fps_num: fps.numerator(),
            fps_den: fps.denominator(),
            frame_count,
        };

        Ok(Self {
            input,
            stream_index,
            decoder,
            scaler,
            meta,
            next_index: 0,
            flushed: false,
        })
    }

    pub(crate) fn meta(&self) -> VideoMeta {
        self.meta
    }

    pub(crate) fn next_frame(&mut self) -> Result<Option<Frame>> {
        loop {
            // Drain decoded frames before feeding more packets, so one
            // packet producing several frames loses none of them.
            let mut decoded = ffmpeg::frame::Video::empty();
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                let mut rgb = ffmpeg::frame::Video::empty();
                self.scaler
                    .run(&decoded, &mut rgb)
                    .context("scale frame to RGB")?;
                let (pixels, width, height) = frame_to_pixels(&rgb)?;
                let frame = Frame::new(self.next_index, width, height, pixels);
                self.next_index += 1;
                return Ok(Some(frame));
            }

            if self.flushed {
                return Ok(None);
            }

            let mut fed = false;
            while let Some((stream, packet)) = self.input.packets().next() {
                if stream.index() != self.stream_index {
                    continue;
                }
                self.decoder
                    .send_packet(&packet)
                    .context("send packet to ffmpeg decoder")?;
                fed = true;
                break;
            }

            if !fed {
                self.decoder.send_eof().context("flush ffmpeg decoder")?;
                self.flushed = true;
            }
        }
    }
}

fn frame_to_pixels(frame: &ffmpeg::frame::Video) -> Result<(Vec<u8>, u32, u32)> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0) as usize;
    let data = frame.data(0);

    if stride == row_bytes {
        return Ok((data.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("ffmpeg frame row is out of bounds")?,
        );
    }

    Ok((pixels, width, height))
}
