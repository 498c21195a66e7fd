#![cfg(feature = "media-ffmpeg")]

//! MP4 video sink backed by FFmpeg.
//!
//! Encodes RGB24 frames with the MPEG-4 part 2 encoder (the `mp4v` fourcc)
//! at the source frame rate and resolution. Frames get sequential PTS in
//! write order; the encoder is drained and the trailer written on finish.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::util::rational::Rational;

use super::{ensure_frame_size, VideoSink};
use crate::frame::{Frame, VideoMeta};

pub struct Mp4Sink {
    path: PathBuf,
    state: Option<EncoderState>,
    finished: bool,
}

struct EncoderState {
    octx: ffmpeg::format::context::Output,
    encoder: ffmpeg::codec::encoder::video::Encoder,
    scaler: ffmpeg::software::scaling::Context,
    stream_index: usize,
    enc_time_base: Rational,
    width: u32,
    height: u32,
    next_pts: i64,
}

impl Mp4Sink {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            state: None,
            finished: false,
        }
    }

    fn state_mut(&mut self) -> Result<&mut EncoderState> {
        self.state
            .as_mut()
            .ok_or_else(|| anyhow!("video sink written before open"))
    }

    fn drain_packets(state: &mut EncoderState) -> Result<()> {
        let out_time_base = state
            .octx
            .stream(state.stream_index)
            .map(|s| s.time_base())
            .unwrap_or(state.enc_time_base);
        let mut packet = ffmpeg::Packet::empty();
        while state.encoder.receive_packet(&mut packet).is_ok() {
            packet.set_stream(state.stream_index);
            packet.rescale_ts(state.enc_time_base, out_time_base);
            packet
                .write_interleaved(&mut state.octx)
                .context("write encoded packet")?;
        }
        Ok(())
    }
}

impl VideoSink for Mp4Sink {
    fn open(&mut self, meta: &VideoMeta) -> Result<()> {
        if meta.fps_num <= 0 || meta.fps_den <= 0 {
            return Err(anyhow!(
                "source frame rate {}/{} cannot size the encoder",
                meta.fps_num,
                meta.fps_den
            ));
        }
        ffmpeg::init().context("initialize ffmpeg")?;

        let mut octx = ffmpeg::format::output(&self.path)
            .with_context(|| format!("failed to open output {}", self.path.display()))?;
        let global_header = octx
            .format()
            .flags()
            .contains(ffmpeg::format::Flags::GLOBAL_HEADER);

        let codec = ffmpeg::encoder::find(ffmpeg::codec::Id::MPEG4)
            .ok_or_else(|| anyhow!("MPEG-4 encoder not available in this ffmpeg build"))?;

        let enc_time_base = Rational::new(meta.fps_den, meta.fps_num);
        let (stream_index, encoder) = {
            let mut ost = octx.add_stream(codec).context("add output stream")?;
            let mut enc = ffmpeg::codec::context::Context::from_parameters(ost.parameters())
                .context("create encoder context")?
                .encoder()
                .video()
                .context("open video encoder settings")?;
            enc.set_width(meta.width);
            enc.set_height(meta.height);
            enc.set_format(ffmpeg::util::format::pixel::Pixel::YUV420P);
            enc.set_time_base(enc_time_base);
            enc.set_frame_rate(Some(Rational::new(meta.fps_num, meta.fps_den)));
            if global_header {
                enc.set_flags(ffmpeg::codec::Flags::GLOBAL_HEADER);
            }
            let opened = enc.open_as(codec).context("open MPEG-4 encoder")?;
            ost.set_parameters(&opened);
            (ost.index(), opened)
        };

        octx.write_header().context("write container header")?;

        let scaler = ffmpeg::software::scaling::context::Context::get(
            ffmpeg::util::format::pixel::Pixel::RGB24,
            meta.width,
            meta.height,
            ffmpeg::util::format::pixel::Pixel::YUV420P,
            meta.width,
            meta.height,
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create encode scaler")?;

        self.state = Some(EncoderState {
            octx,
            encoder,
            scaler,
            stream_index,
            enc_time_base,
            width: meta.width,
            height: meta.height,
            next_pts: 0,
        });
        Ok(())
    }

    fn write(&mut self, frame: &Frame) -> Result<()> {
        let declared = self.state.as_ref().map(|s| (s.width, s.height));
        ensure_frame_size(declared, frame)?;
        let state = self.state_mut()?;

        let mut rgb = ffmpeg::frame::Video::new(
            ffmpeg::util::format::pixel::Pixel::RGB24,
            state.width,
            state.height,
        );
        copy_rgb_into_plane(frame, &mut rgb);

        let mut yuv = ffmpeg::frame::Video::empty();
        state
            .scaler
            .run(&rgb, &mut yuv)
            .context("scale frame to YUV420P")?;
        yuv.set_pts(Some(state.next_pts));
        state.next_pts += 1;

        state
            .encoder
            .send_frame(&yuv)
            .context("send frame to encoder")?;
        Self::drain_packets(state)
    }

    fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        let Some(state) = self.state.as_mut() else {
            // Never opened; nothing to flush.
            self.finished = true;
            return Ok(());
        };
        state.encoder.send_eof().context("flush encoder")?;
        Self::drain_packets(state)?;
        state
            .octx
            .write_trailer()
            .context("write container trailer")?;
        self.finished = true;
        Ok(())
    }
}

/// Copy a tightly packed RGB24 buffer into the (possibly stride-padded)
/// first plane of an ffmpeg frame.
fn copy_rgb_into_plane(frame: &Frame, dst: &mut ffmpeg::frame::Video) {
    let row_bytes = frame.width as usize * 3;
    let stride = dst.stride(0) as usize;
    let data = dst.data_mut(0);
    for row in 0..frame.height as usize {
        let src = &frame.data()[row * row_bytes..(row + 1) * row_bytes];
        data[row * stride..row * stride + row_bytes].copy_from_slice(src);
    }
}
