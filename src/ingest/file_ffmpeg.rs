//! Local container decoding using FFmpeg.
//!
//! Frames are converted to RGB24 in-memory. A packet the decoder rejects, or a
//! frame the scaler cannot convert, is reported as a decode fault for that frame
//! and decoding carries on with the next packet.

use anyhow::{anyhow, Context, Result};
use ffmpeg_next as ffmpeg;

use super::{NextFrame, StreamInfo, FALLBACK_FRAME_RATE};
use crate::frame::Frame;

pub(crate) struct FfmpegFileSource {
    path: String,
    decoding: Option<Decoding>,
    frame_count: u64,
    eof_sent: bool,
}

struct Decoding {
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
}

impl FfmpegFileSource {
    pub(crate) fn new(path: String) -> Self {
        Self {
            path,
            decoding: None,
            frame_count: 0,
            eof_sent: false,
        }
    }

    pub(crate) fn open(&mut self) -> Result<StreamInfo> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let input = ffmpeg::format::input(&self.path)
            .with_context(|| format!("failed to open '{}' with ffmpeg", self.path))?;
        let stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow!("'{}' has no video track", self.path))?;
        let stream_index = stream.index();

        let rate = stream.avg_frame_rate();
        let frame_rate = if rate.numerator() > 0 && rate.denominator() > 0 {
            f64::from(rate)
        } else {
            FALLBACK_FRAME_RATE
        };
        let total_frames = u64::try_from(stream.frames()).ok().filter(|n| *n > 0);

        let context = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
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

        let info = StreamInfo {
            frame_rate,
            width: decoder.width(),
            height: decoder.height(),
            total_frames,
        };
        log::info!(
            "FileSource: opened {} (ffmpeg, {}x{} @ {:.2} fps)",
            self.path,
            info.width,
            info.height,
            info.frame_rate
        );

        self.decoding = Some(Decoding {
            input,
            stream_index,
            decoder,
            scaler,
        });
        self.frame_count = 0;
        self.eof_sent = false;
        Ok(info)
    }

    pub(crate) fn next_frame(&mut self) -> Result<NextFrame> {
        let decoding = self
            .decoding
            .as_mut()
            .ok_or_else(|| anyhow!("ffmpeg source read before open"))?;
        let mut decoded = ffmpeg::frame::Video::empty();

        loop {
            if decoding.decoder.receive_frame(&mut decoded).is_ok() {
                self.frame_count += 1;
                let index = self.frame_count;
                let mut rgb_frame = ffmpeg::frame::Video::empty();
                if let Err(e) = decoding.scaler.run(&decoded, &mut rgb_frame) {
                    return Ok(NextFrame::DecodeFault {
                        frame_index: index,
                        reason: format!("scale frame to RGB: {}", e),
                    });
                }
                return match frame_to_pixels(&rgb_frame)
                    .and_then(|(pixels, w, h)| Frame::rgb(index, w, h, pixels))
                {
                    Ok(frame) => Ok(NextFrame::Frame(frame)),
                    Err(e) => Ok(NextFrame::DecodeFault {
                        frame_index: index,
                        reason: format!("{:#}", e),
                    }),
                };
            }

            if self.eof_sent {
                return Ok(NextFrame::EndOfStream);
            }

            let next_packet = decoding.input.packets().next();
            match next_packet {
                Some((stream, packet)) => {
                    if stream.index() != decoding.stream_index {
                        continue;
                    }
                    if let Err(e) = decoding.decoder.send_packet(&packet) {
                        self.frame_count += 1;
                        return Ok(NextFrame::DecodeFault {
                            frame_index: self.frame_count,
                            reason: format!("decoder rejected packet: {}", e),
                        });
                    }
                }
                None => {
                    decoding
                        .decoder
                        .send_eof()
                        .context("flush ffmpeg decoder")?;
                    self.eof_sent = true;
                }
            }
        }
    }
}

fn frame_to_pixels(frame: &ffmpeg::frame::Video) -> Result<(Vec<u8>, u32, u32)> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    if stride == row_bytes {
        let len = row_bytes * height as usize;
        let pixels = data
            .get(..len)
            .context("ffmpeg frame buffer is shorter than expected")?;
        return Ok((pixels.to_vec(), width, height));
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
