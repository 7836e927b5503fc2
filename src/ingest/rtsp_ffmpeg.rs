//! RTSP stream backend using FFmpeg.
//!
//! Sessions open the address with the configured `rtsp_transport` and a socket
//! I/O timeout, read packets of the best video stream in arrival order and
//! decode them to RGB24. Cancellation is polled before every packet read; the
//! I/O timeout bounds how long a single read can block on a dead connection.

use ffmpeg_next as ffmpeg;
use std::sync::OnceLock;

use super::{OpenOptions, StreamOpener, StreamSession};
use crate::cancel::CancelToken;
use crate::error::{Result, SnapError};
use crate::frame::{pack_rgb_rows, Frame};
use crate::source::redact_address;

/// libavformat major version that renamed the RTSP socket timeout.
const AVFORMAT_TIMEOUT_RENAMED: u32 = 59;

static FFMPEG_INIT: OnceLock<std::result::Result<(), String>> = OnceLock::new();

#[derive(Clone, Debug)]
pub struct FfmpegOpener;

impl FfmpegOpener {
    /// Initializes FFmpeg once per process. A failed initialization is
    /// remembered and reported to every later caller.
    pub fn new() -> Result<Self> {
        FFMPEG_INIT
            .get_or_init(|| ffmpeg::init().map_err(|e| e.to_string()))
            .clone()
            .map(|()| Self)
            .map_err(|e| SnapError::Config(format!("initialize ffmpeg: {}", e)))
    }
}

impl StreamOpener for FfmpegOpener {
    type Session = FfmpegSession;

    fn open(
        &self,
        address: &str,
        options: &OpenOptions,
        cancel: &CancelToken,
    ) -> Result<FfmpegSession> {
        if cancel.is_cancelled() {
            return Err(SnapError::Cancelled);
        }
        let display = redact_address(address);

        let mut dict = ffmpeg::Dictionary::new();
        dict.set("rtsp_transport", options.transport.as_str());
        dict.set(
            io_timeout_option(ffmpeg::format::version()),
            &options.io_timeout.as_micros().to_string(),
        );

        let input = ffmpeg::format::input_with_dictionary(&address, dict)
            .map_err(|e| SnapError::connection(&display, e))?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| SnapError::connection(&display, "stream has no video track"))?;
        let stream_index = input_stream.index();
        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .map_err(|e| SnapError::decode(&display, format!("load decoder parameters: {}", e)))?;
        let decoder = context
            .decoder()
            .video()
            .map_err(|e| SnapError::decode(&display, format!("open video decoder: {}", e)))?;

        log::debug!(
            "ffmpeg session opened for {} (stream #{}, transport {})",
            display,
            stream_index,
            options.transport
        );

        Ok(FfmpegSession {
            address: display,
            cancel: cancel.clone(),
            input: Some(input),
            stream_index,
            decoder: Some(decoder),
            scaler: None,
        })
    }
}

pub struct FfmpegSession {
    address: String,
    cancel: CancelToken,
    input: Option<ffmpeg::format::context::Input>,
    stream_index: usize,
    decoder: Option<ffmpeg::codec::decoder::Video>,
    scaler: Option<ffmpeg::software::scaling::Context>,
}

impl FfmpegSession {
    fn to_rgb(&mut self, decoded: &ffmpeg::frame::Video) -> Result<Frame> {
        let (width, height) = (decoded.width(), decoded.height());
        if self.scaler.is_none() {
            let scaler = ffmpeg::software::scaling::Context::get(
                decoded.format(),
                width,
                height,
                ffmpeg::util::format::pixel::Pixel::RGB24,
                width,
                height,
                ffmpeg::software::scaling::flag::Flags::BILINEAR,
            )
            .map_err(|e| SnapError::decode(&self.address, format!("create scaler: {}", e)))?;
            self.scaler = Some(scaler);
        }
        let Some(scaler) = self.scaler.as_mut() else {
            return Err(SnapError::decode(&self.address, "scaler unavailable"));
        };

        let mut rgb_frame = ffmpeg::frame::Video::empty();
        scaler
            .run(decoded, &mut rgb_frame)
            .map_err(|e| SnapError::decode(&self.address, format!("scale frame to rgb: {}", e)))?;
        let pixels = pack_rgb_rows(rgb_frame.data(0), rgb_frame.stride(0), width, height)?;
        Ok(Frame::from_rgb(pixels, width, height)?.with_pts(decoded.pts()))
    }
}

impl StreamSession for FfmpegSession {
    type Packet = ffmpeg::Packet;

    fn next_packet(&mut self) -> Result<Option<ffmpeg::Packet>> {
        loop {
            if self.cancel.is_cancelled() {
                return Err(SnapError::Cancelled);
            }
            let Some(input) = self.input.as_mut() else {
                return Err(SnapError::decode(&self.address, "session already closed"));
            };
            let mut packet = ffmpeg::Packet::empty();
            match packet.read(input) {
                Ok(()) if packet.stream() == self.stream_index => return Ok(Some(packet)),
                Ok(()) => continue,
                Err(ffmpeg::Error::Eof) => return Ok(None),
                Err(e) => {
                    return Err(SnapError::decode(&self.address, format!("demux: {}", e)))
                }
            }
        }
    }

    fn decode(&mut self, packet: ffmpeg::Packet) -> Result<Vec<Frame>> {
        let Some(decoder) = self.decoder.as_mut() else {
            return Err(SnapError::decode(&self.address, "session already closed"));
        };
        decoder
            .send_packet(&packet)
            .map_err(|e| SnapError::decode(&self.address, format!("send packet: {}", e)))?;

        // only the first frame of a packet is ever kept
        let mut decoded = ffmpeg::frame::Video::empty();
        let received = decoder.receive_frame(&mut decoded);
        if frame_received(received, &self.address)? {
            Ok(vec![self.to_rgb(&decoded)?])
        } else {
            Ok(Vec::new())
        }
    }

    fn close(&mut self) {
        self.scaler = None;
        self.decoder = None;
        if self.input.take().is_some() {
            log::debug!("ffmpeg session closed for {}", self.address);
        }
    }
}

/// `true` when the decoder produced a frame. EAGAIN and EOF mean the packet
/// did not complete one.
fn frame_received(result: std::result::Result<(), ffmpeg::Error>, address: &str) -> Result<bool> {
    match result {
        Ok(()) => Ok(true),
        Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => Ok(false),
        Err(ffmpeg::Error::Eof) => Ok(false),
        Err(e) => Err(SnapError::decode(address, format!("receive frame: {}", e))),
    }
}

/// Dictionary key for the socket I/O timeout in microseconds. Before
/// libavformat 59 that option is `stimeout`; there `timeout` means the listen
/// timeout in seconds and turns the client into an RTSP server.
fn io_timeout_option(avformat_version: u32) -> &'static str {
    if avformat_version >> 16 < AVFORMAT_TIMEOUT_RENAMED {
        "stimeout"
    } else {
        "timeout"
    }
}

impl Drop for FfmpegSession {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn av_version(major: u32, minor: u32, micro: u32) -> u32 {
        (major << 16) | (minor << 8) | micro
    }

    #[test]
    fn io_timeout_key_follows_libavformat_major() {
        // FFmpeg 4.4
        assert_eq!(io_timeout_option(av_version(58, 76, 100)), "stimeout");
        // FFmpeg 5.0
        assert_eq!(io_timeout_option(av_version(59, 16, 100)), "timeout");
        // FFmpeg 6.1
        assert_eq!(io_timeout_option(av_version(60, 16, 100)), "timeout");
    }

    #[test]
    fn receive_outcome_separates_pending_from_failure() {
        let address = "rtsp://cam/stream";
        assert!(frame_received(Ok(()), address).unwrap());
        assert!(!frame_received(
            Err(ffmpeg::Error::Other {
                errno: ffmpeg::error::EAGAIN
            }),
            address
        )
        .unwrap());
        assert!(!frame_received(Err(ffmpeg::Error::Eof), address).unwrap());
        assert!(matches!(
            frame_received(Err(ffmpeg::Error::InvalidData), address),
            Err(SnapError::Decode { .. })
        ));
    }
}
