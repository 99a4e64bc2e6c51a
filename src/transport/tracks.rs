//! Raw frame sources on top of remote tracks.
//!
//! The remote side delivers RTP; the media bridge wants raw frames it can
//! re-encode for the pipe contract. Video is depacketized to H264 access
//! units on the RTP marker bit and decoded to I420; audio payloads are Opus
//! frames decoded to mono PCM at the camera's native rate.

use std::sync::Arc;

use async_trait::async_trait;
use audiopus::coder::Decoder as OpusDecoder;
use audiopus::{Channels, SampleRate};
use openh264::decoder::{DecodedYUV, Decoder as H264Decoder};
use openh264::formats::YUVSource;
use rtp::codecs::h264::H264Packet;
use rtp::packetizer::Depacketizer;
use tracing::debug;
use webrtc::track::track_remote::TrackRemote;

use crate::error::{AppError, Result};

/// Native sample rate of the camera audio path
pub const AUDIO_SAMPLE_RATE: u32 = 16_000;

/// Longest Opus frame at 16 kHz (120 ms)
const MAX_OPUS_SAMPLES: usize = 1920;

/// One raw I420 video frame
#[derive(Debug, Clone)]
pub struct RawVideoFrame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

/// One block of mono PCM samples
#[derive(Debug, Clone)]
pub struct RawAudioFrame {
    pub sample_rate: u32,
    pub samples: Vec<i16>,
}

#[async_trait]
pub trait VideoFrameSource: Send {
    /// Next raw frame, in arrival order. Errors end the source.
    async fn next_frame(&mut self) -> Result<RawVideoFrame>;
}

#[async_trait]
pub trait AudioFrameSource: Send {
    async fn next_frame(&mut self) -> Result<RawAudioFrame>;
}

/// H264 RTP track decoded to raw I420 frames
pub struct H264TrackSource {
    track: Arc<TrackRemote>,
    depacketizer: H264Packet,
    decoder: H264Decoder,
    access_unit: Vec<u8>,
}

impl H264TrackSource {
    pub fn new(track: Arc<TrackRemote>) -> Result<Self> {
        let decoder = H264Decoder::new()
            .map_err(|e| AppError::Media(format!("failed to create H264 decoder: {}", e)))?;
        Ok(Self {
            track,
            depacketizer: H264Packet::default(),
            decoder,
            access_unit: Vec::new(),
        })
    }
}

#[async_trait]
impl VideoFrameSource for H264TrackSource {
    async fn next_frame(&mut self) -> Result<RawVideoFrame> {
        loop {
            let (packet, _) = self
                .track
                .read_rtp()
                .await
                .map_err(|e| AppError::Media(format!("video track read failed: {}", e)))?;

            match self.depacketizer.depacketize(&packet.payload) {
                Ok(nal) if !nal.is_empty() => self.access_unit.extend_from_slice(&nal),
                Ok(_) => {} // fragment, still accumulating
                Err(e) => {
                    debug!("H264 depacketize error: {}", e);
                    continue;
                }
            }

            if !packet.header.marker || self.access_unit.is_empty() {
                continue;
            }

            let access_unit = std::mem::take(&mut self.access_unit);
            match self.decoder.decode(&access_unit) {
                Ok(Some(yuv)) => return Ok(frame_from_yuv(&yuv)),
                Ok(None) => {} // decoder needs more data (e.g. SPS/PPS only)
                Err(e) => debug!("H264 decode error: {}", e),
            }
        }
    }
}

fn frame_from_yuv(yuv: &DecodedYUV<'_>) -> RawVideoFrame {
    let (width, height) = yuv.dimensions();
    let (stride_y, stride_u, stride_v) = yuv.strides();
    let mut data = Vec::with_capacity(width * height * 3 / 2);

    for row in 0..height {
        let offset = row * stride_y;
        data.extend_from_slice(&yuv.y()[offset..offset + width]);
    }
    let chroma_width = width / 2;
    for row in 0..height / 2 {
        let offset = row * stride_u;
        data.extend_from_slice(&yuv.u()[offset..offset + chroma_width]);
    }
    for row in 0..height / 2 {
        let offset = row * stride_v;
        data.extend_from_slice(&yuv.v()[offset..offset + chroma_width]);
    }

    RawVideoFrame {
        width: width as u32,
        height: height as u32,
        data,
    }
}

/// Opus RTP track decoded to mono PCM
pub struct OpusTrackSource {
    track: Arc<TrackRemote>,
    decoder: OpusDecoder,
    pcm: Vec<i16>,
}

impl OpusTrackSource {
    pub fn new(track: Arc<TrackRemote>) -> Result<Self> {
        let decoder = OpusDecoder::new(SampleRate::Hz16000, Channels::Mono)
            .map_err(|e| AppError::Media(format!("failed to create Opus decoder: {:?}", e)))?;
        Ok(Self {
            track,
            decoder,
            pcm: vec![0i16; MAX_OPUS_SAMPLES],
        })
    }
}

#[async_trait]
impl AudioFrameSource for OpusTrackSource {
    async fn next_frame(&mut self) -> Result<RawAudioFrame> {
        loop {
            let (packet, _) = self
                .track
                .read_rtp()
                .await
                .map_err(|e| AppError::Media(format!("audio track read failed: {}", e)))?;

            if packet.payload.is_empty() {
                continue;
            }

            let payload: &[u8] = &packet.payload;
            match self.decoder.decode(Some(payload), &mut self.pcm, false) {
                Ok(samples) if samples > 0 => {
                    return Ok(RawAudioFrame {
                        sample_rate: AUDIO_SAMPLE_RATE,
                        samples: self.pcm[..samples].to_vec(),
                    })
                }
                Ok(_) => {}
                Err(e) => debug!("Opus decode error: {:?}", e),
            }
        }
    }
}
