//! Audio pump: mono PCM in, AAC/ADTS elementary stream into the pipe.

use std::path::PathBuf;

use fdk_aac::enc::{AudioObjectType, BitRate, ChannelMode, Encoder, EncoderParams, Transport};
use tokio::io::AsyncWriteExt;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::video::{FRAME_TIMEOUT, MAX_CONSECUTIVE_TIMEOUTS};
use crate::error::{AppError, Result};
use crate::transport::AudioFrameSource;

const AAC_BITRATE: u32 = 32_000;

/// AAC encoder producing ADTS framed output the remuxer can read directly
pub struct AacEncoder {
    encoder: Encoder,
    pending: Vec<i16>,
}

impl AacEncoder {
    pub fn new(sample_rate: u32) -> Result<Self> {
        let encoder = Encoder::new(EncoderParams {
            bit_rate: BitRate::Cbr(AAC_BITRATE),
            sample_rate,
            transport: Transport::Adts,
            channels: ChannelMode::Mono,
            audio_object_type: AudioObjectType::Mpeg4LowComplexity,
        })
        .map_err(|e| AppError::Media(format!("failed to create AAC encoder: {:?}", e)))?;
        Ok(Self {
            encoder,
            pending: Vec::new(),
        })
    }

    /// Feed PCM samples, returning whatever full AAC frames came out.
    pub fn encode(&mut self, samples: &[i16]) -> Result<Vec<u8>> {
        self.pending.extend_from_slice(samples);

        let mut out = Vec::new();
        let mut chunk = [0u8; 2048];
        while !self.pending.is_empty() {
            let info = self
                .encoder
                .encode(&self.pending, &mut chunk)
                .map_err(|e| AppError::Media(format!("AAC encode failed: {:?}", e)))?;
            if info.input_consumed == 0 && info.output_size == 0 {
                break;
            }
            let consumed = info.input_consumed.min(self.pending.len());
            self.pending.drain(..consumed);
            out.extend_from_slice(&chunk[..info.output_size]);
            if info.input_consumed == 0 {
                break;
            }
        }
        Ok(out)
    }

    /// Drain frames still buffered inside the encoder.
    pub fn finish(&mut self) -> Vec<u8> {
        let mut out = Vec::new();
        let mut chunk = [0u8; 2048];
        loop {
            let info = match self.encoder.encode(&[], &mut chunk) {
                Ok(info) => info,
                Err(e) => {
                    debug!("AAC flush stopped: {:?}", e);
                    break;
                }
            };
            if info.output_size == 0 {
                break;
            }
            out.extend_from_slice(&chunk[..info.output_size]);
        }
        out
    }
}

/// Pump PCM frames from the source into the pipe until stopped.
pub async fn pump_audio(
    mut source: Box<dyn AudioFrameSource>,
    pipe: PathBuf,
    sample_rate: u32,
    uri: String,
    stop: CancellationToken,
) -> Result<()> {
    let mut open_options = tokio::fs::OpenOptions::new();
    open_options.write(true);
    let opened = tokio::select! {
        _ = stop.cancelled() => return Ok(()),
        opened = open_options.open(&pipe) => opened,
    };
    let mut writer =
        opened.map_err(|e| AppError::Media(format!("failed to open audio pipe: {}", e)))?;

    let mut encoder = AacEncoder::new(sample_rate)?;
    info!("AAC encoder for {} initialized: {}Hz mono", uri, sample_rate);

    let mut consecutive_timeouts = 0u32;
    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            received = timeout(FRAME_TIMEOUT, source.next_frame()) => match received {
                Ok(Ok(frame)) => {
                    consecutive_timeouts = 0;
                    let encoded = encoder.encode(&frame.samples)?;
                    if !encoded.is_empty() {
                        writer
                            .write_all(&encoded)
                            .await
                            .map_err(|e| AppError::Media(format!("audio pipe write failed: {}", e)))?;
                        writer.flush().await.ok();
                    }
                }
                Ok(Err(e)) => {
                    if stop.is_cancelled() {
                        break;
                    }
                    return Err(e);
                }
                Err(_) => {
                    consecutive_timeouts += 1;
                    warn!(
                        "No audio frame from {} for {}s",
                        uri,
                        FRAME_TIMEOUT.as_secs() * consecutive_timeouts as u64
                    );
                    if consecutive_timeouts >= MAX_CONSECUTIVE_TIMEOUTS {
                        return Err(AppError::Media(
                            "audio frame timeout persisted, giving up".into(),
                        ));
                    }
                }
            },
        }
    }

    // Drain the encoder so buffered frames are not lost on shutdown
    let tail = encoder.finish();
    if !tail.is_empty() {
        let _ = writer.write_all(&tail).await;
    }
    writer.shutdown().await.ok();
    info!("Audio pump for {} stopped", uri);
    Ok(())
}
