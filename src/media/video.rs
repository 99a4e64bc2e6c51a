//! Video pump: raw frames in, H264 elementary stream into the pipe.

use std::path::PathBuf;
use std::time::Duration;

use openh264::encoder::Encoder;
use openh264::formats::YUVBuffer;
use tokio::io::AsyncWriteExt;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{AppError, Result};
use crate::transport::{RawVideoFrame, VideoFrameSource};

/// Wait for the very first frame before giving up on the track
pub(crate) const FIRST_FRAME_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-frame receive timeout; tolerated and logged when it elapses
pub(crate) const FRAME_TIMEOUT: Duration = Duration::from_secs(5);

/// Consecutive frame timeouts before the pump gives up
pub(crate) const MAX_CONSECUTIVE_TIMEOUTS: u32 = 6;

/// H264 encoder sized from the first frame, low-latency settings, one
/// keyframe per second at the negotiated framerate.
pub struct VideoEncoder {
    encoder: Encoder,
    width: u32,
    height: u32,
    keyframe_interval: u64,
    frames: u64,
}

impl VideoEncoder {
    pub fn new(width: u32, height: u32, fps: u32) -> Result<Self> {
        let encoder = Encoder::new()
            .map_err(|e| AppError::Media(format!("failed to create H264 encoder: {}", e)))?;
        Ok(Self {
            encoder,
            width,
            height,
            keyframe_interval: fps.max(1) as u64,
            frames: 0,
        })
    }

    /// Encode one frame to Annex B packets.
    pub fn encode(&mut self, frame: RawVideoFrame) -> Result<Vec<u8>> {
        if frame.width != self.width || frame.height != self.height {
            return Err(AppError::Media(format!(
                "frame size changed from {}x{} to {}x{}",
                self.width, self.height, frame.width, frame.height
            )));
        }
        let expected = (frame.width * frame.height * 3 / 2) as usize;
        if frame.data.len() != expected {
            return Err(AppError::Media(format!(
                "bad frame size: expected {} bytes, got {}",
                expected,
                frame.data.len()
            )));
        }

        if self.frames % self.keyframe_interval == 0 {
            self.encoder.force_intra_frame();
        }

        let yuv = YUVBuffer::from_vec(frame.data, self.width as usize, self.height as usize);
        let bitstream = self
            .encoder
            .encode(&yuv)
            .map_err(|e| AppError::Media(format!("H264 encode failed: {}", e)))?;
        self.frames += 1;
        Ok(bitstream.to_vec())
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }
}

/// Pump frames from the source into the pipe until stopped.
///
/// The pipe open blocks until the remux process picks up the read side,
/// which is why the subprocess is launched before any pump starts.
pub async fn pump_video(
    mut source: Box<dyn VideoFrameSource>,
    pipe: PathBuf,
    fps: u32,
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
        opened.map_err(|e| AppError::Media(format!("failed to open video pipe: {}", e)))?;

    info!("Waiting for first video frame from {}", uri);
    let first = tokio::select! {
        _ = stop.cancelled() => return Ok(()),
        received = timeout(FIRST_FRAME_TIMEOUT, source.next_frame()) => match received {
            Ok(Ok(frame)) => frame,
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(AppError::Media(
                    "timed out waiting for the first video frame".into(),
                ))
            }
        },
    };

    let mut encoder = VideoEncoder::new(first.width, first.height, fps)?;
    info!(
        "H264 encoder for {} initialized: {}x{} @ {}fps",
        uri, first.width, first.height, fps
    );

    let packets = encoder.encode(first)?;
    writer
        .write_all(&packets)
        .await
        .map_err(|e| AppError::Media(format!("video pipe write failed: {}", e)))?;
    writer.flush().await.ok();

    let mut consecutive_timeouts = 0u32;
    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            received = timeout(FRAME_TIMEOUT, source.next_frame()) => match received {
                Ok(Ok(frame)) => {
                    consecutive_timeouts = 0;
                    let packets = encoder.encode(frame)?;
                    writer
                        .write_all(&packets)
                        .await
                        .map_err(|e| AppError::Media(format!("video pipe write failed: {}", e)))?;
                    writer.flush().await.ok();

                    if encoder.frames() % (fps.max(1) as u64 * 10) == 0 {
                        debug!("{} video pump at frame {}", uri, encoder.frames());
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
                        "No video frame from {} for {}s",
                        uri,
                        FRAME_TIMEOUT.as_secs() * consecutive_timeouts as u64
                    );
                    if consecutive_timeouts >= MAX_CONSECUTIVE_TIMEOUTS {
                        return Err(AppError::Media(
                            "video frame timeout persisted, giving up".into(),
                        ));
                    }
                }
            },
        }
    }

    // End of stream: make sure everything buffered reaches the reader
    writer.shutdown().await.ok();
    info!("Video pump for {} stopped after {} frames", uri, encoder.frames());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    fn gray_frame(width: u32, height: u32) -> RawVideoFrame {
        RawVideoFrame {
            width,
            height,
            data: vec![128u8; (width * height * 3 / 2) as usize],
        }
    }

    struct ScriptedSource {
        frames: Vec<RawVideoFrame>,
    }

    #[async_trait]
    impl VideoFrameSource for ScriptedSource {
        async fn next_frame(&mut self) -> Result<RawVideoFrame> {
            match self.frames.pop() {
                Some(frame) => Ok(frame),
                None => {
                    futures::future::pending::<()>().await;
                    unreachable!()
                }
            }
        }
    }

    #[test]
    fn encoder_emits_annex_b() {
        let mut encoder = VideoEncoder::new(320, 240, 30).unwrap();
        let data = encoder.encode(gray_frame(320, 240)).unwrap();
        assert!(!data.is_empty());
        assert!(
            data.starts_with(&[0, 0, 0, 1]) || data.starts_with(&[0, 0, 1]),
            "expected Annex B start code"
        );
        assert_eq!(encoder.frames(), 1);
    }

    #[test]
    fn encoder_rejects_wrong_frame_size() {
        let mut encoder = VideoEncoder::new(320, 240, 30).unwrap();
        let mut frame = gray_frame(320, 240);
        frame.data.truncate(10);
        assert!(encoder.encode(frame).is_err());

        let other_size = gray_frame(640, 480);
        assert!(encoder.encode(other_size).is_err());
    }

    #[tokio::test]
    async fn pump_writes_encoded_frames_and_stops_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("video.out");

        // A regular file stands in for the fifo; open semantics are the same
        std::fs::File::create(&out).unwrap();

        let source = Box::new(ScriptedSource {
            frames: vec![gray_frame(320, 240); 5],
        });
        let stop = CancellationToken::new();

        let pump = tokio::spawn(pump_video(
            source,
            out.clone(),
            30,
            "cam1".into(),
            stop.clone(),
        ));

        // Let the pump drain the scripted frames, then stop it
        tokio::time::sleep(Duration::from_millis(500)).await;
        stop.cancel();
        let result = timeout(Duration::from_secs(5), pump).await.unwrap().unwrap();
        assert!(result.is_ok());

        let written = std::fs::read(&out).unwrap();
        assert!(!written.is_empty());
        assert!(written.starts_with(&[0, 0, 0, 1]) || written.starts_with(&[0, 0, 1]));
    }
}
