//! Frame decoder loop
//!
//! A dedicated thread pulls compressed frames from the bounded queue and
//! decompresses them into presentable pixel buffers. A corrupt JPEG is
//! counted and dropped; the previously published frame stays available to
//! the renderer and the loop never stops for it. A burst of decode errors
//! inside the rolling window escalates to a single pipeline-level warning,
//! since that usually means the device is sending an unexpected format.

use common::DecodeError;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

use crate::config::PipelineSettings;
use crate::frame::{CompressedFrame, DecodedFrame, FrameFormat, now_micros};
use crate::queue::FrameQueue;
use crate::state::SharedState;

/// How long the decoder sleeps on an empty queue before re-checking stop
const POP_TIMEOUT: Duration = Duration::from_millis(100);

/// Everything the decoder thread needs for one session
pub(crate) struct DecoderContext {
    pub queue: Arc<FrameQueue>,
    pub shared: Arc<SharedState>,
    pub settings: PipelineSettings,
    pub stop: Arc<AtomicBool>,
}

/// Decoder thread entry point
pub(crate) fn run_decoder(ctx: DecoderContext) {
    let window = Duration::from_secs(ctx.settings.decode_error_window_secs);
    let mut recent_errors: VecDeque<Instant> = VecDeque::new();
    let mut last_published: Option<u64> = None;

    loop {
        if ctx.stop.load(Ordering::Acquire) {
            break;
        }

        let Some(frame) = ctx.queue.pop_timeout(POP_TIMEOUT) else {
            if ctx.queue.is_closed() {
                break;
            }
            continue;
        };

        match decode_frame(&frame) {
            Ok(decoded) => {
                // The queue preserves arrival order, so this only guards
                // against a device re-sending an older frame
                if let Some(last) = last_published
                    && decoded.sequence < last
                {
                    trace!(
                        "skipping out-of-order frame {} (last published {})",
                        decoded.sequence, last
                    );
                    continue;
                }
                last_published = Some(decoded.sequence);
                ctx.shared.metrics.record_frame_decoded();
                ctx.shared.publish_frame(decoded);
            }
            Err(e) => {
                ctx.shared.metrics.record_decode_error();
                debug!("dropping undecodable frame {}: {}", frame.sequence, e);

                let now = Instant::now();
                recent_errors.push_back(now);
                while recent_errors
                    .front()
                    .is_some_and(|t| now.duration_since(*t) > window)
                {
                    recent_errors.pop_front();
                }
                if recent_errors.len() >= ctx.settings.decode_error_threshold {
                    warn!(
                        "{} decode errors within {}s; the device may be sending an unexpected stream format",
                        recent_errors.len(),
                        window.as_secs()
                    );
                    recent_errors.clear();
                }
            }
        }
    }

    trace!("frame decoder: loop exited");
}

/// Decompress one frame into a presentable pixel buffer
pub(crate) fn decode_frame(frame: &CompressedFrame) -> Result<DecodedFrame, DecodeError> {
    let mut decoder = jpeg_decoder::Decoder::new(frame.data.as_ref());
    let pixels = decoder
        .decode()
        .map_err(|e| DecodeError::Jpeg(e.to_string()))?;
    let info = decoder
        .info()
        .ok_or_else(|| DecodeError::Jpeg("decoder produced no image info".to_string()))?;

    let format = match info.pixel_format {
        jpeg_decoder::PixelFormat::RGB24 => FrameFormat::Rgb8,
        jpeg_decoder::PixelFormat::L8 => FrameFormat::Gray8,
        other => return Err(DecodeError::Unsupported(format!("{:?}", other))),
    };

    let width = info.width as u32;
    let height = info.height as u32;

    // Side-by-side stereo needs two equal eye halves
    if width % 2 != 0 {
        return Err(DecodeError::BadLayout { width });
    }

    Ok(DecodedFrame {
        sequence: frame.sequence,
        capture_timestamp_us: frame.timestamp_us,
        decode_timestamp_us: now_micros(),
        width,
        height,
        format,
        pixels,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use jpeg_encoder::{ColorType, Encoder};

    /// Encode a synthetic side-by-side stereo test image
    fn test_jpeg(width: u16, height: u16) -> Vec<u8> {
        let mut rgb = Vec::with_capacity(width as usize * height as usize * 3);
        for y in 0..height {
            for x in 0..width {
                // Left eye dark, right eye bright
                let value = if x < width / 2 { 40 } else { 200 };
                rgb.extend_from_slice(&[value, (y % 256) as u8, (x % 256) as u8]);
            }
        }

        let mut out = Vec::new();
        let encoder = Encoder::new(&mut out, 90);
        encoder
            .encode(&rgb, width, height, ColorType::Rgb)
            .expect("test image encodes");
        out
    }

    fn compressed(sequence: u64, data: Vec<u8>) -> CompressedFrame {
        CompressedFrame {
            sequence,
            timestamp_us: sequence * 16_666,
            data: Bytes::from(data),
        }
    }

    #[test]
    fn test_decode_valid_stereo_frame() {
        let frame = compressed(3, test_jpeg(64, 32));
        let decoded = decode_frame(&frame).unwrap();

        assert_eq!(decoded.sequence, 3);
        assert_eq!(decoded.width, 64);
        assert_eq!(decoded.height, 32);
        assert_eq!(decoded.eye_width(), 32);
        assert_eq!(decoded.format, FrameFormat::Rgb8);
        assert_eq!(decoded.pixels.len(), 64 * 32 * 3);

        // The stereo halves must land on the expected sides
        let stride = decoded.stride();
        let left = decoded.pixels[stride / 4];
        let right = decoded.pixels[stride / 4 * 3];
        assert!(left < 128, "left half should be dark, got {}", left);
        assert!(right > 128, "right half should be bright, got {}", right);
    }

    #[test]
    fn test_decode_garbage_fails_cleanly() {
        let frame = compressed(1, vec![0xDE, 0xAD, 0xBE, 0xEF, 0x00, 0x01]);
        let result = decode_frame(&frame);
        assert!(matches!(result, Err(DecodeError::Jpeg(_))));
    }

    #[test]
    fn test_decode_truncated_jpeg_fails_cleanly() {
        let mut data = test_jpeg(64, 32);
        data.truncate(data.len() / 2);

        let result = decode_frame(&compressed(1, data));
        assert!(matches!(result, Err(DecodeError::Jpeg(_))));
    }

    #[test]
    fn test_decode_odd_width_rejected() {
        let result = decode_frame(&compressed(1, test_jpeg(63, 32)));
        assert!(matches!(
            result,
            Err(DecodeError::BadLayout { width: 63 })
        ));
    }

    #[test]
    fn test_decoder_loop_survives_corrupt_frame() {
        let shared = Arc::new(SharedState::new());
        let queue = Arc::new(FrameQueue::new(4));

        queue.push(compressed(1, test_jpeg(16, 8)));
        queue.push(compressed(2, b"not a jpeg".to_vec()));
        queue.push(compressed(3, test_jpeg(16, 8)));
        queue.close();

        run_decoder(DecoderContext {
            queue,
            shared: shared.clone(),
            settings: PipelineSettings::default(),
            stop: Arc::new(AtomicBool::new(false)),
        });

        let stats = shared.metrics.snapshot();
        assert_eq!(stats.frames_decoded, 2);
        assert_eq!(stats.decode_errors, 1);

        // The corrupt frame never displaced the published one
        assert_eq!(shared.latest_frame().unwrap().sequence, 3);
    }

    #[test]
    fn test_decoder_publishes_in_order() {
        let shared = Arc::new(SharedState::new());
        let queue = Arc::new(FrameQueue::new(8));

        for seq in 1..=5 {
            queue.push(compressed(seq, test_jpeg(16, 8)));
        }
        queue.close();

        run_decoder(DecoderContext {
            queue,
            shared: shared.clone(),
            settings: PipelineSettings::default(),
            stop: Arc::new(AtomicBool::new(false)),
        });

        assert_eq!(shared.metrics.snapshot().frames_decoded, 5);
        assert_eq!(shared.latest_frame().unwrap().sequence, 5);
    }
}
