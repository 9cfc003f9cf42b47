//! Transport reader loop
//!
//! A dedicated thread owns the opened device for the lifetime of a session.
//! Each iteration drains pending host-to-device commands (best-effort, so
//! control traffic never starves frame reads), then issues one bulk read
//! into the next buffer of a small fixed pool and feeds whatever arrived to
//! the stream assembler. Complete packets are routed by kind: video frames
//! into the bounded queue, pose and status into their last-write-wins
//! cells.
//!
//! A transfer timeout is normal while the link is idle; the loop only gives
//! up when no bytes arrive for the configured stall interval or the OS
//! reports an I/O failure. Either way the failure is reported to the
//! supervisor, which alone decides whether to retry.

use async_channel::{Receiver, Sender, TryRecvError};
use common::TransportError;
use protocol::{
    DeviceStatus, HostCommand, PacketKind, PoseSample, StreamAssembler, StreamEvent, WirePacket,
    decode_payload, encode_packet, encode_payload,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, trace, warn};

use crate::config::TransportSettings;
use crate::frame::{CompressedFrame, now_micros};
use crate::queue::FrameQueue;
use crate::state::SharedState;
use crate::supervisor::SupervisorEvent;

/// Blocking byte transport to the device
///
/// Implemented by [`crate::usb::TetherDevice`] over bulk transfers, and by
/// mock transports in tests and simulations.
pub trait Transport: Send {
    /// Read up to `buf.len()` bytes, waiting at most `timeout`
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError>;

    /// Write `data`, waiting at most `timeout`
    fn write(&mut self, data: &[u8], timeout: Duration) -> Result<usize, TransportError>;
}

/// Everything the reader thread needs for one session
pub(crate) struct ReaderContext {
    pub transport: Box<dyn Transport>,
    pub settings: TransportSettings,
    pub queue: Arc<FrameQueue>,
    pub shared: Arc<SharedState>,
    pub commands: Receiver<HostCommand>,
    pub events: Sender<SupervisorEvent>,
    pub stop: Arc<AtomicBool>,
}

/// Per-session reader state
struct ReaderState {
    assembler: StreamAssembler,
    last_data: Instant,
    last_video_sequence: Option<u64>,
    command_sequence: u64,
}

/// Reader thread entry point
pub(crate) fn run_reader(mut ctx: ReaderContext) {
    let mut pool: Vec<Vec<u8>> = (0..ctx.settings.read_buffer_count.max(1))
        .map(|_| vec![0u8; ctx.settings.read_buffer_len])
        .collect();
    let mut pool_index = 0;

    let mut state = ReaderState {
        assembler: StreamAssembler::new(),
        last_data: Instant::now(),
        last_video_sequence: None,
        command_sequence: 0,
    };

    let read_timeout = ctx.settings.read_timeout();
    let stall_timeout = ctx.settings.stall_timeout();

    let fatal = loop {
        if ctx.stop.load(Ordering::Acquire) {
            break None;
        }

        if let Err(e) = drain_commands(&mut ctx, &mut state.command_sequence) {
            break Some(e);
        }

        let pool_len = pool.len();
        let buf = &mut pool[pool_index];
        pool_index = (pool_index + 1) % pool_len;

        let read = match ctx.transport.read(buf, read_timeout) {
            Ok(n) => n,
            Err(TransportError::Timeout) => 0,
            Err(e) => break Some(e),
        };

        if read == 0 {
            let idle = state.last_data.elapsed();
            if idle >= stall_timeout {
                break Some(TransportError::Stalled {
                    idle_ms: idle.as_millis() as u64,
                });
            }
            continue;
        }

        state.last_data = Instant::now();
        ctx.shared.metrics.record_bytes_received(read as u64);

        for event in state.assembler.feed(&buf[..read]) {
            match event {
                StreamEvent::Packet(packet) => route_packet(&ctx, &mut state, packet),
                StreamEvent::Discard(reason) => {
                    ctx.shared.metrics.record_frame_corrupt();
                    debug!("dropped malformed wire data: {:?}", reason);
                }
            }
        }
    };

    if let Some(err) = fatal {
        error!("transport reader stopping: {}", err);
        let _ = ctx
            .events
            .send_blocking(SupervisorEvent::TransportFailed(err));
    } else {
        trace!("transport reader: stop requested, exiting");
    }

    // Wake the decoder so it can drain and exit
    ctx.queue.close();
}

fn route_packet(ctx: &ReaderContext, state: &mut ReaderState, packet: WirePacket) {
    match packet.header.kind {
        PacketKind::VideoFrame => {
            ctx.shared.metrics.record_frame_received();

            let sequence = packet.header.sequence;
            if let Some(last) = state.last_video_sequence {
                if sequence > last + 1 {
                    let missing = sequence - last - 1;
                    ctx.shared.metrics.record_sequence_gap(missing);
                    warn!("{} frame(s) missing before seq {}", missing, sequence);
                }
                state.last_video_sequence = Some(sequence.max(last));
            } else {
                state.last_video_sequence = Some(sequence);
            }

            let frame = CompressedFrame {
                sequence,
                timestamp_us: packet.header.timestamp_us,
                data: packet.payload,
            };
            if ctx.queue.push(frame).is_some() {
                ctx.shared.metrics.record_frame_dropped();
                trace!("decoder behind, displaced oldest queued frame");
            }
        }
        PacketKind::Pose => match decode_payload::<PoseSample>(&packet.payload) {
            Ok(pose) => {
                ctx.shared.metrics.record_pose_received();
                ctx.shared.publish_pose(pose);
            }
            Err(e) => {
                ctx.shared.metrics.record_frame_corrupt();
                debug!("undecodable pose payload: {}", e);
            }
        },
        PacketKind::Status => match decode_payload::<DeviceStatus>(&packet.payload) {
            Ok(status) => {
                trace!(
                    "device status: battery {}%, viewer {}x{} ipd {:.1}mm",
                    status.battery_percent,
                    status.viewer.width,
                    status.viewer.height,
                    status.viewer.ipd_mm
                );
                ctx.shared.publish_status(status);
            }
            Err(e) => {
                ctx.shared.metrics.record_frame_corrupt();
                debug!("undecodable status payload: {}", e);
            }
        },
        PacketKind::Command => {
            // Commands only flow host -> device
            debug!("ignoring command packet from device");
        }
    }
}

/// Send queued host commands, bounded per iteration so reads are never
/// starved by control traffic
fn drain_commands(ctx: &mut ReaderContext, sequence: &mut u64) -> Result<(), TransportError> {
    const MAX_DRAIN_PER_CYCLE: usize = 8;

    for _ in 0..MAX_DRAIN_PER_CYCLE {
        match ctx.commands.try_recv() {
            Ok(command) => send_command(ctx, command, sequence)?,
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
        }
    }
    Ok(())
}

/// Best-effort command write with a short retry budget
///
/// Only a vanished device is fatal; anything else is counted and the stream
/// carries on.
fn send_command(
    ctx: &mut ReaderContext,
    command: HostCommand,
    sequence: &mut u64,
) -> Result<(), TransportError> {
    *sequence += 1;

    let payload = match encode_payload(&command) {
        Ok(payload) => payload,
        Err(e) => {
            error!("failed to encode {:?}: {}", command, e);
            return Ok(());
        }
    };
    let packet = match encode_packet(PacketKind::Command, *sequence, now_micros(), &payload) {
        Ok(packet) => packet,
        Err(e) => {
            error!("failed to frame {:?}: {}", command, e);
            return Ok(());
        }
    };

    let timeout = ctx.settings.write_timeout();
    let attempts = ctx.settings.write_retries + 1;
    let mut last_error = TransportError::Timeout;

    for attempt in 1..=attempts {
        match ctx.transport.write(&packet, timeout) {
            Ok(_) => {
                ctx.shared.metrics.record_command_sent();
                trace!("sent {:?} (attempt {})", command, attempt);
                return Ok(());
            }
            Err(TransportError::Disconnected) => return Err(TransportError::Disconnected),
            Err(e) => {
                debug!("write attempt {} for {:?} failed: {}", attempt, command, e);
                last_error = e;
            }
        }
    }

    ctx.shared.metrics.record_write_failure();
    warn!(
        "giving up on {:?} after {} attempts: {}",
        command, attempts, last_error
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Scripted transport: hands out queued chunks, then times out
    struct ScriptedTransport {
        reads: VecDeque<Vec<u8>>,
        written: Vec<u8>,
        write_failures_left: usize,
    }

    impl ScriptedTransport {
        fn new(reads: Vec<Vec<u8>>) -> Self {
            Self {
                reads: reads.into(),
                written: Vec::new(),
                write_failures_left: 0,
            }
        }
    }

    impl Transport for ScriptedTransport {
        fn read(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<usize, TransportError> {
            match self.reads.pop_front() {
                Some(chunk) => {
                    buf[..chunk.len()].copy_from_slice(&chunk);
                    Ok(chunk.len())
                }
                None => Err(TransportError::Timeout),
            }
        }

        fn write(&mut self, data: &[u8], _timeout: Duration) -> Result<usize, TransportError> {
            if self.write_failures_left > 0 {
                self.write_failures_left -= 1;
                return Err(TransportError::Timeout);
            }
            self.written.extend_from_slice(data);
            Ok(data.len())
        }
    }

    fn test_context(
        transport: ScriptedTransport,
        commands: Receiver<HostCommand>,
    ) -> (ReaderContext, Arc<SharedState>, Arc<FrameQueue>) {
        let shared = Arc::new(SharedState::new());
        let queue = Arc::new(FrameQueue::new(3));
        let (events_tx, _events_rx) = async_channel::bounded(4);
        let mut settings = TransportSettings::default();
        settings.read_timeout_ms = 1;
        settings.stall_timeout_ms = 5;

        let ctx = ReaderContext {
            transport: Box::new(transport),
            settings,
            queue: queue.clone(),
            shared: shared.clone(),
            commands,
            events: events_tx,
            stop: Arc::new(AtomicBool::new(false)),
        };
        (ctx, shared, queue)
    }

    #[test]
    fn test_reader_routes_video_and_pose() {
        let mut wire = Vec::new();
        wire.extend_from_slice(
            &encode_packet(PacketKind::VideoFrame, 1, 100, &[0xAA; 64]).unwrap(),
        );
        let pose = PoseSample::identity(777);
        wire.extend_from_slice(
            &encode_packet(PacketKind::Pose, 1, 777, &encode_payload(&pose).unwrap()).unwrap(),
        );

        let (_commands_tx, commands_rx) = async_channel::bounded::<HostCommand>(4);
        let (ctx, shared, queue) =
            test_context(ScriptedTransport::new(vec![wire]), commands_rx);

        // Runs until the scripted reads are exhausted and the link stalls
        run_reader(ctx);

        let frame = queue.pop_timeout(Duration::ZERO).unwrap();
        assert_eq!(frame.sequence, 1);
        assert_eq!(frame.data.len(), 64);

        assert_eq!(shared.latest_pose().unwrap().timestamp_us, 777);

        let stats = shared.metrics.snapshot();
        assert_eq!(stats.frames_received, 1);
        assert_eq!(stats.poses_received, 1);
    }

    #[test]
    fn test_reader_counts_sequence_gaps() {
        let mut wire = Vec::new();
        for seq in [1u64, 2, 5] {
            wire.extend_from_slice(
                &encode_packet(PacketKind::VideoFrame, seq, seq, &[1; 16]).unwrap(),
            );
        }

        let (_commands_tx, commands_rx) = async_channel::bounded::<HostCommand>(4);
        let (ctx, shared, _queue) =
            test_context(ScriptedTransport::new(vec![wire]), commands_rx);
        run_reader(ctx);

        assert_eq!(shared.metrics.snapshot().sequence_gaps, 2);
    }

    #[test]
    fn test_reader_reports_stall() {
        let (_commands_tx, commands_rx) = async_channel::bounded::<HostCommand>(4);
        let shared = Arc::new(SharedState::new());
        let queue = Arc::new(FrameQueue::new(3));
        let (events_tx, events_rx) = async_channel::bounded(4);
        let mut settings = TransportSettings::default();
        settings.read_timeout_ms = 1;
        settings.stall_timeout_ms = 5;

        run_reader(ReaderContext {
            transport: Box::new(ScriptedTransport::new(vec![])),
            settings,
            queue: queue.clone(),
            shared,
            commands: commands_rx,
            events: events_tx,
            stop: Arc::new(AtomicBool::new(false)),
        });

        let event = events_rx.try_recv().unwrap();
        assert!(matches!(
            event,
            SupervisorEvent::TransportFailed(TransportError::Stalled { .. })
        ));
        assert!(queue.is_closed());
    }

    #[test]
    fn test_commands_written_before_reads() {
        let (commands_tx, commands_rx) = async_channel::bounded(4);
        commands_tx.send_blocking(HostCommand::StartStream).unwrap();

        let (ctx, shared, _queue) =
            test_context(ScriptedTransport::new(vec![]), commands_rx);
        run_reader(ctx);

        assert_eq!(shared.metrics.snapshot().commands_sent, 1);
    }

    #[test]
    fn test_write_failure_is_not_fatal() {
        let (commands_tx, commands_rx) = async_channel::bounded(4);
        commands_tx.send_blocking(HostCommand::StopStream).unwrap();

        let mut transport = ScriptedTransport::new(vec![]);
        // More failures than the retry budget allows
        transport.write_failures_left = 10;

        let (ctx, shared, _queue) = test_context(transport, commands_rx);
        run_reader(ctx);

        let stats = shared.metrics.snapshot();
        assert_eq!(stats.commands_sent, 0);
        assert_eq!(stats.write_failures, 1);
    }
}
