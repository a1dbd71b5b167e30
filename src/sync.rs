// Metadata-to-playback synchronization for one video element.
// Sans-IO: callers feed frames, playback times, and wall-clock `now_ms`; this module never sleeps or spawns.
// Disabled -> Waiting -> Synced <-> Buffering/Behind; any -> Idle on teardown.

use crate::backoff::Backoff;
use crate::buffer::{FrameBuffer, InsertOutcome};
use crate::config::SyncConfig;
use crate::error::Result;
use crate::ingest::{IngestedBatch, IngestedFrame};
use crate::stats::RateEstimator;
use crate::types::*;

/// Synchronization state machine bridging an out-of-band metadata stream to video playback.
pub struct MetadataSync {
    config: SyncConfig,
    enabled: bool,
    element: Option<Resolution>,
    buffer: FrameBuffer,
    rate: RateEstimator,
    backoff: Backoff,
    applied: Option<MetadataFrame>,
    last_telemetry: Option<Telemetry>,
    newest_received: Option<Timestamp>,
    playback: Option<Timestamp>,
    // Stream error seen; cleared by the next good frame.
    reconnecting: bool,
    // Wall-clock deadline for the next reconnect attempt.
    retry_at: Option<f64>,
    dropped_frames: u64,
    skipped_detections: u64,
    state: SyncState,
}

impl MetadataSync {
    pub fn new(config: SyncConfig) -> Result<Self> {
        config.validate()?;
        Ok(MetadataSync {
            buffer: FrameBuffer::new(config.max_buffer_frames),
            rate: RateEstimator::new(config.rate_smoothing),
            backoff: Backoff::new(config.backoff_initial_ms, config.backoff_max_ms),
            config,
            enabled: false,
            element: None,
            applied: None,
            last_telemetry: None,
            newest_received: None,
            playback: None,
            reconnecting: false,
            retry_at: None,
            dropped_frames: 0,
            skipped_detections: 0,
            state: SyncState::default(),
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Enabled and bound to an element.
    pub fn is_active(&self) -> bool {
        self.enabled && self.element.is_some()
    }

    pub fn element_size(&self) -> Option<Resolution> {
        self.element
    }

    pub fn state(&self) -> &SyncState {
        &self.state
    }

    pub fn enable(&mut self) {
        if self.enabled {
            return;
        }
        tracing::info!(element = self.element.is_some(), "metadata sync enabled");
        self.enabled = true;
        self.recompute();
    }

    /// Turn synchronization off and drop everything derived from the stream.
    pub fn disable(&mut self) {
        if self.enabled {
            tracing::info!("metadata sync disabled");
        }
        self.enabled = false;
        self.reset();
    }

    /// Bind to a (new) video element. State from any previous element is discarded.
    pub fn attach_element(&mut self, rendered_size: Resolution) {
        if self.element.is_some() {
            tracing::debug!("video element replaced, resetting sync state");
        }
        self.element = Some(rendered_size);
        self.reset();
    }

    /// The same element changed its rendered size.
    pub fn resize_element(&mut self, rendered_size: Resolution) {
        match self.element {
            Some(ref mut size) => *size = rendered_size,
            None => self.attach_element(rendered_size),
        }
    }

    pub fn detach_element(&mut self) {
        self.element = None;
        self.reset();
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.rate.reset();
        self.backoff.reset();
        self.applied = None;
        self.last_telemetry = None;
        self.newest_received = None;
        self.playback = None;
        self.reconnecting = false;
        self.retry_at = None;
        self.dropped_frames = 0;
        self.skipped_detections = 0;
        self.state = SyncState::default();
        self.recompute();
    }

    /// Offer one frame. Returns `None` when synchronization is not active.
    pub fn ingest(&mut self, frame: MetadataFrame, now_ms: f64) -> Option<InsertOutcome> {
        if !self.is_active() {
            return None;
        }

        self.rate.record(now_ms);
        if self.reconnecting {
            tracing::info!(attempts = self.backoff.attempt(), "metadata stream recovered");
            self.reconnecting = false;
            self.retry_at = None;
            self.backoff.reset();
        }

        let ts = frame.timestamp;
        let frame_number = frame.frame_number.as_u64();
        let outcome = self.buffer.insert(frame);
        match outcome {
            InsertOutcome::Stale => {
                self.dropped_frames += 1;
                tracing::debug!(frame_number, timestamp_us = ts.as_micros(), "dropping stale frame");
            }
            InsertOutcome::Inserted | InsertOutcome::Replaced => {
                self.newest_received = Some(self.newest_received.map_or(ts, |n| n.max(ts)));
            }
        }

        self.recompute();
        Some(outcome)
    }

    /// Offer a normalized frame, counting the detections dropped during ingestion.
    pub fn ingest_frame(&mut self, ingested: IngestedFrame, now_ms: f64) -> Option<InsertOutcome> {
        if self.is_active() {
            self.skipped_detections += ingested.skipped as u64;
        }
        self.ingest(ingested.frame, now_ms)
    }

    /// Offer a batch; returns how many frames were buffered.
    pub fn ingest_batch(&mut self, batch: IngestedBatch, now_ms: f64) -> usize {
        batch
            .frames
            .into_iter()
            .filter_map(|frame| self.ingest_frame(frame, now_ms))
            .filter(|outcome| *outcome != InsertOutcome::Stale)
            .count()
    }

    /// Playback position changed (the element's `timeupdate`).
    pub fn on_time_update(&mut self, playback: Timestamp, _now_ms: f64) {
        if !self.is_active() {
            return;
        }

        if let Some(previous) = self.playback {
            if previous.millis_since(playback) > self.config.seek_threshold_ms {
                self.on_seek(playback);
                return;
            }
        }

        self.playback = Some(playback);
        self.recompute();
    }

    /// Playback jumped (seek or restart): buffered frames no longer apply.
    pub fn on_seek(&mut self, playback: Timestamp) {
        if !self.is_active() {
            return;
        }
        tracing::debug!(playback_us = playback.as_micros(), "seek detected, clearing frame buffer");
        self.buffer.clear();
        self.applied = None;
        self.newest_received = None;
        self.playback = Some(playback);
        self.recompute();
    }

    /// Transient failure on the metadata channel. Never fatal; schedules a reconnect.
    pub fn on_stream_error(&mut self, message: &str, now_ms: f64) {
        if !self.enabled {
            return;
        }
        let delay = self.backoff.next_delay();
        tracing::warn!(
            error = message,
            attempt = self.backoff.attempt(),
            retry_in_ms = delay,
            "metadata stream error"
        );
        self.reconnecting = true;
        self.retry_at = Some(now_ms + delay);
        self.recompute();
    }

    /// True once the reconnect deadline has passed; the caller should resubscribe.
    pub fn poll_retry(&mut self, now_ms: f64) -> bool {
        match self.retry_at {
            Some(deadline) if self.enabled && now_ms >= deadline => {
                self.retry_at = None;
                true
            }
            _ => false,
        }
    }

    /// Live timers owned by this instance.
    pub fn pending_timers(&self) -> usize {
        usize::from(self.retry_at.is_some())
    }

    fn recompute(&mut self) {
        let previous = self.state.sync_status;

        if !self.is_active() {
            self.state = SyncState::default();
            return;
        }

        let tolerance = self.config.tolerance_ms;
        let mut matched = false;

        if let Some(playback) = self.playback {
            let selected = self.buffer.select(playback, tolerance).cloned();
            if let Some(frame) = selected {
                matched = true;
                self.buffer.mark_applied(frame.timestamp);
                if frame.telemetry.is_some() {
                    self.last_telemetry = frame.telemetry;
                }
                self.applied = Some(frame);
            }
            let evicted = self.buffer.evict_before(playback.saturating_sub_millis(tolerance));
            if evicted > 0 {
                tracing::trace!(evicted, "evicted frames behind playback");
            }
        }

        let status = if self.reconnecting {
            SyncStatus::Waiting
        } else if matched {
            SyncStatus::Synced
        } else {
            match (self.playback, self.newest_received) {
                (Some(playback), Some(newest)) if newest > playback => SyncStatus::Buffering,
                (Some(_), Some(_)) => SyncStatus::Behind,
                _ => SyncStatus::Waiting,
            }
        };

        let age_ms = match (self.playback, self.applied.as_ref()) {
            (Some(playback), Some(frame)) => playback.millis_since(frame.timestamp),
            _ => 0.0,
        };

        // Playback stepped back behind the applied frame without crossing the seek threshold.
        // The frame is kept, its detections are not shown early.
        let ahead = age_ms < 0.0;

        let detections = match self.applied.as_ref() {
            Some(_) if ahead => Vec::new(),
            Some(frame) if age_ms <= self.config.staleness_ms => frame.detections.clone(),
            Some(frame) => {
                if previous == SyncStatus::Synced {
                    tracing::debug!(
                        frame_number = frame.frame_number.as_u64(),
                        age_ms,
                        "withholding stale detections"
                    );
                }
                Vec::new()
            }
            None => Vec::new(),
        };

        self.state = SyncState {
            current_frame: self.applied.as_ref().map(|f| f.frame_number),
            latency_ms: age_ms.max(0.0),
            buffer_size: self.buffer.pending_after(self.buffer.watermark()),
            metadata_rate: self.rate.rate(),
            sync_offset_ms: match (self.newest_received, self.playback) {
                (Some(newest), Some(playback)) => newest.millis_since(playback),
                _ => 0.0,
            },
            sync_status: status,
            detection_count: detections.len(),
            detections,
            telemetry: self.last_telemetry,
            dropped_frames: self.dropped_frames,
            skipped_detections: self.skipped_detections,
        };

        if status != previous {
            tracing::debug!(from = ?previous, to = ?status, "sync status changed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Timestamp {
        Timestamp::from_millis(v)
    }

    fn detection(name: &str) -> Detection {
        Detection {
            class_id: 1,
            class_name: name.to_string(),
            confidence: 0.9,
            bbox: Some(BBox::new(10.0, 10.0, 50.0, 50.0)),
            track_id: Some(7),
            geo_coordinates: None,
        }
    }

    fn frame(n: u64, at: u64) -> MetadataFrame {
        MetadataFrame {
            frame_number: FrameNumber::new(n),
            timestamp: ms(at),
            telemetry: Some(Telemetry {
                heading: n as f64,
                ..Default::default()
            }),
            detections: vec![detection("vehicle")],
        }
    }

    fn active(tolerance_ms: f64) -> MetadataSync {
        let mut sync = MetadataSync::new(SyncConfig {
            tolerance_ms,
            ..Default::default()
        })
        .unwrap();
        sync.attach_element(Resolution::new(640.0, 360.0));
        sync.enable();
        sync
    }

    #[test]
    fn disabled_is_idle_and_ignores_input() {
        let mut sync = MetadataSync::new(SyncConfig::default()).unwrap();
        assert_eq!(sync.state().sync_status, SyncStatus::Idle);
        assert_eq!(sync.ingest(frame(0, 0), 0.0), None);
        sync.on_time_update(ms(0), 0.0);
        assert_eq!(sync.state(), &SyncState::default());
    }

    #[test]
    fn enabled_without_element_stays_idle() {
        let mut sync = MetadataSync::new(SyncConfig::default()).unwrap();
        sync.enable();
        assert_eq!(sync.state().sync_status, SyncStatus::Idle);
    }

    #[test]
    fn attaching_waits_for_metadata() {
        let mut sync = active(60.0);
        assert_eq!(sync.state().sync_status, SyncStatus::Waiting);
        sync.on_time_update(ms(500), 0.0);
        assert_eq!(sync.state().sync_status, SyncStatus::Waiting);
        assert!(sync.state().detections.is_empty());
        assert_eq!(sync.state().telemetry, None);
    }

    #[test]
    fn selects_nearest_frame_not_after_playback() {
        let mut sync = active(60.0);
        for (n, at) in [(0, 0), (1, 100), (2, 200)] {
            sync.ingest(frame(n, at), 0.0);
        }
        sync.on_time_update(ms(150), 10.0);

        let state = sync.state();
        assert_eq!(state.current_frame, Some(FrameNumber::new(1)));
        assert_eq!(state.sync_status, SyncStatus::Synced);
        assert_eq!(state.latency_ms, 50.0);
        assert_eq!(state.buffer_size, 1);
        assert_eq!(state.sync_offset_ms, 50.0);
        assert_eq!(state.detection_count, 1);
        assert_eq!(state.telemetry.unwrap().heading, 1.0);
    }

    #[test]
    fn out_of_order_delivery_does_not_regress() {
        let mut sync = active(60.0);
        sync.ingest(frame(2, 200), 0.0);
        sync.on_time_update(ms(220), 5.0);
        assert_eq!(sync.state().current_frame, Some(FrameNumber::new(2)));

        assert_eq!(sync.ingest(frame(1, 100), 10.0), Some(InsertOutcome::Stale));
        sync.on_time_update(ms(240), 15.0);
        assert_eq!(sync.state().current_frame, Some(FrameNumber::new(2)));
        assert_eq!(sync.state().dropped_frames, 1);
    }

    #[test]
    fn small_backward_jitter_keeps_current_frame() {
        let mut sync = active(100.0);
        sync.ingest(frame(1, 100), 0.0);
        sync.ingest(frame(2, 200), 0.0);
        sync.on_time_update(ms(210), 0.0);
        sync.on_time_update(ms(150), 0.0);
        assert_eq!(sync.state().current_frame, Some(FrameNumber::new(2)));
    }

    #[test]
    fn backward_jitter_hides_detections_ahead_of_playback() {
        let mut sync = active(100.0);
        sync.ingest(frame(1, 100), 0.0);
        sync.ingest(frame(2, 200), 0.0);
        sync.on_time_update(ms(210), 0.0);
        assert_eq!(sync.state().detection_count, 1);

        sync.on_time_update(ms(150), 0.0);
        let state = sync.state();
        assert_eq!(state.current_frame, Some(FrameNumber::new(2)));
        assert_eq!(state.latency_ms, 0.0);
        assert_eq!(state.sync_status, SyncStatus::Buffering);
        assert!(state.detections.is_empty());
        assert_eq!(state.detection_count, 0);

        sync.on_time_update(ms(230), 0.0);
        let state = sync.state();
        assert_eq!(state.sync_status, SyncStatus::Synced);
        assert_eq!(state.latency_ms, 30.0);
        assert_eq!(state.detection_count, 1);
    }

    #[test]
    fn future_only_metadata_is_buffering() {
        let mut sync = active(60.0);
        sync.ingest(frame(10, 1_000), 0.0);
        sync.on_time_update(ms(500), 0.0);
        let state = sync.state();
        assert_eq!(state.sync_status, SyncStatus::Buffering);
        assert_eq!(state.current_frame, None);
        assert_eq!(state.buffer_size, 1);
        assert_eq!(state.sync_offset_ms, 500.0);
    }

    #[test]
    fn lagging_metadata_is_behind_then_withheld() {
        let mut sync = MetadataSync::new(SyncConfig {
            tolerance_ms: 60.0,
            staleness_ms: 500.0,
            seek_threshold_ms: 10_000.0,
            ..Default::default()
        })
        .unwrap();
        sync.attach_element(Resolution::new(640.0, 360.0));
        sync.enable();

        sync.ingest(frame(0, 0), 0.0);
        sync.on_time_update(ms(10), 0.0);
        assert_eq!(sync.state().sync_status, SyncStatus::Synced);

        sync.on_time_update(ms(300), 0.0);
        let state = sync.state();
        assert_eq!(state.sync_status, SyncStatus::Behind);
        assert_eq!(state.sync_offset_ms, -300.0);
        assert_eq!(state.detection_count, 1, "within staleness bound");

        sync.on_time_update(ms(900), 0.0);
        let state = sync.state();
        assert_eq!(state.sync_status, SyncStatus::Behind);
        assert!(state.detections.is_empty());
        assert_eq!(state.detection_count, 0);
        assert_eq!(state.current_frame, Some(FrameNumber::new(0)));
        assert!(state.telemetry.is_some());
    }

    #[test]
    fn large_backward_jump_is_a_seek() {
        let mut sync = active(60.0);
        sync.ingest(frame(50, 5_000), 0.0);
        sync.on_time_update(ms(5_010), 0.0);
        assert_eq!(sync.state().current_frame, Some(FrameNumber::new(50)));

        sync.on_time_update(ms(1_000), 0.0);
        assert_eq!(sync.state().current_frame, None);
        assert_eq!(sync.state().sync_status, SyncStatus::Waiting);

        // Earlier frames are accepted again after the seek.
        assert_eq!(sync.ingest(frame(10, 1_000), 0.0), Some(InsertOutcome::Inserted));
        assert_eq!(sync.state().current_frame, Some(FrameNumber::new(10)));
    }

    #[test]
    fn stream_error_waits_and_schedules_retry() {
        let mut sync = active(60.0);
        sync.ingest(frame(0, 0), 0.0);
        sync.on_time_update(ms(0), 0.0);

        sync.on_stream_error("socket closed", 1_000.0);
        assert_eq!(sync.state().sync_status, SyncStatus::Waiting);
        assert_eq!(sync.pending_timers(), 1);
        assert!(!sync.poll_retry(1_499.0));
        assert!(sync.poll_retry(1_500.0));
        assert!(!sync.poll_retry(1_600.0));
        assert_eq!(sync.pending_timers(), 0);

        sync.on_stream_error("still closed", 2_000.0);
        assert!(!sync.poll_retry(2_999.0));
        assert!(sync.poll_retry(3_000.0));

        sync.ingest(frame(1, 33), 3_100.0);
        sync.on_time_update(ms(40), 3_100.0);
        assert_eq!(sync.state().sync_status, SyncStatus::Synced);

        // Backoff starts over after recovery.
        sync.on_stream_error("again", 4_000.0);
        assert!(sync.poll_retry(4_500.0));
    }

    #[test]
    fn disable_resets_everything() {
        let mut sync = active(60.0);
        sync.ingest(frame(0, 0), 0.0);
        sync.on_time_update(ms(10), 0.0);
        sync.on_stream_error("boom", 0.0);

        sync.disable();
        assert_eq!(sync.state(), &SyncState::default());
        assert_eq!(sync.pending_timers(), 0);
        assert!(!sync.poll_retry(1e12));
    }

    #[test]
    fn element_replacement_discards_state() {
        let mut sync = active(60.0);
        sync.ingest(frame(0, 0), 0.0);
        sync.on_time_update(ms(10), 0.0);
        sync.attach_element(Resolution::new(1280.0, 720.0));
        assert_eq!(sync.state().current_frame, None);
        assert_eq!(sync.state().sync_status, SyncStatus::Waiting);

        sync.resize_element(Resolution::new(640.0, 360.0));
        assert_eq!(sync.element_size(), Some(Resolution::new(640.0, 360.0)));
    }

    #[test]
    fn rate_tracks_arrivals() {
        let mut sync = active(60.0);
        for n in 0..30 {
            sync.ingest(frame(n, n * 40), n as f64 * 40.0);
        }
        assert!((sync.state().metadata_rate - 25.0).abs() < 0.01);
    }

    #[test]
    fn batch_counts_skipped_detections() {
        let mut sync = active(60.0);
        let batch = IngestedBatch {
            frames: vec![
                IngestedFrame {
                    frame: frame(0, 0),
                    skipped: 2,
                },
                IngestedFrame {
                    frame: frame(1, 33),
                    skipped: 1,
                },
            ],
            rejected: 0,
        };
        assert_eq!(sync.ingest_batch(batch, 0.0), 2);
        assert_eq!(sync.state().skipped_detections, 3);
        assert_eq!(sync.state().buffer_size, 2);
    }
}
