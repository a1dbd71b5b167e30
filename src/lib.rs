// overlay_core: Rust/WASM core for the UAV video overlay.
// Bounding-box rescaling and metadata-to-frame synchronization; JS owns transport and drawing.

mod backoff;
mod bbox;
mod buffer;
mod clock;
mod config;
mod context;
mod error;
mod ingest;
mod overlay;
mod session;
mod source;
mod stats;
mod surface;
mod sync;
mod types;

use wasm_bindgen::prelude::*;

pub use backoff::Backoff;
pub use bbox::{BBoxUtil, WasmBBoxUtil};
pub use buffer::{FrameBuffer, InsertOutcome};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{EngineConfig, SyncConfig};
pub use context::{MetadataContext, ObserverHandle};
pub use error::OverlayError;
pub use ingest::{normalize_bbox, normalize_frame, parse_batch, parse_frame, IngestedBatch, IngestedFrame};
pub use overlay::{build_overlay, label_for, OverlayTag};
pub use session::SyncSession;
pub use source::{Listener, MetadataSource, SimulatedSource, SourceEvent, Subscription};
pub use stats::RateEstimator;
pub use surface::{FixedSurface, VideoSurface};
pub use sync::MetadataSync;
pub use types::*;

/// Initialize panic hook and console logging.
#[wasm_bindgen(start)]
pub fn init() {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();

    // Safe to call again: a second call, or a host that installed its own subscriber, keeps the existing one.
    #[cfg(all(feature = "console_tracing", target_arch = "wasm32"))]
    {
        if !tracing::dispatcher::has_been_set() {
            let _ = wasm_tracing::set_as_global_default();
        }
    }
}

/// Overlay engine exposed to JavaScript.
/// The page pushes metadata and playback updates; reads back state and overlay tags as JSON.
#[wasm_bindgen]
pub struct OverlayEngine {
    sync: MetadataSync,
    stream_resolution: Resolution,
}

#[wasm_bindgen]
impl OverlayEngine {
    #[wasm_bindgen(constructor)]
    pub fn new(config_json: &str) -> std::result::Result<OverlayEngine, JsValue> {
        let config = EngineConfig::from_json(config_json).map_err(to_js)?;

        let mut sync = MetadataSync::new(config.sync).map_err(to_js)?;
        if let Some(size) = config.element_size {
            bbox::validate_resolution("video element", size).map_err(to_js)?;
            sync.attach_element(size);
        }

        Ok(OverlayEngine {
            sync,
            stream_resolution: config.stream_resolution,
        })
    }

    pub fn enable(&mut self) {
        self.sync.enable();
    }

    pub fn disable(&mut self) {
        self.sync.disable();
    }

    /// Bind to a newly mounted video element.
    pub fn attach_element(&mut self, width: f64, height: f64) -> std::result::Result<(), JsValue> {
        let size = Resolution::new(width, height);
        bbox::validate_resolution("video element", size).map_err(to_js)?;
        self.sync.attach_element(size);
        Ok(())
    }

    /// The element was unmounted.
    pub fn detach_element(&mut self) {
        self.sync.detach_element();
    }

    /// The same element was resized.
    pub fn set_element_size(&mut self, width: f64, height: f64) -> std::result::Result<(), JsValue> {
        let size = Resolution::new(width, height);
        bbox::validate_resolution("video element", size).map_err(to_js)?;
        self.sync.resize_element(size);
        Ok(())
    }

    pub fn set_stream_resolution(&mut self, width: f64, height: f64) -> std::result::Result<(), JsValue> {
        let res = Resolution::new(width, height);
        bbox::validate_resolution("stream", res).map_err(to_js)?;
        self.stream_resolution = res;
        Ok(())
    }

    /// Push one record or an array of records. Returns the number of frames buffered.
    /// Only unparseable JSON is an error; bad records and detections are skipped.
    pub fn push_metadata(&mut self, json: &str, now_ms: f64) -> std::result::Result<u32, JsValue> {
        let batch = parse_batch(json).map_err(to_js)?;
        let accepted = self.sync.ingest_batch(batch, now_ms);
        Ok(accepted as u32)
    }

    /// Report a transport failure. Never throws.
    pub fn report_stream_error(&mut self, message: &str, now_ms: f64) {
        self.sync.on_stream_error(message, now_ms);
    }

    /// True when the page should reconnect its metadata channel.
    pub fn poll_retry(&mut self, now_ms: f64) -> bool {
        self.sync.poll_retry(now_ms)
    }

    pub fn on_time_update(&mut self, playback_ms: f64, now_ms: f64) {
        self.sync
            .on_time_update(Timestamp::from_millis_f64(playback_ms), now_ms);
    }

    /// Read playback time and rendered size straight from the element.
    pub fn on_video_time_update(&mut self, video: &web_sys::HtmlVideoElement, now_ms: f64) {
        let (playback, size) = surface::sample(video);
        if size.is_positive() && self.sync.element_size() != Some(size) {
            self.sync.resize_element(size);
        }
        self.sync.on_time_update(playback, now_ms);
    }

    pub fn on_seek(&mut self, playback_ms: f64) {
        self.sync.on_seek(Timestamp::from_millis_f64(playback_ms));
    }

    /// Current SyncState as JSON.
    pub fn state_json(&self) -> std::result::Result<String, JsValue> {
        serde_json::to_string(self.sync.state())
            .map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))
    }

    /// Overlay tags for the current detections as JSON (empty array when nothing applies).
    pub fn overlay_json(&self) -> std::result::Result<String, JsValue> {
        let tags = match self.sync.element_size() {
            Some(size) if size.is_positive() => {
                build_overlay(&self.sync.state().detections, self.stream_resolution, size)
                    .map_err(to_js)?
            }
            _ => Vec::new(),
        };
        serde_json::to_string(&tags)
            .map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))
    }
}

fn to_js(err: OverlayError) -> JsValue {
    JsValue::from_str(&err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"{"stream_resolution":[1920,1080],"element_size":[960,540],"sync":{"tolerance_ms":60}}"#;

    fn record(n: u64, ms: u64) -> String {
        format!(
            r#"{{"frame_number":{n},"timestamp_ms":{ms},"telemetry":{{"latitude":1,"longitude":2,"altitude":3,"heading":4,"roll":5,"pitch":6}},"detections":[
                {{"class_id":0,"class_name":"person","confidence":0.9,"bbox":[100,100,200,300],"track_id":1}},
                {{"class_id":0,"class_name":"person","confidence":0.8,"track_id":2}}
            ]}}"#
        )
    }

    #[test]
    fn init_can_run_twice() {
        init();
        init();
    }

    #[test]
    fn engine_creation_works() {
        assert!(OverlayEngine::new(CONFIG).is_ok());
    }

    #[test]
    fn push_then_sync_produces_overlay() {
        let mut engine = OverlayEngine::new(CONFIG).unwrap();
        engine.enable();

        let batch = format!("[{},{},{}]", record(0, 0), record(1, 100), record(2, 200));
        assert_eq!(engine.push_metadata(&batch, 0.0).unwrap(), 3);
        engine.on_time_update(150.0, 10.0);

        let state: SyncState = serde_json::from_str(&engine.state_json().unwrap()).unwrap();
        assert_eq!(state.current_frame, Some(FrameNumber::new(1)));
        assert_eq!(state.sync_status, SyncStatus::Synced);
        assert_eq!(state.detection_count, 1);
        assert_eq!(state.skipped_detections, 3);

        let tags: Vec<OverlayTag> = serde_json::from_str(&engine.overlay_json().unwrap()).unwrap();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].bbox, BBox::new(50.0, 50.0, 100.0, 150.0));
        assert_eq!(tags[0].label, "person 90% #1");
    }

    #[test]
    fn disabled_engine_reports_idle() {
        let mut engine = OverlayEngine::new(CONFIG).unwrap();
        assert_eq!(engine.push_metadata(&record(0, 0), 0.0).unwrap(), 0);
        let state: SyncState = serde_json::from_str(&engine.state_json().unwrap()).unwrap();
        assert_eq!(state.sync_status, SyncStatus::Idle);
        assert_eq!(engine.overlay_json().unwrap(), "[]");
    }

    #[test]
    fn stream_errors_never_throw() {
        let mut engine = OverlayEngine::new(CONFIG).unwrap();
        engine.enable();
        engine.report_stream_error("closed", 0.0);
        assert!(!engine.poll_retry(100.0));
        assert!(engine.poll_retry(500.0));
        engine.disable();
        assert!(!engine.poll_retry(1e9));
    }

    #[test]
    fn element_lifecycle() {
        let mut engine =
            OverlayEngine::new(r#"{"stream_resolution":[1280,720]}"#).unwrap();
        engine.enable();
        let state: SyncState = serde_json::from_str(&engine.state_json().unwrap()).unwrap();
        assert_eq!(state.sync_status, SyncStatus::Idle);

        engine.attach_element(640.0, 360.0).unwrap();
        engine.set_element_size(320.0, 180.0).unwrap();
        engine.set_stream_resolution(1920.0, 1080.0).unwrap();
        let state: SyncState = serde_json::from_str(&engine.state_json().unwrap()).unwrap();
        assert_eq!(state.sync_status, SyncStatus::Waiting);

        engine.detach_element();
        let state: SyncState = serde_json::from_str(&engine.state_json().unwrap()).unwrap();
        assert_eq!(state.sync_status, SyncStatus::Idle);
    }
}
