// Metadata sources and scoped subscriptions.
// Transport-agnostic: anything that can push normalized frames implements MetadataSource.

use std::cell::RefCell;
use std::f64::consts::PI;
use std::rc::Rc;

use crate::ingest::IngestedFrame;
use crate::types::*;

/// Event delivered to a subscriber.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceEvent {
    Frame(IngestedFrame),
    /// Transport failure; the subscriber decides whether and when to retry.
    Error(String),
}

pub type Listener = Box<dyn FnMut(SourceEvent)>;

/// Anything that pushes metadata frames.
pub trait MetadataSource {
    fn subscribe(&self, listener: Listener) -> Subscription;
}

/// Scoped registration with a source. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + 'static) -> Self {
        Subscription {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn cancel(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

type SharedListener = Rc<RefCell<Listener>>;

#[derive(Default)]
struct Listeners {
    next_id: u64,
    entries: Vec<(u64, SharedListener)>,
}

impl Listeners {
    fn add(&mut self, listener: Listener) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.push((id, Rc::new(RefCell::new(listener))));
        id
    }

    fn remove(&mut self, id: u64) {
        self.entries.retain(|(entry, _)| *entry != id);
    }

    fn contains(&self, id: u64) -> bool {
        self.entries.iter().any(|(entry, _)| *entry == id)
    }
}

/// Simulated object tracked by [`SimulatedSource`].
#[derive(Debug, Clone)]
struct SimTarget {
    class_id: u32,
    class_name: &'static str,
    track_id: u64,
    origin: (f64, f64),
    velocity: (f64, f64), // pixels per second
    size: (f64, f64),
}

/// Deterministic metadata generator standing in for a live UAV feed.
///
/// Frames are spaced `1000 / fps` ms apart on the media clock. Telemetry
/// follows a circular orbit; a few targets drift across a 1920x1080 stream.
#[derive(Clone)]
pub struct SimulatedSource {
    inner: Rc<RefCell<SimState>>,
}

struct SimState {
    listeners: Listeners,
    fps: f64,
    next_frame: u64,
    center: (f64, f64),
    targets: Vec<SimTarget>,
}

impl SimulatedSource {
    pub const STREAM_RESOLUTION: Resolution = Resolution {
        width: 1920.0,
        height: 1080.0,
    };

    pub fn new(fps: f64) -> Self {
        let targets = vec![
            SimTarget {
                class_id: 0,
                class_name: "person",
                track_id: 1,
                origin: (200.0, 600.0),
                velocity: (40.0, -5.0),
                size: (40.0, 90.0),
            },
            SimTarget {
                class_id: 2,
                class_name: "vehicle",
                track_id: 2,
                origin: (900.0, 300.0),
                velocity: (-60.0, 20.0),
                size: (160.0, 90.0),
            },
            SimTarget {
                class_id: 8,
                class_name: "boat",
                track_id: 3,
                origin: (1500.0, 800.0),
                velocity: (-15.0, -10.0),
                size: (220.0, 110.0),
            },
        ];

        SimulatedSource {
            inner: Rc::new(RefCell::new(SimState {
                listeners: Listeners::default(),
                fps: if fps.is_finite() && fps > 0.0 { fps } else { 30.0 },
                next_frame: 0,
                center: (48.137, 11.575),
                targets,
            })),
        }
    }

    pub fn listener_count(&self) -> usize {
        self.inner.borrow().listeners.entries.len()
    }

    /// Emit every frame whose media timestamp is `<= media_ms`.
    pub fn advance_to(&self, media_ms: f64) -> usize {
        let mut emitted = 0;
        loop {
            let frame = {
                let mut state = self.inner.borrow_mut();
                let ts_ms = state.next_frame as f64 * 1000.0 / state.fps;
                if ts_ms > media_ms {
                    break;
                }
                let frame = state.generate(state.next_frame, ts_ms);
                state.next_frame += 1;
                frame
            };
            self.emit(SourceEvent::Frame(IngestedFrame { frame, skipped: 0 }));
            emitted += 1;
        }
        emitted
    }

    /// Push an arbitrary frame to all subscribers.
    pub fn emit_frame(&self, frame: MetadataFrame) {
        self.emit(SourceEvent::Frame(IngestedFrame { frame, skipped: 0 }));
    }

    /// Simulate a transport failure.
    pub fn fail(&self, message: &str) {
        self.emit(SourceEvent::Error(message.to_string()));
    }

    fn emit(&self, event: SourceEvent) {
        // Snapshot so listeners may unsubscribe while being notified.
        let snapshot: Vec<(u64, SharedListener)> = self.inner.borrow().listeners.entries.clone();
        for (id, listener) in snapshot {
            if !self.inner.borrow().listeners.contains(id) {
                continue;
            }
            (listener.borrow_mut().as_mut())(event.clone());
        }
    }
}

impl SimState {
    fn generate(&self, n: u64, ts_ms: f64) -> MetadataFrame {
        let t = ts_ms / 1000.0;
        let angle = (t / 60.0) * 2.0 * PI;
        let telemetry = Telemetry {
            latitude: self.center.0 + 0.002 * angle.sin(),
            longitude: self.center.1 + 0.003 * angle.cos(),
            altitude: 120.0 + 5.0 * (angle * 3.0).sin(),
            heading: (angle.to_degrees() + 90.0).rem_euclid(360.0),
            roll: 8.0,
            pitch: -2.0 + (angle * 2.0).sin(),
        };

        let res = SimulatedSource::STREAM_RESOLUTION;
        let detections = self
            .targets
            .iter()
            .filter_map(|target| {
                let x = (target.origin.0 + target.velocity.0 * t).rem_euclid(res.width - target.size.0);
                let y = (target.origin.1 + target.velocity.1 * t).rem_euclid(res.height - target.size.1);
                // Each target drops out of view for one frame in seven.
                if (n + target.track_id) % 7 == 0 {
                    return None;
                }
                Some(Detection {
                    class_id: target.class_id,
                    class_name: target.class_name.to_string(),
                    confidence: 0.6 + 0.05 * ((n + target.track_id) % 7) as f64,
                    bbox: Some(BBox::new(x, y, x + target.size.0, y + target.size.1)),
                    track_id: Some(target.track_id),
                    geo_coordinates: Some(GeoCoordinates {
                        latitude: telemetry.latitude + (y - res.height / 2.0) * -1e-6,
                        longitude: telemetry.longitude + (x - res.width / 2.0) * 1e-6,
                        altitude: None,
                    }),
                })
            })
            .collect();

        MetadataFrame {
            frame_number: FrameNumber::new(n),
            timestamp: Timestamp::from_millis_f64(ts_ms),
            telemetry: Some(telemetry),
            detections,
        }
    }
}

impl MetadataSource for SimulatedSource {
    fn subscribe(&self, listener: Listener) -> Subscription {
        let id = self.inner.borrow_mut().listeners.add(listener);
        tracing::debug!(id, "simulated source subscriber added");
        let weak = Rc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.borrow_mut().listeners.remove(id);
                tracing::debug!(id, "simulated source subscriber removed");
            }
        })
    }
}
