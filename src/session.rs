// One video element, one metadata subscription, one sync state machine.
// Teardown (disable, detach, drop) releases the subscription and pending retry before returning.

use std::cell::RefCell;
use std::rc::Rc;

use crate::clock::Clock;
use crate::config::SyncConfig;
use crate::context::MetadataContext;
use crate::error::Result;
use crate::overlay::{build_overlay, OverlayTag};
use crate::source::{MetadataSource, SourceEvent, Subscription};
use crate::surface::{self, VideoSurface};
use crate::sync::MetadataSync;
use crate::types::{Resolution, SyncState, Timestamp};

/// Binds a [`MetadataSource`] to a [`MetadataSync`] for a single video element
/// and publishes every state change into a caller-owned [`MetadataContext`].
pub struct SyncSession<S, C>
where
    S: MetadataSource,
    C: Clock + Clone + 'static,
{
    source: S,
    clock: C,
    stream_resolution: Resolution,
    sync: Rc<RefCell<MetadataSync>>,
    context: MetadataContext,
    subscription: Option<Subscription>,
}

impl<S, C> SyncSession<S, C>
where
    S: MetadataSource,
    C: Clock + Clone + 'static,
{
    pub fn new(
        source: S,
        clock: C,
        stream_resolution: Resolution,
        config: SyncConfig,
        context: MetadataContext,
    ) -> Result<Self> {
        crate::bbox::validate_resolution("stream", stream_resolution)?;
        let sync = MetadataSync::new(config)?;
        Ok(SyncSession {
            source,
            clock,
            stream_resolution,
            sync: Rc::new(RefCell::new(sync)),
            context,
            subscription: None,
        })
    }

    /// Bind to a video element, replacing any previous one.
    ///
    /// An element that is not laid out yet reports `0x0`; it is bound anyway and
    /// picks up its real size on the next time update.
    pub fn attach(&mut self, surface: &impl VideoSurface) {
        self.sync.borrow_mut().attach_element(surface.rendered_size());
        self.ensure_subscribed();
        self.publish();
    }

    /// Element unmounted: tear everything down.
    pub fn detach(&mut self) {
        self.release();
        self.sync.borrow_mut().detach_element();
        self.context.reset();
    }

    /// Start synchronizing. The source is subscribed once an element is attached.
    pub fn enable(&mut self) {
        self.sync.borrow_mut().enable();
        self.ensure_subscribed();
        self.publish();
    }

    /// Stop synchronizing. No further state reaches the context after this returns.
    pub fn disable(&mut self) {
        self.release();
        self.sync.borrow_mut().disable();
        self.context.reset();
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription.is_some()
    }

    /// The element's `timeupdate` fired.
    pub fn on_time_update(&mut self, surface: &impl VideoSurface) {
        let (playback, size) = surface::sample(surface);
        {
            let mut sync = self.sync.borrow_mut();
            if !sync.is_active() {
                return;
            }
            // Hidden or collapsed elements report 0x0; keep the last real size.
            if size.is_positive() && sync.element_size() != Some(size) {
                sync.resize_element(size);
            }
            sync.on_time_update(playback, self.clock.now_ms());
        }
        self.publish();
    }

    /// The host seeked the element.
    pub fn on_seek(&mut self, playback: Timestamp) {
        self.sync.borrow_mut().on_seek(playback);
        self.publish();
    }

    /// Drive timers. Resubscribes once the reconnect deadline has passed.
    pub fn tick(&mut self) {
        let due = self.sync.borrow_mut().poll_retry(self.clock.now_ms());
        if due {
            tracing::info!("resubscribing to metadata source");
            self.release();
            self.ensure_subscribed();
            self.publish();
        }
    }

    pub fn state(&self) -> SyncState {
        self.sync.borrow().state().clone()
    }

    /// Live subscriptions plus scheduled retries.
    pub fn pending_resources(&self) -> usize {
        usize::from(self.subscription.is_some()) + self.sync.borrow().pending_timers()
    }

    /// Overlay tags for the currently applied frame. Empty while the element has no usable size.
    pub fn overlay(&self) -> Result<Vec<OverlayTag>> {
        let sync = self.sync.borrow();
        match sync.element_size() {
            Some(size) if size.is_positive() => {
                build_overlay(&sync.state().detections, self.stream_resolution, size)
            }
            _ => Ok(Vec::new()),
        }
    }

    fn ensure_subscribed(&mut self) {
        if self.subscription.is_none() && self.sync.borrow().is_active() {
            self.subscribe();
        }
    }

    fn subscribe(&mut self) {
        let weak = Rc::downgrade(&self.sync);
        let context = self.context.clone();
        let clock = self.clock.clone();

        let listener = Box::new(move |event: SourceEvent| {
            let Some(sync) = weak.upgrade() else {
                return;
            };
            let snapshot = {
                let mut sync = sync.borrow_mut();
                if !sync.is_active() {
                    return;
                }
                let now = clock.now_ms();
                match event {
                    SourceEvent::Frame(frame) => {
                        sync.ingest_frame(frame, now);
                    }
                    SourceEvent::Error(message) => sync.on_stream_error(&message, now),
                }
                sync.state().clone()
            };
            context.update(snapshot);
        });

        self.subscription = Some(self.source.subscribe(listener));
    }

    fn release(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.cancel();
        }
    }

    fn publish(&self) {
        let snapshot = self.sync.borrow().state().clone();
        self.context.update(snapshot);
    }
}

impl<S, C> Drop for SyncSession<S, C>
where
    S: MetadataSource,
    C: Clock + Clone + 'static,
{
    fn drop(&mut self) {
        self.release();
        self.sync.borrow_mut().disable();
        self.context.reset();
    }
}
