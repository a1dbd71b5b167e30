// The playable media surface the sync process reads from. Playback transport stays with the host.

use crate::types::{Resolution, Timestamp};

/// Read-only view of a video element.
pub trait VideoSurface {
    /// Current playback position in seconds.
    fn current_time(&self) -> f64;

    /// Size the element is rendered at, in CSS pixels.
    fn rendered_size(&self) -> Resolution;
}

/// Playback position and rendered size, sampled together.
pub fn sample(surface: &impl VideoSurface) -> (Timestamp, Resolution) {
    (
        Timestamp::from_secs_f64(surface.current_time()),
        surface.rendered_size(),
    )
}

impl VideoSurface for web_sys::HtmlVideoElement {
    fn current_time(&self) -> f64 {
        web_sys::HtmlMediaElement::current_time(self)
    }

    fn rendered_size(&self) -> Resolution {
        Resolution::new(self.client_width() as f64, self.client_height() as f64)
    }
}

/// Surface with fixed values, for hosts that track playback themselves.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedSurface {
    pub current_time: f64,
    pub rendered: Resolution,
}

impl VideoSurface for FixedSurface {
    fn current_time(&self) -> f64 {
        self.current_time
    }

    fn rendered_size(&self) -> Resolution {
        self.rendered
    }
}
