// Bounding-box rescaling from stream pixel space to rendered video element pixel space.
// Values are computed once at construction; a resized element needs a new instance.

use wasm_bindgen::prelude::*;

use crate::error::{self, OverlayError};
use crate::types::{BBox, Point, Resolution};

/// Immutable transform of one bounding box from the source stream resolution
/// onto the rendered size of the video element.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BBoxUtil {
    original: BBox,
    rescaled: BBox,
    center: Point,
    scale_x: f64,
    scale_y: f64,
}

impl BBoxUtil {
    /// Build the transform.
    ///
    /// Fails fast on non-finite input or on any resolution dimension `<= 0`.
    /// Inverted boxes (`x2 < x1`) are transformed as given; callers that care
    /// should check [`BBox::is_well_formed`] first.
    pub fn new(
        original_bbox: BBox,
        stream_resolution: Resolution,
        video_element_size: Resolution,
    ) -> error::Result<Self> {
        if !original_bbox.is_finite() {
            return Err(OverlayError::NonFinite("bounding box"));
        }
        validate_resolution("stream", stream_resolution)?;
        validate_resolution("video element", video_element_size)?;

        let scale_x = video_element_size.width / stream_resolution.width;
        let scale_y = video_element_size.height / stream_resolution.height;

        let rescaled = BBox::new(
            original_bbox.x1 * scale_x,
            original_bbox.y1 * scale_y,
            original_bbox.x2 * scale_x,
            original_bbox.y2 * scale_y,
        );

        // Not the geometric midpoint. Kept as-is for compatibility with existing overlays.
        let center = Point::new(
            (rescaled.x2 - rescaled.x1 / 2.0) + rescaled.x1,
            (rescaled.y2 - rescaled.y1 / 2.0) + rescaled.y1,
        );

        Ok(BBoxUtil {
            original: original_bbox,
            rescaled,
            center,
            scale_x,
            scale_y,
        })
    }

    pub fn original_bbox(&self) -> BBox {
        self.original
    }

    pub fn rescaled_bbox(&self) -> BBox {
        self.rescaled
    }

    /// Anchor point for overlay tag placement.
    pub fn center_point(&self) -> Point {
        self.center
    }

    /// `(scale_x, scale_y)` applied to the original box.
    pub fn scale_ratio(&self) -> (f64, f64) {
        (self.scale_x, self.scale_y)
    }
}

pub(crate) fn validate_resolution(which: &'static str, res: Resolution) -> error::Result<()> {
    if !res.width.is_finite() || !res.height.is_finite() {
        return Err(OverlayError::NonFinite(which));
    }
    if res.width <= 0.0 || res.height <= 0.0 {
        return Err(OverlayError::InvalidResolution {
            which,
            width: res.width,
            height: res.height,
        });
    }
    Ok(())
}

// =============================================================================
// WASM Bindings
// =============================================================================

/// WASM-exposed bounding-box transform for one-off conversions from JavaScript.
#[wasm_bindgen]
pub struct WasmBBoxUtil {
    inner: BBoxUtil,
}

#[wasm_bindgen]
impl WasmBBoxUtil {
    /// Create a transform from a box, the stream resolution and the rendered element size.
    ///
    /// # Returns
    /// An error string if any resolution dimension is not positive.
    #[wasm_bindgen(constructor)]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        x1: f64,
        y1: f64,
        x2: f64,
        y2: f64,
        stream_width: f64,
        stream_height: f64,
        element_width: f64,
        element_height: f64,
    ) -> std::result::Result<WasmBBoxUtil, JsValue> {
        let inner = BBoxUtil::new(
            BBox::new(x1, y1, x2, y2),
            Resolution::new(stream_width, stream_height),
            Resolution::new(element_width, element_height),
        )
        .map_err(|e| JsValue::from_str(&e.to_string()))?;

        Ok(WasmBBoxUtil { inner })
    }

    /// `[x1, y1, x2, y2]` as passed in.
    pub fn original_bbox(&self) -> Vec<f64> {
        self.inner.original_bbox().to_array().to_vec()
    }

    /// `[x1, y1, x2, y2]` in element pixels.
    pub fn rescaled_bbox(&self) -> Vec<f64> {
        self.inner.rescaled_bbox().to_array().to_vec()
    }

    /// `[x, y]` anchor in element pixels.
    pub fn center_point(&self) -> Vec<f64> {
        let c = self.inner.center_point();
        vec![c.x, c.y]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn res(w: f64, h: f64) -> Resolution {
        Resolution::new(w, h)
    }

    #[test]
    fn rescales_each_axis_independently() {
        let util = BBoxUtil::new(
            BBox::new(100.0, 50.0, 300.0, 250.0),
            res(1920.0, 1080.0),
            res(960.0, 270.0),
        )
        .unwrap();

        assert_eq!(util.scale_ratio(), (0.5, 0.25));
        assert_eq!(util.rescaled_bbox(), BBox::new(50.0, 12.5, 150.0, 62.5));
        assert_eq!(util.original_bbox(), BBox::new(100.0, 50.0, 300.0, 250.0));
    }

    #[test]
    fn center_point_uses_literal_formula() {
        let util = BBoxUtil::new(
            BBox::new(100.0, 50.0, 300.0, 250.0),
            res(1920.0, 1080.0),
            res(960.0, 270.0),
        )
        .unwrap();

        // x: (150 - 50/2) + 50 = 175, y: (62.5 - 12.5/2) + 12.5 = 68.75
        assert_eq!(util.center_point(), Point::new(175.0, 68.75));
        // The geometric midpoint would be (100, 37.5).
        assert_ne!(util.center_point(), Point::new(100.0, 37.5));
    }

    #[test]
    fn zero_stream_width_is_rejected() {
        let err = BBoxUtil::new(BBox::new(0.0, 0.0, 1.0, 1.0), res(0.0, 720.0), res(640.0, 360.0))
            .unwrap_err();
        assert!(matches!(err, OverlayError::InvalidResolution { which: "stream", .. }));
    }

    #[test]
    fn zero_stream_height_is_rejected() {
        let err = BBoxUtil::new(BBox::new(0.0, 0.0, 1.0, 1.0), res(1280.0, 0.0), res(640.0, 360.0))
            .unwrap_err();
        assert!(matches!(err, OverlayError::InvalidResolution { .. }));
    }

    #[test]
    fn negative_element_size_is_rejected() {
        let err = BBoxUtil::new(BBox::new(0.0, 0.0, 1.0, 1.0), res(1280.0, 720.0), res(-1.0, 360.0))
            .unwrap_err();
        assert!(matches!(err, OverlayError::InvalidResolution { which: "video element", .. }));
    }

    #[test]
    fn non_finite_box_is_rejected() {
        let err = BBoxUtil::new(
            BBox::new(f64::NAN, 0.0, 1.0, 1.0),
            res(1280.0, 720.0),
            res(640.0, 360.0),
        )
        .unwrap_err();
        assert_eq!(err, OverlayError::NonFinite("bounding box"));
    }

    #[test]
    fn inverted_box_is_tolerated() {
        let util = BBoxUtil::new(BBox::new(10.0, 10.0, 0.0, 0.0), res(100.0, 100.0), res(200.0, 200.0))
            .unwrap();
        assert_eq!(util.rescaled_bbox(), BBox::new(20.0, 20.0, 0.0, 0.0));
    }

    #[test]
    fn wasm_wrapper_exposes_arrays() {
        let util = WasmBBoxUtil::new(10.0, 20.0, 30.0, 40.0, 100.0, 100.0, 200.0, 50.0).unwrap();
        assert_eq!(util.original_bbox(), vec![10.0, 20.0, 30.0, 40.0]);
        assert_eq!(util.rescaled_bbox(), vec![20.0, 10.0, 60.0, 20.0]);
        assert_eq!(util.center_point(), vec![70.0, 25.0]);
    }

    fn coord() -> impl Strategy<Value = f64> {
        0.0f64..4096.0
    }

    fn dim() -> impl Strategy<Value = f64> {
        1.0f64..4096.0
    }

    proptest! {
        #[test]
        fn rescaled_coordinates_are_exact_products(
            x1 in coord(), y1 in coord(), x2 in coord(), y2 in coord(),
            sw in dim(), sh in dim(), tw in dim(), th in dim(),
        ) {
            let util = BBoxUtil::new(BBox::new(x1, y1, x2, y2), res(sw, sh), res(tw, th)).unwrap();
            let r = util.rescaled_bbox();
            prop_assert_eq!(r.x1, x1 * (tw / sw));
            prop_assert_eq!(r.y1, y1 * (th / sh));
            prop_assert_eq!(r.x2, x2 * (tw / sw));
            prop_assert_eq!(r.y2, y2 * (th / sh));
        }

        #[test]
        fn identical_resolutions_are_identity(
            x1 in coord(), y1 in coord(), x2 in coord(), y2 in coord(),
            w in dim(), h in dim(),
        ) {
            let bbox = BBox::new(x1, y1, x2, y2);
            let util = BBoxUtil::new(bbox, res(w, h), res(w, h)).unwrap();
            prop_assert_eq!(util.rescaled_bbox(), util.original_bbox());
        }

        #[test]
        fn center_matches_formula_on_rescaled_box(
            x1 in coord(), y1 in coord(), x2 in coord(), y2 in coord(),
            sw in dim(), sh in dim(), tw in dim(), th in dim(),
        ) {
            let util = BBoxUtil::new(BBox::new(x1, y1, x2, y2), res(sw, sh), res(tw, th)).unwrap();
            let r = util.rescaled_bbox();
            let c = util.center_point();
            prop_assert_eq!(c.x, (r.x2 - r.x1 / 2.0) + r.x1);
            prop_assert_eq!(c.y, (r.y2 - r.y1 / 2.0) + r.y1);
        }

        #[test]
        fn non_positive_dimension_always_fails(bad in -100.0f64..=0.0, good in dim()) {
            let bbox = BBox::new(0.0, 0.0, 1.0, 1.0);
            prop_assert!(BBoxUtil::new(bbox, res(bad, good), res(good, good)).is_err());
            prop_assert!(BBoxUtil::new(bbox, res(good, bad), res(good, good)).is_err());
        }
    }
}
