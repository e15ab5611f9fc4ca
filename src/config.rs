//! Render tuning knobs.
//!
//! The values live on [`crate::context::Context`] and may be changed between
//! frames the same way the clear colour or tick duration is.

/// Instances farther than this from the camera eye are not put into the sorted
/// transparent pass. Their opaque layers are still drawn.
pub const TRANSPARENT_DISTANCE_CUTOFF: f32 = 256.0;

/// Alpha-test threshold used by layers with the one-bit-alpha blend mode.
pub const ALPHA_TEST_THRESHOLD: f32 = 0.75;

/// Layers whose combined alpha is at or below this are skipped in the transparent pass.
pub const MIN_VISIBLE_ALPHA: f32 = 0.01;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RenderConfig {
    pub transparent_cutoff_distance: f32,
    pub alpha_test_threshold: f32,
    pub min_visible_alpha: f32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            transparent_cutoff_distance: TRANSPARENT_DISTANCE_CUTOFF,
            alpha_test_threshold: ALPHA_TEST_THRESHOLD,
            min_visible_alpha: MIN_VISIBLE_ALPHA,
        }
    }
}

impl RenderConfig {
    pub fn with_transparent_cutoff(mut self, distance: f32) -> Self {
        self.transparent_cutoff_distance = distance;
        self
    }
}
