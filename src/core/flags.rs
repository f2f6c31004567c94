use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::config::models::FeatureFlags;

/// Process-wide validation toggles. Written by config reloads and refreshes,
/// read by the interceptors on every exchange.
pub struct FeatureToggles {
    inner: ArcSwap<FeatureFlags>,
}

impl FeatureToggles {
    pub fn new(flags: FeatureFlags) -> Self {
        Self {
            inner: ArcSwap::from_pointee(flags),
        }
    }

    pub fn load(&self) -> FeatureFlags {
        **self.inner.load()
    }

    /// Replace the flags; returns true when they changed.
    pub fn store(&self, flags: FeatureFlags) -> bool {
        let previous = self.inner.swap(Arc::new(flags));
        if *previous != flags {
            tracing::info!(
                request_on = flags.request_validation_on,
                response_on = flags.response_validation_on,
                "Validation toggles updated"
            );
            true
        } else {
            false
        }
    }
}
