//! [`LogSurface`] – an [`OverlaySurface`] for headless hosts.
//!
//! There is no display to draw on, so every outline and label becomes a
//! structured log record. Useful for soak-testing the detection path against
//! a live publisher.

use meshlink_bridge::OverlaySurface;
use meshlink_types::Point3;
use tracing::{debug, info};

#[derive(Debug, Default)]
pub struct LogSurface {
    next_handle: u64,
    live: usize,
}

impl LogSurface {
    /// Artifacts created and not yet destroyed.
    pub fn live(&self) -> usize {
        self.live
    }

    fn allocate(&mut self) -> u64 {
        let handle = self.next_handle;
        self.next_handle += 1;
        self.live += 1;
        handle
    }
}

impl OverlaySurface for LogSurface {
    type Handle = u64;

    fn create_outline(&mut self, corners: [Point3; 4]) -> u64 {
        let handle = self.allocate();
        debug!(handle, ?corners, "outline");
        handle
    }

    fn create_label(&mut self, text: &str, position: Point3) -> u64 {
        let handle = self.allocate();
        info!(
            handle,
            label = text,
            x = position.x,
            y = position.y,
            z = position.z,
            "detected object"
        );
        handle
    }

    fn destroy(&mut self, handle: u64) {
        self.live = self.live.saturating_sub(1);
        debug!(handle, "overlay artifact destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_are_unique_and_live_count_tracks_destroy() {
        let mut surface = LogSurface::default();
        let outline = surface.create_outline([Point3::default(); 4]);
        let label = surface.create_label("cup", Point3::new(0.0, 0.02, 0.0));
        assert_ne!(outline, label);
        assert_eq!(surface.live(), 2);

        surface.destroy(outline);
        surface.destroy(label);
        assert_eq!(surface.live(), 0);
    }

    #[test]
    fn destroy_never_underflows() {
        let mut surface = LogSurface::default();
        surface.destroy(42);
        assert_eq!(surface.live(), 0);
    }
}
