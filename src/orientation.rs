//! Orientation to rotation-angle mapping and the recording lock.

use crate::device::Connection;
use crate::frame::Rotation;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};

/// Interface orientation reported by the presentation layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterfaceOrientation {
    Portrait,
    PortraitUpsideDown,
    LandscapeLeft,
    LandscapeRight,
}

/// Which landscape orientation matches the sensor's native (0°) readout.
///
/// Fixed when the coordinator is built; it never changes during a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SensorMount {
    /// Landscape-right is 0°, landscape-left is 180°
    #[default]
    LandscapeRightNative,
    /// Landscape-left is 0°, landscape-right is 180°
    LandscapeLeftNative,
}

impl SensorMount {
    pub fn rotation_for(&self, orientation: InterfaceOrientation) -> Rotation {
        match (orientation, self) {
            (InterfaceOrientation::Portrait, _) => Rotation::Rotate90,
            (InterfaceOrientation::PortraitUpsideDown, _) => Rotation::Rotate270,
            (InterfaceOrientation::LandscapeRight, SensorMount::LandscapeRightNative)
            | (InterfaceOrientation::LandscapeLeft, SensorMount::LandscapeLeftNative) => {
                Rotation::Rotate0
            }
            (InterfaceOrientation::LandscapeLeft, SensorMount::LandscapeRightNative)
            | (InterfaceOrientation::LandscapeRight, SensorMount::LandscapeLeftNative) => {
                Rotation::Rotate180
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrientationLock {
    Unlocked,
    LockedForRecording { angle: Rotation },
}

/// Outcome of an orientation change notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrientationUpdate {
    /// The effective angle changed and should be reapplied to connections
    Changed(Rotation),
    Unchanged,
    /// Ignored because a recording holds the lock
    Suppressed,
}

#[derive(Debug)]
struct OrientationInner {
    orientation: InterfaceOrientation,
    angle: Rotation,
    lock: OrientationLock,
    pending: Option<InterfaceOrientation>,
}

/// Single source of truth for the rotation angle applied to every connection
#[derive(Debug)]
pub struct OrientationCoordinator {
    mount: SensorMount,
    inner: Mutex<OrientationInner>,
}

impl OrientationCoordinator {
    pub fn new(mount: SensorMount, initial: InterfaceOrientation) -> Self {
        Self {
            mount,
            inner: Mutex::new(OrientationInner {
                orientation: initial,
                angle: mount.rotation_for(initial),
                lock: OrientationLock::Unlocked,
                pending: None,
            }),
        }
    }

    pub fn mount(&self) -> SensorMount {
        self.mount
    }

    /// Angle currently in effect (the snapshot while locked)
    pub fn current_angle(&self) -> Rotation {
        let inner = self.inner.lock();
        match inner.lock {
            OrientationLock::LockedForRecording { angle } => angle,
            OrientationLock::Unlocked => inner.angle,
        }
    }

    pub fn orientation(&self) -> InterfaceOrientation {
        self.inner.lock().orientation
    }

    pub fn lock_state(&self) -> OrientationLock {
        self.inner.lock().lock
    }

    pub fn is_locked(&self) -> bool {
        matches!(self.lock_state(), OrientationLock::LockedForRecording { .. })
    }

    /// Record a new interface orientation
    pub fn update(&self, orientation: InterfaceOrientation) -> OrientationUpdate {
        let mut inner = self.inner.lock();
        if let OrientationLock::LockedForRecording { .. } = inner.lock {
            trace!("Orientation {:?} suppressed while recording", orientation);
            inner.pending = Some(orientation);
            return OrientationUpdate::Suppressed;
        }

        inner.orientation = orientation;
        let angle = self.mount.rotation_for(orientation);
        if angle == inner.angle {
            return OrientationUpdate::Unchanged;
        }

        debug!(
            "Orientation {:?} maps to {}°",
            orientation,
            angle.degrees()
        );
        inner.angle = angle;
        OrientationUpdate::Changed(angle)
    }

    /// Freeze the current angle for the duration of a recording
    pub fn lock_for_recording(&self) -> Rotation {
        let mut inner = self.inner.lock();
        if let OrientationLock::LockedForRecording { angle } = inner.lock {
            return angle;
        }
        let angle = inner.angle;
        inner.lock = OrientationLock::LockedForRecording { angle };
        info!("Orientation locked at {}° for recording", angle.degrees());
        angle
    }

    /// Release the recording lock, restoring the angle in effect when it was taken.
    /// Returns the restored angle and any orientation reported while locked.
    pub fn unlock(&self) -> (Rotation, Option<InterfaceOrientation>) {
        let mut inner = self.inner.lock();
        if let OrientationLock::LockedForRecording { angle } = inner.lock {
            inner.angle = angle;
            info!("Orientation unlocked, restored {}°", angle.degrees());
        }
        inner.lock = OrientationLock::Unlocked;
        (inner.angle, inner.pending.take())
    }

    /// Write the effective angle to every connection that supports it.
    /// Returns how many connections were updated.
    pub fn apply_to(&self, connections: &mut [Connection]) -> usize {
        let angle = self.current_angle();
        let mut applied = 0;
        for connection in connections.iter_mut() {
            if connection.set_rotation(angle) {
                applied += 1;
            } else {
                trace!(
                    "{:?} connection does not support {}°, left unchanged",
                    connection.output,
                    angle.degrees()
                );
            }
        }
        applied
    }
}
