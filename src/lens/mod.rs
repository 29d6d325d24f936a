//! Physical lens selection and digital zoom on top of the capture session.


use crate::device::CaptureDevice;
use crate::error::CameraError;
use crate::session::CaptureSessionController;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Largest gap between a requested factor and a lens's nominal factor that
/// still selects that lens
pub const DEFAULT_LENS_TOLERANCE: f64 = 0.1;
/// Zoom ramp speed in powers of two per second
pub const DEFAULT_RAMP_RATE: f64 = 4.0;

/// How a zoom request was satisfied
#[derive(Debug, Clone, PartialEq)]
pub enum LensSwitch {
    /// The input was replaced by another physical lens
    Swapped { device_id: String, nominal_zoom: f64 },
    /// Digital zoom on the current lens, after clamping
    Zoomed { zoom: f64 },
}

pub struct LensCoordinator {
    session: Arc<CaptureSessionController>,
    tolerance: f64,
    ramp_rate: f64,
}

impl LensCoordinator {
    pub fn new(session: Arc<CaptureSessionController>) -> Self {
        Self {
            session,
            tolerance: DEFAULT_LENS_TOLERANCE,
            ramp_rate: DEFAULT_RAMP_RATE,
        }
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance.abs();
        self
    }

    /// Lenses sharing the active lens's position, ordered by nominal factor
    pub async fn lenses(&self) -> Vec<CaptureDevice> {
        let Some(current) = self.session.parameters().await.map(|params| params.device) else {
            return Vec::new();
        };
        let mut lenses: Vec<CaptureDevice> = self
            .session
            .devices()
            .into_iter()
            .filter(|device| device.position == current.position)
            .collect();
        lenses.sort_by(|a, b| a.nominal_zoom.total_cmp(&b.nominal_zoom));
        lenses
    }

    /// Go to `factor` overall magnification.
    ///
    /// Swaps to the nearest physical lens when it differs from the current
    /// one and its nominal factor is within tolerance; otherwise ramps the
    /// digital zoom of the current lens. If the other lens cannot be opened
    /// the current lens stays active and the error is returned.
    pub async fn switch_to_lens(&self, factor: f64) -> Result<LensSwitch, CameraError> {
        let current = self
            .session
            .parameters()
            .await
            .ok_or_else(|| CameraError::setup_failed("session has no input device"))?
            .device;

        let lenses = self.lenses().await;
        let nearest = lenses.iter().min_by(|a, b| {
            (a.nominal_zoom - factor)
                .abs()
                .total_cmp(&(b.nominal_zoom - factor).abs())
        });

        if let Some(lens) = nearest {
            let gap = (lens.nominal_zoom - factor).abs();
            if lens.id != current.id && gap <= self.tolerance {
                info!(
                    "Switching lens {} -> {} for {:.2}x",
                    current.id, lens.id, factor
                );
                return match self.session.swap_input(&lens.id).await {
                    Ok(device) => Ok(LensSwitch::Swapped {
                        device_id: device.id,
                        nominal_zoom: device.nominal_zoom,
                    }),
                    Err(e) => {
                        warn!("Lens {} unavailable, keeping {}: {}", lens.id, current.id, e);
                        Err(e)
                    }
                };
            }
        }

        self.digital_zoom(&current, factor).await
    }

    /// Reach `factor` overall magnification on the current lens only,
    /// never swapping inputs
    pub async fn zoom_within_lens(&self, factor: f64) -> Result<LensSwitch, CameraError> {
        let current = self
            .session
            .parameters()
            .await
            .ok_or_else(|| CameraError::setup_failed("session has no input device"))?
            .device;
        self.digital_zoom(&current, factor).await
    }

    async fn digital_zoom(
        &self,
        current: &CaptureDevice,
        factor: f64,
    ) -> Result<LensSwitch, CameraError> {
        let digital = factor / current.nominal_zoom;
        debug!(
            "{:.2}x as {:.2}x digital zoom on {}",
            factor, digital, current.id
        );
        let zoom = self
            .session
            .set_zoom(digital, Some(self.ramp_rate))
            .await?;
        Ok(LensSwitch::Zoomed { zoom })
    }

    /// Set the digital zoom of the current lens directly, clamped to its range
    pub async fn set_zoom(&self, zoom: f64) -> Result<f64, CameraError> {
        self.session.set_zoom(zoom, None).await
    }
}
