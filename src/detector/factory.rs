//! Detector construction keyed on [`DetectorKind`].
//!
//! Hardware backends fail fast: a missing driver or port is an error at
//! construction, never a silent fallback to the mock.

use std::sync::Arc;
use std::time::Duration;

use log::info;

use super::Detector;
use super::mock::MockDetector;
use crate::config::{DetectorKind, DetectorSettings};
use crate::error::{Error, Result};

pub fn create(settings: &DetectorSettings) -> Result<Arc<dyn Detector>> {
    let return_window = Duration::from_millis(settings.return_window_ms);
    match settings.kind {
        DetectorKind::Mock => {
            info!("DETECTOR: using manual-trigger mock");
            Ok(Arc::new(MockDetector::new(return_window)))
        }
        DetectorKind::DorsetLid665v42 => dorset(settings, return_window),
    }
}

#[cfg(feature = "serial")]
fn dorset(settings: &DetectorSettings, return_window: Duration) -> Result<Arc<dyn Detector>> {
    use super::dorset::DorsetDetector;
    use crate::rfid::transport::{SerialTransport, Transport};

    let port = settings
        .port
        .clone()
        .filter(|p| !p.is_empty())
        .ok_or(Error::Init("dorset_lid665v42 requires detector.port"))?;
    let baud = settings.baud_rate;
    info!("DETECTOR: using Dorset LID665 v4.2 on {port} at {baud} baud");

    Ok(Arc::new(DorsetDetector::new(
        Box::new(move || {
            SerialTransport::open(&port, baud).map(|t| Box::new(t) as Box<dyn Transport>)
        }),
        settings.presence_timeout_ms.map(Duration::from_millis),
        return_window,
    )))
}

#[cfg(not(feature = "serial"))]
fn dorset(_settings: &DetectorSettings, _return_window: Duration) -> Result<Arc<dyn Detector>> {
    Err(Error::Init(
        "dorset_lid665v42 needs serial support; rebuild with the `serial` feature",
    ))
}
