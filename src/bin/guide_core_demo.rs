//! Minimal end-to-end exercise of the guider core against a simulated mount.
//! Ambient test tooling, not a product surface: it exists so the crate has
//! something runnable without a real camera or mount driver behind it.

use guide_core::actuator::SimulatedActuator;
use guide_core::backlash::BacklashCompensator;
use guide_core::calibration::engine_mount::MountCalibrationConfig;
use guide_core::enums::PierSide;
use guide_core::events::RecordingEventSink;
use guide_core::geometry::PixelPoint;
use guide_core::guide_algorithm::GuideAlgorithmKind;
use guide_core::{ActuatorBinding, Guider, GuiderState};
use rand::Rng;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("guide_core=info".parse()?))
        .init();

    let mount = SimulatedActuator::new_mount();
    mount.set_pier_side(PierSide::East);
    let binding = ActuatorBinding::<SimulatedActuator, SimulatedActuator>::MountOnly(mount);
    let events = Arc::new(RecordingEventSink::new());

    let mut guider = Guider::new(
        binding,
        GuideAlgorithmKind::Hysteresis {
            aggression: 0.7,
            hysteresis: 0.1,
        }
        .build(),
        GuideAlgorithmKind::Lowpass2 {
            slope_weight: 5.0,
            min_move: 0.2,
        }
        .build(),
        BacklashCompensator::new(400, false, 600, true),
        events.clone(),
    );

    let lock = PixelPoint::new(512.0, 384.0);
    guider.begin_selecting();
    guider.star_selected(lock);
    tracing::info!(state = ?guider.state(), "star selected");

    // Drive a mount calibration with a synthetic diagonal drift per frame.
    // The engine only needs enough cumulative displacement per leg to
    // cross its distance threshold; it doesn't matter that this demo's
    // "star" doesn't actually track which leg (west, north, back-off) the
    // engine is currently driving.
    guider.begin_calibration_primary(lock, MountCalibrationConfig::default());
    let mut star = lock;
    let mut guard = 0;
    while guider.state() == GuiderState::CalibratingPrimary && guard < 500 {
        guard += 1;
        star.x -= 1.0;
        star.y += 0.3;
        let _ = guider
            .step_calibration(star, 0.0, PierSide::East, None)
            .await;
    }
    tracing::info!(state = ?guider.state(), "primary calibration finished");

    if guider.state() != GuiderState::Calibrated {
        tracing::error!("calibration did not complete, aborting demo");
        return Ok(());
    }

    guider.enter_guiding(lock).await?;
    tracing::info!("guiding started");

    // Feed a handful of frames with a small simulated drift plus centroid
    // measurement noise, so the guide algorithms and backlash compensator
    // both see something closer to a real seeing-limited exposure.
    let mut rng = rand::thread_rng();
    let mut drifted = lock;
    for frame in 0..10 {
        drifted.x += 0.3 + rng.gen_range(-0.05..0.05);
        drifted.y -= (if frame % 4 == 0 { 0.5 } else { 0.1 }) + rng.gen_range(-0.05..0.05);
        guider.guide_frame(drifted).await?;
    }

    guider.stop().await;
    tracing::info!(state = ?guider.state(), "stopped");

    for event in events.drain() {
        tracing::debug!(?event, "recorded event");
    }

    Ok(())
}
