//! Top-level guider state machine (4.9): orchestrates framing, star
//! locking, calibration, and closed-loop correction across a primary
//! actuator (the mount, or an AO when one is present) and an optional
//! secondary "bump" actuator, grounded on the overall shape of
//! `Guider::UpdateGuideState` and `Guider::SetState`.

pub mod ao_bump;

use crate::actuator::{Actuator, AoActuator, MountActuator};
use crate::backlash::measurement::{BacklashMeasurementEngine, MeasurementAction, MeasurementConfig, MeasurementResult};
use crate::backlash::BacklashCompensator;
use crate::calibration::engine_ao::AoCalibrationEngine;
use crate::calibration::engine_mount::{CalibrationAction, MountCalibrationEngine};
use crate::calibration::transform::CoordinateTransform;
use crate::calibration::WorkingCalibration;
use crate::enums::{DecDirection, Direction};
use crate::errors::{GuiderError, GuiderErrorKind, Result};
use crate::events::{Event, EventSink};
use crate::geometry::PixelPoint;
use crate::guide_algorithm::GuideAlgorithm;
use ao_bump::AoBumpController;
use chrono::{DateTime, Utc};
use std::sync::Arc;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum GuiderState {
    Uninitialized,
    Selecting,
    Selected,
    CalibratingPrimary,
    CalibratingSecondary,
    Calibrated,
    Guiding,
}

/// Composition struct from 9: a bare mount, or an AO as primary actuator
/// with the mount demoted to a secondary bump actuator (4.8).
pub enum ActuatorBinding<M, A> {
    MountOnly(M),
    WithAo { ao: A, mount: M },
}

impl<M, A> ActuatorBinding<M, A> {
    pub fn has_ao(&self) -> bool {
        matches!(self, ActuatorBinding::WithAo { .. })
    }
}

/// One frame's declination compensation bookkeeping: the direction a
/// compensated pulse was just sent in, so the *next* frame's residual error
/// can be fed back into the compensator once the correction has landed.
struct PendingResidual {
    direction: crate::enums::DecDirection,
}

pub struct Guider<M: MountActuator, A: AoActuator> {
    binding: ActuatorBinding<M, A>,
    state: GuiderState,
    primary_calibration: Option<WorkingCalibration>,
    secondary_calibration: Option<WorkingCalibration>,
    mount_cal_engine: Option<MountCalibrationEngine>,
    ao_cal_engine: Option<AoCalibrationEngine>,
    lock_position: Option<PixelPoint>,
    sticky_lock: bool,
    x_algo: Box<dyn GuideAlgorithm>,
    y_algo: Box<dyn GuideAlgorithm>,
    backlash: BacklashCompensator,
    bump: AoBumpController,
    events: Arc<dyn EventSink>,
    pending_residual: Option<PendingResidual>,
    min_move_dec: f64,
    backlash_measurement: Option<BacklashMeasurementEngine>,
}

impl<M: MountActuator, A: AoActuator> Guider<M, A> {
    pub fn new(
        binding: ActuatorBinding<M, A>,
        x_algo: Box<dyn GuideAlgorithm>,
        y_algo: Box<dyn GuideAlgorithm>,
        backlash: BacklashCompensator,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            binding,
            state: GuiderState::Uninitialized,
            primary_calibration: None,
            secondary_calibration: None,
            mount_cal_engine: None,
            ao_cal_engine: None,
            lock_position: None,
            sticky_lock: false,
            x_algo,
            y_algo,
            backlash,
            bump: AoBumpController::new(Default::default()),
            events,
            pending_residual: None,
            min_move_dec: 0.2,
            backlash_measurement: None,
        }
    }

    pub fn state(&self) -> GuiderState {
        self.state
    }

    pub fn set_sticky_lock(&mut self, sticky: bool) {
        self.sticky_lock = sticky;
    }

    pub fn begin_selecting(&mut self) {
        self.state = GuiderState::Selecting;
    }

    pub fn star_selected(&mut self, position: PixelPoint) {
        self.lock_position = Some(position);
        self.state = GuiderState::Selected;
        self.events.notify(Event::StarSelected { position });
        self.events.notify(Event::LockPositionSet { position });
    }

    /// `SetState(stop)` collapse rules (Testable Property 6): from
    /// uninitialized/selecting/selected, stays put (nothing to tear down);
    /// from calibrating-primary/-secondary, a partially-run calibration
    /// can't be resumed so the machine restarts at uninitialized; from
    /// calibrated/guiding, recalibration is unneeded so it drops to
    /// selected.
    pub async fn stop(&mut self) {
        self.state = match self.state {
            GuiderState::Uninitialized => GuiderState::Uninitialized,
            GuiderState::Selecting => GuiderState::Selecting,
            GuiderState::Selected => GuiderState::Selected,
            GuiderState::CalibratingPrimary | GuiderState::CalibratingSecondary => {
                self.mount_cal_engine = None;
                self.ao_cal_engine = None;
                GuiderState::Uninitialized
            }
            GuiderState::Calibrated | GuiderState::Guiding => GuiderState::Selected,
        };
        self.events.notify(Event::GuidingStop);
        self.guiding_ceases().await;
    }

    async fn guiding_ceases(&mut self) {
        match &mut self.binding {
            ActuatorBinding::MountOnly(mount) => {
                let _ = mount.guiding_ceases().await;
            }
            ActuatorBinding::WithAo { ao, mount } => {
                let _ = ao.guiding_ceases().await;
                let _ = mount.guiding_ceases().await;
            }
        }
        self.backlash.reset_baseline();
        self.pending_residual = None;
    }

    /// Installs a previously-persisted calibration directly, skipping the
    /// calibration state machine entirely -- used when a session resumes
    /// with a calibration record loaded from config rather than freshly
    /// measured.
    pub fn force_calibrated(&mut self, calibration: crate::calibration::Calibration) {
        self.primary_calibration = Some(WorkingCalibration::new(calibration));
        self.state = GuiderState::Calibrated;
    }

    pub fn begin_calibration_primary(&mut self, start_position: PixelPoint, config: crate::calibration::engine_mount::MountCalibrationConfig) {
        self.state = GuiderState::CalibratingPrimary;
        self.events.notify(Event::CalibrationStart);
        match &self.binding {
            ActuatorBinding::MountOnly(_) => {
                self.mount_cal_engine = Some(MountCalibrationEngine::new(config, start_position));
            }
            ActuatorBinding::WithAo { .. } => {
                self.ao_cal_engine = Some(AoCalibrationEngine::new(Default::default()));
            }
        }
    }

    /// Advances whichever calibration engine is active with the latest
    /// centroid, dispatching the returned action and handling completion or
    /// abort. Returns `true` once the active phase (primary or secondary)
    /// has completed.
    pub async fn step_calibration(
        &mut self,
        current_position: PixelPoint,
        declination: f64,
        pier_side: crate::enums::PierSide,
        rotator_angle: Option<f64>,
    ) -> Result<bool> {
        match self.state {
            GuiderState::CalibratingPrimary => self.step_primary_calibration(current_position, declination, pier_side, rotator_angle).await,
            GuiderState::CalibratingSecondary => self.step_secondary_calibration(current_position, declination, pier_side, rotator_angle).await,
            _ => Ok(false),
        }
    }

    async fn step_primary_calibration(
        &mut self,
        current_position: PixelPoint,
        declination: f64,
        pier_side: crate::enums::PierSide,
        rotator_angle: Option<f64>,
    ) -> Result<bool> {
        if let Some(engine) = self.mount_cal_engine.as_mut() {
            let action = match engine.step(current_position) {
                Ok(a) => a,
                Err(e) => {
                    self.state = GuiderState::Uninitialized;
                    self.mount_cal_engine = None;
                    self.events.notify(Event::CalibrationFailed { reason: e.to_string() });
                    return Err(e);
                }
            };
            if let CalibrationAction::Pulse(direction, ms) = action {
                let axis = engine.axis();
                let iteration = engine.iteration();
                if let ActuatorBinding::MountOnly(mount) = &self.binding {
                    let _ = mount.pulse(direction, ms).await;
                }
                self.events.notify(Event::CalibrationStep { axis, iteration });
            }
            if engine.is_complete() {
                let engine = self.mount_cal_engine.take().unwrap();
                let cal = engine.into_calibration(declination, pier_side, rotator_angle);
                if let Some(cal) = cal {
                    if cal.is_degenerate() {
                        tracing::warn!("degenerate mount calibration: orthogonality error exceeds 30 degrees");
                    }
                    self.primary_calibration = Some(WorkingCalibration::new(cal));
                }
                self.finish_calibration_phase();
                return Ok(true);
            }
            return Ok(false);
        }

        if let Some(engine) = self.ao_cal_engine.as_mut() {
            let action = match engine.step(current_position) {
                Ok(a) => a,
                Err(e) => {
                    self.state = GuiderState::Uninitialized;
                    self.ao_cal_engine = None;
                    self.events.notify(Event::CalibrationFailed { reason: e.to_string() });
                    return Err(e);
                }
            };
            if let CalibrationAction::Pulse(direction, count) = action {
                let axis = engine.axis();
                let iteration = engine.iteration();
                if let ActuatorBinding::WithAo { ao, .. } = &self.binding {
                    let _ = ao.step(direction, count).await;
                }
                self.events.notify(Event::CalibrationStep { axis, iteration });
            }
            if engine.is_complete() {
                tracing::debug!(error = engine.orthogonality_error(), "AO calibration orthogonality error");
                let engine = self.ao_cal_engine.take().unwrap();
                let cal = engine.into_calibration(declination, rotator_angle);
                if let Some(cal) = cal {
                    self.primary_calibration = Some(WorkingCalibration::new(cal));
                }
                self.finish_calibration_phase();
                return Ok(true);
            }
            return Ok(false);
        }

        Ok(false)
    }

    /// Only reached when the primary was an AO: the mount is calibrated
    /// second, as the secondary bump actuator.
    async fn step_secondary_calibration(
        &mut self,
        current_position: PixelPoint,
        declination: f64,
        pier_side: crate::enums::PierSide,
        rotator_angle: Option<f64>,
    ) -> Result<bool> {
        let engine = self.mount_cal_engine.as_mut().ok_or_else(|| {
            GuiderError::from_msg(GuiderErrorKind::CalibrationStarLost, "no secondary calibration engine active")
        })?;
        let action = match engine.step(current_position) {
            Ok(a) => a,
            Err(e) => {
                self.state = GuiderState::Uninitialized;
                self.mount_cal_engine = None;
                self.events.notify(Event::CalibrationFailed { reason: e.to_string() });
                return Err(e);
            }
        };
        if let CalibrationAction::Pulse(direction, ms) = action {
            let axis = engine.axis();
            let iteration = engine.iteration();
            if let ActuatorBinding::WithAo { mount, .. } = &self.binding {
                let _ = mount.pulse(direction, ms).await;
            }
            self.events.notify(Event::CalibrationStep { axis, iteration });
        }
        if engine.is_complete() {
            let engine = self.mount_cal_engine.take().unwrap();
            let cal = engine.into_calibration(declination, pier_side, rotator_angle);
            if let Some(cal) = cal {
                if cal.is_degenerate() {
                    tracing::warn!("degenerate secondary calibration: orthogonality error exceeds 30 degrees");
                }
                self.secondary_calibration = Some(WorkingCalibration::new(cal));
            }
            self.state = GuiderState::Calibrated;
            self.events.notify(Event::CalibrationComplete);
            return Ok(true);
        }
        Ok(false)
    }

    fn finish_calibration_phase(&mut self) {
        if self.binding.has_ao() && self.state == GuiderState::CalibratingPrimary && self.secondary_calibration.is_none() {
            self.state = GuiderState::CalibratingSecondary;
            self.mount_cal_engine = Some(MountCalibrationEngine::new(Default::default(), self.lock_position.unwrap_or(PixelPoint::new(0.0, 0.0))));
            self.events.notify(Event::CalibrationStart);
        } else {
            self.state = GuiderState::Calibrated;
            self.events.notify(Event::CalibrationComplete);
        }
    }

    fn mount_ref(&self) -> &M {
        match &self.binding {
            ActuatorBinding::MountOnly(m) => m,
            ActuatorBinding::WithAo { mount, .. } => mount,
        }
    }

    /// On entry to `guiding` (4.9): apply pointing-dependent calibration
    /// adjustments, set the lock position unless a sticky lock is
    /// configured, and reset per-axis guide algorithm history.
    pub async fn enter_guiding(&mut self, current_star: PixelPoint) -> Result<()> {
        if self.state != GuiderState::Calibrated {
            return Err(GuiderError::from_msg(
                GuiderErrorKind::StarLost,
                "enter_guiding called outside calibrated state",
            ));
        }
        let declination = self.mount_ref().declination().await;
        let pier_side = self.mount_ref().side_of_pier().await;
        if let Some(working) = self.primary_calibration.as_mut() {
            working.adjust_for_declination(declination);
            if working.calibration.pier_side != pier_side && !pier_side.is_unknown() {
                working.apply_pier_flip(self.mount_ref().dec_flip_inverts_declination());
            }
        }
        if let Some(working) = self.secondary_calibration.as_mut() {
            working.adjust_for_declination(declination);
        }

        if !self.sticky_lock || self.lock_position.is_none() {
            self.lock_position = Some(current_star);
            self.events.notify(Event::LockPositionSet { position: current_star });
        }
        self.x_algo.reset();
        self.y_algo.reset();
        self.backlash.reset_baseline();
        self.state = GuiderState::Guiding;
        self.events.notify(Event::GuidingStart);
        Ok(())
    }

    /// One frame of closed-loop correction (4.9 steps 1-8).
    pub async fn guide_frame(&mut self, star: PixelPoint) -> Result<()> {
        if self.state != GuiderState::Guiding {
            return Ok(());
        }
        if !star.is_valid() {
            self.events.notify(Event::StarLost);
            return Ok(());
        }

        let lock = match self.lock_position {
            Some(l) => l,
            None => {
                self.events.notify(Event::LockPositionLost);
                return Ok(());
            }
        };
        let pixel_error = star - lock;

        let working = self
            .primary_calibration
            .as_ref()
            .expect("guiding requires a primary calibration");
        let transform = CoordinateTransform::new(working);
        let axis_error = transform.camera_to_mount(pixel_error);

        if let Some(pending) = self.pending_residual.take() {
            self.backlash.observe_residual(
                pending.direction,
                axis_error.y,
                self.min_move_dec,
                working.calibration.y_rate,
            );
        }

        let x_out = self.x_algo.result(axis_error.x);
        let y_out = self.y_algo.result(axis_error.y);

        let x_direction = if x_out >= 0.0 { Direction::East } else { Direction::West };
        let y_direction = if y_out >= 0.0 { Direction::North } else { Direction::South };
        let x_ms = (x_out.abs() / working.current_x_rate + 0.5).floor() as u32;
        let mut y_ms = (y_out.abs() / working.calibration.y_rate + 0.5).floor() as u32;

        if let Some(dec_sign) = y_direction.dec_sign() {
            self.backlash.apply(dec_sign, y_out, &mut y_ms);
        }

        match &self.binding {
            ActuatorBinding::MountOnly(mount) => {
                if let Err(e) = mount.pulse(x_direction, x_ms).await {
                    tracing::warn!(error = %e, "x pulse failed");
                }
                if let Err(e) = mount.pulse(y_direction, y_ms).await {
                    tracing::warn!(error = %e, "y pulse failed");
                }
            }
            ActuatorBinding::WithAo { ao, mount } => {
                if let Err(e) = ao.step(x_direction, x_ms).await {
                    tracing::warn!(error = %e, "ao x step failed");
                }
                if let Err(e) = ao.step(y_direction, y_ms).await {
                    tracing::warn!(error = %e, "ao y step failed");
                }
                self.run_bump(ao, mount).await;
            }
        }

        if let Some(dec_sign) = y_direction.dec_sign() {
            if self.backlash.just_compensated() {
                self.pending_residual = Some(PendingResidual { direction: dec_sign });
            }
        }

        Ok(())
    }

    /// Hierarchical actuator binding (4.8): nudges the mount when the AO's
    /// smoothed position has wandered too far from center.
    async fn run_bump(&mut self, ao: &A, mount: &M) {
        let x_pos = ao.current_position(Direction::East).await;
        let y_pos = ao.current_position(Direction::North).await;
        let travel = crate::geometry::AxisPoint::new(
            ao.max_position(Direction::East) as f64,
            ao.max_position(Direction::North) as f64,
        );
        let position = crate::geometry::AxisPoint::new(x_pos as f64, y_pos as f64);
        let budget = crate::geometry::AxisPoint::new(travel.x * 0.01, travel.y * 0.01);
        let busy = mount.is_busy().await;
        let decision = self.bump.update(position, travel, budget, busy, chrono::Utc::now());

        if decision.warn_stalled {
            tracing::warn!("AO bump has not completed within the warning window");
        }

        if let Some(target) = decision.mount_target {
            let x_dir = if target.x >= 0.0 { Direction::East } else { Direction::West };
            let y_dir = if target.y >= 0.0 { Direction::North } else { Direction::South };
            let working = self.secondary_calibration.as_ref();
            let (x_rate, y_rate) = working
                .map(|w| (w.current_x_rate, w.calibration.y_rate))
                .unwrap_or((1.0, 1.0));
            let x_ms = (target.x.abs() / x_rate.max(1e-9) + 0.5).floor() as u32;
            let y_ms = (target.y.abs() / y_rate.max(1e-9) + 0.5).floor() as u32;
            let _ = mount.pulse(x_dir, x_ms).await;
            let _ = mount.pulse(y_dir, y_ms).await;
        }
    }

    /// Projects a pixel-space centroid onto the declination axis of the
    /// primary calibration, the coordinate the backlash measurement engine
    /// (4.5) reasons about. Falls back to the raw pixel y when no
    /// calibration is available yet (the engine is still exercised, just
    /// without a real transform).
    fn primary_axis_dec_position(&self, star: PixelPoint) -> f64 {
        match self.primary_calibration.as_ref() {
            Some(working) => {
                let lock = self.lock_position.unwrap_or(star);
                CoordinateTransform::new(working).camera_to_mount(star - lock).y
            }
            None => star.y,
        }
    }

    /// Starts the one-shot backlash measurement state machine (4.5) against
    /// the primary mount. Independent of `GuiderState`: per the source this
    /// is a standalone tool an operator runs, not a guider lifecycle state,
    /// so it can be kicked off from `calibrated` or `guiding` alike.
    pub fn begin_backlash_measurement(&mut self, config: MeasurementConfig, current_star: PixelPoint) {
        let axis_position = self.primary_axis_dec_position(current_star);
        let mut engine = BacklashMeasurementEngine::new(config);
        engine.start(axis_position);
        self.backlash_measurement = Some(engine);
    }

    pub fn backlash_measurement_active(&self) -> bool {
        self.backlash_measurement
            .as_ref()
            .map_or(false, |e| !e.is_terminal())
    }

    pub fn backlash_measurement_result(&self) -> Option<MeasurementResult> {
        self.backlash_measurement.as_ref().and_then(|e| e.result())
    }

    /// Advances the measurement engine with one frame's centroid, issuing at
    /// most one calibration-move pulse to the mount. Returns `true` once the
    /// engine has reached a terminal state (complete or aborted), at which
    /// point -- on a valid result -- the measured backlash is applied as the
    /// declination compensator's new baseline pulse width (4.5 wrapup).
    pub async fn step_backlash_measurement(
        &mut self,
        current_star: PixelPoint,
        now: DateTime<Utc>,
        near_edge: bool,
    ) -> Result<bool> {
        let axis_position = self.primary_axis_dec_position(current_star);
        let action = match self.backlash_measurement.as_mut() {
            Some(engine) => engine.step(axis_position, now, near_edge),
            None => return Ok(true),
        };

        if let MeasurementAction::Pulse(dec_direction, ms) = action {
            let direction = match dec_direction {
                DecDirection::Up => Direction::North,
                DecDirection::Down => Direction::South,
            };
            let mount = self.mount_ref();
            let _ = mount.pulse(direction, ms).await;
        }

        let engine = self.backlash_measurement.as_ref().unwrap();
        if !engine.is_terminal() {
            return Ok(false);
        }

        match engine.result() {
            Some(MeasurementResult::Valid) => {
                let bl_ms = engine.backlash_ms().max(0) as u32;
                self.backlash
                    .set_backlash_pulse(bl_ms, self.backlash.fixed_size(), self.backlash.ceiling_ms());
                tracing::info!(
                    backlash_ms = bl_ms,
                    sigma_px = engine.sigma_px(),
                    "backlash measurement complete"
                );
            }
            other => {
                tracing::warn!(result = ?other, "backlash measurement aborted without applying a result");
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::SimulatedActuator;
    use crate::backlash::BacklashCompensator;
    use crate::calibration::Calibration;
    use crate::enums::PierSide;
    use crate::events::NullEventSink;
    use crate::guide_algorithm::Identity;

    fn mount_with_calibration() -> (Guider<SimulatedActuator, SimulatedActuator>, PixelPoint) {
        let mount = SimulatedActuator::new_mount();
        let binding = ActuatorBinding::MountOnly(mount);
        let mut guider = Guider::new(
            binding,
            Box::new(Identity::new()),
            Box::new(Identity::new()),
            BacklashCompensator::new(200, false, 400, true),
            Arc::new(NullEventSink),
        );
        let cal = Calibration::new(0.0, std::f64::consts::FRAC_PI_2, 1.0, 1.0, 0.0, PierSide::East, None, chrono::Utc::now());
        guider.primary_calibration = Some(WorkingCalibration::new(cal));
        guider.state = GuiderState::Calibrated;
        (guider, PixelPoint::new(500.0, 500.0))
    }

    #[tokio::test]
    async fn enter_guiding_sets_lock_and_transitions() {
        let (mut guider, star) = mount_with_calibration();
        guider.enter_guiding(star).await.unwrap();
        assert_eq!(guider.state(), GuiderState::Guiding);
        assert_eq!(guider.lock_position, Some(star));
    }

    #[tokio::test]
    async fn guide_frame_is_noop_when_star_lost() {
        let (mut guider, star) = mount_with_calibration();
        guider.enter_guiding(star).await.unwrap();
        guider.guide_frame(PixelPoint::invalid()).await.unwrap();
        assert_eq!(guider.state(), GuiderState::Guiding);
    }

    #[tokio::test]
    async fn stop_from_guiding_collapses_to_selected() {
        let (mut guider, star) = mount_with_calibration();
        guider.enter_guiding(star).await.unwrap();
        guider.stop().await;
        assert_eq!(guider.state(), GuiderState::Selected);
    }

    #[tokio::test]
    async fn stop_from_calibrating_collapses_to_uninitialized() {
        let (mut guider, _star) = mount_with_calibration();
        guider.state = GuiderState::CalibratingPrimary;
        guider.stop().await;
        assert_eq!(guider.state(), GuiderState::Uninitialized);
    }

    #[tokio::test]
    async fn stop_from_selecting_is_a_noop_transition() {
        let (mut guider, _star) = mount_with_calibration();
        guider.state = GuiderState::Selecting;
        guider.stop().await;
        assert_eq!(guider.state(), GuiderState::Selecting);
    }
}
