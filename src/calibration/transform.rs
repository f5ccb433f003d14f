use crate::calibration::WorkingCalibration;
use crate::geometry::{AxisPoint, PixelPoint};
use std::f64::consts::FRAC_PI_2;

/// Converts between pixel-space and mount-axis-space vectors using a
/// `WorkingCalibration`. Exact round-trip only when the two mount axes are
/// orthogonal (`y_angle_error == 0`); the magnitude of `y_angle_error` bounds
/// the round-trip error.
pub struct CoordinateTransform<'a> {
    working: &'a WorkingCalibration,
}

impl<'a> CoordinateTransform<'a> {
    pub fn new(working: &'a WorkingCalibration) -> Self {
        Self { working }
    }

    /// The round-trip error bound for this calibration: the magnitude of
    /// `y_angle_error`. Callers should warn when this exceeds a few degrees.
    pub fn round_trip_error_bound(&self) -> f64 {
        self.working.calibration.y_angle_error().abs()
    }

    pub fn camera_to_mount(&self, v: PixelPoint) -> AxisPoint {
        let hyp = v.distance();
        let theta = v.angle();
        let x_angle = self.working.calibration.x_angle;
        let y_angle_error = self.working.calibration.y_angle_error();

        AxisPoint::new(
            hyp * (theta - x_angle).cos(),
            hyp * (theta - (x_angle + y_angle_error)).sin(),
        )
    }

    pub fn mount_to_camera(&self, u: AxisPoint) -> PixelPoint {
        let hyp = u.distance();
        let mut theta_prime = u.y.atan2(u.x);
        let x_angle = self.working.calibration.x_angle;
        let y_angle_error = self.working.calibration.y_angle_error();

        if y_angle_error.abs() > FRAC_PI_2 {
            theta_prime = -theta_prime;
        }

        PixelPoint::new(
            hyp * (theta_prime + x_angle).cos(),
            hyp * (theta_prime + x_angle).sin(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::Calibration;
    use crate::enums::PierSide;
    use assert_float_eq::*;
    use std::f64::consts::{FRAC_PI_4, PI};

    fn working(x_angle: f64, y_angle: f64) -> WorkingCalibration {
        let cal = Calibration::new(
            x_angle,
            y_angle,
            1.0,
            1.0,
            0.0,
            PierSide::East,
            None,
            chrono::Utc::now(),
        );
        WorkingCalibration::new(cal)
    }

    #[test]
    fn round_trip_within_tolerance_s4() {
        let wc = working(FRAC_PI_4, 3. * FRAC_PI_4);
        let xform = CoordinateTransform::new(&wc);

        let v = PixelPoint::new(3., 4.);
        let axis = xform.camera_to_mount(v);
        assert_f64_near!(axis.distance(), 5.0, 20);
        assert_f64_near!(axis.x, 4.9497, 2000);
        assert_f64_near!(axis.y, 0.7071, 2000);

        let back = xform.mount_to_camera(axis);
        assert_f64_near!(back.x, 3.0, 20);
        assert_f64_near!(back.y, 4.0, 20);
    }

    #[test]
    fn round_trip_holds_for_any_nonzero_vector_when_orthogonal() {
        let wc = working(0.3, 0.3 + FRAC_PI_2);
        let xform = CoordinateTransform::new(&wc);
        for (dx, dy) in [(1., 0.), (0., 1.), (-2., 5.), (7., -3.), (-1., -1.)] {
            let v = PixelPoint::new(dx, dy);
            let back = xform.mount_to_camera(xform.camera_to_mount(v));
            assert_f64_near!(back.x, v.x, 1_000_000);
            assert_f64_near!(back.y, v.y, 1_000_000);
        }
    }

    #[test]
    fn inverse_sign_flip_when_axes_far_from_orthogonal() {
        // yAngleError > pi/2: x_angle=0, y_angle chosen so that
        // y_angle_error = x_angle - y_angle + pi/2 has magnitude > pi/2.
        let wc = working(0.0, -PI + 0.1);
        let xform = CoordinateTransform::new(&wc);
        assert!(xform.round_trip_error_bound() > FRAC_PI_2);
    }
}
