use std::f64::consts::PI;
use std::f64::consts::TAU;

pub type Radians = f64;
pub type Pixels = f64;
pub type Milliseconds = f64;

/// Normalizes an angle into (-pi, pi].
pub fn normalize_angle(angle: Radians) -> Radians {
    let mut a = angle % TAU;
    if a <= -PI {
        a += TAU;
    } else if a > PI {
        a -= TAU;
    }
    a
}

/// A 2D point with a validity flag distinguishing "not yet measured" from
/// a real zero-valued reading.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
    valid: bool,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y, valid: true }
    }

    pub fn invalid() -> Self {
        Self {
            x: 0.,
            y: 0.,
            valid: false,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn distance(&self) -> f64 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    pub fn angle(&self) -> Radians {
        self.y.atan2(self.x)
    }

    pub fn distance_to(&self, other: &Point) -> f64 {
        (*self - *other).distance()
    }
}

impl std::ops::Sub for Point {
    type Output = Point;
    fn sub(self, rhs: Point) -> Point {
        Point::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl std::ops::Add for Point {
    type Output = Point;
    fn add(self, rhs: Point) -> Point {
        Point::new(self.x + rhs.x, self.y + rhs.y)
    }
}

/// A vector in camera pixel space.
pub type PixelPoint = Point;

/// A vector in mount-axis command space (RA/Dec or X/Y for an AO).
pub type AxisPoint = Point;

#[cfg(test)]
mod tests {
    use super::*;
    use assert_float_eq::*;

    #[test]
    fn normalize_wraps_into_range() {
        assert_f64_near!(normalize_angle(0.0), 0.0);
        assert_f64_near!(normalize_angle(PI), PI);
        assert_f64_near!(normalize_angle(PI + 0.1), -PI + 0.1);
        assert_f64_near!(normalize_angle(-PI - 0.1), PI - 0.1);
        assert_f64_near!(normalize_angle(3.0 * TAU + 0.2), 0.2);
    }

    #[test]
    fn invalid_point_reports_not_valid() {
        let p = Point::invalid();
        assert!(!p.is_valid());
        let q = Point::new(1., 2.);
        assert!(q.is_valid());
    }

    #[test]
    fn distance_and_angle() {
        let p = Point::new(3., 4.);
        assert_f64_near!(p.distance(), 5.0);
    }
}
