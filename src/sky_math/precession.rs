use std::f64::consts::PI;
use chrono::NaiveDateTime;

use super::math::*;

fn cos360(x: f64) -> f64 {
    f64::cos(degree_to_radian(x))
}

fn sin360(x: f64) -> f64 {
    f64::sin(degree_to_radian(x))
}

// t1, t2 = (JD - 2451545) / 36525
fn prec_mat_equ(t1: f64, t2: f64) -> Matrix33 {
    const SEC: f64 = 3600.0;
    let dt = t2 - t1;
    let zeta = ((2306.2181 + (1.39656 - 0.000139 * t1) * t1) +
        ((0.30188 - 0.000345 * t1) + 0.017998 * dt) * dt) * dt / SEC;
    let z = zeta + ((0.79280 + 0.000411 * t1) + 0.000205 * dt) * dt * dt / SEC;
    let theta = ((2004.3109 - (0.85330 + 0.000217 * t1) * t1) -
        ((0.42665 + 0.000217 * t1) + 0.041833 * dt) * dt) * dt / SEC;
    let c1 = cos360(z);
    let c2 = cos360(theta);
    let c3 = cos360(zeta);
    let s1 = sin360(z);
    let s2 = sin360(theta);
    let s3 = sin360(zeta);
    Matrix33 {
        a11: -s1 * s3 + c1 * c2 * c3,
        a12: -s1 * c3 - c1 * c2 * s3,
        a13: -c1 * s2,
        a21:  c1 * s3 + s1 * c2 * c3,
        a22:  c1 * c3 - s1 * c2 * s3,
        a23: -s1 * s2,
        a31:  s2 * c3,
        a32: -s2 * s3,
        a33:  c2,
    }
}

/// Shifts column vector from mean to true equinox of date
fn nut_equ(t: f64, x: &mut f64, y: &mut f64, z: &mut f64) {
    const ARC: f64 = 3600.0*180.0/PI;
    const P2: f64 = 2.0 * PI;
    let ls = P2 * f64::fract(0.993133 + 99.997306 * t); // mean anomaly Sun
    let d = P2 * f64::fract(0.827362 + 1236.853087 * t); // diff. longitude Moon-Sun
    let f = P2 * f64::fract(0.259089 + 1342.227826 * t); // mean argument of latitude
    let n = P2 * f64::fract(0.347346 - 5.372447 * t); // longit. ascending node
    let eps = 0.4090928 - 2.2696E-4 * t; // obliquity of the ecliptic
    let dpsi = (
        -17.200 * f64::sin(n)
        - 1.319 * f64::sin(2.0 * (f - d + n))
        - 0.227 * f64::sin(2.0 * (f + n))
        + 0.206 * f64::sin(2.0 * n)
        + 0.143 * f64::sin(ls)
    ) / ARC;
    let deps = (
        9.203 * f64::cos(n)
        + 0.574 * f64::cos(2.0 * (f - d + n))
        + 0.098 * f64::cos(2.0 * (f + n))
        - 0.090 * f64::cos(2.0 * n)
    ) / ARC;
    let c = dpsi * f64::cos(eps);
    let s = dpsi * f64::sin(eps);
    let dx = -(c * *y + s * *z);
    let dy = c * *x - deps * *z;
    let dz = s * *x + deps * *y;
    *x += dx;
    *y += dy;
    *z += dz;
}

/// Precession and nutation matrix between epochs `t0` and `t`
pub fn pn_matrix(t0: f64, t: f64) -> Matrix33 {
    let mut m = prec_mat_equ(t0, t);
    nut_equ(t, &mut m.a11, &mut m.a21, &mut m.a31);
    nut_equ(t, &mut m.a12, &mut m.a22, &mut m.a32);
    nut_equ(t, &mut m.a13, &mut m.a23, &mut m.a33);
    m
}

/// Annual aberration offset of unit vector
pub fn aberrat(t: f64) -> Point3D {
    const P2: f64 = 2.0 * PI;
    let l = P2 * f64::rem_euclid(0.27908 + 100.00214 * t, 1.0);
    let cl = f64::cos(l);
    Point3D {
        x: -0.994E-4 * f64::sin(l),
        y: 0.912E-4 * cl,
        z: 0.395E-4 * cl,
    }
}

/// Converts J2000 catalog coordinates into apparent coordinates of date and back.
pub struct EpochCvt {
    pn_mat:  Matrix33,
    inv_mat: Matrix33,
    aberrat: Point3D,
}

impl EpochCvt {
    pub fn new(time: &NaiveDateTime) -> Self {
        let centuries0 = calc_julian_centuries(&j2000_time());
        let centuries = calc_julian_centuries(time);
        let pn_mat = pn_matrix(centuries0, centuries);
        let inv_mat = pn_mat.transposed();
        Self {
            pn_mat,
            inv_mat,
            aberrat: aberrat(centuries),
        }
    }

    pub fn to_jnow(&self, crd: &EqCoord<J2000>) -> EqCoord<JNow> {
        let pt = crd.to_sphere_pt();
        let mut pt = &pt * &self.pn_mat;
        pt.x += self.aberrat.x;
        pt.y += self.aberrat.y;
        pt.z += self.aberrat.z;
        EqCoord::from_sphere_pt(&pt)
    }

    pub fn to_j2000(&self, crd: &EqCoord<JNow>) -> EqCoord<J2000> {
        let mut pt = crd.to_sphere_pt();
        pt.x -= self.aberrat.x;
        pt.y -= self.aberrat.y;
        pt.z -= self.aberrat.z;
        pt.normalize();
        let pt = &pt * &self.inv_mat;
        EqCoord::from_sphere_pt(&pt)
    }
}

#[cfg(test)]
fn test_time() -> NaiveDateTime {
    chrono::NaiveDate::from_ymd_opt(2024, 3, 15).unwrap()
        .and_hms_opt(21, 30, 0).unwrap()
}

#[test]
fn test_epoch_at_j2000_is_almost_identity() {
    let cvt = EpochCvt::new(&j2000_time());
    let crd = EqCoord::<J2000>::new(16.695, 36.46);
    let jnow = cvt.to_jnow(&crd);
    // only nutation and aberration remain (tens of arcseconds)
    let diff = EqCoord::angle_between(&crd, &EqCoord::new(jnow.ra, jnow.dec));
    assert!(diff < 0.02, "diff={}", diff);
}

#[test]
fn test_epoch_precession_magnitude() {
    let cvt = EpochCvt::new(&test_time());
    let crd = EqCoord::<J2000>::new(0.0, 0.0);
    let jnow = cvt.to_jnow(&crd);
    // about 3.07 seconds of RA per year on equator at equinox
    let ra_shift_sec = jnow.ra * 3600.0;
    assert!(ra_shift_sec > 60.0 && ra_shift_sec < 90.0, "shift={}", ra_shift_sec);
    assert!(f64::abs(jnow.dec) < 0.2);
}

#[test]
fn test_epoch_round_trip() {
    let cvt = EpochCvt::new(&test_time());
    for (ra, dec) in [(0.5, 10.0), (5.5, -30.0), (12.0, 0.0), (16.695, 36.46), (2.53, 89.26), (20.0, -75.0)] {
        let crd = EqCoord::<J2000>::new(ra, dec);
        let back = cvt.to_j2000(&cvt.to_jnow(&crd));
        let diff = EqCoord::angle_between(&crd, &back);
        assert!(diff < 1e-5, "ra={}, dec={}, diff={}", ra, dec, diff);
    }
}
