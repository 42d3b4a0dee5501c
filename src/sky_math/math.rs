use std::{f64::consts::PI, fmt::Debug, marker::PhantomData, ops::Mul};
use chrono::{Datelike, Timelike, NaiveDateTime, NaiveDate};

use super::sexagesimal::{degrees_to_sexagesimal, DelimiterStyle};

/// Pixel coordinate the finder boresight is referenced to (center of 1280x960 frame)
pub const FRAME_CENTER: (f64, f64) = (640.0, 480.0);

pub trait Epoch: Copy + Default + PartialEq + Debug + 'static {
    const NAME: &'static str;
}

/// Catalog epoch of plate solver results
#[derive(Clone, Copy, Default, PartialEq, Debug)]
pub struct J2000;

impl Epoch for J2000 {
    const NAME: &'static str = "J2000";
}

/// Current epoch (true equator and equinox of date) as used by the mount
#[derive(Clone, Copy, Default, PartialEq, Debug)]
pub struct JNow;

impl Epoch for JNow {
    const NAME: &'static str = "JNow";
}

#[derive(Clone, Copy, PartialEq)]
pub struct EqCoord<E: Epoch> {
    pub ra:  f64, // in hours
    pub dec: f64, // in degrees
    epoch:   PhantomData<E>,
}

impl<E: Epoch> Default for EqCoord<E> {
    fn default() -> Self {
        Self::new(0.0, 0.0)
    }
}

impl<E: Epoch> EqCoord<E> {
    pub fn new(ra: f64, dec: f64) -> Self {
        Self { ra: normalize_hours(ra), dec, epoch: PhantomData }
    }

    /// Angle between two points of sky in degrees
    pub fn angle_between(crd1: &Self, crd2: &Self) -> f64 {
        let dec1 = degree_to_radian(crd1.dec);
        let dec2 = degree_to_radian(crd2.dec);
        let sin_diff_dec = f64::sin((dec2 - dec1) / 2.0);
        let sin_diff_ra = f64::sin((hour_to_radian(crd2.ra) - hour_to_radian(crd1.ra)) / 2.0);
        let root_expr =
            sin_diff_dec * sin_diff_dec +
            f64::cos(dec1) * f64::cos(dec2) * sin_diff_ra * sin_diff_ra;
        radian_to_degree(2.0 * f64::asin(f64::sqrt(root_expr).min(1.0)))
    }

    //  dec:           ra:
    //  ^Z             ^X
    //  |   *          |   *
    //  |  /           |ra/
    //  | /            | /
    //  |/ dec         |/
    //  *--------XY    O-------->Y
    pub fn to_sphere_pt(&self) -> Point3D {
        let ra = hour_to_radian(self.ra);
        let dec = degree_to_radian(self.dec);
        let rcst = f64::cos(dec);
        Point3D {
            x: rcst * f64::cos(ra),
            y: rcst * f64::sin(ra),
            z: f64::sin(dec)
        }
    }

    pub fn from_sphere_pt(pt: &Point3D) -> Self {
        let dec = f64::atan2(pt.z, f64::sqrt(pt.x * pt.x + pt.y * pt.y));
        let mut ra = f64::atan2(pt.y, pt.x);
        if ra < 0.0 {
            ra += 2.0 * PI;
        }
        Self::new(radian_to_hour(ra), radian_to_degree(dec))
    }
}

impl<E: Epoch> Debug for EqCoord<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct(&format!("EqCoord<{}>", E::NAME))
            .field("ra", &degrees_to_sexagesimal(self.ra, false, DelimiterStyle::Colon))
            .field("dec", &degrees_to_sexagesimal(self.dec, true, DelimiterStyle::Colon))
            .finish()
    }
}

#[test]
fn test_eq_coord_to_sphere() {
    let test = |crd: EqCoord<J2000>| {
        let mut pt = crd.to_sphere_pt();

        pt.x *= 0.5;
        pt.y *= 0.5;
        pt.z *= 0.5;

        let crd_from = EqCoord::<J2000>::from_sphere_pt(&pt);
        assert!(f64::abs(crd.dec - crd_from.dec) < 1e-8);
        assert!(f64::abs(crd.ra - crd_from.ra) < 1e-8);
    };

    test(EqCoord::new(0.0, 0.0));
    test(EqCoord::new(0.0, 45.0));
    test(EqCoord::new(6.0, 0.0));
    test(EqCoord::new(6.0, -45.0));
    test(EqCoord::new(3.0, 22.5));
    test(EqCoord::new(23.5, -80.0));
}

#[test]
fn test_angle_between() {
    let a = EqCoord::<JNow>::new(10.0, 20.0);
    let b = EqCoord::<JNow>::new(10.0, 21.0);
    assert!(f64::abs(EqCoord::angle_between(&a, &b) - 1.0) < 1e-9);
    let c = EqCoord::<JNow>::new(22.0, 0.0);
    let d = EqCoord::<JNow>::new(2.0, 0.0);
    assert!(f64::abs(EqCoord::angle_between(&c, &d) - 60.0) < 1e-9);
}

/// Direction from observer. Only meaningful together with
/// the time it was calculated for.
#[derive(Clone, Copy, Default, PartialEq)]
pub struct HorizCoord {
    pub alt: f64, // in degrees
    pub az:  f64, // in degrees, north based
}

impl HorizCoord {
    pub fn from_eq(crd: &EqCoord<JNow>, latitude: f64, lst: f64) -> Self {
        let (alt, az) = equatorial_to_horizontal(crd.ra, crd.dec, latitude, lst);
        Self { alt, az }
    }
}

impl Debug for HorizCoord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HorizCoord")
            .field("alt", &degrees_to_sexagesimal(self.alt, true, DelimiterStyle::Colon))
            .field("az", &degrees_to_sexagesimal(self.az, false, DelimiterStyle::Azimuth))
            .finish()
    }
}

/// Converts equatorial coordinate of date into altitude and azimuth.
///
/// `lst` is local sidereal time in hours (observer longitude is already
/// included in it). Azimuth is counted from north through east to match
/// the mount protocol. Poles give azimuth discontinuities.
pub fn equatorial_to_horizontal(
    ra:        f64, // in hours
    dec:       f64, // in degrees
    latitude:  f64, // in degrees
    lst:       f64, // in hours
) -> (f64, f64) {
    let lha = normalize_degrees(15.0 * lst - 15.0 * ra);
    let lha = degree_to_radian(lha);
    let dec = degree_to_radian(dec);
    let x = f64::cos(lha) * f64::cos(dec);
    let y = f64::sin(lha) * f64::cos(dec);
    let z = f64::sin(dec);
    let colat = degree_to_radian(90.0 - latitude);
    let x_hor = x * f64::cos(colat) - z * f64::sin(colat);
    let y_hor = y;
    let z_hor = x * f64::sin(colat) + z * f64::cos(colat);
    let az = normalize_degrees(radian_to_degree(f64::atan2(y_hor, x_hor)) + 180.0);
    let alt = radian_to_degree(f64::asin(z_hor.clamp(-1.0, 1.0)));
    (alt, az)
}

#[test]
fn test_equatorial_to_horizontal_zenith_and_meridian() {
    // object with dec == latitude at local hour angle 0 is in zenith
    let (alt, _) = equatorial_to_horizontal(5.0, 52.0, 52.0, 5.0);
    assert!(f64::abs(alt - 90.0) < 1e-5);

    // upper culmination south of zenith
    let (alt, az) = equatorial_to_horizontal(5.0, 22.0, 52.0, 5.0);
    assert!(f64::abs(alt - 60.0) < 1e-9);
    assert!(f64::abs(az - 180.0) < 1e-9);

    // 6 hours west of meridian on celestial equator sets in west
    let (alt, az) = equatorial_to_horizontal(5.0, 0.0, 52.0, 11.0);
    assert!(f64::abs(alt) < 1e-9);
    assert!(f64::abs(az - 270.0) < 1e-9);

    // 6 hours east of meridian rises in east
    let (alt, az) = equatorial_to_horizontal(11.0, 0.0, 52.0, 5.0);
    assert!(f64::abs(alt) < 1e-9);
    assert!(f64::abs(az - 90.0) < 1e-9);
}

#[test]
fn test_equatorial_to_horizontal_ranges() {
    for latitude in [-90.0, -45.0, 0.0, 33.3, 52.0, 90.0] {
        for lst in [0.0, 6.5, 13.25, 23.99] {
            for ra_step in 0..48 {
                let ra = ra_step as f64 * 0.5;
                for dec_step in 0..=36 {
                    let dec = -90.0 + dec_step as f64 * 5.0;
                    let (alt, az) = equatorial_to_horizontal(ra, dec, latitude, lst);
                    assert!((-90.0..=90.0).contains(&alt), "alt={}", alt);
                    assert!((0.0..360.0).contains(&az), "az={}", az);
                }
            }
        }
    }
}

/// Observer position on Earth. Longitude is east positive.
#[derive(Clone, Copy, Default, Debug, PartialEq)]
pub struct ObserverLocation {
    pub latitude:  f64, // in degrees
    pub longitude: f64, // in degrees
}

impl ObserverLocation {
    /// Local sidereal time in hours
    pub fn sidereal_time(&self, utc_time: &NaiveDateTime) -> f64 {
        normalize_hours(calc_sidereal_time(utc_time) + self.longitude / 15.0)
    }

    pub fn eq_to_horiz(&self, crd: &EqCoord<JNow>, utc_time: &NaiveDateTime) -> HorizCoord {
        HorizCoord::from_eq(crd, self.latitude, self.sidereal_time(utc_time))
    }
}

/// Difference between where the image shows the telescope pointing
/// and where the mount thinks it is pointing
#[derive(Clone, Copy, Default, Debug, PartialEq)]
pub struct PointingDelta {
    pub az:  f64, // in arcminutes on sky
    pub alt: f64, // in arcminutes
}

impl PointingDelta {
    pub fn calc(mount: &HorizCoord, solved: &HorizCoord) -> Self {
        let az_diff = normalize_delta_degrees(solved.az - mount.az);
        Self {
            az:  60.0 * az_diff * f64::cos(degree_to_radian(mount.alt)),
            alt: 60.0 * (solved.alt - mount.alt),
        }
    }
}

#[test]
fn test_pointing_delta() {
    let mount = HorizCoord { alt: 60.0, az: 359.5 };
    let solved = HorizCoord { alt: 60.25, az: 0.5 };
    let delta = PointingDelta::calc(&mount, &solved);
    assert!(f64::abs(delta.az - 30.0) < 1e-9); // 1 degree at cos(60) = 0.5
    assert!(f64::abs(delta.alt - 15.0) < 1e-9);

    let same = PointingDelta::calc(&mount, &mount);
    assert_eq!(same.az, 0.0);
    assert_eq!(same.alt, 0.0);
}

/// Normalizes angle difference into (-180, 180]
pub fn normalize_delta_degrees(value: f64) -> f64 {
    value - 360.0 * f64::ceil((value - 180.0) / 360.0)
}

#[test]
fn test_normalize_delta_degrees() {
    assert_eq!(normalize_delta_degrees(190.0), -170.0);
    assert_eq!(normalize_delta_degrees(-190.0), 170.0);
    assert_eq!(normalize_delta_degrees(180.0), 180.0);
    assert_eq!(normalize_delta_degrees(-180.0), 180.0);
    assert_eq!(normalize_delta_degrees(0.0), 0.0);
    assert_eq!(normalize_delta_degrees(-10.0), -10.0);
    assert_eq!(normalize_delta_degrees(725.0), 5.0);
}

/// Normalizes angle into [0, 360)
pub fn normalize_degrees(value: f64) -> f64 {
    let result = value.rem_euclid(360.0);
    if result >= 360.0 { 0.0 } else { result }
}

/// Normalizes hours into [0, 24)
pub fn normalize_hours(value: f64) -> f64 {
    let result = value.rem_euclid(24.0);
    if result >= 24.0 { 0.0 } else { result }
}

/// Converts image pixel into angular offset (in degrees) from frame center.
///
/// Positive x when the pixel is right of center (finder looks left of the object),
/// positive y when the pixel is above center (finder looks below the object).
pub fn pixel_offset_to_angular(
    pixel_x:   f64,
    pixel_y:   f64,
    pix_scale: f64, // in arcsec per pixel
    center:    (f64, f64),
) -> (f64, f64) {
    let d_x = (pixel_x - center.0) * pix_scale / 3600.0;
    let d_y = (center.1 - pixel_y) * pix_scale / 3600.0;
    (d_x, d_y)
}

/// Exact inverse of [`pixel_offset_to_angular`]
pub fn angular_to_pixel_offset(
    d_x:       f64,
    d_y:       f64,
    pix_scale: f64,
    center:    (f64, f64),
) -> (f64, f64) {
    let pixel_x = d_x * 3600.0 / pix_scale + center.0;
    let pixel_y = center.1 - d_y * 3600.0 / pix_scale;
    (pixel_x, pixel_y)
}

#[test]
fn test_pixel_offset_round_trip() {
    for pix_scale in [3.74715, 15.0, 4.0 * 3.74715] {
        for x in (0..=1280).step_by(37) {
            for y in (0..=960).step_by(29) {
                let (x, y) = (x as f64 + 0.25, y as f64 - 0.75);
                let (d_x, d_y) = pixel_offset_to_angular(x, y, pix_scale, FRAME_CENTER);
                let (x2, y2) = angular_to_pixel_offset(d_x, d_y, pix_scale, FRAME_CENTER);
                assert!(f64::abs(x - x2) < 1e-6);
                assert!(f64::abs(y - y2) < 1e-6);
            }
        }
    }
}

#[test]
fn test_pixel_offset_signs() {
    let (d_x, d_y) = pixel_offset_to_angular(700.0, 400.0, 15.0, FRAME_CENTER);
    assert!(f64::abs(d_x - 0.25) < 1e-12);
    assert!(f64::abs(d_y - 1.0 / 3.0) < 1e-12);
    assert_eq!(angular_to_pixel_offset(0.0, 0.0, 15.0, FRAME_CENTER), FRAME_CENTER);
}

// Screen mapping:
//  ^X
//  |   Z
//  |  /
//  | /
//  |/
//  *----->Y
#[derive(Debug, Clone)]
pub struct Point3D {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Point3D {
    pub fn normalize(&mut self) {
        let len = f64::sqrt(self.x * self.x + self.y * self.y + self.z * self.z);
        if len == 0.0 {
            return;
        }

        self.x /= len;
        self.y /= len;
        self.z /= len;
    }
}

impl Mul<&Matrix33> for &Point3D {
    type Output = Point3D;

    fn mul(self, mat: &Matrix33) -> Self::Output {
        Point3D {
            x: mat.a11 * self.x + mat.a12 * self.y + mat.a13 * self.z,
            y: mat.a21 * self.x + mat.a22 * self.y + mat.a23 * self.z,
            z: mat.a31 * self.x + mat.a32 * self.y + mat.a33 * self.z,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Matrix33 {
    pub a11: f64, pub a12: f64, pub a13: f64,
    pub a21: f64, pub a22: f64, pub a23: f64,
    pub a31: f64, pub a32: f64, pub a33: f64,
}

impl Matrix33 {
    pub fn transposed(&self) -> Self {
        Self {
            a11: self.a11, a12: self.a21, a13: self.a31,
            a21: self.a12, a22: self.a22, a23: self.a32,
            a31: self.a13, a32: self.a23, a33: self.a33,
        }
    }
}

pub fn radian_to_degree(radian: f64) -> f64 {
    180.0 * radian / PI
}

pub fn degree_to_radian(degree: f64) -> f64 {
    PI * degree / 180.0
}

pub fn radian_to_hour(radian: f64) -> f64 {
    12.0 * radian / PI
}

pub fn hour_to_radian(hour: f64) -> f64 {
    PI * hour / 12.0
}

pub fn calc_julian_day(date: &NaiveDate) -> i64 {
    let mon = date.month() as i64;
    let day = date.day() as i64;
    let year = date.year() as i64;
    let a = (14 - mon) / 12;
    let y = year + 4800 - a;
    let m = mon + 12 * a - 3;
    day + (153 * m + 2)/5 + 365*y + y/4 - y/100 + y/400 - 32045
}

#[test]
fn test_calc_julian_day() {
    assert_eq!(
        calc_julian_day(&NaiveDate::from_ymd_opt(2001, 1, 1).unwrap()),
        2_451_911
    );
}

pub fn calc_julian_time(dt: &NaiveDateTime) -> f64 {
    let julian_day = calc_julian_day(&dt.date()) as f64;
    let hour = dt.hour() as f64;
    let min = dt.minute() as f64;
    let mut sec = dt.second() as f64;
    let msecs = (dt.nanosecond() / 1_000_000) as f64;
    sec += msecs / 1000.0;
    julian_day + (hour - 12.0) / 24.0 + min / 1440.0 + sec / 86400.0
}

pub fn calc_julian_centuries(dt: &NaiveDateTime) -> f64 {
    let jdt = calc_julian_time(dt);
    (jdt - 2451545.0) / 36525.0
}

/// Greenwich mean sidereal time in hours
pub fn calc_sidereal_time(dt: &NaiveDateTime) -> f64 {
    let jdt = calc_julian_time(dt);
    let dtt = jdt - 2451545.0;
    let t = dtt / 36525.0;
    let result_in_degrees =
        280.46061837
        + 360.98564736629 * dtt
        + 0.000387933 * t * t
        - (t * t * t) / 38710000.0;
    normalize_degrees(result_in_degrees) / 15.0
}

#[test]
fn test_calc_sidereal_time() {
    // Meeus, example 12.b: 1987-04-10 19:21:00 UT -> 8h 34m 57.0896s
    let dt = NaiveDate::from_ymd_opt(1987, 4, 10).unwrap().and_hms_opt(19, 21, 0).unwrap();
    let expected = 8.0 + 34.0 / 60.0 + 57.0896 / 3600.0;
    assert!(f64::abs(calc_sidereal_time(&dt) - expected) < 1e-5);

    let location = ObserverLocation { latitude: 0.0, longitude: -90.0 };
    let lst = location.sidereal_time(&dt);
    assert!(f64::abs(lst - normalize_hours(expected - 6.0)) < 1e-5);
}

pub fn j2000_time() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2000, 1, 1)
        .and_then(|date| date.and_hms_opt(12, 0, 0))
        .unwrap_or_default()
}
