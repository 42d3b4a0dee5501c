use std::path::Path;

use crate::{image::simple_fits::*, sky_math::math::*};
use super::{Error, Result};

/// Gnomonic (TAN) world coordinate system of solved image.
/// Pixels are 1-based as in FITS. SIP distortion terms are not applied.
#[derive(Debug, Clone, PartialEq)]
pub struct WcsTan {
    pub crpix: (f64, f64),
    pub crval: (f64, f64), // ra and dec in degrees
    pub cd:    [[f64; 2]; 2],
}

impl WcsTan {
    pub fn from_header(header: &Header) -> Option<Self> {
        let ctype1 = header.get_str("CTYPE1").unwrap_or("RA---TAN");
        if !ctype1.starts_with("RA---TAN") {
            log::warn!("Unsupported projection {}, using TAN", ctype1);
        }
        let crpix = (header.get_f64("CRPIX1")?, header.get_f64("CRPIX2")?);
        let crval = (header.get_f64("CRVAL1")?, header.get_f64("CRVAL2")?);
        let cd = match (
            header.get_f64("CD1_1"), header.get_f64("CD1_2"),
            header.get_f64("CD2_1"), header.get_f64("CD2_2"),
        ) {
            (Some(cd11), cd12, cd21, Some(cd22)) =>
                [[cd11, cd12.unwrap_or(0.0)], [cd21.unwrap_or(0.0), cd22]],
            _ => {
                let cdelt1 = header.get_f64("CDELT1")?;
                let cdelt2 = header.get_f64("CDELT2")?;
                [[cdelt1, 0.0], [0.0, cdelt2]]
            }
        };
        Some(Self { crpix, crval, cd })
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let err = |text: String| Error::Wcs { path: path.to_path_buf(), text };
        let mut file = std::fs::File::open(path).map_err(|e| err(e.to_string()))?;
        let reader = FitsReader::new(&mut file).map_err(|e| err(e.to_string()))?;
        let header = reader.headers.first()
            .ok_or_else(|| err("No headers".to_string()))?;
        Self::from_header(header)
            .ok_or_else(|| err("No CRPIX/CRVAL/CD keys".to_string()))
    }

    #[cfg(test)]
    pub fn write_to_file(&self, path: &Path) -> std::io::Result<()> {
        let mut header = Header::new();
        header.set_str("CTYPE1", "RA---TAN");
        header.set_str("CTYPE2", "DEC--TAN");
        header.set_f64("CRPIX1", self.crpix.0);
        header.set_f64("CRPIX2", self.crpix.1);
        header.set_f64("CRVAL1", self.crval.0);
        header.set_f64("CRVAL2", self.crval.1);
        header.set_f64("CD1_1", self.cd[0][0]);
        header.set_f64("CD1_2", self.cd[0][1]);
        header.set_f64("CD2_1", self.cd[1][0]);
        header.set_f64("CD2_2", self.cd[1][1]);
        write_header_only_file(path, &header)
    }

    pub fn pixel_to_sky(&self, x: f64, y: f64) -> EqCoord<J2000> {
        let u = x - self.crpix.0;
        let v = y - self.crpix.1;
        let xi = degree_to_radian(self.cd[0][0] * u + self.cd[0][1] * v);
        let eta = degree_to_radian(self.cd[1][0] * u + self.cd[1][1] * v);
        let ra0 = degree_to_radian(self.crval.0);
        let dec0 = degree_to_radian(self.crval.1);
        let denom = f64::cos(dec0) - eta * f64::sin(dec0);
        let ra = ra0 + f64::atan2(xi, denom);
        let dec = f64::atan2(
            f64::sin(dec0) + eta * f64::cos(dec0),
            f64::sqrt(xi * xi + denom * denom)
        );
        EqCoord::new(radian_to_hour(ra), radian_to_degree(dec))
    }

    /// Returns `None` for points on far hemisphere or for singular CD matrix
    pub fn sky_to_pixel(&self, crd: &EqCoord<J2000>) -> Option<(f64, f64)> {
        let ra = hour_to_radian(crd.ra);
        let dec = degree_to_radian(crd.dec);
        let ra0 = degree_to_radian(self.crval.0);
        let dec0 = degree_to_radian(self.crval.1);
        let cos_c =
            f64::sin(dec0) * f64::sin(dec) +
            f64::cos(dec0) * f64::cos(dec) * f64::cos(ra - ra0);
        if cos_c <= 0.0 {
            return None;
        }
        let xi = radian_to_degree(f64::cos(dec) * f64::sin(ra - ra0) / cos_c);
        let eta = radian_to_degree((
            f64::cos(dec0) * f64::sin(dec) -
            f64::sin(dec0) * f64::cos(dec) * f64::cos(ra - ra0)
        ) / cos_c);
        let det = self.cd[0][0] * self.cd[1][1] - self.cd[0][1] * self.cd[1][0];
        if det == 0.0 {
            return None;
        }
        let u = ( self.cd[1][1] * xi - self.cd[0][1] * eta) / det;
        let v = (-self.cd[1][0] * xi + self.cd[0][0] * eta) / det;
        Some((u + self.crpix.0, v + self.crpix.1))
    }
}

#[cfg(test)]
fn test_wcs() -> WcsTan {
    // 15"/px, slightly rotated, M13 at center
    let scale = 15.0 / 3600.0;
    let (s, c) = f64::sin_cos(degree_to_radian(12.0));
    WcsTan {
        crpix: (640.5, 480.5),
        crval: (250.4235, 36.4613),
        cd: [[-scale * c, scale * s], [scale * s, scale * c]],
    }
}

#[test]
fn test_wcs_reference_pixel() {
    let wcs = test_wcs();
    let crd = wcs.pixel_to_sky(640.5, 480.5);
    assert!(f64::abs(crd.ra * 15.0 - 250.4235) < 1e-9);
    assert!(f64::abs(crd.dec - 36.4613) < 1e-9);
}

#[test]
fn test_wcs_round_trip() {
    let wcs = test_wcs();
    for (x, y) in [(1.0, 1.0), (1280.0, 960.0), (100.5, 800.25), (640.0, 480.0)] {
        let crd = wcs.pixel_to_sky(x, y);
        let (x2, y2) = wcs.sky_to_pixel(&crd).unwrap();
        assert!(f64::abs(x - x2) < 1e-6, "x={} x2={}", x, x2);
        assert!(f64::abs(y - y2) < 1e-6, "y={} y2={}", y, y2);
    }
}

#[test]
fn test_wcs_pixel_scale() {
    let wcs = test_wcs();
    let a = wcs.pixel_to_sky(640.5, 480.5);
    let b = wcs.pixel_to_sky(640.5 + 240.0, 480.5);
    // 240 px * 15"/px = 1 degree
    assert!(f64::abs(EqCoord::angle_between(&a, &b) - 1.0) < 1e-3);
}

#[test]
fn test_wcs_file() {
    let path = std::env::temp_dir().join(format!("efinder_wcs_test_{}.wcs", std::process::id()));
    let wcs = test_wcs();
    wcs.write_to_file(&path).unwrap();
    let loaded = WcsTan::from_file(&path).unwrap();
    assert_eq!(loaded, wcs);
    _ = std::fs::remove_file(&path);

    assert!(matches!(
        WcsTan::from_file(&std::env::temp_dir().join("efinder_no_such_file.wcs")),
        Err(Error::Wcs { .. })
    ));
}
