//! Coordinate transformation between the supported references.
//!
//! Every transform goes through WGS84: source → lon/lat → target. UTM uses
//! the Snyder transverse Mercator series on the WGS84 ellipsoid, which is
//! accurate to a few millimeters within a zone.

use geo::{Coord, Geometry, MapCoords};
use hex_features_layer_models::{Crs, FeatureLayer};

const WGS84_A: f64 = 6_378_137.0;
const WGS84_F: f64 = 1.0 / 298.257_223_563;
const UTM_K0: f64 = 0.9996;
const UTM_FALSE_EASTING: f64 = 500_000.0;
const UTM_FALSE_NORTHING_SOUTH: f64 = 10_000_000.0;

/// Transforms a single coordinate from `from` to `to`.
#[must_use]
pub fn transform_coord(c: Coord<f64>, from: Crs, to: Crs) -> Coord<f64> {
    if from == to {
        return c;
    }
    let (lng, lat) = to_lng_lat(c, from);
    from_lng_lat(lng, lat, to)
}

/// Transforms a geometry from `from` to `to`.
#[must_use]
pub fn transform_geometry(geometry: &Geometry<f64>, from: Crs, to: Crs) -> Geometry<f64> {
    if from == to {
        return geometry.clone();
    }
    geometry.map_coords(move |c| transform_coord(c, from, to))
}

/// Returns `layer` expressed in `to`, cloning only when a transform is
/// needed.
#[must_use]
pub fn reproject_layer(layer: &FeatureLayer, to: Crs) -> std::borrow::Cow<'_, FeatureLayer> {
    if layer.crs == to {
        return std::borrow::Cow::Borrowed(layer);
    }

    log::debug!(
        "Reprojecting {} {} features from {} to {to}",
        layer.len(),
        layer.kind,
        layer.crs
    );

    let features = layer
        .features
        .iter()
        .map(|f| hex_features_layer_models::Feature {
            geometry: transform_geometry(&f.geometry, layer.crs, to),
            attributes: f.attributes.clone(),
        })
        .collect();

    std::borrow::Cow::Owned(FeatureLayer::new(layer.kind, to, features))
}

fn to_lng_lat(c: Coord<f64>, from: Crs) -> (f64, f64) {
    match from {
        Crs::Wgs84 => (c.x, c.y),
        Crs::WebMercator => (
            (c.x / WGS84_A).to_degrees(),
            (2.0 * (c.y / WGS84_A).exp().atan() - std::f64::consts::FRAC_PI_2).to_degrees(),
        ),
        Crs::Utm { zone, north } => utm_inverse(c.x, c.y, zone, north),
    }
}

fn from_lng_lat(lng: f64, lat: f64, to: Crs) -> Coord<f64> {
    match to {
        Crs::Wgs84 => Coord { x: lng, y: lat },
        Crs::WebMercator => {
            let lat = lat.clamp(-85.051_128_78, 85.051_128_78);
            Coord {
                x: WGS84_A * lng.to_radians(),
                y: WGS84_A * (std::f64::consts::FRAC_PI_4 + lat.to_radians() / 2.0).tan().ln(),
            }
        }
        Crs::Utm { zone, north } => {
            let (x, y) = utm_forward(lng, lat, zone, north);
            Coord { x, y }
        }
    }
}

fn central_meridian(zone: u8) -> f64 {
    (f64::from(zone) - 1.0).mul_add(6.0, -180.0) + 3.0
}

fn ecc_squared() -> f64 {
    WGS84_F * (2.0 - WGS84_F)
}

fn meridian_arc(phi: f64) -> f64 {
    let e2 = ecc_squared();
    let e4 = e2 * e2;
    let e6 = e4 * e2;
    WGS84_A
        * ((1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0) * phi
            - (3.0 * e2 / 8.0 + 3.0 * e4 / 32.0 + 45.0 * e6 / 1024.0) * (2.0 * phi).sin()
            + (15.0 * e4 / 256.0 + 45.0 * e6 / 1024.0) * (4.0 * phi).sin()
            - (35.0 * e6 / 3072.0) * (6.0 * phi).sin())
}

#[allow(clippy::many_single_char_names, clippy::suboptimal_flops)]
fn utm_forward(lng: f64, lat: f64, zone: u8, north: bool) -> (f64, f64) {
    let e2 = ecc_squared();
    let ep2 = e2 / (1.0 - e2);
    let phi = lat.to_radians();
    let lambda = (lng - central_meridian(zone)).to_radians();

    let (sin_phi, cos_phi) = phi.sin_cos();
    let n = WGS84_A / (1.0 - e2 * sin_phi * sin_phi).sqrt();
    let t = phi.tan().powi(2);
    let c = ep2 * cos_phi * cos_phi;
    let a = lambda * cos_phi;
    let m = meridian_arc(phi);

    let x = UTM_K0
        * n
        * (a + (1.0 - t + c) * a.powi(3) / 6.0
            + (5.0 - 18.0 * t + t * t + 72.0 * c - 58.0 * ep2) * a.powi(5) / 120.0)
        + UTM_FALSE_EASTING;

    let mut y = UTM_K0
        * (m + n
            * phi.tan()
            * (a * a / 2.0
                + (5.0 - t + 9.0 * c + 4.0 * c * c) * a.powi(4) / 24.0
                + (61.0 - 58.0 * t + t * t + 600.0 * c - 330.0 * ep2) * a.powi(6) / 720.0));

    if !north {
        y += UTM_FALSE_NORTHING_SOUTH;
    }

    (x, y)
}

#[allow(clippy::many_single_char_names, clippy::suboptimal_flops)]
fn utm_inverse(x: f64, y: f64, zone: u8, north: bool) -> (f64, f64) {
    let e2 = ecc_squared();
    let ep2 = e2 / (1.0 - e2);
    let e4 = e2 * e2;
    let e6 = e4 * e2;

    let x = x - UTM_FALSE_EASTING;
    let y = if north { y } else { y - UTM_FALSE_NORTHING_SOUTH };

    let m = y / UTM_K0;
    let mu = m / (WGS84_A * (1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0));
    let e1 = (1.0 - (1.0 - e2).sqrt()) / (1.0 + (1.0 - e2).sqrt());

    let phi1 = mu
        + (3.0 * e1 / 2.0 - 27.0 * e1.powi(3) / 32.0) * (2.0 * mu).sin()
        + (21.0 * e1 * e1 / 16.0 - 55.0 * e1.powi(4) / 32.0) * (4.0 * mu).sin()
        + (151.0 * e1.powi(3) / 96.0) * (6.0 * mu).sin()
        + (1097.0 * e1.powi(4) / 512.0) * (8.0 * mu).sin();

    let (sin1, cos1) = phi1.sin_cos();
    let c1 = ep2 * cos1 * cos1;
    let t1 = phi1.tan().powi(2);
    let n1 = WGS84_A / (1.0 - e2 * sin1 * sin1).sqrt();
    let r1 = WGS84_A * (1.0 - e2) / (1.0 - e2 * sin1 * sin1).powf(1.5);
    let d = x / (n1 * UTM_K0);

    let phi = phi1
        - (n1 * phi1.tan() / r1)
            * (d * d / 2.0
                - (5.0 + 3.0 * t1 + 10.0 * c1 - 4.0 * c1 * c1 - 9.0 * ep2) * d.powi(4) / 24.0
                + (61.0 + 90.0 * t1 + 298.0 * c1 + 45.0 * t1 * t1 - 252.0 * ep2 - 3.0 * c1 * c1)
                    * d.powi(6)
                    / 720.0);

    let lambda = (d - (1.0 + 2.0 * t1 + c1) * d.powi(3) / 6.0
        + (5.0 - 2.0 * c1 + 28.0 * t1 - 3.0 * c1 * c1 + 8.0 * ep2 + 24.0 * t1 * t1) * d.powi(5)
            / 120.0)
        / cos1;

    (central_meridian(zone) + lambda.to_degrees(), phi.to_degrees())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64, tol: f64) -> bool {
        (a - b).abs() <= tol
    }

    #[test]
    fn utm_forward_matches_reference_point() {
        // Flinders Street Station, Melbourne; zone 55S.
        let c = transform_coord(
            Coord {
                x: 144.9671,
                y: -37.8183,
            },
            Crs::Wgs84,
            Crs::Utm {
                zone: 55,
                north: false,
            },
        );
        assert!(close(c.x, 321_067.93, 1.0), "easting {}", c.x);
        assert!(close(c.y, 5_812_397.83, 1.0), "northing {}", c.y);
    }

    #[test]
    fn utm_inverse_recovers_the_input() {
        let utm = Crs::Utm {
            zone: 33,
            north: true,
        };
        let input = Coord { x: 13.4, y: 52.52 };
        let there = transform_coord(input, Crs::Wgs84, utm);
        let back = transform_coord(there, utm, Crs::Wgs84);
        assert!(close(back.x, input.x, 1e-7), "lng {}", back.x);
        assert!(close(back.y, input.y, 1e-7), "lat {}", back.y);
    }

    #[test]
    fn web_mercator_round_trip() {
        let input = Coord { x: -122.4, y: 37.77 };
        let there = transform_coord(input, Crs::Wgs84, Crs::WebMercator);
        assert!(close(there.x, -13_625_505.67, 1.0), "x {}", there.x);
        let back = transform_coord(there, Crs::WebMercator, Crs::Wgs84);
        assert!(close(back.x, input.x, 1e-9));
        assert!(close(back.y, input.y, 1e-9));
    }

    #[test]
    fn same_crs_is_identity() {
        let c = Coord { x: 1.5, y: 2.5 };
        assert_eq!(transform_coord(c, Crs::Wgs84, Crs::Wgs84), c);
    }
}
