//! Planar length and area measurement.
//!
//! Measurements are taken in a UTM zone so they come out in meters and
//! square meters. Layers already in UTM are measured as they are; anything
//! else is projected into the zone containing the layer's center first.

use geo::{Area, BoundingRect, Coord, Geometry, Rect, Validation};
use hex_features_layer::reproject::{transform_coord, transform_geometry};
use hex_features_layer::{Crs, FeatureLayer};

/// The reference used to measure `layer`.
#[must_use]
pub fn measurement_crs(layer: &FeatureLayer) -> Crs {
    if matches!(layer.crs, Crs::Utm { .. }) {
        return layer.crs;
    }
    let Some(bounds) = layer_bounds(layer) else {
        return Crs::Wgs84;
    };
    let center = transform_coord(bounds.center(), layer.crs, Crs::Wgs84);
    Crs::utm_for(center.x, center.y)
}

fn layer_bounds(layer: &FeatureLayer) -> Option<Rect<f64>> {
    let mut rects = layer
        .features
        .iter()
        .filter_map(|f| f.geometry.bounding_rect());
    let first = rects.next()?;
    Some(rects.fold(first, |acc, r| {
        Rect::new(
            Coord {
                x: acc.min().x.min(r.min().x),
                y: acc.min().y.min(r.min().y),
            },
            Coord {
                x: acc.max().x.max(r.max().x),
                y: acc.max().y.max(r.max().y),
            },
        )
    }))
}

/// Projects `geometry` from `from` into the measurement reference `to`.
#[must_use]
pub fn to_measurement(geometry: &Geometry<f64>, from: Crs, to: Crs) -> Geometry<f64> {
    transform_geometry(geometry, from, to)
}

/// Length of the linear parts of `geometry`; zero for other types.
#[must_use]
pub fn planar_length(geometry: &Geometry<f64>) -> f64 {
    match geometry {
        Geometry::Line(line) => line.dx().hypot(line.dy()),
        Geometry::LineString(ls) => ls.lines().map(|l| l.dx().hypot(l.dy())).sum(),
        Geometry::MultiLineString(mls) => mls
            .iter()
            .flat_map(geo::LineString::lines)
            .map(|l| l.dx().hypot(l.dy()))
            .sum(),
        Geometry::GeometryCollection(gc) => gc.iter().map(planar_length).sum(),
        _ => 0.0,
    }
}

/// Unsigned area of `geometry`.
#[must_use]
pub fn planar_area(geometry: &Geometry<f64>) -> f64 {
    geometry.unsigned_area()
}

/// Whether `geometry` is a non-empty polygonal shape that passes geo's
/// OGC validity rules (closed, non-self-intersecting rings, finite
/// coordinates) and has positive area.
#[must_use]
pub fn is_valid_polygonal(geometry: &Geometry<f64>) -> bool {
    match geometry {
        Geometry::Polygon(p) => {
            !p.exterior().0.is_empty() && p.is_valid() && p.unsigned_area() > 0.0
        }
        Geometry::MultiPolygon(mp) => {
            !mp.0.is_empty() && mp.is_valid() && mp.iter().all(|p| p.unsigned_area() > 0.0)
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{line_string, polygon};
    use hex_features_layer::{Feature, LayerKind};

    #[test]
    fn line_length_sums_segments() {
        let line: Geometry<f64> = line_string![(x: 0.0, y: 0.0), (x: 3.0, y: 4.0), (x: 3.0, y: 10.0)].into();
        assert!((planar_length(&line) - 11.0).abs() < 1e-12);
        let square: Geometry<f64> = polygon![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 1.0, y: 1.0)].into();
        assert!(planar_length(&square).abs() < f64::EPSILON);
    }

    #[test]
    fn geographic_layers_measure_in_local_utm() {
        let layer = FeatureLayer::new(
            LayerKind::Buildings,
            Crs::Wgs84,
            vec![Feature::new(
                polygon![
                    (x: 144.96, y: -37.81),
                    (x: 144.961, y: -37.81),
                    (x: 144.961, y: -37.809),
                    (x: 144.96, y: -37.809),
                ]
                .into(),
            )],
        );
        let crs = measurement_crs(&layer);
        assert_eq!(
            crs,
            Crs::Utm {
                zone: 55,
                north: false
            }
        );

        // ~88 m east-west by ~111 m north-south at this latitude.
        let area = planar_area(&to_measurement(&layer.features[0].geometry, layer.crs, crs));
        assert!((9_000.0..10_500.0).contains(&area), "area {area}");
    }

    #[test]
    fn degenerate_polygons_are_invalid() {
        let flat: Geometry<f64> = polygon![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 2.0, y: 0.0)].into();
        assert!(!is_valid_polygonal(&flat));
        let empty: Geometry<f64> = geo::MultiPolygon::<f64>(vec![]).into();
        assert!(!is_valid_polygonal(&empty));
        let square: Geometry<f64> =
            polygon![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 1.0, y: 1.0), (x: 0.0, y: 1.0)].into();
        assert!(is_valid_polygonal(&square));
    }

    #[test]
    fn self_intersecting_footprint_is_invalid() {
        // Asymmetric bowtie: the shoelace area is non-zero.
        let bowtie: Geometry<f64> =
            polygon![(x: 0.0, y: 0.0), (x: 20.0, y: 10.0), (x: 20.0, y: 0.0), (x: 0.0, y: 20.0)].into();
        assert!(planar_area(&bowtie) > 0.0);
        assert!(!is_valid_polygonal(&bowtie));
    }
}
