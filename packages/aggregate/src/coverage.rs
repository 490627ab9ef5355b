//! The cell coverage aggregator.
//!
//! Joins one feature layer against a grid with an `intersects` predicate
//! and reduces the matches per cell. A feature touching several cells
//! contributes fully to each of them. The result always has exactly one
//! row per grid cell, in grid order.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use hex_features_aggregate_models::{CategoryKey, CategorySchema, CellTable, Column, ColumnData};
use hex_features_grid_models::Grid;
use hex_features_layer::reproject::transform_geometry;
use hex_features_layer::{AttributeValue, Crs, Feature, FeatureLayer, LayerCapabilities, LayerKind};
use hex_features_spatial::CellIndex;

use crate::AggregateError;
use crate::measure::{self, is_valid_polygonal};
use crate::profile::{self, BaseStat, CategorySource, FillPolicy, LayerProfile, UNKNOWN};

/// One layer aggregated over a grid.
#[derive(Debug, Clone)]
pub struct AggregatedLayer {
    pub kind: LayerKind,
    /// Optional attributes the input actually carried.
    pub capabilities: LayerCapabilities,
    /// Features that survived filtering.
    pub features_used: usize,
    /// One row per grid cell.
    pub table: CellTable,
}

impl AggregatedLayer {
    /// Category keys discovered for this layer, in column order.
    #[must_use]
    pub fn schema(&self) -> CategorySchema {
        self.table.category_schema()
    }
}

/// What one feature contributes to every cell it intersects.
struct Contribution {
    length: f64,
    area: f64,
    /// Parallel to the profile's `Mean` stats.
    means: Vec<Option<f64>>,
    /// `(category attribute position, label)`.
    labels: Vec<(usize, String)>,
    /// Raw category value for the distinct count.
    raw: Option<String>,
}

/// Running per-cell totals.
struct Accumulator {
    count: Vec<i64>,
    length: Vec<f64>,
    area: Vec<f64>,
    /// `(sum, n)` per `Mean` stat per cell.
    means: Vec<Vec<(f64, u32)>>,
    indicators: BTreeMap<(usize, String), Vec<i64>>,
    distinct: Vec<BTreeSet<String>>,
}

impl Accumulator {
    fn new(cells: usize, mean_stats: usize) -> Self {
        Self {
            count: vec![0; cells],
            length: vec![0.0; cells],
            area: vec![0.0; cells],
            means: vec![vec![(0.0, 0); cells]; mean_stats],
            indicators: BTreeMap::new(),
            distinct: vec![BTreeSet::new(); cells],
        }
    }

    fn add(&mut self, cell: usize, contribution: &Contribution) {
        let cells = self.count.len();
        self.count[cell] += 1;
        self.length[cell] += contribution.length;
        self.area[cell] += contribution.area;
        for (stat, value) in contribution.means.iter().enumerate() {
            if let Some(value) = value {
                let slot = &mut self.means[stat][cell];
                slot.0 += value;
                slot.1 += 1;
            }
        }
        for label in &contribution.labels {
            self.indicators
                .entry(label.clone())
                .or_insert_with(|| vec![0; cells])[cell] += 1;
        }
        if let Some(raw) = &contribution.raw {
            self.distinct[cell].insert(raw.clone());
        }
    }
}

/// Aggregates `layer` onto `grid`.
///
/// `index` must have been built from `grid`. An empty layer is not an
/// error: it yields zero counts and missing derived values for every
/// cell.
///
/// # Errors
///
/// Returns [`AggregateError::IndexMismatch`] if `index` does not match
/// `grid`.
pub fn aggregate(
    layer: &FeatureLayer,
    grid: &Grid,
    index: &CellIndex,
) -> Result<AggregatedLayer, AggregateError> {
    if index.len() != grid.len() {
        return Err(AggregateError::IndexMismatch {
            grid: grid.len(),
            index: index.len(),
        });
    }

    let profile = profile::profile(layer.kind);
    let capabilities = LayerCapabilities::describe(
        layer,
        &profile.numeric_attributes(),
        &profile.categories.inputs(),
    );

    let features = select_features(profile, layer, &capabilities);
    if features.is_empty() {
        log::warn!(
            "No usable {} features; emitting zero-filled rows for {} cells",
            layer.kind,
            grid.len()
        );
    }

    let measures = profile
        .base
        .iter()
        .any(|s| matches!(s, BaseStat::Length { .. } | BaseStat::Area { .. }));
    let measure_crs = measures.then(|| measure::measurement_crs(layer));
    let encoded = encoded_attributes(profile, &capabilities);
    // Absent attributes keep their slot so the columns stay aligned, but
    // are never read per feature and fall back to the fill policy.
    let mean_stats: Vec<Option<&'static str>> = profile
        .base
        .iter()
        .filter_map(|s| match s {
            BaseStat::Mean { attribute, .. } => Some(*attribute),
            _ => None,
        })
        .map(|attribute| {
            if capabilities.has_numeric(attribute) {
                Some(attribute)
            } else {
                log::debug!("{} layer has no numeric {attribute}", layer.kind);
                None
            }
        })
        .collect();

    let mut acc = Accumulator::new(grid.len(), mean_stats.len());

    for feature in &features {
        let geometry = if layer.crs == grid.crs() {
            std::borrow::Cow::Borrowed(&feature.geometry)
        } else {
            std::borrow::Cow::Owned(transform_geometry(
                &feature.geometry,
                layer.crs,
                grid.crs(),
            ))
        };

        let cells = index.intersecting(&geometry);
        if cells.is_empty() {
            continue;
        }

        let contribution = contribution(
            profile,
            feature,
            layer.crs,
            measure_crs,
            &mean_stats,
            &encoded,
        );
        for cell in cells {
            acc.add(cell, &contribution);
        }
    }

    let table = build_table(profile, grid, acc, &encoded)?;

    log::debug!(
        "Aggregated {} {} features into {} cells ({} columns)",
        features.len(),
        layer.kind,
        table.len(),
        table.columns().len()
    );

    Ok(AggregatedLayer {
        kind: layer.kind,
        capabilities,
        features_used: features.len(),
        table,
    })
}

fn select_features<'a>(
    profile: &LayerProfile,
    layer: &'a FeatureLayer,
    capabilities: &LayerCapabilities,
) -> Vec<&'a Feature> {
    let blocklist = profile
        .blocklist
        .filter(|b| capabilities.has_category(b.attribute));

    let mut dropped = 0_usize;
    let kept: Vec<&Feature> = layer
        .features
        .iter()
        .filter(|feature| {
            let blocked = blocklist.is_some_and(|b| {
                feature
                    .get(b.attribute)
                    .is_none_or(|v| b.values.contains(&v.to_label().as_str()))
            });
            let invalid = profile.require_valid_geometry && !is_valid_polygonal(&feature.geometry);
            if blocked || invalid {
                dropped += 1;
                return false;
            }
            true
        })
        .collect();

    if dropped > 0 {
        log::debug!("Dropped {dropped} {} features before the join", layer.kind);
    }
    kept
}

/// A category attribute that produces indicator columns.
struct Encoded {
    /// Attribute name recorded in the category key.
    attribute: &'static str,
    /// Column name prefix.
    prefix: &'static str,
}

fn encoded_attributes(profile: &LayerProfile, capabilities: &LayerCapabilities) -> Vec<Encoded> {
    match profile.categories {
        CategorySource::Tags(tags) => tags
            .iter()
            .filter(|tag| capabilities.has_category(tag))
            .map(|&tag| Encoded {
                attribute: tag,
                prefix: tag,
            })
            .collect(),
        CategorySource::FirstOf {
            attribute, prefix, ..
        } => vec![Encoded { attribute, prefix }],
    }
}

fn contribution(
    profile: &LayerProfile,
    feature: &Feature,
    layer_crs: Crs,
    measure_crs: Option<Crs>,
    mean_stats: &[Option<&str>],
    encoded: &[Encoded],
) -> Contribution {
    let number = |name: &str| feature.get(name).and_then(AttributeValue::to_number);

    let mut length = 0.0;
    let mut area = 0.0;
    for stat in profile.base {
        match stat {
            BaseStat::Length { attribute, .. } => {
                length = number(attribute).unwrap_or_else(|| {
                    measure_crs.map_or(0.0, |crs| {
                        measure::planar_length(&measure::to_measurement(
                            &feature.geometry,
                            layer_crs,
                            crs,
                        ))
                    })
                });
            }
            BaseStat::Area { .. } => {
                area = measure_crs.map_or(0.0, |crs| {
                    measure::planar_area(&measure::to_measurement(
                        &feature.geometry,
                        layer_crs,
                        crs,
                    ))
                });
            }
            BaseStat::Count { .. } | BaseStat::Mean { .. } => {}
        }
    }

    let means = mean_stats
        .iter()
        .map(|name| name.and_then(number))
        .collect();

    let (labels, raw) = match profile.categories {
        CategorySource::Tags(_) => {
            let labels = encoded
                .iter()
                .enumerate()
                .map(|(position, e)| {
                    let label = feature
                        .get(e.attribute)
                        .map_or_else(|| UNKNOWN.to_string(), AttributeValue::to_label);
                    (position, label)
                })
                .collect();
            (labels, None)
        }
        CategorySource::FirstOf { sources, .. } => {
            let raw = sources
                .iter()
                .find_map(|s| feature.get(s))
                .map(AttributeValue::to_label);
            let label = raw.clone().unwrap_or_else(|| UNKNOWN.to_string());
            (vec![(0, label)], raw)
        }
    };

    Contribution {
        length,
        area,
        means,
        labels,
        raw,
    }
}

#[allow(clippy::cast_precision_loss)]
fn build_table(
    profile: &LayerProfile,
    grid: &Grid,
    acc: Accumulator,
    encoded: &[Encoded],
) -> Result<CellTable, AggregateError> {
    let ids = grid.cells().iter().map(|c| c.id.clone()).collect();
    let mut table = CellTable::new(grid.id_column(), ids);
    let mut used: HashSet<String> = profile
        .fixed_columns()
        .into_iter()
        .map(ToString::to_string)
        .collect();
    used.insert(grid.id_column().to_string());

    let counts = || acc.count.iter().map(|&n| Some(n)).collect::<Vec<_>>();

    let mut mean_position = 0;
    for stat in profile.base {
        let data = match stat {
            BaseStat::Count { .. } => ColumnData::Int64(counts()),
            BaseStat::Length { .. } => ColumnData::Float64(acc.length.clone()),
            BaseStat::Area { .. } => ColumnData::Float64(acc.area.clone()),
            BaseStat::Mean { fill, .. } => {
                let slots = &acc.means[mean_position];
                mean_position += 1;
                let missing = match fill {
                    FillPolicy::Zero => 0.0,
                    FillPolicy::Missing => f64::NAN,
                };
                ColumnData::Float64(
                    slots
                        .iter()
                        .map(|&(sum, n)| if n == 0 { missing } else { sum / f64::from(n) })
                        .collect(),
                )
            }
        };
        table.push_column(Column::new(stat.column(), data))?;
    }

    for ((position, value), cells) in acc.indicators {
        let e = &encoded[position];
        let name = unique_name(&mut used, &format!("{}_{value}", e.prefix));
        let key = CategoryKey::new(profile.kind, e.attribute, value);
        table.push_column(Column::indicator(
            name,
            key,
            cells.into_iter().map(Some).collect(),
        ))?;
    }

    if let Some(column) = profile.distinct_count {
        let data = acc
            .distinct
            .iter()
            .map(|values| Some(i64::try_from(values.len()).unwrap_or(i64::MAX)))
            .collect();
        table.push_column(Column::new(column, ColumnData::Int64(data)))?;
    }

    if let Some(column) = profile.mean_area {
        let data = acc
            .area
            .iter()
            .zip(&acc.count)
            .map(|(&area, &n)| if n == 0 { f64::NAN } else { area / n as f64 })
            .collect();
        table.push_column(Column::new(column, ColumnData::Float64(data)))?;
    }

    Ok(table)
}

/// `name`, or `name_2`, `name_3`, ... if taken. Records the result.
fn unique_name(used: &mut HashSet<String>, name: &str) -> String {
    let mut candidate = name.to_string();
    let mut n = 2;
    while used.contains(&candidate) {
        candidate = format!("{name}_{n}");
        n += 1;
    }
    used.insert(candidate.clone());
    candidate
}
