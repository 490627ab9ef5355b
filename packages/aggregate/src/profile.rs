//! Per-layer aggregation profiles.
//!
//! Every layer runs through the same coverage algorithm; a
//! [`LayerProfile`] names the statistics and the category attributes that
//! make each layer different. Profiles are static and looked up with
//! [`profile`].

use hex_features_layer::LayerKind;

/// Sentinel category for features with no value.
pub const UNKNOWN: &str = "unknown";

/// How a mean is reported for a cell where it cannot be computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillPolicy {
    /// Report `0`.
    Zero,
    /// Report missing (`NaN`).
    Missing,
}

/// One fixed statistic column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseStat {
    /// Number of features intersecting the cell.
    Count { column: &'static str },
    /// Sum of feature lengths in meters. A numeric `attribute` wins over
    /// the measured geometry length.
    Length {
        column: &'static str,
        attribute: &'static str,
    },
    /// Sum of feature footprint areas in square meters.
    Area { column: &'static str },
    /// Mean of a numeric attribute over features that have it.
    Mean {
        column: &'static str,
        attribute: &'static str,
        fill: FillPolicy,
    },
}

impl BaseStat {
    #[must_use]
    pub const fn column(&self) -> &'static str {
        match self {
            Self::Count { column }
            | Self::Length { column, .. }
            | Self::Area { column }
            | Self::Mean { column, .. } => column,
        }
    }
}

/// Where a layer's category values come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CategorySource {
    /// Each attribute is its own category, prefixed by its name. Attributes
    /// absent from the whole layer produce no columns.
    Tags(&'static [&'static str]),
    /// A single category taken from the first of `sources` that has a
    /// value, encoded as `{prefix}_{value}`. Features without any value
    /// count as `unknown`.
    FirstOf {
        attribute: &'static str,
        sources: &'static [&'static str],
        prefix: &'static str,
    },
}

impl CategorySource {
    /// Output attribute names, in column order.
    #[must_use]
    pub fn attributes(&self) -> Vec<&'static str> {
        match self {
            Self::Tags(tags) => tags.to_vec(),
            Self::FirstOf { attribute, .. } => vec![attribute],
        }
    }

    /// Raw feature attributes consulted.
    #[must_use]
    pub fn inputs(&self) -> Vec<&'static str> {
        match self {
            Self::Tags(tags) => tags.to_vec(),
            Self::FirstOf { sources, .. } => sources.to_vec(),
        }
    }
}

/// Feature filter applied before the join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Blocklist {
    /// Attribute checked.
    pub attribute: &'static str,
    /// Values that disqualify a feature. Features without the attribute
    /// are dropped too, but only when the layer carries it at all.
    pub values: &'static [&'static str],
}

/// Everything that distinguishes one layer's aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerProfile {
    pub kind: LayerKind,
    /// Fixed statistics in column order.
    pub base: &'static [BaseStat],
    pub categories: CategorySource,
    /// Per-cell number of distinct raw category values.
    pub distinct_count: Option<&'static str>,
    /// Mean footprint area (`Area` sum over `Count`), missing when the
    /// count is zero.
    pub mean_area: Option<&'static str>,
    pub blocklist: Option<Blocklist>,
    /// Drop empty and degenerate polygonal geometry before the join.
    pub require_valid_geometry: bool,
}

impl LayerProfile {
    /// Numeric attributes coerced by this profile.
    #[must_use]
    pub fn numeric_attributes(&self) -> Vec<&'static str> {
        self.base
            .iter()
            .filter_map(|stat| match stat {
                BaseStat::Mean { attribute, .. } | BaseStat::Length { attribute, .. } => {
                    Some(*attribute)
                }
                BaseStat::Count { .. } | BaseStat::Area { .. } => None,
            })
            .collect()
    }

    /// Column of the feature count.
    #[must_use]
    pub fn count_column(&self) -> Option<&'static str> {
        self.base.iter().find_map(|stat| match stat {
            BaseStat::Count { column } => Some(*column),
            _ => None,
        })
    }

    /// Column of the area sum.
    #[must_use]
    pub fn area_column(&self) -> Option<&'static str> {
        self.base.iter().find_map(|stat| match stat {
            BaseStat::Area { column } => Some(*column),
            _ => None,
        })
    }

    /// Every fixed (non-indicator) column, in output order.
    #[must_use]
    pub fn fixed_columns(&self) -> Vec<&'static str> {
        self.base
            .iter()
            .map(BaseStat::column)
            .chain(self.distinct_count)
            .chain(self.mean_area)
            .collect()
    }
}

/// Road tags one-hot encoded per cell.
pub const ROAD_TAGS: &[&str] = &[
    "highway",
    "service",
    "access",
    "motor_vehicle",
    "bicycle",
    "foot",
    "bridge",
    "tunnel",
    "sidewalk",
    "cycleway",
    "segregated",
    "surface",
    "lit",
];

/// `building` values that tag structures which are not buildings.
pub const NON_BUILDING_VALUES: &[&str] = &[
    "bridge", "road", "footway", "service", "steps", "path", "cycleway", "corridor",
];

const ROADS: LayerProfile = LayerProfile {
    kind: LayerKind::Roads,
    base: &[
        BaseStat::Length {
            column: "roads_length_m",
            attribute: "length",
        },
        BaseStat::Count {
            column: "roads_count",
        },
        BaseStat::Mean {
            column: "avg_lanes",
            attribute: "lanes",
            fill: FillPolicy::Zero,
        },
        BaseStat::Mean {
            column: "avg_maxspeed",
            attribute: "maxspeed",
            fill: FillPolicy::Zero,
        },
    ],
    categories: CategorySource::Tags(ROAD_TAGS),
    distinct_count: None,
    mean_area: None,
    blocklist: None,
    require_valid_geometry: false,
};

const BUILDINGS: LayerProfile = LayerProfile {
    kind: LayerKind::Buildings,
    base: &[
        BaseStat::Count {
            column: "buildings_count",
        },
        BaseStat::Area {
            column: "total_building_area_m2",
        },
        BaseStat::Mean {
            column: "avg_building_levels",
            attribute: "building:levels",
            fill: FillPolicy::Missing,
        },
        BaseStat::Mean {
            column: "avg_building_height_m",
            attribute: "height",
            fill: FillPolicy::Missing,
        },
    ],
    categories: CategorySource::Tags(&["building"]),
    distinct_count: None,
    mean_area: Some("avg_building_area_m2"),
    blocklist: Some(Blocklist {
        attribute: "building",
        values: NON_BUILDING_VALUES,
    }),
    require_valid_geometry: true,
};

const POIS: LayerProfile = LayerProfile {
    kind: LayerKind::Pois,
    base: &[BaseStat::Count {
        column: "pois_count",
    }],
    categories: CategorySource::FirstOf {
        attribute: "poi_type",
        sources: &["amenity", "shop"],
        prefix: "poi",
    },
    distinct_count: Some("poi_type_count"),
    mean_area: None,
    blocklist: None,
    require_valid_geometry: false,
};

const LANDUSE: LayerProfile = LayerProfile {
    kind: LayerKind::Landuse,
    base: &[BaseStat::Count {
        column: "landuse_count",
    }],
    categories: CategorySource::FirstOf {
        attribute: "landuse",
        sources: &["landuse"],
        prefix: "landuse",
    },
    distinct_count: Some("landuse_type_count"),
    mean_area: None,
    blocklist: None,
    require_valid_geometry: false,
};

const NATURAL: LayerProfile = LayerProfile {
    kind: LayerKind::Natural,
    base: &[BaseStat::Count {
        column: "natural_count",
    }],
    categories: CategorySource::FirstOf {
        attribute: "natural",
        sources: &["natural"],
        prefix: "natural",
    },
    distinct_count: Some("natural_type_count"),
    mean_area: None,
    blocklist: None,
    require_valid_geometry: false,
};

/// The profile for `kind`.
#[must_use]
pub const fn profile(kind: LayerKind) -> &'static LayerProfile {
    match kind {
        LayerKind::Roads => &ROADS,
        LayerKind::Buildings => &BUILDINGS,
        LayerKind::Pois => &POIS,
        LayerKind::Landuse => &LANDUSE,
        LayerKind::Natural => &NATURAL,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn every_kind_has_its_own_profile() {
        for &kind in LayerKind::ALL {
            assert_eq!(profile(kind).kind, kind);
        }
    }

    #[test]
    fn fixed_columns_are_unique_across_layers() {
        let mut seen = BTreeSet::new();
        for &kind in LayerKind::ALL {
            for column in profile(kind).fixed_columns() {
                assert!(seen.insert(column), "Duplicate fixed column: {column}");
            }
        }
    }

    #[test]
    fn every_profile_counts_features() {
        for &kind in LayerKind::ALL {
            assert!(
                profile(kind).count_column().is_some(),
                "{kind} profile has no count column"
            );
        }
    }

    #[test]
    fn mean_area_requires_area_and_count() {
        for &kind in LayerKind::ALL {
            let p = profile(kind);
            if p.mean_area.is_some() {
                assert!(p.area_column().is_some(), "{kind} has mean area but no area sum");
            }
        }
    }
}
