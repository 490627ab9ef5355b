//! Coordinate reference systems understood by the aggregation engine.
//!
//! Only the handful of references the pipeline actually meets are
//! supported: geographic WGS84, Web Mercator, and the 120 WGS84 UTM zones.
//! Everything is identified by its EPSG code.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A supported coordinate reference system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Crs {
    /// Geographic longitude/latitude in degrees (`EPSG:4326`).
    #[default]
    Wgs84,
    /// Spherical Web Mercator in meters (`EPSG:3857`).
    WebMercator,
    /// WGS84 / UTM zone in meters (`EPSG:326zz` north, `EPSG:327zz` south).
    Utm {
        /// Zone number, 1-60.
        zone: u8,
        /// Northern hemisphere when `true`.
        north: bool,
    },
}

impl Crs {
    /// Returns the EPSG code for this reference.
    #[must_use]
    pub const fn epsg(self) -> u32 {
        match self {
            Self::Wgs84 => 4326,
            Self::WebMercator => 3857,
            Self::Utm { zone, north: true } => 32600 + zone as u32,
            Self::Utm { zone, north: false } => 32700 + zone as u32,
        }
    }

    /// Builds a reference from an EPSG code.
    ///
    /// # Errors
    ///
    /// Returns [`UnsupportedCrs`] for codes outside the supported set.
    pub fn from_epsg(code: u32) -> Result<Self, UnsupportedCrs> {
        match code {
            4326 => Ok(Self::Wgs84),
            3857 | 900_913 => Ok(Self::WebMercator),
            32601..=32660 => Ok(Self::Utm {
                zone: u8::try_from(code - 32600).map_err(|_| UnsupportedCrs(code.to_string()))?,
                north: true,
            }),
            32701..=32760 => Ok(Self::Utm {
                zone: u8::try_from(code - 32700).map_err(|_| UnsupportedCrs(code.to_string()))?,
                north: false,
            }),
            _ => Err(UnsupportedCrs(code.to_string())),
        }
    }

    /// Whether coordinates are angular degrees rather than linear units.
    #[must_use]
    pub const fn is_geographic(self) -> bool {
        matches!(self, Self::Wgs84)
    }

    /// The UTM zone covering a WGS84 location.
    #[must_use]
    pub fn utm_for(lng: f64, lat: f64) -> Self {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let zone = (((lng + 180.0) / 6.0).floor() as i64 + 1).clamp(1, 60) as u8;
        Self::Utm {
            zone,
            north: lat >= 0.0,
        }
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.epsg())
    }
}

impl FromStr for Crs {
    type Err = UnsupportedCrs;

    /// Accepts `EPSG:4326`, `epsg:4326`, the bare code `4326`, and the
    /// OGC URN form `urn:ogc:def:crs:EPSG::4326`. `OGC:CRS84` maps to WGS84.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let upper = trimmed.to_ascii_uppercase();
        if upper.ends_with("CRS84") {
            return Ok(Self::Wgs84);
        }
        let code = upper.rsplit(':').next().unwrap_or_default();
        code.parse::<u32>()
            .map_err(|_| UnsupportedCrs(trimmed.to_string()))
            .and_then(Self::from_epsg)
    }
}

impl TryFrom<String> for Crs {
    type Error = UnsupportedCrs;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Crs> for String {
    fn from(value: Crs) -> Self {
        value.to_string()
    }
}

/// A coordinate reference the engine cannot transform.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unsupported coordinate reference: {0}")]
pub struct UnsupportedCrs(pub String);
