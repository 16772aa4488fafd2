//! Coordinate reference systems supported by the in-memory stores.
//!
//! Geographic WGS 84 (`EPSG:4326`), spherical Web Mercator (`EPSG:3857`)
//! and NAD83 Conus Albers (`EPSG:5070`), the equal-area system overlap
//! thresholds are usually expressed in. Anything else has to be handled by
//! the backing spatial database.

use std::sync::LazyLock;

use geo::{MapCoords, MultiPolygon};

/// Earth radius used by spherical Web Mercator, in meters.
const WEB_MERCATOR_RADIUS: f64 = 6_378_137.0;

/// Latitude limit of the Web Mercator projection.
const WEB_MERCATOR_MAX_LAT: f64 = 85.051_128_779_806_59;

/// GRS 80 semi-major axis, in meters.
const GRS80_A: f64 = 6_378_137.0;

/// GRS 80 inverse flattening.
const GRS80_INV_F: f64 = 298.257_222_101;

/// Ellipsoidal Albers equal-area conic projection.
struct Albers {
    e: f64,
    e2: f64,
    n: f64,
    c: f64,
    rho0: f64,
    lon0: f64,
}

/// `EPSG:5070`: standard parallels 29.5 and 45.5, origin 23N 96W, no
/// false easting or northing.
static CONUS_ALBERS: LazyLock<Albers> = LazyLock::new(|| Albers::new(29.5, 45.5, 23.0, -96.0));

impl Albers {
    fn new(lat1: f64, lat2: f64, lat0: f64, lon0: f64) -> Self {
        let f = GRS80_INV_F.recip();
        let e2 = f * (2.0 - f);
        let mut albers = Self {
            e: e2.sqrt(),
            e2,
            n: 0.0,
            c: 0.0,
            rho0: 0.0,
            lon0: lon0.to_radians(),
        };

        let (m1, m2) = (albers.m(lat1.to_radians()), albers.m(lat2.to_radians()));
        let (q1, q2) = (albers.q(lat1.to_radians()), albers.q(lat2.to_radians()));
        albers.n = m1.mul_add(m1, -(m2 * m2)) / (q2 - q1);
        albers.c = albers.n.mul_add(q1, m1 * m1);
        albers.rho0 = albers.rho(lat0.to_radians());
        albers
    }

    fn q(&self, phi: f64) -> f64 {
        let s = phi.sin();
        let es = self.e * s;
        (1.0 - self.e2)
            * (s / self.e2.mul_add(-s * s, 1.0) - ((1.0 - es) / (1.0 + es)).ln() / (2.0 * self.e))
    }

    fn m(&self, phi: f64) -> f64 {
        let s = phi.sin();
        phi.cos() / self.e2.mul_add(-s * s, 1.0).sqrt()
    }

    fn rho(&self, phi: f64) -> f64 {
        GRS80_A * self.n.mul_add(-self.q(phi), self.c).sqrt() / self.n
    }

    fn forward(&self, lon: f64, lat: f64) -> (f64, f64) {
        let theta = self.n * (lon.to_radians() - self.lon0);
        let rho = self.rho(lat.to_radians());
        (rho * theta.sin(), rho.mul_add(-theta.cos(), self.rho0))
    }

    fn inverse(&self, x: f64, y: f64) -> (f64, f64) {
        let dy = self.rho0 - y;
        let rho = x.hypot(dy);
        let theta = x.atan2(dy);
        let q = (rho * rho * self.n * self.n / (GRS80_A * GRS80_A)).mul_add(-1.0, self.c) / self.n;

        let mut phi = (q / 2.0).clamp(-1.0, 1.0).asin();
        for _ in 0..15 {
            let s = phi.sin();
            let es = self.e * s;
            let one_minus = self.e2.mul_add(-s * s, 1.0);
            let delta = one_minus * one_minus / (2.0 * phi.cos())
                * (q / (1.0 - self.e2) - s / one_minus
                    + ((1.0 - es) / (1.0 + es)).ln() / (2.0 * self.e));
            phi += delta;
            if delta.abs() < 1e-12 {
                break;
            }
        }

        ((self.lon0 + theta / self.n).to_degrees(), phi.to_degrees())
    }
}

/// A supported coordinate reference system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Crs {
    /// Longitude/latitude in degrees.
    Wgs84,
    /// Spherical Web Mercator in meters.
    WebMercator,
    /// NAD83 Conus Albers equal-area in meters.
    ConusAlbers,
}

impl Crs {
    /// Looks up a CRS by EPSG code.
    #[must_use]
    pub const fn from_srid(srid: u32) -> Option<Self> {
        match srid {
            4326 => Some(Self::Wgs84),
            3857 | 900_913 => Some(Self::WebMercator),
            5070 => Some(Self::ConusAlbers),
            _ => None,
        }
    }

    /// EPSG code of this CRS.
    #[must_use]
    pub const fn srid(self) -> u32 {
        match self {
            Self::Wgs84 => 4326,
            Self::WebMercator => 3857,
            Self::ConusAlbers => 5070,
        }
    }

    /// Transforms a single coordinate from `self` into `to`.
    #[must_use]
    pub fn transform(self, to: Self, x: f64, y: f64) -> (f64, f64) {
        if self == to {
            return (x, y);
        }
        let (lon, lat) = match self {
            Self::Wgs84 => (x, y),
            Self::WebMercator => mercator_to_lonlat(x, y),
            Self::ConusAlbers => CONUS_ALBERS.inverse(x, y),
        };
        match to {
            Self::Wgs84 => (lon, lat),
            Self::WebMercator => lonlat_to_mercator(lon, lat),
            Self::ConusAlbers => CONUS_ALBERS.forward(lon, lat),
        }
    }

    /// Transforms a multipolygon from `self` into `to`.
    #[must_use]
    pub fn transform_multipolygon(self, to: Self, mp: &MultiPolygon<f64>) -> MultiPolygon<f64> {
        if self == to {
            return mp.clone();
        }
        mp.map_coords(|c| {
            let (x, y) = self.transform(to, c.x, c.y);
            geo::coord! { x: x, y: y }
        })
    }
}

fn lonlat_to_mercator(lon: f64, lat: f64) -> (f64, f64) {
    let lat = lat.clamp(-WEB_MERCATOR_MAX_LAT, WEB_MERCATOR_MAX_LAT);
    let x = WEB_MERCATOR_RADIUS * lon.to_radians();
    let y = WEB_MERCATOR_RADIUS * (std::f64::consts::FRAC_PI_4 + lat.to_radians() / 2.0).tan().ln();
    (x, y)
}

fn mercator_to_lonlat(x: f64, y: f64) -> (f64, f64) {
    let lon = (x / WEB_MERCATOR_RADIUS).to_degrees();
    let lat = (2.0 * (y / WEB_MERCATOR_RADIUS).exp().atan() - std::f64::consts::FRAC_PI_2).to_degrees();
    (lon, lat)
}
