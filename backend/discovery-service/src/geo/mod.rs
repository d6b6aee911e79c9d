//! Geospatial primitives and the radius-query seam.
//!
//! [`GeoIndex`] answers "which live posts lie within r meters of here";
//! [`PostStore`] resolves post ids to records. The in-process
//! [`GridGeoIndex`] implements both; so does the PostgreSQL repository.

mod grid;

pub use grid::GridGeoIndex;

use crate::domain::{Coordinate, Post, Radius};
use crate::error::ServiceResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::f64::consts::PI;
use uuid::Uuid;

/// Mean Earth radius (IUGG), meters
pub const EARTH_RADIUS_METERS: f64 = 6_371_008.8;

/// Slack added to bounding boxes so float rounding never drops a boundary point
const BBOX_EPSILON_DEG: f64 = 1e-9;

/// Great-circle distance between two coordinates in meters
pub fn haversine_distance(a: Coordinate, b: Coordinate) -> f64 {
    let lat1 = a.latitude().to_radians();
    let lat2 = b.latitude().to_radians();
    let delta_lat = (b.latitude() - a.latitude()).to_radians();
    let delta_lng = (b.longitude() - a.longitude()).to_radians();

    let h = (delta_lat / 2.0).sin().powi(2)
        + lat1.cos() * lat2.cos() * (delta_lng / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).max(0.0).sqrt());

    EARTH_RADIUS_METERS * c
}

/// Latitude band plus one or two longitude ranges covering a search circle.
///
/// Two ranges when the circle crosses the antimeridian; the full
/// `[-180, 180]` range when it reaches a pole.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub lon_ranges: Vec<(f64, f64)>,
}

impl BoundingBox {
    pub fn around(center: Coordinate, radius: Radius) -> Self {
        let angular = radius.meters() / EARTH_RADIUS_METERS;
        if angular >= PI {
            return Self::whole_globe();
        }

        let delta_lat = angular.to_degrees() + BBOX_EPSILON_DEG;
        let min_lat = center.latitude() - delta_lat;
        let max_lat = center.latitude() + delta_lat;

        if min_lat <= -90.0 || max_lat >= 90.0 {
            return Self {
                min_lat: min_lat.max(-90.0),
                max_lat: max_lat.min(90.0),
                lon_ranges: vec![(-180.0, 180.0)],
            };
        }

        let ratio = angular.sin() / center.latitude().to_radians().cos();
        if ratio >= 1.0 {
            return Self {
                min_lat,
                max_lat,
                lon_ranges: vec![(-180.0, 180.0)],
            };
        }

        let delta_lon = ratio.asin().to_degrees() + BBOX_EPSILON_DEG;
        let lo = center.longitude() - delta_lon;
        let hi = center.longitude() + delta_lon;

        let lon_ranges = if hi - lo >= 360.0 {
            vec![(-180.0, 180.0)]
        } else if lo < -180.0 {
            vec![(lo + 360.0, 180.0), (-180.0, hi)]
        } else if hi > 180.0 {
            vec![(lo, 180.0), (-180.0, hi - 360.0)]
        } else {
            vec![(lo, hi)]
        };

        Self {
            min_lat,
            max_lat,
            lon_ranges,
        }
    }

    fn whole_globe() -> Self {
        Self {
            min_lat: -90.0,
            max_lat: 90.0,
            lon_ranges: vec![(-180.0, 180.0)],
        }
    }

    pub fn contains(&self, point: Coordinate) -> bool {
        let lat = point.latitude();
        let lon = point.longitude();
        lat >= self.min_lat
            && lat <= self.max_lat
            && self
                .lon_ranges
                .iter()
                .any(|(lo, hi)| lon >= *lo && lon <= *hi)
    }

    /// Longitude ranges padded to two entries, for fixed-arity SQL predicates
    pub fn lon_pair(&self) -> ((f64, f64), (f64, f64)) {
        let first = self.lon_ranges[0];
        let second = self.lon_ranges.get(1).copied().unwrap_or(first);
        (first, second)
    }
}

/// Radius lookup over live (non-deleted) posts.
///
/// Mutations are idempotent: upserting twice or removing an absent post is a no-op.
#[async_trait]
pub trait GeoIndex: Send + Sync {
    /// Ids of all live posts within `radius` of `center` (haversine, inclusive)
    async fn query(&self, center: Coordinate, radius: Radius) -> ServiceResult<HashSet<Uuid>>;

    async fn upsert(&self, post: &Post) -> ServiceResult<()>;

    /// Tombstone a post. Returns whether it was live.
    async fn remove(&self, post_id: Uuid) -> ServiceResult<bool>;

    /// Tombstone every post by `author_id`, returning how many were live
    async fn remove_by_author(&self, author_id: Uuid) -> ServiceResult<u64>;
}

/// Read access to post records
#[async_trait]
pub trait PostStore: Send + Sync {
    /// A live post, `None` if absent or deleted
    async fn get(&self, post_id: Uuid) -> ServiceResult<Option<Post>>;

    /// Live posts among `post_ids`, in no particular order
    async fn get_many(&self, post_ids: &[Uuid]) -> ServiceResult<Vec<Post>>;

    /// Live posts by `author_id` created in `[from, to)`, oldest first
    async fn authored_between(
        &self,
        author_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> ServiceResult<Vec<Post>>;
}
