use crate::error::{ServiceError, ServiceResult};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A validated point on the globe, in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Coordinate {
    latitude: f64,
    longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> ServiceResult<Self> {
        if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
            return Err(ServiceError::InvalidCoordinate(format!(
                "latitude must be within [-90, 90], got {}",
                latitude
            )));
        }
        if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
            return Err(ServiceError::InvalidCoordinate(format!(
                "longitude must be within [-180, 180], got {}",
                longitude
            )));
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }
}

impl<'de> Deserialize<'de> for Coordinate {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Raw {
            latitude: f64,
            longitude: f64,
        }

        let raw = Raw::deserialize(deserializer)?;
        Coordinate::new(raw.latitude, raw.longitude).map_err(serde::de::Error::custom)
    }
}

/// Search radius in meters
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Radius(f64);

impl Radius {
    /// Zero is accepted; negative or non-finite values are not
    pub fn new(meters: f64) -> ServiceResult<Self> {
        if !meters.is_finite() || meters < 0.0 {
            return Err(ServiceError::InvalidRadius(format!(
                "radius must be a non-negative number of meters, got {}",
                meters
            )));
        }
        Ok(Self(meters))
    }

    pub fn meters(&self) -> f64 {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 <= 0.0
    }
}

/// A geotagged post. Immutable after creation apart from the soft-delete tombstone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: Uuid,
    pub author_id: Uuid,
    pub coordinate: Coordinate,
    /// Opaque content reference, e.g. a comma-separated list of image keys
    pub content_ref: String,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Post {
    pub fn new(author_id: Uuid, coordinate: Coordinate, content_ref: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            author_id,
            coordinate,
            content_ref: content_ref.into(),
            created_at: Utc::now(),
            deleted_at: None,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// One viewer having seen one post; unique per (viewer, post)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewRecord {
    pub viewer_id: Uuid,
    pub post_id: Uuid,
    pub viewed_at: DateTime<Utc>,
}

/// Half-open UTC interval `[first day of month, first day of next month)`
pub fn month_bounds(year: i32, month: u32) -> ServiceResult<(DateTime<Utc>, DateTime<Utc>)> {
    let invalid = || ServiceError::InvalidInput(format!("invalid month {}-{}", year, month));

    let start = NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(invalid)?;
    let end = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    }
    .ok_or_else(invalid)?;

    let to_utc = |d: NaiveDate| {
        d.and_hms_opt(0, 0, 0)
            .map(|naive| Utc.from_utc_datetime(&naive))
            .ok_or_else(invalid)
    };

    Ok((to_utc(start)?, to_utc(end)?))
}
