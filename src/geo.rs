//! Mapping provider seam: coordinates to IANA zone, place id to address.

use std::time::Duration;

use async_trait::async_trait;

use crate::limits::GEO_TIMEOUT_MS;
use crate::model::GeoPoint;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeoError {
    /// The provider did not answer within the deadline.
    Timeout,
    /// The provider answered with a failure, or could not be reached.
    Unavailable(String),
    /// No provider is configured in this deployment.
    Unsupported,
}

impl GeoError {
    pub fn code(&self) -> &'static str {
        match self {
            GeoError::Timeout => "EXTERNAL_TIMEOUT",
            GeoError::Unavailable(_) | GeoError::Unsupported => "EXTERNAL_UNAVAILABLE",
        }
    }
}

impl std::fmt::Display for GeoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GeoError::Timeout => write!(f, "mapping provider timed out"),
            GeoError::Unavailable(msg) => write!(f, "mapping provider unavailable: {msg}"),
            GeoError::Unsupported => write!(f, "no mapping provider configured"),
        }
    }
}

impl std::error::Error for GeoError {}

#[derive(Debug, Clone, PartialEq)]
pub struct PlaceDetails {
    pub formatted_address: String,
    pub point: GeoPoint,
}

#[async_trait]
pub trait GeoProvider: Send + Sync {
    /// IANA zone name covering `point`.
    async fn time_zone_at(&self, point: GeoPoint) -> Result<String, GeoError>;

    async fn place_details(&self, place_id: &str) -> Result<PlaceDetails, GeoError>;
}

/// Used when no provider is wired up. Every lookup reports `Unsupported`.
pub struct NoGeoProvider;

#[async_trait]
impl GeoProvider for NoGeoProvider {
    async fn time_zone_at(&self, _point: GeoPoint) -> Result<String, GeoError> {
        Err(GeoError::Unsupported)
    }

    async fn place_details(&self, _place_id: &str) -> Result<PlaceDetails, GeoError> {
        Err(GeoError::Unsupported)
    }
}

/// Run a provider call under the fixed deadline.
pub async fn with_deadline<T, F>(call: F) -> Result<T, GeoError>
where
    F: std::future::Future<Output = Result<T, GeoError>>,
{
    let result = match tokio::time::timeout(Duration::from_millis(GEO_TIMEOUT_MS), call).await {
        Ok(result) => result,
        Err(_) => Err(GeoError::Timeout),
    };
    if let Err(e) = &result
        && *e != GeoError::Unsupported
    {
        tracing::warn!("mapping provider call failed: {e}");
        metrics::counter!(crate::observability::GEO_LOOKUP_FAILURES_TOTAL, "reason" => e.code()).increment(1);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Stalled;

    #[async_trait]
    impl GeoProvider for Stalled {
        async fn time_zone_at(&self, _point: GeoPoint) -> Result<String, GeoError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok("UTC".into())
        }

        async fn place_details(&self, _place_id: &str) -> Result<PlaceDetails, GeoError> {
            Err(GeoError::Unavailable("offline".into()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_turns_stall_into_timeout() {
        let provider = Stalled;
        let result = with_deadline(provider.time_zone_at(GeoPoint { lat: 40.7, lng: -74.0 })).await;
        assert_eq!(result, Err(GeoError::Timeout));
        assert_eq!(GeoError::Timeout.code(), "EXTERNAL_TIMEOUT");
    }

    #[tokio::test]
    async fn no_provider_is_unsupported() {
        let result = NoGeoProvider.place_details("abc").await;
        assert_eq!(result, Err(GeoError::Unsupported));
    }
}
