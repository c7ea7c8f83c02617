//! Reverse geocoding for the parking spot.
//!
//! This module converts a coordinate into candidate `Placemark`s and formats
//! the first candidate into a one-line address.
//!
//! It defines the `AddressResolver` trait as the interface the workflow talks
//! to, a `MockGeocodingService` that answers from a few predefined coordinate
//! boxes for offline use and tests, and a `NominatimGeocoder` that queries a
//! Nominatim-compatible `/reverse` endpoint over HTTP.

use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::{GeocoderConfig, GeocoderProvider};
use crate::location::Coordinate;

/// Address components for one geocoding candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Placemark {
    /// Street name (e.g., "Main St")
    pub thoroughfare: Option<String>,
    /// House or street number (e.g., "12")
    pub sub_thoroughfare: Option<String>,
    /// City or town
    pub locality: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
}

impl fmt::Display for Placemark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", format_address(self))
    }
}

/// Formats a placemark as "street number locality postcode country".
///
/// Every slot is always emitted, so a missing field leaves an empty segment
/// between its neighbours' spaces.
pub fn format_address(placemark: &Placemark) -> String {
    [
        &placemark.thoroughfare,
        &placemark.sub_thoroughfare,
        &placemark.locality,
        &placemark.postal_code,
        &placemark.country,
    ]
    .iter()
    .map(|field| field.as_deref().unwrap_or(""))
    .collect::<Vec<_>>()
    .join(" ")
}

#[derive(Debug, Error)]
pub enum GeocodeError {
    #[error("geocoding request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("geocoder returned status {0}")]
    Status(reqwest::StatusCode),
    #[error("invalid geocoder url: {0}")]
    Url(#[from] url::ParseError),
}

/// Interface for reverse geocoding services
#[async_trait]
pub trait AddressResolver: Send + Sync {
    /// Candidate placemarks for `coordinate`, best first. May be empty.
    async fn reverse_geocode(&self, coordinate: Coordinate)
    -> Result<Vec<Placemark>, GeocodeError>;
}

fn placemark(street: &str, number: &str, locality: &str, postal_code: &str, country: &str) -> Placemark {
    Placemark {
        thoroughfare: Some(street.to_string()),
        sub_thoroughfare: Some(number.to_string()),
        locality: Some(locality.to_string()),
        postal_code: Some(postal_code.to_string()),
        country: Some(country.to_string()),
    }
}

/// Mock geocoding service for testing and offline use
pub struct MockGeocodingService;

#[async_trait]
impl AddressResolver for MockGeocodingService {
    async fn reverse_geocode(
        &self,
        coordinate: Coordinate,
    ) -> Result<Vec<Placemark>, GeocodeError> {
        let Coordinate {
            latitude,
            longitude,
        } = coordinate;

        // Chicago area (roughly)
        if latitude > 41.5 && latitude < 42.0 && longitude > -88.0 && longitude < -87.5 {
            return Ok(vec![placemark(
                "N State St",
                "108",
                "Chicago",
                "60602",
                "United States",
            )]);
        }

        // New York area (roughly)
        if latitude > 40.5 && latitude < 41.0 && longitude > -74.5 && longitude < -73.5 {
            return Ok(vec![placemark(
                "Broadway",
                "1560",
                "New York",
                "10036",
                "United States",
            )]);
        }

        // London area (roughly)
        if latitude > 51.0 && latitude < 52.0 && longitude > -0.5 && longitude < 0.5 {
            return Ok(vec![
                placemark("Bridge St", "1", "London", "SW1A 2JR", "United Kingdom"),
                placemark("Parliament Sq", "", "London", "SW1P 3BD", "United Kingdom"),
            ]);
        }

        // Thessaloniki area (roughly), street number unknown
        if latitude > 40.5 && latitude < 40.8 && longitude > 22.8 && longitude < 23.1 {
            return Ok(vec![Placemark {
                thoroughfare: Some("Egnatia".to_string()),
                sub_thoroughfare: None,
                locality: Some("Thessaloniki".to_string()),
                postal_code: Some("546 30".to_string()),
                country: Some("Greece".to_string()),
            }]);
        }

        Ok(Vec::new())
    }
}

#[derive(Debug, Deserialize)]
struct ReverseResponse {
    error: Option<String>,
    address: Option<ReverseAddress>,
}

#[derive(Debug, Deserialize)]
struct ReverseAddress {
    road: Option<String>,
    house_number: Option<String>,
    city: Option<String>,
    town: Option<String>,
    village: Option<String>,
    postcode: Option<String>,
    country: Option<String>,
}

impl From<ReverseAddress> for Placemark {
    fn from(address: ReverseAddress) -> Self {
        Self {
            thoroughfare: address.road,
            sub_thoroughfare: address.house_number,
            locality: address.city.or(address.town).or(address.village),
            postal_code: address.postcode,
            country: address.country,
        }
    }
}

/// Reverse geocoder for Nominatim-compatible HTTP services
pub struct NominatimGeocoder {
    client: Client,
    base_url: String,
}

impl NominatimGeocoder {
    pub fn new(base_url: &str, user_agent: &str, timeout: Duration) -> Result<Self, GeocodeError> {
        let client = Client::builder()
            .user_agent(user_agent.to_string())
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl AddressResolver for NominatimGeocoder {
    async fn reverse_geocode(
        &self,
        coordinate: Coordinate,
    ) -> Result<Vec<Placemark>, GeocodeError> {
        let mut url = url::Url::parse(&format!("{}/reverse", self.base_url))?;
        url.query_pairs_mut()
            .append_pair("format", "jsonv2")
            .append_pair("lat", &coordinate.latitude.to_string())
            .append_pair("lon", &coordinate.longitude.to_string());

        debug!("Reverse geocoding {coordinate} via {url}");
        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(GeocodeError::Status(response.status()));
        }

        let body: ReverseResponse = response.json().await?;
        if let Some(error) = body.error {
            debug!("Geocoder found nothing at {coordinate}: {error}");
            return Ok(Vec::new());
        }

        Ok(body.address.map(Placemark::from).into_iter().collect())
    }
}

/// Factory function to create the configured geocoding service
pub fn create_geocoding_service(
    config: &GeocoderConfig,
) -> Result<Arc<dyn AddressResolver>, GeocodeError> {
    match config.provider {
        GeocoderProvider::Mock => Ok(Arc::new(MockGeocodingService)),
        GeocoderProvider::Nominatim => Ok(Arc::new(NominatimGeocoder::new(
            &config.base_url,
            &config.user_agent,
            Duration::from_secs(config.timeout_secs),
        )?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn full_placemark() -> Placemark {
        placemark("Main St", "12", "Springfield", "12345", "USA")
    }

    #[test]
    fn test_format_address_all_fields() {
        assert_eq!(
            format_address(&full_placemark()),
            "Main St 12 Springfield 12345 USA"
        );
    }

    #[test]
    fn test_format_address_only_locality() {
        let placemark = Placemark {
            locality: Some("Springfield".to_string()),
            ..Placemark::default()
        };

        assert_eq!(format_address(&placemark), "  Springfield  ");
    }

    #[test]
    fn test_format_address_empty() {
        assert_eq!(format_address(&Placemark::default()), "    ");
    }

    #[test]
    fn test_placemark_display() {
        assert_eq!(full_placemark().to_string(), "Main St 12 Springfield 12345 USA");
    }

    #[tokio::test]
    async fn test_mock_geocoding_chicago() {
        let candidates = MockGeocodingService
            .reverse_geocode(Coordinate::new(41.8781, -87.6298))
            .await
            .unwrap();

        assert_eq!(candidates.len(), 1);
        assert_eq!(
            format_address(&candidates[0]),
            "N State St 108 Chicago 60602 United States"
        );
    }

    #[tokio::test]
    async fn test_mock_geocoding_unknown_location() {
        let candidates = MockGeocodingService
            .reverse_geocode(Coordinate::new(0.0, 0.0))
            .await
            .unwrap();

        assert!(candidates.is_empty());
    }

    #[tokio::test]
    async fn test_nominatim_maps_address() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/reverse")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("format".into(), "jsonv2".into()),
                Matcher::UrlEncoded("lat".into(), "39.7817".into()),
                Matcher::UrlEncoded("lon".into(), "-89.6501".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{
                    "display_name": "12, Main St, Springfield, 12345, USA",
                    "address": {
                        "house_number": "12",
                        "road": "Main St",
                        "town": "Springfield",
                        "postcode": "12345",
                        "country": "USA"
                    }
                }"#,
            )
            .create_async()
            .await;

        let geocoder =
            NominatimGeocoder::new(&server.url(), "parked-test", Duration::from_secs(5)).unwrap();
        let candidates = geocoder
            .reverse_geocode(Coordinate::new(39.7817, -89.6501))
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(candidates, vec![full_placemark()]);
    }

    #[tokio::test]
    async fn test_nominatim_error_body_is_no_candidates() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/reverse")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"error": "Unable to geocode"}"#)
            .create_async()
            .await;

        let geocoder =
            NominatimGeocoder::new(&server.url(), "parked-test", Duration::from_secs(5)).unwrap();
        let candidates = geocoder
            .reverse_geocode(Coordinate::new(0.0, 0.0))
            .await
            .unwrap();

        assert!(candidates.is_empty());
    }

    #[tokio::test]
    async fn test_nominatim_server_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/reverse")
            .match_query(Matcher::Any)
            .with_status(503)
            .create_async()
            .await;

        let geocoder =
            NominatimGeocoder::new(&server.url(), "parked-test", Duration::from_secs(5)).unwrap();
        let result = geocoder.reverse_geocode(Coordinate::new(1.0, 1.0)).await;

        assert!(matches!(result, Err(GeocodeError::Status(status)) if status.as_u16() == 503));
    }
}
