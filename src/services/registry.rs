// src/services/registry.rs

//! Registry query client.
//!
//! Three requests per run, made one after another with a pause after each:
//! one bundled-licence query whose notes carry the macro and femto listings,
//! and one frequency-band query each for millimeter-wave and sub-6.

use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::Client;
use url::Url;

use crate::error::{AppError, Result};
use crate::models::{BandFilter, Category, CategorySeries, RegistryConfig, RegistryResponse};
use crate::services::listing::region_counts;
use crate::utils::http;

/// Record positions of the macro and femto notes in the listing response.
const MACRO_NOTE_INDEX: usize = 0;
const FEMTO_NOTE_INDEX: usize = 1;

/// Macro and femto series from the single listing query.
#[derive(Debug, Clone)]
pub struct ListingCounts {
    pub macro_cells: CategorySeries,
    pub femto_cells: CategorySeries,
}

/// Source of per-category station counts.
#[async_trait]
pub trait StationSource: Send + Sync {
    /// Fetch the macro and femto listings (one request).
    async fn fetch_listing(&self) -> Result<ListingCounts>;

    /// Fetch a 5G band tally. `category` must be `MilliWave` or `Sub6`.
    async fn fetch_band(&self, category: Category) -> Result<CategorySeries>;
}

/// HTTP client for the MIC licence search API.
pub struct RegistryClient {
    config: RegistryConfig,
    endpoint: Url,
    client: Client,
}

impl RegistryClient {
    /// Create a new registry client with the given configuration.
    pub fn new(config: RegistryConfig) -> Result<Self> {
        let client = http::create_async_client(&config)?;
        Self::with_client(config, client)
    }

    /// Create a registry client around an existing HTTP client.
    pub fn with_client(config: RegistryConfig, client: Client) -> Result<Self> {
        let endpoint = Url::parse(&config.endpoint)?;
        Ok(Self {
            config,
            endpoint,
            client,
        })
    }

    fn listing_params(&self) -> Vec<(&'static str, String)> {
        vec![
            // 1: licence search
            ("ST", "1".into()),
            // attach detail info (notes)
            ("DA", "1".into()),
            ("SC", "1".into()),
            ("DC", "1".into()),
            // 2: JSON
            ("OF", "2".into()),
            // land mobile base station, bundled
            ("OW", "FB_H".into()),
            ("IT", self.config.jurisdiction.clone()),
            ("NA", self.config.licensee.clone()),
        ]
    }

    /// Band query starting at record `start` (1-based).
    fn band_params(&self, band: &BandFilter, start: usize) -> Vec<(&'static str, String)> {
        vec![
            ("ST", "1".into()),
            ("DA", "0".into()),
            ("SC", start.to_string()),
            ("DC", "3".into()),
            ("OF", "2".into()),
            ("OW", "FB".into()),
            ("HCV", self.config.region_code.clone()),
            ("NA", self.config.licensee.clone()),
            ("FF", band.lower.clone()),
            ("TF", band.upper.clone()),
            ("HZ", band.unit.to_string()),
        ]
    }

    fn band_filter(&self, category: Category) -> Result<&BandFilter> {
        match category {
            Category::MilliWave => Ok(&self.config.milli_wave),
            Category::Sub6 => Ok(&self.config.sub6),
            other => Err(AppError::validation(format!(
                "{other} is not a frequency-band category"
            ))),
        }
    }

    /// Issue one search request and decode the JSON body.
    async fn query(&self, context: &str, params: &[(&'static str, String)]) -> Result<RegistryResponse> {
        log::debug!("Querying registry for {context}");

        let result = self.send(context, params).await;
        http::pace(self.config.request_delay_ms).await;
        result
    }

    /// Query a band, following `SC` until `totalCount` records are collected.
    async fn query_all_pages(&self, context: &str, band: &BandFilter) -> Result<RegistryResponse> {
        let mut merged = self.query(context, &self.band_params(band, 1)).await?;
        let token = merged.update_token(context)?;
        let Some(total) = merged.total_count() else {
            return Ok(merged);
        };

        while merged.musen.len() < total {
            let start = merged.musen.len() + 1;
            log::debug!("{context}: fetching records from {start} of {total}");

            let page = self.query(context, &self.band_params(band, start)).await?;
            let page_token = page.update_token(context)?;
            if page_token != token {
                return Err(AppError::fetch(
                    context,
                    format!("registry update changed while paging ({token} -> {page_token})"),
                ));
            }
            if page.musen.is_empty() {
                break;
            }
            merged.musen.extend(page.musen);
        }

        Ok(merged)
    }

    async fn send(&self, context: &str, params: &[(&'static str, String)]) -> Result<RegistryResponse> {
        let response = self
            .client
            .get(self.endpoint.clone())
            .query(params)
            .send()
            .await
            .map_err(|e| AppError::fetch(context, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::fetch(context, format!("HTTP status {status}")));
        }

        let body = response
            .text()
            .await
            .map_err(|e| AppError::fetch(context, e))?;

        serde_json::from_str(&body)
            .map_err(|e| AppError::fetch(context, format!("malformed JSON: {e}")))
    }
}

#[async_trait]
impl StationSource for RegistryClient {
    async fn fetch_listing(&self) -> Result<ListingCounts> {
        let response = self.query("listing", &self.listing_params()).await?;
        listing_from_response(&response, &self.config.prefecture)
    }

    async fn fetch_band(&self, category: Category) -> Result<CategorySeries> {
        let band = self.band_filter(category)?;
        let context = format!("band {category}");
        let response = self.query_all_pages(&context, band).await?;
        tally_band(&response, category, &self.config.prefecture)
    }
}

/// Build the macro and femto series from a listing response.
pub fn listing_from_response(response: &RegistryResponse, prefecture: &str) -> Result<ListingCounts> {
    let updated = response.update_token("listing")?;

    let series = |category: Category, index: usize| -> Result<CategorySeries> {
        let note = response.note(index, "listing")?;
        let counts = region_counts(note, prefecture)?;
        Ok(CategorySeries {
            category,
            prefecture: prefecture.to_string(),
            counts,
            updated: updated.clone(),
        })
    };

    Ok(ListingCounts {
        macro_cells: series(Category::Macro, MACRO_NOTE_INDEX)?,
        femto_cells: series(Category::Femto, FEMTO_NOTE_INDEX)?,
    })
}

/// Count records per municipality in a band response.
///
/// Addresses come prefixed with the prefecture name, which is stripped. A
/// response holding fewer records than its `totalCount` is rejected.
pub fn tally_band(
    response: &RegistryResponse,
    category: Category,
    prefecture: &str,
) -> Result<CategorySeries> {
    let context = format!("band {category}");
    let updated = response.update_token(&context)?;

    if let Some(total) = response.total_count() {
        if total > response.musen.len() {
            return Err(AppError::fetch(
                &context,
                format!(
                    "registry reports {total} records but returned {}",
                    response.musen.len()
                ),
            ));
        }
    }

    let mut counts: BTreeMap<String, u64> = BTreeMap::new();
    for (i, record) in response.musen.iter().enumerate() {
        let address = record
            .list_info
            .as_ref()
            .and_then(|l| l.tdfk_cd.as_deref())
            .ok_or_else(|| AppError::fetch(&context, format!("record {i} has no listInfo.tdfkCd")))?;

        let municipality = address.strip_prefix(prefecture).unwrap_or(address).trim();
        if municipality.is_empty() {
            log::warn!("{context}: record {i} has no municipality in '{address}'; skipped");
            continue;
        }
        *counts.entry(municipality.to_string()).or_insert(0) += 1;
    }

    Ok(CategorySeries {
        category,
        prefecture: prefecture.to_string(),
        counts,
        updated,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UpdateToken;
    use crate::utils::http::testing::{local_client, serve};

    fn response(json: &str) -> RegistryResponse {
        serde_json::from_str(json).unwrap()
    }

    fn client_for(base: String) -> RegistryClient {
        RegistryClient::with_client(
            RegistryConfig {
                endpoint: format!("{base}/musen/list"),
                request_delay_ms: 0,
                ..RegistryConfig::default()
            },
            local_client(),
        )
        .unwrap()
    }

    fn band_page(total: usize, addresses: &[&str]) -> String {
        let records: Vec<String> = addresses
            .iter()
            .map(|a| format!(r#"{{"listInfo": {{"tdfkCd": "{a}"}}}}"#))
            .collect();
        format!(
            r#"{{"musenInformation": {{"totalCount": "{total}", "lastUpdateDate": "2024-02-01"}}, "musen": [{}]}}"#,
            records.join(",")
        )
    }

    #[test]
    fn test_tally_band_counts_and_strips_prefecture() {
        let response = response(
            r#"{
                "musenInformation": {"totalCount": "3", "lastUpdateDate": "2024-02-01"},
                "musen": [
                    {"listInfo": {"tdfkCd": "愛媛県松山市"}},
                    {"listInfo": {"tdfkCd": "愛媛県今治市"}},
                    {"listInfo": {"tdfkCd": "愛媛県松山市"}}
                ]
            }"#,
        );

        let series = tally_band(&response, Category::Sub6, "愛媛県").unwrap();
        assert_eq!(series.updated, UpdateToken::new("2024-02-01"));
        assert_eq!(series.counts["松山市"], 2);
        assert_eq!(series.counts["今治市"], 1);
        assert_eq!(series.total(), 3);
    }

    #[test]
    fn test_tally_band_requires_address() {
        let response = response(
            r#"{"musenInformation": {"lastUpdateDate": "2024-02-01"}, "musen": [{}]}"#,
        );
        assert!(matches!(
            tally_band(&response, Category::MilliWave, "愛媛県"),
            Err(AppError::Fetch { .. })
        ));
    }

    #[test]
    fn test_listing_from_response() {
        let response = response(
            r#"{
                "musenInformation": {"lastUpdateDate": "2024-02-01"},
                "musen": [
                    {"detailInfo": {"note": "macro\\ncounts\\n愛媛県(7)\\n松山市(5) 西条市(2)"}},
                    {"detailInfo": {"note": "femto\\ncounts\\n香川県(1) 高松市(1) 愛媛県(1) 松山市(1)"}}
                ]
            }"#,
        );

        let listing = listing_from_response(&response, "愛媛県").unwrap();
        assert_eq!(listing.macro_cells.category, Category::Macro);
        assert_eq!(listing.macro_cells.counts["西条市"], 2);
        assert_eq!(listing.femto_cells.counts.len(), 1);
        assert_eq!(listing.femto_cells.counts["松山市"], 1);
        assert_eq!(listing.femto_cells.updated, listing.macro_cells.updated);
    }

    #[test]
    fn test_listing_missing_femto_note_fails() {
        let response = response(
            r#"{
                "musenInformation": {"lastUpdateDate": "2024-02-01"},
                "musen": [{"detailInfo": {"note": "a\\nb\\n愛媛県(1) 松山市(1)"}}]
            }"#,
        );
        assert!(listing_from_response(&response, "愛媛県").is_err());
    }

    #[test]
    fn test_band_params_carry_filter() {
        let client = RegistryClient::new(RegistryConfig::default()).unwrap();
        let params = client.band_params(client.band_filter(Category::MilliWave).unwrap(), 101);

        assert!(params.contains(&("FF", "26.5".to_string())));
        assert!(params.contains(&("TF", "29.5".to_string())));
        assert!(params.contains(&("HZ", "3".to_string())));
        assert!(params.contains(&("HCV", "38000".to_string())));
        assert!(params.contains(&("SC", "101".to_string())));
        assert!(client.band_filter(Category::Macro).is_err());
    }

    #[test]
    fn test_tally_band_rejects_truncated_response() {
        let response = response(&band_page(1500, &["愛媛県松山市", "愛媛県今治市"]));
        assert!(matches!(
            tally_band(&response, Category::Sub6, "愛媛県"),
            Err(AppError::Fetch { .. })
        ));
    }

    #[tokio::test]
    async fn test_fetch_band_follows_pages() {
        let (endpoint, seen) = serve(vec![
            ("200 OK", band_page(3, &["愛媛県松山市", "愛媛県今治市"])),
            ("200 OK", band_page(3, &["愛媛県松山市"])),
        ])
        .await;

        let series = client_for(endpoint).fetch_band(Category::Sub6).await.unwrap();
        assert_eq!(series.total(), 3);
        assert_eq!(series.counts["松山市"], 2);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen[0].starts_with("GET /musen/list?"));
        assert!(seen[0].contains("SC=1&"));
        assert!(seen[1].contains("SC=3&"));
    }

    #[tokio::test]
    async fn test_fetch_band_fails_when_pages_run_out() {
        let (endpoint, _) = serve(vec![
            ("200 OK", band_page(1500, &["愛媛県松山市", "愛媛県今治市"])),
            ("200 OK", band_page(1500, &[])),
        ])
        .await;

        let err = client_for(endpoint).fetch_band(Category::MilliWave).await.unwrap_err();
        assert!(matches!(err, AppError::Fetch { .. }));
    }

    #[tokio::test]
    async fn test_server_error_is_fetch_error() {
        let (endpoint, _) = serve(vec![("500 Internal Server Error", String::new())]).await;

        let err = client_for(endpoint).fetch_listing().await.unwrap_err();
        match err {
            AppError::Fetch { context, message } => {
                assert_eq!(context, "listing");
                assert!(message.contains("500"));
            }
            other => panic!("expected fetch error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_non_json_body_is_fetch_error() {
        let (endpoint, _) =
            serve(vec![("200 OK", "<html>maintenance</html>".to_string())]).await;

        let err = client_for(endpoint).fetch_band(Category::Sub6).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::Fetch { ref message, .. } if message.contains("malformed JSON")
        ));
    }
}
