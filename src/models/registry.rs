//! Wire types for the MIC radio licence search API (`OF=2`, JSON output).

use serde::Deserialize;

use crate::error::{AppError, Result};
use crate::models::UpdateToken;

/// Top-level search response.
#[derive(Debug, Clone, Deserialize)]
pub struct RegistryResponse {
    #[serde(rename = "musenInformation")]
    pub information: Option<MusenInformation>,

    #[serde(default)]
    pub musen: Vec<StationRecord>,
}

/// Result metadata.
#[derive(Debug, Clone, Deserialize)]
pub struct MusenInformation {
    #[serde(rename = "lastUpdateDate")]
    pub last_update_date: Option<String>,

    #[serde(rename = "totalCount")]
    pub total_count: Option<String>,
}

/// One licence record.
#[derive(Debug, Clone, Deserialize)]
pub struct StationRecord {
    #[serde(rename = "listInfo")]
    pub list_info: Option<ListInfo>,

    #[serde(rename = "detailInfo")]
    pub detail_info: Option<DetailInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListInfo {
    /// Installation address, prefecture name first (e.g. `愛媛県松山市`)
    #[serde(rename = "tdfkCd")]
    pub tdfk_cd: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetailInfo {
    /// Free-text remarks; for bundled licences this holds the per-area listing
    pub note: Option<String>,
}

impl RegistryResponse {
    /// The update token, required on every response.
    pub fn update_token(&self, context: &str) -> Result<UpdateToken> {
        self.information
            .as_ref()
            .and_then(|info| info.last_update_date.as_deref())
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(UpdateToken::new)
            .ok_or_else(|| AppError::fetch(context, "missing musenInformation.lastUpdateDate"))
    }

    /// Number of matching records the registry reports, if given.
    pub fn total_count(&self) -> Option<usize> {
        self.information
            .as_ref()
            .and_then(|i| i.total_count.as_deref())
            .and_then(|t| t.trim().parse().ok())
    }

    /// The detail note of the record at `index`.
    pub fn note(&self, index: usize, context: &str) -> Result<&str> {
        let record = self
            .musen
            .get(index)
            .ok_or_else(|| AppError::fetch(context, format!("no record at index {index}")))?;

        record
            .detail_info
            .as_ref()
            .and_then(|d| d.note.as_deref())
            .ok_or_else(|| {
                AppError::fetch(context, format!("record {index} has no detailInfo.note"))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_listing_response() {
        let json = r#"{
            "musenInformation": {"totalCount": "2", "lastUpdateDate": "2024-01-05"},
            "musen": [
                {"listInfo": {"tdfkCd": "全国"}, "detailInfo": {"note": "a\\nb\\n愛媛県(3)"}},
                {"detailInfo": {"note": "x"}}
            ]
        }"#;
        let response: RegistryResponse = serde_json::from_str(json).unwrap();

        assert_eq!(
            response.update_token("test").unwrap(),
            UpdateToken::new("2024-01-05")
        );
        assert_eq!(response.note(1, "test").unwrap(), "x");
        assert!(response.note(2, "test").is_err());
    }

    #[test]
    fn test_missing_update_date_is_fetch_error() {
        let response: RegistryResponse =
            serde_json::from_str(r#"{"musenInformation": {}, "musen": []}"#).unwrap();
        assert!(matches!(
            response.update_token("band"),
            Err(AppError::Fetch { .. })
        ));

        let response: RegistryResponse = serde_json::from_str(r#"{"musen": []}"#).unwrap();
        assert!(response.update_token("band").is_err());
    }
}
