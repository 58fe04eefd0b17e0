use serde::{Deserialize, Deserializer, Serialize, de};

use crate::fetcher::FetchError;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MediaStatRow {
    #[serde(rename = "mediaKey")]
    pub media_key: String,
    pub views: u64,
    pub uniques: u64,
    #[serde(rename = "dataTransferGB")]
    pub data_transfer_gb: f64,
}

/// Per-media statistics for one date range, ordered by views (highest first).
///
/// Rows with equal view counts keep the order the API returned them in.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct MediaStatReport {
    rows: Vec<MediaStatRow>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSummary {
    pub media: usize,
    pub views: u64,
    pub uniques: u64,
    #[serde(rename = "dataTransferGB")]
    pub data_transfer_gb: f64,
}

impl MediaStatReport {
    pub fn from_rows(mut rows: Vec<MediaStatRow>) -> Self {
        // sort_by is stable
        rows.sort_by(|a, b| b.views.cmp(&a.views));
        Self { rows }
    }

    /// Rows whose media key contains `filter`. An empty filter keeps everything.
    pub fn filtered(&self, filter: &str) -> Self {
        if filter.is_empty() {
            return self.clone();
        }
        Self {
            rows: self
                .rows
                .iter()
                .filter(|r| r.media_key.contains(filter))
                .cloned()
                .collect(),
        }
    }

    pub fn rows(&self) -> &[MediaStatRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn summary(&self) -> ReportSummary {
        self.rows.iter().fold(
            ReportSummary {
                media: self.rows.len(),
                views: 0,
                uniques: 0,
                data_transfer_gb: 0.0,
            },
            |mut acc, r| {
                acc.views = acc.views.saturating_add(r.views);
                acc.uniques = acc.uniques.saturating_add(r.uniques);
                acc.data_transfer_gb += r.data_transfer_gb;
                acc
            },
        )
    }
}

// Upstream payload of GET /reports/service-segments?segmentNames=m
#[derive(Debug, Deserialize)]
struct SegmentsResponse {
    services: Vec<ServiceSegments>,
}

#[derive(Debug, Deserialize)]
struct ServiceSegments {
    m: Vec<MediaSegment>,
}

#[derive(Debug, Deserialize)]
struct MediaSegment {
    key: String,
    totals: MediaTotals,
}

#[derive(Debug, Deserialize)]
struct MediaTotals {
    #[serde(deserialize_with = "count")]
    views: u64,
    #[serde(deserialize_with = "count")]
    uniques: u64,
    #[serde(rename = "dataTransferGB", deserialize_with = "gigabytes")]
    data_transfer_gb: f64,
}

// The API is not consistent about integer vs float encoding of counters.
fn count<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
    let n = serde_json::Number::deserialize(d)?;
    if let Some(v) = n.as_u64() {
        return Ok(v);
    }
    match n.as_f64() {
        Some(f) if f >= 0.0 && f.fract() == 0.0 && f <= u64::MAX as f64 => Ok(f as u64),
        _ => Err(de::Error::custom(format!(
            "expected a non-negative whole count, got {n}"
        ))),
    }
}

fn gigabytes<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
    let f = f64::deserialize(d)?;
    if f.is_finite() && f >= 0.0 {
        Ok(f)
    } else {
        Err(de::Error::custom(format!(
            "expected a non-negative transfer size, got {f}"
        )))
    }
}

/// Reshapes a raw service-segments body into a sorted report.
pub fn parse_report(body: &[u8]) -> Result<MediaStatReport, FetchError> {
    let resp: SegmentsResponse =
        serde_json::from_slice(body).map_err(|e| FetchError::Schema(e.to_string()))?;

    let service = resp
        .services
        .into_iter()
        .next()
        .ok_or_else(|| FetchError::Schema("response has no services".to_string()))?;

    let rows = service
        .m
        .into_iter()
        .map(|seg| MediaStatRow {
            media_key: seg.key,
            views: seg.totals.views,
            uniques: seg.totals.uniques,
            data_transfer_gb: seg.totals.data_transfer_gb,
        })
        .collect();

    Ok(MediaStatReport::from_rows(rows))
}
