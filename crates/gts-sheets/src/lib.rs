//! Spreadsheet collaborator contract + Google Sheets v4 implementation.

use anyhow::Context;
use async_trait::async_trait;
use gts_core::{RowInsertion, ValueInputMode, WriteBatch};
use gts_storage::{token, TokenError, TokenSource};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, info};

pub mod a1;
pub mod memory;

pub use memory::{InMemorySpreadsheet, SheetCall, SheetOp};

pub const CRATE_NAME: &str = "gts-sheets";

pub const DEFAULT_SHEETS_BASE_URL: &str = "https://sheets.googleapis.com";

/// Failure of a single call against the spreadsheet backend.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status}: {message}")]
    HttpStatus { status: u16, message: String },
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error(transparent)]
    Range(#[from] a1::A1Error),
    #[error("cannot build request url from base {0:?}")]
    InvalidUrl(String),
    #[error("{0}")]
    Injected(String),
}

#[derive(Debug, Error)]
pub enum SheetsError {
    #[error("unable to retrieve values of {range}: {source}")]
    Read {
        range: String,
        #[source]
        source: ApiError,
    },
    #[error("unable to update values of {range}: {source}")]
    Write {
        range: String,
        #[source]
        source: ApiError,
    },
    #[error("unable to insert row {row_number} on sheet {sheet}: {source}")]
    Insert {
        sheet: String,
        row_number: u32,
        #[source]
        source: ApiError,
    },
    #[error("unable to get spreadsheet metadata: {0}")]
    Metadata(#[source] ApiError),
    #[error("sheet {0:?} does not exist in the spreadsheet")]
    SheetNotFound(String),
}

impl SheetsError {
    pub fn is_token(&self) -> bool {
        match self {
            SheetsError::Read { source, .. }
            | SheetsError::Write { source, .. }
            | SheetsError::Insert { source, .. }
            | SheetsError::Metadata(source) => matches!(source, ApiError::Token(_)),
            SheetsError::SheetNotFound(_) => false,
        }
    }
}

#[async_trait]
pub trait SpreadsheetClient: Send + Sync {
    /// Cell values of `range` as displayed; trailing empty rows/cells are omitted.
    async fn read_range(&self, range: &str) -> Result<Vec<Vec<String>>, SheetsError>;

    async fn write_range(
        &self,
        range: &str,
        rows: &WriteBatch,
        mode: ValueInputMode,
    ) -> Result<(), SheetsError>;

    /// Numeric id of the tab called `title`.
    async fn sheet_id(&self, title: &str) -> Result<i64, SheetsError>;

    async fn insert_row(&self, sheet: &str, insertion: RowInsertion) -> Result<(), SheetsError>;
}

#[derive(Debug, Deserialize)]
struct ValueRangeResponse {
    #[serde(default)]
    values: Vec<Vec<JsonValue>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ValueRangeBody<'a> {
    range: &'a str,
    major_dimension: &'static str,
    values: &'a WriteBatch,
}

#[derive(Debug, Deserialize)]
struct SpreadsheetMetadata {
    #[serde(default)]
    sheets: Vec<SheetEntry>,
}

#[derive(Debug, Deserialize)]
struct SheetEntry {
    properties: SheetProperties,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SheetProperties {
    sheet_id: i64,
    title: String,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BatchUpdateRequest {
    pub requests: Vec<Request>,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub insert_dimension: InsertDimensionRequest,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InsertDimensionRequest {
    pub range: DimensionRange,
    pub inherit_from_before: bool,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DimensionRange {
    pub sheet_id: i64,
    pub dimension: &'static str,
    pub start_index: u32,
    pub end_index: u32,
}

impl BatchUpdateRequest {
    pub fn insert_row(sheet_id: i64, insertion: RowInsertion) -> Self {
        let (start_index, end_index) = insertion.index_range();
        Self {
            requests: vec![Request {
                insert_dimension: InsertDimensionRequest {
                    range: DimensionRange {
                        sheet_id,
                        dimension: "ROWS",
                        start_index,
                        end_index,
                    },
                    inherit_from_before: insertion.inherit_from_before,
                },
            }],
        }
    }
}

/// Google Sheets REST client bound to one spreadsheet.
#[derive(Debug)]
pub struct GoogleSheetsClient {
    client: reqwest::Client,
    base_url: String,
    spreadsheet_id: String,
    tokens: TokenSource,
}

impl GoogleSheetsClient {
    pub fn new(
        base_url: impl Into<String>,
        spreadsheet_id: impl Into<String>,
        tokens: TokenSource,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .gzip(true)
            .user_agent(format!("gts/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .context("building sheets http client")?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            spreadsheet_id: spreadsheet_id.into(),
            tokens,
        })
    }

    pub fn spreadsheet_url(&self, tail: &[&str]) -> Result<Url, ApiError> {
        spreadsheet_url(&self.base_url, &self.spreadsheet_id, tail)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, ApiError> {
        let request = token::authorize(request, &self.tokens, &self.client).await?;
        let resp = request.send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(ApiError::HttpStatus {
            status: status.as_u16(),
            message: google_error_message(&body),
        })
    }

    async fn get_values(&self, range: &str) -> Result<Vec<Vec<String>>, ApiError> {
        let url = self.spreadsheet_url(&["values", range])?;
        let resp = self.send(self.client.get(url)).await?;
        let parsed: ValueRangeResponse = resp.json().await?;
        Ok(parsed
            .values
            .into_iter()
            .map(|row| row.into_iter().map(json_cell_to_string).collect())
            .collect())
    }

    async fn put_values(
        &self,
        range: &str,
        rows: &WriteBatch,
        mode: ValueInputMode,
    ) -> Result<(), ApiError> {
        let mut url = self.spreadsheet_url(&["values", range])?;
        url.query_pairs_mut()
            .append_pair("valueInputOption", mode.as_api_str());
        let body = ValueRangeBody {
            range,
            major_dimension: "ROWS",
            values: rows,
        };
        self.send(self.client.put(url).json(&body)).await?;
        Ok(())
    }

    async fn batch_update(&self, body: &BatchUpdateRequest) -> Result<(), ApiError> {
        let action = format!("{}:batchUpdate", self.spreadsheet_id);
        let url = spreadsheet_url(&self.base_url, &action, &[])?;
        self.send(self.client.post(url).json(body)).await?;
        Ok(())
    }

    async fn metadata(&self) -> Result<SpreadsheetMetadata, ApiError> {
        let mut url = self.spreadsheet_url(&[])?;
        url.query_pairs_mut()
            .append_pair("fields", "sheets.properties(sheetId,title)");
        let resp = self.send(self.client.get(url)).await?;
        Ok(resp.json().await?)
    }
}

#[async_trait]
impl SpreadsheetClient for GoogleSheetsClient {
    async fn read_range(&self, range: &str) -> Result<Vec<Vec<String>>, SheetsError> {
        let rows = self.get_values(range).await.map_err(|source| SheetsError::Read {
            range: range.to_string(),
            source,
        })?;
        debug!(range, rows = rows.len(), "values read");
        Ok(rows)
    }

    async fn write_range(
        &self,
        range: &str,
        rows: &WriteBatch,
        mode: ValueInputMode,
    ) -> Result<(), SheetsError> {
        self.put_values(range, rows, mode)
            .await
            .map_err(|source| SheetsError::Write {
                range: range.to_string(),
                source,
            })?;
        debug!(range, rows = rows.len(), mode = mode.as_api_str(), "values written");
        Ok(())
    }

    async fn sheet_id(&self, title: &str) -> Result<i64, SheetsError> {
        let metadata = self.metadata().await.map_err(SheetsError::Metadata)?;
        let sheet_id = metadata
            .sheets
            .into_iter()
            .find(|sheet| sheet.properties.title == title)
            .map(|sheet| sheet.properties.sheet_id)
            .ok_or_else(|| SheetsError::SheetNotFound(title.to_string()))?;
        debug!(sheet = title, sheet_id, "sheet id resolved");
        Ok(sheet_id)
    }

    async fn insert_row(&self, sheet: &str, insertion: RowInsertion) -> Result<(), SheetsError> {
        let sheet_id = self.sheet_id(sheet).await?;
        let body = BatchUpdateRequest::insert_row(sheet_id, insertion);
        self.batch_update(&body)
            .await
            .map_err(|source| SheetsError::Insert {
                sheet: sheet.to_string(),
                row_number: insertion.row_number,
                source,
            })?;
        info!(sheet, row = insertion.row_number, "empty row inserted");
        Ok(())
    }
}

/// `{base}/v4/spreadsheets/{id}/{tail..}`, every segment escaped.
pub fn spreadsheet_url(base_url: &str, spreadsheet: &str, tail: &[&str]) -> Result<Url, ApiError> {
    let invalid = || ApiError::InvalidUrl(base_url.to_string());
    let mut url = Url::parse(base_url).map_err(|_| invalid())?;
    url.path_segments_mut()
        .map_err(|_| invalid())?
        .pop_if_empty()
        .extend(["v4", "spreadsheets", spreadsheet])
        .extend(tail);
    Ok(url)
}

fn json_cell_to_string(value: JsonValue) -> String {
    match value {
        JsonValue::String(s) => s,
        JsonValue::Null => String::new(),
        other => other.to_string(),
    }
}

fn google_error_message(body: &str) -> String {
    serde_json::from_str::<JsonValue>(body)
        .ok()
        .and_then(|v| v.pointer("/error/message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}
