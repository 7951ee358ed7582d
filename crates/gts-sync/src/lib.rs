//! Event-to-spreadsheet sync pipeline: fetch, parse, plan, apply.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use gts_core::{
    a1_range, plan_merge, DashboardName, DashboardNameError, Dataset, MergePlan, SheetSnapshot,
    SummaryPlan, SNAPSHOT_RANGE,
};
use gts_sheets::{GoogleSheetsClient, SheetsError, SpreadsheetClient};
use gts_storage::{FetchError, GcsObjectStore, HttpClientConfig, ObjectStore, TokenSource};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

pub mod config;
pub mod dataset;
pub mod event;

pub use config::{ConfigError, ServiceConfig};
pub use dataset::{parse_csv, parse_rows_flexible, ParseError};
pub use event::{StorageEvent, CREATE_METHOD, METHOD_HEADER, SUBJECT_HEADER};

pub const CRATE_NAME: &str = "gts-sync";

/// Coarse failure class; decides the HTTP status of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    ClientInit,
    UnsupportedEvent,
    InvalidObject,
    Fetch,
    Parse,
    Merge,
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("could not create api clients: {0}")]
    ClientInit(#[source] anyhow::Error),
    #[error("event method {0:?} is not handled")]
    UnsupportedEvent(String),
    #[error("event subject {0:?} does not name an object")]
    MissingObject(String),
    #[error(transparent)]
    InvalidObject(#[from] DashboardNameError),
    #[error("could not retrieve object {object}: {source}")]
    Fetch {
        object: String,
        #[source]
        source: FetchError,
    },
    #[error("could not parse csv object {object}: {source}")]
    Parse {
        object: String,
        #[source]
        source: ParseError,
    },
    #[error("{dashboard}: could not update the spreadsheet: {source}")]
    Merge {
        dashboard: String,
        #[source]
        source: SheetsError,
    },
    #[error("{dashboard}: could not update the Summary sheet: {source}")]
    Summary {
        dashboard: String,
        #[source]
        source: SheetsError,
    },
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::ClientInit(_) => ErrorKind::ClientInit,
            // No access token means the backend was never reached.
            SyncError::Fetch { source, .. } if source.is_token() => ErrorKind::ClientInit,
            SyncError::Merge { source, .. } | SyncError::Summary { source, .. }
                if source.is_token() =>
            {
                ErrorKind::ClientInit
            }
            SyncError::UnsupportedEvent(_) => ErrorKind::UnsupportedEvent,
            SyncError::MissingObject(_) | SyncError::InvalidObject(_) => ErrorKind::InvalidObject,
            SyncError::Fetch { .. } => ErrorKind::Fetch,
            SyncError::Parse { .. } => ErrorKind::Parse,
            SyncError::Merge { .. } | SyncError::Summary { .. } => ErrorKind::Merge,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncOutcome {
    pub event_id: Uuid,
    pub object: String,
    pub dashboard: String,
    pub content_sha256: String,
    pub write_range: String,
    pub rows_written: usize,
    pub inserted_row: Option<u32>,
    pub summary_refreshed: bool,
}

/// Offline result of planning one upload against a given sheet state.
#[derive(Debug, Clone, Serialize)]
pub struct Preview {
    pub merge: MergePlan,
    pub summary: Option<SummaryPlan>,
}

pub struct SheetSync {
    config: ServiceConfig,
    objects: Arc<dyn ObjectStore>,
    sheets: Arc<dyn SpreadsheetClient>,
    today: fn() -> NaiveDate,
}

impl SheetSync {
    /// Google Cloud Storage + Google Sheets clients with credentials from the environment.
    pub fn new(config: ServiceConfig) -> Result<Self, SyncError> {
        let tokens = TokenSource::from_env();
        let objects = GcsObjectStore::new(
            HttpClientConfig {
                timeout: config.download_timeout(),
                ..Default::default()
            },
            config.storage_base_url.clone(),
            tokens.clone(),
        )
        .map_err(SyncError::ClientInit)?;
        let sheets = GoogleSheetsClient::new(
            config.sheets_base_url.clone(),
            config.spreadsheet_id.clone(),
            tokens,
        )
        .map_err(SyncError::ClientInit)?;
        Ok(Self::with_clients(config, Arc::new(objects), Arc::new(sheets)))
    }

    pub fn with_clients(
        config: ServiceConfig,
        objects: Arc<dyn ObjectStore>,
        sheets: Arc<dyn SpreadsheetClient>,
    ) -> Self {
        Self {
            config,
            objects,
            sheets,
            today: utc_today,
        }
    }

    /// Replace the calendar used to date the Summary row.
    pub fn with_clock(mut self, today: fn() -> NaiveDate) -> Self {
        self.today = today;
        self
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub async fn handle_event(&self, event: &StorageEvent) -> Result<SyncOutcome, SyncError> {
        info!(method = %event.method, "received event");
        if !event.is_create() {
            return Err(SyncError::UnsupportedEvent(event.method.clone()));
        }
        let object = event
            .object_path(&self.config.bucket)
            .ok_or_else(|| SyncError::MissingObject(event.subject.clone()))?;
        self.sync_object(&object).await
    }

    /// Fetch one object and merge it into its dashboard sheet.
    pub async fn sync_object(&self, object: &str) -> Result<SyncOutcome, SyncError> {
        let event_id = Uuid::new_v4();
        let span = info_span!("storage_event", %event_id, object);
        self.sync_object_inner(event_id, object).instrument(span).await
    }

    async fn sync_object_inner(
        &self,
        event_id: Uuid,
        object: &str,
    ) -> Result<SyncOutcome, SyncError> {
        let dashboard = DashboardName::from_object_path(object)?;

        info!(bucket = %self.config.bucket, "fetching object");
        let fetched = self
            .objects
            .fetch(&self.config.bucket, object)
            .await
            .map_err(|source| SyncError::Fetch {
                object: object.to_string(),
                source,
            })?;

        let dataset = parse_csv(&fetched.body).map_err(|source| SyncError::Parse {
            object: object.to_string(),
            source,
        })?;

        let plan = self.merge(&dashboard, &dataset).await?;

        Ok(SyncOutcome {
            event_id,
            object: object.to_string(),
            dashboard: dashboard.to_string(),
            content_sha256: fetched.content_hash,
            write_range: plan.write_range(),
            rows_written: plan.rows.len(),
            inserted_row: plan.insertion.map(|i| i.row_number),
            summary_refreshed: plan.refresh_summary,
        })
    }

    /// Merge `dataset` into the sheet named after `dashboard`; refreshes the
    /// Summary sheet afterwards for the KPI dashboard.
    pub async fn merge(
        &self,
        dashboard: &DashboardName,
        dataset: &Dataset,
    ) -> Result<MergePlan, SyncError> {
        let merge_err = |source: SheetsError| SyncError::Merge {
            dashboard: dashboard.to_string(),
            source,
        };

        let snapshot_range = a1_range(dashboard.as_str(), SNAPSHOT_RANGE);
        let snapshot = SheetSnapshot::new(
            self.sheets
                .read_range(&snapshot_range)
                .await
                .map_err(merge_err)?,
        );
        if snapshot.is_empty() {
            info!(%dashboard, "sheet is empty");
        }

        let plan = plan_merge(dashboard, &snapshot, dataset, &self.config.kpi_dashboard);
        if let Some(top) = &plan.top_date {
            info!(
                %dashboard,
                top_date = %top.value,
                row = top.row_number(),
                "top date on existing sheet"
            );
        }

        if let Some(insertion) = plan.insertion {
            info!(%dashboard, "new data found");
            self.sheets
                .insert_row(dashboard.as_str(), insertion)
                .await
                .map_err(merge_err)?;
        }

        let range = plan.write_range();
        self.sheets
            .write_range(&range, &plan.rows, plan.value_input)
            .await
            .map_err(merge_err)?;
        info!(%dashboard, %range, rows = plan.rows.len(), "data appended");

        if plan.refresh_summary {
            self.refresh_summary()
                .await
                .map_err(|source| SyncError::Summary {
                    dashboard: dashboard.to_string(),
                    source,
                })?;
        }

        Ok(plan)
    }

    pub async fn refresh_summary(&self) -> Result<SummaryPlan, SheetsError> {
        let summary = SummaryPlan::for_day((self.today)());
        self.sheets
            .insert_row(&summary.sheet, summary.insertion)
            .await?;
        self.sheets
            .write_range(&summary.write_range(), &summary.rows, summary.value_input)
            .await?;
        info!("updated the Summary sheet");
        Ok(summary)
    }
}

/// Plan an upload without any network access.
pub fn preview(
    object: &str,
    csv_bytes: &[u8],
    snapshot: SheetSnapshot,
    kpi_dashboard: &str,
    today: NaiveDate,
) -> Result<Preview, SyncError> {
    let dashboard = DashboardName::from_object_path(object)?;
    let dataset = parse_csv(csv_bytes).map_err(|source| SyncError::Parse {
        object: object.to_string(),
        source,
    })?;
    let merge = plan_merge(&dashboard, &snapshot, &dataset, kpi_dashboard);
    let summary = merge.refresh_summary.then(|| SummaryPlan::for_day(today));
    Ok(Preview { merge, summary })
}

fn utc_today() -> NaiveDate {
    Utc::now().date_naive()
}
