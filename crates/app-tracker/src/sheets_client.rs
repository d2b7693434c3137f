//! Google Sheets storage for the `Applications` tab.

use crate::auth::{https_connector, GoogleAuth, SCOPES};
use crate::config::SheetConfig;
use crate::error::{TrackerError, TrackerResult};
use crate::reconciler::SheetStore;
use crate::retry::with_timeout;
use google_sheets4::api::{
    AddConditionalFormatRuleRequest, AddSheetRequest, BatchUpdateSpreadsheetRequest,
    BooleanCondition, BooleanRule, CellFormat, ClearValuesRequest, Color, ConditionValue,
    ConditionalFormatRule, GridProperties, GridRange, Request, Sheet, SheetProperties,
    SortRangeRequest, SortSpec, Spreadsheet, SpreadsheetProperties, ValueRange,
};
use google_sheets4::hyper_rustls::HttpsConnector;
use google_sheets4::Sheets;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use tracker_types::{ApplicationStatus, SheetRow, SHEET_HEADERS};

pub const TAB_NAME: &str = "Applications";

/// Rows covered by the per-status colour rules
const FORMATTED_ROWS: i32 = 1000;

/// Index of the Last Updated column
const LAST_UPDATED_COLUMN: i32 = 4;

/// Background colour for each status row
const STATUS_COLOURS: [(ApplicationStatus, (f32, f32, f32)); 5] = [
    (ApplicationStatus::Applied, (0.7, 0.9, 0.7)),
    (ApplicationStatus::InReview, (1.0, 0.95, 0.6)),
    (ApplicationStatus::Interview, (0.7, 0.85, 1.0)),
    (ApplicationStatus::Offer, (0.85, 0.75, 1.0)),
    (ApplicationStatus::Rejected, (1.0, 0.7, 0.7)),
];

type Hub = Sheets<HttpsConnector<HttpConnector>>;

pub struct GoogleSheetsStore {
    hub: Hub,
    spreadsheet_id: String,
    sheet_id: i32,
    timeout: Duration,
}

impl GoogleSheetsStore {
    /// Open the configured spreadsheet, falling back to the id remembered
    /// from an earlier run, and create a new one when neither exists. The
    /// `Applications` tab is added with headers and colour rules if missing.
    pub async fn ensure_spreadsheet(
        auth: GoogleAuth,
        config: &SheetConfig,
        persisted_id: Option<&str>,
        timeout: Duration,
    ) -> TrackerResult<Self> {
        let client = Client::builder(TokioExecutor::new()).build(https_connector()?);
        let hub = Sheets::new(client, auth);

        let existing = match (config.spreadsheet_id.as_deref(), persisted_id) {
            (Some(id), _) => Some(fetch_spreadsheet(&hub, id, timeout).await?),
            (None, Some(id)) => match fetch_spreadsheet(&hub, id, timeout).await {
                Ok(spreadsheet) => Some(spreadsheet),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    tracing::warn!("Remembered spreadsheet {} unavailable, creating a new one: {}", id, e);
                    None
                }
            },
            (None, None) => None,
        };

        let (spreadsheet, created) = match existing {
            Some(spreadsheet) => (spreadsheet, false),
            None => (
                create_spreadsheet(&hub, &config.spreadsheet_name, timeout).await?,
                true,
            ),
        };

        let spreadsheet_id = spreadsheet
            .spreadsheet_id
            .clone()
            .ok_or_else(|| TrackerError::sheet("Spreadsheet response without id"))?;

        let mut store = Self {
            hub,
            spreadsheet_id,
            sheet_id: 0,
            timeout,
        };

        match find_tab(&spreadsheet) {
            Some(sheet_id) => {
                store.sheet_id = sheet_id;
                if created {
                    store.prepare_tab().await?;
                }
            }
            None => {
                store.sheet_id = store.add_tab().await?;
                store.prepare_tab().await?;
            }
        }

        tracing::info!("Using spreadsheet {}", store.spreadsheet_url());
        Ok(store)
    }

    pub fn spreadsheet_id(&self) -> &str {
        &self.spreadsheet_id
    }

    pub fn spreadsheet_url(&self) -> String {
        format!("https://docs.google.com/spreadsheets/d/{}", self.spreadsheet_id)
    }

    /// Remove every data row, keeping the header.
    pub async fn clear(&self) -> TrackerResult<()> {
        let call = self
            .hub
            .spreadsheets()
            .values_clear(ClearValuesRequest::default(), &self.spreadsheet_id, &data_range())
            .add_scopes(SCOPES);
        self.call("Clear sheet", async { call.doit().await }).await?;
        tracing::info!("Cleared all application rows");
        Ok(())
    }

    /// Most recently updated applications first.
    pub async fn sort_by_last_updated(&self) -> TrackerResult<()> {
        let request = Request {
            sort_range: Some(SortRangeRequest {
                range: Some(self.grid_range(1, None)),
                sort_specs: Some(vec![SortSpec {
                    dimension_index: Some(LAST_UPDATED_COLUMN),
                    sort_order: Some("DESCENDING".to_string()),
                    ..Default::default()
                }]),
            }),
            ..Default::default()
        };
        self.batch_update("Sort sheet", vec![request]).await
    }

    async fn add_tab(&self) -> TrackerResult<i32> {
        let request = Request {
            add_sheet: Some(AddSheetRequest {
                properties: Some(tab_properties(None)),
            }),
            ..Default::default()
        };
        let call = self
            .hub
            .spreadsheets()
            .batch_update(
                BatchUpdateSpreadsheetRequest {
                    requests: Some(vec![request]),
                    ..Default::default()
                },
                &self.spreadsheet_id,
            )
            .add_scopes(SCOPES);
        let (_, response) = self.call("Add tab", async { call.doit().await }).await?;

        let sheet_id = response
            .replies
            .unwrap_or_default()
            .into_iter()
            .find_map(|reply| reply.add_sheet?.properties?.sheet_id)
            .ok_or_else(|| TrackerError::sheet("Add tab response without sheet id"))?;

        tracing::info!("Added '{}' tab", TAB_NAME);
        Ok(sheet_id)
    }

    /// Header row plus one colour rule per status.
    async fn prepare_tab(&self) -> TrackerResult<()> {
        self.write_headers().await?;
        self.add_status_colours().await
    }

    async fn write_headers(&self) -> TrackerResult<()> {
        let header = SHEET_HEADERS.iter().map(|h| h.to_string()).collect();
        let call = self
            .hub
            .spreadsheets()
            .values_update(value_range(header), &self.spreadsheet_id, &row_range(1))
            .value_input_option("RAW")
            .add_scopes(SCOPES);
        self.call("Write headers", async { call.doit().await }).await?;
        Ok(())
    }

    async fn add_status_colours(&self) -> TrackerResult<()> {
        let requests = STATUS_COLOURS
            .iter()
            .map(|&(status, (red, green, blue))| Request {
                add_conditional_format_rule: Some(AddConditionalFormatRuleRequest {
                    index: Some(0),
                    rule: Some(ConditionalFormatRule {
                        ranges: Some(vec![self.grid_range(1, Some(FORMATTED_ROWS))]),
                        boolean_rule: Some(BooleanRule {
                            condition: Some(BooleanCondition {
                                type_: Some("CUSTOM_FORMULA".to_string()),
                                values: Some(vec![ConditionValue {
                                    user_entered_value: Some(status_formula(status)),
                                    ..Default::default()
                                }]),
                            }),
                            format: Some(CellFormat {
                                background_color: Some(Color {
                                    red: Some(red),
                                    green: Some(green),
                                    blue: Some(blue),
                                    alpha: None,
                                }),
                                ..Default::default()
                            }),
                        }),
                        ..Default::default()
                    }),
                }),
                ..Default::default()
            })
            .collect();
        self.batch_update("Add status colours", requests).await
    }

    async fn batch_update(&self, what: &str, requests: Vec<Request>) -> TrackerResult<()> {
        let call = self
            .hub
            .spreadsheets()
            .batch_update(
                BatchUpdateSpreadsheetRequest {
                    requests: Some(requests),
                    ..Default::default()
                },
                &self.spreadsheet_id,
            )
            .add_scopes(SCOPES);
        self.call(what, async { call.doit().await }).await?;
        Ok(())
    }

    fn grid_range(&self, start_row: i32, end_row: Option<i32>) -> GridRange {
        GridRange {
            sheet_id: Some(self.sheet_id),
            start_row_index: Some(start_row),
            end_row_index: end_row,
            start_column_index: Some(0),
            end_column_index: Some(SHEET_HEADERS.len() as i32),
        }
    }

    async fn call<T>(
        &self,
        what: &str,
        fut: impl Future<Output = Result<T, google_sheets4::Error>>,
    ) -> TrackerResult<T> {
        with_timeout(
            self.timeout,
            async { fut.await.map_err(|e| api_error(what, e)) },
            || TrackerError::sheet(format!("{} timed out", what)),
        )
        .await
    }
}

impl SheetStore for GoogleSheetsStore {
    async fn read_rows(&self) -> TrackerResult<Vec<(u32, SheetRow)>> {
        let call = self
            .hub
            .spreadsheets()
            .values_get(&self.spreadsheet_id, &data_range())
            .add_scopes(SCOPES);
        let (_, range) = self.call("Read rows", async { call.doit().await }).await?;

        Ok(rows_from_values(range.values.unwrap_or_default()))
    }

    async fn append_row(&self, row: &SheetRow) -> TrackerResult<()> {
        let call = self
            .hub
            .spreadsheets()
            .values_append(
                value_range(row.to_cells()),
                &self.spreadsheet_id,
                &format!("{}!A:G", TAB_NAME),
            )
            .value_input_option("RAW")
            .insert_data_option("INSERT_ROWS")
            .add_scopes(SCOPES);
        self.call("Append row", async { call.doit().await }).await?;
        Ok(())
    }

    async fn update_row(&self, row_number: u32, row: &SheetRow) -> TrackerResult<()> {
        let call = self
            .hub
            .spreadsheets()
            .values_update(
                value_range(row.to_cells()),
                &self.spreadsheet_id,
                &row_range(row_number),
            )
            .value_input_option("RAW")
            .add_scopes(SCOPES);
        self.call("Update row", async { call.doit().await }).await?;
        Ok(())
    }
}

async fn fetch_spreadsheet(hub: &Hub, id: &str, timeout: Duration) -> TrackerResult<Spreadsheet> {
    let call = hub.spreadsheets().get(id).add_scopes(SCOPES);
    let (_, spreadsheet) = with_timeout(
        timeout,
        async { call.doit().await.map_err(|e| api_error("Open spreadsheet", e)) },
        || TrackerError::sheet("Open spreadsheet timed out"),
    )
    .await?;
    Ok(spreadsheet)
}

async fn create_spreadsheet(hub: &Hub, title: &str, timeout: Duration) -> TrackerResult<Spreadsheet> {
    tracing::info!("Creating spreadsheet '{}'", title);
    let request = Spreadsheet {
        properties: Some(SpreadsheetProperties {
            title: Some(title.to_string()),
            ..Default::default()
        }),
        sheets: Some(vec![Sheet {
            properties: Some(tab_properties(Some(0))),
            ..Default::default()
        }]),
        ..Default::default()
    };
    let call = hub.spreadsheets().create(request).add_scopes(SCOPES);
    let (_, spreadsheet) = with_timeout(
        timeout,
        async { call.doit().await.map_err(|e| api_error("Create spreadsheet", e)) },
        || TrackerError::sheet("Create spreadsheet timed out"),
    )
    .await?;
    Ok(spreadsheet)
}

fn tab_properties(sheet_id: Option<i32>) -> SheetProperties {
    SheetProperties {
        sheet_id,
        title: Some(TAB_NAME.to_string()),
        grid_properties: Some(GridProperties {
            frozen_row_count: Some(1),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn find_tab(spreadsheet: &Spreadsheet) -> Option<i32> {
    spreadsheet
        .sheets
        .as_ref()?
        .iter()
        .filter_map(|sheet| sheet.properties.as_ref())
        .find(|props| props.title.as_deref() == Some(TAB_NAME))
        .and_then(|props| props.sheet_id)
}

fn data_range() -> String {
    format!("{}!A2:G", TAB_NAME)
}

fn row_range(row_number: u32) -> String {
    format!("{}!A{}:G{}", TAB_NAME, row_number, row_number)
}

fn value_range(cells: Vec<String>) -> ValueRange {
    ValueRange {
        values: Some(vec![cells.into_iter().map(Value::String).collect()]),
        ..Default::default()
    }
}

fn status_formula(status: ApplicationStatus) -> String {
    format!("=$C2=\"{}\"", status)
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Data rows start at sheet row 2; blank rows are skipped but still count
/// toward numbering.
fn rows_from_values(values: Vec<Vec<Value>>) -> Vec<(u32, SheetRow)> {
    values
        .iter()
        .enumerate()
        .filter_map(|(idx, cells)| {
            let cells: Vec<String> = cells.iter().map(cell_text).collect();
            let row = SheetRow::from_cells(&cells);
            (!row.is_blank()).then_some((idx as u32 + 2, row))
        })
        .collect()
}

fn api_error(what: &str, err: google_sheets4::Error) -> TrackerError {
    match &err {
        google_sheets4::Error::MissingToken(_) => TrackerError::auth(format!("{}: {}", what, err)),
        google_sheets4::Error::Failure(response) if response.status().as_u16() == 401 => {
            TrackerError::auth(format!("{}: unauthorized", what))
        }
        google_sheets4::Error::BadRequest(body) if body["error"]["code"] == 401 => {
            TrackerError::auth(format!("{}: {}", what, body["error"]["message"]))
        }
        _ => TrackerError::sheet(format!("{}: {}", what, err)),
    }
}
