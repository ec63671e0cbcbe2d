//! Daily Taiwan futures dataset (TAIFEX)

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;
use tracing::info;

use crate::datasets::crawler_date;
use crate::registry::{ExtractError, Extractor, ParameterGenerator};
use crate::task::TaskParameters;
use crate::RowSet;

/// Destination column order for the futures table
pub const COLUMNS: [&str; 13] = [
    "date",
    "FuturesID",
    "ContractDate",
    "Open",
    "High",
    "Low",
    "Close",
    "Change",
    "ChangePercent",
    "Volume",
    "SettlementPrice",
    "OpenInterest",
    "TradingSession",
];

const DOWNLOAD_URL: &str = "https://www.taifex.com.tw/cht/3/futDataDown";

/// Emits one parameter record per calendar day.
///
/// TAIFEX serves an empty download for non-trading days, so no calendar
/// filtering happens here.
pub struct FuturesDailyGenerator;

impl ParameterGenerator for FuturesDailyGenerator {
    fn generate(&self, start: NaiveDate, end: NaiveDate) -> Vec<TaskParameters> {
        let mut out = Vec::new();
        let mut date = start;
        while date <= end {
            let mut parameters = TaskParameters::new();
            parameters.insert(
                "crawler_date".to_string(),
                date.format("%Y-%m-%d").to_string(),
            );
            parameters.insert("data_source".to_string(), "taifex".to_string());
            out.push(parameters);
            match date.succ_opt() {
                Some(next) => date = next,
                None => break,
            }
        }
        out
    }
}

/// Fetches and normalizes the TAIFEX daily market CSV
pub struct FuturesDailyExtractor {
    client: reqwest::Client,
}

impl FuturesDailyExtractor {
    /// Create an extractor over a shared HTTP client
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Extractor for FuturesDailyExtractor {
    async fn extract(&self, parameters: &TaskParameters) -> Result<RowSet, ExtractError> {
        let date = crawler_date(parameters)?;
        if parameters.get("data_source").map(String::as_str) != Some("taifex") {
            return Ok(empty_rowset());
        }

        info!(date, "fetching TAIFEX daily futures");
        let query_date = date.replace('-', "/");
        let form = [
            ("down_type", "1"),
            ("commodity_id", "all"),
            ("queryStartDate", query_date.as_str()),
            ("queryEndDate", query_date.as_str()),
        ];
        let response = self
            .client
            .post(DOWNLOAD_URL)
            .form(&form)
            .send()
            .await?
            .error_for_status()?;
        // The exchange serves the CSV in Big5
        let body = response.text_with_charset("big5").await?;
        parse_csv(&body)
    }
}

fn empty_rowset() -> RowSet {
    RowSet::new(COLUMNS.iter().map(|c| c.to_string()).collect())
}

fn translate_header(name: &str) -> Option<&'static str> {
    match name {
        "交易日期" => Some("date"),
        "契約" => Some("FuturesID"),
        "到期月份(週別)" => Some("ContractDate"),
        "開盤價" => Some("Open"),
        "最高價" => Some("High"),
        "最低價" => Some("Low"),
        "收盤價" => Some("Close"),
        "漲跌價" => Some("Change"),
        "漲跌%" => Some("ChangePercent"),
        "成交量" => Some("Volume"),
        "結算價" => Some("SettlementPrice"),
        "未沖銷契約數" => Some("OpenInterest"),
        "交易時段" => Some("TradingSession"),
        // Best bid/ask, historical extremes and the other download-only
        // columns are dropped
        _ => None,
    }
}

/// Dashes and blanks in numeric columns mean "no value" upstream
fn clean_numeric(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed == "-" {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

fn translate_session(value: &str) -> String {
    match value.trim() {
        "一般" => "Regular".to_string(),
        "盤後" => "AfterMarket".to_string(),
        // Older downloads predate the session column
        _ => "Regular".to_string(),
    }
}

/// Normalize the TAIFEX daily market CSV.
///
/// Headers arrive in Chinese; only the mapped subset is kept. Dates are
/// normalized to ISO form and the percent sign is stripped from the change
/// percentage.
pub(crate) fn parse_csv(body: &str) -> Result<RowSet, ExtractError> {
    let mut rows = empty_rowset();
    if body.trim().is_empty() {
        return Ok(rows);
    }

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(body.as_bytes());
    let translated: Vec<Option<&'static str>> = reader
        .headers()
        .map_err(|e| ExtractError::Parse(format!("TAIFEX header: {e}")))?
        .iter()
        .map(translate_header)
        .collect();

    for record in reader.records() {
        let record = record.map_err(|e| ExtractError::Parse(format!("TAIFEX record: {e}")))?;
        let mut fields: HashMap<&'static str, &str> = HashMap::new();
        for (header, value) in translated.iter().zip(record.iter()) {
            if let Some(name) = *header {
                fields.insert(name, value);
            }
        }

        let field = |name: &str| fields.get(name).copied().unwrap_or_default();
        let date = field("date").replace('/', "-");
        // Footer and disclaimer lines carry no date
        if date.is_empty() {
            continue;
        }

        rows.push_row(vec![
            date,
            field("FuturesID").to_string(),
            field("ContractDate").replace(' ', ""),
            clean_numeric(field("Open")),
            clean_numeric(field("High")),
            clean_numeric(field("Low")),
            clean_numeric(field("Close")),
            clean_numeric(field("Change")),
            clean_numeric(&field("ChangePercent").replace('%', "")),
            clean_numeric(field("Volume")),
            clean_numeric(field("SettlementPrice")),
            clean_numeric(field("OpenInterest")),
            translate_session(field("TradingSession")),
        ])
        .map_err(ExtractError::Parse)?;
    }
    Ok(rows)
}
