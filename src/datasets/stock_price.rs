//! Daily Taiwan stock price dataset (TWSE and TPEX sub-sources)

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, Weekday};
use serde_json::Value;
use std::collections::HashMap;
use tracing::info;

use crate::datasets::crawler_date;
use crate::registry::{ExtractError, Extractor, ParameterGenerator};
use crate::task::TaskParameters;
use crate::RowSet;

/// Sub-sources for this dataset; each becomes its own queue
pub const SOURCES: [&str; 2] = ["twse", "tpex"];

/// Destination column order shared by both sub-sources
pub const COLUMNS: [&str; 10] = [
    "StockID",
    "TradeVolume",
    "Transaction",
    "TradeValue",
    "Open",
    "Max",
    "Min",
    "Close",
    "Change",
    "date",
];

/// Emits one parameter record per trading day and sub-source.
///
/// The exchanges publish no data on Sundays, so Sundays yield no work.
pub struct StockPriceGenerator;

impl ParameterGenerator for StockPriceGenerator {
    fn generate(&self, start: NaiveDate, end: NaiveDate) -> Vec<TaskParameters> {
        let mut out = Vec::new();
        let mut date = start;
        while date <= end {
            if date.weekday() != Weekday::Sun {
                for source in SOURCES {
                    let mut parameters = TaskParameters::new();
                    parameters.insert(
                        "crawler_date".to_string(),
                        date.format("%Y-%m-%d").to_string(),
                    );
                    parameters.insert("data_source".to_string(), source.to_string());
                    out.push(parameters);
                }
            }
            match date.succ_opt() {
                Some(next) => date = next,
                None => break,
            }
        }
        out
    }
}

/// Fetches and normalizes daily quotes from the TWSE or TPEX endpoint
pub struct StockPriceExtractor {
    client: reqwest::Client,
}

impl StockPriceExtractor {
    /// Create an extractor over a shared HTTP client
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn fetch_json(&self, url: &str) -> Result<Value, ExtractError> {
        let response = self.client.get(url).send().await?;
        let response = response.error_for_status()?;
        Ok(response.json::<Value>().await?)
    }
}

#[async_trait]
impl Extractor for StockPriceExtractor {
    async fn extract(&self, parameters: &TaskParameters) -> Result<RowSet, ExtractError> {
        let date = crawler_date(parameters)?;
        match parameters.get("data_source").map(String::as_str) {
            Some("twse") => {
                info!(date, "fetching TWSE daily quotes");
                let url = format!(
                    "https://www.twse.com.tw/exchangeReport/MI_INDEX?response=json&date={}&type=ALL",
                    date.replace('-', "")
                );
                let payload = self.fetch_json(&url).await?;
                parse_twse(&payload, date)
            }
            Some("tpex") => {
                info!(date, "fetching TPEX daily quotes");
                let url = format!(
                    "https://www.tpex.org.tw/web/stock/aftertrading/otc_quotes_no1430/stk_wn1430_result.php?l=zh-tw&d={}&se=AL",
                    roc_date(date)?
                );
                let payload = self.fetch_json(&url).await?;
                parse_tpex(&payload, date)
            }
            // Mirrors the upstream behavior: an unrecognized source yields no rows
            _ => Ok(empty_rowset()),
        }
    }
}

fn empty_rowset() -> RowSet {
    RowSet::new(COLUMNS.iter().map(|c| c.to_string()).collect())
}

/// Convert an ISO date to the ROC calendar form the TPEX endpoint expects
/// (e.g. `2024-01-05` → `113/01/05`)
fn roc_date(date: &str) -> Result<String, ExtractError> {
    let mut parts = date.splitn(3, '-');
    let year: i32 = parts
        .next()
        .and_then(|y| y.parse().ok())
        .ok_or_else(|| ExtractError::Parse(format!("invalid date: {date}")))?;
    let month = parts.next();
    let day = parts.next();
    match (month, day) {
        (Some(month), Some(day)) => Ok(format!("{}/{month}/{day}", year - 1911)),
        _ => Err(ExtractError::Parse(format!("invalid date: {date}"))),
    }
}

/// Strip thousands separators and exchange annotations from a numeric cell;
/// dashed and ex-dividend placeholders become `0`
pub(crate) fn clean_numeric(value: &str) -> String {
    let cleaned: String = value
        .chars()
        .filter(|c| !matches!(c, ',' | 'X' | '+' | ' '))
        .collect();
    match cleaned.as_str() {
        "----" | "---" | "--" => "0".to_string(),
        "除權息" | "除息" | "除權" => "0".to_string(),
        _ => cleaned,
    }
}

/// Pull the +/- sign out of the HTML fragment TWSE uses for the change
/// direction column
fn direction_sign(markup: &str) -> String {
    if !markup.contains('>') {
        return markup.trim().to_string();
    }
    markup
        .split('>')
        .nth(1)
        .and_then(|tail| tail.split('<').next())
        .unwrap_or("")
        .trim()
        .to_string()
}

fn cell_text(cell: &Value) -> String {
    match cell {
        Value::String(text) => text.clone(),
        Value::Number(number) => number.to_string(),
        _ => String::new(),
    }
}

fn translate_field(name: &str) -> Option<&'static str> {
    match name {
        "證券代號" => Some("StockID"),
        "成交股數" => Some("TradeVolume"),
        "成交筆數" => Some("Transaction"),
        "成交金額" => Some("TradeValue"),
        "開盤價" => Some("Open"),
        "最高價" => Some("Max"),
        "最低價" => Some("Min"),
        "收盤價" => Some("Close"),
        "漲跌(+/-)" => Some("Dir"),
        "漲跌價差" => Some("Change"),
        _ => None,
    }
}

/// Normalize a TWSE `MI_INDEX` payload.
///
/// The quote table and its header row arrive under `data9`/`fields9` (or the
/// older `data8`/`fields8`); anything else is a no-data response such as a
/// non-trading day and yields zero rows.
pub(crate) fn parse_twse(payload: &Value, date: &str) -> Result<RowSet, ExtractError> {
    let (data, fields) = match (payload.get("data9"), payload.get("fields9")) {
        (Some(data), Some(fields)) => (data, fields),
        _ => match (payload.get("data8"), payload.get("fields8")) {
            (Some(data), Some(fields)) => (data, fields),
            _ => return Ok(empty_rowset()),
        },
    };

    let fields: Vec<Option<&'static str>> = fields
        .as_array()
        .ok_or_else(|| ExtractError::Parse("TWSE fields is not an array".to_string()))?
        .iter()
        .map(|field| translate_field(field.as_str().unwrap_or("")))
        .collect();

    let entries = data
        .as_array()
        .ok_or_else(|| ExtractError::Parse("TWSE data is not an array".to_string()))?;

    let mut rows = empty_rowset();
    for entry in entries {
        let cells = entry
            .as_array()
            .ok_or_else(|| ExtractError::Parse("TWSE row is not an array".to_string()))?;

        let mut record: HashMap<&'static str, String> = HashMap::new();
        for (field, cell) in fields.iter().zip(cells) {
            if let Some(name) = *field {
                record.insert(name, cell_text(cell));
            }
        }

        let field = |name: &str| record.get(name).cloned().unwrap_or_default();
        let change = clean_numeric(&format!(
            "{}{}",
            direction_sign(&field("Dir")),
            field("Change")
        ));
        rows.push_row(vec![
            field("StockID"),
            clean_numeric(&field("TradeVolume")),
            clean_numeric(&field("Transaction")),
            clean_numeric(&field("TradeValue")),
            clean_numeric(&field("Open")),
            clean_numeric(&field("Max")),
            clean_numeric(&field("Min")),
            clean_numeric(&field("Close")),
            change,
            date.to_string(),
        ])
        .map_err(ExtractError::Parse)?;
    }
    Ok(rows)
}

/// Normalize a TPEX `stk_wn1430` payload.
///
/// Rows arrive positionally under `aaData`; only a fixed subset of the
/// columns is kept.
pub(crate) fn parse_tpex(payload: &Value, date: &str) -> Result<RowSet, ExtractError> {
    let entries = match payload.get("aaData").and_then(Value::as_array) {
        Some(entries) if !entries.is_empty() => entries,
        _ => return Ok(empty_rowset()),
    };

    let mut rows = empty_rowset();
    for entry in entries {
        let cells = entry
            .as_array()
            .ok_or_else(|| ExtractError::Parse("TPEX row is not an array".to_string()))?;
        let cell = |index: usize| cells.get(index).map(cell_text).unwrap_or_default();

        rows.push_row(vec![
            cell(0),                  // StockID
            clean_numeric(&cell(7)),  // TradeVolume
            clean_numeric(&cell(9)),  // Transaction
            clean_numeric(&cell(8)),  // TradeValue
            clean_numeric(&cell(4)),  // Open
            clean_numeric(&cell(5)),  // Max
            clean_numeric(&cell(6)),  // Min
            clean_numeric(&cell(2)),  // Close
            clean_numeric(&cell(3)),  // Change
            date.to_string(),
        ])
        .map_err(ExtractError::Parse)?;
    }
    Ok(rows)
}
