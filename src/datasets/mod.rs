//! Built-in dataset implementations
//!
//! Each dataset contributes a parameter generator (calendar enumeration and
//! queue routing) and an extractor (fetch + normalize). Parsing and cleanup
//! are pure functions so they can be tested against fixture payloads without
//! touching the network.

use crate::registry::ExtractError;
use crate::task::TaskParameters;

pub mod futures_daily;
pub mod stock_price;

/// Read the `crawler_date` parameter every built-in extractor requires
pub(crate) fn crawler_date(parameters: &TaskParameters) -> Result<&str, ExtractError> {
    parameters
        .get("crawler_date")
        .map(String::as_str)
        .filter(|date| !date.is_empty())
        .ok_or_else(|| ExtractError::MissingParameter("crawler_date".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crawler_date_required() {
        let mut parameters = TaskParameters::new();
        assert!(crawler_date(&parameters).is_err());

        parameters.insert("crawler_date".to_string(), "2024-01-05".to_string());
        assert_eq!(crawler_date(&parameters).unwrap(), "2024-01-05");
    }
}
