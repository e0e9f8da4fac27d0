//! CSV Export
//!
//! Fixed-column CSV rendering for the dividend read endpoints. Optional
//! fields render as empty columns.

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};

use divd_core::Dividend;

/// Header for per-ticker exports.
pub const TICKER_HEADER: &str =
    "Declaration Date,Record Date,Ex-Dividend Date,Pay Date,Amount,Currency,Frequency,Type";

/// Header for cross-ticker exports.
pub const ALL_HEADER: &str =
    "Ticker,Declaration Date,Record Date,Ex-Dividend Date,Pay Date,Amount,Currency,Frequency,Type";

/// Quote a field when it contains a delimiter, quote, or newline.
fn escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn optional_date(date: Option<chrono::NaiveDate>) -> String {
    date.map(|d| d.to_string()).unwrap_or_default()
}

fn base_columns(d: &Dividend) -> String {
    format!(
        "{},{},{},{},{},{},{},{}",
        optional_date(d.declaration_date),
        optional_date(d.record_date),
        d.ex_dividend_date,
        optional_date(d.pay_date),
        d.amount,
        escape(&d.currency),
        d.frequency,
        escape(&d.dividend_type),
    )
}

/// Render a per-ticker export.
pub fn ticker_csv(rows: &[Dividend]) -> String {
    let mut out = String::from(TICKER_HEADER);
    out.push('\n');
    for row in rows {
        out.push_str(&base_columns(row));
        out.push('\n');
    }
    out
}

/// Render a cross-ticker export.
pub fn all_csv(rows: &[Dividend]) -> String {
    let mut out = String::from(ALL_HEADER);
    out.push('\n');
    for row in rows {
        out.push_str(&escape(&row.ticker));
        out.push(',');
        out.push_str(&base_columns(row));
        out.push('\n');
    }
    out
}

/// Wrap a rendered CSV body as an attachment response.
pub fn csv_response(filename: &str, body: String) -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/csv".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        body,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};
    use rust_decimal::Decimal;

    fn sample() -> Dividend {
        let mut d = Dividend::new(
            "AAPL",
            NaiveDate::from_ymd_opt(2024, 2, 9).unwrap(),
            Decimal::new(24, 2),
            Utc::now(),
        );
        d.pay_date = NaiveDate::from_ymd_opt(2024, 2, 15);
        d
    }

    #[test]
    fn test_ticker_csv_layout() {
        let csv = ticker_csv(&[sample()]);
        let mut lines = csv.lines();
        assert_eq!(lines.next().unwrap(), TICKER_HEADER);
        // Empty optional dates render as empty columns
        assert_eq!(lines.next().unwrap(), ",,2024-02-09,2024-02-15,0.24,USD,4,Cash");
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn test_all_csv_prepends_ticker() {
        let csv = all_csv(&[sample()]);
        let row = csv.lines().nth(1).unwrap();
        assert!(row.starts_with("AAPL,"));
    }

    #[test]
    fn test_escape_quotes_fields_with_commas() {
        assert_eq!(escape("plain"), "plain");
        assert_eq!(escape("a,b"), "\"a,b\"");
        assert_eq!(escape("say \"hi\""), "\"say \"\"hi\"\"\"");
    }
}
