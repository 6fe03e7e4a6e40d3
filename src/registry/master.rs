/// Parses the gzip-compressed CSV instrument master into `Instrument`
/// records. Pure function: no I/O, so it is independently testable from the
/// HTTP fetch in `mod.rs`.
use std::io::Read;

use chrono::NaiveDate;
use flate2::read::GzDecoder;
use serde::Deserialize;

use crate::error::{Result, TradingError};
use crate::types::{Instrument, OptionType, Segment};

#[derive(Debug, Deserialize)]
struct InstrumentRecord {
    instrument_key: String,
    symbol: String,
    exchange_segment: String,
    #[serde(default)]
    option_type: String,
    #[serde(default)]
    strike: Option<f64>,
    #[serde(default)]
    expiry: Option<String>,
    #[serde(default)]
    lot_size: Option<i32>,
    #[serde(default = "default_tick_size")]
    tick_size: f64,
}

fn default_tick_size() -> f64 {
    0.05
}

fn record_to_instrument(record: InstrumentRecord) -> Result<Instrument> {
    let option_type = match record.option_type.trim().to_uppercase().as_str() {
        "CE" => Some(OptionType::CE),
        "PE" => Some(OptionType::PE),
        _ => None,
    };
    let segment = if option_type.is_some() {
        Segment::Option
    } else {
        Segment::Index
    };
    let expiry = record
        .expiry
        .as_deref()
        .map(|s| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| {
                TradingError::InvalidParameter(format!(
                    "unparseable expiry '{s}' for {}: {e}",
                    record.instrument_key
                ))
            })
        })
        .transpose()?;

    Ok(Instrument {
        key: record.instrument_key,
        symbol: record.symbol,
        segment,
        option_type,
        strike: record.strike,
        expiry,
        lot_size: record.lot_size,
        tick_size: record.tick_size,
        exchange_segment: record.exchange_segment,
    })
}

/// Decompress and parse a gzip CSV instrument master. Required columns:
/// instrument key, symbol, exchange segment, option type, strike, expiry
/// (ISO date), lot size, tick size.
pub fn parse_gzip_csv(bytes: &[u8]) -> Result<Vec<Instrument>> {
    let mut decoder = GzDecoder::new(bytes);
    let mut csv_text = String::new();
    decoder
        .read_to_string(&mut csv_text)
        .map_err(|e| TradingError::InvalidParameter(format!("gzip decode failed: {e}")))?;

    parse_csv(&csv_text)
}

/// Parse already-decompressed CSV text. Split out so tests can exercise the
/// column mapping without constructing gzip payloads.
pub fn parse_csv(csv_text: &str) -> Result<Vec<Instrument>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(csv_text.as_bytes());

    let mut instruments = Vec::new();
    for result in reader.deserialize::<InstrumentRecord>() {
        let record = result.map_err(|e| {
            TradingError::InvalidParameter(format!("instrument master row rejected: {e}"))
        })?;
        match record_to_instrument(record) {
            Ok(instrument) => instruments.push(instrument),
            Err(e) => {
                tracing::warn!("dropping unparseable instrument master row: {e}");
            }
        }
    }
    Ok(instruments)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_CSV: &str = "instrument_key,symbol,exchange_segment,option_type,strike,expiry,lot_size,tick_size\n\
NSE_INDEX|Nifty 50,NIFTY,NSE_INDEX,,,,,0.05\n\
NFO|NIFTY|25000|CE,NIFTY,NFO,CE,25000,2026-07-30,75,0.05\n\
NFO|NIFTY|25000|PE,NIFTY,NFO,PE,25000,2026-07-30,75,0.05\n";

    #[test]
    fn parses_index_and_option_rows() {
        let instruments = parse_csv(SAMPLE_CSV).unwrap();
        assert_eq!(instruments.len(), 3);
        let index = instruments.iter().find(|i| i.segment == Segment::Index).unwrap();
        assert!(index.option_type.is_none());
        let ce = instruments
            .iter()
            .find(|i| i.option_type == Some(OptionType::CE))
            .unwrap();
        assert_eq!(ce.strike, Some(25000.0));
        assert_eq!(ce.lot_size, Some(75));
    }

    #[test]
    fn bad_expiry_drops_row_without_failing_the_whole_parse() {
        let csv = "instrument_key,symbol,exchange_segment,option_type,strike,expiry,lot_size,tick_size\n\
NFO|BAD,NIFTY,NFO,CE,25000,not-a-date,75,0.05\n";
        let instruments = parse_csv(csv).unwrap();
        assert!(instruments.is_empty());
    }
}
