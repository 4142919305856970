//! Fare extraction from provider responses
//!
//! This module turns one raw search response into fare records:
//! - `extract_outbound` yields one `PartialFareRecord` per usable itinerary
//! - `extract_inbound` pairs return itineraries with outbound partials by
//!   search identifier and yields finished `FareRecord`s
//!
//! A bad itinerary never fails the whole response. It is reported in
//! `Extraction::skipped` and the caller decides how loudly to log it. Only a
//! response whose envelope is broken, or one carrying a remote error, is an
//! `ExtractError`.

use crate::model::{FareRecord, FlightSegment, PartialFareRecord};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::str::FromStr;
use thiserror::Error;

/// Separator the provider uses inside `pfpClassName` and `bccTp`
const CLASS_SEPARATOR: char = '、';

/// Response envelope is unusable as a whole
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExtractError {
    /// A required part of the envelope is missing or has the wrong type
    #[error("malformed response at {0}")]
    Malformed(String),

    /// The provider reported an error instead of results
    #[error("remote error: {0}")]
    Remote(String),
}

/// Why a single itinerary produced no record
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SkipReason {
    #[error("itinerary is not an object")]
    NotAnObject,

    #[error("missing {0}")]
    MissingField(&'static str),

    #[error("{field} is not numeric: {raw}")]
    NotNumeric { field: &'static str, raw: String },

    #[error("negative {field}: {value}")]
    Negative { field: &'static str, value: Decimal },

    #[error("no usable flight segments")]
    NoSegments,

    #[error("no outbound itinerary for search id {0:?}")]
    Orphan(Option<String>),

    #[error("return date {returns} precedes departure date {departs}")]
    DatesOutOfOrder { departs: NaiveDate, returns: NaiveDate },
}

/// An itinerary left out of the result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedItinerary {
    /// Position in the response's itinerary list
    pub index: usize,
    pub reason: SkipReason,
}

/// Result of extracting one response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction<T> {
    pub records: Vec<T>,
    pub skipped: Vec<SkippedItinerary>,

    /// Number of itineraries in the response
    pub total: usize,
}

impl<T> Extraction<T> {
    fn with_capacity(total: usize) -> Self {
        Self {
            records: Vec::with_capacity(total),
            skipped: Vec::new(),
            total,
        }
    }

    /// True when the response listed no itineraries at all
    pub fn is_empty_response(&self) -> bool {
        self.total == 0
    }
}

#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    /// chrono format of `depDate`
    pub date_format: String,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            date_format: "%Y%m%d".to_string(),
        }
    }
}

/// Stateless extractor; the same response always yields the same records
#[derive(Debug, Clone, Default)]
pub struct ResponseExtractor {
    config: ExtractorConfig,
}

impl ResponseExtractor {
    pub fn new(config: ExtractorConfig) -> Self {
        Self { config }
    }

    pub fn date_format(&self) -> &str {
        &self.config.date_format
    }

    /// Extracts outbound partials from a search response
    ///
    /// Every itinerary needs a fare and at least one usable segment. The
    /// search identifier is kept verbatim, and a missing one is not an error
    /// here; one-way crawls never need it.
    pub fn extract_outbound(
        &self,
        response: &Value,
    ) -> Result<Extraction<PartialFareRecord>, ExtractError> {
        let itineraries = flight_list(response)?;
        let mut extraction = Extraction::with_capacity(itineraries.len());

        for (index, itinerary) in itineraries.iter().enumerate() {
            match self.outbound_itinerary(itinerary) {
                Ok(partial) => extraction.records.push(partial),
                Err(reason) => extraction.skipped.push(SkippedItinerary { index, reason }),
            }
        }

        Ok(extraction)
    }

    /// Pairs return itineraries with the outbound partials they belong to
    ///
    /// An inbound itinerary is matched on its search identifier and yields one
    /// record for every partial carrying that identifier. Itineraries without
    /// a matching partial are orphans and are skipped.
    pub fn extract_inbound(
        &self,
        response: &Value,
        partials: &[PartialFareRecord],
    ) -> Result<Extraction<FareRecord>, ExtractError> {
        let itineraries = flight_list(response)?;
        let mut extraction = Extraction::with_capacity(itineraries.len());

        let mut by_search_id: HashMap<&str, Vec<&PartialFareRecord>> = HashMap::new();
        for partial in partials {
            if let Some(id) = partial.search_id.as_deref() {
                by_search_id.entry(id).or_default().push(partial);
            }
        }

        for (index, itinerary) in itineraries.iter().enumerate() {
            let outcome = itinerary
                .as_object()
                .ok_or(SkipReason::NotAnObject)
                .and_then(|itinerary| {
                    let search_id = search_id(itinerary);
                    let group = search_id
                        .as_deref()
                        .and_then(|id| by_search_id.get(id))
                        .ok_or_else(|| SkipReason::Orphan(search_id.clone()))?;
                    self.inbound_itinerary(itinerary, group)
                });

            match outcome {
                Ok(records) => extraction.records.extend(records),
                Err(reason) => extraction.skipped.push(SkippedItinerary { index, reason }),
            }
        }

        Ok(extraction)
    }

    fn outbound_itinerary(&self, itinerary: &Value) -> Result<PartialFareRecord, SkipReason> {
        let itinerary = itinerary.as_object().ok_or(SkipReason::NotAnObject)?;

        let fare = first_fare(itinerary).ok_or(SkipReason::MissingField("fareList"))?;
        let (price, tax) = fare_amounts(fare)?;
        let outbound_segments = segments(itinerary)?;

        Ok(PartialFareRecord {
            departure_date: self.parse_date(itinerary.get("depDate")),
            price,
            tax,
            outbound_segments,
            search_id: search_id(itinerary),
        })
    }

    /// Finalizes every partial of `group` against one return itinerary
    ///
    /// Partials departing after the return date are left out; the itinerary
    /// is skipped only when none of them fits.
    fn inbound_itinerary(
        &self,
        itinerary: &Map<String, Value>,
        group: &[&PartialFareRecord],
    ) -> Result<Vec<FareRecord>, SkipReason> {
        let inbound_segments = segments(itinerary)?;

        // The return leg may be quoted without a fare; the outbound one stands
        let inbound_fare = first_fare(itinerary).map(fare_amounts).transpose()?;

        let return_date = self.parse_date(itinerary.get("depDate"));

        let mut records = Vec::with_capacity(group.len());
        let mut out_of_order = None;
        for partial in group {
            if let (Some(departs), Some(returns)) = (partial.departure_date, return_date) {
                if returns < departs {
                    out_of_order.get_or_insert(SkipReason::DatesOutOfOrder { departs, returns });
                    continue;
                }
            }
            records.push(partial.finalize(return_date, inbound_segments.clone(), inbound_fare));
        }

        match out_of_order {
            Some(reason) if records.is_empty() => Err(reason),
            _ => Ok(records),
        }
    }

    /// Unparseable dates become `None` rather than skipping the itinerary
    fn parse_date(&self, value: Option<&Value>) -> Option<NaiveDate> {
        let raw = value?.as_str()?.trim();
        NaiveDate::parse_from_str(raw, &self.config.date_format).ok()
    }
}

/// Walks `data.pfpFlightSegmentSearch` down to the itinerary list
fn flight_list(response: &Value) -> Result<&Vec<Value>, ExtractError> {
    let search = response
        .pointer("/data/pfpFlightSegmentSearch")
        .filter(|v| v.is_object())
        .ok_or_else(|| ExtractError::Malformed("data.pfpFlightSegmentSearch".to_string()))?;

    match search.get("error") {
        None | Some(Value::Null) => {}
        Some(Value::String(message)) if message.trim().is_empty() => {}
        Some(Value::String(message)) => return Err(ExtractError::Remote(message.clone())),
        Some(other) => return Err(ExtractError::Remote(other.to_string())),
    }

    search
        .pointer("/data/flightList")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            ExtractError::Malformed("data.pfpFlightSegmentSearch.data.flightList".to_string())
        })
}

fn first_fare(itinerary: &Map<String, Value>) -> Option<&Map<String, Value>> {
    itinerary
        .get("fareList")?
        .as_array()?
        .first()?
        .as_object()
}

/// Search identifier of the itinerary's first fare, else of the itinerary
fn search_id(itinerary: &Map<String, Value>) -> Option<String> {
    first_fare(itinerary)
        .and_then(|fare| non_empty_str(fare.get("searchId")))
        .or_else(|| non_empty_str(itinerary.get("searchId")))
        .map(str::to_string)
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value?.as_str().map(str::trim).filter(|s| !s.is_empty())
}

fn fare_amounts(fare: &Map<String, Value>) -> Result<(Decimal, Decimal), SkipReason> {
    let info = fare.get("fareInfo");
    let price = parse_amount(
        info.and_then(|i| i.pointer("/totalPrice/price")),
        "totalPrice.price",
    )?;
    let tax = parse_amount(info.and_then(|i| i.pointer("/tax/totalTax")), "tax.totalTax")?;
    Ok((price, tax))
}

/// Parses a fare amount
///
/// | Input | Result |
/// |-------|--------|
/// | absent / null | skip |
/// | `""` | 0 |
/// | numeric string or JSON number | value |
/// | anything else | skip |
/// | negative | skip |
fn parse_amount(value: Option<&Value>, field: &'static str) -> Result<Decimal, SkipReason> {
    let amount = match value {
        None | Some(Value::Null) => return Err(SkipReason::MissingField(field)),
        Some(Value::String(raw)) if raw.trim().is_empty() => Decimal::ZERO,
        Some(Value::String(raw)) => decimal(raw.trim()).ok_or_else(|| SkipReason::NotNumeric {
            field,
            raw: raw.clone(),
        })?,
        Some(Value::Number(n)) => {
            let raw = n.to_string();
            decimal(&raw).ok_or(SkipReason::NotNumeric { field, raw })?
        }
        Some(other) => {
            return Err(SkipReason::NotNumeric {
                field,
                raw: other.to_string(),
            })
        }
    };

    if amount < Decimal::ZERO {
        return Err(SkipReason::Negative {
            field,
            value: amount,
        });
    }

    Ok(amount)
}

fn decimal(raw: &str) -> Option<Decimal> {
    Decimal::from_str(raw)
        .or_else(|_| Decimal::from_scientific(raw))
        .ok()
}

/// Builds the ordered segment list of an itinerary
///
/// Cabin names come from the first fare, one `、`-separated entry per
/// segment. Segments with neither a flight number nor a cabin are dropped.
fn segments(itinerary: &Map<String, Value>) -> Result<Vec<FlightSegment>, SkipReason> {
    let details = itinerary
        .get("flightDetail")
        .and_then(Value::as_array)
        .ok_or(SkipReason::MissingField("flightDetail"))?;

    let fare = first_fare(itinerary);
    let class_names = class_entries(fare, "pfpClassName");
    let class_types = class_entries(fare, "bccTp");

    let segments: Vec<FlightSegment> = details
        .iter()
        .enumerate()
        .map(|(i, detail)| {
            FlightSegment::new(
                flight_number(detail),
                cabin_class(class_names.get(i).copied(), class_types.get(i).copied()),
            )
        })
        .filter(|segment| !segment.is_blank())
        .collect();

    if segments.is_empty() {
        return Err(SkipReason::NoSegments);
    }

    Ok(segments)
}

fn class_entries<'a>(fare: Option<&'a Map<String, Value>>, key: &str) -> Vec<&'a str> {
    fare.and_then(|f| f.get(key))
        .and_then(Value::as_str)
        .map(|s| s.split(CLASS_SEPARATOR).map(str::trim).collect())
        .unwrap_or_default()
}

fn flight_number(detail: &Value) -> Option<String> {
    let number = match detail.get("flightNumber")? {
        Value::String(s) if !s.trim().is_empty() => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };

    let airline = non_empty_str(detail.get("marketingAirlineCode")).unwrap_or("");
    Some(format!("{}{}", airline, number))
}

fn cabin_class(name: Option<&str>, class_type: Option<&str>) -> Option<String> {
    let cabin = format!("{}{}", name.unwrap_or(""), class_type.unwrap_or(""));
    if cabin.is_empty() {
        None
    } else {
        Some(cabin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn itinerary(search_id: &str, flight: &str, price: Value, tax: Value) -> Value {
        json!({
            "depDate": "20240601",
            "flightDetail": [{ "marketingAirlineCode": "BR", "flightNumber": flight }],
            "fareList": [{
                "searchId": search_id,
                "pfpClassName": "Economy",
                "bccTp": "",
                "fareInfo": {
                    "totalPrice": { "price": price },
                    "tax": { "totalTax": tax }
                }
            }]
        })
    }

    fn response(itineraries: Vec<Value>) -> Value {
        json!({
            "data": {
                "pfpFlightSegmentSearch": {
                    "error": null,
                    "data": { "flightList": itineraries }
                }
            }
        })
    }

    fn extractor() -> ResponseExtractor {
        ResponseExtractor::default()
    }

    #[test]
    fn test_outbound_fields() {
        let raw = response(vec![itinerary("S1", "812", json!("250"), json!("30"))]);
        let extraction = extractor().extract_outbound(&raw).unwrap();

        assert_eq!(extraction.total, 1);
        assert!(extraction.skipped.is_empty());

        let partial = &extraction.records[0];
        assert_eq!(partial.departure_date, NaiveDate::from_ymd_opt(2024, 6, 1));
        assert_eq!(partial.price, Decimal::new(250, 0));
        assert_eq!(partial.tax, Decimal::new(30, 0));
        assert_eq!(partial.search_id.as_deref(), Some("S1"));
        assert_eq!(
            partial.outbound_segments,
            vec![FlightSegment::new(
                Some("BR812".to_string()),
                Some("Economy".to_string())
            )]
        );
    }

    #[test]
    fn test_empty_price_string_is_zero() {
        let raw = response(vec![itinerary("S1", "812", json!(""), json!("30"))]);
        let extraction = extractor().extract_outbound(&raw).unwrap();
        assert_eq!(extraction.records[0].price, Decimal::ZERO);
    }

    #[test]
    fn test_non_numeric_price_skips_only_that_itinerary() {
        let raw = response(vec![
            itinerary("S1", "812", json!("abc"), json!("30")),
            itinerary("S2", "816", json!(1234.5), json!(100)),
        ]);
        let extraction = extractor().extract_outbound(&raw).unwrap();

        assert_eq!(extraction.total, 2);
        assert_eq!(extraction.records.len(), 1);
        assert_eq!(extraction.records[0].price, Decimal::new(12345, 1));
        assert_eq!(extraction.skipped.len(), 1);
        assert_eq!(extraction.skipped[0].index, 0);
        assert!(matches!(
            extraction.skipped[0].reason,
            SkipReason::NotNumeric { field: "totalPrice.price", .. }
        ));
    }

    #[test]
    fn test_missing_or_negative_fare_skips() {
        let raw = response(vec![
            itinerary("S1", "812", Value::Null, json!("30")),
            itinerary("S2", "816", json!("-5"), json!("30")),
            itinerary("S3", "818", json!("100"), json!(true)),
        ]);
        let extraction = extractor().extract_outbound(&raw).unwrap();

        assert!(extraction.records.is_empty());
        assert_eq!(extraction.skipped.len(), 3);
        assert_eq!(
            extraction.skipped[0].reason,
            SkipReason::MissingField("totalPrice.price")
        );
        assert!(matches!(
            extraction.skipped[1].reason,
            SkipReason::Negative { .. }
        ));
    }

    #[test]
    fn test_segments_pair_class_entries_by_position() {
        let raw = response(vec![json!({
            "depDate": "20240601",
            "flightDetail": [
                { "marketingAirlineCode": "BR", "flightNumber": "812" },
                { "marketingAirlineCode": "BR", "flightNumber": "67" },
                { "marketingAirlineCode": "BR" }
            ],
            "fareList": [{
                "searchId": "S1",
                "pfpClassName": "經濟艙、豪華經濟艙",
                "bccTp": "Y、K",
                "fareInfo": { "totalPrice": { "price": 100 }, "tax": { "totalTax": 10 } }
            }]
        })]);
        let extraction = extractor().extract_outbound(&raw).unwrap();
        let segments = &extraction.records[0].outbound_segments;

        // The third detail has no number and no class entry: dropped
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].flight_number.as_deref(), Some("BR812"));
        assert_eq!(segments[0].cabin_class.as_deref(), Some("經濟艙Y"));
        assert_eq!(segments[1].flight_number.as_deref(), Some("BR67"));
        assert_eq!(segments[1].cabin_class.as_deref(), Some("豪華經濟艙K"));
    }

    #[test]
    fn test_itinerary_without_segments_is_skipped() {
        let mut raw_itinerary = itinerary("S1", "812", json!("1"), json!("0"));
        raw_itinerary["flightDetail"] = json!([]);
        raw_itinerary["fareList"][0]["pfpClassName"] = json!("");

        let extraction = extractor()
            .extract_outbound(&response(vec![raw_itinerary]))
            .unwrap();
        assert_eq!(extraction.skipped[0].reason, SkipReason::NoSegments);
    }

    #[test]
    fn test_unparseable_date_is_none() {
        let mut raw_itinerary = itinerary("S1", "812", json!("1"), json!("0"));
        raw_itinerary["depDate"] = json!("2024/06/01");

        let extraction = extractor()
            .extract_outbound(&response(vec![raw_itinerary]))
            .unwrap();
        assert_eq!(extraction.records.len(), 1);
        assert!(extraction.records[0].departure_date.is_none());
    }

    #[test]
    fn test_custom_date_format() {
        let extractor = ResponseExtractor::new(ExtractorConfig {
            date_format: "%Y-%m-%d".to_string(),
        });
        let mut raw_itinerary = itinerary("S1", "812", json!("1"), json!("0"));
        raw_itinerary["depDate"] = json!("2024-06-01");

        let extraction = extractor
            .extract_outbound(&response(vec![raw_itinerary]))
            .unwrap();
        assert_eq!(
            extraction.records[0].departure_date,
            NaiveDate::from_ymd_opt(2024, 6, 1)
        );
    }

    #[test]
    fn test_itinerary_level_search_id_fallback() {
        let mut raw_itinerary = itinerary("", "812", json!("1"), json!("0"));
        raw_itinerary["searchId"] = json!("OUTER");

        let extraction = extractor()
            .extract_outbound(&response(vec![raw_itinerary]))
            .unwrap();
        assert_eq!(extraction.records[0].search_id.as_deref(), Some("OUTER"));
    }

    #[test]
    fn test_envelope_errors() {
        let extractor = extractor();

        assert!(matches!(
            extractor.extract_outbound(&json!({ "data": {} })),
            Err(ExtractError::Malformed(_))
        ));
        assert!(matches!(
            extractor.extract_outbound(&json!({
                "data": { "pfpFlightSegmentSearch": { "error": null, "data": {} } }
            })),
            Err(ExtractError::Malformed(_))
        ));
        assert_eq!(
            extractor.extract_outbound(&json!({
                "data": { "pfpFlightSegmentSearch": { "error": "SOLD_OUT", "data": null } }
            })),
            Err(ExtractError::Remote("SOLD_OUT".to_string()))
        );
    }

    #[test]
    fn test_empty_flight_list() {
        let extraction = extractor().extract_outbound(&response(vec![])).unwrap();
        assert!(extraction.is_empty_response());
        assert!(extraction.records.is_empty());
    }

    #[test]
    fn test_inbound_correlates_by_search_id() {
        let outbound = response(vec![
            itinerary("A", "812", json!("100"), json!("10")),
            itinerary("B", "816", json!("200"), json!("20")),
        ]);
        let mut inbound_b = itinerary("B", "811", json!("900"), json!("90"));
        inbound_b["depDate"] = json!("20240608");
        let mut inbound_c = itinerary("C", "815", json!("300"), json!("30"));
        inbound_c["depDate"] = json!("20240608");
        let inbound = response(vec![inbound_b, inbound_c]);

        let extractor = extractor();
        let partials = extractor.extract_outbound(&outbound).unwrap().records;
        let extraction = extractor.extract_inbound(&inbound, &partials).unwrap();

        assert_eq!(extraction.records.len(), 1);
        let record = &extraction.records[0];
        assert_eq!(record.search_id.as_deref(), Some("B"));
        assert_eq!(record.outbound_summary(), "BR816");
        assert_eq!(record.inbound_summary(), "BR811");
        assert_eq!(record.return_date, NaiveDate::from_ymd_opt(2024, 6, 8));
        assert_eq!(record.price, Decimal::new(900, 0));
        assert_eq!(record.tax, Decimal::new(90, 0));

        assert_eq!(
            extraction.skipped,
            vec![SkippedItinerary {
                index: 1,
                reason: SkipReason::Orphan(Some("C".to_string())),
            }]
        );
    }

    #[test]
    fn test_inbound_pairs_every_partial_sharing_a_search_id() {
        let outbound = response(vec![
            itinerary("S", "812", json!("100"), json!("10")),
            itinerary("S", "816", json!("120"), json!("10")),
        ]);
        let mut inbound = itinerary("S", "811", json!("900"), json!("90"));
        inbound["depDate"] = json!("20240608");

        let extractor = extractor();
        let partials = extractor.extract_outbound(&outbound).unwrap().records;
        assert_eq!(partials.len(), 2);

        let extraction = extractor
            .extract_inbound(&response(vec![inbound]), &partials)
            .unwrap();

        let legs: Vec<(String, String)> = extraction
            .records
            .iter()
            .map(|r| (r.outbound_summary(), r.inbound_summary()))
            .collect();
        assert_eq!(
            legs,
            vec![
                ("BR812".to_string(), "BR811".to_string()),
                ("BR816".to_string(), "BR811".to_string()),
            ]
        );
        assert!(extraction.skipped.is_empty());
    }

    #[test]
    fn test_inbound_without_fare_keeps_outbound_fare() {
        let partials = extractor()
            .extract_outbound(&response(vec![itinerary(
                "A",
                "812",
                json!("100"),
                json!("10"),
            )]))
            .unwrap()
            .records;

        let inbound = response(vec![json!({
            "depDate": "20240608",
            "searchId": "A",
            "flightDetail": [{ "marketingAirlineCode": "BR", "flightNumber": "811" }]
        })]);
        let extraction = extractor().extract_inbound(&inbound, &partials).unwrap();

        assert_eq!(extraction.records.len(), 1);
        assert_eq!(extraction.records[0].price, Decimal::new(100, 0));
        assert_eq!(extraction.records[0].inbound_segments[0].cabin_class, None);
    }

    #[test]
    fn test_inbound_before_departure_is_skipped() {
        let partials = extractor()
            .extract_outbound(&response(vec![itinerary(
                "A",
                "812",
                json!("100"),
                json!("10"),
            )]))
            .unwrap()
            .records;

        let mut early = itinerary("A", "811", json!("100"), json!("10"));
        early["depDate"] = json!("20240530");
        let extraction = extractor()
            .extract_inbound(&response(vec![early]), &partials)
            .unwrap();

        assert!(extraction.records.is_empty());
        assert!(matches!(
            extraction.skipped[0].reason,
            SkipReason::DatesOutOfOrder { .. }
        ));
    }

    #[test]
    fn test_extraction_is_idempotent() {
        let raw = response(vec![
            itinerary("A", "812", json!("100"), json!("10")),
            itinerary("B", "816", json!("abc"), json!("20")),
        ]);
        let extractor = extractor();

        assert_eq!(
            extractor.extract_outbound(&raw).unwrap(),
            extractor.extract_outbound(&raw).unwrap()
        );
    }
}
