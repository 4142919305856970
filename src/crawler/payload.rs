//! Route parsing and GraphQL query payloads
//!
//! A task carries loosely typed string parameters. `RouteQuery::from_params`
//! turns them into a validated route, and the payload builders render that
//! route into the request body the provider expects for each leg.

use crate::model::TaskParams;
use crate::FailureKind;
use chrono::NaiveDate;
use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

/// GraphQL operation used for both legs
pub const OPERATION_NAME: &str = "pfpFlightSegmentSearch";

const SEARCH_QUERY: &str = r#"query pfpFlightSegmentSearch($input: PfpFlightSegmentSearchInput!) {
  pfpFlightSegmentSearch(input: $input) {
    error
    data {
      flightList {
        depAirportCode
        arrAirportCode
        depDate
        depTime
        arrDate
        arrTime
        flyTime
        searchId
        flightDetail { marketingAirlineCode flightNumber }
        fareList {
          searchId
          pfpClassName
          bccTp
          fareInfo { totalPrice { price } tax { totalTax } }
        }
      }
    }
  }
}"#;

/// Date format of task parameters
const PARAM_DATE_FORMAT: &str = "%Y-%m-%d";

/// Whether a task asks for one leg or two
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TripType {
    OneWay,
    RoundTrip,
}

impl TripType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneWay => "one-way",
            Self::RoundTrip => "round-trip",
        }
    }

    fn wire_code(&self) -> &'static str {
        match self {
            Self::OneWay => "OW",
            Self::RoundTrip => "RT",
        }
    }
}

/// Validated route parameters of one task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteQuery {
    pub origin: String,
    pub destination: String,
    pub departure_date: NaiveDate,
    pub return_date: Option<NaiveDate>,
    pub trip_type: TripType,
    pub cabin: Option<String>,
    pub adults: u8,
}

impl RouteQuery {
    /// Parses and validates task parameters
    ///
    /// Required: `origin`, `destination`, `departure_date`; `return_date` only
    /// for round trips. Optional: `trip_type`, `cabin`, `adults`.
    pub fn from_params(params: &TaskParams) -> Result<Self, FailureKind> {
        let origin = airport(params, "origin")?;
        let destination = airport(params, "destination")?;
        if origin == destination {
            return Err(invalid(format!(
                "origin and destination are both {}",
                origin
            )));
        }

        let departure_date = date(params, "departure_date")?
            .ok_or_else(|| invalid("missing departure_date".to_string()))?;
        let return_date = date(params, "return_date")?;

        let trip_type = match params.get("trip_type") {
            None if return_date.is_some() => TripType::RoundTrip,
            None => TripType::OneWay,
            Some("round-trip") => TripType::RoundTrip,
            Some("one-way") => TripType::OneWay,
            Some(other) => return Err(invalid(format!("unknown trip_type '{}'", other))),
        };

        if trip_type == TripType::RoundTrip {
            match return_date {
                None => return Err(invalid("round trip without return_date".to_string())),
                Some(returns) if returns < departure_date => {
                    return Err(invalid(format!(
                        "return_date {} precedes departure_date {}",
                        returns, departure_date
                    )));
                }
                Some(_) => {}
            }
        }

        let adults = match params.get("adults") {
            None => 1,
            Some(raw) => match raw.parse::<u8>() {
                Ok(n) if (1..=9).contains(&n) => n,
                _ => return Err(invalid(format!("adults must be 1-9, got '{}'", raw))),
            },
        };

        Ok(Self {
            origin,
            destination,
            departure_date,
            // A one-way query never sends a return date, even if one was given
            return_date: return_date.filter(|_| trip_type == TripType::RoundTrip),
            trip_type,
            cabin: params.get("cabin").map(str::to_string),
            adults,
        })
    }

    pub fn is_round_trip(&self) -> bool {
        self.trip_type == TripType::RoundTrip
    }
}

fn invalid(message: String) -> FailureKind {
    FailureKind::InvalidParameters(message)
}

fn airport(params: &TaskParams, key: &str) -> Result<String, FailureKind> {
    let code = params
        .get(key)
        .ok_or_else(|| invalid(format!("missing {}", key)))?;

    if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(invalid(format!("{} '{}' is not an airport code", key, code)));
    }

    Ok(code.to_ascii_uppercase())
}

fn date(params: &TaskParams, key: &str) -> Result<Option<NaiveDate>, FailureKind> {
    params
        .get(key)
        .map(|raw| {
            NaiveDate::parse_from_str(raw, PARAM_DATE_FORMAT)
                .map_err(|e| invalid(format!("{} '{}': {}", key, raw, e)))
        })
        .transpose()
}

/// GraphQL request body
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryPayload {
    pub operation_name: &'static str,
    pub query: &'static str,
    pub variables: Value,
}

impl QueryPayload {
    /// Search identifier echoed by an inbound payload, if any
    pub fn search_id(&self) -> Option<&str> {
        self.variables
            .pointer("/input/searchId")
            .and_then(Value::as_str)
    }

    /// Marker distinguishing this leg request from every other one
    pub fn leg_marker(&self) -> Option<&str> {
        self.variables
            .pointer("/input/legMarker")
            .and_then(Value::as_str)
    }
}

/// Builds the payload for the outbound leg
///
/// Every call generates a fresh leg marker.
pub fn outbound_payload(route: &RouteQuery, date_format: &str) -> QueryPayload {
    let input = json!({
        "tripType": route.trip_type.wire_code(),
        "segmentIndex": 0,
        "legMarker": Uuid::new_v4().to_string(),
        "depAirportCode": route.origin,
        "arrAirportCode": route.destination,
        "depDate": route.departure_date.format(date_format).to_string(),
        "returnDate": route
            .return_date
            .map(|d| d.format(date_format).to_string()),
        "cabinClass": route.cabin,
        "adultCount": route.adults,
    });

    QueryPayload {
        operation_name: OPERATION_NAME,
        query: SEARCH_QUERY,
        variables: json!({ "input": input }),
    }
}

/// Builds the payload for the inbound leg of a round trip
///
/// The provider prices the return leg against the outbound selection, so the
/// outbound search identifier must be echoed back.
pub fn inbound_payload(route: &RouteQuery, search_id: &str, date_format: &str) -> QueryPayload {
    let return_date = route.return_date.unwrap_or(route.departure_date);

    let input = json!({
        "tripType": route.trip_type.wire_code(),
        "segmentIndex": 1,
        "legMarker": Uuid::new_v4().to_string(),
        "searchId": search_id,
        "depAirportCode": route.destination,
        "arrAirportCode": route.origin,
        "depDate": return_date.format(date_format).to_string(),
        "cabinClass": route.cabin,
        "adultCount": route.adults,
    });

    QueryPayload {
        operation_name: OPERATION_NAME,
        query: SEARCH_QUERY,
        variables: json!({ "input": input }),
    }
}
