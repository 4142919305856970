//! Fare and segment records
//!
//! Records are built once, fully, and never mutated afterwards. Pairing an
//! outbound partial with an inbound itinerary produces a new `FareRecord`
//! rather than filling in fields on the partial.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reasons a record cannot be handed to a sink
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RecordError {
    #[error("record has no outbound segments")]
    MissingOutbound,

    #[error("negative {field}: {value}")]
    Negative { field: &'static str, value: Decimal },

    #[error("return date {returns} precedes departure date {departs}")]
    DatesOutOfOrder { departs: NaiveDate, returns: NaiveDate },
}

/// A single flight within an itinerary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlightSegment {
    /// Marketing carrier code followed by the flight number, e.g. "BR812".
    /// `None` means the leg is not yet confirmed.
    pub flight_number: Option<String>,

    /// Cabin class as reported by the provider
    pub cabin_class: Option<String>,
}

impl FlightSegment {
    pub fn new(flight_number: Option<String>, cabin_class: Option<String>) -> Self {
        Self {
            flight_number,
            cabin_class,
        }
    }

    /// True when the segment carries neither a flight number nor a cabin
    pub fn is_blank(&self) -> bool {
        self.flight_number.is_none() && self.cabin_class.is_none()
    }
}

/// Outbound half of a fare, waiting for its inbound counterpart
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialFareRecord {
    pub departure_date: Option<NaiveDate>,
    pub price: Decimal,
    pub tax: Decimal,
    pub outbound_segments: Vec<FlightSegment>,

    /// Identifier issued by the provider; the inbound query must echo it
    pub search_id: Option<String>,
}

impl PartialFareRecord {
    /// Converts the partial into a complete one-way record
    pub fn into_one_way(self) -> FareRecord {
        FareRecord {
            departure_date: self.departure_date,
            return_date: None,
            price: self.price,
            tax: self.tax,
            outbound_segments: self.outbound_segments,
            inbound_segments: Vec::new(),
            search_id: self.search_id,
        }
    }

    /// Pairs this outbound leg with an inbound itinerary
    ///
    /// When the inbound itinerary quotes its own fare (the round-trip total),
    /// that fare replaces the outbound one.
    pub fn finalize(
        &self,
        return_date: Option<NaiveDate>,
        inbound_segments: Vec<FlightSegment>,
        inbound_fare: Option<(Decimal, Decimal)>,
    ) -> FareRecord {
        let (price, tax) = inbound_fare.unwrap_or((self.price, self.tax));

        FareRecord {
            departure_date: self.departure_date,
            return_date,
            price,
            tax,
            outbound_segments: self.outbound_segments.clone(),
            inbound_segments,
            search_id: self.search_id.clone(),
        }
    }
}

/// A priced itinerary ready for persistence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FareRecord {
    pub departure_date: Option<NaiveDate>,
    pub return_date: Option<NaiveDate>,
    pub price: Decimal,
    pub tax: Decimal,
    pub outbound_segments: Vec<FlightSegment>,
    pub inbound_segments: Vec<FlightSegment>,
    pub search_id: Option<String>,
}

impl FareRecord {
    /// Checks the invariants every persisted record must satisfy
    pub fn validate(&self) -> Result<(), RecordError> {
        if self.outbound_segments.is_empty() {
            return Err(RecordError::MissingOutbound);
        }

        if self.price < Decimal::ZERO {
            return Err(RecordError::Negative {
                field: "price",
                value: self.price,
            });
        }

        if self.tax < Decimal::ZERO {
            return Err(RecordError::Negative {
                field: "tax",
                value: self.tax,
            });
        }

        if let (Some(departs), Some(returns)) = (self.departure_date, self.return_date) {
            if returns < departs {
                return Err(RecordError::DatesOutOfOrder { departs, returns });
            }
        }

        Ok(())
    }

    /// True when the record carries a return leg
    pub fn is_round_trip(&self) -> bool {
        !self.inbound_segments.is_empty()
    }

    /// Fare excluding tax; the provider quotes tax-inclusive totals
    pub fn net_price(&self) -> Decimal {
        (self.price - self.tax).max(Decimal::ZERO)
    }

    /// Flight numbers of the outbound leg joined with '/', for logging
    pub fn outbound_summary(&self) -> String {
        summarize(&self.outbound_segments)
    }

    /// Flight numbers of the inbound leg joined with '/', for logging
    pub fn inbound_summary(&self) -> String {
        summarize(&self.inbound_segments)
    }
}

fn summarize(segments: &[FlightSegment]) -> String {
    segments
        .iter()
        .map(|s| s.flight_number.as_deref().unwrap_or("?"))
        .collect::<Vec<_>>()
        .join("/")
}
