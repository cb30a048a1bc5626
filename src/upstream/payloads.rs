//! Wire shapes returned by the Frankfurter API.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::models::ExchangeRate;

/// Body of `/latest`.
#[derive(Debug, Deserialize)]
pub struct LatestPayload {
    pub base: String,
    pub date: NaiveDate,
    pub rates: BTreeMap<String, Decimal>,
}

impl From<LatestPayload> for ExchangeRate {
    fn from(payload: LatestPayload) -> Self {
        ExchangeRate {
            base_currency: payload.base,
            date: payload.date,
            rates: payload.rates,
        }
    }
}

/// Body of `/{start}..{end}`.
#[derive(Debug, Deserialize)]
pub struct RangePayload {
    pub base: String,
    #[serde(default)]
    pub rates: Option<BTreeMap<NaiveDate, BTreeMap<String, Decimal>>>,
}

impl RangePayload {
    /// One entry per date, ordered by date. `None` when the provider sent no
    /// rates map.
    pub fn into_series(self) -> Option<Vec<ExchangeRate>> {
        let base = self.base;
        self.rates.map(|by_date| {
            by_date
                .into_iter()
                .map(|(date, rates)| ExchangeRate {
                    base_currency: base.clone(),
                    date,
                    rates,
                })
                .collect()
        })
    }
}
