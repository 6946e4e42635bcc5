//! Time-versioned cost-rate table.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use rusqlite::{Connection, Row, params};
use uuid::Uuid;

use tally_core::filter::CostRateFilter;
use tally_core::requests::CreateCostRateRequest;
use tally_core::usage::CostRate;
use tally_core::validation::validate_cost_rate;

use crate::error::{DatabaseCode, Result, StoreError};
use crate::manager::DatabaseManager;
use crate::sql::{SqlWhere, format_date, format_datetime, parse_date, parse_datetime};

const RATE_COLUMNS: &str = r#"
    id, provider, model, input_token_rate, output_token_rate,
    currency, effective_from, effective_to, created_at
"#;

fn scan_rate(row: &Row<'_>) -> rusqlite::Result<CostRate> {
    let effective_from: String = row.get("effective_from")?;
    let effective_to: Option<String> = row.get("effective_to")?;
    let created_at: String = row.get("created_at")?;
    Ok(CostRate {
        id: row.get("id")?,
        provider: row.get("provider")?,
        model: row.get("model")?,
        input_token_rate: row.get("input_token_rate")?,
        output_token_rate: row.get("output_token_rate")?,
        currency: row.get("currency")?,
        effective_from: parse_date(&effective_from),
        effective_to: effective_to.as_deref().map(parse_date),
        created_at: parse_datetime(&created_at),
    })
}

/// Manages `cost_rates` and resolves the effective rate for a date.
#[derive(Clone)]
pub struct CostRateManager {
    db: Arc<DatabaseManager>,
    validate: bool,
}

impl CostRateManager {
    pub fn new(db: Arc<DatabaseManager>, validate: bool) -> Self {
        Self { db, validate }
    }

    /// Registers a rate window for a (provider, model) pair.
    pub fn create_cost_rate(&self, req: CreateCostRateRequest) -> Result<CostRate> {
        if self.validate {
            validate_cost_rate(&req)?;
        }
        let id = Uuid::new_v4().to_string();
        let now_str = format_datetime(&Utc::now());
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO cost_rates
                     (id, provider, model, input_token_rate, output_token_rate,
                      currency, effective_from, effective_to, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    id,
                    req.provider,
                    req.model,
                    req.input_token_rate,
                    req.output_token_rate,
                    req.currency.clone().unwrap_or_else(|| "USD".to_string()),
                    format_date(req.effective_from),
                    req.effective_to.map(format_date),
                    now_str,
                ],
            )
            .map_err(|e| StoreError::db(DatabaseCode::QueryFailed, e))?;
            get_rate_on_conn(conn, &id)
        })
    }

    /// The rate effective today for (provider, model), if any.
    pub fn get_current_cost_rate(&self, provider: &str, model: &str) -> Result<Option<CostRate>> {
        self.get_cost_rate_on(provider, model, Utc::now().date_naive())
    }

    /// The rate effective on `date`: window contains the date, latest
    /// `effective_from` wins.
    pub fn get_cost_rate_on(
        &self,
        provider: &str,
        model: &str,
        date: NaiveDate,
    ) -> Result<Option<CostRate>> {
        let date_str = format_date(date);
        self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT {RATE_COLUMNS} FROM cost_rates
                 WHERE provider = ?1 AND model = ?2
                   AND effective_from <= ?3
                   AND (effective_to IS NULL OR effective_to >= ?3)
                 ORDER BY effective_from DESC
                 LIMIT 1"
            );
            match conn.query_row(&sql, params![provider, model, date_str], scan_rate) {
                Ok(rate) => Ok(Some(rate)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(StoreError::db(DatabaseCode::QueryFailed, e)),
            }
        })
    }

    /// Lists rates matching the filter, newest window first.
    pub fn get_cost_rates(&self, filter: &CostRateFilter) -> Result<Vec<CostRate>> {
        let mut w = SqlWhere::new();
        if let Some(ref provider) = filter.provider {
            w.push("provider = ?", provider.clone());
        }
        if let Some(ref model) = filter.model {
            w.push("model = ?", model.clone());
        }
        if let Some(date) = filter.active_on {
            let date_str = format_date(date);
            w.push_many(
                "(effective_from <= ? AND (effective_to IS NULL OR effective_to >= ?))",
                vec![Box::new(date_str.clone()), Box::new(date_str)],
            );
        }
        let sql = format!(
            "SELECT {RATE_COLUMNS} FROM cost_rates {}
             ORDER BY provider, model, effective_from DESC",
            w.sql()
        );
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| StoreError::db(DatabaseCode::QueryFailed, e))?;
            let rows = stmt
                .query_map(w.params().as_slice(), scan_rate)
                .map_err(|e| StoreError::db(DatabaseCode::QueryFailed, e))?;
            let mut rates = Vec::new();
            for row in rows {
                rates.push(row.map_err(|e| StoreError::db(DatabaseCode::QueryFailed, e))?);
            }
            Ok(rates)
        })
    }
}

fn get_rate_on_conn(conn: &Connection, id: &str) -> Result<CostRate> {
    let sql = format!("SELECT {RATE_COLUMNS} FROM cost_rates WHERE id = ?1");
    conn.query_row(&sql, params![id], scan_rate)
        .map_err(|e| StoreError::db(DatabaseCode::QueryFailed, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations::MigrationEngine;
    use pretty_assertions::assert_eq;

    fn manager() -> CostRateManager {
        let db = Arc::new(DatabaseManager::open_in_memory().unwrap());
        MigrationEngine::new(&db).initialize().unwrap();
        CostRateManager::new(db, true)
    }

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn seeded_gpt_4o_rate_is_current() {
        let rates = manager();
        let rate = rates
            .get_current_cost_rate("openai", "gpt-4o")
            .unwrap()
            .expect("seeded rate");
        assert_eq!(rate.input_token_rate, 0.0025);
        assert_eq!(rate.output_token_rate, 0.01);
        assert_eq!(rate.currency, "USD");
    }

    #[test]
    fn unknown_model_has_no_rate() {
        let rates = manager();
        assert!(rates
            .get_current_cost_rate("acme", "quantum-1")
            .unwrap()
            .is_none());
    }

    #[test]
    fn windowed_rates_resolve_by_date() {
        let rates = manager();
        // Close out a window, then open a cheaper one.
        rates
            .create_cost_rate(CreateCostRateRequest {
                provider: "acme".into(),
                model: "m1".into(),
                input_token_rate: 0.003,
                output_token_rate: 0.012,
                currency: None,
                effective_from: d("2024-01-01"),
                effective_to: Some(d("2024-06-30")),
            })
            .unwrap();
        rates
            .create_cost_rate(CreateCostRateRequest {
                provider: "acme".into(),
                model: "m1".into(),
                input_token_rate: 0.002,
                output_token_rate: 0.008,
                currency: None,
                effective_from: d("2024-07-01"),
                effective_to: None,
            })
            .unwrap();

        let may = rates
            .get_cost_rate_on("acme", "m1", d("2024-05-15"))
            .unwrap()
            .unwrap();
        assert_eq!(may.input_token_rate, 0.003);

        let august = rates
            .get_cost_rate_on("acme", "m1", d("2024-08-15"))
            .unwrap()
            .unwrap();
        assert_eq!(august.input_token_rate, 0.002);

        // Before any window.
        assert!(rates
            .get_cost_rate_on("acme", "m1", d("2023-12-31"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn latest_effective_from_wins_on_overlap() {
        let rates = manager();
        rates
            .create_cost_rate(CreateCostRateRequest {
                provider: "acme".into(),
                model: "m2".into(),
                input_token_rate: 0.01,
                output_token_rate: 0.02,
                currency: None,
                effective_from: d("2024-01-01"),
                effective_to: None,
            })
            .unwrap();
        rates
            .create_cost_rate(CreateCostRateRequest {
                provider: "acme".into(),
                model: "m2".into(),
                input_token_rate: 0.005,
                output_token_rate: 0.01,
                currency: None,
                effective_from: d("2024-03-01"),
                effective_to: None,
            })
            .unwrap();

        let rate = rates
            .get_cost_rate_on("acme", "m2", d("2024-06-01"))
            .unwrap()
            .unwrap();
        assert_eq!(rate.input_token_rate, 0.005);
    }

    #[test]
    fn list_filters_by_provider() {
        let rates = manager();
        let filter = CostRateFilter {
            provider: Some("openai".into()),
            ..Default::default()
        };
        let listed = rates.get_cost_rates(&filter).unwrap();
        assert_eq!(listed.len(), 4);
        assert!(listed.iter().all(|r| r.provider == "openai"));
    }
}
