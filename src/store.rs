//! Storage gateway consumed by the pipeline.
//!
//! [`PgStore`] opens a short-lived connection for each unit of work (one batch
//! insert, one read, one batch update, one historical average) and releases it
//! on drop, on every exit path.

use crate::db::models::{CycleRowRecord, InterpolatedChangeset, NewPollutionRow, TargetRecord};
use crate::fields::Field;
use crate::models::pollution::{CycleKey, InterpolatedUpdate, RawReading, StationRow, TargetRow};
use crate::schema;
use chrono::{Days, NaiveDate};
use diesel::prelude::*;
use diesel::pg::Pg;
use diesel::sql_types::{Date, Integer, Nullable, Text};
use diesel::{Connection, PgConnection, QueryableByName};
use std::error::Error;
use std::fmt::{self, Display, Formatter};

#[derive(Debug)]
pub enum StoreError {
    Connection(String),
    Query(String),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Connection(e) => write!(f, "db connection failed: {}", e),
            StoreError::Query(e) => write!(f, "db query failed: {}", e),
        }
    }
}

impl Error for StoreError {}

impl From<diesel::result::Error> for StoreError {
    fn from(value: diesel::result::Error) -> Self {
        StoreError::Query(value.to_string())
    }
}

impl From<diesel::ConnectionError> for StoreError {
    fn from(value: diesel::ConnectionError) -> Self {
        StoreError::Connection(value.to_string())
    }
}

/// Mean of one raw field over persisted history, restricted by station and/or
/// hour of day, over the `window_days` dates ending at `as_of` (inclusive).
/// With `observed_only`, values whose `imputed_mask` bit is set are skipped.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HistoryQuery {
    pub field: Field,
    pub station_id: Option<String>,
    pub hour_of_day: Option<u32>,
    pub window_days: u32,
    pub as_of: NaiveDate,
    pub observed_only: bool,
}

impl HistoryQuery {
    /// First date included in the window.
    pub fn window_start(&self) -> NaiveDate {
        self.as_of
            .checked_sub_days(Days::new(u64::from(self.window_days.saturating_sub(1))))
            .unwrap_or(NaiveDate::MIN)
    }
}

pub trait Store {
    /// Insert one cycle's readings in a single statement. Rows whose
    /// `(date, time, station_id)` already exists are skipped; returns rows inserted.
    fn insert_raw_batch(&self, key: &CycleKey, readings: &[RawReading]) -> Result<usize, StoreError>;

    fn read_cycle_rows(&self, key: &CycleKey) -> Result<Vec<StationRow>, StoreError>;

    fn read_targets(&self, key: &CycleKey) -> Result<Vec<TargetRow>, StoreError>;

    /// Write all eleven interpolated columns of each row; returns rows updated.
    fn update_interpolated(&self, updates: &[InterpolatedUpdate]) -> Result<usize, StoreError>;

    fn historical_average(&self, query: &HistoryQuery) -> Result<Option<f64>, StoreError>;
}

pub struct PgStore {
    database_url: String,
}

impl PgStore {
    pub fn new(database_url: impl Into<String>) -> Self {
        PgStore {
            database_url: database_url.into(),
        }
    }

    pub fn connect(&self) -> Result<PgConnection, StoreError> {
        Ok(PgConnection::establish(&self.database_url)?)
    }
}

#[derive(QueryableByName)]
struct AverageRow {
    #[diesel(sql_type = Nullable<diesel::sql_types::Double>)]
    average: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
enum HistoryBind {
    Date(NaiveDate),
    Text(String),
    Int(i32),
}

/// `AVG` statement for `query` with its binds in placeholder order. Only the
/// filters that apply are emitted.
fn history_sql(query: &HistoryQuery) -> (String, Vec<HistoryBind>) {
    // column names come from the fixed field catalogue, never from input
    let mut sql = format!(
        "SELECT AVG({}) AS average FROM pollution_data WHERE date >= $1 AND date <= $2",
        query.field.raw_column()
    );
    let mut binds = vec![HistoryBind::Date(query.window_start()), HistoryBind::Date(query.as_of)];

    if let Some(station_id) = &query.station_id {
        binds.push(HistoryBind::Text(station_id.clone()));
        sql.push_str(&format!(" AND station_id = ${}", binds.len()));
    }
    if let Some(hour) = query.hour_of_day {
        binds.push(HistoryBind::Int(hour as i32));
        sql.push_str(&format!(" AND EXTRACT(HOUR FROM time)::int4 = ${}", binds.len()));
    }
    if query.observed_only {
        binds.push(HistoryBind::Int(query.field.mask_bit()));
        sql.push_str(&format!(" AND (imputed_mask & ${}) = 0", binds.len()));
    }
    (sql, binds)
}

impl Store for PgStore {
    fn insert_raw_batch(&self, key: &CycleKey, readings: &[RawReading]) -> Result<usize, StoreError> {
        if readings.is_empty() {
            return Ok(0);
        }

        use schema::pollution_data::dsl as P;

        let rows: Vec<NewPollutionRow> = readings.iter().map(|r| NewPollutionRow::from_reading(key, r)).collect();
        let mut conn = self.connect()?;
        let inserted = diesel::insert_into(P::pollution_data)
            .values(&rows)
            .on_conflict((P::date, P::time, P::station_id))
            .do_nothing()
            .execute(&mut conn)?;
        Ok(inserted)
    }

    fn read_cycle_rows(&self, key: &CycleKey) -> Result<Vec<StationRow>, StoreError> {
        use schema::pollution_data::dsl as P;

        let mut conn = self.connect()?;
        let records: Vec<CycleRowRecord> = P::pollution_data
            .filter(P::date.eq(key.date).and(P::time.eq(key.time)))
            .order(P::id.asc())
            .select(CycleRowRecord::as_select())
            .load(&mut conn)?;
        Ok(records.into_iter().map(StationRow::from).collect())
    }

    fn read_targets(&self, key: &CycleKey) -> Result<Vec<TargetRow>, StoreError> {
        use schema::pollution_data::dsl as P;

        let mut conn = self.connect()?;
        let records: Vec<TargetRecord> = P::pollution_data
            .filter(P::date.eq(key.date).and(P::time.eq(key.time)))
            .order(P::id.asc())
            .select(TargetRecord::as_select())
            .load(&mut conn)?;
        Ok(records.into_iter().filter_map(TargetRecord::into_target).collect())
    }

    fn update_interpolated(&self, updates: &[InterpolatedUpdate]) -> Result<usize, StoreError> {
        if updates.is_empty() {
            return Ok(0);
        }

        use schema::pollution_data::dsl as P;

        let mut conn = self.connect()?;
        let updated = conn.transaction::<usize, diesel::result::Error, _>(|conn| {
            let mut total = 0;
            for u in updates {
                total += diesel::update(P::pollution_data.find(u.row_id))
                    .set(InterpolatedChangeset::from(u))
                    .execute(conn)?;
            }
            Ok(total)
        })?;
        Ok(updated)
    }

    fn historical_average(&self, query: &HistoryQuery) -> Result<Option<f64>, StoreError> {
        let (sql, binds) = history_sql(query);
        let mut statement = diesel::sql_query(sql).into_boxed::<Pg>();
        for bind in binds {
            statement = match bind {
                HistoryBind::Date(d) => statement.bind::<Date, _>(d),
                HistoryBind::Text(t) => statement.bind::<Text, _>(t),
                HistoryBind::Int(i) => statement.bind::<Integer, _>(i),
            };
        }

        let mut conn = self.connect()?;
        let row: AverageRow = statement.get_result(&mut conn)?;
        Ok(row.average)
    }
}
