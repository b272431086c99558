//! Mapping of query result columns onto statically declared record fields.
//!
//! A [`Record`] lists its fields once, as a table of [`Field`]s. Each field
//! knows the column it is fed from and how to store a column value into the
//! record. When a query runs, a [`ColumnMapping`] matches the result columns
//! against that table a single time; every row is then scanned column by
//! column without any further name lookups.
//!
//! Columns with no matching field are read and discarded, and fields with no
//! matching column keep their default value. Older and newer schema versions
//! of the same table thus project onto the same record type.
//!
//! ```
//! use ieddata::projector::{self, Record};
//!
//! #[derive(Debug, Default)]
//! struct Setting {
//!     key: String,
//!     value: String,
//! }
//!
//! impl Record for Setting {
//!     const FIELDS: &'static [projector::Field<Self>] = ieddata::record_fields![Setting;
//!         "Key" => key,
//!         "Value" as "val" => value
//!     ];
//! }
//!
//! let conn = rusqlite::Connection::open_in_memory().unwrap();
//! let settings: Vec<Setting> =
//!     projector::query(&conn, "SELECT 'a' AS key, 'b' AS val, 'c' AS extra").unwrap();
//! assert_eq!(settings[0].key, "a");
//! assert_eq!(settings[0].value, "b");
//! ```

use std::borrow::Cow;
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use log::trace;
use rusqlite::types::{FromSqlError, FromSqlResult};
pub use rusqlite::types::ValueRef;
use rusqlite::{Connection, Row};

use crate::error::{Error, Result};
use crate::sanitize::first_lower;

/// Stores a single column value into its field of a record.
pub type Setter<R> = fn(&mut R, ValueRef<'_>) -> FromSqlResult<()>;

/// A named field of a record, together with the column it is fed from.
pub struct Field<R> {
    name: &'static str,
    column: Option<&'static str>,
    set: Setter<R>,
}

impl<R> Field<R> {
    /// A field fed from the column named like the field, with its first
    /// character in lower case.
    pub const fn new(name: &'static str, set: Setter<R>) -> Self {
        Self {
            name,
            column: None,
            set,
        }
    }

    /// A field fed from an explicitly named column.
    pub const fn renamed(name: &'static str, column: &'static str, set: Setter<R>) -> Self {
        Self {
            name,
            column: Some(column),
            set,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The result column this field is fed from.
    pub fn column(&self) -> Cow<'static, str> {
        match self.column {
            Some(column) => Cow::Borrowed(column),
            None => Cow::Owned(first_lower(self.name)),
        }
    }
}

impl<R> fmt::Debug for Field<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field")
            .field("name", &self.name)
            .field("column", &self.column())
            .finish()
    }
}

/// A record type that query rows can be projected onto.
pub trait Record: Default + Sized + 'static {
    const FIELDS: &'static [Field<Self>];
}

/// Builds the [`Field`] table of a [`Record`].
///
/// Each entry names the field, optionally the column it is fed from, and the
/// struct member to store into. The member type must implement
/// [`FromColumn`].
///
/// ```ignore
/// const FIELDS: &'static [Field<Self>] = record_fields![App;
///     "Id" as "appId" => id,
///     "Title" => title
/// ];
/// ```
#[macro_export]
macro_rules! record_fields {
    (@field $record:ty; $name:literal as $column:literal => $field:ident) => {
        $crate::projector::Field::<$record>::renamed(
            $name,
            $column,
            |record: &mut $record, value: $crate::projector::ValueRef<'_>| {
                record.$field = $crate::projector::FromColumn::from_column(value)?;
                Ok(())
            },
        )
    };
    (@field $record:ty; $name:literal => $field:ident) => {
        $crate::projector::Field::<$record>::new(
            $name,
            |record: &mut $record, value: $crate::projector::ValueRef<'_>| {
                record.$field = $crate::projector::FromColumn::from_column(value)?;
                Ok(())
            },
        )
    };
    ($record:ty; $($name:literal $(as $column:literal)? => $field:ident),* $(,)?) => {
        &[$($crate::record_fields!(@field $record; $name $(as $column)? => $field)),*]
    };
}

/// The assignment of result columns to record fields for one query.
pub struct ColumnMapping<R: 'static> {
    columns: Vec<String>,
    slots: Vec<Option<&'static Field<R>>>,
}

impl<R: Record> ColumnMapping<R> {
    /// Matches `columns` against the fields of `R`.
    ///
    /// The first column carrying a field's column name feeds that field;
    /// later duplicates and unknown columns are discarded.
    pub fn new<S: AsRef<str>>(columns: &[S]) -> Self {
        let fields: Vec<(Cow<'static, str>, &'static Field<R>)> =
            R::FIELDS.iter().map(|field| (field.column(), field)).collect();
        let mut taken = vec![false; fields.len()];

        let slots = columns
            .iter()
            .map(|column| {
                let index = fields
                    .iter()
                    .enumerate()
                    .position(|(index, (name, _))| !taken[index] && name == column.as_ref())?;
                taken[index] = true;
                Some(fields[index].1)
            })
            .collect();

        Self {
            columns: columns.iter().map(|c| c.as_ref().to_string()).collect(),
            slots,
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Result columns that do not feed any field.
    pub fn discarded(&self) -> impl Iterator<Item = &str> {
        self.columns
            .iter()
            .zip(&self.slots)
            .filter(|(_, slot)| slot.is_none())
            .map(|(column, _)| column.as_str())
    }

    /// Fields that no result column feeds.
    pub fn unfed(&self) -> impl Iterator<Item = &'static str> + '_ {
        R::FIELDS
            .iter()
            .filter(|field| {
                !self
                    .slots
                    .iter()
                    .flatten()
                    .any(|slot| std::ptr::eq(*slot, *field))
            })
            .map(|field| field.name)
    }

    /// Projects a single row onto a fresh record.
    pub fn scan(&self, row: &Row<'_>) -> Result<R> {
        let mut record = R::default();
        for (index, slot) in self.slots.iter().enumerate() {
            let value = row.get_ref(index)?;
            if let Some(field) = slot {
                (field.set)(&mut record, value).map_err(|source| Error::Projection {
                    column: self.columns[index].clone(),
                    source,
                })?;
            }
        }
        Ok(record)
    }
}

/// Runs `sql` and projects every result row onto an `R`.
pub fn query<R: Record>(conn: &Connection, sql: &str) -> Result<Vec<R>> {
    let mut stmt = conn.prepare(sql)?;
    let mapping = ColumnMapping::<R>::new(&stmt.column_names());
    if log::log_enabled!(log::Level::Trace) {
        trace!(
            "discarding columns {:?}, unfed fields {:?}",
            mapping.discarded().collect::<Vec<_>>(),
            mapping.unfed().collect::<Vec<_>>()
        );
    }

    let mut rows = stmt.query([])?;
    let mut records = Vec::new();
    while let Some(row) = rows.next()? {
        records.push(mapping.scan(row)?);
    }
    Ok(records)
}

/// Conversion of a column value into a record field.
///
/// SQL `NULL` converts into the default value of every type.
pub trait FromColumn: Sized {
    fn from_column(value: ValueRef<'_>) -> FromSqlResult<Self>;
}

impl FromColumn for String {
    fn from_column(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value {
            ValueRef::Null => Ok(String::new()),
            ValueRef::Integer(i) => Ok(i.to_string()),
            ValueRef::Real(f) => Ok(f.to_string()),
            ValueRef::Text(text) | ValueRef::Blob(text) => std::str::from_utf8(text)
                .map(str::to_string)
                .map_err(|err| FromSqlError::Other(Box::new(err))),
        }
    }
}

impl FromColumn for i64 {
    fn from_column(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value {
            ValueRef::Null => Ok(0),
            ValueRef::Integer(i) => Ok(i),
            ValueRef::Text(text) => std::str::from_utf8(text)
                .ok()
                .and_then(|text| text.trim().parse().ok())
                .ok_or(FromSqlError::InvalidType),
            ValueRef::Real(_) | ValueRef::Blob(_) => Err(FromSqlError::InvalidType),
        }
    }
}

impl FromColumn for i32 {
    fn from_column(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let i = i64::from_column(value)?;
        i32::try_from(i).map_err(|_| FromSqlError::OutOfRange(i))
    }
}

impl FromColumn for bool {
    fn from_column(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value {
            ValueRef::Null => Ok(false),
            ValueRef::Integer(i) => Ok(i != 0),
            ValueRef::Text(text) => match text {
                b"1" | b"true" | b"TRUE" | b"True" => Ok(true),
                b"" | b"0" | b"false" | b"FALSE" | b"False" => Ok(false),
                _ => Err(FromSqlError::InvalidType),
            },
            ValueRef::Real(_) | ValueRef::Blob(_) => Err(FromSqlError::InvalidType),
        }
    }
}

impl<T: FromColumn> FromColumn for Option<T> {
    fn from_column(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value {
            ValueRef::Null => Ok(None),
            value => T::from_column(value).map(Some),
        }
    }
}

const ZONED_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%dT%H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f%z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
];

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

/// Julian day number of the Unix epoch.
const UNIX_EPOCH_JULIAN_DAY: f64 = 2_440_587.5;

fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim().trim_end_matches(" UTC");
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(text) {
        return Some(timestamp.with_timezone(&Utc));
    }
    if let Some(naive) = text.strip_suffix('Z') {
        return parse_timestamp(naive);
    }
    for format in ZONED_FORMATS {
        if let Ok(timestamp) = DateTime::parse_from_str(text, format) {
            return Some(timestamp.with_timezone(&Utc));
        }
    }
    for format in NAIVE_FORMATS {
        if let Ok(timestamp) = NaiveDateTime::parse_from_str(text, format) {
            return Some(timestamp.and_utc());
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|timestamp| timestamp.and_utc())
}

/// Timestamps are accepted in every representation SQLite's date and time
/// functions understand: ISO 8601 text, Unix seconds, and Julian day
/// numbers.
impl FromColumn for DateTime<Utc> {
    fn from_column(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value {
            ValueRef::Null => Ok(DateTime::default()),
            ValueRef::Integer(secs) => {
                DateTime::from_timestamp(secs, 0).ok_or(FromSqlError::OutOfRange(secs))
            }
            ValueRef::Real(days) => {
                let millis = ((days - UNIX_EPOCH_JULIAN_DAY) * 86_400_000.0).round() as i64;
                DateTime::from_timestamp_millis(millis).ok_or(FromSqlError::OutOfRange(millis))
            }
            ValueRef::Text(text) => {
                let text = std::str::from_utf8(text).map_err(|err| FromSqlError::Other(Box::new(err)))?;
                if text.trim().is_empty() {
                    return Ok(DateTime::default());
                }
                parse_timestamp(text).ok_or_else(|| {
                    FromSqlError::Other(format!("unrecognized timestamp {text:?}").into())
                })
            }
            ValueRef::Blob(_) => Err(FromSqlError::InvalidType),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[derive(Debug, Default, PartialEq)]
    struct Probe {
        id: String,
        count: i64,
        enabled: bool,
        stamp: DateTime<Utc>,
        note: Option<String>,
    }

    impl Record for Probe {
        const FIELDS: &'static [Field<Self>] = crate::record_fields![Probe;
            "Id" as "probeId" => id,
            "Count" => count,
            "Enabled" => enabled,
            "Stamp" => stamp,
            "Note" => note,
        ];
    }

    fn conn() -> Connection {
        Connection::open_in_memory().unwrap()
    }

    #[test]
    fn test_column_names() {
        let names: Vec<_> = Probe::FIELDS.iter().map(|f| f.column()).collect();
        assert_eq!(names, ["probeId", "count", "enabled", "stamp", "note"]);
        assert_eq!(Probe::FIELDS[0].name(), "Id");
    }

    #[test]
    fn test_unknown_and_missing_columns() {
        let probes: Vec<Probe> = query(
            &conn(),
            "SELECT 7 AS count, 'x' AS probeId, 'surplus' AS whatever, 1 AS enabled",
        )
        .unwrap();
        assert_eq!(
            probes,
            [Probe {
                id: "x".into(),
                count: 7,
                enabled: true,
                ..Default::default()
            }]
        );
    }

    #[test]
    fn test_mapping() {
        let mapping =
            ColumnMapping::<Probe>::new(&["count", "other", "probeId", "count", "Enabled"]);
        assert_eq!(mapping.columns().len(), 5);
        assert_eq!(
            mapping.discarded().collect::<Vec<_>>(),
            ["other", "count", "Enabled"]
        );
        assert_eq!(
            mapping.unfed().collect::<Vec<_>>(),
            ["Enabled", "Stamp", "Note"]
        );
    }

    #[test]
    fn test_duplicate_column_first_wins() {
        let probes: Vec<Probe> =
            query(&conn(), "SELECT 1 AS count, 2 AS count, 'a' AS probeId").unwrap();
        assert_eq!(probes[0].count, 1);
    }

    #[test]
    fn test_nulls_are_defaults() {
        let probes: Vec<Probe> = query(
            &conn(),
            "SELECT NULL AS probeId, NULL AS count, NULL AS enabled, NULL AS stamp, NULL AS note",
        )
        .unwrap();
        assert_eq!(probes, [Probe::default()]);
    }

    #[test]
    fn test_every_row() {
        let conn = conn();
        conn.execute_batch(
            "CREATE TABLE t (probeId TEXT, note TEXT);
             INSERT INTO t VALUES ('a', 'first'), ('b', NULL), ('c', 'third');",
        )
        .unwrap();
        let probes: Vec<Probe> = query(&conn, "SELECT * FROM t ORDER BY probeId").unwrap();
        let ids: Vec<_> = probes.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, ["a", "b", "c"]);
        assert_eq!(probes[1].note, None);
        assert_eq!(probes[2].note.as_deref(), Some("third"));
    }

    #[test]
    fn test_conversion_error_names_column() {
        let err = query::<Probe>(&conn(), "SELECT 'many' AS count").unwrap_err();
        assert!(matches!(&err, Error::Projection { column, .. } if column == "count"));
    }

    #[test]
    fn test_timestamps() {
        let expected = Utc.with_ymd_and_hms(2021, 3, 4, 10, 20, 30).unwrap();
        for text in [
            "2021-03-04 10:20:30",
            "2021-03-04T10:20:30",
            "2021-03-04T10:20:30Z",
            "2021-03-04 10:20:30Z",
            "2021-03-04T12:20:30+02:00",
            "2021-03-04 12:20:30+02:00",
            "2021-03-04 10:20:30.000",
        ] {
            let value = ValueRef::Text(text.as_bytes());
            assert_eq!(DateTime::<Utc>::from_column(value).unwrap(), expected, "{text}");
        }

        assert_eq!(
            DateTime::<Utc>::from_column(ValueRef::Integer(expected.timestamp())).unwrap(),
            expected
        );
        assert_eq!(
            DateTime::<Utc>::from_column(ValueRef::Text(b"2021-03-04")).unwrap(),
            Utc.with_ymd_and_hms(2021, 3, 4, 0, 0, 0).unwrap()
        );
        assert_eq!(
            DateTime::<Utc>::from_column(ValueRef::Real(UNIX_EPOCH_JULIAN_DAY)).unwrap(),
            DateTime::<Utc>::default()
        );
        assert!(DateTime::<Utc>::from_column(ValueRef::Text(b"yesterday")).is_err());
    }

    #[test]
    fn test_sqlite_timestamps() {
        let probes: Vec<Probe> = query(
            &conn(),
            "SELECT datetime(1614853230, 'unixepoch') AS stamp
             UNION ALL SELECT julianday('2021-03-04 10:20:30')",
        )
        .unwrap();
        let expected = Utc.with_ymd_and_hms(2021, 3, 4, 10, 20, 30).unwrap();
        assert_eq!(probes[0].stamp, expected);
        assert_eq!(probes[1].stamp, expected);
    }

    #[test]
    fn test_scalars() {
        assert!(bool::from_column(ValueRef::Integer(2)).unwrap());
        assert!(!bool::from_column(ValueRef::Text(b"0")).unwrap());
        assert!(bool::from_column(ValueRef::Real(1.0)).is_err());
        assert_eq!(i64::from_column(ValueRef::Text(b" 42 ")).unwrap(), 42);
        assert!(matches!(
            i32::from_column(ValueRef::Integer(i64::MAX)),
            Err(FromSqlError::OutOfRange(_))
        ));
        assert_eq!(String::from_column(ValueRef::Integer(5)).unwrap(), "5");
    }
}
