#[cfg(feature = "sea-orm")]
use sea_orm::prelude::StringLen;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::value::{RawValue, Value};
use crate::error::{ParameterError, Result};

/// Maximum number of characters a string parameter may hold.
pub const STRING_MAX_LEN: usize = 40;

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const TIME_FORMAT: &str = "%H:%M:%S";
pub const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// The closed set of primitive kinds a declared parameter can have.
///
/// When the `sea-orm` feature is enabled, this enum can be used directly as
/// an entity column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(
    feature = "sea-orm",
    derive(sea_orm::DeriveActiveEnum, sea_orm::EnumIter),
    sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")
)]
#[serde(rename_all = "lowercase")]
pub enum ParameterKind {
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "string"))]
    String,
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "integer"))]
    Integer,
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "float"))]
    Float,
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "date"))]
    Date,
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "time"))]
    Time,
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "datetime"))]
    DateTime,
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "boolean"))]
    Boolean,
}

impl ParameterKind {
    /// Kinds in the order `create` tries them: the first one accepting a raw
    /// value wins.
    pub const DETECTION_ORDER: &'static [ParameterKind] = &[
        Self::DateTime,
        Self::Date,
        Self::Time,
        Self::Integer,
        Self::Float,
        Self::Boolean,
        Self::String,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Date => "date",
            Self::Time => "time",
            Self::DateTime => "datetime",
            Self::Boolean => "boolean",
        }
    }

    /// Whether this kind accepts the raw value as-is, without any widening.
    ///
    /// This is the predicate used for kind detection.
    pub fn accepts(&self, raw: &RawValue) -> bool {
        match (self, raw) {
            (Self::DateTime, RawValue::DateTime(dt)) => dt.nanosecond() == 0,
            (Self::Date, RawValue::Date(_)) => true,
            (Self::Time, RawValue::Time(t)) => t.nanosecond() == 0,
            (Self::Integer, RawValue::Int(_)) => true,
            (Self::Float, RawValue::Float(f)) => !f.is_nan(),
            (Self::Boolean, RawValue::Bool(_)) => true,
            (Self::String, RawValue::Text(s)) => s.chars().count() <= STRING_MAX_LEN,
            _ => false,
        }
    }

    /// Validate a raw value for a parameter of this kind and turn it into a
    /// typed value.
    ///
    /// Integers widen to floats and midnight datetimes narrow to dates; any
    /// other mismatch is rejected.
    pub fn coerce(&self, name: &str, raw: RawValue) -> Result<Value> {
        let mismatch = |raw: &RawValue| ParameterError::TypeMismatch {
            name: name.to_string(),
            expected: *self,
            found: raw.describe(),
        };

        match (self, raw) {
            (Self::String, RawValue::Text(s)) => {
                let actual = s.chars().count();
                if actual > STRING_MAX_LEN {
                    return Err(ParameterError::StringTooLong {
                        actual,
                        limit: STRING_MAX_LEN,
                    });
                }
                Ok(Value::String(s))
            }
            (Self::Integer, RawValue::Int(i)) => Ok(Value::Integer(i)),
            (Self::Float, RawValue::Float(f)) if !f.is_nan() => Ok(Value::Float(f)),
            (Self::Float, RawValue::Int(i)) => Ok(Value::Float(i as f64)),
            (Self::Boolean, RawValue::Bool(b)) => Ok(Value::Boolean(b)),
            (Self::Date, RawValue::Date(d)) => Ok(Value::Date(d)),
            (Self::Date, RawValue::DateTime(dt)) if dt.time() == NaiveTime::MIN => {
                Ok(Value::Date(dt.date()))
            }
            (Self::Time, RawValue::Time(t)) if t.nanosecond() == 0 => Ok(Value::Time(t)),
            (Self::DateTime, RawValue::DateTime(dt)) if dt.nanosecond() == 0 => {
                Ok(Value::DateTime(dt))
            }
            (_, other) => Err(mismatch(&other)),
        }
    }

    /// Parse the canonical text form of a value of this kind.
    pub fn parse(&self, text: &str) -> Result<Value> {
        let conversion = || ParameterError::StringConversion {
            kind: *self,
            text: text.to_string(),
        };

        match self {
            Self::String => self.coerce("", RawValue::Text(text.to_string())),
            Self::Integer => text
                .trim()
                .parse::<i64>()
                .map(Value::Integer)
                .map_err(|_| conversion()),
            Self::Float => match text.trim().parse::<f64>() {
                Ok(f) if !f.is_nan() => Ok(Value::Float(f)),
                _ => Err(conversion()),
            },
            Self::Date => NaiveDate::parse_from_str(text.trim(), DATE_FORMAT)
                .map(Value::Date)
                .map_err(|_| conversion()),
            Self::Time => NaiveTime::parse_from_str(text.trim(), TIME_FORMAT)
                .map(Value::Time)
                .map_err(|_| conversion()),
            Self::DateTime => NaiveDateTime::parse_from_str(text.trim(), DATETIME_FORMAT)
                .map(Value::DateTime)
                .map_err(|_| conversion()),
            Self::Boolean => {
                let trimmed = text.trim();
                if trimmed.eq_ignore_ascii_case("true") {
                    Ok(Value::Boolean(true))
                } else if trimmed.eq_ignore_ascii_case("false") {
                    Ok(Value::Boolean(false))
                } else {
                    trimmed
                        .parse::<i64>()
                        .map(|i| Value::Boolean(i != 0))
                        .map_err(|_| conversion())
                }
            }
        }
    }

    /// Render a value of this kind in its canonical text form.
    ///
    /// `parse` is the inverse of this function for every legal value.
    pub fn format(&self, value: &Value) -> Result<String> {
        if value.kind() != *self {
            return Err(ParameterError::TypeMismatch {
                name: String::new(),
                expected: *self,
                found: value.kind().to_string(),
            });
        }
        Ok(value.to_string())
    }
}

impl fmt::Display for ParameterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ParameterKind {
    type Err = ParameterError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "string" => Ok(Self::String),
            "integer" => Ok(Self::Integer),
            "float" => Ok(Self::Float),
            "date" => Ok(Self::Date),
            "time" => Ok(Self::Time),
            "datetime" => Ok(Self::DateTime),
            "boolean" => Ok(Self::Boolean),
            _ => Err(ParameterError::UnknownKind(s.to_string())),
        }
    }
}
