use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};

use crate::error::UpnpError;

/// The closed set of UPnP scalar data types (UPnP Device Architecture, table
/// "allowed UPnP data types").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Ui1,
    Ui2,
    Ui4,
    I1,
    I2,
    I4,
    Int,
    R4,
    R8,
    Number,
    Fixed14_4,
    Float,
    Char,
    Str,
    Date,
    DateTime,
    DateTimeTz,
    Time,
    TimeTz,
    Boolean,
    BinBase64,
    BinHex,
    Uri,
    Uuid,
}

/// Host-side category a [`DataType`] maps to. The action binder checks
/// handler expectations against this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    UInt,
    Int,
    Float,
    Bool,
    Str,
    Bytes,
    Char,
    Date,
    DateTime,
    DateTimeTz,
    Time,
    TimeTz,
    Uuid,
}

/// A host-side value of some UPnP data type.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    UInt(u64),
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    Bytes(Vec<u8>),
    Char(char),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    DateTimeTz(DateTime<FixedOffset>),
    Time(NaiveTime),
    TimeTz {
        time: NaiveTime,
        offset: Option<FixedOffset>,
    },
    Uuid(uuid::Uuid),
}

impl DataType {
    pub fn from_upnp(s: &str) -> Result<Self, UpnpError> {
        Ok(match s {
            "ui1" => DataType::Ui1,
            "ui2" => DataType::Ui2,
            "ui4" => DataType::Ui4,
            "i1" => DataType::I1,
            "i2" => DataType::I2,
            "i4" => DataType::I4,
            "int" => DataType::Int,
            "r4" => DataType::R4,
            "r8" => DataType::R8,
            "number" => DataType::Number,
            "fixed.14.4" => DataType::Fixed14_4,
            "float" => DataType::Float,
            "char" => DataType::Char,
            "string" => DataType::Str,
            "date" => DataType::Date,
            "dateTime" => DataType::DateTime,
            "dateTime.tz" => DataType::DateTimeTz,
            "time" => DataType::Time,
            "time.tz" => DataType::TimeTz,
            "boolean" => DataType::Boolean,
            "bin.base64" => DataType::BinBase64,
            "bin.hex" => DataType::BinHex,
            "uri" => DataType::Uri,
            "uuid" => DataType::Uuid,
            other => return Err(UpnpError::UnknownDataType(other.to_owned())),
        })
    }

    /// The tag rendered into `<dataType>` in a service description.
    pub fn as_upnp(&self) -> &'static str {
        match self {
            DataType::Ui1 => "ui1",
            DataType::Ui2 => "ui2",
            DataType::Ui4 => "ui4",
            DataType::I1 => "i1",
            DataType::I2 => "i2",
            DataType::I4 => "i4",
            DataType::Int => "int",
            DataType::R4 => "r4",
            DataType::R8 => "r8",
            DataType::Number => "number",
            DataType::Fixed14_4 => "fixed.14.4",
            DataType::Float => "float",
            DataType::Char => "char",
            DataType::Str => "string",
            DataType::Date => "date",
            DataType::DateTime => "dateTime",
            DataType::DateTimeTz => "dateTime.tz",
            DataType::Time => "time",
            DataType::TimeTz => "time.tz",
            DataType::Boolean => "boolean",
            DataType::BinBase64 => "bin.base64",
            DataType::BinHex => "bin.hex",
            DataType::Uri => "uri",
            DataType::Uuid => "uuid",
        }
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            DataType::Ui1 | DataType::Ui2 | DataType::Ui4 => ValueKind::UInt,
            DataType::I1 | DataType::I2 | DataType::I4 | DataType::Int => ValueKind::Int,
            DataType::R4
            | DataType::R8
            | DataType::Number
            | DataType::Fixed14_4
            | DataType::Float => ValueKind::Float,
            DataType::Char => ValueKind::Char,
            DataType::Str | DataType::Uri => ValueKind::Str,
            DataType::Date => ValueKind::Date,
            DataType::DateTime => ValueKind::DateTime,
            DataType::DateTimeTz => ValueKind::DateTimeTz,
            DataType::Time => ValueKind::Time,
            DataType::TimeTz => ValueKind::TimeTz,
            DataType::Boolean => ValueKind::Bool,
            DataType::BinBase64 | DataType::BinHex => ValueKind::Bytes,
            DataType::Uuid => ValueKind::Uuid,
        }
    }

    /// Parse the textual wire representation into a host value.
    pub fn parse(&self, text: &str) -> Result<Value, UpnpError> {
        let err = |reason: String| UpnpError::invalid_value(self.as_upnp(), reason);
        let trimmed = text.trim();
        Ok(match self {
            DataType::Ui1 => Value::UInt(parse_uint(self, trimmed, u8::MAX as u64)?),
            DataType::Ui2 => Value::UInt(parse_uint(self, trimmed, u16::MAX as u64)?),
            DataType::Ui4 => Value::UInt(parse_uint(self, trimmed, u32::MAX as u64)?),
            DataType::I1 => Value::Int(parse_int(self, trimmed, i8::MIN as i64, i8::MAX as i64)?),
            DataType::I2 => Value::Int(parse_int(self, trimmed, i16::MIN as i64, i16::MAX as i64)?),
            DataType::I4 => Value::Int(parse_int(self, trimmed, i32::MIN as i64, i32::MAX as i64)?),
            DataType::Int => Value::Int(parse_int(self, trimmed, i64::MIN, i64::MAX)?),
            DataType::R4 | DataType::R8 | DataType::Number | DataType::Fixed14_4
            | DataType::Float => Value::Float(
                trimmed
                    .parse::<f64>()
                    .map_err(|e| err(format!("not a number: {e}")))?,
            ),
            DataType::Char => {
                let mut chars = text.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Value::Char(c),
                    _ => return Err(err("expected exactly one character".to_owned())),
                }
            }
            DataType::Str | DataType::Uri => Value::Str(text.to_owned()),
            DataType::Date => Value::Date(
                NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
                    .map_err(|e| err(format!("not an ISO-8601 date: {e}")))?,
            ),
            DataType::DateTime => Value::DateTime(
                NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S")
                    .map_err(|e| err(format!("not an ISO-8601 datetime: {e}")))?,
            ),
            DataType::DateTimeTz => Value::DateTimeTz(
                DateTime::parse_from_rfc3339(trimmed)
                    .map_err(|e| err(format!("not an ISO-8601 datetime with offset: {e}")))?,
            ),
            DataType::Time => Value::Time(
                NaiveTime::parse_from_str(trimmed, "%H:%M:%S")
                    .map_err(|e| err(format!("not an ISO-8601 time: {e}")))?,
            ),
            DataType::TimeTz => {
                let (time_part, offset) = split_time_offset(trimmed);
                let time = NaiveTime::parse_from_str(time_part, "%H:%M:%S")
                    .map_err(|e| err(format!("not an ISO-8601 time: {e}")))?;
                let offset = match offset {
                    Some(o) => {
                        Some(parse_offset(o).ok_or_else(|| {
                            err(format!("bad timezone offset: {o:?}"))
                        })?)
                    }
                    None => None,
                };
                Value::TimeTz { time, offset }
            }
            DataType::Boolean => match trimmed.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => Value::Bool(true),
                "0" | "false" | "no" => Value::Bool(false),
                other => return Err(err(format!("not a boolean: {other:?}"))),
            },
            DataType::BinBase64 => Value::Bytes(
                BASE64
                    .decode(trimmed)
                    .map_err(|e| err(format!("bad base64: {e}")))?,
            ),
            DataType::BinHex => Value::Bytes(
                hex::decode(trimmed).map_err(|e| err(format!("bad hex: {e}")))?,
            ),
            DataType::Uuid => Value::Uuid(
                uuid::Uuid::parse_str(trimmed).map_err(|e| err(format!("bad uuid: {e}")))?,
            ),
        })
    }

    /// Render a host value into its canonical textual form. Errors if the
    /// value's kind does not match this data type.
    pub fn render(&self, value: &Value) -> Result<String, UpnpError> {
        if value.kind() != self.kind() {
            return Err(UpnpError::invalid_value(
                self.as_upnp(),
                format!("expected a {:?} value, got {:?}", self.kind(), value.kind()),
            ));
        }
        Ok(match value {
            Value::UInt(v) => v.to_string(),
            Value::Int(v) => v.to_string(),
            Value::Float(v) => match self {
                DataType::Fixed14_4 => format!("{v:.4}"),
                _ => format!("{v}"),
            },
            Value::Bool(v) => if *v { "1" } else { "0" }.to_owned(),
            Value::Str(v) => v.clone(),
            Value::Bytes(v) => match self {
                DataType::BinHex => hex::encode(v),
                _ => BASE64.encode(v),
            },
            Value::Char(v) => v.to_string(),
            Value::Date(v) => v.format("%Y-%m-%d").to_string(),
            Value::DateTime(v) => v.format("%Y-%m-%dT%H:%M:%S").to_string(),
            Value::DateTimeTz(v) => v.format("%Y-%m-%dT%H:%M:%S%:z").to_string(),
            Value::Time(v) => v.format("%H:%M:%S").to_string(),
            Value::TimeTz { time, offset } => match offset {
                Some(o) => format!("{}{}", time.format("%H:%M:%S"), o),
                None => time.format("%H:%M:%S").to_string(),
            },
            Value::Uuid(v) => v.hyphenated().to_string(),
        })
    }
}

fn parse_uint(dt: &DataType, s: &str, max: u64) -> Result<u64, UpnpError> {
    let v: u64 = s
        .parse()
        .map_err(|e| UpnpError::invalid_value(dt.as_upnp(), format!("not an integer: {e}")))?;
    if v > max {
        return Err(UpnpError::invalid_value(
            dt.as_upnp(),
            format!("{v} out of range (max {max})"),
        ));
    }
    Ok(v)
}

fn parse_int(dt: &DataType, s: &str, min: i64, max: i64) -> Result<i64, UpnpError> {
    let v: i64 = s
        .parse()
        .map_err(|e| UpnpError::invalid_value(dt.as_upnp(), format!("not an integer: {e}")))?;
    if v < min || v > max {
        return Err(UpnpError::invalid_value(
            dt.as_upnp(),
            format!("{v} out of range ({min}..={max})"),
        ));
    }
    Ok(v)
}

// "13:37:00+02:00" -> ("13:37:00", Some("+02:00")); bare "13:37:00" has no
// offset part.
fn split_time_offset(s: &str) -> (&str, Option<&str>) {
    if let Some(stripped) = s.strip_suffix('Z') {
        return (stripped, Some("Z"));
    }
    if let Some(idx) = s.rfind(['+', '-']) {
        if idx >= "00:00:00".len() {
            return (&s[..idx], Some(&s[idx..]));
        }
    }
    (s, None)
}

fn parse_offset(s: &str) -> Option<FixedOffset> {
    if s == "Z" {
        return FixedOffset::east_opt(0);
    }
    let (sign, rest) = match s.split_at_checked(1)? {
        ("+", rest) => (1, rest),
        ("-", rest) => (-1, rest),
        _ => return None,
    };
    let (hh, mm) = rest.split_once(':')?;
    let hours: i32 = hh.parse().ok()?;
    let minutes: i32 = mm.parse().ok()?;
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::UInt(_) => ValueKind::UInt,
            Value::Int(_) => ValueKind::Int,
            Value::Float(_) => ValueKind::Float,
            Value::Bool(_) => ValueKind::Bool,
            Value::Str(_) => ValueKind::Str,
            Value::Bytes(_) => ValueKind::Bytes,
            Value::Char(_) => ValueKind::Char,
            Value::Date(_) => ValueKind::Date,
            Value::DateTime(_) => ValueKind::DateTime,
            Value::DateTimeTz(_) => ValueKind::DateTimeTz,
            Value::Time(_) => ValueKind::Time,
            Value::TimeTz { .. } => ValueKind::TimeTz,
            Value::Uuid(_) => ValueKind::Uuid,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::UInt(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(v) => Some(v),
            _ => None,
        }
    }

    /// Numeric comparison used by allowed-value-range checks. None for
    /// non-numeric or mismatched kinds.
    pub(crate) fn numeric_cmp(&self, other: &Value) -> Option<std::cmp::Ordering> {
        match (self, other) {
            (Value::UInt(a), Value::UInt(b)) => Some(a.cmp(b)),
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::UInt(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(dt: DataType, text: &str) {
        let parsed = dt.parse(text).unwrap();
        let rendered = dt.render(&parsed).unwrap();
        assert_eq!(rendered, text, "{dt:?} did not round-trip {text:?}");
        // Property: rendering parses back to the same host value.
        assert_eq!(dt.parse(&rendered).unwrap(), parsed);
    }

    #[test]
    fn test_roundtrips() {
        roundtrip(DataType::Ui1, "255");
        roundtrip(DataType::Ui4, "4294967295");
        roundtrip(DataType::I1, "-128");
        roundtrip(DataType::Int, "9223372036854775807");
        roundtrip(DataType::R8, "1.5");
        roundtrip(DataType::Fixed14_4, "3.1400");
        roundtrip(DataType::Char, "x");
        roundtrip(DataType::Str, "hello world");
        roundtrip(DataType::Date, "2024-02-29");
        roundtrip(DataType::DateTime, "2024-02-29T13:37:00");
        roundtrip(DataType::DateTimeTz, "2024-02-29T13:37:00+02:00");
        roundtrip(DataType::Time, "13:37:00");
        roundtrip(DataType::TimeTz, "13:37:00+02:00");
        roundtrip(DataType::TimeTz, "13:37:00");
        roundtrip(DataType::Boolean, "1");
        roundtrip(DataType::Boolean, "0");
        roundtrip(DataType::BinBase64, "aGVsbG8=");
        roundtrip(DataType::BinHex, "deadbeef");
        roundtrip(DataType::Uuid, "11111111-1111-1111-1111-111111111111");
        roundtrip(DataType::Uri, "http://example.com/a?b=c");
    }

    #[test]
    fn test_upnp_tags() {
        for tag in [
            "ui1", "ui2", "ui4", "i1", "i2", "i4", "int", "r4", "r8", "number", "fixed.14.4",
            "float", "char", "string", "date", "dateTime", "dateTime.tz", "time", "time.tz",
            "boolean", "bin.base64", "bin.hex", "uri", "uuid",
        ] {
            assert_eq!(DataType::from_upnp(tag).unwrap().as_upnp(), tag);
        }
        assert!(matches!(
            DataType::from_upnp("i8"),
            Err(UpnpError::UnknownDataType(_))
        ));
    }

    #[test]
    fn test_boolean_forms() {
        for t in ["1", "true", "yes", "TRUE", "Yes"] {
            assert_eq!(DataType::Boolean.parse(t).unwrap(), Value::Bool(true));
        }
        for f in ["0", "false", "no", "False", "NO"] {
            assert_eq!(DataType::Boolean.parse(f).unwrap(), Value::Bool(false));
        }
        assert!(DataType::Boolean.parse("maybe").is_err());
    }

    #[test]
    fn test_integer_ranges() {
        assert!(DataType::Ui1.parse("256").is_err());
        assert!(DataType::Ui1.parse("-1").is_err());
        assert!(DataType::I1.parse("128").is_err());
        assert!(DataType::I2.parse("-32769").is_err());
        assert_eq!(DataType::Ui2.parse("65535").unwrap(), Value::UInt(65535));
    }

    #[test]
    fn test_hex_is_lowercase() {
        let v = DataType::BinHex.parse("DEADBEEF").unwrap();
        assert_eq!(DataType::BinHex.render(&v).unwrap(), "deadbeef");
    }

    #[test]
    fn test_char_rejects_multiple() {
        assert!(DataType::Char.parse("ab").is_err());
        assert!(DataType::Char.parse("").is_err());
    }

    #[test]
    fn test_render_kind_mismatch() {
        assert!(DataType::Boolean.render(&Value::UInt(1)).is_err());
    }

    #[test]
    fn test_whitespace_normalization() {
        assert_eq!(DataType::Ui4.parse(" 42 ").unwrap(), Value::UInt(42));
        // Strings are taken verbatim.
        assert_eq!(
            DataType::Str.parse(" padded ").unwrap(),
            Value::Str(" padded ".to_owned())
        );
    }
}
