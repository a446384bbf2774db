//! XSD built-in types
//!
//! This module defines the built-in primitive and derived simple types of XML
//! Schema supported by the grammar compiler. Each type knows its white space
//! handling, the facets it admits and how to map a lexical value into the
//! value space.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use base64::Engine;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use url::Url;

use crate::error::{Error, Result, ValidationError};
use crate::names::{is_valid_name, is_valid_ncname, is_valid_nmtoken};
use crate::validators::facets::WhiteSpace;

/// XSD namespace
pub const XSD_NAMESPACE: &str = "http://www.w3.org/2001/XMLSchema";

/// XSD string type name
pub const XSD_STRING: &str = "string";
/// XSD ID type name
pub const XSD_ID: &str = "ID";
/// XSD IDREF type name
pub const XSD_IDREF: &str = "IDREF";
/// XSD QName type name
pub const XSD_QNAME: &str = "QName";
/// XSD anyType type name
pub const XSD_ANY_TYPE: &str = "anyType";
/// XSD anySimpleType type name
pub const XSD_ANY_SIMPLE_TYPE: &str = "anySimpleType";

// Facet names
/// XSD length facet name
pub const XSD_LENGTH: &str = "length";
/// XSD minLength facet name
pub const XSD_MIN_LENGTH: &str = "minLength";
/// XSD maxLength facet name
pub const XSD_MAX_LENGTH: &str = "maxLength";
/// XSD pattern facet name
pub const XSD_PATTERN: &str = "pattern";
/// XSD enumeration facet name
pub const XSD_ENUMERATION: &str = "enumeration";
/// XSD whiteSpace facet name
pub const XSD_WHITE_SPACE: &str = "whiteSpace";
/// XSD maxInclusive facet name
pub const XSD_MAX_INCLUSIVE: &str = "maxInclusive";
/// XSD maxExclusive facet name
pub const XSD_MAX_EXCLUSIVE: &str = "maxExclusive";
/// XSD minInclusive facet name
pub const XSD_MIN_INCLUSIVE: &str = "minInclusive";
/// XSD minExclusive facet name
pub const XSD_MIN_EXCLUSIVE: &str = "minExclusive";
/// XSD totalDigits facet name
pub const XSD_TOTAL_DIGITS: &str = "totalDigits";
/// XSD fractionDigits facet name
pub const XSD_FRACTION_DIGITS: &str = "fractionDigits";

const STRING_FACETS: &[&str] = &[
    XSD_LENGTH,
    XSD_MIN_LENGTH,
    XSD_MAX_LENGTH,
    XSD_PATTERN,
    XSD_ENUMERATION,
    XSD_WHITE_SPACE,
];

const BOOLEAN_FACETS: &[&str] = &[XSD_PATTERN, XSD_WHITE_SPACE];

const ORDERED_FACETS: &[&str] = &[
    XSD_PATTERN,
    XSD_ENUMERATION,
    XSD_WHITE_SPACE,
    XSD_MAX_INCLUSIVE,
    XSD_MAX_EXCLUSIVE,
    XSD_MIN_INCLUSIVE,
    XSD_MIN_EXCLUSIVE,
];

const DECIMAL_FACETS: &[&str] = &[
    XSD_TOTAL_DIGITS,
    XSD_FRACTION_DIGITS,
    XSD_PATTERN,
    XSD_ENUMERATION,
    XSD_WHITE_SPACE,
    XSD_MAX_INCLUSIVE,
    XSD_MAX_EXCLUSIVE,
    XSD_MIN_INCLUSIVE,
    XSD_MIN_EXCLUSIVE,
];

/// Represents any XSD atomic value
#[derive(Debug, Clone, PartialEq)]
pub enum XsdValue {
    /// String value
    String(String),
    /// Boolean value
    Boolean(bool),
    /// Decimal or integer value
    Decimal(Decimal),
    /// Float or double value
    Float(f64),
    /// Binary value (hex or base64 decoded)
    Binary(Vec<u8>),
    /// Duration value (ISO 8601)
    Duration(String),
    /// DateTime value, normalized to UTC when a timezone was given
    DateTime(NaiveDateTime),
    /// Date value
    Date(NaiveDate),
    /// Time value, normalized to UTC when a timezone was given
    Time(NaiveTime),
    /// URI value
    Uri(String),
    /// QName value (prefix, local name); the prefix is resolved in context
    QName(Option<String>, String),
    /// Value of a type without a value space (anyType)
    Null,
}

impl XsdValue {
    /// Order two values of the same value space
    ///
    /// Returns `None` for unordered value spaces or mismatched kinds.
    pub fn compare(&self, other: &XsdValue) -> Option<Ordering> {
        match (self, other) {
            (XsdValue::Decimal(a), XsdValue::Decimal(b)) => Some(a.cmp(b)),
            (XsdValue::Float(a), XsdValue::Float(b)) => a.partial_cmp(b),
            (XsdValue::DateTime(a), XsdValue::DateTime(b)) => Some(a.cmp(b)),
            (XsdValue::Date(a), XsdValue::Date(b)) => Some(a.cmp(b)),
            (XsdValue::Time(a), XsdValue::Time(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Length as measured by the length facets
    pub fn length(&self) -> Option<usize> {
        match self {
            XsdValue::String(s) | XsdValue::Uri(s) => Some(s.chars().count()),
            XsdValue::Binary(b) => Some(b.len()),
            _ => None,
        }
    }
}

impl fmt::Display for XsdValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            XsdValue::String(s) | XsdValue::Duration(s) | XsdValue::Uri(s) => write!(f, "{}", s),
            XsdValue::Boolean(b) => write!(f, "{}", b),
            XsdValue::Decimal(d) => write!(f, "{}", d),
            XsdValue::Float(v) => {
                if v.is_nan() {
                    write!(f, "NaN")
                } else if *v == f64::INFINITY {
                    write!(f, "INF")
                } else if *v == f64::NEG_INFINITY {
                    write!(f, "-INF")
                } else {
                    write!(f, "{}", v)
                }
            }
            XsdValue::Binary(b) => {
                for byte in b {
                    write!(f, "{:02X}", byte)?;
                }
                Ok(())
            }
            XsdValue::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%dT%H:%M:%S%.f")),
            XsdValue::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            XsdValue::Time(t) => write!(f, "{}", t.format("%H:%M:%S%.f")),
            XsdValue::QName(Some(prefix), local) => write!(f, "{}:{}", prefix, local),
            XsdValue::QName(None, local) => write!(f, "{}", local),
            XsdValue::Null => Ok(()),
        }
    }
}

/// Definition of a built-in XSD type
#[derive(Debug, Clone)]
pub struct BuiltinType {
    /// Type name (local name without namespace)
    pub name: &'static str,
    /// Base type name (None for anyType)
    pub base_type: Option<&'static str>,
    /// White space handling
    pub white_space: WhiteSpace,
    /// Facets admitted by this type
    pub admitted_facets: &'static [&'static str],
    validator: fn(&str) -> Result<XsdValue>,
}

impl BuiltinType {
    /// Validate a string value against this type
    pub fn validate(&self, value: &str) -> Result<XsdValue> {
        let normalized = self.white_space.normalize(value);
        (self.validator)(&normalized).map_err(|e| match e {
            Error::Validation(v) => Error::Validation(v.with_instance(value)),
            other => other,
        })
    }

    /// Map an already normalized value into the value space
    pub fn parse_normalized(&self, value: &str) -> Result<XsdValue> {
        (self.validator)(value)
    }

    /// Whether a facet may restrict this type
    pub fn admits(&self, facet: &str) -> bool {
        self.admitted_facets.contains(&facet)
    }

    /// Whether this type is `ancestor` or derived from it
    pub fn derives_from(&self, ancestor: &str) -> bool {
        let mut current = Some(self);
        while let Some(t) = current {
            if t.name == ancestor {
                return true;
            }
            current = t.base_type.and_then(get_builtin_type);
        }
        false
    }
}

fn invalid(message: impl Into<String>) -> Error {
    Error::Validation(ValidationError::new(message))
}

static LANGUAGE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z]{1,8}(-[a-zA-Z0-9]{1,8})*$").expect("valid regex"));
static DECIMAL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[+-]?(\d+(\.\d*)?|\.\d+)$").expect("valid regex"));
static INTEGER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[+-]?\d+$").expect("valid regex"));
static FLOAT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([+-]?(\d+(\.\d*)?|\.\d+)([eE][+-]?\d+)?|INF|-INF|NaN)$").expect("valid regex")
});
static DURATION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^-?P(\d+Y)?(\d+M)?(\d+D)?(T(\d+H)?(\d+M)?(\d+(\.\d+)?S)?)?$").expect("valid regex")
});
static DATETIME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(-?\d{4,})-(\d{2})-(\d{2})T(\d{2}):(\d{2}):(\d{2})(\.\d+)?(Z|[+-]\d{2}:\d{2})?$")
        .expect("valid regex")
});
static DATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(-?\d{4,})-(\d{2})-(\d{2})(Z|[+-]\d{2}:\d{2})?$").expect("valid regex")
});
static TIME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{2}):(\d{2}):(\d{2})(\.\d+)?(Z|[+-]\d{2}:\d{2})?$").expect("valid regex")
});
static GYEAR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^-?\d{4,}(Z|[+-]\d{2}:\d{2})?$").expect("valid regex"));
static GYEAR_MONTH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^-?\d{4,}-(\d{2})(Z|[+-]\d{2}:\d{2})?$").expect("valid regex"));
static GMONTH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^--(\d{2})(Z|[+-]\d{2}:\d{2})?$").expect("valid regex"));
static GDAY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^---(\d{2})(Z|[+-]\d{2}:\d{2})?$").expect("valid regex"));
static GMONTH_DAY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^--(\d{2})-(\d{2})(Z|[+-]\d{2}:\d{2})?$").expect("valid regex"));

fn validate_string(value: &str) -> Result<XsdValue> {
    Ok(XsdValue::String(value.to_string()))
}

fn validate_normalized_string(value: &str) -> Result<XsdValue> {
    if value.contains(['\r', '\n', '\t']) {
        return Err(invalid("normalizedString cannot contain CR, LF, or TAB characters"));
    }
    Ok(XsdValue::String(value.to_string()))
}

fn validate_token(value: &str) -> Result<XsdValue> {
    if value.starts_with(' ') || value.ends_with(' ') || value.contains("  ") {
        return Err(invalid(
            "token cannot have leading/trailing spaces or consecutive spaces",
        ));
    }
    validate_normalized_string(value)
}

fn validate_language(value: &str) -> Result<XsdValue> {
    if !LANGUAGE_RE.is_match(value) {
        return Err(invalid("invalid language code format"));
    }
    Ok(XsdValue::String(value.to_string()))
}

fn validate_name(value: &str) -> Result<XsdValue> {
    if !is_valid_name(value) {
        return Err(invalid("invalid Name"));
    }
    Ok(XsdValue::String(value.to_string()))
}

fn validate_ncname(value: &str) -> Result<XsdValue> {
    if !is_valid_ncname(value) {
        return Err(invalid("invalid NCName"));
    }
    Ok(XsdValue::String(value.to_string()))
}

fn validate_nmtoken(value: &str) -> Result<XsdValue> {
    if !is_valid_nmtoken(value) {
        return Err(invalid("invalid NMTOKEN"));
    }
    Ok(XsdValue::String(value.to_string()))
}

fn validate_token_list(value: &str, item: fn(&str) -> Result<XsdValue>) -> Result<XsdValue> {
    if value.is_empty() {
        return Err(invalid("list value cannot be empty"));
    }
    for token in value.split(' ') {
        item(token)?;
    }
    Ok(XsdValue::String(value.to_string()))
}

fn validate_nmtokens(value: &str) -> Result<XsdValue> {
    validate_token_list(value, validate_nmtoken)
}

fn validate_ncname_list(value: &str) -> Result<XsdValue> {
    validate_token_list(value, validate_ncname)
}

fn validate_boolean(value: &str) -> Result<XsdValue> {
    match value {
        "true" | "1" => Ok(XsdValue::Boolean(true)),
        "false" | "0" => Ok(XsdValue::Boolean(false)),
        _ => Err(invalid("invalid boolean value")),
    }
}

fn parse_decimal(value: &str) -> Result<Decimal> {
    if !DECIMAL_RE.is_match(value) {
        return Err(invalid("invalid decimal value"));
    }
    let mut text = value.strip_prefix('+').unwrap_or(value).to_string();
    if text.ends_with('.') {
        text.push('0');
    }
    if let Some(rest) = text.strip_prefix("-.") {
        text = format!("-0.{}", rest);
    } else if text.starts_with('.') {
        text.insert(0, '0');
    }
    Decimal::from_str(&text).map_err(|_| invalid("decimal value out of range"))
}

fn validate_decimal(value: &str) -> Result<XsdValue> {
    parse_decimal(value).map(XsdValue::Decimal)
}

fn parse_integer(value: &str, type_name: &str) -> Result<Decimal> {
    if !INTEGER_RE.is_match(value) {
        return Err(invalid(format!("invalid {} value", type_name)));
    }
    parse_decimal(value)
}

fn bounded_integer(
    value: &str,
    type_name: &str,
    min: Option<Decimal>,
    max: Option<Decimal>,
) -> Result<XsdValue> {
    let d = parse_integer(value, type_name)?;
    if min.map_or(false, |m| d < m) || max.map_or(false, |m| d > m) {
        return Err(invalid(format!("value out of range for {}", type_name)));
    }
    Ok(XsdValue::Decimal(d))
}

fn validate_integer(value: &str) -> Result<XsdValue> {
    bounded_integer(value, "integer", None, None)
}

fn validate_long(value: &str) -> Result<XsdValue> {
    bounded_integer(value, "long", Some(i64::MIN.into()), Some(i64::MAX.into()))
}

fn validate_int(value: &str) -> Result<XsdValue> {
    bounded_integer(value, "int", Some(i32::MIN.into()), Some(i32::MAX.into()))
}

fn validate_short(value: &str) -> Result<XsdValue> {
    bounded_integer(value, "short", Some(i16::MIN.into()), Some(i16::MAX.into()))
}

fn validate_byte(value: &str) -> Result<XsdValue> {
    bounded_integer(value, "byte", Some(i8::MIN.into()), Some(i8::MAX.into()))
}

fn validate_non_negative_integer(value: &str) -> Result<XsdValue> {
    bounded_integer(value, "nonNegativeInteger", Some(Decimal::ZERO), None)
}

fn validate_positive_integer(value: &str) -> Result<XsdValue> {
    bounded_integer(value, "positiveInteger", Some(Decimal::ONE), None)
}

fn validate_non_positive_integer(value: &str) -> Result<XsdValue> {
    bounded_integer(value, "nonPositiveInteger", None, Some(Decimal::ZERO))
}

fn validate_negative_integer(value: &str) -> Result<XsdValue> {
    bounded_integer(value, "negativeInteger", None, Some(Decimal::NEGATIVE_ONE))
}

fn validate_unsigned_long(value: &str) -> Result<XsdValue> {
    bounded_integer(value, "unsignedLong", Some(Decimal::ZERO), Some(u64::MAX.into()))
}

fn validate_unsigned_int(value: &str) -> Result<XsdValue> {
    bounded_integer(value, "unsignedInt", Some(Decimal::ZERO), Some(u32::MAX.into()))
}

fn validate_unsigned_short(value: &str) -> Result<XsdValue> {
    bounded_integer(value, "unsignedShort", Some(Decimal::ZERO), Some(u16::MAX.into()))
}

fn validate_unsigned_byte(value: &str) -> Result<XsdValue> {
    bounded_integer(value, "unsignedByte", Some(Decimal::ZERO), Some(u8::MAX.into()))
}

fn validate_float(value: &str) -> Result<XsdValue> {
    if !FLOAT_RE.is_match(value) {
        return Err(invalid("invalid floating point value"));
    }
    let parsed = match value {
        "INF" => f64::INFINITY,
        "-INF" => f64::NEG_INFINITY,
        "NaN" => f64::NAN,
        other => other
            .parse::<f64>()
            .map_err(|_| invalid("invalid floating point value"))?,
    };
    Ok(XsdValue::Float(parsed))
}

fn validate_hex_binary(value: &str) -> Result<XsdValue> {
    if value.len() % 2 != 0 {
        return Err(invalid("hexBinary must have an even number of digits"));
    }
    let bytes = (0..value.len())
        .step_by(2)
        .map(|i| {
            value
                .get(i..i + 2)
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or_else(|| invalid("invalid hexBinary digit"))
        })
        .collect::<Result<Vec<u8>>>()?;
    Ok(XsdValue::Binary(bytes))
}

fn validate_base64_binary(value: &str) -> Result<XsdValue> {
    let compact: String = value.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    base64::engine::general_purpose::STANDARD
        .decode(compact.as_bytes())
        .map(XsdValue::Binary)
        .map_err(|e| invalid(format!("invalid base64Binary: {}", e)))
}

static URI_BASE: Lazy<Url> =
    Lazy::new(|| Url::parse("http://base.invalid/").expect("valid base URL"));

fn validate_any_uri(value: &str) -> Result<XsdValue> {
    if value.contains(['\n', '\r', '\t']) {
        return Err(invalid("anyURI cannot contain newline or tab characters"));
    }
    URI_BASE
        .join(value)
        .map_err(|e| invalid(format!("invalid anyURI: {}", e)))?;
    Ok(XsdValue::Uri(value.to_string()))
}

fn validate_qname(value: &str) -> Result<XsdValue> {
    match value.split_once(':') {
        Some((prefix, local)) if is_valid_ncname(prefix) && is_valid_ncname(local) => {
            Ok(XsdValue::QName(Some(prefix.to_string()), local.to_string()))
        }
        None if is_valid_ncname(value) => Ok(XsdValue::QName(None, value.to_string())),
        _ => Err(invalid("invalid QName")),
    }
}

fn validate_duration(value: &str) -> Result<XsdValue> {
    if !DURATION_RE.is_match(value) || value.ends_with('P') || value.ends_with('T') {
        return Err(invalid("invalid duration format"));
    }
    Ok(XsdValue::Duration(value.to_string()))
}

/// Timezone offset in minutes from a `Z` / `+hh:mm` suffix
fn timezone_minutes(tz: Option<&str>) -> Result<Option<i64>> {
    let tz = match tz {
        None => return Ok(None),
        Some("Z") => return Ok(Some(0)),
        Some(tz) => tz,
    };
    let sign = if tz.starts_with('-') { -1 } else { 1 };
    let hours: i64 = tz[1..3].parse().map_err(|_| invalid("invalid timezone"))?;
    let minutes: i64 = tz[4..6].parse().map_err(|_| invalid("invalid timezone"))?;
    if hours > 14 || minutes > 59 || (hours == 14 && minutes != 0) {
        return Err(invalid("timezone offset out of range"));
    }
    Ok(Some(sign * (hours * 60 + minutes)))
}

fn build_date(year: &str, month: &str, day: &str) -> Result<NaiveDate> {
    let year: i32 = year.parse().map_err(|_| invalid("year out of range"))?;
    let month: u32 = month.parse().map_err(|_| invalid("invalid month"))?;
    let day: u32 = day.parse().map_err(|_| invalid("invalid day"))?;
    NaiveDate::from_ymd_opt(year, month, day).ok_or_else(|| invalid("invalid calendar date"))
}

/// Build a time of day; `24:00:00` is reported as midnight plus a day
fn build_time(hour: &str, minute: &str, second: &str, fraction: Option<&str>) -> Result<(NaiveTime, bool)> {
    let hour: u32 = hour.parse().map_err(|_| invalid("invalid hour"))?;
    let minute: u32 = minute.parse().map_err(|_| invalid("invalid minute"))?;
    let second: u32 = second.parse().map_err(|_| invalid("invalid second"))?;
    let nanos = match fraction {
        Some(f) => {
            let digits: String = f[1..].chars().chain(std::iter::repeat('0')).take(9).collect();
            digits.parse::<u32>().map_err(|_| invalid("invalid fractional seconds"))?
        }
        None => 0,
    };
    if hour == 24 && minute == 0 && second == 0 && nanos == 0 {
        let midnight = NaiveTime::from_hms_opt(0, 0, 0).ok_or_else(|| invalid("invalid time of day"))?;
        return Ok((midnight, true));
    }
    NaiveTime::from_hms_nano_opt(hour, minute, second, nanos)
        .map(|t| (t, false))
        .ok_or_else(|| invalid("invalid time of day"))
}

fn validate_datetime(value: &str) -> Result<XsdValue> {
    let caps = DATETIME_RE
        .captures(value)
        .ok_or_else(|| invalid("invalid dateTime format"))?;
    let date = build_date(&caps[1], &caps[2], &caps[3])?;
    let (time, next_day) = build_time(&caps[4], &caps[5], &caps[6], caps.get(7).map(|m| m.as_str()))?;
    let mut dt = NaiveDateTime::new(date, time);
    if next_day {
        dt += chrono::Duration::days(1);
    }
    if let Some(offset) = timezone_minutes(caps.get(8).map(|m| m.as_str()))? {
        dt -= chrono::Duration::minutes(offset);
    }
    Ok(XsdValue::DateTime(dt))
}

fn validate_date(value: &str) -> Result<XsdValue> {
    let caps = DATE_RE.captures(value).ok_or_else(|| invalid("invalid date format"))?;
    timezone_minutes(caps.get(4).map(|m| m.as_str()))?;
    build_date(&caps[1], &caps[2], &caps[3]).map(XsdValue::Date)
}

fn validate_time(value: &str) -> Result<XsdValue> {
    let caps = TIME_RE.captures(value).ok_or_else(|| invalid("invalid time format"))?;
    let (mut time, _) = build_time(&caps[1], &caps[2], &caps[3], caps.get(4).map(|m| m.as_str()))?;
    if let Some(offset) = timezone_minutes(caps.get(5).map(|m| m.as_str()))? {
        time = time.overflowing_sub_signed(chrono::Duration::minutes(offset)).0;
    }
    Ok(XsdValue::Time(time))
}

fn check_month(month: &str) -> Result<()> {
    match month.parse::<u32>() {
        Ok(1..=12) => Ok(()),
        _ => Err(invalid("month out of range")),
    }
}

fn check_day(day: &str) -> Result<()> {
    match day.parse::<u32>() {
        Ok(1..=31) => Ok(()),
        _ => Err(invalid("day out of range")),
    }
}

fn validate_gyear(value: &str) -> Result<XsdValue> {
    if !GYEAR_RE.is_match(value) {
        return Err(invalid("invalid gYear format"));
    }
    Ok(XsdValue::String(value.to_string()))
}

fn validate_gyear_month(value: &str) -> Result<XsdValue> {
    let caps = GYEAR_MONTH_RE
        .captures(value)
        .ok_or_else(|| invalid("invalid gYearMonth format"))?;
    check_month(&caps[1])?;
    Ok(XsdValue::String(value.to_string()))
}

fn validate_gmonth(value: &str) -> Result<XsdValue> {
    let caps = GMONTH_RE.captures(value).ok_or_else(|| invalid("invalid gMonth format"))?;
    check_month(&caps[1])?;
    Ok(XsdValue::String(value.to_string()))
}

fn validate_gday(value: &str) -> Result<XsdValue> {
    let caps = GDAY_RE.captures(value).ok_or_else(|| invalid("invalid gDay format"))?;
    check_day(&caps[1])?;
    Ok(XsdValue::String(value.to_string()))
}

fn validate_gmonth_day(value: &str) -> Result<XsdValue> {
    let caps = GMONTH_DAY_RE
        .captures(value)
        .ok_or_else(|| invalid("invalid gMonthDay format"))?;
    check_month(&caps[1])?;
    check_day(&caps[2])?;
    Ok(XsdValue::String(value.to_string()))
}

fn validate_any_type(_value: &str) -> Result<XsdValue> {
    Ok(XsdValue::Null)
}

macro_rules! builtin {
    ($name:expr, $base:expr, $ws:ident, $facets:expr, $validator:ident) => {
        BuiltinType {
            name: $name,
            base_type: $base,
            white_space: WhiteSpace::$ws,
            admitted_facets: $facets,
            validator: $validator,
        }
    };
}

/// Registry of the supported built-in XSD types
pub static BUILTIN_TYPES: &[BuiltinType] = &[
    builtin!(XSD_ANY_TYPE, None, Preserve, STRING_FACETS, validate_any_type),
    builtin!(XSD_ANY_SIMPLE_TYPE, Some(XSD_ANY_TYPE), Preserve, STRING_FACETS, validate_string),
    // String family
    builtin!(XSD_STRING, Some(XSD_ANY_SIMPLE_TYPE), Preserve, STRING_FACETS, validate_string),
    builtin!("normalizedString", Some(XSD_STRING), Replace, STRING_FACETS, validate_normalized_string),
    builtin!("token", Some("normalizedString"), Collapse, STRING_FACETS, validate_token),
    builtin!("language", Some("token"), Collapse, STRING_FACETS, validate_language),
    builtin!("Name", Some("token"), Collapse, STRING_FACETS, validate_name),
    builtin!("NCName", Some("Name"), Collapse, STRING_FACETS, validate_ncname),
    builtin!(XSD_ID, Some("NCName"), Collapse, STRING_FACETS, validate_ncname),
    builtin!(XSD_IDREF, Some("NCName"), Collapse, STRING_FACETS, validate_ncname),
    builtin!("IDREFS", Some(XSD_ANY_SIMPLE_TYPE), Collapse, STRING_FACETS, validate_ncname_list),
    builtin!("ENTITY", Some("NCName"), Collapse, STRING_FACETS, validate_ncname),
    builtin!("ENTITIES", Some(XSD_ANY_SIMPLE_TYPE), Collapse, STRING_FACETS, validate_ncname_list),
    builtin!("NMTOKEN", Some("token"), Collapse, STRING_FACETS, validate_nmtoken),
    builtin!("NMTOKENS", Some(XSD_ANY_SIMPLE_TYPE), Collapse, STRING_FACETS, validate_nmtokens),
    // Boolean
    builtin!("boolean", Some(XSD_ANY_SIMPLE_TYPE), Collapse, BOOLEAN_FACETS, validate_boolean),
    // Decimal and integer family
    builtin!("decimal", Some(XSD_ANY_SIMPLE_TYPE), Collapse, DECIMAL_FACETS, validate_decimal),
    builtin!("integer", Some("decimal"), Collapse, DECIMAL_FACETS, validate_integer),
    builtin!("long", Some("integer"), Collapse, DECIMAL_FACETS, validate_long),
    builtin!("int", Some("long"), Collapse, DECIMAL_FACETS, validate_int),
    builtin!("short", Some("int"), Collapse, DECIMAL_FACETS, validate_short),
    builtin!("byte", Some("short"), Collapse, DECIMAL_FACETS, validate_byte),
    builtin!("nonNegativeInteger", Some("integer"), Collapse, DECIMAL_FACETS, validate_non_negative_integer),
    builtin!("positiveInteger", Some("nonNegativeInteger"), Collapse, DECIMAL_FACETS, validate_positive_integer),
    builtin!("unsignedLong", Some("nonNegativeInteger"), Collapse, DECIMAL_FACETS, validate_unsigned_long),
    builtin!("unsignedInt", Some("unsignedLong"), Collapse, DECIMAL_FACETS, validate_unsigned_int),
    builtin!("unsignedShort", Some("unsignedInt"), Collapse, DECIMAL_FACETS, validate_unsigned_short),
    builtin!("unsignedByte", Some("unsignedShort"), Collapse, DECIMAL_FACETS, validate_unsigned_byte),
    builtin!("nonPositiveInteger", Some("integer"), Collapse, DECIMAL_FACETS, validate_non_positive_integer),
    builtin!("negativeInteger", Some("nonPositiveInteger"), Collapse, DECIMAL_FACETS, validate_negative_integer),
    // Floating point
    builtin!("float", Some(XSD_ANY_SIMPLE_TYPE), Collapse, ORDERED_FACETS, validate_float),
    builtin!("double", Some(XSD_ANY_SIMPLE_TYPE), Collapse, ORDERED_FACETS, validate_float),
    // Date and time
    builtin!("duration", Some(XSD_ANY_SIMPLE_TYPE), Collapse, ORDERED_FACETS, validate_duration),
    builtin!("dateTime", Some(XSD_ANY_SIMPLE_TYPE), Collapse, ORDERED_FACETS, validate_datetime),
    builtin!("date", Some(XSD_ANY_SIMPLE_TYPE), Collapse, ORDERED_FACETS, validate_date),
    builtin!("time", Some(XSD_ANY_SIMPLE_TYPE), Collapse, ORDERED_FACETS, validate_time),
    builtin!("gYearMonth", Some(XSD_ANY_SIMPLE_TYPE), Collapse, ORDERED_FACETS, validate_gyear_month),
    builtin!("gYear", Some(XSD_ANY_SIMPLE_TYPE), Collapse, ORDERED_FACETS, validate_gyear),
    builtin!("gMonthDay", Some(XSD_ANY_SIMPLE_TYPE), Collapse, ORDERED_FACETS, validate_gmonth_day),
    builtin!("gDay", Some(XSD_ANY_SIMPLE_TYPE), Collapse, ORDERED_FACETS, validate_gday),
    builtin!("gMonth", Some(XSD_ANY_SIMPLE_TYPE), Collapse, ORDERED_FACETS, validate_gmonth),
    // Binary
    builtin!("hexBinary", Some(XSD_ANY_SIMPLE_TYPE), Collapse, STRING_FACETS, validate_hex_binary),
    builtin!("base64Binary", Some(XSD_ANY_SIMPLE_TYPE), Collapse, STRING_FACETS, validate_base64_binary),
    // Other
    builtin!("anyURI", Some(XSD_ANY_SIMPLE_TYPE), Collapse, STRING_FACETS, validate_any_uri),
    builtin!(XSD_QNAME, Some(XSD_ANY_SIMPLE_TYPE), Collapse, STRING_FACETS, validate_qname),
    builtin!("NOTATION", Some(XSD_ANY_SIMPLE_TYPE), Collapse, STRING_FACETS, validate_qname),
];

/// Get a built-in type by name
pub fn get_builtin_type(name: &str) -> Option<&'static BuiltinType> {
    BUILTIN_TYPES.iter().find(|t| t.name == name)
}

/// Validate a value against a built-in type by name
pub fn validate_builtin(type_name: &str, value: &str) -> Result<XsdValue> {
    match get_builtin_type(type_name) {
        Some(builtin) => builtin.validate(value),
        None => Err(Error::Value(format!("Unknown built-in type: {}", type_name))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_types() {
        assert!(validate_builtin(XSD_STRING, "Hello World").is_ok());
        assert!(validate_builtin("token", "  collapsed   to one  ").is_ok());
        assert!(validate_builtin("NCName", "a:b").is_err());
        assert!(validate_builtin("language", "en-US").is_ok());
        assert!(validate_builtin("language", "english-language").is_ok());
        assert!(validate_builtin("language", "toolongsubtag").is_err());
        assert!(validate_builtin("language", "en_US").is_err());
        assert!(validate_builtin("NMTOKENS", "a b c").is_ok());
        assert!(validate_builtin("IDREFS", "").is_err());
    }

    #[test]
    fn test_boolean_type() {
        assert_eq!(validate_builtin("boolean", " 1 ").unwrap(), XsdValue::Boolean(true));
        assert_eq!(validate_builtin("boolean", "false").unwrap(), XsdValue::Boolean(false));
        assert!(validate_builtin("boolean", "yes").is_err());
    }

    #[test]
    fn test_integer_family() {
        assert_eq!(validate_builtin("integer", "+42").unwrap(), XsdValue::Decimal(Decimal::from(42)));
        assert!(validate_builtin("integer", "abc").is_err());
        assert!(validate_builtin("integer", "1.5").is_err());
        assert!(validate_builtin("byte", "127").is_ok());
        assert!(validate_builtin("byte", "128").is_err());
        assert!(validate_builtin("unsignedLong", "18446744073709551615").is_ok());
        assert!(validate_builtin("positiveInteger", "0").is_err());
        assert!(validate_builtin("negativeInteger", "-1").is_ok());
    }

    #[test]
    fn test_decimal_lexical_forms() {
        assert_eq!(validate_builtin("decimal", "1.").unwrap(), XsdValue::Decimal(Decimal::ONE));
        assert_eq!(
            validate_builtin("decimal", "-.5").unwrap(),
            XsdValue::Decimal(Decimal::new(-5, 1))
        );
        assert!(validate_builtin("decimal", "1e3").is_err());
    }

    #[test]
    fn test_float_types() {
        assert_eq!(validate_builtin("double", "1e3").unwrap(), XsdValue::Float(1000.0));
        assert!(matches!(validate_builtin("float", "NaN").unwrap(), XsdValue::Float(v) if v.is_nan()));
        assert!(validate_builtin("float", "inf").is_err());
    }

    #[test]
    fn test_binary_types() {
        assert_eq!(validate_builtin("hexBinary", "0FB7").unwrap(), XsdValue::Binary(vec![0x0F, 0xB7]));
        assert!(validate_builtin("hexBinary", "0FB").is_err());
        assert_eq!(validate_builtin("base64Binary", "aGVs bG8=").unwrap(), XsdValue::Binary(b"hello".to_vec()));
        assert!(validate_builtin("base64Binary", "!!").is_err());
    }

    #[test]
    fn test_datetime_types() {
        assert!(validate_builtin("date", "2024-02-29").is_ok());
        assert!(validate_builtin("date", "2023-02-29").is_err());
        assert!(validate_builtin("time", "23:59:59.5Z").is_ok());
        assert!(validate_builtin("dateTime", "2024-01-01T24:00:00").is_ok());
        assert!(validate_builtin("dateTime", "2024-01-01 10:00:00").is_err());
        assert!(validate_builtin("gMonth", "--13").is_err());
        assert!(validate_builtin("duration", "P1Y2M3DT4H").is_ok());
        assert!(validate_builtin("duration", "P").is_err());
        assert!(validate_builtin("duration", "P1DT").is_err());
    }

    #[test]
    fn test_datetime_timezones_compare_in_utc() {
        let a = validate_builtin("dateTime", "2024-01-01T12:00:00+02:00").unwrap();
        let b = validate_builtin("dateTime", "2024-01-01T10:00:00Z").unwrap();
        assert_eq!(a.compare(&b), Some(Ordering::Equal));
    }

    #[test]
    fn test_uri_and_qname() {
        assert!(validate_builtin("anyURI", "http://example.com/a?b=c").is_ok());
        assert!(validate_builtin("anyURI", "../relative/path").is_ok());
        assert_eq!(
            validate_builtin(XSD_QNAME, "xs:string").unwrap(),
            XsdValue::QName(Some("xs".to_string()), "string".to_string())
        );
        assert!(validate_builtin(XSD_QNAME, "a:b:c").is_err());
    }

    #[test]
    fn test_registry() {
        let int = get_builtin_type("int").unwrap();
        assert!(int.derives_from("decimal"));
        assert!(!int.derives_from(XSD_STRING));
        assert!(int.admits(XSD_TOTAL_DIGITS));
        assert!(!get_builtin_type("boolean").unwrap().admits(XSD_ENUMERATION));
        assert!(get_builtin_type(XSD_ID).unwrap().derives_from("NCName"));
        assert!(validate_builtin("notAType", "x").is_err());
    }

    #[test]
    fn test_error_carries_instance() {
        match validate_builtin("integer", "abc") {
            Err(Error::Validation(e)) => assert_eq!(e.instance.as_deref(), Some("abc")),
            other => panic!("unexpected {:?}", other),
        }
    }
}
