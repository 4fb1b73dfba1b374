//! Dynamically-typed values bound to statement parameters and read from
//! result columns.
//!
//! Every [`Value`] can be read back as any of the fundamental representations
//! (`i32`, `i64`, `f64`, text, bytes). Conversions never fail: values that
//! have no sensible image in the target type map to that type's zero value.
//!
//! | from \ to  | `i32` / `i64`      | `f64`            | text                 | bytes              |
//! |------------|--------------------|------------------|----------------------|--------------------|
//! | null       | `0`                | `0.0`            | `""`                 | empty              |
//! | integer    | sign-extended/sat. | exact in range   | decimal              | ASCII decimal      |
//! | float      | truncated to zero  | itself           | shortest round-trip  | ASCII of the text  |
//! | text       | leading integer    | leading number   | itself               | UTF-8 bytes        |
//! | blob       | `0`                | `0.0`            | UTF-8 (lossy)        | itself             |

use std::borrow::Cow;

/// Storage type tag of a [`Value`] or a result column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ColumnType {
    /// SQL NULL.
    #[default]
    Null,
    /// 32-bit signed integer.
    Integer32,
    /// 64-bit signed integer.
    Integer64,
    /// Double-precision float.
    Float,
    /// UTF-8 text.
    Text,
    /// Binary blob.
    Blob,
}

/// A value that can be bound to a prepared statement parameter or read from
/// a result column.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// SQL NULL.
    #[default]
    Null,
    /// 32-bit signed integer.
    Integer32(i32),
    /// 64-bit signed integer.
    Integer64(i64),
    /// Double-precision float.
    Float(f64),
    /// UTF-8 text.
    Text(String),
    /// Binary blob.
    Blob(Vec<u8>),
}

impl Value {
    /// Returns the storage type tag. Reading a value through a typed accessor
    /// never changes its tag.
    #[must_use]
    pub const fn value_type(&self) -> ColumnType {
        match self {
            Self::Null => ColumnType::Null,
            Self::Integer32(_) => ColumnType::Integer32,
            Self::Integer64(_) => ColumnType::Integer64,
            Self::Float(_) => ColumnType::Float,
            Self::Text(_) => ColumnType::Text,
            Self::Blob(_) => ColumnType::Blob,
        }
    }

    /// Returns `true` for SQL NULL.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Reads the value as a 32-bit integer.
    ///
    /// Everything wider saturates at the `i32` bounds; floats are truncated
    /// toward zero first.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn as_i32(&self) -> i32 {
        match self {
            Self::Integer32(v) => *v,
            Self::Float(v) => *v as i32,
            _ => {
                let wide = self.as_i64();
                i32::try_from(wide).unwrap_or(if wide < 0 { i32::MIN } else { i32::MAX })
            }
        }
    }

    /// Reads the value as a 64-bit integer.
    ///
    /// Floats are truncated toward zero (saturating, NaN reads as `0`); text
    /// yields its leading integer prefix.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn as_i64(&self) -> i64 {
        match self {
            Self::Null | Self::Blob(_) => 0,
            Self::Integer32(v) => i64::from(*v),
            Self::Integer64(v) => *v,
            Self::Float(v) => *v as i64,
            Self::Text(v) => parse_integer_prefix(v),
        }
    }

    /// Reads the value as a double.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> f64 {
        match self {
            Self::Null | Self::Blob(_) => 0.0,
            Self::Integer32(v) => f64::from(*v),
            Self::Integer64(v) => *v as f64,
            Self::Float(v) => *v,
            Self::Text(v) => parse_float_prefix(v),
        }
    }

    /// Reads the value as text.
    #[must_use]
    pub fn as_text(&self) -> Cow<'_, str> {
        match self {
            Self::Null => Cow::Borrowed(""),
            Self::Integer32(v) => Cow::Owned(v.to_string()),
            Self::Integer64(v) => Cow::Owned(v.to_string()),
            Self::Float(v) => Cow::Owned(format_float(*v)),
            Self::Text(v) => Cow::Borrowed(v),
            Self::Blob(v) => String::from_utf8_lossy(v),
        }
    }

    /// Reads the value as bytes.
    #[must_use]
    pub fn as_blob(&self) -> Cow<'_, [u8]> {
        match self {
            Self::Null => Cow::Borrowed(&[]),
            Self::Text(v) => Cow::Borrowed(v.as_bytes()),
            Self::Blob(v) => Cow::Borrowed(v),
            Self::Integer32(_) | Self::Integer64(_) | Self::Float(_) => {
                Cow::Owned(self.as_text().into_owned().into_bytes())
            }
        }
    }
}

/// Renders a float so that parsing the text yields the same float.
/// Integral values keep a trailing `.0` (`3.0`, not `3`).
fn format_float(v: f64) -> String {
    format!("{v:?}")
}

/// Length of the run of ASCII digits at the start of `bytes`.
fn digit_run(bytes: &[u8]) -> usize {
    bytes.iter().take_while(|b| b.is_ascii_digit()).count()
}

/// Parses the leading `[+-]digits` of `text` after leading whitespace,
/// saturating at the `i64` bounds. No digits → `0`.
fn parse_integer_prefix(text: &str) -> i64 {
    let trimmed = text.trim_start();
    let (negative, rest) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };
    let mut acc: i64 = 0;
    for digit in rest.bytes().take_while(u8::is_ascii_digit) {
        let d = i64::from(digit - b'0');
        acc = if negative {
            acc.saturating_mul(10).saturating_sub(d)
        } else {
            acc.saturating_mul(10).saturating_add(d)
        };
    }
    acc
}

/// Parses the longest leading decimal number of `text` after leading
/// whitespace (`[+-]digits[.digits][(e|E)[+-]digits]`). Non-numeric text →
/// `0.0`. The exact spellings `inf`, `-inf` and `NaN` written by
/// [`format_float`] read back as themselves; other words do not.
fn parse_float_prefix(text: &str) -> f64 {
    let trimmed = text.trim_start();
    match trimmed.trim_end() {
        "inf" => return f64::INFINITY,
        "-inf" => return f64::NEG_INFINITY,
        "NaN" => return f64::NAN,
        _ => {}
    }
    let bytes = trimmed.as_bytes();
    let mut end = usize::from(matches!(bytes.first(), Some(b'+' | b'-')));
    let int_digits = digit_run(&bytes[end..]);
    end += int_digits;
    let mut frac_digits = 0;
    if bytes.get(end) == Some(&b'.') {
        frac_digits = digit_run(&bytes[end + 1..]);
        if int_digits + frac_digits > 0 {
            end += 1 + frac_digits;
        }
    }
    if int_digits + frac_digits == 0 {
        return 0.0;
    }
    if matches!(bytes.get(end), Some(b'e' | b'E')) {
        let mut exp_end = end + 1;
        if matches!(bytes.get(exp_end), Some(b'+' | b'-')) {
            exp_end += 1;
        }
        let exp_digits = digit_run(&bytes[exp_end.min(bytes.len())..]);
        if exp_digits > 0 {
            end = exp_end + exp_digits;
        }
    }
    trimmed[..end].parse().unwrap_or(0.0)
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Integer32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Integer64(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Integer32(i32::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Blob(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Self::Blob(v.to_vec())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl<T: Into<Self>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// Types that can be read out of a [`Value`].
///
/// Implemented for the fundamental representations, for [`Value`] itself, and
/// for `Option<T>` where NULL reads as `None`.
pub trait FromValue: Sized {
    /// Converts `value`; never fails.
    fn from_value(value: &Value) -> Self;
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Self {
        value.clone()
    }
}

impl FromValue for i32 {
    fn from_value(value: &Value) -> Self {
        value.as_i32()
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> Self {
        value.as_i64()
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Self {
        value.as_i64() != 0
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> Self {
        value.as_f64()
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Self {
        value.as_text().into_owned()
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: &Value) -> Self {
        value.as_blob().into_owned()
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Self {
        (!value.is_null()).then(|| T::from_value(value))
    }
}

/// Convenience macro for building parameter lists.
///
/// Usage: `params![1_i64, blob.as_slice(), "text", None::<i64>]`
#[macro_export]
macro_rules! params {
    ($($val:expr),* $(,)?) => {
        &[$($crate::Value::from($val)),*][..]
    };
}
