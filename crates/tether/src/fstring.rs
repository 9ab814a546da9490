//! F-string parts and the format spec mini-language.
//!
//! The parser splits an f-string into [`FStringPart`]s and parses every format spec up
//! front, so an invalid spec is a syntax error and the VM never parses spec strings.

use std::str::FromStr;

use num_bigint::BigInt;
use serde::{Deserialize, Serialize};

use crate::{
    exception_private::{ExcType, RunResult},
    expressions::ExprLoc,
    heap::{Heap, HeapData},
    intern::{Interns, StringId},
    numeric::float_repr,
    resource::ResourceTracker,
    value::Value,
};

/// Conversion applied before formatting: none, `!s` or `!r`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum ConversionFlag {
    #[default]
    None,
    Str,
    Repr,
}

impl ConversionFlag {
    /// Bits 0-1 of the `FormatValue` operand.
    pub fn to_bits(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Str => 1,
            Self::Repr => 2,
        }
    }

    pub fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            1 => Self::Str,
            2 => Self::Repr,
            _ => Self::None,
        }
    }
}

/// A single part of an f-string.
///
/// `f"Hello {name!r:>10}!"` has three parts: the literal `"Hello "`, an interpolation of
/// `name` and the literal `"!"`.
#[derive(Debug, Clone)]
pub(crate) enum FStringPart {
    Literal(StringId),
    Interpolation {
        expr: Box<ExprLoc>,
        conversion: ConversionFlag,
        format_spec: Option<ParsedFormatSpec>,
    },
}

/// Format: `[[fill]align][sign][0][width][grouping][.precision][type]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct ParsedFormatSpec {
    pub fill: char,
    pub align: Option<char>,
    pub sign: Option<char>,
    pub zero_pad: bool,
    pub width: usize,
    /// `,` or `_` thousands separator.
    pub grouping: Option<char>,
    pub precision: Option<usize>,
    pub type_char: Option<char>,
}

impl Default for ParsedFormatSpec {
    fn default() -> Self {
        Self {
            fill: ' ',
            align: None,
            sign: None,
            zero_pad: false,
            width: 0,
            grouping: None,
            precision: None,
            type_char: None,
        }
    }
}

fn is_align(c: char) -> bool {
    matches!(c, '<' | '>' | '^' | '=')
}

/// Largest width or precision a format spec may ask for.
const MAX_FORMAT_WIDTH: usize = 1 << 20;

impl FromStr for ParsedFormatSpec {
    type Err = String;

    /// Fails with the spec itself on any unrecognized character.
    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let mut result = Self::default();
        let chars: Vec<char> = spec.chars().collect();
        let mut pos = 0;

        match (chars.first(), chars.get(1)) {
            (Some(&fill), Some(&align)) if is_align(align) => {
                result.fill = fill;
                result.align = Some(align);
                pos = 2;
            }
            (Some(&align), _) if is_align(align) => {
                result.align = Some(align);
                pos = 1;
            }
            _ => {}
        }
        if let Some(&sign) = chars.get(pos).filter(|c| matches!(c, '+' | '-' | ' ')) {
            result.sign = Some(sign);
            pos += 1;
        }
        if chars.get(pos) == Some(&'0') {
            result.zero_pad = true;
            pos += 1;
        }
        let digits_end = |start: usize| {
            let mut end = start;
            while chars.get(end).is_some_and(char::is_ascii_digit) {
                end += 1;
            }
            end
        };
        let end = digits_end(pos);
        if end > pos {
            let width: String = chars[pos..end].iter().collect();
            result.width = width.parse().map_err(|_| spec.to_owned())?;
            if result.width > MAX_FORMAT_WIDTH {
                return Err(spec.to_owned());
            }
            pos = end;
        }
        if let Some(&sep) = chars.get(pos).filter(|c| matches!(c, ',' | '_')) {
            result.grouping = Some(sep);
            pos += 1;
        }
        if chars.get(pos) == Some(&'.') {
            let end = digits_end(pos + 1);
            if end == pos + 1 {
                return Err(spec.to_owned());
            }
            let precision: String = chars[pos + 1..end].iter().collect();
            let precision: usize = precision.parse().map_err(|_| spec.to_owned())?;
            if precision > MAX_FORMAT_WIDTH {
                return Err(spec.to_owned());
            }
            result.precision = Some(precision);
            pos = end;
        }
        if let Some(&c) = chars.get(pos) {
            if matches!(c, 's' | 'd' | 'f' | 'F' | 'e' | 'E' | 'g' | 'G' | '%' | 'b' | 'o' | 'x' | 'X') {
                result.type_char = Some(c);
                pos += 1;
            }
        }
        if pos == chars.len() { Ok(result) } else { Err(spec.to_owned()) }
    }
}

/// Formats a value for an f-string interpolation after applying the conversion.
pub(crate) fn format_value(
    value: Value,
    conversion: ConversionFlag,
    spec: Option<&ParsedFormatSpec>,
    heap: &Heap<impl ResourceTracker>,
    interns: &Interns,
) -> RunResult<String> {
    let text = match conversion {
        ConversionFlag::Repr => Some(value.py_repr(heap, interns)),
        ConversionFlag::Str => Some(value.py_str(heap, interns)),
        ConversionFlag::None => None,
    };
    let Some(spec) = spec else {
        return Ok(text.unwrap_or_else(|| value.py_str(heap, interns)));
    };
    if let Some(text) = text {
        return format_string(&text, spec);
    }
    format_with_spec(value, spec, heap, interns)
}

/// Applies a format spec to a value, choosing the formatting by the value's type.
fn format_with_spec(
    value: Value,
    spec: &ParsedFormatSpec,
    heap: &Heap<impl ResourceTracker>,
    interns: &Interns,
) -> RunResult<String> {
    let value_type = value.py_type(heap);
    let int = match value {
        Value::Int(i) => Some(BigInt::from(i)),
        Value::Bool(b) => Some(BigInt::from(i64::from(b))),
        Value::Ref(id) => match heap.get(id) {
            HeapData::LongInt(big) => Some(big.clone()),
            _ => None,
        },
        _ => None,
    };
    if let Some(n) = int {
        return match spec.type_char {
            None | Some('d') => Ok(format_int(&n, 10, spec)),
            Some('b') => Ok(format_int(&n, 2, spec)),
            Some('o') => Ok(format_int(&n, 8, spec)),
            Some('x') => Ok(format_int(&n, 16, spec)),
            Some('X') => Ok(format_int(&n, 16, spec).to_uppercase()),
            Some(c @ ('f' | 'F' | 'e' | 'E' | 'g' | 'G' | '%')) => {
                let f = num_traits::ToPrimitive::to_f64(&n).unwrap_or(f64::INFINITY);
                Ok(format_float(f, c, spec))
            }
            Some(c) => Err(unknown_code(c, value_type)),
        };
    }
    if let Value::Float(f) = value {
        return match spec.type_char {
            None => {
                if spec.precision.is_some() {
                    Ok(format_float(f, 'g', spec))
                } else {
                    Ok(pad_number(sign_prefix(f.is_sign_negative() && !f.is_nan(), spec), &float_repr(f.abs()), spec))
                }
            }
            Some(c @ ('f' | 'F' | 'e' | 'E' | 'g' | 'G' | '%')) => Ok(format_float(f, c, spec)),
            Some(c) => Err(unknown_code(c, value_type)),
        };
    }
    match spec.type_char {
        None | Some('s') if value.as_str(heap, interns).is_some() || spec.type_char.is_none() => {
            format_string(&value.py_str(heap, interns), spec)
        }
        Some(c) => Err(unknown_code(c, value_type)),
        None => format_string(&value.py_str(heap, interns), spec),
    }
}

fn unknown_code(c: char, value_type: crate::types::Type) -> crate::exception_private::RunError {
    ExcType::value_error(format!("Unknown format code '{c}' for object of type '{value_type}'"))
}

fn format_string(value: &str, spec: &ParsedFormatSpec) -> RunResult<String> {
    if spec.align == Some('=') {
        return Err(ExcType::value_error("'=' alignment not allowed in string format specifier"));
    }
    if spec.sign.is_some() {
        return Err(ExcType::value_error("Sign not allowed in string format specifier"));
    }
    let value: String = match spec.precision {
        Some(precision) => value.chars().take(precision).collect(),
        None => value.to_owned(),
    };
    Ok(pad(&value, spec.width, spec.align.unwrap_or('<'), spec.fill))
}

fn format_int(n: &BigInt, radix: u32, spec: &ParsedFormatSpec) -> String {
    let digits = n.magnitude().to_str_radix(radix);
    let digits = match spec.grouping {
        Some(sep) => group_digits(&digits, sep, if radix == 10 { 3 } else { 4 }),
        None => digits,
    };
    pad_number(sign_prefix(n.sign() == num_bigint::Sign::Minus, spec), &digits, spec)
}

fn format_float(f: f64, type_char: char, spec: &ParsedFormatSpec) -> String {
    let precision = spec.precision.unwrap_or(6);
    let negative = f.is_sign_negative() && !f.is_nan();
    let abs = f.abs();
    let upper = type_char.is_ascii_uppercase();
    let body = if !abs.is_finite() {
        let s = if abs.is_nan() { "nan" } else { "inf" };
        if upper { s.to_uppercase() } else { s.to_owned() }
    } else {
        match type_char {
            'f' | 'F' => group_fraction(&format!("{abs:.precision$}"), spec.grouping),
            'e' | 'E' => {
                let s = fix_exponent(&format!("{abs:.precision$e}"));
                if upper { s.to_uppercase() } else { s }
            }
            '%' => format!("{}%", group_fraction(&format!("{:.precision$}", abs * 100.0), spec.grouping)),
            _ => {
                let s = format_general(abs, precision.max(1));
                if upper { s.to_uppercase() } else { s }
            }
        }
    };
    pad_number(sign_prefix(negative, spec), &body, spec)
}

/// `g` formatting: scientific when the exponent is < -4 or >= precision, trailing zeros removed.
fn format_general(abs: f64, precision: usize) -> String {
    if abs == 0.0 {
        return "0".to_owned();
    }
    let sci = format!("{:.*e}", precision - 1, abs);
    let exp: i32 = sci.split('e').nth(1).and_then(|e| e.parse().ok()).unwrap_or(0);
    if exp < -4 || exp >= i32::try_from(precision).unwrap_or(i32::MAX) {
        let (mantissa, _) = sci.split_once('e').unwrap_or((&sci, ""));
        format!("{}{}", strip_zeros(mantissa), fix_exponent(&format!("e{exp}")))
    } else {
        let decimals = usize::try_from(i32::try_from(precision).unwrap_or(i32::MAX) - 1 - exp).unwrap_or(0);
        strip_zeros(&format!("{abs:.decimals$}"))
    }
}

fn strip_zeros(s: &str) -> String {
    if !s.contains('.') {
        return s.to_owned();
    }
    s.trim_end_matches('0').trim_end_matches('.').to_owned()
}

/// Rust writes `1.5e3`, Python `1.5e+03`.
fn fix_exponent(s: &str) -> String {
    let Some((mantissa, exp)) = s.split_once('e') else {
        return s.to_owned();
    };
    let (sign, digits) = match exp.strip_prefix('-') {
        Some(digits) => ('-', digits),
        None => ('+', exp.trim_start_matches('+')),
    };
    format!("{mantissa}e{sign}{digits:0>2}")
}

fn group_digits(digits: &str, sep: char, size: usize) -> String {
    let mut out = String::with_capacity(digits.len() + digits.len() / size);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % size == 0 {
            out.push(sep);
        }
        out.push(c);
    }
    out
}

fn group_fraction(s: &str, grouping: Option<char>) -> String {
    let Some(sep) = grouping else {
        return s.to_owned();
    };
    match s.split_once('.') {
        Some((int, frac)) => format!("{}.{frac}", group_digits(int, sep, 3)),
        None => group_digits(s, sep, 3),
    }
}

fn sign_prefix(negative: bool, spec: &ParsedFormatSpec) -> &'static str {
    match (negative, spec.sign) {
        (true, _) => "-",
        (false, Some('+')) => "+",
        (false, Some(' ')) => " ",
        _ => "",
    }
}

/// Numbers are right aligned by default; `0` and `=` pad between the sign and the digits.
fn pad_number(sign: &str, digits: &str, spec: &ParsedFormatSpec) -> String {
    let align = spec.align.unwrap_or(if spec.zero_pad { '=' } else { '>' });
    if align == '=' {
        let fill = if spec.zero_pad && spec.align.is_none() { '0' } else { spec.fill };
        let len = sign.chars().count() + digits.chars().count();
        let padding: String = std::iter::repeat_n(fill, spec.width.saturating_sub(len)).collect();
        format!("{sign}{padding}{digits}")
    } else {
        pad(&format!("{sign}{digits}"), spec.width, align, spec.fill)
    }
}

fn pad(value: &str, width: usize, align: char, fill: char) -> String {
    let len = value.chars().count();
    if width <= len {
        return value.to_owned();
    }
    let padding = width - len;
    let (left, right) = match align {
        '<' => (0, padding),
        '^' => (padding / 2, padding - padding / 2),
        _ => (padding, 0),
    };
    let mut s = String::with_capacity(width);
    s.extend(std::iter::repeat_n(fill, left));
    s.push_str(value);
    s.extend(std::iter::repeat_n(fill, right));
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{intern::InternerBuilder, resource::NoLimitTracker};

    fn fmt(value: Value, spec: &str) -> String {
        let heap = Heap::new(NoLimitTracker);
        let interns = Interns::new(InternerBuilder::new(), Vec::new(), Vec::new());
        let spec: ParsedFormatSpec = spec.parse().unwrap();
        format_value(value, ConversionFlag::None, Some(&spec), &heap, &interns).unwrap()
    }

    #[test]
    fn parses_specs() {
        let spec: ParsedFormatSpec = "*^+010,.3f".parse().unwrap();
        assert_eq!(spec.fill, '*');
        assert_eq!(spec.align, Some('^'));
        assert_eq!(spec.sign, Some('+'));
        assert!(spec.zero_pad);
        assert_eq!(spec.width, 10);
        assert_eq!(spec.grouping, Some(','));
        assert_eq!(spec.precision, Some(3));
        assert_eq!(spec.type_char, Some('f'));
        assert!("10q".parse::<ParsedFormatSpec>().is_err());
        assert!(".f".parse::<ParsedFormatSpec>().is_err());
        assert!(">99999999999".parse::<ParsedFormatSpec>().is_err());
        assert!(".99999999999f".parse::<ParsedFormatSpec>().is_err());
    }

    #[test]
    fn formats_numbers() {
        assert_eq!(fmt(Value::Int(42), ">6"), "    42");
        assert_eq!(fmt(Value::Int(-42), "06"), "-00042");
        assert_eq!(fmt(Value::Int(1_234_567), ","), "1,234,567");
        assert_eq!(fmt(Value::Int(255), "x"), "ff");
        assert_eq!(fmt(Value::Float(3.14159), ".2f"), "3.14");
        assert_eq!(fmt(Value::Float(1234.5), "e"), "1.234500e+03");
        assert_eq!(fmt(Value::Float(0.5), ".1%"), "50.0%");
        assert_eq!(fmt(Value::Float(0.000_012_5), "g"), "1.25e-05");
        assert_eq!(fmt(Value::Float(2.5), ""), "2.5");
    }

    #[test]
    fn formats_strings() {
        assert_eq!(fmt(Value::None, "^8"), "  None  ");
        assert_eq!(fmt(Value::Bool(true), "<3"), "1  ");
    }
}
