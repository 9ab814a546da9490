use std::{
    fmt::{self, Write},
    str::FromStr,
};

use serde::{Deserialize, Serialize};
use strum::EnumString;

use crate::{
    args::ArgValues,
    exception_private::{ExcType, RunResult},
    heap::{Heap, HeapData},
    intern::Interns,
    resource::ResourceTracker,
    types::{PyTrait, Slice, Type, iter::collect_iterable},
    value::{ReprGuard, Value},
};

/// Python string value stored on the heap.
///
/// `len()` counts Unicode code points, matching Python.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub(crate) struct Str(String);

impl Str {
    #[must_use]
    pub fn new(s: String) -> Self {
        Self(s)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `str()` / `str(x)`
    pub fn init(heap: &mut Heap<impl ResourceTracker>, args: ArgValues, interns: &Interns) -> RunResult<Value> {
        match args.get_zero_one_arg("str")? {
            None => heap.alloc_str(String::new()),
            Some(v) => {
                let s = v.py_str(heap, interns);
                heap.alloc_str(s)
            }
        }
    }
}

impl PyTrait for Str {
    fn py_type(&self) -> Type {
        Type::Str
    }

    fn py_len(&self) -> Option<usize> {
        Some(self.0.chars().count())
    }

    fn py_estimate_size(&self) -> usize {
        std::mem::size_of::<Self>() + self.0.len()
    }

    fn py_repr_fmt(
        &self,
        f: &mut impl Write,
        _heap: &Heap<impl ResourceTracker>,
        _interns: &Interns,
        _guard: &mut ReprGuard,
    ) -> fmt::Result {
        string_repr_fmt(&self.0, f)
    }

    fn py_eq(&self, other: &Self, _heap: &Heap<impl ResourceTracker>, _interns: &Interns, _depth: usize) -> RunResult<bool> {
        Ok(self.0 == other.0)
    }
}

/// Writes `s` quoted the way Python's `repr()` does: single quotes unless the string
/// contains a single quote and no double quote.
pub fn string_repr_fmt(s: &str, f: &mut impl Write) -> fmt::Result {
    let quote = if s.contains('\'') && !s.contains('"') { '"' } else { '\'' };
    f.write_char(quote)?;
    for c in s.chars() {
        match c {
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            '\t' => f.write_str("\\t")?,
            '\r' => f.write_str("\\r")?,
            c if c == quote => {
                f.write_char('\\')?;
                f.write_char(c)?;
            }
            c if (c as u32) < 0x20 || c as u32 == 0x7f => write!(f, "\\x{:02x}", c as u32)?,
            c => f.write_char(c)?,
        }
    }
    f.write_char(quote)
}

pub fn string_repr(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    // writing to a String cannot fail
    let _ = string_repr_fmt(s, &mut out);
    out
}

/// `s[key]` for an int index or a slice.
pub(crate) fn str_getitem(s: &str, key: Value, heap: &mut Heap<impl ResourceTracker>) -> RunResult<Value> {
    if let Value::Ref(id) = key
        && let HeapData::Slice(slice) = heap.get(id)
    {
        let slice: Slice = slice.clone();
        let chars: Vec<char> = s.chars().collect();
        let out: String = slice.indices(chars.len())?.into_iter().map(|i| chars[i]).collect();
        return heap.alloc_str(out);
    }
    let index = match key {
        Value::Int(i) => i,
        Value::Bool(b) => i64::from(b),
        other => return Err(ExcType::type_error_indices(Type::Str, other.py_type(heap))),
    };
    let len = s.chars().count() as i64;
    let normalized = if index < 0 { index + len } else { index };
    if normalized < 0 || normalized >= len {
        return Err(ExcType::index_error(Type::Str));
    }
    let c = s.chars().nth(normalized as usize).unwrap_or_default();
    heap.alloc_str(c.to_string())
}

/// Methods available on `str` values.
#[derive(Debug, Clone, Copy, EnumString)]
#[strum(serialize_all = "lowercase")]
enum StrMethod {
    Upper,
    Lower,
    Strip,
    Lstrip,
    Rstrip,
    Split,
    Rsplit,
    Join,
    Replace,
    Startswith,
    Endswith,
    Find,
    Rfind,
    Index,
    Count,
    Isdigit,
    Isalpha,
    Isalnum,
    Isspace,
    Isupper,
    Islower,
    Title,
    Capitalize,
    Zfill,
    Splitlines,
    Partition,
}

pub(crate) fn has_str_method(name: &str) -> bool {
    StrMethod::from_str(name).is_ok()
}

/// Calls `s.<name>(args)`.
pub(crate) fn call_str_method(
    s: &str,
    name: &str,
    args: ArgValues,
    heap: &mut Heap<impl ResourceTracker>,
    interns: &Interns,
) -> RunResult<Value> {
    let method = StrMethod::from_str(name).map_err(|_| ExcType::attribute_error(Type::Str, name))?;
    let qualified = format!("str.{name}");
    match method {
        StrMethod::Upper => {
            args.check_zero_args(&qualified)?;
            heap.alloc_str(s.to_uppercase())
        }
        StrMethod::Lower => {
            args.check_zero_args(&qualified)?;
            heap.alloc_str(s.to_lowercase())
        }
        StrMethod::Title => {
            args.check_zero_args(&qualified)?;
            heap.alloc_str(title(s))
        }
        StrMethod::Capitalize => {
            args.check_zero_args(&qualified)?;
            let mut chars = s.chars();
            let out = match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            };
            heap.alloc_str(out)
        }
        StrMethod::Strip | StrMethod::Lstrip | StrMethod::Rstrip => {
            let chars = match args.get_zero_one_arg(&qualified)? {
                None | Some(Value::None) => None,
                Some(v) => Some(str_arg(v, heap, interns, &qualified)?),
            };
            let matcher = |c: char| chars.as_ref().map_or(c.is_whitespace(), |set| set.contains(c));
            let out = match method {
                StrMethod::Strip => s.trim_matches(matcher),
                StrMethod::Lstrip => s.trim_start_matches(matcher),
                _ => s.trim_end_matches(matcher),
            };
            heap.alloc_str(out.to_owned())
        }
        StrMethod::Split | StrMethod::Rsplit => {
            let (positional, mut kwargs) = args.split();
            let mut positional = positional.into_iter();
            let sep = positional.next().or_else(|| kwargs.take("sep", interns));
            let maxsplit = positional.next().or_else(|| kwargs.take("maxsplit", interns));
            if positional.next().is_some() {
                return Err(ExcType::type_error_at_most(&qualified, 2, 3));
            }
            kwargs.finish(&qualified, interns)?;
            let sep = match sep {
                None | Some(Value::None) => None,
                Some(v) => Some(str_arg(v, heap, interns, &qualified)?),
            };
            let maxsplit = match maxsplit {
                None => -1,
                Some(v) => v.as_index(heap)?,
            };
            let parts = split(s, sep.as_deref(), maxsplit, matches!(method, StrMethod::Rsplit))?;
            alloc_str_list(parts, heap)
        }
        StrMethod::Join => {
            let iterable = args.get_one_arg(&qualified)?;
            let items = collect_iterable(iterable, heap, interns)?;
            let total = items
                .iter()
                .map(|item| item.as_str(heap, interns).map_or(0, str::len))
                .fold(s.len().saturating_mul(items.len()), usize::saturating_add);
            heap.check_size(total)?;
            let mut out = String::new();
            for (i, item) in items.iter().enumerate() {
                let Some(part) = item.as_str(heap, interns) else {
                    return Err(ExcType::type_error(format!(
                        "sequence item {i}: expected str instance, {} found",
                        item.py_type(heap)
                    )));
                };
                if i > 0 {
                    out.push_str(s);
                }
                out.push_str(part);
            }
            heap.alloc_str(out)
        }
        StrMethod::Replace => {
            let positional = args.into_positional(&qualified)?;
            let (old, new, count) = match positional.as_slice() {
                [old, new] => (*old, *new, None),
                [old, new, count] => (*old, *new, Some(*count)),
                other => return Err(ExcType::type_error_arg_count(&qualified, 2, other.len())),
            };
            let old = str_arg(old, heap, interns, &qualified)?;
            let new = str_arg(new, heap, interns, &qualified)?;
            let matches = if old.is_empty() { s.chars().count() + 1 } else { s.matches(old.as_str()).count() };
            heap.check_size(s.len().saturating_add(matches.saturating_mul(new.len())))?;
            let out = match count {
                Some(count) => {
                    let count = count.as_index(heap)?;
                    if count < 0 {
                        s.replace(&old, &new)
                    } else {
                        s.replacen(&old, &new, count as usize)
                    }
                }
                None => s.replace(&old, &new),
            };
            heap.alloc_str(out)
        }
        StrMethod::Startswith | StrMethod::Endswith => {
            let positional = args.into_positional(&qualified)?;
            let Some((&pattern, range)) = positional.split_first() else {
                return Err(ExcType::type_error_at_least(&qualified, 1, 0));
            };
            let window = window(s, range, heap, &qualified)?;
            let candidates = prefix_candidates(pattern, heap, interns, name)?;
            let found = candidates.iter().any(|p| {
                if matches!(method, StrMethod::Startswith) {
                    window.starts_with(p.as_str())
                } else {
                    window.ends_with(p.as_str())
                }
            });
            Ok(Value::Bool(found))
        }
        StrMethod::Find | StrMethod::Rfind | StrMethod::Index => {
            let positional = args.into_positional(&qualified)?;
            let Some((&sub, range)) = positional.split_first() else {
                return Err(ExcType::type_error_at_least(&qualified, 1, 0));
            };
            let sub = str_arg(sub, heap, interns, &qualified)?;
            let offset = window_start(s, range, heap)?;
            let window = window(s, range, heap, &qualified)?;
            let found = if matches!(method, StrMethod::Rfind) {
                window.rfind(sub.as_str())
            } else {
                window.find(sub.as_str())
            };
            match found {
                Some(byte_pos) => Ok(Value::Int((offset + window[..byte_pos].chars().count()) as i64)),
                None if matches!(method, StrMethod::Index) => Err(ExcType::value_error("substring not found")),
                None => Ok(Value::Int(-1)),
            }
        }
        StrMethod::Count => {
            let positional = args.into_positional(&qualified)?;
            let Some((&sub, range)) = positional.split_first() else {
                return Err(ExcType::type_error_at_least(&qualified, 1, 0));
            };
            let sub = str_arg(sub, heap, interns, &qualified)?;
            let window = window(s, range, heap, &qualified)?;
            let count = if sub.is_empty() {
                window.chars().count() + 1
            } else {
                window.matches(sub.as_str()).count()
            };
            Ok(Value::Int(count as i64))
        }
        StrMethod::Isdigit => {
            args.check_zero_args(&qualified)?;
            Ok(Value::Bool(!s.is_empty() && s.chars().all(|c| c.is_ascii_digit() || c.is_numeric())))
        }
        StrMethod::Isalpha => {
            args.check_zero_args(&qualified)?;
            Ok(Value::Bool(!s.is_empty() && s.chars().all(char::is_alphabetic)))
        }
        StrMethod::Isalnum => {
            args.check_zero_args(&qualified)?;
            Ok(Value::Bool(!s.is_empty() && s.chars().all(char::is_alphanumeric)))
        }
        StrMethod::Isspace => {
            args.check_zero_args(&qualified)?;
            Ok(Value::Bool(!s.is_empty() && s.chars().all(char::is_whitespace)))
        }
        StrMethod::Isupper => {
            args.check_zero_args(&qualified)?;
            Ok(Value::Bool(
                s.chars().any(char::is_uppercase) && !s.chars().any(char::is_lowercase),
            ))
        }
        StrMethod::Islower => {
            args.check_zero_args(&qualified)?;
            Ok(Value::Bool(
                s.chars().any(char::is_lowercase) && !s.chars().any(char::is_uppercase),
            ))
        }
        StrMethod::Zfill => {
            let width = args.get_one_arg(&qualified)?.as_index(heap)?;
            let len = s.chars().count() as i64;
            if width <= len {
                return heap.alloc_str(s.to_owned());
            }
            heap.check_size(usize::try_from(width).unwrap_or(usize::MAX))?;
            let zeros = "0".repeat((width - len) as usize);
            let out = match s.strip_prefix(['+', '-']) {
                Some(rest) => format!("{}{zeros}{rest}", &s[..1]),
                None => format!("{zeros}{s}"),
            };
            heap.alloc_str(out)
        }
        StrMethod::Splitlines => {
            let (positional, mut kwargs) = args.split();
            let keepends = positional.first().copied().or_else(|| kwargs.take("keepends", interns));
            kwargs.finish(&qualified, interns)?;
            let keepends = keepends.is_some_and(|v| v.py_bool(heap, interns));
            alloc_str_list(splitlines(s, keepends), heap)
        }
        StrMethod::Partition => {
            let sep = str_arg(args.get_one_arg(&qualified)?, heap, interns, &qualified)?;
            if sep.is_empty() {
                return Err(ExcType::value_error("empty separator"));
            }
            let (before, mid, after) = match s.find(sep.as_str()) {
                Some(pos) => (&s[..pos], sep.as_str(), &s[pos + sep.len()..]),
                None => (s, "", ""),
            };
            let items = vec![
                heap.alloc_str(before.to_owned())?,
                heap.alloc_str(mid.to_owned())?,
                heap.alloc_str(after.to_owned())?,
            ];
            heap.alloc_tuple(items)
        }
    }
}

fn str_arg(value: Value, heap: &Heap<impl ResourceTracker>, interns: &Interns, method: &str) -> RunResult<String> {
    value.as_str(heap, interns).map(str::to_owned).ok_or_else(|| {
        ExcType::type_error(format!(
            "{method}() argument must be str, not {}",
            value.py_type(heap)
        ))
    })
}

/// Accepts a string or a tuple of strings, as `startswith` does.
fn prefix_candidates(
    value: Value,
    heap: &Heap<impl ResourceTracker>,
    interns: &Interns,
    method: &str,
) -> RunResult<Vec<String>> {
    if let Some(s) = value.as_str(heap, interns) {
        return Ok(vec![s.to_owned()]);
    }
    let error = || {
        ExcType::type_error(format!(
            "{method} first arg must be str or a tuple of str, not {}",
            value.py_type(heap)
        ))
    };
    let Value::Ref(id) = value else { return Err(error()) };
    let HeapData::Tuple(tuple) = heap.get(id) else { return Err(error()) };
    tuple
        .as_slice()
        .iter()
        .map(|item| item.as_str(heap, interns).map(str::to_owned).ok_or_else(error))
        .collect()
}

/// Char offset selected by an optional `start` argument.
fn window_start(s: &str, range: &[Value], heap: &Heap<impl ResourceTracker>) -> RunResult<usize> {
    let len = s.chars().count() as i64;
    match range.first() {
        None | Some(Value::None) => Ok(0),
        Some(v) => Ok(clamp_index(v.as_index(heap)?, len) as usize),
    }
}

/// The part of `s` between optional `start` and `end` char indices.
fn window<'a>(s: &'a str, range: &[Value], heap: &Heap<impl ResourceTracker>, method: &str) -> RunResult<&'a str> {
    if range.len() > 2 {
        return Err(ExcType::type_error_at_most(method, 3, range.len() + 1));
    }
    let len = s.chars().count() as i64;
    let start = window_start(s, range, heap)?;
    let end = match range.get(1) {
        None | Some(Value::None) => len as usize,
        Some(v) => clamp_index(v.as_index(heap)?, len) as usize,
    };
    if end <= start {
        return Ok("");
    }
    Ok(char_slice(s, start, end))
}

fn clamp_index(index: i64, len: i64) -> i64 {
    if index < 0 { (index + len).max(0) } else { index.min(len) }
}

fn char_slice(s: &str, start: usize, end: usize) -> &str {
    let byte = |n: usize| s.char_indices().nth(n).map_or(s.len(), |(i, _)| i);
    &s[byte(start)..byte(end)]
}

fn title(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_cased = false;
    for c in s.chars() {
        if prev_cased {
            out.extend(c.to_lowercase());
        } else {
            out.extend(c.to_uppercase());
        }
        prev_cased = c.is_alphabetic();
    }
    out
}

fn split(s: &str, sep: Option<&str>, maxsplit: i64, from_right: bool) -> RunResult<Vec<String>> {
    let limit = usize::try_from(maxsplit).ok();
    let Some(sep) = sep else {
        return Ok(split_whitespace(s, limit, from_right));
    };
    if sep.is_empty() {
        return Err(ExcType::value_error("empty separator"));
    }
    let parts: Vec<String> = match (limit, from_right) {
        (None, _) => s.split(sep).map(str::to_owned).collect(),
        (Some(n), false) => s.splitn(n + 1, sep).map(str::to_owned).collect(),
        (Some(n), true) => {
            let mut parts: Vec<String> = s.rsplitn(n + 1, sep).map(str::to_owned).collect();
            parts.reverse();
            parts
        }
    };
    Ok(parts)
}

/// Splits on runs of whitespace; after `limit` splits the remainder is kept as is.
fn split_whitespace(s: &str, limit: Option<usize>, from_right: bool) -> Vec<String> {
    if from_right {
        let reversed: String = s.chars().rev().collect();
        let mut parts = split_whitespace(&reversed, limit, false);
        parts.reverse();
        return parts.into_iter().map(|p| p.chars().rev().collect()).collect();
    }
    let mut parts = Vec::new();
    let mut rest = s.trim_start();
    while !rest.is_empty() {
        if limit.is_some_and(|n| parts.len() >= n) {
            parts.push(rest.to_owned());
            break;
        }
        match rest.find(char::is_whitespace) {
            Some(end) => {
                parts.push(rest[..end].to_owned());
                rest = rest[end..].trim_start();
            }
            None => {
                parts.push(rest.to_owned());
                break;
            }
        }
    }
    parts
}

fn splitlines(s: &str, keepends: bool) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        let is_break = matches!(
            c,
            '\n' | '\r' | '\x0b' | '\x0c' | '\x1c' | '\x1d' | '\x1e' | '\u{85}' | '\u{2028}' | '\u{2029}'
        );
        if !is_break {
            current.push(c);
            continue;
        }
        if keepends {
            current.push(c);
        }
        if c == '\r' && chars.peek() == Some(&'\n') {
            chars.next();
            if keepends {
                current.push('\n');
            }
        }
        lines.push(std::mem::take(&mut current));
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

fn alloc_str_list(parts: Vec<String>, heap: &mut Heap<impl ResourceTracker>) -> RunResult<Value> {
    let items = parts
        .into_iter()
        .map(|p| heap.alloc_str(p))
        .collect::<RunResult<Vec<_>>>()?;
    heap.alloc_list(items)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repr_quoting() {
        assert_eq!(string_repr("abc"), "'abc'");
        assert_eq!(string_repr("it's"), "\"it's\"");
        assert_eq!(string_repr("both ' and \""), "'both \\' and \"'");
        assert_eq!(string_repr("a\nb\\"), "'a\\nb\\\\'");
        assert_eq!(string_repr("\x01"), "'\\x01'");
    }

    #[test]
    fn whitespace_split_with_limits() {
        assert_eq!(split_whitespace("  a b  c ", None, false), vec!["a", "b", "c"]);
        assert_eq!(split_whitespace("a b  c ", Some(1), false), vec!["a", "b  c "]);
        assert_eq!(split_whitespace(" a b c", Some(1), true), vec![" a b", "c"]);
        assert!(split_whitespace("   ", None, false).is_empty());
    }

    #[test]
    fn separator_split() {
        assert_eq!(split("a,b,,c", Some(","), -1, false).unwrap(), vec!["a", "b", "", "c"]);
        assert_eq!(split("a,b,c", Some(","), 1, true).unwrap(), vec!["a,b", "c"]);
        assert!(split("abc", Some(""), -1, false).is_err());
    }

    #[test]
    fn lines() {
        assert_eq!(splitlines("a\nb\r\nc", false), vec!["a", "b", "c"]);
        assert_eq!(splitlines("a\nb\n", true), vec!["a\n", "b\n"]);
        assert!(splitlines("", false).is_empty());
    }

    #[test]
    fn title_case() {
        assert_eq!(title("hello wORLD 2x"), "Hello World 2X");
        assert_eq!(char_slice("héllo", 1, 3), "él");
    }
}
