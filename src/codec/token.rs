//! Token-level pieces shared by the ICS-DES and differential codecs:
//! value escaping, checksum framing, value rendering and the decoder that
//! turns field tokens back into a field map.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};

use super::CodecError;
use crate::fields::{FieldId, FieldMap, FieldValue, GroupRow};
use crate::schema::{FieldDescriptor, FormSchema, SemanticType};

pub(crate) const CHECKSUM_KEY: &str = "CKSUM";
pub(crate) const REMOVAL_SENTINEL: char = '~';
pub(crate) const ROW_MARKER: char = '#';

/// Upper bound on a group's declared row count
pub(crate) const MAX_ROWS: usize = 1000;

/// Token layout on the wire
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DesLayout {
    /// One token per line
    #[default]
    Lines,
    /// All tokens on one line, separated by `|`
    Piped,
}

/// Percent-escape a value so it survives tokenization.
pub(crate) fn escape(value: &str) -> String {
    let bytes = value.as_bytes();
    let first = bytes.iter().position(|b| *b != b' ').unwrap_or(bytes.len());
    let last = bytes.iter().rposition(|b| *b != b' ').map_or(0, |i| i + 1);

    let mut out = String::with_capacity(value.len());
    for (i, &b) in bytes.iter().enumerate() {
        let edge_space = b == b' ' && (i < first || i >= last);
        let reserved = matches!(b, b'%' | b'=' | b'|');
        if edge_space || reserved || b < 0x20 || b >= 0x7f {
            out.push_str(&format!("%{:02X}", b));
        } else {
            out.push(b as char);
        }
    }
    out
}

pub(crate) fn unescape(raw: &str) -> Result<String, String> {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = raw
                .get(i + 1..i + 3)
                .ok_or_else(|| format!("truncated escape at offset {}", i))?;
            let byte = u8::from_str_radix(hex, 16)
                .map_err(|_| format!("bad escape '%{}'", hex))?;
            out.push(byte);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).map_err(|_| "escaped bytes are not UTF-8".to_string())
}

/// Byte sum modulo 256 of the tokens joined with `|`
pub(crate) fn checksum<S: AsRef<str>>(tokens: &[S]) -> u8 {
    let separators = tokens.len().saturating_sub(1);
    let mut sum = (separators as u32 % 256) * u32::from(b'|');
    for token in tokens {
        for b in token.as_ref().bytes() {
            sum = sum.wrapping_add(u32::from(b));
        }
    }
    (sum % 256) as u8
}

/// Append the checksum token and lay the tokens out.
pub(crate) fn frame(mut tokens: Vec<String>, layout: DesLayout) -> String {
    let sum = checksum(&tokens);
    tokens.push(format!("{}={:02X}", CHECKSUM_KEY, sum));
    let separator = match layout {
        DesLayout::Lines => "\n",
        DesLayout::Piped => "|",
    };
    tokens.join(separator)
}

/// Split a payload into tokens and verify its trailing checksum.
///
/// Nothing is interpreted before the checksum has been checked.
pub(crate) fn unframe(text: &str) -> Result<Vec<&str>, CodecError> {
    let mut tokens: Vec<&str> = text
        .split(|c| c == '\n' || c == '|')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect();

    let carried = tokens
        .pop()
        .and_then(|last| last.strip_prefix(CHECKSUM_KEY))
        .and_then(|rest| rest.strip_prefix('='))
        .filter(|hex| hex.len() == 2)
        .and_then(|hex| u8::from_str_radix(hex, 16).ok())
        .ok_or(CodecError::MissingChecksum)?;

    let actual = checksum(&tokens);
    if carried != actual {
        return Err(CodecError::ChecksumMismatch {
            expected: carried,
            actual,
        });
    }
    if tokens.is_empty() {
        return Err(CodecError::Malformed("payload has no header".into()));
    }
    Ok(tokens)
}

pub(crate) fn render_time(time: NaiveTime) -> String {
    if time.nanosecond() != 0 {
        time.format("%H:%M:%S%.f").to_string()
    } else if time.second() != 0 {
        time.format("%H:%M:%S").to_string()
    } else {
        time.format("%H:%M").to_string()
    }
}

/// Wire rendering of a scalar value; `None` for groups.
pub(crate) fn render(value: &FieldValue) -> Option<String> {
    let rendered = match value {
        FieldValue::Text(s) | FieldValue::Enum(s) => escape(s),
        FieldValue::Date(d) => d.format("%Y-%m-%d").to_string(),
        FieldValue::Time(t) => render_time(*t),
        FieldValue::DateTime(dt) => format!("{}T{}", dt.date().format("%Y-%m-%d"), render_time(dt.time())),
        FieldValue::Number(n) => n.to_string(),
        FieldValue::Boolean(true) => "Y".to_string(),
        FieldValue::Boolean(false) => "N".to_string(),
        FieldValue::Group(_) => return None,
    };
    Some(rendered)
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()
}

fn parse_time(raw: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(raw, "%H:%M:%S%.f")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M"))
        .ok()
}

/// Parse a wire value for `descriptor`.
pub(crate) fn parse(descriptor: &FieldDescriptor, raw: &str) -> Result<FieldValue, CodecError> {
    let invalid = |reason: &str| CodecError::InvalidValue {
        code: descriptor.short_code.clone(),
        reason: format!("'{}' {}", raw, reason),
    };

    let value = match &descriptor.semantic_type {
        SemanticType::Text => FieldValue::Text(unescape(raw).map_err(|e| invalid(e.as_str()))?),
        SemanticType::Enum { .. } => FieldValue::Enum(unescape(raw).map_err(|e| invalid(e.as_str()))?),
        SemanticType::Date => FieldValue::Date(parse_date(raw).ok_or_else(|| invalid("is not a date"))?),
        SemanticType::Time => FieldValue::Time(parse_time(raw).ok_or_else(|| invalid("is not a time"))?),
        SemanticType::DateTime => {
            let (date, time) = raw
                .split_once('T')
                .and_then(|(d, t)| Some((parse_date(d)?, parse_time(t)?)))
                .ok_or_else(|| invalid("is not a date-time"))?;
            FieldValue::DateTime(NaiveDateTime::new(date, time))
        }
        SemanticType::Number => {
            let n: f64 = raw.parse().map_err(|_| invalid("is not a number"))?;
            if !n.is_finite() {
                return Err(invalid("is not finite"));
            }
            FieldValue::Number(n)
        }
        SemanticType::Boolean => match raw {
            "Y" | "y" => FieldValue::Boolean(true),
            "N" | "n" => FieldValue::Boolean(false),
            _ => return Err(invalid("is not Y or N")),
        },
        SemanticType::Group => return Err(invalid("is a group")),
    };
    Ok(value)
}

/// Push the tokens of one top-level field: a single token for scalars, a
/// count token followed by populated cells for groups.
pub(crate) fn push_field(
    schema: &FormSchema,
    descriptor: &FieldDescriptor,
    value: &FieldValue,
    tokens: &mut Vec<String>,
) {
    if let Some(rows) = value.as_rows() {
        tokens.push(format!("{}={}", descriptor.short_code, rows.len()));
        for (index, row) in rows.iter().enumerate() {
            for column in schema.columns(&descriptor.field_id) {
                let rendered = row.get(&column.field_id).and_then(render);
                if let Some(rendered) = rendered {
                    tokens.push(format!(
                        "{}{}{}={}",
                        column.short_code,
                        ROW_MARKER,
                        index + 1,
                        rendered
                    ));
                }
            }
        }
    } else if let Some(rendered) = render(value) {
        tokens.push(format!("{}={}", descriptor.short_code, rendered));
    }
}

/// Accumulates field tokens into a field map.
pub(crate) struct FieldDecoder<'a> {
    schema: &'a FormSchema,
    allow_removals: bool,
    fields: FieldMap,
    groups: BTreeMap<FieldId, Vec<GroupRow>>,
    removed: BTreeSet<FieldId>,
    seen: BTreeSet<String>,
}

impl<'a> FieldDecoder<'a> {
    pub fn new(schema: &'a FormSchema, allow_removals: bool) -> Self {
        Self {
            schema,
            allow_removals,
            fields: FieldMap::new(),
            groups: BTreeMap::new(),
            removed: BTreeSet::new(),
            seen: BTreeSet::new(),
        }
    }

    pub fn push(&mut self, token: &str) -> Result<(), CodecError> {
        if let Some(code) = token.strip_prefix(REMOVAL_SENTINEL) {
            if !self.allow_removals {
                return Err(CodecError::Malformed(format!("removal token '{}' outside a delta", token)));
            }
            let descriptor = self.top_level(code)?;
            self.mark_seen(code)?;
            self.removed.insert(descriptor.field_id.clone());
            return Ok(());
        }

        let (key, raw) = token
            .split_once('=')
            .ok_or_else(|| CodecError::Malformed(format!("token '{}' has no value", token)))?;
        self.mark_seen(key)?;

        match key.split_once(ROW_MARKER) {
            Some((code, row)) => self.push_cell(code, row, raw),
            None => {
                let descriptor = self.top_level(key)?;
                if descriptor.is_group() {
                    let count: usize = raw
                        .parse()
                        .ok()
                        .filter(|n| *n <= MAX_ROWS)
                        .ok_or_else(|| CodecError::InvalidValue {
                            code: key.to_string(),
                            reason: format!("'{}' is not a row count", raw),
                        })?;
                    self.groups
                        .insert(descriptor.field_id.clone(), vec![GroupRow::new(); count]);
                } else {
                    let value = parse(descriptor, raw)?;
                    self.fields.insert(descriptor.field_id.clone(), value);
                }
                Ok(())
            }
        }
    }

    fn push_cell(&mut self, code: &str, row: &str, raw: &str) -> Result<(), CodecError> {
        let column = self
            .schema
            .by_short_code(code)
            .ok_or_else(|| CodecError::UnknownFieldCode(code.to_string()))?;
        let group = column
            .group
            .as_ref()
            .ok_or_else(|| CodecError::Malformed(format!("'{}' is not a group column", code)))?;
        let rows = self.groups.get_mut(group).ok_or_else(|| {
            CodecError::Malformed(format!("cell '{}{}{}' before its row count", code, ROW_MARKER, row))
        })?;
        let index = row
            .parse::<usize>()
            .ok()
            .filter(|n| (1..=rows.len()).contains(n))
            .ok_or_else(|| CodecError::Malformed(format!("row '{}' out of range for '{}'", row, code)))?;

        let value = parse(column, raw)?;
        rows[index - 1].insert(column.field_id.clone(), value);
        Ok(())
    }

    fn top_level(&self, code: &str) -> Result<&'a FieldDescriptor, CodecError> {
        let descriptor = self
            .schema
            .by_short_code(code)
            .ok_or_else(|| CodecError::UnknownFieldCode(code.to_string()))?;
        if descriptor.group.is_some() {
            return Err(CodecError::Malformed(format!("column '{}' without a row number", code)));
        }
        Ok(descriptor)
    }

    fn mark_seen(&mut self, key: &str) -> Result<(), CodecError> {
        if !self.seen.insert(key.to_string()) {
            return Err(CodecError::Malformed(format!("duplicate token '{}'", key)));
        }
        Ok(())
    }

    /// The decoded values, and the ids marked removed
    pub fn finish(mut self) -> (FieldMap, BTreeSet<FieldId>) {
        for (field_id, rows) in self.groups {
            self.fields.insert(field_id, FieldValue::Group(rows));
        }
        (self.fields, self.removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_reserved_characters() {
        assert_eq!(escape("a=b|c%d"), "a%3Db%7Cc%25d");
        assert_eq!(escape("line\nbreak\r"), "line%0Abreak%0D");
        assert_eq!(escape("  padded  "), "%20%20padded%20%20");
        assert_eq!(escape("inner space"), "inner space");
        assert_eq!(escape("   "), "%20%20%20");
        assert_eq!(escape("café"), "caf%C3%A9");
    }

    #[test]
    fn test_unescape_reverses_escape() {
        for s in ["a=b|c%d", "line\nbreak", "  padded  ", "café", "", "100%"] {
            assert_eq!(unescape(&escape(s)).unwrap(), s);
        }
        assert!(unescape("%4").is_err());
        assert!(unescape("%ZZ").is_err());
        assert!(unescape("%FF").is_err());
    }

    #[test]
    fn test_checksum_independent_of_layout() {
        let tokens = vec!["213:1:abcd1234".to_string(), "TO=Ops".to_string()];
        let lines = frame(tokens.clone(), DesLayout::Lines);
        let piped = frame(tokens, DesLayout::Piped);
        assert_eq!(lines.replace('\n', "|"), piped);
        assert_eq!(unframe(&lines).unwrap(), unframe(&piped).unwrap());
    }

    #[test]
    fn test_unframe_detects_corruption() {
        let text = frame(vec!["213:1:abcd1234".into(), "TO=Ops".into()], DesLayout::Lines);
        let corrupted = text.replace("Ops", "Opt");
        assert!(matches!(
            unframe(&corrupted),
            Err(CodecError::ChecksumMismatch { .. })
        ));
        let truncated = text.replace("CKSUM=", "CKSUM");
        assert_eq!(unframe(&truncated).unwrap_err(), CodecError::MissingChecksum);
    }

    #[test]
    fn test_unframe_ignores_blank_lines_and_carriage_returns() {
        let text = frame(vec!["213:1:abcd1234".into(), "TO=Ops".into()], DesLayout::Lines);
        let noisy = format!("\r\n{}\r\n\r\n", text.replace('\n', "\r\n"));
        assert_eq!(unframe(&noisy).unwrap(), vec!["213:1:abcd1234", "TO=Ops"]);
    }

    #[test]
    fn test_render_times() {
        let t = NaiveTime::from_hms_opt(14, 30, 0).unwrap();
        assert_eq!(render(&FieldValue::Time(t)).unwrap(), "14:30");
        let t = NaiveTime::from_hms_opt(14, 30, 5).unwrap();
        assert_eq!(render(&FieldValue::Time(t)).unwrap(), "14:30:05");

        let descriptor = FieldDescriptor::new("time", "TM", SemanticType::Time);
        assert_eq!(parse(&descriptor, "14:30:05").unwrap(), FieldValue::Time(t));
        assert!(parse(&descriptor, "2pm").is_err());
    }

    #[test]
    fn test_numbers_round_trip() {
        let descriptor = FieldDescriptor::new("freq", "RF", SemanticType::Number);
        for n in [0.0, 1.0, 146.52, -3.25, 1e-7, 123456789.125] {
            let rendered = render(&FieldValue::Number(n)).unwrap();
            assert_eq!(parse(&descriptor, &rendered).unwrap(), FieldValue::Number(n));
        }
        assert!(parse(&descriptor, "inf").is_err());
        assert!(parse(&descriptor, "NaN").is_err());
    }
}
