use crate::{Error, Result};
use chrono::{
    DateTime, TimeZone,
    format::{Item, StrftimeItems},
};
use core::fmt;

/// A compiled date pattern used to stamp IDs and detect day rollover.
///
/// Two spellings are accepted:
///
/// - Field patterns in the familiar `yyyyMMdd` style. Supported fields are
///   `yyyy`, `yy`, `MM`, `dd`, `HH`, `mm`, `ss` and `SSS`. Any non-letter
///   character is copied through literally, and text wrapped in single quotes
///   is literal as well (`''` is a quote).
/// - Raw `strftime` patterns, recognized by the presence of a `%`.
///
/// The empty pattern is valid and stamps nothing, which turns the sequence
/// into a single never-resetting counter.
///
/// # Example
///
/// ```
/// use chrono::DateTime;
/// use seqid::DatePattern;
///
/// let now = DateTime::parse_from_rfc3339("2025-06-17T08:05:09+00:00").unwrap();
/// assert_eq!(DatePattern::parse("yyyyMMdd").unwrap().stamp(&now), "20250617");
/// assert_eq!(DatePattern::parse("yy-MM-dd'T'HH").unwrap().stamp(&now), "25-06-17T08");
/// assert_eq!(DatePattern::parse("%Y%j").unwrap().stamp(&now), "2025168");
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct DatePattern {
    source: String,
    strftime: String,
}

impl DatePattern {
    /// Compiles `pattern`, rejecting unknown fields.
    pub fn parse(pattern: &str) -> Result<Self> {
        let strftime = if pattern.contains('%') {
            pattern.to_owned()
        } else {
            translate_fields(pattern)?
        };

        if StrftimeItems::new(&strftime).any(|item| matches!(item, Item::Error)) {
            return Err(invalid(pattern, "not a valid strftime pattern"));
        }

        Ok(Self {
            source: pattern.to_owned(),
            strftime,
        })
    }

    /// The pattern as it was written.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Renders `now` with this pattern.
    pub fn stamp<Tz>(&self, now: &DateTime<Tz>) -> String
    where
        Tz: TimeZone,
        Tz::Offset: fmt::Display,
    {
        if self.strftime.is_empty() {
            return String::new();
        }
        now.format(&self.strftime).to_string()
    }
}

impl fmt::Debug for DatePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DatePattern").field(&self.source).finish()
    }
}

fn invalid(pattern: &str, reason: impl Into<String>) -> Error {
    Error::InvalidDatePattern {
        pattern: pattern.to_owned(),
        reason: reason.into(),
    }
}

fn translate_fields(pattern: &str) -> Result<String> {
    let mut out = String::with_capacity(pattern.len() * 2);
    let mut chars = pattern.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\'' {
            if chars.peek() == Some(&'\'') {
                chars.next();
                out.push('\'');
                continue;
            }
            let mut closed = false;
            for quoted in chars.by_ref() {
                if quoted == '\'' {
                    closed = true;
                    break;
                }
                push_literal(&mut out, quoted);
            }
            if !closed {
                return Err(invalid(pattern, "unterminated quote"));
            }
            continue;
        }

        if !c.is_ascii_alphabetic() {
            push_literal(&mut out, c);
            continue;
        }

        let mut run = 1;
        while chars.peek() == Some(&c) {
            chars.next();
            run += 1;
        }

        let spec = match (c, run) {
            ('y', 4) => "%Y",
            ('y', 2) => "%y",
            ('M', 2) => "%m",
            ('d', 2) => "%d",
            ('H', 2) => "%H",
            ('m', 2) => "%M",
            ('s', 2) => "%S",
            ('S', 3) => "%3f",
            _ => {
                return Err(invalid(
                    pattern,
                    format!("unsupported field `{}`", c.to_string().repeat(run)),
                ));
            }
        };
        out.push_str(spec);
    }

    Ok(out)
}

fn push_literal(out: &mut String, c: char) {
    if c == '%' {
        out.push_str("%%");
    } else {
        out.push(c);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(rfc3339: &str) -> DateTime<chrono::FixedOffset> {
        DateTime::parse_from_rfc3339(rfc3339).unwrap()
    }

    #[test]
    fn field_patterns_render() {
        let now = at("2025-06-17T23:04:05.678+08:00");
        let cases = [
            ("yyyyMMdd", "20250617"),
            ("yyMMdd", "250617"),
            ("yyyy-MM-dd", "2025-06-17"),
            ("yyyyMMddHHmmss", "20250617230405"),
            ("HH:mm:ss.SSS", "23:04:05.678"),
            ("'D'yyyyMMdd", "D20250617"),
            ("yyyy''MM", "2025'06"),
        ];
        for (pattern, expected) in cases {
            assert_eq!(DatePattern::parse(pattern).unwrap().stamp(&now), expected, "{pattern}");
        }
    }

    #[test]
    fn stamp_uses_the_clock_offset() {
        let pattern = DatePattern::parse("yyyyMMdd").unwrap();
        assert_eq!(pattern.stamp(&at("2025-06-17T23:30:00+00:00")), "20250617");
        assert_eq!(pattern.stamp(&at("2025-06-18T07:30:00+08:00")), "20250618");
    }

    #[test]
    fn empty_pattern_stamps_nothing() {
        let pattern = DatePattern::parse("").unwrap();
        assert_eq!(pattern.stamp(&at("2025-06-17T00:00:00+00:00")), "");
    }

    #[test]
    fn strftime_passthrough() {
        let pattern = DatePattern::parse("%Y/%m").unwrap();
        assert_eq!(pattern.stamp(&at("2025-06-17T00:00:00+00:00")), "2025/06");
        assert_eq!(pattern.as_str(), "%Y/%m");
    }

    #[test]
    fn rejects_unknown_fields() {
        for pattern in ["yyyyMMddX", "yyy", "M", "'open", "%Q"] {
            assert!(
                matches!(DatePattern::parse(pattern), Err(Error::InvalidDatePattern { .. })),
                "{pattern} should be rejected"
            );
        }
    }
}
