// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Typed configuration store backed by an INI-style file.
//!
//! Sections and keys are case-insensitive: names are normalized on insert
//! and on lookup. Values keep their raw textual form alongside the
//! inferred typed representation, so `get_string` always works.
//!
//! Value analysis order:
//! 1. Matching surrounding double quotes are stripped.
//! 2. A value that parses fully as a 64-bit signed integer is an integer.
//! 3. A value that evaluates as an arithmetic expression is a double
//!    carrying the expression result.
//! 4. A value that parses fully as a double is a double.
//! 5. Anything else stays a string.

use crate::error::ConfigError;
use crate::expr;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;

/// Longest accepted configuration line, in bytes.
const MAX_LINE_LEN: usize = 1024;

/// Typed representation of a configuration value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Plain string (after quote stripping).
    Str(String),
    /// 64-bit signed integer literal.
    Int(i64),
    /// Double literal or expression result.
    Double(f64),
}

#[derive(Debug, Clone)]
struct Entry {
    /// Section name as written in the file.
    section: String,
    /// Key name as written in the file.
    key: String,
    /// Raw textual value, quotes stripped. Never overwritten.
    raw: String,
    value: Value,
    /// Expression result, when the value parsed as an expression.
    expr: Option<f64>,
}

/// A loaded configuration file.
///
/// All accessors are thread-safe: a single handle may be shared across
/// threads. A parse error during [`ConfigFile::open`] discards the whole
/// file and no handle is returned.
pub struct ConfigFile {
    entries: Mutex<HashMap<(String, String), Entry>>,
}

impl ConfigFile {
    /// Parse `path` and build a new store.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file))
    }

    /// Parse configuration text from any buffered reader.
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self, ConfigError> {
        let mut entries = HashMap::new();
        let mut current_section = String::new();
        let mut line_no = 0usize;

        for line in reader.lines() {
            line_no += 1;
            let line = line.map_err(ConfigError::Open)?;
            if line.len() > MAX_LINE_LEN {
                return Err(ConfigError::Parse {
                    line: line_no,
                    reason: "line too long",
                });
            }

            let stripped = strip_comment(&line);
            let trimmed = stripped.trim();
            if trimmed.is_empty() {
                continue;
            }

            if let Some(rest) = trimmed.strip_prefix('[') {
                let Some(end) = rest.find(']') else {
                    return Err(ConfigError::Parse {
                        line: line_no,
                        reason: "missing ']' in section header",
                    });
                };
                current_section = rest[..end].to_string();
                continue;
            }

            let Some(eq) = trimmed.find('=') else {
                return Err(ConfigError::Parse {
                    line: line_no,
                    reason: "missing '='",
                });
            };
            let key = trimmed[..eq].trim();
            let raw_value = trimmed[eq + 1..].trim();
            if key.is_empty() || raw_value.is_empty() {
                return Err(ConfigError::Parse {
                    line: line_no,
                    reason: "empty key or value",
                });
            }

            let raw = strip_quotes(raw_value);
            let (value, expr) = analyze(&raw);
            let entry = Entry {
                section: current_section.clone(),
                key: key.to_string(),
                raw,
                value,
                expr,
            };
            // Later definitions win over earlier ones.
            entries.insert(
                (current_section.to_lowercase(), key.to_lowercase()),
                entry,
            );
        }

        Ok(Self {
            entries: Mutex::new(entries),
        })
    }

    /// Raw textual value. Works for every stored type.
    pub fn get_string(&self, section: &str, key: &str) -> Result<String, ConfigError> {
        let entries = self.entries.lock();
        let entry = find(&entries, section, key)
            .ok_or_else(|| ConfigError::no_key(section, key))?;
        Ok(entry.raw.clone())
    }

    /// Signed 64-bit integer value. Expression results truncate toward zero.
    pub fn get_int(&self, section: &str, key: &str) -> Result<i64, ConfigError> {
        let entries = self.entries.lock();
        let entry = find(&entries, section, key)
            .ok_or_else(|| ConfigError::no_key(section, key))?;
        if let Some(x) = entry.expr {
            return Ok(x as i64);
        }
        match entry.value {
            Value::Int(v) => Ok(v),
            _ => Err(ConfigError::type_mismatch(section, key)),
        }
    }

    /// Double value. Expression results are returned as-is.
    pub fn get_double(&self, section: &str, key: &str) -> Result<f64, ConfigError> {
        let entries = self.entries.lock();
        let entry = find(&entries, section, key)
            .ok_or_else(|| ConfigError::no_key(section, key))?;
        if let Some(x) = entry.expr {
            return Ok(x);
        }
        match entry.value {
            Value::Double(v) => Ok(v),
            _ => Err(ConfigError::type_mismatch(section, key)),
        }
    }

    /// Boolean value.
    ///
    /// Accepts the integers `0`/`1`, the literals `true`/`false`,
    /// `yes`/`no`, `on`/`off` (case-insensitive), and any expression
    /// result (non-zero is `true`).
    pub fn get_bool(&self, section: &str, key: &str) -> Result<bool, ConfigError> {
        let entries = self.entries.lock();
        let entry = find(&entries, section, key)
            .ok_or_else(|| ConfigError::no_key(section, key))?;
        if let Some(x) = entry.expr {
            return Ok(x != 0.0);
        }
        match &entry.value {
            Value::Int(0) => Ok(false),
            Value::Int(1) => Ok(true),
            Value::Int(_) => Err(ConfigError::out_of_range(section, key)),
            Value::Str(s) => match s.to_lowercase().as_str() {
                "true" | "yes" | "on" => Ok(true),
                "false" | "no" | "off" => Ok(false),
                _ => Err(ConfigError::type_mismatch(section, key)),
            },
            Value::Double(_) => Err(ConfigError::type_mismatch(section, key)),
        }
    }

    /// Distinct section names, in no particular order.
    pub fn get_sections(&self) -> Vec<String> {
        let entries = self.entries.lock();
        let mut seen = HashSet::new();
        let mut sections = Vec::new();
        for entry in entries.values() {
            if seen.insert(entry.section.to_lowercase()) {
                sections.push(entry.section.clone());
            }
        }
        sections
    }

    /// Distinct key names within `section`, in no particular order.
    pub fn get_keys(&self, section: &str) -> Vec<String> {
        let want = section.to_lowercase();
        let entries = self.entries.lock();
        let mut seen = HashSet::new();
        let mut keys = Vec::new();
        for entry in entries.values() {
            if entry.section.to_lowercase() == want && seen.insert(entry.key.to_lowercase()) {
                keys.push(entry.key.clone());
            }
        }
        keys
    }

    /// Render every entry with its inferred type. Debug aid.
    pub fn dump<W: Write>(&self, out: &mut W) -> io::Result<()> {
        let entries = self.entries.lock();
        writeln!(out, "---- configuration dump ----")?;
        for entry in entries.values() {
            write!(out, "[{}] {} = {}", entry.section, entry.key, entry.raw)?;
            if let Some(x) = entry.expr {
                writeln!(out, "  (expr={})", x)?;
            } else {
                match entry.value {
                    Value::Int(_) => writeln!(out, "  (int)")?,
                    Value::Double(_) => writeln!(out, "  (double)")?,
                    Value::Str(_) => writeln!(out)?,
                }
            }
        }
        Ok(())
    }

    fn narrow_signed(
        &self,
        section: &str,
        key: &str,
        min: i64,
        max: i64,
    ) -> Result<i64, ConfigError> {
        let entries = self.entries.lock();
        let entry = find(&entries, section, key)
            .ok_or_else(|| ConfigError::no_key(section, key))?;
        if let Some(x) = entry.expr {
            if x < min as f64 || x > max as f64 {
                return Err(ConfigError::out_of_range(section, key));
            }
            return Ok(x as i64);
        }
        match entry.value {
            Value::Int(v) if v >= min && v <= max => Ok(v),
            Value::Int(_) => Err(ConfigError::out_of_range(section, key)),
            _ => Err(ConfigError::type_mismatch(section, key)),
        }
    }

    fn narrow_unsigned(&self, section: &str, key: &str, max: u64) -> Result<u64, ConfigError> {
        let entries = self.entries.lock();
        let entry = find(&entries, section, key)
            .ok_or_else(|| ConfigError::no_key(section, key))?;
        if let Some(x) = entry.expr {
            if x < 0.0 || x > max as f64 {
                return Err(ConfigError::out_of_range(section, key));
            }
            return Ok(x as u64);
        }
        match entry.value {
            Value::Int(v) if v >= 0 && v as u64 <= max => Ok(v as u64),
            Value::Int(_) => Err(ConfigError::out_of_range(section, key)),
            _ => Err(ConfigError::type_mismatch(section, key)),
        }
    }
}

macro_rules! get_signed {
    ($(#[$meta:meta])* $name:ident, $ty:ty) => {
        impl ConfigFile {
            $(#[$meta])*
            pub fn $name(&self, section: &str, key: &str) -> Result<$ty, ConfigError> {
                self.narrow_signed(section, key, <$ty>::MIN as i64, <$ty>::MAX as i64)
                    .map(|v| v as $ty)
            }
        }
    };
}

macro_rules! get_unsigned {
    ($(#[$meta:meta])* $name:ident, $ty:ty) => {
        impl ConfigFile {
            $(#[$meta])*
            pub fn $name(&self, section: &str, key: &str) -> Result<$ty, ConfigError> {
                self.narrow_unsigned(section, key, <$ty>::MAX as u64)
                    .map(|v| v as $ty)
            }
        }
    };
}

get_signed!(
    /// `i8` value with range checking.
    get_int8, i8
);
get_signed!(
    /// `i16` value with range checking.
    get_int16, i16
);
get_signed!(
    /// `i32` value with range checking.
    get_int32, i32
);
get_signed!(
    /// `i64` value with range checking.
    get_int64, i64
);
get_unsigned!(
    /// `u8` value with range checking.
    get_uint8, u8
);
get_unsigned!(
    /// `u16` value with range checking.
    get_uint16, u16
);
get_unsigned!(
    /// `u32` value with range checking.
    get_uint32, u32
);
get_unsigned!(
    /// `u64` value with range checking.
    get_uint64, u64
);

fn find<'a>(
    entries: &'a HashMap<(String, String), Entry>,
    section: &str,
    key: &str,
) -> Option<&'a Entry> {
    entries.get(&(section.to_lowercase(), key.to_lowercase()))
}

/// Cut the line at the first `#` or `;` that is not inside double quotes.
fn strip_comment(line: &str) -> &str {
    let mut in_quotes = false;
    for (idx, ch) in line.char_indices() {
        match ch {
            '"' => in_quotes = !in_quotes,
            '#' | ';' if !in_quotes => return &line[..idx],
            _ => {}
        }
    }
    line
}

/// Strip one pair of matching surrounding double quotes.
fn strip_quotes(value: &str) -> String {
    let bytes = value.as_bytes();
    if bytes.len() >= 2 && bytes[0] == b'"' && bytes[bytes.len() - 1] == b'"' {
        value[1..value.len() - 1].to_string()
    } else {
        value.to_string()
    }
}

/// Infer the typed representation of a raw value.
fn analyze(raw: &str) -> (Value, Option<f64>) {
    if let Ok(v) = raw.parse::<i64>() {
        return (Value::Int(v), None);
    }
    if let Some(x) = expr::eval(raw) {
        return (Value::Double(x), Some(x));
    }
    if let Ok(d) = raw.parse::<f64>() {
        return (Value::Double(d), None);
    }
    (Value::Str(raw.to_string()), None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn load(text: &str) -> ConfigFile {
        ConfigFile::from_reader(Cursor::new(text.to_string())).expect("parse")
    }

    #[test]
    fn test_basic_types() {
        let cfg = load(
            "[network]\n\
             ip = \"127.0.0.1\"\n\
             port = 32100\n\
             backoff = 1.5e0\n\
             name = lucpd\n",
        );
        assert_eq!(cfg.get_string("network", "ip").unwrap(), "127.0.0.1");
        assert_eq!(cfg.get_int("network", "port").unwrap(), 32100);
        assert!((cfg.get_double("network", "backoff").unwrap() - 1.5).abs() < 1e-12);
        assert_eq!(cfg.get_string("network", "name").unwrap(), "lucpd");
    }

    #[test]
    fn test_case_insensitive_lookup() {
        let cfg = load("[Network]\nPort = 1\n");
        assert_eq!(cfg.get_int("network", "port").unwrap(), 1);
        assert_eq!(cfg.get_int("NETWORK", "PORT").unwrap(), 1);
    }

    #[test]
    fn test_comments_and_blanks() {
        let cfg = load(
            "# leading comment\n\
             [s]\n\
             a = 1   ; trailing\n\
             b = \"x # y\"  # quoted hash kept\n\
             \n",
        );
        assert_eq!(cfg.get_int("s", "a").unwrap(), 1);
        assert_eq!(cfg.get_string("s", "b").unwrap(), "x # y");
    }

    #[test]
    fn test_expression_values() {
        let cfg = load("[expressions]\nprop_expr = (2 + 3) * 4 - 1\n");
        assert_eq!(cfg.get_double("expressions", "prop_expr").unwrap(), 19.0);
        assert_eq!(cfg.get_int("expressions", "prop_expr").unwrap(), 19);
    }

    #[test]
    fn test_narrow_range_errors() {
        let cfg = load("[limits]\nu8_max_p1 = 256\nok = 255\nneg = -1\n");
        assert!(matches!(
            cfg.get_uint8("limits", "u8_max_p1"),
            Err(ConfigError::OutOfRange { .. })
        ));
        assert_eq!(cfg.get_uint8("limits", "ok").unwrap(), 255);
        assert!(matches!(
            cfg.get_uint8("limits", "neg"),
            Err(ConfigError::OutOfRange { .. })
        ));
        assert_eq!(cfg.get_int8("limits", "neg").unwrap(), -1);
    }

    #[test]
    fn test_int64_bit_pattern_preserved() {
        let cfg = load(&format!("[big]\nmax = {}\nmin = {}\n", i64::MAX, i64::MIN));
        assert_eq!(cfg.get_int64("big", "max").unwrap(), i64::MAX);
        assert_eq!(cfg.get_int64("big", "min").unwrap(), i64::MIN);
        assert_eq!(cfg.get_int("big", "max").unwrap(), i64::MAX);
    }

    #[test]
    fn test_bool_variants() {
        let cfg = load(
            "[b]\nt1 = 1\nt2 = true\nt3 = YES\nt4 = on\n\
             f1 = 0\nf2 = False\nf3 = no\nf4 = OFF\n\
             bad = maybe\nrange = 2\n",
        );
        for key in ["t1", "t2", "t3", "t4"] {
            assert!(cfg.get_bool("b", key).unwrap(), "{key}");
        }
        for key in ["f1", "f2", "f3", "f4"] {
            assert!(!cfg.get_bool("b", key).unwrap(), "{key}");
        }
        assert!(matches!(
            cfg.get_bool("b", "bad"),
            Err(ConfigError::TypeMismatch { .. })
        ));
        assert!(matches!(
            cfg.get_bool("b", "range"),
            Err(ConfigError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_missing_key() {
        let cfg = load("[s]\na = 1\n");
        assert!(matches!(
            cfg.get_int("s", "b"),
            Err(ConfigError::NoKey { .. })
        ));
        assert!(matches!(
            cfg.get_string("other", "a"),
            Err(ConfigError::NoKey { .. })
        ));
    }

    #[test]
    fn test_type_mismatch() {
        let cfg = load("[s]\nname = hello\nnum = 3\n");
        assert!(matches!(
            cfg.get_int("s", "name"),
            Err(ConfigError::TypeMismatch { .. })
        ));
        assert!(matches!(
            cfg.get_double("s", "num"),
            Err(ConfigError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_parse_errors_abort() {
        assert!(matches!(
            ConfigFile::from_reader(Cursor::new("[broken\n".to_string())),
            Err(ConfigError::Parse { line: 1, .. })
        ));
        assert!(matches!(
            ConfigFile::from_reader(Cursor::new("[s]\nno_equals\n".to_string())),
            Err(ConfigError::Parse { line: 2, .. })
        ));
        assert!(matches!(
            ConfigFile::from_reader(Cursor::new("[s]\nkey =\n".to_string())),
            Err(ConfigError::Parse { line: 2, .. })
        ));
        let long = format!("[s]\nk = {}\n", "x".repeat(2048));
        assert!(matches!(
            ConfigFile::from_reader(Cursor::new(long)),
            Err(ConfigError::Parse { line: 2, .. })
        ));
    }

    #[test]
    fn test_duplicate_key_last_wins() {
        let cfg = load("[s]\na = 1\na = 2\n");
        assert_eq!(cfg.get_int("s", "a").unwrap(), 2);
    }

    #[test]
    fn test_sections_and_keys() {
        let cfg = load("[one]\na = 1\nb = 2\n[two]\nc = 3\n[one]\nd = 4\n");
        let mut sections = cfg.get_sections();
        sections.sort();
        assert_eq!(sections, vec!["one", "two"]);
        let mut keys = cfg.get_keys("one");
        keys.sort();
        assert_eq!(keys, vec!["a", "b", "d"]);
        assert!(cfg.get_keys("missing").is_empty());
    }

    #[test]
    fn test_dump_renders_types() {
        let cfg = load("[s]\ni = 1\nd = 2.5\nstr = hi\ne = 1 + 1\n");
        let mut out = Vec::new();
        cfg.dump(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("(int)"));
        assert!(text.contains("(expr=2)"));
        assert!(text.contains("[s] str = hi"));
    }
}
