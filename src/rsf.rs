//! Readers for the keyed-line model formats.
//!
//! A `.model` file has one record per line, `<KEY> <VALUE...>`. Lines whose
//! first token equals the meta prefix carry meta information instead; their
//! second token is the meta key and the remaining tokens are the values,
//! where a value may be surrounded by `"` to protect embedded whitespace.
//! The companion `.types` file lists `Item <name> <type>` records mapping
//! option names to their declared type.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::sync::RwLock;

/// Meta-prefix token of `.model` files.
pub const META_FLAG: &str = "CORONER_SET";

/// Key → formula map of a `.model` file plus its meta entries.
///
/// Meta values can be appended after loading; appends are idempotent and
/// order-preserving, so the reader stays shareable by reference between
/// analysis workers.
#[derive(Debug, Default)]
pub struct RsfReader {
    entries: HashMap<String, String>,
    meta: RwLock<HashMap<String, Vec<String>>>,
}

impl RsfReader {
    pub fn open(path: &Path) -> std::io::Result<Self> {
        let file = File::open(path)?;
        Ok(Self::parse(BufReader::new(file)))
    }

    pub fn parse<R: Read>(reader: R) -> Self {
        let mut rsf = RsfReader::default();
        for line in BufReader::new(reader).lines() {
            let Ok(line) = line else { break };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let mut split = line.splitn(2, char::is_whitespace);
            let key = split.next().unwrap();
            let rest = split.next().unwrap_or("").trim_start();
            if key == META_FLAG {
                let mut tokens = split_quoted(rest);
                if tokens.is_empty() {
                    continue;
                }
                let meta_key = tokens.remove(0);
                for value in tokens {
                    rsf.add_meta_value(&meta_key, &value);
                }
            } else {
                rsf.entries.insert(key.to_string(), trim_quotes(rest).to_string());
            }
        }
        rsf
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn value(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Append `value` to the meta entry `key`, dropping duplicates.
    pub fn add_meta_value(&self, key: &str, value: &str) {
        if value.is_empty() {
            return;
        }
        let mut meta = self.meta.write().unwrap();
        let values = meta.entry(key.to_string()).or_default();
        if !values.iter().any(|v| v == value) {
            values.push(value.to_string());
        }
    }

    pub fn meta_value(&self, key: &str) -> Option<Vec<String>> {
        self.meta.read().unwrap().get(key).cloned()
    }
}

/// Split a value list on whitespace, keeping `"..."` groups together and
/// trimming the surrounding quotes.
pub(crate) fn split_quoted(s: &str) -> Vec<String> {
    let mut values = Vec::new();
    let mut chars = s.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c == '"' {
            chars.next();
            let mut value = String::new();
            for c in chars.by_ref() {
                if c == '"' {
                    break;
                }
                value.push(c);
            }
            values.push(value);
        } else {
            let mut value = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() {
                    break;
                }
                value.push(c);
                chars.next();
            }
            values.push(value);
        }
    }
    values
}

fn trim_quotes(s: &str) -> &str {
    let s = s.strip_prefix('"').unwrap_or(s);
    s.strip_suffix('"').unwrap_or(s)
}

/// Reader for the companion type file: only `Item <name> <type>` lines are
/// kept, everything else is skipped.
#[derive(Debug, Default)]
pub struct ItemReader {
    types: HashMap<String, String>,
}

impl ItemReader {
    pub fn open(path: &Path) -> std::io::Result<Self> {
        let file = File::open(path)?;
        Ok(Self::parse(BufReader::new(file)))
    }

    pub fn parse<R: Read>(reader: R) -> Self {
        let mut items = ItemReader::default();
        for line in BufReader::new(reader).lines() {
            let Ok(line) = line else { break };
            let mut tokens = line.split_whitespace();
            if tokens.next() != Some("Item") {
                continue;
            }
            if let (Some(name), Some(ty)) = (tokens.next(), tokens.next()) {
                items.types.insert(name.to_string(), ty.to_string());
            }
        }
        items
    }

    pub fn value(&self, key: &str) -> Option<&str> {
        self.types.get(key).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_key_value_lines() {
        let input = "CONFIG_A CONFIG_B && CONFIG_C\nCONFIG_B\n\nCONFIG_C \"CONFIG_A\"\n";
        let rsf = RsfReader::parse(input.as_bytes());
        assert_eq!(rsf.len(), 3);
        assert_eq!(rsf.value("CONFIG_A"), Some("CONFIG_B && CONFIG_C"));
        assert_eq!(rsf.value("CONFIG_B"), Some(""));
        assert_eq!(rsf.value("CONFIG_C"), Some("CONFIG_A"));
        assert_eq!(rsf.value("CONFIG_D"), None);
    }

    #[test]
    fn parses_meta_lines() {
        let input = format!(
            "{meta} ALWAYS_ON CONFIG_X CONFIG_Y\n{meta} ALWAYS_ON CONFIG_X\n{meta} REGEX \"^CONFIG_[^ ]+$\"\n",
            meta = META_FLAG
        );
        let rsf = RsfReader::parse(input.as_bytes());
        assert_eq!(
            rsf.meta_value("ALWAYS_ON"),
            Some(vec!["CONFIG_X".to_string(), "CONFIG_Y".to_string()])
        );
        assert_eq!(rsf.meta_value("REGEX"), Some(vec!["^CONFIG_[^ ]+$".to_string()]));
        assert_eq!(rsf.meta_value("MISSING"), None);
    }

    #[test]
    fn quoted_values_keep_whitespace() {
        let input = format!("{} NOTE \"two words\" plain\n", META_FLAG);
        let rsf = RsfReader::parse(input.as_bytes());
        assert_eq!(
            rsf.meta_value("NOTE"),
            Some(vec!["two words".to_string(), "plain".to_string()])
        );
    }

    #[test]
    fn meta_appends_are_idempotent() {
        let rsf = RsfReader::default();
        rsf.add_meta_value("ALWAYS_ON", "CONFIG_A");
        rsf.add_meta_value("ALWAYS_ON", "CONFIG_B");
        rsf.add_meta_value("ALWAYS_ON", "CONFIG_A");
        rsf.add_meta_value("ALWAYS_ON", "");
        assert_eq!(
            rsf.meta_value("ALWAYS_ON"),
            Some(vec!["CONFIG_A".to_string(), "CONFIG_B".to_string()])
        );
    }

    #[test]
    fn item_reader_takes_only_item_lines() {
        let input = "Item ACPI tristate\nDepends ACPI X\nItem DEBUG boolean\nItem BROKEN\n";
        let items = ItemReader::parse(input.as_bytes());
        assert_eq!(items.value("ACPI"), Some("tristate"));
        assert_eq!(items.value("DEBUG"), Some("boolean"));
        assert_eq!(items.value("BROKEN"), None);
    }
}
