//! Ordered INI documents: `[section]` headers followed by `key = value`
//! (or `key: value`) lines. `#` and `;` start comment lines and indented lines
//! continue the previous value. Keys are case-folded to lowercase; section
//! names are kept verbatim.

use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
#[error("line {line}: {message}")]
pub struct ParseError {
    pub line: usize,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Section {
    name: String,
    entries: Vec<(String, String)>,
}

impl Section {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        let key = key.to_lowercase();
        self.entries
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Insert or overwrite `key`, keeping the original position on overwrite.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let key = key.to_lowercase();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IniDocument {
    sections: Vec<Section>,
}

impl IniDocument {
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let mut doc = Self::default();
        let mut current: Option<usize> = None;
        let mut last_key: Option<String> = None;

        for (idx, raw) in text.lines().enumerate() {
            let line_no = idx + 1;
            let trimmed = raw.trim();

            if trimmed.is_empty() {
                last_key = None;
                continue;
            }
            if trimmed.starts_with('#') || trimmed.starts_with(';') {
                continue;
            }

            if raw.starts_with(char::is_whitespace) {
                if let (Some(section), Some(key)) = (current, last_key.as_ref()) {
                    let section = &mut doc.sections[section];
                    if let Some(entry) = section.entries.iter_mut().find(|(k, _)| k == key) {
                        entry.1.push('\n');
                        entry.1.push_str(trimmed);
                        continue;
                    }
                }
            }

            if let Some(header) = trimmed.strip_prefix('[') {
                let name = header.strip_suffix(']').ok_or_else(|| ParseError {
                    line: line_no,
                    message: format!("unterminated section header: {trimmed}"),
                })?;
                current = Some(doc.section_index_or_insert(name.trim()));
                last_key = None;
                continue;
            }

            let Some(section) = current else {
                return Err(ParseError {
                    line: line_no,
                    message: "key/value pair before any section header".to_string(),
                });
            };

            let split_at = trimmed.find(['=', ':']).ok_or_else(|| ParseError {
                line: line_no,
                message: format!("expected `key = value`, found: {trimmed}"),
            })?;
            let key = trimmed[..split_at].trim();
            if key.is_empty() {
                return Err(ParseError {
                    line: line_no,
                    message: "empty key".to_string(),
                });
            }
            let value = trimmed[split_at + 1..].trim();
            doc.sections[section].set(key, value);
            last_key = Some(key.to_lowercase());
        }

        Ok(doc)
    }

    /// Fold `other` into `self`: sections merge by name and keys from `other` win.
    pub fn merge(&mut self, other: IniDocument) {
        for section in other.sections {
            let idx = self.section_index_or_insert(&section.name);
            for (key, value) in section.entries {
                self.sections[idx].set(&key, value);
            }
        }
    }

    pub fn sections(&self) -> impl Iterator<Item = &Section> {
        self.sections.iter()
    }

    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.name == name)
    }

    pub fn section_mut(&mut self, name: &str) -> &mut Section {
        let idx = self.section_index_or_insert(name);
        &mut self.sections[idx]
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.section(section).and_then(|s| s.get(key))
    }

    /// Replace (or append) a whole section.
    pub fn set_section(&mut self, section: Section) {
        match self.sections.iter_mut().find(|s| s.name == section.name) {
            Some(existing) => *existing = section,
            None => self.sections.push(section),
        }
    }

    /// Apply `f` to every value, e.g. to expand substitution tokens.
    pub fn map_values<F>(&mut self, f: F)
    where
        F: Fn(&str) -> String,
    {
        for section in &mut self.sections {
            for entry in &mut section.entries {
                entry.1 = f(&entry.1);
            }
        }
    }

    fn section_index_or_insert(&mut self, name: &str) -> usize {
        match self.sections.iter().position(|s| s.name == name) {
            Some(idx) => idx,
            None => {
                self.sections.push(Section::new(name));
                self.sections.len() - 1
            }
        }
    }
}

impl fmt::Display for IniDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for section in &self.sections {
            writeln!(f, "[{}]", section.name)?;
            for (key, value) in &section.entries {
                let value = value.replace('\n', "\n\t");
                writeln!(f, "{key} = {value}")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
