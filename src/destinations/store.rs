use super::types::{Destination, DestinationError};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const GROUP_NAME_COLUMN: &str = "group_name";

/// Ordered list of target groups kept in a one-column CSV file.
#[derive(Debug, Clone)]
pub struct DestinationStore {
    path: PathBuf,
}

impl DestinationStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the stored list. Names are trimmed, blanks dropped and
    /// duplicates collapsed onto their first occurrence.
    pub async fn save<I, S>(&self, names: I) -> Result<Vec<Destination>, DestinationError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let mut destinations = Vec::new();
        for name in names {
            let Ok(destination) = Destination::parse(name.as_ref()) else {
                continue;
            };
            if seen.insert(destination.clone()) {
                destinations.push(destination);
            }
        }

        let mut content = String::from(GROUP_NAME_COLUMN);
        content.push('\n');
        for destination in &destinations {
            content.push_str(&format_field(destination.as_str()));
            content.push('\n');
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| self.io_error(e))?;
            }
        }

        let tmp_path = self.path.with_extension("csv.tmp");
        tokio::fs::write(&tmp_path, content)
            .await
            .map_err(|e| self.io_error(e))?;
        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|e| self.io_error(e))?;

        info!(path = %self.path.display(), count = destinations.len(), "Saved groups");
        Ok(destinations)
    }

    /// Read the list in file order. A missing file is an empty list.
    pub async fn load(&self) -> Result<Vec<Destination>, DestinationError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No groups file yet");
                return Ok(Vec::new());
            }
            Err(e) => return Err(self.io_error(e)),
        };

        let mut rows = parse_rows(content.trim_start_matches('\u{feff}')).into_iter();
        let Some(header) = rows.next() else {
            return Ok(Vec::new());
        };
        let column = header
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case(GROUP_NAME_COLUMN))
            .ok_or_else(|| DestinationError::MissingColumn {
                path: self.path.display().to_string(),
            })?;

        let mut seen = HashSet::new();
        let mut destinations = Vec::new();
        for (index, row) in rows.enumerate() {
            let raw = row.get(column).map(String::as_str).unwrap_or("");
            let Ok(destination) = Destination::parse(raw) else {
                continue;
            };
            if !seen.insert(destination.clone()) {
                warn!(row = index + 2, group = %destination, "Skipping duplicate group");
                continue;
            }
            destinations.push(destination);
        }

        Ok(destinations)
    }

    fn io_error(&self, source: std::io::Error) -> DestinationError {
        DestinationError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }
}

fn format_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn parse_rows(content: &str) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    let mut row = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = content.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    field.push('"');
                    chars.next();
                }
                '"' => in_quotes = false,
                _ => field.push(c),
            }
            continue;
        }

        match c {
            '"' => in_quotes = true,
            ',' => row.push(std::mem::take(&mut field)),
            '\r' => {}
            '\n' => {
                row.push(std::mem::take(&mut field));
                rows.push(std::mem::take(&mut row));
            }
            _ => field.push(c),
        }
    }

    if !field.is_empty() || !row.is_empty() {
        row.push(field);
        rows.push(row);
    }

    rows
}
