use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::warn;

use crate::prometheus::report_unmapped_event_type;

const BUNDLED_TABLE: &str = include_str!("../resources/event_type_map.json");
const EVENT_SUFFIX: &str = "Event";

#[derive(Error, Debug)]
pub enum RoutingTableError {
    #[error("failed to read routing table {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("routing table is not a JSON object of strings")]
    Parse(#[from] serde_json::Error),
}

/// Rewrites raw event types into their canonical, bus-facing form.
///
/// The lookup table is read-only once built and cheap to clone.
#[derive(Clone, Debug)]
pub struct EventTypeRemapper {
    table: Arc<HashMap<String, String>>,
}

impl EventTypeRemapper {
    pub fn new(table: HashMap<String, String>) -> Self {
        Self {
            table: Arc::new(table),
        }
    }

    /// The table shipped with the service in `resources/event_type_map.json`.
    pub fn bundled() -> Result<Self, RoutingTableError> {
        Self::from_json(BUNDLED_TABLE)
    }

    pub fn from_json(raw: &str) -> Result<Self, RoutingTableError> {
        let table: HashMap<String, String> = serde_json::from_str(raw)?;
        Ok(Self::new(table))
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, RoutingTableError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| RoutingTableError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw)
    }

    pub fn remap(&self, raw: &str) -> String {
        if let Some(canonical) = self.table.get(raw) {
            return canonical.clone();
        }

        let fallback = fallback_event_type(raw);
        warn!(
            event_type = raw,
            fallback = fallback.as_str(),
            "event type missing from routing table, using fallback"
        );
        report_unmapped_event_type();
        fallback
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

/// Canonical form for an event type the routing table does not know:
/// suffix it with `Event` and kebab-case the result.
pub fn fallback_event_type(raw: &str) -> String {
    if raw.ends_with(EVENT_SUFFIX) {
        kebab_case(raw)
    } else {
        kebab_case(&format!("{raw}{EVENT_SUFFIX}"))
    }
}

fn kebab_case(input: &str) -> String {
    split_words(input)
        .iter()
        .map(|word| word.to_lowercase())
        .collect::<Vec<_>>()
        .join("-")
}

/// Splits on non-alphanumerics, lower/upper transitions, letter/digit
/// transitions, and before the last capital of an acronym (`HTTPServer`).
fn split_words(input: &str) -> Vec<String> {
    let mut words = Vec::new();

    for chunk in input.split(|c: char| !c.is_alphanumeric()) {
        let chars: Vec<char> = chunk.chars().collect();
        let mut current = String::new();

        for (i, &c) in chars.iter().enumerate() {
            if i > 0 {
                let prev = chars[i - 1];
                let next = chars.get(i + 1).copied();
                let boundary = (prev.is_lowercase() && c.is_uppercase())
                    || (prev.is_alphabetic() && c.is_numeric())
                    || (prev.is_numeric() && c.is_alphabetic())
                    || (prev.is_uppercase()
                        && c.is_uppercase()
                        && next.is_some_and(char::is_lowercase));
                if boundary && !current.is_empty() {
                    words.push(std::mem::take(&mut current));
                }
            }
            current.push(c);
        }

        if !current.is_empty() {
            words.push(current);
        }
    }

    words
}
