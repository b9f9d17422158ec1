//! YAML document sink for synthesized resources
//!
//! Each resource becomes one YAML document followed by a `---` line. Resources
//! are rendered and written one at a time, so a failure part-way through
//! leaves the documents already written intact.

use std::io::Write;

use serde::Serialize;

use crate::{Error, Result};

/// Separator written after every document
pub const DOCUMENT_DELIMITER: &str = "---";

/// Render one resource as YAML without empty status or creation timestamp
pub fn render_document<T: Serialize>(resource: &T) -> Result<String> {
    let yaml = serde_yaml::to_string(resource)
        .map_err(|e| Error::serialization(e.to_string()))?;
    Ok(strip_empty_fields(&yaml))
}

/// Write every resource as its own document
pub fn write_documents<W: Write, T: Serialize>(out: &mut W, resources: &[T]) -> Result<()> {
    for resource in resources {
        let document = render_document(resource)?;
        out.write_all(document.as_bytes())?;
        writeln!(out, "{}", DOCUMENT_DELIMITER)?;
        out.flush()?;
    }
    Ok(())
}

fn strip_empty_fields(yaml: &str) -> String {
    yaml.lines()
        .filter(|line| *line != "status: {}" && line.trim() != "creationTimestamp: null")
        .map(|line| format!("{}\n", line))
        .collect()
}
