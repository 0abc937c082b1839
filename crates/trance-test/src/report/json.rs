//! Machine-readable report

use super::{ReportDocument, ReportError};

pub(super) fn render(doc: &ReportDocument) -> Result<String, ReportError> {
    let mut json = serde_json::to_string_pretty(doc)?;
    json.push('\n');
    Ok(json)
}
