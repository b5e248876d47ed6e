//! First-sighting sinks: greeting text and identity badge documents.

use chrono::{Local, Utc};
use rollcall_core::{DocumentWriter, Greeter, SinkError};
use serde::Serialize;
use std::path::Path;

/// Greeting from a fixed template; `{name}` is replaced by the identity.
pub struct TemplateGreeter {
    template: String,
}

impl TemplateGreeter {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }
}

impl Greeter for TemplateGreeter {
    fn greet(&self, identity: &str) -> Result<String, SinkError> {
        if !self.template.contains("{name}") {
            return Err(SinkError::Failed(format!(
                "greeting template has no {{name}} placeholder: {:?}",
                self.template
            )));
        }
        Ok(self.template.replace("{name}", identity))
    }
}

#[derive(Serialize)]
struct Badge<'a> {
    name: &'a str,
    event: &'a str,
    date: String,
    issued_at: String,
}

/// Writes a JSON identity badge per recorded identity.
pub struct JsonBadgeWriter;

impl DocumentWriter for JsonBadgeWriter {
    fn write(&self, identity: &str, event_label: &str, output_path: &Path) -> Result<(), SinkError> {
        if let Some(parent) = output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let badge = Badge {
            name: identity,
            event: event_label,
            date: Local::now().format("%Y-%m-%d").to_string(),
            issued_at: Utc::now().to_rfc3339(),
        };
        let json = serde_json::to_vec_pretty(&badge)
            .map_err(|e| SinkError::Failed(format!("badge encode: {e}")))?;
        std::fs::write(output_path, json)?;
        Ok(())
    }
}
