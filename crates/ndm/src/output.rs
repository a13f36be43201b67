use serde::Serialize;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Format {
    Human,
    Json,
}

/// Renders command output either for people or as JSON lines for scripts.
///
/// JSON mode wraps one-shot results in an `{"ok": ..}` envelope and emits
/// stream entries as NDJSON objects carrying a `type` field, so `ndm listen
/// --json | jq` works without buffering.
pub struct Printer {
    format: Format,
}

impl Printer {
    pub fn new(json: bool) -> Self {
        Self {
            format: if json { Format::Json } else { Format::Human },
        }
    }

    /// Final value of a command.
    pub fn result<T: Serialize>(&self, value: &T) {
        println!("{}", self.render_result(value));
    }

    /// One-line status note.
    pub fn note(&self, text: &str) {
        println!("{}", self.render_note(text));
    }

    /// One entry of a long-running stream (used by `listen`).
    pub fn stream(&self, kind: &str, fields: serde_json::Value) {
        println!("{}", self.render_stream(kind, &fields));
    }

    /// Terminal failure, on stderr.
    pub fn failure(&self, message: &str) {
        match self.format {
            Format::Json => {
                eprintln!("{}", serde_json::json!({ "ok": false, "error": message }))
            }
            Format::Human => eprintln!("error: {}", message),
        }
    }

    fn render_result<T: Serialize>(&self, value: &T) -> String {
        match self.format {
            Format::Json => serde_json::json!({ "ok": true, "data": value }).to_string(),
            Format::Human => serde_json::to_string_pretty(value).unwrap_or_default(),
        }
    }

    fn render_note(&self, text: &str) -> String {
        match self.format {
            Format::Json => serde_json::json!({ "ok": true, "note": text }).to_string(),
            Format::Human => text.to_string(),
        }
    }

    fn render_stream(&self, kind: &str, fields: &serde_json::Value) -> String {
        match self.format {
            Format::Json => {
                let mut line = serde_json::json!({ "type": kind });
                if let (Some(object), Some(extra)) = (line.as_object_mut(), fields.as_object()) {
                    for (key, value) in extra {
                        object.insert(key.clone(), value.clone());
                    }
                }
                line.to_string()
            }
            Format::Human => {
                let rendered = match fields.as_object() {
                    Some(map) => map
                        .iter()
                        .map(|(key, value)| format!("{}={}", key, plain(value)))
                        .collect::<Vec<_>>()
                        .join(" "),
                    None => fields.to_string(),
                };
                format!("[{}] {}", kind, rendered)
            }
        }
    }
}

/// Strings without quotes, everything else as JSON.
fn plain(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
