//! Structured logging and field masking (spec.md §4.10).
//!
//! `MaskingLayer` is a `tracing_subscriber::Layer` that intercepts every
//! event's fields before they reach a writer, masks sensitive field names
//! and value patterns, and renders the result in one of three formats:
//! `text`, `json`, or `structured` (JSON with `@`-prefixed keys). An
//! optional ring-buffer sink lets a deployment forward log lines to a
//! custom destination instead of stdout, with `flush()` draining the
//! buffer and degrading to stderr if the destination write fails.
//!
//! The starting workspace has no layer of this shape — `tracing` events
//! there go straight to `fmt::layer()` — so this module is grounded on
//! the `tracing_subscriber::Layer` trait itself plus the masking-rule
//! content given in spec.md §4.10, not on a specific teacher file.

use crate::config::LoggingSettings;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Map, Value};
use std::collections::{HashSet, VecDeque};
use std::io::Write;
use std::sync::{Arc, Mutex};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Field names masked outright (full-length `*` replacement) regardless of
/// their value's shape. Case-insensitive.
pub const DEFAULT_SENSITIVE_FIELDS: &[&str] = &[
    "password", "token", "apikey", "authorization", "cookie", "session", "secret", "ssn",
    "credit", "cvv", "pin", "email", "phone",
];

const MASK_CHAR: char = '*';
const MAX_MASK_LEN: usize = 20;

fn bounded_mask(len: usize) -> String {
    MASK_CHAR.to_string().repeat(len.clamp(1, MAX_MASK_LEN))
}

static VALUE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        // Credit card: 13-19 digits, optionally grouped by spaces/dashes.
        Regex::new(r"\b(?:\d[ -]?){13,19}\b").unwrap(),
        // SSN: 123-45-6789.
        Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap(),
        // Email address.
        Regex::new(r"\b[[:alnum:]._%+-]+@[[:alnum:].-]+\.[[:alpha:]]{2,}\b").unwrap(),
        // Phone: loose E.164-ish match, 7-15 digits with optional separators.
        Regex::new(r"\+?\d[\d -]{6,14}\d").unwrap(),
        Regex::new(r"(?i)\bBearer\s+\S+").unwrap(),
        Regex::new(r"(?i)\bBasic\s+\S+").unwrap(),
    ]
});

/// Masks every pattern match in `input`, each match replaced independently
/// so surrounding text survives.
fn mask_patterns(input: &str) -> String {
    let mut out = input.to_string();
    for pattern in VALUE_PATTERNS.iter() {
        out = pattern
            .replace_all(&out, |caps: &regex::Captures| bounded_mask(caps[0].len()))
            .into_owned();
    }
    out
}

fn mask_value(field_name: &str, value: &str, sensitive_fields: &HashSet<String>) -> String {
    if sensitive_fields.contains(&field_name.to_ascii_lowercase()) {
        bounded_mask(value.len())
    } else {
        mask_patterns(value)
    }
}

/// Log output format (spec.md §4.10).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
    /// JSON with every top-level key prefixed by `@`.
    Structured,
}

impl LogFormat {
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "json" => Self::Json,
            "structured" => Self::Structured,
            _ => Self::Text,
        }
    }
}

/// Picks the active format. `logging.structured` in config is a simple
/// bool (text vs. JSON); `LOG_FORMAT` is an escape hatch for operators who
/// want the `@`-prefixed `structured` variant specifically, since the
/// config schema in spec.md §6 has no third value for this field.
pub fn resolve_format(settings: &LoggingSettings) -> LogFormat {
    if let Ok(explicit) = std::env::var("LOG_FORMAT") {
        return LogFormat::parse(&explicit);
    }
    if settings.structured {
        LogFormat::Json
    } else {
        LogFormat::Text
    }
}

/// One masked, rendered log entry. Fields mirror spec.md §4.10's list:
/// `timestamp, level, message, requestId?, correlationId?, component?,
/// metadata?, error?`.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: String,
    pub message: String,
    pub request_id: Option<String>,
    pub correlation_id: Option<String>,
    pub component: Option<String>,
    pub metadata: Map<String, Value>,
    pub error: Option<String>,
}

impl LogEntry {
    fn to_json(&self, at_prefixed: bool) -> Value {
        let key = |k: &str| if at_prefixed { format!("@{k}") } else { k.to_string() };
        let mut map = Map::new();
        map.insert(key("timestamp"), json!(self.timestamp.to_rfc3339()));
        map.insert(key("level"), json!(self.level));
        map.insert(key("message"), json!(self.message));
        if let Some(v) = &self.request_id {
            map.insert(key("requestId"), json!(v));
        }
        if let Some(v) = &self.correlation_id {
            map.insert(key("correlationId"), json!(v));
        }
        if let Some(v) = &self.component {
            map.insert(key("component"), json!(v));
        }
        if let Some(v) = &self.error {
            map.insert(key("error"), json!(v));
        }
        if !self.metadata.is_empty() {
            map.insert(key("metadata"), Value::Object(self.metadata.clone()));
        }
        Value::Object(map)
    }

    pub fn render(&self, format: LogFormat) -> String {
        match format {
            LogFormat::Text => {
                let mut line = format!(
                    "{} {:>5} {}",
                    self.timestamp.to_rfc3339(),
                    self.level,
                    self.message
                );
                if let Some(v) = &self.request_id {
                    line.push_str(&format!(" requestId={v}"));
                }
                if let Some(v) = &self.correlation_id {
                    line.push_str(&format!(" correlationId={v}"));
                }
                if let Some(v) = &self.component {
                    line.push_str(&format!(" component={v}"));
                }
                if let Some(v) = &self.error {
                    line.push_str(&format!(" error={v}"));
                }
                for (k, v) in &self.metadata {
                    line.push_str(&format!(" {k}={v}"));
                }
                line
            }
            LogFormat::Json => self.to_json(false).to_string(),
            LogFormat::Structured => self.to_json(true).to_string(),
        }
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: Option<String>,
    request_id: Option<String>,
    correlation_id: Option<String>,
    component: Option<String>,
    error: Option<String>,
    metadata: Map<String, Value>,
}

impl FieldVisitor {
    fn record_named(&mut self, field: &Field, value: Value) {
        match field.name() {
            "message" => self.message = Some(value_to_plain_string(&value)),
            "request_id" | "requestId" => self.request_id = Some(value_to_plain_string(&value)),
            "correlation_id" | "correlationId" => {
                self.correlation_id = Some(value_to_plain_string(&value))
            }
            "component" => self.component = Some(value_to_plain_string(&value)),
            "error" => self.error = Some(value_to_plain_string(&value)),
            name => {
                self.metadata.insert(name.to_string(), value);
            }
        }
    }
}

fn value_to_plain_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl Visit for FieldVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.record_named(field, Value::String(format!("{value:?}")));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.record_named(field, Value::String(value.to_string()));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.record_named(field, Value::Bool(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.record_named(field, json!(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.record_named(field, json!(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.record_named(field, json!(value));
    }
}

fn level_label(level: &Level) -> String {
    level.to_string().to_lowercase()
}

/// Bounded ring buffer a `MaskingLayer` writes rendered lines into instead
/// of emitting them directly, when a custom sink is configured.
pub struct RingBufferSink {
    buffer: Mutex<VecDeque<String>>,
    capacity: usize,
}

impl RingBufferSink {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&self, line: String) {
        let mut buf = self.buffer.lock().expect("ring buffer mutex poisoned");
        if buf.len() >= self.capacity {
            buf.pop_front();
        }
        buf.push_back(line);
    }

    pub fn len(&self) -> usize {
        self.buffer.lock().expect("ring buffer mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drains the buffer into `writer`, returning the number of lines
    /// written. On a write failure the remaining entries are dumped to
    /// stderr with an error annotation rather than lost (spec.md §4.10's
    /// "graceful degradation" requirement).
    pub fn flush(&self, writer: &mut dyn Write) -> usize {
        let mut buf = self.buffer.lock().expect("ring buffer mutex poisoned");
        let mut flushed = 0;
        while let Some(line) = buf.pop_front() {
            match writeln!(writer, "{line}") {
                Ok(()) => flushed += 1,
                Err(e) => {
                    eprintln!("[log sink flush failed: {e}] {line}");
                    for remaining in buf.drain(..) {
                        eprintln!("{remaining}");
                    }
                    break;
                }
            }
        }
        flushed
    }
}

/// `tracing_subscriber::Layer` that masks sensitive fields and values,
/// then either prints the rendered line or pushes it into a ring buffer.
pub struct MaskingLayer {
    format: LogFormat,
    sensitive_fields: HashSet<String>,
    sink: Option<Arc<RingBufferSink>>,
}

impl MaskingLayer {
    pub fn new(format: LogFormat) -> Self {
        Self {
            format,
            sensitive_fields: DEFAULT_SENSITIVE_FIELDS.iter().map(|s| s.to_string()).collect(),
            sink: None,
        }
    }

    pub fn with_sensitive_fields(mut self, fields: impl IntoIterator<Item = String>) -> Self {
        self.sensitive_fields = fields.into_iter().map(|f| f.to_ascii_lowercase()).collect();
        self
    }

    pub fn with_ring_buffer(mut self, sink: Arc<RingBufferSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    fn mask_entry(&self, mut entry: LogEntry) -> LogEntry {
        entry.message = mask_patterns(&entry.message);
        entry.error = entry.error.map(|e| mask_patterns(&e));
        let mut masked = Map::new();
        for (k, v) in entry.metadata {
            let masked_value = match v {
                Value::String(s) => Value::String(mask_value(&k, &s, &self.sensitive_fields)),
                other => other,
            };
            masked.insert(k, masked_value);
        }
        entry.metadata = masked;
        entry
    }
}

impl<S: Subscriber> Layer<S> for MaskingLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let entry = LogEntry {
            timestamp: Utc::now(),
            level: level_label(event.metadata().level()),
            message: visitor.message.unwrap_or_default(),
            request_id: visitor.request_id,
            correlation_id: visitor.correlation_id,
            component: visitor.component.or_else(|| Some(event.metadata().target().to_string())),
            metadata: visitor.metadata,
            error: visitor.error,
        };
        let entry = self.mask_entry(entry);
        let rendered = entry.render(self.format);

        match &self.sink {
            Some(sink) => sink.push(rendered),
            None => println!("{rendered}"),
        }
    }
}

/// Builds an `EnvFilter` from a level string, collapsing the spec's
/// `fatal` level (which `tracing` has no direct counterpart for) to
/// `error`.
pub fn build_env_filter(level: &str) -> EnvFilter {
    let normalized = match level.to_ascii_lowercase().as_str() {
        "fatal" => "error".to_string(),
        other => other.to_string(),
    };
    EnvFilter::try_new(&normalized).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initializes the global `tracing` subscriber for a binary entry point.
/// `LOG_LEVEL` overrides `logging.level` when set. Call exactly once, from
/// `audit-api::main` or an `audit-cli` binary's `main`.
pub fn init(settings: &LoggingSettings, sink: Option<Arc<RingBufferSink>>) {
    let level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| settings.level.clone());
    let filter = build_env_filter(&level);
    let format = resolve_format(settings);

    let mut layer = MaskingLayer::new(format);
    if let Some(sink) = sink {
        layer = layer.with_ring_buffer(sink);
    }

    tracing_subscriber::registry().with(filter).with(layer).init();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sensitive_fields() -> HashSet<String> {
        DEFAULT_SENSITIVE_FIELDS.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn masks_sensitive_field_fully() {
        let masked = mask_value("password", "hunter2", &sensitive_fields());
        assert_eq!(masked, "*".repeat("hunter2".len()));
    }

    #[test]
    fn bounded_mask_caps_at_max_length() {
        let long_secret = "x".repeat(200);
        let masked = mask_value("token", &long_secret, &sensitive_fields());
        assert_eq!(masked.len(), MAX_MASK_LEN);
    }

    #[test]
    fn masks_email_pattern_in_free_text() {
        let masked = mask_patterns("contact me at jane.doe@example.com please");
        assert!(!masked.contains("jane.doe@example.com"));
        assert!(masked.contains("contact me at"));
    }

    #[test]
    fn masks_bearer_token_pattern() {
        let masked = mask_patterns("authorization header: Bearer abc123.def456");
        assert!(!masked.contains("abc123.def456"));
    }

    #[test]
    fn masks_credit_card_pattern() {
        let masked = mask_patterns("card on file: 4111 1111 1111 1111");
        assert!(!masked.contains("4111 1111 1111 1111"));
    }

    #[test]
    fn non_sensitive_field_passes_through_unmasked() {
        let masked = mask_value("organization_id", "org-42", &sensitive_fields());
        assert_eq!(masked, "org-42");
    }

    #[test]
    fn text_render_includes_core_fields() {
        let entry = LogEntry {
            timestamp: Utc::now(),
            level: "info".to_string(),
            message: "worker started".to_string(),
            request_id: Some("r-1".to_string()),
            correlation_id: None,
            component: Some("worker".to_string()),
            metadata: Map::new(),
            error: None,
        };
        let rendered = entry.render(LogFormat::Text);
        assert!(rendered.contains("worker started"));
        assert!(rendered.contains("requestId=r-1"));
        assert!(rendered.contains("component=worker"));
    }

    #[test]
    fn structured_render_prefixes_keys_with_at() {
        let entry = LogEntry {
            timestamp: Utc::now(),
            level: "error".to_string(),
            message: "failure".to_string(),
            request_id: None,
            correlation_id: None,
            component: None,
            metadata: Map::new(),
            error: Some("boom".to_string()),
        };
        let rendered = entry.render(LogFormat::Structured);
        let value: Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(value["@message"], json!("failure"));
        assert_eq!(value["@error"], json!("boom"));
        assert!(value.get("message").is_none());
    }

    #[test]
    fn ring_buffer_evicts_oldest_entry_past_capacity() {
        let sink = RingBufferSink::new(2);
        sink.push("a".to_string());
        sink.push("b".to_string());
        sink.push("c".to_string());
        assert_eq!(sink.len(), 2);
    }

    #[test]
    fn ring_buffer_flush_drains_and_writes() {
        let sink = RingBufferSink::new(4);
        sink.push("one".to_string());
        sink.push("two".to_string());
        let mut out = Vec::new();
        let flushed = sink.flush(&mut out);
        assert_eq!(flushed, 2);
        assert!(sink.is_empty());
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("one"));
        assert!(text.contains("two"));
    }

    #[test]
    fn fatal_level_collapses_to_error_filter() {
        let filter = build_env_filter("fatal");
        assert_eq!(filter.to_string(), "error");
    }

    #[test]
    fn log_format_parses_known_values() {
        assert_eq!(LogFormat::parse("json"), LogFormat::Json);
        assert_eq!(LogFormat::parse("structured"), LogFormat::Structured);
        assert_eq!(LogFormat::parse("anything-else"), LogFormat::Text);
    }
}
