//! Integration tests for logging system

use async_trait::async_trait;
use bridge_traits::error::Result as SinkResult;
use bridge_traits::time::{LogEntry, LogLevel, LoggerSink};
use core_runtime::logging::{
    init_logging, redact_if_sensitive, redact_url, strip_path, LogFormat, LoggingConfig,
};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct CapturingSink {
    entries: Mutex<Vec<LogEntry>>,
}

#[async_trait]
impl LoggerSink for CapturingSink {
    async fn log(&self, entry: LogEntry) -> SinkResult<()> {
        self.entries.lock().unwrap().push(entry);
        Ok(())
    }

    fn min_level(&self) -> LogLevel {
        LogLevel::Warn
    }
}

#[test]
fn test_init_forwards_to_sink_once() {
    // The global subscriber can only be installed once per process, so the
    // whole lifecycle lives in this one test.
    let sink = Arc::new(CapturingSink::default());
    let config = LoggingConfig::default()
        .with_format(LogFormat::Compact)
        .with_filter("info")
        .with_logger_sink(sink.clone());

    init_logging(config).unwrap();

    tracing::info!(key = "cdn.example.com/v/1.mp4", "Below the sink level");
    tracing::warn!(
        dir = "preload",
        total_size = 4096u64,
        "Cache bounds exceeded"
    );

    let entries = sink.entries.lock().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].level, LogLevel::Warn);
    assert_eq!(entries[0].message, "Cache bounds exceeded");
    assert_eq!(entries[0].fields.get("total_size").map(String::as_str), Some("4096"));
    drop(entries);

    let second = init_logging(LoggingConfig::default());
    assert!(second.is_err());
}

#[test]
fn test_logging_config_defaults() {
    let config = LoggingConfig::default();

    assert_eq!(config.level, LogLevel::Info);
    assert!(config.filter.is_none());
    assert!(config.logger_sink.is_none());
    assert!(!config.enable_spans);
}

#[test]
fn test_cdn_url_redaction() {
    let signed = "https://cdn.example.com/v/720.mp4?auth_key=1700000000-0-0-abc&quality=720";
    let redacted = redact_url(signed);

    assert!(redacted.starts_with("https://cdn.example.com/v/720.mp4?"));
    assert!(redacted.contains("auth_key=[REDACTED]"));
    assert!(redacted.contains("quality=720"));
    assert!(!redacted.contains("abc"));
}

#[test]
fn test_field_redaction() {
    assert_eq!(redact_if_sensitive("Authorization", "Bearer x"), "[REDACTED]");
    assert_eq!(redact_if_sensitive("api_key", "k"), "[REDACTED]");
    assert_eq!(redact_if_sensitive("business_line", "feed"), "feed");
}

#[test]
fn test_path_stripping() {
    assert_eq!(
        strip_path("/data/user/0/app/cache/preload/3f2a.cache"),
        "3f2a.cache"
    );
    assert_eq!(strip_path("D:\\cache\\index.json"), "index.json");
    assert_eq!(strip_path(""), "");
}
