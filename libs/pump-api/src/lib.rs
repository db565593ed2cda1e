mod error;
mod metrics;
mod sink;
mod source;

pub use error::{ErrorKind, PumpError};
pub use metrics::{MetricsReporter, RunCounters};
pub use sink::{BatchSink, SinkFactory};
pub use source::{Message, MessageSource, SourceFactory, Subscription};

// ════════════════════════════════════════════════════════════════
//  Record
// ════════════════════════════════════════════════════════════════

/// Одна запись, распарсенная из payload сообщения: field name → value.
///
/// Непрозрачна для pump'а: схема не проверяется, sink получает
/// объект как есть.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Распарсить payload сообщения в Record.
///
/// Payload обязан быть JSON-объектом; всё остальное (невалидный JSON,
/// массив, скаляр) — `ErrorKind::Format`.
pub fn parse_record(raw: &[u8]) -> Result<Record, PumpError> {
    serde_json::from_slice::<Record>(raw).map_err(|e| {
        PumpError::format_err(format!(
            "payload {:?}: {e}",
            String::from_utf8_lossy(&raw[..raw.len().min(64)])
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_json_object() {
        let rec = parse_record(br#"{"id":1,"name":"a","tags":["x"]}"#).unwrap();
        assert_eq!(rec.len(), 3);
        assert_eq!(rec["id"], serde_json::json!(1));
    }

    #[test]
    fn rejects_non_object_payloads() {
        for raw in [&b"not json"[..], b"[1,2]", b"42", b""] {
            let err = parse_record(raw).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Format);
        }
    }

    #[test]
    fn error_displays_message_only() {
        let err = PumpError::io("connection reset");
        assert_eq!(err.to_string(), "connection reset");
        assert_eq!(err.kind().to_string(), "io");
    }
}
