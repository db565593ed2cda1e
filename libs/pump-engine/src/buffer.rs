use std::sync::Arc;

use tokio::sync::Mutex;

use pump_api::{BatchSink, PumpError, Record, parse_record};

/// In-memory аккумулятор записей перед отправкой в sink.
///
/// Один lock на всё время жизни буфера: append / flush / clear
/// взаимно исключают друг друга. Lock удерживается на время
/// вызова sink'а, так что flush не может гоняться с append.
pub struct BatchBuffer {
    sink: Arc<dyn BatchSink>,
    target: String,
    records: Mutex<Vec<Record>>,
}

impl BatchBuffer {
    /// `target` — имя назначения для логов (e.g. "dataset.table").
    pub fn new(sink: Arc<dyn BatchSink>, target: impl Into<String>) -> Self {
        Self {
            sink,
            target: target.into(),
            records: Mutex::new(Vec::new()),
        }
    }

    /// Распарсить payload и добавить запись. При ошибке буфер не меняется.
    pub async fn append(&self, raw: &[u8]) -> Result<(), PumpError> {
        let record = parse_record(raw).inspect_err(|e| {
            tracing::warn!(target_table = %self.target, error = %e, "error unmarshalling payload");
        })?;
        self.records.lock().await.push(record);
        Ok(())
    }

    /// Отправить все накопленные записи одним вызовом sink'а.
    ///
    /// Пустой буфер — no-op, sink не вызывается, `Ok(0)`.
    /// Буфер очищается только при успехе sink'а; при ошибке записи
    /// остаются на месте.
    pub async fn flush(&self) -> Result<usize, PumpError> {
        let mut records = self.records.lock().await;
        if records.is_empty() {
            tracing::debug!(target_table = %self.target, "nothing to insert");
            return Ok(0);
        }

        let count = records.len();
        tracing::info!(target_table = %self.target, count, "inserting records");
        self.sink.flush(&records).await.inspect_err(|e| {
            tracing::error!(target_table = %self.target, count, error = ?e, "error on put");
        })?;
        records.clear();
        Ok(count)
    }

    /// Сбросить накопленное без отправки.
    pub async fn clear(&self) {
        self.records.lock().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sink_memory::MemorySink;

    fn buffer(sink: &Arc<MemorySink>) -> BatchBuffer {
        BatchBuffer::new(sink.clone(), "ds.tbl")
    }

    #[tokio::test]
    async fn flush_empty_never_calls_sink() {
        let sink = Arc::new(MemorySink::new());
        let buf = buffer(&sink);

        assert_eq!(buf.flush().await.unwrap(), 0);
        assert_eq!(buf.flush().await.unwrap(), 0);
        assert_eq!(sink.calls(), 0);
    }

    #[tokio::test]
    async fn flush_sends_everything_and_clears() {
        let sink = Arc::new(MemorySink::new());
        let buf = buffer(&sink);

        buf.append(br#"{"n":1}"#).await.unwrap();
        buf.append(br#"{"n":2}"#).await.unwrap();
        assert_eq!(buf.len().await, 2);

        assert_eq!(buf.flush().await.unwrap(), 2);
        assert!(buf.is_empty().await);

        let batches = sink.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0][0]["n"], serde_json::json!(1));
        assert_eq!(batches[0][1]["n"], serde_json::json!(2));
    }

    #[tokio::test]
    async fn bad_payload_leaves_buffer_unchanged() {
        let sink = Arc::new(MemorySink::new());
        let buf = buffer(&sink);

        buf.append(br#"{"n":1}"#).await.unwrap();
        let err = buf.append(b"{broken").await.unwrap_err();
        assert_eq!(err.kind(), pump_api::ErrorKind::Format);
        assert_eq!(buf.len().await, 1);
    }

    #[tokio::test]
    async fn failed_flush_retains_records() {
        let sink = Arc::new(MemorySink::failing_from(0));
        let buf = buffer(&sink);

        buf.append(br#"{"n":1}"#).await.unwrap();
        buf.append(br#"{"n":2}"#).await.unwrap();

        assert!(buf.flush().await.is_err());
        assert_eq!(buf.len().await, 2);
        assert_eq!(sink.calls(), 1);
        assert!(sink.batches().is_empty());
    }

    #[tokio::test]
    async fn clear_discards_without_flush() {
        let sink = Arc::new(MemorySink::new());
        let buf = buffer(&sink);

        buf.append(br#"{"n":1}"#).await.unwrap();
        buf.clear().await;
        assert!(buf.is_empty().await);
        assert_eq!(buf.flush().await.unwrap(), 0);
        assert_eq!(sink.calls(), 0);
    }
}
