use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use pump_api::{BatchSink, PumpError, Record, SinkFactory};

// ═══════════════════════════════════════════════════════════════
//  MemorySink
// ═══════════════════════════════════════════════════════════════

/// In-memory BatchSink: запоминает каждый успешный flush как отдельный батч.
///
/// Для тестов можно задать номер вызова, начиная с которого flush падает.
pub struct MemorySink {
    batches: Mutex<Vec<Vec<Record>>>,
    calls: AtomicUsize,
    fail_from: usize,
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySink {
    pub fn new() -> Self {
        Self::failing_from(usize::MAX)
    }

    /// Sink, у которого flush с номером `call` (с нуля) и все следующие
    /// возвращают ошибку.
    pub fn failing_from(call: usize) -> Self {
        Self {
            batches: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            fail_from: call,
        }
    }

    /// Успешно записанные батчи в порядке flush'ей.
    pub fn batches(&self) -> Vec<Vec<Record>> {
        self.batches.lock().map(|b| b.clone()).unwrap_or_default()
    }

    /// Размеры успешно записанных батчей.
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batches().iter().map(Vec::len).collect()
    }

    /// Количество вызовов flush (включая неуспешные).
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Acquire)
    }
}

impl BatchSink for MemorySink {
    fn flush(&self, records: &[Record]) -> Pin<Box<dyn Future<Output = Result<(), PumpError>> + Send + '_>> {
        let records = records.to_vec();
        Box::pin(async move {
            let call = self.calls.fetch_add(1, Ordering::AcqRel);
            if call >= self.fail_from {
                return Err(PumpError::io(format!("memory sink: flush #{call} rejected")));
            }
            self.batches
                .lock()
                .map_err(|_| PumpError::io("memory sink poisoned"))?
                .push(records);
            Ok(())
        })
    }
}

// ═══════════════════════════════════════════════════════════════
//  MemorySinkFactory
// ═══════════════════════════════════════════════════════════════

/// SinkFactory, отдающий один и тот же MemorySink на любой dataset.table.
pub struct MemorySinkFactory {
    sink: Option<Arc<MemorySink>>,
    opened: Mutex<Vec<String>>,
}

impl MemorySinkFactory {
    pub fn new(sink: Arc<MemorySink>) -> Self {
        Self {
            sink: Some(sink),
            opened: Mutex::new(Vec::new()),
        }
    }

    /// Фабрика, у которой open всегда падает.
    pub fn unavailable() -> Self {
        Self {
            sink: None,
            opened: Mutex::new(Vec::new()),
        }
    }

    /// Открытые назначения в виде "dataset.table".
    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().map(|o| o.clone()).unwrap_or_default()
    }
}

impl SinkFactory for MemorySinkFactory {
    fn open(
        &self,
        dataset_id: &str,
        table_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Arc<dyn BatchSink>, PumpError>> + Send + '_>> {
        let target = format!("{dataset_id}.{table_id}");
        Box::pin(async move {
            let sink = self
                .sink
                .clone()
                .ok_or_else(|| PumpError::io(format!("memory sink {target} unavailable")))?;
            if let Ok(mut opened) = self.opened.lock() {
                opened.push(target);
            }
            Ok(sink as Arc<dyn BatchSink>)
        })
    }
}
