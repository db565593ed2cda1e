use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::{PumpError, Record};

/// Фабрика batch sink'а: dataset + table → подключённый sink.
pub trait SinkFactory: Send + Sync {
    fn open(
        &self,
        dataset_id: &str,
        table_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Arc<dyn BatchSink>, PumpError>> + Send + '_>>;
}

/// Колоночное хранилище, принимающее батчи записей.
///
/// Один вызов `flush` = одна запись батча целиком. Частичный успех
/// не поддерживается: любая ошибка означает, что батч не записан.
pub trait BatchSink: Send + Sync {
    fn flush(&self, records: &[Record]) -> Pin<Box<dyn Future<Output = Result<(), PumpError>> + Send + '_>>;
}
