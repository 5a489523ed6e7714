use std::sync::Arc;

use crate::pipeline::{IngestPipeline, QueryPipeline};

/// 应用状态
pub struct AppState {
    /// 图片索引流水线
    pub ingest: IngestPipeline,
    /// 文本查询流水线
    pub query: QueryPipeline,
}

impl AppState {
    /// 创建新的应用状态
    pub fn new(ingest: IngestPipeline, query: QueryPipeline) -> Arc<Self> {
        Arc::new(AppState { ingest, query })
    }
}
