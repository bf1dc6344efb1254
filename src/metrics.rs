use std::sync::LazyLock;

use prometheus::{
    Histogram, IntCounter, TextEncoder, register_histogram, register_int_counter,
};

static METRIC_SEARCH_COUNT: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!("fs_search_count", "count of face searches").unwrap()
});

static METRIC_SEARCH_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    register_histogram!("fs_search_duration", "duration of the per-image search in seconds")
        .unwrap()
});

static METRIC_FACES_INDEXED: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!("fs_faces_indexed", "total faces written to the index").unwrap()
});

/// 记录一次搜索及其耗时
pub fn observe_search(duration: f32) {
    METRIC_SEARCH_COUNT.inc();
    METRIC_SEARCH_DURATION.observe(duration as f64);
}

/// 累计已写入索引的人脸数量
pub fn add_faces_indexed(n: u64) {
    METRIC_FACES_INDEXED.inc_by(n);
}

/// 导出文本格式的全部指标，供 /metrics 端点使用
pub fn gather_text() -> anyhow::Result<String> {
    Ok(TextEncoder::new().encode_to_string(&prometheus::gather())?)
}
