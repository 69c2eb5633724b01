pub mod metrics;

pub use metrics::{detect_libraries, extract_metrics, ContractMetrics};
