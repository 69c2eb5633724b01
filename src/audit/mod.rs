pub mod engine;
pub mod extract;
pub mod gemini;
pub mod report;

pub use engine::AuditEngine;
pub use report::Severity;
