use serde::Serialize;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressLevel {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    pub level: ProgressLevel,
    pub message: String,
}

/// Optional sink for pipeline progress. Every message is mirrored to tracing,
/// subscribers receive it over an unbounded channel.
#[derive(Debug, Clone, Default)]
pub struct Progress {
    sender: Option<UnboundedSender<ProgressEvent>>,
}

impl Progress {
    pub fn silent() -> Self {
        Self { sender: None }
    }

    pub fn channel() -> (Self, UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { sender: Some(tx) }, rx)
    }

    pub fn info(&self, message: impl Into<String>) {
        self.emit(ProgressLevel::Info, message.into());
    }

    pub fn success(&self, message: impl Into<String>) {
        self.emit(ProgressLevel::Success, message.into());
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.emit(ProgressLevel::Warning, message.into());
    }

    pub fn error(&self, message: impl Into<String>) {
        self.emit(ProgressLevel::Error, message.into());
    }

    fn emit(&self, level: ProgressLevel, message: String) {
        match level {
            ProgressLevel::Info | ProgressLevel::Success => tracing::info!("{}", message),
            ProgressLevel::Warning => tracing::warn!("{}", message),
            ProgressLevel::Error => tracing::error!("{}", message),
        }

        if let Some(sender) = &self.sender {
            // A dropped receiver just means nobody is listening anymore.
            let _ = sender.send(ProgressEvent { level, message });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_progress_channel_delivers_in_order() {
        let (progress, mut rx) = Progress::channel();
        progress.info("first");
        progress.warning("second");
        drop(progress);

        let first = rx.recv().await.unwrap();
        assert_eq!(first.level, ProgressLevel::Info);
        assert_eq!(first.message, "first");
        let second = rx.recv().await.unwrap();
        assert_eq!(second.level, ProgressLevel::Warning);
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn test_silent_progress_does_not_panic() {
        let progress = Progress::silent();
        progress.error("nobody listens");
    }
}
