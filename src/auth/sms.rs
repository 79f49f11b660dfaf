use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;

// [business] Delivery of one-time codes. Gateway integration lives behind this trait.
#[async_trait]
pub trait SmsSender: Send + Sync {
    async fn send(&self, phone: &str, code: &str) -> Result<()>;
}

// [business] Records the delivery in the log without the code itself.
#[derive(Debug, Default)]
pub struct LogSmsSender;

#[async_trait]
impl SmsSender for LogSmsSender {
    async fn send(&self, phone: &str, _code: &str) -> Result<()> {
        tracing::info!(phone = %mask_phone(phone), "verification code dispatched");
        Ok(())
    }
}

// [business] Keeps every sent message in memory; tests read codes back from it.
#[derive(Debug, Default)]
pub struct RecordingSmsSender {
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingSmsSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_code_for(&self, phone: &str) -> Option<String> {
        self.sent
            .lock()
            .iter()
            .rev()
            .find(|(to, _)| to == phone)
            .map(|(_, code)| code.clone())
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }
}

#[async_trait]
impl SmsSender for RecordingSmsSender {
    async fn send(&self, phone: &str, code: &str) -> Result<()> {
        self.sent.lock().push((phone.to_string(), code.to_string()));
        Ok(())
    }
}

// [business] `+15550100` -> `*****0100`
pub fn mask_phone(phone: &str) -> String {
    let chars: Vec<char> = phone.chars().collect();
    let keep = chars.len().min(4);
    let masked = chars.len() - keep;
    "*".repeat(masked) + &chars[masked..].iter().collect::<String>()
}
