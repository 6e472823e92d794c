//! Demo caption playback
//!
//! Feeds the caption store with canned conference phrases, typed out word by
//! word like live recognition, so the whole pipeline can be exercised without
//! credentials or a microphone.

use crate::store::{CaptionStore, ConnectionStatus};
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;

const SAMPLE_PHRASES: [&str; 12] = [
    "Welcome to Experts Live, the premier IT conference in the Netherlands.",
    "Today we will be discussing the latest trends in cloud computing and AI.",
    "Azure OpenAI Service enables developers to build intelligent applications.",
    "Infrastructure as Code with Bicep simplifies Azure resource deployment.",
    "Zero Trust security architecture is essential for modern enterprises.",
    "GitHub Copilot is transforming how developers write and review code.",
    "Kubernetes and containerization continue to drive DevOps transformation.",
    "Microsoft Entra ID provides comprehensive identity and access management.",
    "Observability with Azure Monitor gives full-stack visibility into your applications.",
    "Power Platform enables citizen developers to build business solutions.",
    "The shift to hybrid work has accelerated digital transformation initiatives.",
    "Let us now take a look at a live demonstration of these technologies.",
];

/// Simulated caption source for demos and manual testing.
pub struct DemoPlayback {
    store: Arc<CaptionStore>,
    running: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl DemoPlayback {
    pub fn new(store: Arc<CaptionStore>) -> Self {
        Self {
            store,
            running: Arc::new(AtomicBool::new(false)),
            task: Mutex::new(None),
        }
    }

    /// Start playback from the first phrase. No-op when already running.
    pub fn start(&self) {
        let mut task = self.lock_task();
        if task.is_some() {
            return;
        }
        info!("Demo playback starting");
        self.running.store(true, Ordering::SeqCst);
        *task = Some(tokio::spawn(run_demo(
            self.store.clone(),
            self.running.clone(),
        )));
    }

    /// Stop playback, clear the partial text and publish `disconnected`.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(task) = self.lock_task().take() {
            task.abort();
            self.store.set_partial("");
            self.store.set_status(ConnectionStatus::Disconnected, "");
            info!("Demo playback stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn lock_task(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        match self.task.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Drop for DemoPlayback {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_demo(store: Arc<CaptionStore>, running: Arc<AtomicBool>) {
    store.set_status(ConnectionStatus::Connected, "");
    let mut phrase_index = 0usize;

    while running.load(Ordering::SeqCst) {
        let phrase = SAMPLE_PHRASES[phrase_index % SAMPLE_PHRASES.len()];
        phrase_index += 1;
        simulate_phrase(&store, &running, phrase).await;
        if !running.load(Ordering::SeqCst) {
            break;
        }
        let pause = rand::thread_rng().gen_range(1500..2500);
        tokio::time::sleep(Duration::from_millis(pause)).await;
    }
}

/// Type the phrase out word by word as partial text, then finalize it.
async fn simulate_phrase(store: &CaptionStore, running: &AtomicBool, text: &str) {
    tokio::time::sleep(Duration::from_millis(200)).await;
    let words: Vec<&str> = text.split(' ').collect();
    for word_count in 1..words.len() {
        if !running.load(Ordering::SeqCst) {
            return;
        }
        store.set_partial(&words[..word_count].join(" "));
        let delay = rand::thread_rng().gen_range(80..200);
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }
    if running.load(Ordering::SeqCst) {
        store.add_final_line(text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn playback_produces_partials_then_final_lines() {
        let store = Arc::new(CaptionStore::new());
        let demo = DemoPlayback::new(store.clone());
        demo.start();
        assert!(demo.is_running());

        // Paused clock auto-advances through the typing delays
        tokio::time::sleep(Duration::from_secs(30)).await;
        let state = store.snapshot();
        assert_eq!(state.connection_status, ConnectionStatus::Connected);
        assert!(!state.lines.is_empty());
        assert_eq!(state.lines[0].text, SAMPLE_PHRASES[0]);
        demo.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn stop_clears_the_partial_and_disconnects() {
        let store = Arc::new(CaptionStore::new());
        let demo = DemoPlayback::new(store.clone());
        demo.start();
        tokio::time::sleep(Duration::from_millis(700)).await;

        demo.stop();
        assert!(!demo.is_running());
        let state = store.snapshot();
        assert_eq!(state.partial_text, "");
        assert_eq!(state.connection_status, ConnectionStatus::Disconnected);

        // Idempotent
        demo.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn start_is_idempotent() {
        let store = Arc::new(CaptionStore::new());
        let demo = DemoPlayback::new(store.clone());
        demo.start();
        demo.start();
        tokio::time::sleep(Duration::from_secs(10)).await;
        demo.stop();
        // A second concurrent loop would have interleaved duplicate lines
        let state = store.snapshot();
        let firsts = state
            .lines
            .iter()
            .filter(|l| l.text == SAMPLE_PHRASES[0])
            .count();
        assert_eq!(firsts, 1);
    }
}
