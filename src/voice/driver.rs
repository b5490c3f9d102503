// driver.rs — Runs a `VoiceListener` on tokio.
//
// One task owns the state machine. Commands and recognition events arrive
// on a channel and are handled strictly in arrival order; restart delays
// are tokio timers that post back into the same channel.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::listener::{
    ListenerEffect, RecognitionError, RecognitionEvent, RetryPolicy, VoiceListener,
    VoiceNotification,
};

/// The platform speech engine (continuous, interim results enabled).
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    /// Begin a recognition session. Lifecycle events are reported back
    /// through `ListenerHandle::feed`.
    async fn start(&self) -> Result<(), RecognitionError>;

    /// End the current session, best effort.
    async fn stop(&self);
}

#[derive(Debug)]
enum Command {
    Start,
    Stop,
    SetAgentName(String),
    SetPolicy(RetryPolicy),
    Event(RecognitionEvent),
    RestartElapsed(u64),
}

/// Cheap, cloneable control handle for a running listener.
#[derive(Clone)]
pub struct ListenerHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl ListenerHandle {
    pub fn start(&self) -> bool {
        self.tx.send(Command::Start).is_ok()
    }

    pub fn stop(&self) -> bool {
        self.tx.send(Command::Stop).is_ok()
    }

    pub fn set_agent_name(&self, name: impl Into<String>) -> bool {
        self.tx.send(Command::SetAgentName(name.into())).is_ok()
    }

    pub fn set_retry_policy(&self, policy: RetryPolicy) -> bool {
        self.tx.send(Command::SetPolicy(policy)).is_ok()
    }

    /// Forward a recognition lifecycle event from the platform.
    pub fn feed(&self, event: RecognitionEvent) -> bool {
        self.tx.send(Command::Event(event)).is_ok()
    }
}

/// Spawn the listener task. It runs until every `ListenerHandle` is
/// dropped. Notifications are delivered on the returned receiver.
pub fn spawn_listener(
    listener: VoiceListener,
    recognizer: Arc<dyn SpeechRecognizer>,
) -> (
    ListenerHandle,
    mpsc::UnboundedReceiver<VoiceNotification>,
    JoinHandle<()>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let (notify_tx, notify_rx) = mpsc::unbounded_channel();
    // Timers hold a weak sender so they never keep the task alive.
    let timer_tx = tx.downgrade();

    let task = tokio::spawn(run(listener, recognizer, rx, timer_tx, notify_tx));
    (ListenerHandle { tx }, notify_rx, task)
}

async fn run(
    mut listener: VoiceListener,
    recognizer: Arc<dyn SpeechRecognizer>,
    mut rx: mpsc::UnboundedReceiver<Command>,
    timer_tx: mpsc::WeakUnboundedSender<Command>,
    notify_tx: mpsc::UnboundedSender<VoiceNotification>,
) {
    log::info!("Voice listener task started");

    while let Some(command) = rx.recv().await {
        let mut queue: VecDeque<ListenerEffect> = match command {
            Command::Start => listener.start(),
            Command::Stop => listener.stop(),
            Command::SetAgentName(name) => {
                listener.set_agent_name(&name);
                Vec::new()
            }
            Command::SetPolicy(policy) => {
                listener.set_policy(policy);
                Vec::new()
            }
            Command::Event(event) => listener.on_event(event),
            Command::RestartElapsed(ticket) => listener.restart_elapsed(ticket),
        }
        .into();

        while let Some(effect) = queue.pop_front() {
            match effect {
                ListenerEffect::StartRecognition => {
                    if let Err(e) = recognizer.start().await {
                        // A failed start is handled like any recognition error.
                        log::warn!("Voice: recognizer failed to start: {}", e);
                        queue.extend(listener.on_event(RecognitionEvent::Error { error: e }));
                    }
                }
                ListenerEffect::StopRecognition => recognizer.stop().await,
                ListenerEffect::ScheduleRestart { delay, ticket, .. } => {
                    let timer_tx = timer_tx.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        if let Some(tx) = timer_tx.upgrade() {
                            let _ = tx.send(Command::RestartElapsed(ticket));
                        }
                    });
                }
                ListenerEffect::Notify(notification) => {
                    let _ = notify_tx.send(notification);
                }
            }
        }
    }

    // Handles are gone; make sure the microphone is released.
    for effect in listener.stop() {
        if effect == ListenerEffect::StopRecognition {
            recognizer.stop().await;
        }
    }
    log::info!("Voice listener task ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::listener::ListenerStatus;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct CountingRecognizer {
        starts: AtomicUsize,
        stops: AtomicUsize,
    }

    #[async_trait]
    impl SpeechRecognizer for CountingRecognizer {
        async fn start(&self) -> Result<(), RecognitionError> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn stop(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn start_and_stop_reach_recognizer() {
        let rec = Arc::new(CountingRecognizer::default());
        let (handle, mut notes, _task) = spawn_listener(VoiceListener::default(), rec.clone());

        handle.start();
        handle.feed(RecognitionEvent::Started);
        settle().await;
        assert_eq!(rec.starts.load(Ordering::SeqCst), 1);
        assert_eq!(
            notes.recv().await,
            Some(VoiceNotification::Status(ListenerStatus::Listening))
        );

        handle.stop();
        settle().await;
        assert_eq!(rec.stops.load(Ordering::SeqCst), 1);
        assert_eq!(
            notes.recv().await,
            Some(VoiceNotification::Status(ListenerStatus::Stopped))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn end_event_restarts_after_delay() {
        let rec = Arc::new(CountingRecognizer::default());
        let (handle, _notes, _task) = spawn_listener(VoiceListener::default(), rec.clone());

        handle.start();
        handle.feed(RecognitionEvent::Started);
        handle.feed(RecognitionEvent::Ended);
        settle().await;
        assert_eq!(rec.starts.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(600)).await;
        settle().await;
        assert_eq!(rec.starts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_handles_ends_task() {
        let rec = Arc::new(CountingRecognizer::default());
        let (handle, _notes, task) = spawn_listener(VoiceListener::default(), rec.clone());
        handle.start();
        drop(handle);
        task.await.unwrap();
        assert_eq!(rec.stops.load(Ordering::SeqCst), 1);
    }
}
