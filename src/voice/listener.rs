// listener.rs — Wake-word listener as an explicit state machine.
//
// The machine never touches a recognizer or a timer itself. Callers feed it
// commands (`start`, `stop`) and recognition lifecycle events, and carry out
// the `ListenerEffect`s it returns. `driver.rs` does that on tokio; tests do
// it by hand.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::phrases::{Trigger, TriggerPhrases};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ListenerState {
    Idle,
    Listening,
    Restarting,
}

/// Error codes reported by the speech recognition engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RecognitionError {
    NoSpeech,
    AudioCapture,
    NotAllowed,
    ServiceNotAllowed,
    Network,
    Aborted,
    Other(String),
}

impl RecognitionError {
    /// Permission problems never resolve by retrying.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RecognitionError::NotAllowed | RecognitionError::ServiceNotAllowed
        )
    }

    /// Silence and microphone hiccups; retried on the short delay.
    pub fn is_transient(&self) -> bool {
        matches!(self, RecognitionError::NoSpeech | RecognitionError::AudioCapture)
    }

    pub fn code(&self) -> &str {
        match self {
            RecognitionError::NoSpeech => "no-speech",
            RecognitionError::AudioCapture => "audio-capture",
            RecognitionError::NotAllowed => "not-allowed",
            RecognitionError::ServiceNotAllowed => "service-not-allowed",
            RecognitionError::Network => "network",
            RecognitionError::Aborted => "aborted",
            RecognitionError::Other(code) => code,
        }
    }
}

impl From<String> for RecognitionError {
    fn from(code: String) -> Self {
        match code.as_str() {
            "no-speech" => RecognitionError::NoSpeech,
            "audio-capture" => RecognitionError::AudioCapture,
            "not-allowed" => RecognitionError::NotAllowed,
            "service-not-allowed" => RecognitionError::ServiceNotAllowed,
            "network" => RecognitionError::Network,
            "aborted" => RecognitionError::Aborted,
            _ => RecognitionError::Other(code),
        }
    }
}

impl From<RecognitionError> for String {
    fn from(err: RecognitionError) -> Self {
        err.code().to_string()
    }
}

impl fmt::Display for RecognitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Lifecycle events of one recognition session, in platform order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RecognitionEvent {
    Started,
    #[serde(rename_all = "camelCase")]
    Result {
        transcript: String,
        #[serde(default)]
        is_final: bool,
    },
    Error { error: RecognitionError },
    Ended,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "lowercase")]
pub enum ListenerStatus {
    Listening,
    Stopped,
    Error(String),
}

/// What the listener reports to its owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "camelCase")]
pub enum VoiceNotification {
    Wake,
    Sleep,
    Status(ListenerStatus),
    /// The listener went idle on its own and will not come back.
    PermanentFailure(String),
}

/// Side effects the owner must carry out, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerEffect {
    StartRecognition,
    StopRecognition,
    /// Call `restart_elapsed(ticket)` once `delay` has passed.
    ScheduleRestart {
        delay: Duration,
        attempt: u32,
        ticket: u64,
    },
    Notify(VoiceNotification),
}

/// Restart delays plus the budget of consecutive restarts allowed before
/// the listener gives up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// After the platform ends a session on its own.
    pub end_delay: Duration,
    /// After no-speech or audio-capture errors.
    pub transient_delay: Duration,
    /// After any other recoverable error.
    pub error_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 20,
            end_delay: Duration::from_millis(500),
            transient_delay: Duration::from_millis(1000),
            error_delay: Duration::from_millis(2000),
        }
    }
}

impl RetryPolicy {
    fn delay_for(&self, error: &RecognitionError) -> Duration {
        if error.is_transient() {
            self.transient_delay
        } else {
            self.error_delay
        }
    }
}

#[derive(Debug)]
pub struct VoiceListener {
    state: ListenerState,
    phrases: TriggerPhrases,
    policy: RetryPolicy,
    /// Restarts since recognition last produced a result.
    attempts: u32,
    /// Triggers already reported for the utterance in progress.
    fired: Vec<Trigger>,
    /// Ticket of the one outstanding restart, if any.
    pending_restart: Option<u64>,
    next_ticket: u64,
}

impl Default for VoiceListener {
    fn default() -> Self {
        Self::new(TriggerPhrases::default(), RetryPolicy::default())
    }
}

impl VoiceListener {
    pub fn new(phrases: TriggerPhrases, policy: RetryPolicy) -> Self {
        Self {
            state: ListenerState::Idle,
            phrases,
            policy,
            attempts: 0,
            fired: Vec::new(),
            pending_restart: None,
            next_ticket: 1,
        }
    }

    pub fn state(&self) -> ListenerState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn restart_pending(&self) -> bool {
        self.pending_restart.is_some()
    }

    pub fn phrases(&self) -> &TriggerPhrases {
        &self.phrases
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Replace the retry policy. Restarts already counted stay counted.
    pub fn set_policy(&mut self, policy: RetryPolicy) {
        log::info!("Voice: restart budget set to {}", policy.max_attempts);
        self.policy = policy;
    }

    pub fn set_agent_name(&mut self, name: &str) {
        self.phrases = TriggerPhrases::for_agent(name);
        log::info!("Voice: agent name set to {}", self.phrases.agent_name());
    }

    /// Explicit start. A no-op unless idle, so at most one session runs.
    pub fn start(&mut self) -> Vec<ListenerEffect> {
        if self.state != ListenerState::Idle {
            return Vec::new();
        }
        self.state = ListenerState::Listening;
        self.attempts = 0;
        self.pending_restart = None;
        log::info!("Voice: listening for \"{}\"", self.phrases.agent_name());
        vec![ListenerEffect::StartRecognition]
    }

    /// Explicit stop. Cancels any pending restart.
    pub fn stop(&mut self) -> Vec<ListenerEffect> {
        let was = self.state;
        if was == ListenerState::Idle {
            return Vec::new();
        }
        self.go_idle();
        log::info!("Voice: stopped");

        let mut effects = Vec::with_capacity(2);
        if was == ListenerState::Listening {
            effects.push(ListenerEffect::StopRecognition);
        }
        effects.push(ListenerEffect::Notify(VoiceNotification::Status(
            ListenerStatus::Stopped,
        )));
        effects
    }

    pub fn on_event(&mut self, event: RecognitionEvent) -> Vec<ListenerEffect> {
        match event {
            RecognitionEvent::Started => self.on_started(),
            RecognitionEvent::Result {
                transcript,
                is_final,
            } => self.on_result(&transcript, is_final),
            RecognitionEvent::Error { error } => self.on_error(error),
            RecognitionEvent::Ended => self.on_ended(),
        }
    }

    /// The restart delay for `ticket` has passed.
    pub fn restart_elapsed(&mut self, ticket: u64) -> Vec<ListenerEffect> {
        if self.state != ListenerState::Restarting || self.pending_restart != Some(ticket) {
            log::debug!("Voice: stale restart ticket {} ignored", ticket);
            return Vec::new();
        }
        self.pending_restart = None;
        self.state = ListenerState::Listening;
        log::info!("Voice: restarting recognition (attempt {})", self.attempts);
        vec![ListenerEffect::StartRecognition]
    }

    fn on_started(&mut self) -> Vec<ListenerEffect> {
        if self.state != ListenerState::Listening {
            return Vec::new();
        }
        self.fired.clear();
        vec![ListenerEffect::Notify(VoiceNotification::Status(
            ListenerStatus::Listening,
        ))]
    }

    /// Interim results grow as the user speaks; each trigger is reported
    /// once per utterance, and the final result closes the utterance.
    fn on_result(&mut self, transcript: &str, is_final: bool) -> Vec<ListenerEffect> {
        if self.state != ListenerState::Listening {
            return Vec::new();
        }
        // Recognition works; the restart budget starts over.
        self.attempts = 0;

        let mut effects = Vec::new();
        for trigger in self.phrases.detect(transcript) {
            if self.fired.contains(&trigger) {
                continue;
            }
            log::info!("Voice: {:?} phrase detected", trigger);
            self.fired.push(trigger);
            effects.push(ListenerEffect::Notify(match trigger {
                Trigger::Wake => VoiceNotification::Wake,
                Trigger::Sleep => VoiceNotification::Sleep,
            }));
        }
        if is_final {
            self.fired.clear();
        }
        effects
    }

    fn on_error(&mut self, error: RecognitionError) -> Vec<ListenerEffect> {
        if self.state == ListenerState::Idle {
            return Vec::new();
        }
        log::warn!("Voice: recognition error {}", error);

        let mut effects = vec![ListenerEffect::Notify(VoiceNotification::Status(
            ListenerStatus::Error(error.code().to_string()),
        ))];

        if error.is_terminal() {
            log::error!("Voice: microphone permission denied, not restarting");
            self.go_idle();
            effects.push(ListenerEffect::Notify(VoiceNotification::PermanentFailure(
                format!("Speech recognition unavailable: {}", error),
            )));
            return effects;
        }

        let delay = self.policy.delay_for(&error);
        // Silence is the normal state of a wake-word listener.
        let counted = error != RecognitionError::NoSpeech;
        effects.extend(self.schedule_restart(delay, counted));
        effects
    }

    fn on_ended(&mut self) -> Vec<ListenerEffect> {
        match self.state {
            ListenerState::Listening => self.schedule_restart(self.policy.end_delay, true),
            // An end after an error: the restart is already scheduled.
            ListenerState::Restarting | ListenerState::Idle => Vec::new(),
        }
    }

    /// Schedule the single pending restart. `counted` restarts draw on
    /// the retry budget.
    fn schedule_restart(&mut self, delay: Duration, counted: bool) -> Vec<ListenerEffect> {
        if self.pending_restart.is_some() {
            return Vec::new();
        }

        if counted {
            self.attempts += 1;
        }
        if self.attempts > self.policy.max_attempts {
            let attempts = self.attempts - 1;
            log::error!("Voice: giving up after {} restart attempts", attempts);
            self.go_idle();
            return vec![ListenerEffect::Notify(VoiceNotification::PermanentFailure(
                format!("Speech recognition kept failing after {} restarts", attempts),
            ))];
        }

        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.pending_restart = Some(ticket);
        self.state = ListenerState::Restarting;
        log::debug!("Voice: restart {} scheduled in {:?}", self.attempts, delay);
        vec![ListenerEffect::ScheduleRestart {
            delay,
            attempt: self.attempts,
            ticket,
        }]
    }

    fn go_idle(&mut self) {
        self.state = ListenerState::Idle;
        self.pending_restart = None;
        self.fired.clear();
    }
}
