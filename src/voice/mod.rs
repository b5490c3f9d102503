//! Wake-word voice listener: phrase matching, the restart state machine,
//! and a tokio driver that connects it to a speech recognizer.
pub mod driver;
pub mod listener;
pub mod phrases;

pub use driver::{spawn_listener, ListenerHandle, SpeechRecognizer};
pub use listener::{
    ListenerEffect, ListenerState, ListenerStatus, RecognitionError, RecognitionEvent,
    RetryPolicy, VoiceListener, VoiceNotification,
};
pub use phrases::{Trigger, TriggerPhrases, DEFAULT_AGENT_NAME};
