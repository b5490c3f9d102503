use serde::{Deserialize, Serialize};

pub const DEFAULT_AGENT_NAME: &str = "assistant";

/// What a matched phrase asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    Wake,
    Sleep,
}

/// Wake and sleep phrases derived from the configured agent name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerPhrases {
    agent_name: String,
    wake: [String; 3],
    sleep: [String; 3],
}

impl Default for TriggerPhrases {
    fn default() -> Self {
        Self::for_agent(DEFAULT_AGENT_NAME)
    }
}

impl TriggerPhrases {
    /// Build the phrase sets for `name`. The name is trimmed and
    /// lower-cased; a blank name falls back to the default.
    pub fn for_agent(name: &str) -> Self {
        let mut n = name.trim().to_lowercase();
        if n.is_empty() {
            n = DEFAULT_AGENT_NAME.to_string();
        }
        Self {
            wake: [
                format!("{n} wake up"),
                format!("hey {n}"),
                format!("{n} wake"),
            ],
            sleep: [
                format!("{n} sleep"),
                format!("{n} go to sleep"),
                format!("goodbye {n}"),
            ],
            agent_name: n,
        }
    }

    pub fn agent_name(&self) -> &str {
        &self.agent_name
    }

    pub fn wake_phrases(&self) -> &[String] {
        &self.wake
    }

    pub fn sleep_phrases(&self) -> &[String] {
        &self.sleep
    }

    /// Triggers present in `transcript`, wake before sleep, each at most once.
    pub fn detect(&self, transcript: &str) -> Vec<Trigger> {
        let text = transcript.trim().to_lowercase();
        let mut found = Vec::with_capacity(2);
        if self.wake.iter().any(|p| text.contains(p.as_str())) {
            found.push(Trigger::Wake);
        }
        if self.sleep.iter().any(|p| text.contains(p.as_str())) {
            found.push(Trigger::Sleep);
        }
        found
    }
}
