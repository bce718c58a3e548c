//! Intake session module holding per-user conversation state.

use chrono::{DateTime, Utc};
use std::fmt;

/// One of the four details an intake conversation must collect
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Slot {
    Name,
    Service,
    Schedule,
    Phone,
}

impl Slot {
    /// Collection order; the assistant asks for the first missing slot
    pub const ALL: [Slot; 4] = [Slot::Name, Slot::Service, Slot::Schedule, Slot::Phone];

    /// Human-readable label used in prompts
    pub fn label(self) -> &'static str {
        match self {
            Slot::Name => "name",
            Slot::Service => "service of interest",
            Slot::Schedule => "preferred time",
            Slot::Phone => "phone number",
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Partially filled slot set
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Slots {
    pub name: Option<String>,
    pub service: Option<String>,
    pub schedule: Option<String>,
    pub phone: Option<String>,
}

impl Slots {
    pub fn get(&self, slot: Slot) -> Option<&str> {
        match slot {
            Slot::Name => self.name.as_deref(),
            Slot::Service => self.service.as_deref(),
            Slot::Schedule => self.schedule.as_deref(),
            Slot::Phone => self.phone.as_deref(),
        }
    }

    fn get_mut(&mut self, slot: Slot) -> &mut Option<String> {
        match slot {
            Slot::Name => &mut self.name,
            Slot::Service => &mut self.service,
            Slot::Schedule => &mut self.schedule,
            Slot::Phone => &mut self.phone,
        }
    }

    /// Fill `slot` with `value` unless it is already filled or `value` is blank.
    ///
    /// Returns `true` when the slot changed. Values are trimmed and otherwise
    /// accepted as-is.
    pub fn fill(&mut self, slot: Slot, value: &str) -> bool {
        let value = value.trim();
        if value.is_empty() {
            return false;
        }
        let target = self.get_mut(slot);
        if target.is_some() {
            return false;
        }
        *target = Some(value.to_string());
        true
    }

    /// Merge every filled slot of `other` into `self` without overwriting.
    ///
    /// Returns the slots that were newly filled, in collection order.
    pub fn merge(&mut self, other: &Slots) -> Vec<Slot> {
        Slot::ALL
            .into_iter()
            .filter(|slot| match other.get(*slot) {
                Some(value) => self.fill(*slot, value),
                None => false,
            })
            .collect()
    }

    pub fn missing(&self) -> Vec<Slot> {
        Slot::ALL
            .into_iter()
            .filter(|slot| self.get(*slot).is_none())
            .collect()
    }

    pub fn next_missing(&self) -> Option<Slot> {
        Slot::ALL.into_iter().find(|slot| self.get(*slot).is_none())
    }

    pub fn is_complete(&self) -> bool {
        self.next_missing().is_none()
    }
}

/// Session lifecycle; `Complete` is terminal
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SessionState {
    #[default]
    InProgress,
    Complete,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Speaker {
    User,
    Assistant,
}

/// One exchanged message
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Turn {
    pub speaker: Speaker,
    pub text: String,
}

/// Ephemeral per-user intake conversation
#[derive(Clone, Debug, PartialEq)]
pub struct Session {
    pub user_id: i64,
    pub turns: Vec<Turn>,
    pub slots: Slots,
    pub state: SessionState,
    /// Purchase likelihood (0-100) last reported by the model
    pub sale_temperature: Option<u8>,
    pub last_activity: DateTime<Utc>,
}

impl Session {
    pub fn new(user_id: i64) -> Self {
        Self {
            user_id,
            turns: Vec::new(),
            slots: Slots::default(),
            state: SessionState::default(),
            sale_temperature: None,
            last_activity: Utc::now(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.state == SessionState::Complete
    }

    /// Render the user/assistant exchange as stored with the lead
    pub fn transcript(&self) -> String {
        self.turns
            .iter()
            .map(|turn| match turn.speaker {
                Speaker::User => format!("User: {}", turn.text),
                Speaker::Assistant => format!("Assistant: {}", turn.text),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_ignores_blank_and_trims() {
        let mut slots = Slots::default();
        assert!(!slots.fill(Slot::Name, "   "));
        assert!(slots.name.is_none());

        assert!(slots.fill(Slot::Name, "  Alex "));
        assert_eq!(slots.name.as_deref(), Some("Alex"));
    }

    #[test]
    fn test_merge_is_monotonic() {
        let mut slots = Slots {
            name: Some("Alex".to_string()),
            ..Default::default()
        };

        let update = Slots {
            name: Some("Someone Else".to_string()),
            service: Some("therapy".to_string()),
            ..Default::default()
        };
        let filled = slots.merge(&update);
        assert_eq!(filled, vec![Slot::Service]);
        assert_eq!(slots.name.as_deref(), Some("Alex"));

        // A turn that extracts nothing leaves everything in place
        let filled = slots.merge(&Slots::default());
        assert!(filled.is_empty());
        assert_eq!(slots.name.as_deref(), Some("Alex"));
        assert_eq!(slots.service.as_deref(), Some("therapy"));
    }

    #[test]
    fn test_missing_slots_follow_collection_order() {
        let mut slots = Slots::default();
        assert_eq!(slots.next_missing(), Some(Slot::Name));

        slots.fill(Slot::Schedule, "Tuesdays 5pm");
        slots.fill(Slot::Name, "Sam");
        assert_eq!(slots.missing(), vec![Slot::Service, Slot::Phone]);
        assert_eq!(slots.next_missing(), Some(Slot::Service));

        slots.fill(Slot::Service, "therapy");
        slots.fill(Slot::Phone, "not-a-phone");
        assert!(slots.is_complete());
    }

    #[test]
    fn test_transcript_rendering() {
        let mut session = Session::new(42);
        session.turns.push(Turn {
            speaker: Speaker::User,
            text: "Hi".to_string(),
        });
        session.turns.push(Turn {
            speaker: Speaker::Assistant,
            text: "Hello! What's your name?".to_string(),
        });

        assert_eq!(
            session.transcript(),
            "User: Hi\nAssistant: Hello! What's your name?"
        );
        assert_eq!(session.state, SessionState::InProgress);
        assert!(!session.is_complete());
    }
}
