//! Line protocol spoken between the client and the relay.
//!
//! Commands travel client to relay as plain text lines; state payloads travel
//! back as one JSON object per line.

use std::fmt;

use serde::Deserialize;
use serde_json::Value;

use crate::error::HarnessResult;
use crate::snapshot::{lenient, lenient_list, parse_snapshot, Snapshot};

/// A single command line understood by the live application.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Play a card. `hand_index` is 0-based here and 1-based on the wire.
    Play {
        hand_index: usize,
        target: Option<usize>,
    },
    End,
    Choose(usize),
    Proceed,
    Confirm,
    /// Presses the confirm key directly, bypassing the displayed button state.
    KeyConfirm,
    Skip,
    Return,
    Leave,
    Start {
        character: String,
        ascension: u32,
        seed: Option<String>,
    },
    Ready,
    State,
    /// Bulk-overwrite of the live state. Not advertised in `available_commands`.
    Set(Value),
    Abandon,
}

impl Command {
    pub fn play(hand_index: usize, target: Option<usize>) -> Self {
        Command::Play { hand_index, target }
    }

    pub fn start(character: impl Into<String>, ascension: u32) -> Self {
        Command::Start {
            character: character.into(),
            ascension,
            seed: None,
        }
    }

    /// Name of the command as it appears in `available_commands`.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Play { .. } => "play",
            Command::End => "end",
            Command::Choose(_) => "choose",
            Command::Proceed => "proceed",
            Command::Confirm => "confirm",
            Command::KeyConfirm => "key",
            Command::Skip => "skip",
            Command::Return => "return",
            Command::Leave => "leave",
            Command::Start { .. } => "start",
            Command::Ready => "ready",
            Command::State => "state",
            Command::Set(_) => "set",
            Command::Abandon => "abandon",
        }
    }

    /// Look up one of the argument-free screen commands by name.
    pub fn screen_action(name: &str) -> Option<Self> {
        match name {
            "proceed" => Some(Command::Proceed),
            "confirm" => Some(Command::Confirm),
            "skip" => Some(Command::Skip),
            "return" => Some(Command::Return),
            "leave" => Some(Command::Leave),
            _ => None,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Play { hand_index, target } => {
                write!(f, "play {}", hand_index + 1)?;
                if let Some(target) = target {
                    write!(f, " {target}")?;
                }
                Ok(())
            }
            Command::Choose(index) => write!(f, "choose {index}"),
            Command::KeyConfirm => write!(f, "key confirm"),
            Command::Start {
                character,
                ascension,
                seed,
            } => {
                write!(f, "start {character} {ascension}")?;
                if let Some(seed) = seed {
                    write!(f, " {seed}")?;
                }
                Ok(())
            }
            Command::Set(body) => write!(f, "set {body}"),
            other => f.write_str(other.name()),
        }
    }
}

/// Screen commands tried, in order, when walking through non-combat screens.
pub const SCREEN_ACTIONS: [&str; 5] = ["proceed", "confirm", "skip", "return", "leave"];

/// Membership queries over an `available_commands` list.
#[derive(Debug, Clone, Copy)]
pub struct CommandSet<'a>(pub &'a [String]);

impl<'a> CommandSet<'a> {
    pub fn has(&self, name: &str) -> bool {
        self.0.iter().any(|command| command == name)
    }

    /// The application accepts turn-level actions again.
    pub fn can_play_turn(&self) -> bool {
        self.has("play") || self.has("end")
    }

    /// Preferred confirm-style affordance: `confirm` first, then `proceed`.
    pub fn confirm_action(&self) -> Option<Command> {
        if self.has("confirm") {
            Some(Command::Confirm)
        } else if self.has("proceed") {
            Some(Command::Proceed)
        } else {
            None
        }
    }

    /// First available screen command from [`SCREEN_ACTIONS`].
    pub fn first_screen_action(&self) -> Option<Command> {
        SCREEN_ACTIONS
            .iter()
            .find(|name| self.has(name))
            .and_then(|name| Command::screen_action(name))
    }
}

/// Top-level envelope of one relay line.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Payload {
    #[serde(deserialize_with = "lenient")]
    pub error: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub ready_for_command: bool,
    #[serde(deserialize_with = "lenient")]
    pub in_game: bool,
    #[serde(deserialize_with = "lenient_list")]
    pub available_commands: Vec<String>,
    #[serde(deserialize_with = "lenient")]
    pub game_state: Option<Value>,
}

impl Payload {
    /// Decode one line. Invalid JSON is a protocol mismatch and is returned
    /// as an error; anything that decodes is accepted with defaults.
    pub fn parse(line: &str) -> HarnessResult<(Value, Payload)> {
        let raw: Value = serde_json::from_str(line)?;
        let payload = if raw.is_object() {
            Payload::deserialize(&raw).unwrap_or_default()
        } else {
            Payload::default()
        };
        Ok((raw, payload))
    }

    pub fn commands(&self) -> CommandSet<'_> {
        CommandSet(&self.available_commands)
    }

    /// Snapshot carried by this payload, if it reports an error-free game.
    pub fn snapshot(&self) -> Option<Snapshot> {
        if self.error.is_some() || !self.in_game {
            return None;
        }
        self.game_state
            .as_ref()
            .map(|state| parse_snapshot(state, &self.available_commands))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn play_is_rendered_one_based() {
        assert_eq!(Command::play(0, None).to_string(), "play 1");
        assert_eq!(Command::play(2, Some(1)).to_string(), "play 3 1");
    }

    #[test]
    fn commands_render_wire_text() {
        assert_eq!(Command::End.to_string(), "end");
        assert_eq!(Command::Choose(4).to_string(), "choose 4");
        assert_eq!(Command::KeyConfirm.to_string(), "key confirm");
        assert_eq!(Command::State.to_string(), "state");
        assert_eq!(Command::start("BG_IRONCLAD", 0).to_string(), "start BG_IRONCLAD 0");
        let seeded = Command::Start {
            character: "BG_SILENT".into(),
            ascension: 3,
            seed: Some("ABC".into()),
        };
        assert_eq!(seeded.to_string(), "start BG_SILENT 3 ABC");
        assert_eq!(
            Command::Set(json!({"die": 1})).to_string(),
            r#"set {"die":1}"#
        );
    }

    #[test]
    fn command_set_prefers_confirm() {
        let commands = vec!["proceed".to_string(), "confirm".to_string()];
        let set = CommandSet(&commands);
        assert_eq!(set.confirm_action(), Some(Command::Confirm));
        assert_eq!(set.first_screen_action(), Some(Command::Proceed));
        assert!(!set.can_play_turn());
    }

    #[test]
    fn payload_defaults_and_snapshot_gating() {
        let (_, payload) = Payload::parse(r#"{"in_game": true}"#).expect("valid json");
        assert!(!payload.ready_for_command);
        assert!(payload.snapshot().is_none());

        let (_, payload) = Payload::parse(
            r#"{"in_game": true, "ready_for_command": true, "available_commands": ["end"], "game_state": {"floor": 3}}"#,
        )
        .expect("valid json");
        let snapshot = payload.snapshot().expect("snapshot");
        assert_eq!(snapshot.floor, 3);
        assert!(snapshot.has_command("end"));

        let (_, payload) =
            Payload::parse(r#"{"error": "bad command", "in_game": true, "game_state": {}}"#)
                .expect("valid json");
        assert_eq!(payload.error.as_deref(), Some("bad command"));
        assert!(payload.snapshot().is_none());
    }

    #[test]
    fn malformed_line_is_an_error() {
        assert!(Payload::parse("{not json").is_err());
        let (_, payload) = Payload::parse("42").expect("valid json");
        assert_eq!(payload, Payload::default());
    }
}
