//! Pure classification of one server output line into a typed event.

use std::sync::LazyLock;

use chrono::{DateTime, Local};
use regex::Regex;

use gsw_core::clock;
use gsw_core::types::LineEvent;

/// `ESC [ params letter` control sequences.
static ANSI_ESCAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9;]*[A-Za-z]").expect("ansi escape pattern"));

/// Colour runs whose escape byte was already filtered upstream, e.g. `[1;31m`.
static COLOR_RESIDUE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\d+(?:;\d+)*m").expect("colour residue pattern"));

/// Leading `[HH:MM:SS` server timestamp.
static SERVER_TIME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[(\d{2}):(\d{2}):(\d{2})").expect("server time pattern"));

/// Lookup capability for player names referenced indirectly by log content.
pub trait KnownPlayerResolver {
    /// First known player whose name occurs as a substring of `content`.
    fn find_known(&self, content: &str) -> Option<String>;
}

/// Result of classifying one line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classified {
    /// The timestamp embedded in the line, resolved against today's clock.
    /// Advisory only; audit entries carry the classification wall clock.
    pub server_time: DateTime<Local>,
    pub event: LineEvent,
}

/// Classify one raw output line.
///
/// Strips terminal control sequences, reads the advisory timestamp, then
/// matches the content after the `]: ` marker against the known patterns in
/// priority order.
pub fn classify(raw: &str, resolver: &dyn KnownPlayerResolver) -> Classified {
    let line = strip_control_sequences(raw);
    let server_time = parse_server_time(&line).unwrap_or_else(Local::now);
    let Some(marker) = line.find("]: ") else {
        return Classified {
            server_time,
            event: LineEvent::Other,
        };
    };
    let content = &line[marker + 3..];
    Classified {
        server_time,
        event: classify_content(content, resolver),
    }
}

fn strip_control_sequences(raw: &str) -> String {
    let stripped = ANSI_ESCAPE.replace_all(raw, "");
    COLOR_RESIDUE.replace_all(&stripped, "").into_owned()
}

fn parse_server_time(line: &str) -> Option<DateTime<Local>> {
    let caps = SERVER_TIME.captures(line)?;
    let field = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());
    clock::today_at(field(1)?, field(2)?, field(3)?)
}

fn classify_content(content: &str, resolver: &dyn KnownPlayerResolver) -> LineEvent {
    if let Some(rest) = content.strip_prefix("Player ") {
        if let Some((name, client)) = rest.split_once(" joined with ") {
            return LineEvent::Join {
                player: name.to_string(),
                client_info: client.trim_end_matches(['\r', '\n']).to_string(),
            };
        }
    }

    if let Some(name) = content.trim_end().strip_suffix(" joined the game") {
        return LineEvent::Join {
            player: name.to_string(),
            client_info: "vanilla".to_string(),
        };
    }

    if let Some(name) = content.trim_end().strip_suffix(" left the game") {
        return LineEvent::Leave {
            player: name.to_string(),
        };
    }

    if let Some((name, rest)) = content.split_once(" issued server command: /") {
        return LineEvent::Command {
            player: name.to_string(),
            content: format!("/{}", rest.trim_end_matches(['\r', '\n'])),
        };
    }

    // Commands the server echoes back in brackets, e.g. `[Alice: Set own
    // game mode to Creative]`. The colon before the first close bracket
    // separates such echoes from plain bracketed tags.
    if let Some(body) = content.strip_prefix('[') {
        if let Some(end) = body.find(']') {
            if body[..end].contains(':') {
                let player = resolver.find_known(content).unwrap_or_default();
                return LineEvent::Command {
                    player,
                    content: format!("[{}]", &body[..end]),
                };
            }
        }
    }

    if let Some(rest) = content.strip_prefix('<') {
        if let Some(end) = rest.find('>') {
            return LineEvent::Chat {
                player: rest[..end].to_string(),
                text: rest[end + 1..].trim().to_string(),
            };
        }
    }

    LineEvent::Other
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    struct NoKnownPlayers;

    impl KnownPlayerResolver for NoKnownPlayers {
        fn find_known(&self, _content: &str) -> Option<String> {
            None
        }
    }

    struct Knows(&'static str);

    impl KnownPlayerResolver for Knows {
        fn find_known(&self, content: &str) -> Option<String> {
            content.contains(self.0).then(|| self.0.to_string())
        }
    }

    #[test]
    fn modded_join_carries_client_info() {
        let classified = classify(
            "[12:34:56] [Server thread/INFO]: Player Alice joined with fabric 0.15\n",
            &NoKnownPlayers,
        );
        assert_eq!(
            classified.event,
            LineEvent::Join {
                player: "Alice".into(),
                client_info: "fabric 0.15".into(),
            }
        );
        assert_eq!(classified.server_time.hour(), 12);
        assert_eq!(classified.server_time.minute(), 34);
        assert_eq!(classified.server_time.second(), 56);
    }

    #[test]
    fn vanilla_join_gets_default_client() {
        let classified = classify(
            "[09:00:01] [Server thread/INFO]: Bob joined the game\n",
            &NoKnownPlayers,
        );
        assert_eq!(
            classified.event,
            LineEvent::Join {
                player: "Bob".into(),
                client_info: "vanilla".into(),
            }
        );
    }

    #[test]
    fn leave_is_recognised() {
        let classified = classify(
            "[09:10:00] [Server thread/INFO]: Bob left the game\n",
            &NoKnownPlayers,
        );
        assert_eq!(
            classified.event,
            LineEvent::Leave {
                player: "Bob".into()
            }
        );
    }

    #[test]
    fn issued_command_keeps_slash_and_trims_newline() {
        let classified = classify(
            "[12:35:00] [Server thread/INFO]: Alice issued server command: /kill all\n",
            &NoKnownPlayers,
        );
        assert_eq!(
            classified.event,
            LineEvent::Command {
                player: "Alice".into(),
                content: "/kill all".into(),
            }
        );
    }

    #[test]
    fn bracketed_echo_resolves_player_from_known_set() {
        let classified = classify(
            "[12:36:00] [Server thread/INFO]: [Alice: Set own game mode to Creative] extra\n",
            &Knows("Alice"),
        );
        assert_eq!(
            classified.event,
            LineEvent::Command {
                player: "Alice".into(),
                content: "[Alice: Set own game mode to Creative]".into(),
            }
        );
    }

    #[test]
    fn bracketed_echo_without_known_player_has_empty_name() {
        let classified = classify(
            "[12:36:00] [Server thread/INFO]: [Ghost: did something]\n",
            &NoKnownPlayers,
        );
        assert_eq!(
            classified.event,
            LineEvent::Command {
                player: String::new(),
                content: "[Ghost: did something]".into(),
            }
        );
    }

    #[test]
    fn bracketed_tag_without_colon_is_other() {
        let classified = classify(
            "[12:36:00] [Server thread/INFO]: [Rcon] backup finished\n",
            &NoKnownPlayers,
        );
        assert_eq!(classified.event, LineEvent::Other);
    }

    #[test]
    fn chat_is_split_into_player_and_text() {
        let classified = classify(
            "[12:40:00] [Server thread/INFO]: <Carol> hello there \n",
            &NoKnownPlayers,
        );
        assert_eq!(
            classified.event,
            LineEvent::Chat {
                player: "Carol".into(),
                text: "hello there".into(),
            }
        );
    }

    #[test]
    fn line_without_content_marker_is_other() {
        let classified = classify("[12:00:00] bare server banner\n", &NoKnownPlayers);
        assert_eq!(classified.event, LineEvent::Other);
    }

    #[test]
    fn ansi_sequences_are_stripped_before_matching() {
        let classified = classify(
            "\x1b[0;32m[12:34:56] [Server thread/INFO]: \x1b[1;31mBob joined the game\x1b[0m\n",
            &NoKnownPlayers,
        );
        assert_eq!(
            classified.event,
            LineEvent::Join {
                player: "Bob".into(),
                client_info: "vanilla".into(),
            }
        );
    }

    #[test]
    fn colour_residue_without_escape_byte_is_stripped() {
        let classified = classify(
            "[0;32m[12:34:56] [Server thread/INFO]: [1;31mBob joined the game[0m\n",
            &NoKnownPlayers,
        );
        assert_eq!(
            classified.event,
            LineEvent::Join {
                player: "Bob".into(),
                client_info: "vanilla".into(),
            }
        );
    }

    #[test]
    fn malformed_timestamp_falls_back_to_now() {
        let before = Local::now();
        let classified = classify("[99:99:99] [Server thread/INFO]: noise\n", &NoKnownPlayers);
        assert!(classified.server_time >= before);
        assert_eq!(classified.event, LineEvent::Other);
    }
}
