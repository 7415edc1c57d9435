/// One line typed at the prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputCommand {
    Send(String),
    Name(String),
    /// `None` switches back to the global channel.
    Channel(Option<String>),
    Reply { prefix: String, text: String },
    Attach { path: String, text: String },
    History,
    Peers,
    Help,
    Quit,
    Empty,
    Invalid(String),
}

pub const HELP: &str = "\
/name <name>                 change your display name
/channel [name]              switch channel (no name: global), alias /join
/reply <id-prefix> <text>    reply to a message
/attach <path> [text]        send a file inline
/history                     show messages in the current channel
/peers                       list connected peers
/help                        show this help
/quit                        leave, alias /exit";

pub fn parse_line(line: &str) -> InputCommand {
    let line = line.trim();
    if line.is_empty() {
        return InputCommand::Empty;
    }
    let Some(command) = line.strip_prefix('/') else {
        return InputCommand::Send(line.to_string());
    };

    let (verb, rest) = split_word(command);
    match verb {
        "name" if rest.is_empty() => InputCommand::Invalid("usage: /name <name>".to_string()),
        "name" => InputCommand::Name(rest.to_string()),
        "channel" | "join" => {
            let name = rest.trim_start_matches('#');
            if name.is_empty() || name == crate::common::GLOBAL_CHANNEL_NAME {
                InputCommand::Channel(None)
            } else {
                InputCommand::Channel(Some(name.to_string()))
            }
        }
        "reply" => match split_word(rest) {
            (prefix, text) if !prefix.is_empty() && !text.is_empty() => InputCommand::Reply {
                prefix: prefix.to_string(),
                text: text.to_string(),
            },
            _ => InputCommand::Invalid("usage: /reply <id-prefix> <text>".to_string()),
        },
        "attach" => match split_word(rest) {
            ("", _) => InputCommand::Invalid("usage: /attach <path> [text]".to_string()),
            (path, text) => InputCommand::Attach {
                path: path.to_string(),
                text: text.to_string(),
            },
        },
        "history" => InputCommand::History,
        "peers" => InputCommand::Peers,
        "help" => InputCommand::Help,
        "quit" | "exit" => InputCommand::Quit,
        other => InputCommand::Invalid(format!("unknown command /{other}, try /help")),
    }
}

fn split_word(input: &str) -> (&str, &str) {
    let input = input.trim();
    match input.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (input, ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_sent() {
        assert_eq!(parse_line("  hello there "), InputCommand::Send("hello there".to_string()));
        assert_eq!(parse_line("   "), InputCommand::Empty);
    }

    #[test]
    fn channel_switching() {
        assert_eq!(parse_line("/channel #rust"), InputCommand::Channel(Some("rust".to_string())));
        assert_eq!(parse_line("/channel"), InputCommand::Channel(None));
        assert_eq!(parse_line("/channel global"), InputCommand::Channel(None));
    }

    #[test]
    fn reply_needs_prefix_and_text() {
        assert_eq!(
            parse_line("/reply 3f2a  sounds good"),
            InputCommand::Reply {
                prefix: "3f2a".to_string(),
                text: "sounds good".to_string()
            }
        );
        assert!(matches!(parse_line("/reply 3f2a"), InputCommand::Invalid(_)));
    }

    #[test]
    fn attach_text_is_optional() {
        assert_eq!(
            parse_line("/attach cat.png"),
            InputCommand::Attach {
                path: "cat.png".to_string(),
                text: String::new()
            }
        );
        assert!(matches!(parse_line("/attach"), InputCommand::Invalid(_)));
    }

    #[test]
    fn misc_commands() {
        assert_eq!(parse_line("/name Ada Lovelace"), InputCommand::Name("Ada Lovelace".to_string()));
        assert!(matches!(parse_line("/name"), InputCommand::Invalid(_)));
        assert_eq!(parse_line("/quit"), InputCommand::Quit);
        assert_eq!(parse_line("/history"), InputCommand::History);
        assert!(matches!(parse_line("/dance"), InputCommand::Invalid(_)));
    }

    #[test]
    fn help_lists_every_command_and_alias() {
        for verb in ["/name", "/channel", "/join", "/reply", "/attach", "/history", "/peers", "/help", "/quit", "/exit"] {
            assert!(HELP.contains(verb), "{verb} missing from help");
            assert!(!matches!(parse_line(verb), InputCommand::Invalid(ref reason) if reason.starts_with("unknown")));
        }
        assert_eq!(parse_line("/join rust"), InputCommand::Channel(Some("rust".to_string())));
        assert_eq!(parse_line("/exit"), InputCommand::Quit);
        assert_eq!(parse_line("/help"), InputCommand::Help);
    }
}
