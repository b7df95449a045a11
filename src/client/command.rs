//! Input line classification.

/// Local commands, typed with a leading `/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Quit,
    Status,
    Unknown(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input<'a> {
    Empty,
    Chat(&'a str),
    Command(Command),
}

pub fn parse_input(line: &str) -> Input<'_> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return Input::Empty;
    }
    if !line.starts_with('/') {
        return Input::Chat(line);
    }

    let command = match line.trim_end() {
        "/help" | "/h" => Command::Help,
        "/quit" | "/q" => Command::Quit,
        "/status" | "/s" => Command::Status,
        other => Command::Unknown(other.to_string()),
    };
    Input::Command(command)
}
