//! Commands typed at the prompt.

/// One line of input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Reset,
    Rename(String),
    Peers,
    Status,
    Json,
    Help,
    Quit,
}

impl Command {
    /// Parse a line. Blank lines yield `Ok(None)`.
    pub fn parse(line: &str) -> Result<Option<Self>, String> {
        let line = line.trim();
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };

        let command = match word.to_ascii_lowercase().as_str() {
            "" => return Ok(None),
            "start" | "s" => Command::Start,
            "reset" | "stop" | "r" => Command::Reset,
            "name" | "rename" => {
                if rest.is_empty() {
                    return Err("usage: name <username>".to_string());
                }
                Command::Rename(rest.to_string())
            }
            "peers" | "who" => Command::Peers,
            "status" => Command::Status,
            "json" => Command::Json,
            "help" | "?" => Command::Help,
            "quit" | "exit" | "q" => Command::Quit,
            other => return Err(format!("unknown command: {} (try `help`)", other)),
        };
        Ok(Some(command))
    }
}

pub fn print_usage() {
    println!("Commands:");
    println!("  start           Start the next phase for everyone in the room");
    println!("  reset           Stop the countdown (keeps the session count)");
    println!("  name <user>     Change your username");
    println!("  peers           List connected peers");
    println!("  status          Show the current timer");
    println!("  json            Print the timer as JSON");
    println!("  quit            Leave the room");
}
