//! Parsing command lines into structured [`Command`]s.
//!
//! Clients may submit commands as a single line (`new-project -n work -c
//! /src`). The daemon parses the line here and reports malformed input on
//! the error path of the issuing connection, never by terminating.

use thiserror::Error;

use crate::command::Command;

/// Errors from command-line parsing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// The line was empty.
    #[error("empty command")]
    Empty,

    /// Unknown command name.
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// A flag was given that the command does not accept.
    #[error("{command}: unknown flag: {flag}")]
    UnknownFlag { command: String, flag: String },

    /// A flag requiring a value was given without one.
    #[error("{command}: flag {flag} requires a value")]
    MissingValue { command: String, flag: String },

    /// Wrong number of positional arguments.
    #[error("usage: {0}")]
    Usage(&'static str),

    /// A double quote was never closed.
    #[error("unterminated quote")]
    UnterminatedQuote,
}

/// Splits a command line into tokens, honoring double quotes.
fn tokenize(line: &str) -> Result<Vec<String>, ParseError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut pending = false;

    for ch in line.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                pending = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if pending {
                    tokens.push(std::mem::take(&mut current));
                    pending = false;
                }
            }
            c => {
                current.push(c);
                pending = true;
            }
        }
    }
    if in_quotes {
        return Err(ParseError::UnterminatedQuote);
    }
    if pending {
        tokens.push(current);
    }
    Ok(tokens)
}

/// Collected flags and positional arguments for one command.
struct Args {
    command: String,
    flags: Vec<(char, Option<String>)>,
    positional: Vec<String>,
}

impl Args {
    /// Splits tokens into flags and positionals. Flags in `valued` consume
    /// the following token as their value.
    fn collect(command: &str, tokens: &[String], valued: &str) -> Result<Args, ParseError> {
        let mut flags = Vec::new();
        let mut positional = Vec::new();
        let mut iter = tokens.iter().peekable();

        while let Some(token) = iter.next() {
            let Some(flag) = token.strip_prefix('-').filter(|f| f.len() == 1) else {
                positional.push(token.clone());
                continue;
            };
            let flag = flag.chars().next().unwrap_or_default();
            if valued.contains(flag) {
                let value = iter.next().ok_or_else(|| ParseError::MissingValue {
                    command: command.to_string(),
                    flag: format!("-{flag}"),
                })?;
                flags.push((flag, Some(value.clone())));
            } else {
                flags.push((flag, None));
            }
        }

        Ok(Args {
            command: command.to_string(),
            flags,
            positional,
        })
    }

    fn value(&self, flag: char) -> Option<String> {
        self.flags
            .iter()
            .find(|(f, _)| *f == flag)
            .and_then(|(_, v)| v.clone())
    }

    fn has(&self, flag: char) -> bool {
        self.flags.iter().any(|(f, _)| *f == flag)
    }

    /// Rejects any flag not in `allowed`.
    fn check_flags(&self, allowed: &str) -> Result<(), ParseError> {
        for (flag, _) in &self.flags {
            if !allowed.contains(*flag) {
                return Err(ParseError::UnknownFlag {
                    command: self.command.clone(),
                    flag: format!("-{flag}"),
                });
            }
        }
        Ok(())
    }
}

/// Parses a command line into a [`Command`].
pub fn parse_command_line(line: &str) -> Result<Command, ParseError> {
    let tokens = tokenize(line)?;
    let (name, rest) = tokens.split_first().ok_or(ParseError::Empty)?;

    match name.as_str() {
        "new-project" | "newp" => {
            let args = Args::collect(name, rest, "nc")?;
            args.check_flags("nc")?;
            if !args.positional.is_empty() {
                return Err(ParseError::Usage(
                    "new-project [-n project-name] [-c start-directory]",
                ));
            }
            Ok(Command::NewProject {
                name: args.value('n'),
                cwd: args.value('c'),
            })
        }
        "kill-project" => {
            let args = Args::collect(name, rest, "t")?;
            args.check_flags("at")?;
            if !args.positional.is_empty() {
                return Err(ParseError::Usage("kill-project [-a] [-t target-project]"));
            }
            Ok(Command::KillProject {
                target: args.value('t'),
                all_others: args.has('a'),
            })
        }
        "rename-project" | "renamep" => {
            let args = Args::collect(name, rest, "t")?;
            args.check_flags("t")?;
            let [new_name] = args.positional.as_slice() else {
                return Err(ParseError::Usage("rename-project [-t target-project] new-name"));
            };
            Ok(Command::RenameProject {
                target: args.value('t'),
                new_name: new_name.clone(),
            })
        }
        "switch-project" | "switchp" => {
            let args = Args::collect(name, rest, "t")?;
            args.check_flags("t")?;
            if !args.positional.is_empty() {
                return Err(ParseError::Usage("switch-project [-t target-project]"));
            }
            Ok(Command::SwitchProject {
                target: args.value('t'),
            })
        }
        "new-session" | "news" => {
            let args = Args::collect(name, rest, "sp")?;
            args.check_flags("sp")?;
            if !args.positional.is_empty() {
                return Err(ParseError::Usage(
                    "new-session [-s session-name] [-p project]",
                ));
            }
            Ok(Command::NewSession {
                name: args.value('s'),
                project: args.value('p'),
            })
        }
        "kill-session" => {
            let args = Args::collect(name, rest, "t")?;
            args.check_flags("t")?;
            let target = args
                .value('t')
                .ok_or(ParseError::Usage("kill-session -t target-session"))?;
            if !args.positional.is_empty() {
                return Err(ParseError::Usage("kill-session -t target-session"));
            }
            Ok(Command::KillSession { target })
        }
        "detach-client" | "detach" => Ok(Command::DetachClient),
        "display-message" | "display" => {
            let args = Args::collect(name, rest, "")?;
            args.check_flags("")?;
            let [text] = args.positional.as_slice() else {
                return Err(ParseError::Usage("display-message message"));
            };
            Ok(Command::DisplayMessage { text: text.clone() })
        }
        "list-projects" | "lsp" => Ok(Command::ListProjects),
        "kill-server" => Ok(Command::Exit),
        other => Err(ParseError::UnknownCommand(other.to_string())),
    }
}
