//! Merge release fragments into one start command.
//!
//! Fragments arrive already quoted for the target shell. The assembler only
//! joins words with single spaces, wraps co-processes as `(<words> &)` and
//! appends the main command last:
//!
//! ```text
//! (agent --port 9000 $AGENT_OPTS &) (other &) main --flag
//! ```

use crate::CoreError;
use runpack_schema::{ComponentId, ReleaseManifest};

/// Launch words plus an optional argument string appended verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFragment {
    pub words: Vec<String>,
    pub additional: Option<String>,
}

impl CommandFragment {
    pub fn new(words: Vec<String>) -> Self {
        Self {
            words,
            additional: None,
        }
    }

    #[must_use]
    pub fn with_additional(mut self, additional: Option<String>) -> Self {
        self.additional = additional.filter(|s| !s.trim().is_empty());
        self
    }

    fn render(&self) -> String {
        let mut parts: Vec<&str> = self.words.iter().map(String::as_str).collect();
        if let Some(extra) = &self.additional {
            parts.push(extra.as_str());
        }
        parts.join(" ")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseFragment {
    /// The application's own start command. At most one per build.
    Main(CommandFragment),
    /// An auxiliary process started in the background before the main one.
    Coprocess(CommandFragment),
}

/// A fragment together with the component that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contribution {
    pub component: ComponentId,
    pub fragment: ReleaseFragment,
}

/// Build the release manifest from fragments in registration order.
pub fn assemble(contributions: &[Contribution]) -> Result<ReleaseManifest, CoreError> {
    let mut mains = Vec::new();
    let mut coprocesses = Vec::new();

    for contribution in contributions {
        match &contribution.fragment {
            ReleaseFragment::Main(cmd) => mains.push((&contribution.component, cmd)),
            ReleaseFragment::Coprocess(cmd) => coprocesses.push(cmd.render()),
        }
    }

    let main = match mains.as_slice() {
        [] => return Err(CoreError::NoStartCommand),
        [(_, cmd)] => cmd.render(),
        many => {
            return Err(CoreError::MultipleMainCommands(
                many.iter().map(|(id, _)| (*id).clone()).collect(),
            ))
        }
    };

    let start = coprocesses
        .iter()
        .map(|cmd| format!("({cmd} &)"))
        .chain(std::iter::once(main.clone()))
        .collect::<Vec<_>>()
        .join(" ");

    Ok(ReleaseManifest::new(main, coprocesses, start))
}

/// Quote `word` for a POSIX shell. Words made only of safe characters are
/// returned unchanged; anything else is wrapped in single quotes.
pub fn shell_quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@%+,".contains(c));
    if safe {
        word.to_owned()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}
