//! Destructive-action confirmation.

use std::io::{BufRead, Write};

/// Token the operator must type to confirm a deletion. Case-sensitive.
pub const CONFIRMATION_TOKEN: &str = "DELETE";

/// Answer of a confirmation provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Confirmation {
    /// Confirmation was waived with a force flag.
    Forced,
    /// What the operator typed.
    Typed(String),
}

impl Confirmation {
    /// Answer typed on a terminal line. Only the line ending is removed.
    #[must_use]
    pub fn from_line(line: &str) -> Self {
        Self::Typed(line.trim_end_matches(['\r', '\n']).to_string())
    }

    /// Returns true if the action may proceed.
    #[must_use]
    pub fn is_granted(&self) -> bool {
        match self {
            Self::Forced => true,
            Self::Typed(token) => token == CONFIRMATION_TOKEN,
        }
    }
}

/// Source of confirmations for destructive actions.
#[cfg_attr(test, mockall::automock)]
pub trait ConfirmationProvider: Send + Sync {
    /// Shows `prompt` and returns the operator's answer.
    ///
    /// # Errors
    ///
    /// Returns an error if the answer cannot be read.
    fn confirm(&self, prompt: &str) -> std::io::Result<Confirmation>;
}

/// Reads the token from the terminal.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalConfirmation;

impl ConfirmationProvider for TerminalConfirmation {
    fn confirm(&self, prompt: &str) -> std::io::Result<Confirmation> {
        eprintln!("{prompt}");
        eprint!("\nThis action is IRREVERSIBLE. Type '{CONFIRMATION_TOKEN}' to confirm: ");
        std::io::stderr().flush()?;

        let mut input = String::new();
        std::io::stdin().lock().read_line(&mut input)?;
        Ok(Confirmation::from_line(&input))
    }
}

/// Confirms without asking, for `--force`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ForcedConfirmation;

impl ConfirmationProvider for ForcedConfirmation {
    fn confirm(&self, _prompt: &str) -> std::io::Result<Confirmation> {
        Ok(Confirmation::Forced)
    }
}
