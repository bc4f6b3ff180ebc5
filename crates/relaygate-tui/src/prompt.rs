//! Line prompts on top of rustyline

use std::io::Stdout;

use crossterm::execute;
use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::{Config, Editor};

use crate::style::Printer;

const PROMPT: &str = "\x1b[36m  › \x1b[0m";

/// Reads answers; `None` means the operator pressed Ctrl+C or Ctrl+D
pub struct Prompter {
    editor: Editor<(), DefaultHistory>,
}

impl Prompter {
    pub fn new() -> anyhow::Result<Self> {
        let config = Config::builder().auto_add_history(false).build();
        Ok(Self {
            editor: Editor::with_config(config)?,
        })
    }

    /// Ask for free text, showing `placeholder` as a hint
    pub fn text(
        &mut self,
        printer: &mut Printer<Stdout>,
        label: &str,
        placeholder: &str,
    ) -> anyhow::Result<Option<String>> {
        execute!(
            printer.out_mut(),
            SetForegroundColor(Color::White),
            Print(format!("  {} ", label)),
            SetForegroundColor(Color::DarkGrey),
            Print(format!("({})\n", placeholder)),
            ResetColor,
        )?;

        match self.editor.readline(PROMPT) {
            Ok(line) => Ok(Some(line.trim().to_string())),
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Like [`Prompter::text`], but an empty answer yields `default`
    pub fn text_or(
        &mut self,
        printer: &mut Printer<Stdout>,
        label: &str,
        default: &str,
    ) -> anyhow::Result<Option<String>> {
        Ok(self
            .text(printer, label, &format!("default {}", default))?
            .map(|answer| {
                if answer.is_empty() {
                    default.to_string()
                } else {
                    answer
                }
            }))
    }

    pub fn confirm(
        &mut self,
        printer: &mut Printer<Stdout>,
        label: &str,
        default: bool,
    ) -> anyhow::Result<Option<bool>> {
        let hint = if default { "Y/n" } else { "y/N" };
        let Some(answer) = self.text(printer, label, hint)? else {
            return Ok(None);
        };
        Ok(Some(parse_yes_no(&answer).unwrap_or(default)))
    }
}

/// `Some(true)` for yes, `Some(false)` for no, `None` for anything else
pub fn parse_yes_no(answer: &str) -> Option<bool> {
    match answer.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => Some(true),
        "n" | "no" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_yes_no() {
        assert_eq!(parse_yes_no("Y"), Some(true));
        assert_eq!(parse_yes_no(" no "), Some(false));
        assert_eq!(parse_yes_no(""), None);
        assert_eq!(parse_yes_no("maybe"), None);
    }
}
