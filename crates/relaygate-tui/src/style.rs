//! Styled terminal output shared by the wizard, the menu and the viewers

use std::io::{self, Write};

use crossterm::cursor::MoveUp;
use crossterm::execute;
use crossterm::style::{Attribute, Color, Print, ResetColor, SetAttribute, SetForegroundColor};
use crossterm::terminal::{Clear, ClearType};

/// Colored line printer over any writer (stdout in practice)
pub struct Printer<W: Write> {
    out: W,
}

impl Printer<io::Stdout> {
    pub fn stdout() -> Self {
        Self { out: io::stdout() }
    }
}

impl<W: Write> Printer<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    pub fn out_mut(&mut self) -> &mut W {
        &mut self.out
    }

    pub fn header(&mut self, title: &str) -> io::Result<()> {
        execute!(
            self.out,
            SetForegroundColor(Color::Cyan),
            SetAttribute(Attribute::Bold),
            Print(format!("◆ {}\n", title)),
            ResetColor,
            SetAttribute(Attribute::Reset),
        )
    }

    pub fn step(&mut self, current: u8, total: u8, title: &str) -> io::Result<()> {
        execute!(
            self.out,
            SetForegroundColor(Color::Blue),
            Print(format!("[{}/{}] ", current, total)),
            SetForegroundColor(Color::White),
            SetAttribute(Attribute::Bold),
            Print(title),
            ResetColor,
            SetAttribute(Attribute::Reset),
            Print("\n"),
        )
    }

    pub fn success(&mut self, message: &str) -> io::Result<()> {
        self.marked(Color::Green, "✓", message)
    }

    pub fn error(&mut self, message: &str) -> io::Result<()> {
        self.marked(Color::Red, "✗", message)
    }

    pub fn warning(&mut self, message: &str) -> io::Result<()> {
        self.marked(Color::Yellow, "!", message)
    }

    pub fn action(&mut self, message: &str) -> io::Result<()> {
        self.marked(Color::Cyan, "●", message)
    }

    fn marked(&mut self, color: Color, mark: &str, message: &str) -> io::Result<()> {
        execute!(
            self.out,
            SetForegroundColor(color),
            Print(format!("  {} ", mark)),
            ResetColor,
            Print(message),
            Print("\n"),
        )
    }

    pub fn dim(&mut self, message: &str) -> io::Result<()> {
        execute!(
            self.out,
            SetForegroundColor(Color::DarkGrey),
            Print(format!("  {}\n", message)),
            ResetColor,
        )
    }

    /// `label: value` with the label dimmed
    pub fn field(&mut self, label: &str, value: &str) -> io::Result<()> {
        execute!(
            self.out,
            SetForegroundColor(Color::DarkGrey),
            Print(format!("  {:<18}", format!("{}:", label))),
            ResetColor,
            Print(value),
            Print("\n"),
        )
    }

    pub fn line(&mut self, text: &str) -> io::Result<()> {
        writeln!(self.out, "{}", text)?;
        self.out.flush()
    }

    pub fn blank(&mut self) -> io::Result<()> {
        self.line("")
    }

    /// Erase the previous `lines` lines (collapses an answered prompt)
    pub fn clear_lines(&mut self, lines: u16) -> io::Result<()> {
        for _ in 0..lines {
            execute!(self.out, MoveUp(1), Clear(ClearType::CurrentLine))?;
        }
        Ok(())
    }
}
