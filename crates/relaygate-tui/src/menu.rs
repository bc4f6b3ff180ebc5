//! Interactive main menu
//!
//! Runs on a blocking thread (rustyline reads stdin synchronously) and drives
//! the async command flows through a runtime handle.

use std::io::Stdout;
use std::path::PathBuf;
use std::sync::Arc;

use relaygate_core::ops::{self, Context};
use relaygate_core::{parse_port, AddPortOutcome, RestartInterval};
use tokio::runtime::Handle;

use crate::logs;
use crate::monitor;
use crate::prompt::Prompter;
use crate::setup::InstallWizard;
use crate::style::Printer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuChoice {
    Install,
    AddPort,
    Schedule,
    Logs,
    Monitor,
    Uninstall,
    Exit,
}

impl MenuChoice {
    const ENTRIES: [(MenuChoice, &'static str); 7] = [
        (MenuChoice::Install, "Install / reconfigure tunnel"),
        (MenuChoice::AddPort, "Add port"),
        (MenuChoice::Schedule, "Scheduled restart"),
        (MenuChoice::Logs, "Logs"),
        (MenuChoice::Monitor, "Monitor"),
        (MenuChoice::Uninstall, "Uninstall"),
        (MenuChoice::Exit, "Exit"),
    ];

    pub fn key(&self) -> &'static str {
        match self {
            MenuChoice::Install => "1",
            MenuChoice::AddPort => "2",
            MenuChoice::Schedule => "3",
            MenuChoice::Logs => "4",
            MenuChoice::Monitor => "5",
            MenuChoice::Uninstall => "6",
            MenuChoice::Exit => "0",
        }
    }

    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        Self::ENTRIES
            .iter()
            .map(|(choice, _)| *choice)
            .find(|choice| choice.key() == input)
    }
}

/// Log viewer entries, in menu order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogChoice {
    /// Index into `SystemPaths::all_logs`
    View(usize),
    Search,
    Back,
}

impl LogChoice {
    pub fn parse(input: &str, log_count: usize) -> Option<Self> {
        match input.trim() {
            "0" => Some(LogChoice::Back),
            "s" | "S" => Some(LogChoice::Search),
            other => match other.parse::<usize>() {
                Ok(n) if (1..=log_count).contains(&n) => Some(LogChoice::View(n - 1)),
                _ => None,
            },
        }
    }
}

pub struct Menu {
    ctx: Arc<Context>,
    runtime: Handle,
    exe: PathBuf,
    printer: Printer<Stdout>,
    prompter: Prompter,
}

impl Menu {
    pub fn new(ctx: Arc<Context>, runtime: Handle, exe: PathBuf) -> anyhow::Result<Self> {
        Ok(Self {
            ctx,
            runtime,
            exe,
            printer: Printer::stdout(),
            prompter: Prompter::new()?,
        })
    }

    /// Loop until the operator exits
    pub fn run(mut self) -> anyhow::Result<()> {
        loop {
            self.print_menu()?;
            let Some(answer) = self.prompter.text(&mut self.printer, "Choose", "0-6")? else {
                return Ok(());
            };
            let Some(choice) = MenuChoice::parse(&answer) else {
                self.printer.error(&format!("Unknown option '{}'", answer))?;
                continue;
            };

            let result = match choice {
                MenuChoice::Install => self.install(),
                MenuChoice::AddPort => self.add_port(),
                MenuChoice::Schedule => self.schedule(),
                MenuChoice::Logs => self.logs(),
                MenuChoice::Monitor => self.monitor(),
                MenuChoice::Uninstall => self.uninstall(),
                MenuChoice::Exit => return Ok(()),
            };
            if let Err(e) = result {
                tracing::error!("{:?} failed: {:#}", choice, e);
                self.printer.error(&format!("{:#}", e))?;
            }
        }
    }

    fn print_menu(&mut self) -> anyhow::Result<()> {
        self.printer.blank()?;
        self.printer.header("relaygate")?;
        for (choice, label) in MenuChoice::ENTRIES {
            self.printer.line(&format!("  {}) {}", choice.key(), label))?;
        }
        Ok(())
    }

    fn install(&mut self) -> anyhow::Result<()> {
        let Some(config) = InstallWizard::new().run(&mut self.printer, &mut self.prompter)? else {
            return Ok(());
        };
        ops::preflight(config.role)?;

        self.printer.action("Installing, this can take a minute...")?;
        let report = self
            .runtime
            .block_on(ops::install(&self.ctx, &config, self.exe.clone()))?;
        if let Some(bootstrap) = &report.bootstrap {
            self.printer.success(&format!(
                "Edge active for {} (rule {})",
                bootstrap.site.domain,
                bootstrap.rule_file.display()
            ))?;
        }
        self.printer.success("Service installed and started")?;
        Ok(())
    }

    fn add_port(&mut self) -> anyhow::Result<()> {
        let Some(answer) = self.prompter.text(&mut self.printer, "Port to add", "8880")? else {
            return Ok(());
        };
        let port = parse_port(&answer)?;
        match self.runtime.block_on(ops::add_port(&self.ctx, port))? {
            AddPortOutcome::Added(_) => self
                .printer
                .success(&format!("Port {} added, service restarted", port))?,
            AddPortOutcome::AlreadyExists => self
                .printer
                .warning(&format!("Port {} is already configured", port))?,
        }
        Ok(())
    }

    fn schedule(&mut self) -> anyhow::Result<()> {
        let manager = self.ctx.schedule();
        let current = self.runtime.block_on(manager.current())?;
        self.printer.field(
            "Current",
            &current.map(|i| format!("every {}", i)).unwrap_or_else(|| "off".to_string()),
        )?;

        let Some(answer) = self.prompter.text(
            &mut self.printer,
            "Restart every",
            "1h / 3h / 6h / 12h / 24h, or off",
        )?
        else {
            return Ok(());
        };

        if answer.eq_ignore_ascii_case("off") {
            self.runtime.block_on(manager.disable())?;
            self.printer.success("Scheduled restart disabled")?;
        } else {
            let interval: RestartInterval = answer.parse()?;
            self.runtime.block_on(manager.install(interval))?;
            self.printer
                .success(&format!("Service restarts every {}", interval))?;
        }
        Ok(())
    }

    fn logs(&mut self) -> anyhow::Result<()> {
        let all_logs = self.ctx.paths.all_logs();
        loop {
            self.printer.blank()?;
            self.printer.header("Logs")?;
            for (i, (label, path)) in all_logs.iter().enumerate() {
                self.printer
                    .line(&format!("  {}) {} ({})", i + 1, label, path.display()))?;
            }
            self.printer.line("  s) Search all logs")?;
            self.printer.line("  0) Back")?;

            let Some(answer) = self.prompter.text(&mut self.printer, "Choose", "1-5, s, 0")? else {
                return Ok(());
            };
            match LogChoice::parse(&answer, all_logs.len()) {
                Some(LogChoice::Back) => return Ok(()),
                Some(LogChoice::View(i)) => {
                    let path = &all_logs[i].1;
                    self.printer.dim("Following, Ctrl+C to stop")?;
                    let mut out = std::io::stdout();
                    self.runtime.block_on(logs::follow(path, &mut out, async {
                        let _ = tokio::signal::ctrl_c().await;
                    }))?;
                }
                Some(LogChoice::Search) => {
                    let Some(keyword) = self.prompter.text(&mut self.printer, "Keyword", "error")?
                    else {
                        continue;
                    };
                    let hits =
                        logs::print_search(&all_logs, &keyword, self.printer.out_mut())?;
                    self.printer.dim(&format!("{} match(es)", hits))?;
                }
                None => self.printer.error(&format!("Unknown option '{}'", answer))?,
            }
        }
    }

    fn monitor(&mut self) -> anyhow::Result<()> {
        let report = self
            .runtime
            .block_on(relaygate_core::status::collect(&self.ctx, 20))?;
        monitor::render(&mut self.printer, &report, chrono::Local::now())?;
        Ok(())
    }

    fn uninstall(&mut self) -> anyhow::Result<()> {
        let confirmed = self.prompter.confirm(
            &mut self.printer,
            "Remove the service, routing rules, certificates and config?",
            false,
        )?;
        if confirmed != Some(true) {
            self.printer.dim("Uninstall cancelled")?;
            return Ok(());
        }

        let report = self.runtime.block_on(ops::uninstall(&self.ctx));
        for warning in &report.warnings {
            self.printer.warning(warning)?;
        }
        self.printer.success("relaygate removed")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_menu_choice_parse() {
        assert_eq!(MenuChoice::parse("1"), Some(MenuChoice::Install));
        assert_eq!(MenuChoice::parse(" 6 "), Some(MenuChoice::Uninstall));
        assert_eq!(MenuChoice::parse("0"), Some(MenuChoice::Exit));
        assert_eq!(MenuChoice::parse("7"), None);
        assert_eq!(MenuChoice::parse(""), None);
    }

    #[test]
    fn test_log_choice_parse() {
        assert_eq!(LogChoice::parse("1", 5), Some(LogChoice::View(0)));
        assert_eq!(LogChoice::parse("5", 5), Some(LogChoice::View(4)));
        assert_eq!(LogChoice::parse("6", 5), None);
        assert_eq!(LogChoice::parse("s", 5), Some(LogChoice::Search));
        assert_eq!(LogChoice::parse("0", 5), Some(LogChoice::Back));
    }
}
