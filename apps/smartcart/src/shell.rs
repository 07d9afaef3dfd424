use std::io::Write;
use std::sync::Arc;

use cart_sdk::{InMemoryCartBackend, LineId, SearchHit};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

use crate::engine::PromptResolution;
use crate::error::SessionError;
use crate::metrics;
use crate::observer::{CartObserver, Notice, PendingPrompt, RenderFrame};
use crate::session::SessionHandle;

const HELP: &str = "\
commands:
  start | stop          start or stop the camera capture session
  cart | refresh        show the cached cart | re-read it from the server
  inc <id> | dec <id>   change a line's quantity
  rm <id>               remove a line
  clear | checkout      empty the cart | pay
  search <query>        look up products
  add <name>            add one unit of a product by name
  yes | drop | cancel   answer a duplicate prompt
  metrics               print counters
  help | quit";

const OFFLINE_HELP: &str = "  scan <name>           simulate a detection (offline mode)";

#[derive(Debug, Clone, PartialEq)]
pub enum ShellCommand {
    Start,
    Stop,
    Cart,
    Refresh,
    Increment(LineId),
    Decrement(LineId),
    Remove(LineId),
    Clear,
    Search(String),
    Add(String),
    Resolve(PromptResolution),
    Checkout,
    Metrics,
    Help,
    Quit,
    Scan(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("unknown command '{0}' (try 'help')")]
    Unknown(String),
    #[error("'{0}' needs an argument")]
    MissingArgument(&'static str),
    #[error("'{0}' is not a line id")]
    BadId(String),
}

impl ShellCommand {
    /// Parses one input line. Blank lines yield `None`.
    pub fn parse(line: &str) -> Result<Option<Self>, ParseError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };
        let command = match word.to_ascii_lowercase().as_str() {
            "start" => ShellCommand::Start,
            "stop" => ShellCommand::Stop,
            "cart" | "ls" => ShellCommand::Cart,
            "refresh" => ShellCommand::Refresh,
            "inc" | "+" => ShellCommand::Increment(parse_id("inc", rest)?),
            "dec" | "-" => ShellCommand::Decrement(parse_id("dec", rest)?),
            "rm" | "remove" => ShellCommand::Remove(parse_id("rm", rest)?),
            "clear" => ShellCommand::Clear,
            "search" => ShellCommand::Search(required("search", rest)?),
            "add" => ShellCommand::Add(required("add", rest)?),
            "yes" => ShellCommand::Resolve(PromptResolution::Increment),
            "drop" => ShellCommand::Resolve(PromptResolution::Remove),
            "cancel" => ShellCommand::Resolve(PromptResolution::Cancel),
            "checkout" | "pay" => ShellCommand::Checkout,
            "metrics" => ShellCommand::Metrics,
            "help" | "?" => ShellCommand::Help,
            "quit" | "exit" => ShellCommand::Quit,
            "scan" => ShellCommand::Scan(required("scan", rest)?),
            other => return Err(ParseError::Unknown(other.to_string())),
        };
        Ok(Some(command))
    }
}

fn required(command: &'static str, rest: &str) -> Result<String, ParseError> {
    if rest.is_empty() {
        Err(ParseError::MissingArgument(command))
    } else {
        Ok(rest.to_string())
    }
}

fn parse_id(command: &'static str, rest: &str) -> Result<LineId, ParseError> {
    let raw = required(command, rest)?;
    raw.parse::<i64>()
        .map(LineId)
        .map_err(|_| ParseError::BadId(raw))
}

/// Prints frames, notices and prompts to stdout.
#[derive(Debug, Default)]
pub struct ConsoleObserver;

impl CartObserver for ConsoleObserver {
    fn render(&self, frame: &RenderFrame) {
        println!("{}", format_frame(frame));
    }

    fn notify(&self, notice: &Notice) {
        println!("{notice}");
    }

    fn prompt(&self, prompt: Option<&PendingPrompt>) {
        if let Some(prompt) = prompt {
            println!("? {} [yes / drop / cancel]", prompt.message());
        }
    }

    fn chime(&self) -> anyhow::Result<()> {
        let mut stdout = std::io::stdout().lock();
        stdout.write_all(b"\x07")?;
        stdout.flush()?;
        Ok(())
    }
}

pub fn format_frame(frame: &RenderFrame) -> String {
    if frame.is_empty() {
        return "cart is empty (total 0.00)".to_string();
    }
    let mut out = format!(
        "cart: {} item(s), total {}",
        frame.item_count,
        frame.total_label()
    );
    for line in &frame.lines {
        let marker = if frame.highlight == Some(line.id) { '*' } else { ' ' };
        out.push_str(&format!(
            "\n {marker} [{}] {} x{} @ {:.2} = {:.2}",
            line.id,
            line.name,
            line.quantity,
            line.price,
            line.subtotal()
        ));
    }
    out
}

/// Reads commands from stdin until `quit` or end of input.
///
/// `detector` is the in-process backend in offline mode; it enables `scan`.
pub async fn run_shell(
    handle: SessionHandle,
    detector: Option<Arc<InMemoryCartBackend>>,
) -> anyhow::Result<()> {
    print_help(detector.is_some());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let command = match ShellCommand::parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(err) => {
                println!("{err}");
                continue;
            }
        };
        if command == ShellCommand::Quit {
            break;
        }
        match execute(&handle, detector.as_deref(), command).await {
            Ok(()) => {}
            Err(SessionError::SessionClosed) => {
                handle.shutdown();
                anyhow::bail!("cart session closed");
            }
            // The observer has already shown the user-facing notice.
            Err(err) => debug!(target = "smartcart::shell", error = %err, "command failed"),
        }
    }
    handle.shutdown();
    Ok(())
}

async fn execute(
    handle: &SessionHandle,
    detector: Option<&InMemoryCartBackend>,
    command: ShellCommand,
) -> Result<(), SessionError> {
    match command {
        ShellCommand::Start => handle.start_capture().await,
        ShellCommand::Stop => handle.stop_capture().await,
        ShellCommand::Cart => {
            let snapshot = handle.snapshot().await?;
            println!("{}", format_frame(&snapshot.frame));
            if let Some(prompt) = snapshot.prompt {
                println!("? {} [yes / drop / cancel]", prompt.message());
            }
            println!(
                "capture {}, polling {:?}",
                if snapshot.capture_active { "on" } else { "off" },
                snapshot.poller
            );
            Ok(())
        }
        ShellCommand::Refresh => handle.refresh().await,
        ShellCommand::Increment(id) => handle.increment(id).await,
        ShellCommand::Decrement(id) => handle.decrement(id).await,
        ShellCommand::Remove(id) => {
            let outcome = handle.remove(id).await?;
            if !outcome.confirmed {
                println!("removed locally; the server has not confirmed yet");
            }
            Ok(())
        }
        ShellCommand::Clear => handle.clear().await,
        ShellCommand::Search(query) => {
            let hits = handle.search(query).await?;
            if hits.is_empty() {
                println!("no products found");
            }
            for hit in hits {
                println!("  {} ({:.2}) {}", hit.name, hit.price, hit.description);
            }
            Ok(())
        }
        ShellCommand::Add(name) => {
            let hits = handle.search(name.clone()).await?;
            let Some(hit) = pick_hit(&name, hits) else {
                println!("no product named '{name}'");
                return Ok(());
            };
            handle
                .add_by_name(hit.name, hit.price, hit.description)
                .await
                .map(|_| ())
        }
        ShellCommand::Resolve(resolution) => handle.resolve_prompt(resolution).await,
        ShellCommand::Checkout => handle.checkout().await.map(|_| ()),
        ShellCommand::Metrics => {
            println!("{}", String::from_utf8_lossy(&metrics::gather()));
            Ok(())
        }
        ShellCommand::Help => {
            print_help(detector.is_some());
            Ok(())
        }
        ShellCommand::Quit => Ok(()),
        ShellCommand::Scan(name) => {
            let Some(detector) = detector else {
                println!("scan is only available in offline mode");
                return Ok(());
            };
            if !detector.detect(&name).await {
                println!("nothing detected (is capture running? is '{name}' stocked?)");
            }
            Ok(())
        }
    }
}

/// Prefers an exact (case-insensitive) name match over the first hit.
fn pick_hit(name: &str, hits: Vec<SearchHit>) -> Option<SearchHit> {
    let exact = hits
        .iter()
        .position(|hit| hit.name.eq_ignore_ascii_case(name));
    match exact {
        Some(index) => hits.into_iter().nth(index),
        None => hits.into_iter().next(),
    }
}

fn print_help(offline: bool) {
    println!("{HELP}");
    if offline {
        println!("{OFFLINE_HELP}");
    }
}

#[cfg(test)]
mod tests {
    use cart_sdk::CartLine;

    use super::*;

    #[test_timeout::timeout]
    fn parses_commands_with_arguments() {
        assert_eq!(
            ShellCommand::parse("inc 7").unwrap(),
            Some(ShellCommand::Increment(LineId(7)))
        );
        assert_eq!(
            ShellCommand::parse("  search  marie biscuits ").unwrap(),
            Some(ShellCommand::Search("marie biscuits".into()))
        );
        assert_eq!(
            ShellCommand::parse("DROP").unwrap(),
            Some(ShellCommand::Resolve(PromptResolution::Remove))
        );
        assert_eq!(ShellCommand::parse("   ").unwrap(), None);
    }

    #[test_timeout::timeout]
    fn reports_bad_input() {
        assert_eq!(
            ShellCommand::parse("rm").unwrap_err(),
            ParseError::MissingArgument("rm")
        );
        assert_eq!(
            ShellCommand::parse("dec milk").unwrap_err(),
            ParseError::BadId("milk".into())
        );
        assert_eq!(
            ShellCommand::parse("dance").unwrap_err(),
            ParseError::Unknown("dance".into())
        );
    }

    #[test_timeout::timeout]
    fn frame_marks_highlighted_line() {
        let frame = RenderFrame {
            lines: vec![CartLine {
                id: LineId(3),
                name: "Milk".into(),
                price: 60.0,
                description: "1L".into(),
                quantity: 2,
            }],
            total: 120.0,
            item_count: 2,
            highlight: Some(LineId(3)),
        };
        let text = format_frame(&frame);
        assert!(text.starts_with("cart: 2 item(s), total 120.00"));
        assert!(text.contains(" * [3] Milk x2 @ 60.00 = 120.00"));
    }

    #[test_timeout::timeout]
    fn exact_hit_wins() {
        let hit = |name: &str| SearchHit {
            name: name.into(),
            price: 1.0,
            description: String::new(),
        };
        let picked = pick_hit("milk", vec![hit("Milk Bread"), hit("Milk")]).unwrap();
        assert_eq!(picked.name, "Milk");
        let picked = pick_hit("bread", vec![hit("Milk Bread")]).unwrap();
        assert_eq!(picked.name, "Milk Bread");
    }
}
