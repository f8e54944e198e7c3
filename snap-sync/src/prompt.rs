//! Operator interaction on the terminal.

use crate::volume::Volume;
use async_trait::async_trait;
use std::io::{BufRead, Write};
use tokio::sync::{mpsc, Mutex};

#[async_trait]
pub trait Prompt: Send + Sync {
    /// Ask a yes/no question; an empty answer means yes.
    async fn confirm(&self, message: &str) -> std::io::Result<bool>;

    /// Ask for a line of text.
    async fn ask(&self, message: &str) -> std::io::Result<String>;

    /// Let the operator pick a volume; `None` means they chose to exit.
    async fn select_volume(&self, volumes: &[Volume]) -> std::io::Result<Option<usize>>;
}

#[derive(Debug, PartialEq, Eq)]
pub enum Selection {
    Index(usize),
    Exit,
    Invalid,
}

pub fn parse_selection(input: &str, count: usize) -> Selection {
    let input = input.trim();
    if input.eq_ignore_ascii_case("x") {
        return Selection::Exit;
    }
    match input.parse::<usize>() {
        Ok(i) if i < count => Selection::Index(i),
        _ => Selection::Invalid,
    }
}

pub fn parse_confirmation(input: &str) -> Option<bool> {
    match input.trim().to_ascii_lowercase().as_str() {
        "" | "y" | "yes" => Some(true),
        "n" | "no" => Some(false),
        _ => None,
    }
}

/// Reads answers from stdin, writes questions to stdout.
///
/// Lines are read on a dedicated thread and handed over a channel, so an
/// abandoned question never holds up runtime shutdown.
pub struct TerminalPrompt {
    lines: Mutex<mpsc::UnboundedReceiver<std::io::Result<String>>>,
}

impl TerminalPrompt {
    pub fn new() -> Self {
        Self::from_reader(std::io::BufReader::new(std::io::stdin()))
    }

    /// Answer questions from `reader` instead of stdin.
    pub fn from_reader<R: BufRead + Send + 'static>(reader: R) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        std::thread::spawn(move || {
            for line in reader.lines() {
                let failed = line.is_err();
                if tx.send(line).is_err() || failed {
                    break;
                }
            }
        });
        Self { lines: Mutex::new(rx) }
    }

    async fn read_line(&self, message: &str) -> std::io::Result<String> {
        print!("{}", message);
        std::io::stdout().flush()?;
        let mut lines = self.lines.lock().await;
        match lines.recv().await {
            Some(line) => line,
            None => Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "stdin closed while waiting for an answer",
            )),
        }
    }
}

impl Default for TerminalPrompt {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Prompt for TerminalPrompt {
    async fn confirm(&self, message: &str) -> std::io::Result<bool> {
        loop {
            let answer = self.read_line(&format!("{} [Y/n]: ", message)).await?;
            match parse_confirmation(&answer) {
                Some(yes) => return Ok(yes),
                None => println!("Please answer y or n."),
            }
        }
    }

    async fn ask(&self, message: &str) -> std::io::Result<String> {
        Ok(self.read_line(&format!("{}: ", message)).await?.trim().to_string())
    }

    async fn select_volume(&self, volumes: &[Volume]) -> std::io::Result<Option<usize>> {
        println!("Available btrfs mount points:");
        for (i, volume) in volumes.iter().enumerate() {
            println!("  {}) {}", i, volume);
        }
        loop {
            let answer = self
                .read_line(&format!("Select a mount point [0-{}, x to exit]: ", volumes.len().saturating_sub(1)))
                .await?;
            match parse_selection(&answer, volumes.len()) {
                Selection::Index(i) => return Ok(Some(i)),
                Selection::Exit => return Ok(None),
                Selection::Invalid => println!("No selection made, try again."),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufReader, Cursor, Read};
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    #[test]
    fn test_parse_selection() {
        assert_eq!(parse_selection("1", 3), Selection::Index(1));
        assert_eq!(parse_selection(" 0 \n", 3), Selection::Index(0));
        assert_eq!(parse_selection("3", 3), Selection::Invalid);
        assert_eq!(parse_selection("X", 3), Selection::Exit);
        assert_eq!(parse_selection("abc", 3), Selection::Invalid);
    }

    #[test]
    fn test_parse_confirmation() {
        assert_eq!(parse_confirmation(""), Some(true));
        assert_eq!(parse_confirmation("Yes"), Some(true));
        assert_eq!(parse_confirmation("n"), Some(false));
        assert_eq!(parse_confirmation("maybe"), None);
    }

    #[tokio::test]
    async fn test_answers_from_reader() {
        let prompt = TerminalPrompt::from_reader(Cursor::new("maybe\nn\n  backups  \n"));
        assert!(!prompt.confirm("Continue?").await.unwrap());
        assert_eq!(prompt.ask("Directory").await.unwrap(), "backups");

        let err = prompt.ask("Again").await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
    }

    /// A reader that never produces a line while its sender is alive.
    struct Silent(std::sync::mpsc::Receiver<()>);

    impl Read for Silent {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            let _ = self.0.recv();
            Ok(0)
        }
    }

    #[test]
    fn test_abandoned_question_does_not_block_shutdown() {
        let (_keep_open, silent) = std::sync::mpsc::channel::<()>();
        let (done_tx, done_rx) = std::sync::mpsc::channel();

        std::thread::spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            let cancelled = runtime.block_on(async {
                let prompt = TerminalPrompt::from_reader(BufReader::new(Silent(silent)));
                let cancel = CancellationToken::new();
                let trigger = cancel.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    trigger.cancel();
                });
                tokio::select! {
                    _ = prompt.confirm("Continue?") => false,
                    _ = cancel.cancelled() => true,
                }
            });
            drop(runtime);
            let _ = done_tx.send(cancelled);
        });

        let cancelled = done_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("runtime did not shut down while a question was pending");
        assert!(cancelled);
    }
}
