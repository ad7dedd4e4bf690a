//! Text receipts handed to the platform print command.

use async_trait::async_trait;
use chrono::Utc;
use orders_core::{CoreError, OrderMatch, ReceiptPrinter, ReceiptSettings};
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info};

/// Writes a fixed-width receipt per order and sends it to the spooler.
#[derive(Debug, Clone)]
pub struct SpoolerReceiptPrinter {
    dir: PathBuf,
    /// Program and leading arguments; the receipt path is appended.
    command: Vec<String>,
    width: usize,
}

impl SpoolerReceiptPrinter {
    pub fn new(dir: impl Into<PathBuf>, print_command: &str, width: usize) -> Self {
        Self {
            dir: dir.into(),
            command: print_command.split_whitespace().map(str::to_string).collect(),
            width: width.max(8),
        }
    }

    pub fn from_settings(dir: impl Into<PathBuf>, settings: &ReceiptSettings) -> Self {
        Self::new(dir, &settings.print_command, settings.width)
    }

    pub fn receipt_path(&self, username: &str, order: &OrderMatch, epoch: i64) -> PathBuf {
        self.dir.join(format!(
            "print_{}_{}_{}.txt",
            file_safe(username),
            order.tag(),
            epoch
        ))
    }

    /// Username centered on the first line, comment text centered below it.
    pub fn render(&self, username: &str, text: &str) -> String {
        let rule = "-".repeat(self.width);
        let mut lines = vec![rule.clone()];
        lines.extend(wrap(username, self.width).iter().map(|line| center(line, self.width)));
        lines.push(String::new());
        lines.extend(wrap(text, self.width).iter().map(|line| center(line, self.width)));
        lines.push(rule);
        let mut receipt = lines.join("\n");
        receipt.push('\n');
        receipt
    }

    async fn spool(&self, path: &Path) -> Result<(), CoreError> {
        let Some((program, args)) = self.command.split_first() else {
            debug!("No print command configured, leaving {}", path.display());
            return Ok(());
        };

        let status = Command::new(program)
            .args(args)
            .arg(path)
            .status()
            .await
            .map_err(|e| CoreError::Receipt {
                message: format!("cannot run {}: {}", program, e),
            })?;

        if status.success() {
            Ok(())
        } else {
            Err(CoreError::Receipt {
                message: format!("{} exited with {}", program, status),
            })
        }
    }
}

#[async_trait]
impl ReceiptPrinter for SpoolerReceiptPrinter {
    async fn print_receipt(
        &self,
        username: &str,
        text: &str,
        order: &OrderMatch,
    ) -> Result<(), CoreError> {
        let path = self.receipt_path(username, order, Utc::now().timestamp());
        let receipt_error = |e: std::io::Error| CoreError::Receipt {
            message: format!("cannot write {}: {}", path.display(), e),
        };

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(receipt_error)?;
        tokio::fs::write(&path, self.render(username, text))
            .await
            .map_err(receipt_error)?;

        self.spool(&path).await?;
        info!("Receipt sent to printer: {}", path.display());
        Ok(())
    }
}

fn file_safe(value: &str) -> String {
    value
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn wrap(text: &str, width: usize) -> Vec<String> {
    let chars: Vec<char> = text.trim().chars().collect();
    if chars.is_empty() {
        return vec![String::new()];
    }
    chars
        .chunks(width)
        .map(|chunk| chunk.iter().collect())
        .collect()
}

fn center(line: &str, width: usize) -> String {
    let len = line.chars().count();
    if len >= width {
        return line.to_string();
    }
    let left = (width - len) / 2;
    format!("{}{}", " ".repeat(left), line)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order() -> OrderMatch {
        OrderMatch::Grouped {
            number: 12,
            letter: 'A',
            group: 5,
        }
    }

    #[test]
    fn test_render_centers_lines() {
        let printer = SpoolerReceiptPrinter::new("images", "", 10);
        let receipt = printer.render("bob", "A5+12");
        let lines: Vec<&str> = receipt.lines().collect();
        assert_eq!(lines[0], "----------");
        assert_eq!(lines[1], "   bob");
        assert_eq!(lines[2], "");
        assert_eq!(lines[3], "  A5+12");
        assert_eq!(lines[4], "----------");
    }

    #[test]
    fn test_render_wraps_long_text() {
        let printer = SpoolerReceiptPrinter::new("images", "", 8);
        let receipt = printer.render("buyer", "A5+12 and C3+7 please");
        assert!(receipt.lines().all(|line| line.chars().count() <= 8));
    }

    #[test]
    fn test_receipt_path() {
        let printer = SpoolerReceiptPrinter::new("images", "lp", 32);
        assert_eq!(
            printer.receipt_path("shop.buyer", &order(), 1700000000),
            PathBuf::from("images/print_shop.buyer_A5_12_1700000000.txt")
        );
        assert_eq!(
            printer.receipt_path("a/b", &order(), 1),
            PathBuf::from("images/print_a_b_A5_12_1.txt")
        );
    }

    #[tokio::test]
    async fn test_print_without_command_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let printer = SpoolerReceiptPrinter::new(dir.path().join("images"), "", 16);
        printer.print_receipt("buyer", "A5+12", &order()).await.unwrap();

        let entries: Vec<_> = std::fs::read_dir(dir.path().join("images"))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(entries.len(), 1);
        let content = std::fs::read_to_string(entries[0].path()).unwrap();
        assert!(content.contains("buyer"));
    }

    #[tokio::test]
    async fn test_missing_print_command_is_a_receipt_error() {
        let dir = tempfile::tempdir().unwrap();
        let printer =
            SpoolerReceiptPrinter::new(dir.path(), "definitely-not-a-print-command-xyz", 16);
        let result = printer.print_receipt("buyer", "A5+12", &order()).await;
        assert!(matches!(result, Err(CoreError::Receipt { .. })));
    }
}
