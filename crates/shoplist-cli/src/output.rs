//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use serde_json::json;

use shoplist_core::{Comment, Item, ShareLink, ShoppingList};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Output helper for consistent formatting
pub struct Output {
    /// The output format
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn is_quiet(&self) -> bool {
        matches!(self.format, OutputFormat::Quiet)
    }

    /// Print a whole list: header, items, and comments
    pub fn print_list(&self, list: &ShoppingList, items: &[Item], comments: &[Comment]) {
        match self.format {
            OutputFormat::Human => {
                let remaining = items.iter().filter(|i| !i.completed).count();
                println!("{}  ({} of {} left)", list.name, remaining, items.len());
                println!("{}", "─".repeat(40));
                if items.is_empty() {
                    println!("No items yet.");
                }
                for item in items {
                    println!("{}", item_line(item));
                }
                if !comments.is_empty() {
                    println!();
                    println!("── Comments ({}) ──", comments.len());
                    for comment in comments {
                        println!("{}", comment_line(comment));
                    }
                }
            }
            OutputFormat::Json => {
                println!("{}", list_json(list, items, comments));
            }
            OutputFormat::Quiet => {
                for item in items {
                    println!("{}", item.id);
                }
            }
        }
    }

    pub fn print_created_list(&self, list: &ShoppingList, link: &ShareLink) {
        match self.format {
            OutputFormat::Human => {
                println!("✓ Created list: {}", list.name);
                println!("ID:    {}", list.id);
                println!("Share: {}", link);
            }
            OutputFormat::Json => {
                println!(
                    "{}",
                    json!({ "list": list, "share_url": link.url })
                );
            }
            OutputFormat::Quiet => println!("{}", list.id),
        }
    }

    pub fn print_item(&self, item: &Item) {
        match self.format {
            OutputFormat::Human => println!("{}", item_line(item)),
            OutputFormat::Json => println!("{}", json!(item)),
            OutputFormat::Quiet => println!("{}", item.id),
        }
    }

    pub fn print_comment(&self, comment: &Comment) {
        match self.format {
            OutputFormat::Human => println!("{}", comment_line(comment)),
            OutputFormat::Json => println!("{}", json!(comment)),
            OutputFormat::Quiet => println!("{}", comment.id),
        }
    }

    pub fn print_share_link(&self, list: &ShoppingList, link: &ShareLink) {
        match self.format {
            OutputFormat::Human => {
                println!("Share \"{}\" with this link:", list.name);
                println!("  {}", link);
            }
            OutputFormat::Json => {
                println!(
                    "{}",
                    json!({ "list_id": list.id, "name": list.name, "share_url": link.url })
                );
            }
            OutputFormat::Quiet => println!("{}", link),
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    json!({"status": "success", "message": message})
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print an informational message
    pub fn message(&self, msg: &str) {
        match self.format {
            OutputFormat::Human => println!("{}", msg),
            OutputFormat::Json => {
                println!("{}", json!({"message": msg}));
            }
            OutputFormat::Quiet => {}
        }
    }
}

/// JSON document for a list and its contents
fn list_json(list: &ShoppingList, items: &[Item], comments: &[Comment]) -> serde_json::Value {
    json!({
        "list": list,
        "items": items,
        "comments": comments,
    })
}

fn item_line(item: &Item) -> String {
    let mark = if item.completed { "x" } else { " " };
    format!(
        "[{}] {}  {}",
        mark,
        truncate(&item.text, 50),
        &item.id.to_string()[..8]
    )
}

fn comment_line(comment: &Comment) -> String {
    format!(
        "[{}] {}",
        comment.created_at.format("%Y-%m-%d %H:%M"),
        truncate_line(&comment.content, 60)
    )
}

/// Truncate a string to max characters, adding "..." if truncated
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Truncate to first line and max length
fn truncate_line(s: &str, max_len: usize) -> String {
    let first_line = s.lines().next().unwrap_or("");
    truncate(first_line, max_len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    fn item(text: &str, completed: bool) -> Item {
        Item {
            id: Uuid::from_u128(0x1234_5678_0000_0000_0000_0000_0000_0001),
            list_id: Uuid::nil(),
            text: text.to_string(),
            completed,
            created_at: Utc.timestamp_opt(0, 0).unwrap(),
        }
    }

    #[test]
    fn test_format_from_flags() {
        assert_eq!(OutputFormat::from_flags(false, false), OutputFormat::Human);
        assert_eq!(OutputFormat::from_flags(true, false), OutputFormat::Json);
        assert_eq!(OutputFormat::from_flags(false, true), OutputFormat::Quiet);
        // Quiet takes precedence
        assert_eq!(OutputFormat::from_flags(true, true), OutputFormat::Quiet);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("this is a long string", 10), "this is...");
        // Multi-byte text is cut on character boundaries
        assert_eq!(truncate("äöüäöüäöüäöü", 6), "äöü...");
    }

    #[test]
    fn test_truncate_line() {
        assert_eq!(truncate_line("single line", 20), "single line");
        assert_eq!(truncate_line("line one\nline two", 20), "line one");
    }

    #[test]
    fn test_item_line_marks_completed() {
        assert_eq!(item_line(&item("Milk", false)), "[ ] Milk  12345678");
        assert_eq!(item_line(&item("Milk", true)), "[x] Milk  12345678");
    }

    #[test]
    fn test_list_json_shape() {
        let list = ShoppingList {
            id: Uuid::nil(),
            name: "Groceries".to_string(),
            created_at: Utc.timestamp_opt(0, 0).unwrap(),
        };
        let doc = list_json(&list, &[item("Milk", false)], &[]);
        assert_eq!(doc["list"]["name"], "Groceries");
        assert_eq!(doc["items"][0]["text"], "Milk");
        assert!(doc["comments"].as_array().unwrap().is_empty());
    }
}
