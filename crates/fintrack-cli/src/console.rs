//! Terminal input and output helpers.

use std::io::{self, Write};

use anyhow::Result;
use fintrack_core::{Notice, NoticeLevel, Notifier};
use tracing::debug;

/// Prints notices to stderr as they arrive.
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn notify(&self, notice: Notice) {
        debug!(level = ?notice.level, message = %notice.message, "Notice");
        eprintln!("{}{}", prefix(notice.level), notice.message);
    }
}

fn prefix(level: NoticeLevel) -> &'static str {
    match level {
        NoticeLevel::Success => "✓ ",
        NoticeLevel::Info => "",
        NoticeLevel::Warning => "warning: ",
        NoticeLevel::Error => "error: ",
    }
}

pub fn prompt_username(default: Option<&str>) -> Result<String> {
    match default {
        Some(name) => print!("Username [{}]: ", name),
        None => print!("Username: "),
    }
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    let input = input.trim();

    Ok(match default {
        Some(name) if input.is_empty() => name.to_string(),
        _ => input.to_string(),
    })
}

pub fn prompt_password(label: &str) -> Result<String> {
    Ok(rpassword::prompt_password(label)?)
}
