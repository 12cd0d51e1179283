use chrono::Utc;
use colored::*;
use std::io::{self, Write};

pub struct Logger;

impl Logger {
    pub fn info(message: &str) {
        let timestamp = Self::get_timestamp();
        println!("{} {} {}", "ℹ".blue().bold(), format!("[{}]", timestamp).dimmed(), message);
        io::stdout().flush().unwrap();
    }

    pub fn warn(message: &str) {
        let timestamp = Self::get_timestamp();
        println!(
            "{} {} {}",
            "⚠".yellow().bold(),
            format!("[{}]", timestamp).dimmed(),
            message.yellow()
        );
        io::stdout().flush().unwrap();
    }

    pub fn error(message: &str) {
        let timestamp = Self::get_timestamp();
        println!("{} {} {}", "❌".red().bold(), format!("[{}]", timestamp).dimmed(), message.red());
        io::stdout().flush().unwrap();
    }

    pub fn success(message: &str) {
        let timestamp = Self::get_timestamp();
        println!(
            "{} {} {}",
            "✅".green().bold(),
            format!("[{}]", timestamp).dimmed(),
            message.green()
        );
        io::stdout().flush().unwrap();
    }

    // Specialized category loggers

    pub fn cache(message: &str) {
        let timestamp = Self::get_timestamp();
        println!(
            "{} {} {} {}",
            "🗄️".bright_blue().bold(),
            "CACHE".bright_blue().bold(),
            format!("[{}]", timestamp).dimmed(),
            Self::format_message(message)
        );
        io::stdout().flush().unwrap();
    }

    pub fn analytics(message: &str) {
        let timestamp = Self::get_timestamp();
        println!(
            "{} {} {} {}",
            "📊".cyan().bold(),
            "ANALYTICS".cyan().bold(),
            format!("[{}]", timestamp).dimmed(),
            Self::format_message(message)
        );
        io::stdout().flush().unwrap();
    }

    pub fn provider(message: &str) {
        let timestamp = Self::get_timestamp();
        println!(
            "{} {} {} {}",
            "🌐".magenta().bold(),
            "PROVIDER".magenta().bold(),
            format!("[{}]", timestamp).dimmed(),
            Self::format_message(message)
        );
        io::stdout().flush().unwrap();
    }

    pub fn header(title: &str) {
        println!();
        println!(
            "{} {} {}",
            "📈".green().bold(),
            "MarketPulse".green().bold(),
            format!("- {}", title).bright_white().bold()
        );
        println!("{}", "─".repeat(50).dimmed());
        io::stdout().flush().unwrap();
    }

    pub fn separator() {
        println!("{}", "─".repeat(50).dimmed());
        io::stdout().flush().unwrap();
    }

    // Highlight numbers, percentages and USD values in log lines
    fn format_message(message: &str) -> String {
        regex::Regex::new(r"(\$?[\d,]+\.?\d*%?|\$[\d,]+\.?\d*)")
            .unwrap()
            .replace_all(message, |caps: &regex::Captures| {
                caps[1].bright_white().bold().to_string()
            })
            .to_string()
    }

    fn get_timestamp() -> String {
        Utc::now().format("%H:%M:%S").to_string()
    }
}
