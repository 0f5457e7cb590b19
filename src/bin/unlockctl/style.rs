//! Terminal styling utilities

use colored::Colorize;

pub fn print_success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

pub fn print_warning(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

pub fn print_info(msg: &str) {
    println!("{} {}", "ℹ".cyan(), msg);
}

pub fn print_header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()));
}

/// Signed points, red when negative
pub fn format_points(value: i64) -> String {
    if value < 0 {
        value.to_string().red().to_string()
    } else {
        format!("+{}", value).green().to_string()
    }
}
