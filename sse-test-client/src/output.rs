use colored::*;
use std::time::Duration;

pub struct TestResult {
    pub name: String,
    pub passed: bool,
    pub duration: Duration,
    pub message: Option<String>,
}

impl TestResult {
    pub fn pass(name: &str, duration: Duration) -> Self {
        Self {
            name: name.to_string(),
            passed: true,
            duration,
            message: None,
        }
    }

    pub fn fail(name: &str, duration: Duration, message: String) -> Self {
        Self {
            name: name.to_string(),
            passed: false,
            duration,
            message: Some(message),
        }
    }
}

pub fn print_step(message: &str) {
    println!("{} {}", "→".blue(), message);
}

pub fn print_ok(message: &str) {
    println!("{} {}", "✓".green(), message);
}

pub fn print_chat(label: &str, user: &str, message: &str) {
    println!("{} {}: {}", format!("[{label}]").dimmed(), user.cyan().bold(), message);
}

pub fn print_test_summary(results: &[TestResult]) {
    for result in results {
        let status = if result.passed {
            "PASS".green().bold()
        } else {
            "FAIL".red().bold()
        };
        println!("{} {} ({:?})", status, result.name, result.duration);
        if let Some(message) = &result.message {
            println!("    {}", message.yellow());
        }
    }

    let passed = results.iter().filter(|r| r.passed).count();
    println!("\n{}/{} scenario(s) passed", passed, results.len());
}
