use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};

use keycard::core::errors::KeycardError;

static VERBOSE: AtomicBool = AtomicBool::new(false);

/// Enable `detail` lines and full error chains.
pub fn set_verbose(verbose: bool) {
    VERBOSE.store(verbose, Ordering::Relaxed);
}

pub fn is_verbose() -> bool {
    VERBOSE.load(Ordering::Relaxed)
}

// Status goes to stderr: stdout may be carrying ciphertext or plaintext.

/// Print a success message.
pub fn success(msg: &str) {
    eprintln!("  {} {}", "✓".green(), msg);
}

/// Print a warning message.
pub fn warning(msg: &str) {
    eprintln!("  {} {}", "⚠".yellow(), msg);
}

/// Print an error message.
pub fn error(msg: &str) {
    eprintln!("  {} {}", "✗".red(), msg);
}

/// Print a dimmed line, only in verbose mode.
pub fn detail(msg: &str) {
    if is_verbose() {
        eprintln!("    {}", msg.dimmed());
    }
}

/// Start a spinner on stderr. Hidden automatically when stderr is not a terminal.
pub fn spinner(msg: &str) -> ProgressBar {
    let sp = ProgressBar::new_spinner();
    sp.set_style(
        ProgressStyle::default_spinner()
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ "),
    );
    sp.set_message(msg.to_string());
    sp.enable_steady_tick(Duration::from_millis(80));
    sp
}

/// Stop a spinner and print a success line in its place.
pub fn finish_spinner(sp: ProgressBar, msg: &str) {
    sp.finish_and_clear();
    success(msg);
}

/// Stop a spinner without a message (the caller reports the error).
pub fn abandon_spinner(sp: ProgressBar) {
    sp.finish_and_clear();
}

/// Print rows under a header, each column padded to its widest cell.
pub fn table(headers: &[&str], rows: &[Vec<String>]) {
    print!("{}", render_table(headers, rows));
}

fn render_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if let Some(w) = widths.get_mut(i) {
                *w = (*w).max(cell.chars().count());
            }
        }
    }

    let line = |cells: Vec<&str>| {
        let padded: Vec<String> = cells
            .iter()
            .zip(&widths)
            .map(|(c, w)| format!("{c:<w$}"))
            .collect();
        padded.join("  ").trim_end().to_string() + "\n"
    };

    let mut out = line(headers.to_vec());
    for row in rows {
        out.push_str(&line(row.iter().map(String::as_str).collect()));
    }
    out
}

/// Report a failed command on stderr.
///
/// Normal mode prints the context chain on one line, with aggregate members
/// on the following lines. Verbose mode lists every cause separately.
pub fn report_error(err: &KeycardError) {
    if is_verbose() {
        let chain = err.chain();
        error(&format!("Error: {}", chain[0].lines().next().unwrap_or_default()));
        if chain.len() > 1 {
            eprintln!("\n  Caused by:");
        }
        // Aggregate members are listed below with their own chains.
        for cause in chain.iter().skip(1) {
            eprintln!("    - {}", cause.lines().next().unwrap_or_default());
        }
        for (i, member) in err.aggregated().iter().enumerate() {
            eprintln!("\n  Failure {}:", i + 1);
            for cause in member.chain() {
                eprintln!("    - {cause}");
            }
        }
    } else {
        error(&format!("Error: {}", err.chain_line()));
    }
}
