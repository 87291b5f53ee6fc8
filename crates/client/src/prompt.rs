use std::io::{self, BufRead, Write};

use stopwait::RetryDecision;

/// Asks on the terminal whether to keep waiting. Anything but a yes stops.
pub fn ask_to_continue(attempts: u32) -> RetryDecision {
    let mut stderr = io::stderr();
    let _ = write!(
        stderr,
        "No reply after {} retransmissions. Keep trying? [y/N] ",
        attempts
    );
    let _ = stderr.flush();

    let mut answer = String::new();
    match io::stdin().lock().read_line(&mut answer) {
        Ok(_) => parse_answer(&answer),
        Err(_) => RetryDecision::Stop,
    }
}

fn parse_answer(answer: &str) -> RetryDecision {
    match answer.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => RetryDecision::Continue,
        _ => RetryDecision::Stop,
    }
}
