//! Interactive yes/no prompt on the terminal

use std::io::{BufRead, Write};

use anyhow::Result;

use cloudbak_core::ports::IConfirm;

/// Parses an answer; `None` when it is neither yes nor no
pub fn parse_answer(input: &str) -> Option<bool> {
    match input.trim().to_ascii_lowercase().as_str() {
        "yes" | "y" | "ok" => Some(true),
        "no" | "n" => Some(false),
        _ => None,
    }
}

/// [`IConfirm`] reading the answer from stdin
///
/// The question is repeated until the answer parses; end of input counts
/// as no.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdinConfirm;

#[async_trait::async_trait]
impl IConfirm for StdinConfirm {
    async fn confirm(&self, question: &str) -> Result<bool> {
        let question = question.to_string();
        let answer = tokio::task::spawn_blocking(move || -> std::io::Result<bool> {
            let stdin = std::io::stdin();
            let mut line = String::new();
            loop {
                eprint!("{} [y/n] ", question);
                std::io::stderr().flush()?;
                line.clear();
                if stdin.lock().read_line(&mut line)? == 0 {
                    return Ok(false);
                }
                if let Some(answer) = parse_answer(&line) {
                    return Ok(answer);
                }
            }
        })
        .await??;
        Ok(answer)
    }
}
