//! Human decision boundary for consensus failures.
//!
//! A gate receives the ranked candidates plus an implicit "veto all" option
//! and blocks until it has an answer. No timeout is imposed here.

use std::cell::RefCell;
use std::io::{BufRead, Write};

use anyhow::{Context, Result};
use tracing::{info, warn};

const MAX_PROMPT_ATTEMPTS: usize = 3;
const PREVIEW_CHARS: usize = 400;

/// One selectable option shown to the human.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscalationOption {
    pub text: String,
    pub votes: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscalationRequest {
    pub task_id: String,
    pub task_description: String,
    /// Ranked by votes descending, ties by first-seen order.
    pub options: Vec<EscalationOption>,
}

pub trait EscalationGate {
    /// Zero-based index into `request.options`, or `None` to veto them all.
    fn present(&self, request: &EscalationRequest) -> Result<Option<usize>>;
}

/// Gate that always vetoes; used for non-interactive runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct VetoGate;

impl EscalationGate for VetoGate {
    fn present(&self, request: &EscalationRequest) -> Result<Option<usize>> {
        info!(task_id = %request.task_id, options = request.options.len(), "escalation vetoed (non-interactive)");
        Ok(None)
    }
}

/// Gate that renders options on a writer and reads the choice from a reader.
///
/// Options are listed as one-line previews. Input `1..=n` selects an option,
/// `s<n>` prints option `n` in full and asks again, `v` or an empty line
/// vetoes. Invalid input re-prompts a few times, then vetoes.
pub struct StdinGate<R, W> {
    input: RefCell<R>,
    output: RefCell<W>,
}

impl StdinGate<std::io::StdinLock<'static>, std::io::Stderr> {
    pub fn terminal() -> Self {
        Self::new(std::io::stdin().lock(), std::io::stderr())
    }
}

impl<R: BufRead, W: Write> StdinGate<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self {
            input: RefCell::new(input),
            output: RefCell::new(output),
        }
    }

    fn render(&self, request: &EscalationRequest) -> Result<()> {
        let mut out = self.output.borrow_mut();
        writeln!(out, "\nConsensus not reached for task {}:", request.task_id)?;
        writeln!(out, "  {}\n", request.task_description)?;
        for (index, option) in request.options.iter().enumerate() {
            writeln!(
                out,
                "[{}] ({} votes) {}",
                index + 1,
                option.votes,
                preview(&option.text)
            )?;
        }
        writeln!(out, "[v] veto all candidates")?;
        out.flush().context("flush escalation prompt")
    }

    fn show_full(&self, request: &EscalationRequest, index: usize) -> Result<()> {
        let mut out = self.output.borrow_mut();
        let option = &request.options[index];
        writeln!(out, "\n--- option {} ({} votes) ---", index + 1, option.votes)?;
        writeln!(out, "{}", option.text.trim_end())?;
        writeln!(out, "--- end of option {} ---", index + 1)?;
        out.flush().context("flush escalation prompt")
    }

    fn read_answer(&self, option_count: usize) -> Result<Answer> {
        {
            let mut out = self.output.borrow_mut();
            write!(out, "select 1-{option_count}, s<n> to show one in full, or v: ")?;
            out.flush().context("flush escalation prompt")?;
        }
        let mut line = String::new();
        let read = self
            .input
            .borrow_mut()
            .read_line(&mut line)
            .context("read escalation choice")?;
        if read == 0 {
            return Ok(Answer::Veto);
        }
        Ok(Answer::parse(line.trim(), option_count))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Answer {
    Pick(usize),
    Show(usize),
    Veto,
    Invalid,
}

impl Answer {
    fn parse(answer: &str, option_count: usize) -> Self {
        if answer.is_empty() || answer.eq_ignore_ascii_case("v") {
            return Self::Veto;
        }
        let in_range = |n: usize| (1..=option_count).contains(&n);
        if let Some(rest) = answer
            .strip_prefix('s')
            .or_else(|| answer.strip_prefix('S'))
        {
            return match rest.trim().parse::<usize>() {
                Ok(n) if in_range(n) => Self::Show(n - 1),
                _ => Self::Invalid,
            };
        }
        match answer.parse::<usize>() {
            Ok(n) if in_range(n) => Self::Pick(n - 1),
            _ => Self::Invalid,
        }
    }
}

impl<R: BufRead, W: Write> EscalationGate for StdinGate<R, W> {
    fn present(&self, request: &EscalationRequest) -> Result<Option<usize>> {
        self.render(request)?;
        let mut invalid = 0;
        while invalid < MAX_PROMPT_ATTEMPTS {
            match self.read_answer(request.options.len())? {
                Answer::Pick(index) => return Ok(Some(index)),
                Answer::Veto => return Ok(None),
                Answer::Show(index) => self.show_full(request, index)?,
                Answer::Invalid => {
                    invalid += 1;
                    writeln!(self.output.borrow_mut(), "invalid choice")?;
                }
            }
        }
        warn!(task_id = %request.task_id, "no valid escalation choice, vetoing");
        Ok(None)
    }
}

fn preview(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= PREVIEW_CHARS {
        return flat;
    }
    let cut: String = flat.chars().take(PREVIEW_CHARS).collect();
    format!("{cut}...")
}
