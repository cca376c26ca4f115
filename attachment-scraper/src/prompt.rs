use std::io::{self, BufRead, Write};

use thiserror::Error;

use crate::pipeline::{EmptyCriterion, SearchCriterion};

pub const PROMPT: &str = "Enter email that sent attachments: ";

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("failed to read the sender from standard input: {0}")]
    Io(#[from] io::Error),

    #[error("no sender given: input ended before a line was read")]
    Eof,

    #[error(transparent)]
    Empty(#[from] EmptyCriterion),
}

/// Writes the prompt to `output` and reads one line from `input`
///
/// # Errors
///
/// Returns a `PromptError` if the streams fail, the input is already at its
/// end, or the line is blank
pub fn read_criterion<R, W>(mut input: R, mut output: W) -> Result<SearchCriterion, PromptError>
where
    R: BufRead,
    W: Write,
{
    output.write_all(PROMPT.as_bytes())?;
    output.flush()?;

    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Err(PromptError::Eof);
    }
    Ok(SearchCriterion::new(line)?)
}
