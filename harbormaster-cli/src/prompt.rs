//! Interactive confirmation for statements the validator can't dry-run

use harbormaster::validate::ConfirmFn;
use std::io::{self, BufRead, Write};
use std::sync::Arc;

/// `y` and `yes`, any case, surrounding whitespace ignored
pub fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

/// Print `msg [y/N]: ` to `output` and read one line from `input`
///
/// End of input counts as "no".
pub fn ask<R: BufRead, W: Write>(msg: &str, input: &mut R, output: &mut W) -> io::Result<bool> {
    write!(output, "{} [y/N]: ", msg)?;
    output.flush()?;

    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Ok(false);
    }
    Ok(is_affirmative(&line))
}

/// Confirmation callback for the validator
///
/// With `auto_yes` every prompt is answered affirmatively without printing.
pub fn confirm_fn(auto_yes: bool) -> ConfirmFn {
    Arc::new(move |msg: &str| -> io::Result<bool> {
        if auto_yes {
            return Ok(true);
        }
        let stdin = io::stdin();
        ask(msg, &mut stdin.lock(), &mut io::stdout())
    })
}
