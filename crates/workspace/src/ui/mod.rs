//! Terminal UI helpers

pub mod spinner;

use anyhow::Result;
use dialoguer::theme::ColorfulTheme;
use dialoguer::Confirm;
use std::io::IsTerminal;

/// Ask a yes/no question. Non-interactive sessions (no TTY on stdin)
/// answer `false` so scripted invocations never hang on a prompt.
pub fn confirm(prompt: &str) -> Result<bool> {
    if !std::io::stdin().is_terminal() {
        return Ok(false);
    }
    let answer = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(prompt)
        .default(false)
        .interact()?;
    Ok(answer)
}
