//! Single-key questions on the terminal.

use std::io::{self, BufRead, Write};

use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    terminal::{disable_raw_mode, enable_raw_mode},
};

/// Ask `question` and wait for one of `choices` (lower-case letters).
///
/// Returns `None` on Esc or Ctrl+C. Without a terminal, a line is read from
/// stdin and its first letter is used.
pub fn choose(question: &str, choices: &[char]) -> io::Result<Option<char>> {
    let keys: String = choices.iter().map(|c| c.to_ascii_uppercase()).collect();
    let mut stdout = io::stdout();
    write!(stdout, "{question} [{keys}] ")?;
    stdout.flush()?;

    if enable_raw_mode().is_err() {
        return choose_line(choices);
    }
    let answer = read_key(choices);
    let _ = disable_raw_mode();

    let answer = answer?;
    match answer {
        Some(c) => writeln!(stdout, "{}", c.to_ascii_uppercase())?,
        None => writeln!(stdout)?,
    }
    Ok(answer)
}

fn read_key(choices: &[char]) -> io::Result<Option<char>> {
    loop {
        let Event::Key(key) = event::read()? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }
        match key.code {
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                return Ok(None)
            }
            KeyCode::Esc => return Ok(None),
            KeyCode::Char(c) => {
                let c = c.to_ascii_lowercase();
                if choices.contains(&c) {
                    return Ok(Some(c));
                }
            }
            _ => {}
        }
    }
}

fn choose_line(choices: &[char]) -> io::Result<Option<char>> {
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line
        .trim()
        .chars()
        .next()
        .map(|c| c.to_ascii_lowercase())
        .filter(|c| choices.contains(c)))
}

/// Yes/no question; anything but `y` is no.
pub fn confirm(question: &str) -> io::Result<bool> {
    Ok(choose(question, &['y', 'n'])? == Some('y'))
}
