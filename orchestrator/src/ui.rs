//! Progress lines for the person at the terminal. Written to stderr so the
//! wrapped program owns stdout.

use owo_colors::OwoColorize;
use std::env;

pub const CLOSING_MESSAGE: &str =
    "Looks good? Then put it on the train and deploy with `railway up`!";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Progress,
    Success,
    Notice,
}

fn should_use_color() -> bool {
    if env::var("NO_COLOR").is_ok() {
        return false;
    }
    atty::is(atty::Stream::Stderr)
}

fn paint(tone: Tone, text: &str, color: bool) -> String {
    if !color {
        return text.to_string();
    }

    match tone {
        Tone::Progress => text.cyan().to_string(),
        Tone::Success => text.green().to_string(),
        Tone::Notice => text.yellow().bold().to_string(),
    }
}

pub fn line(tone: Tone, text: &str) {
    eprintln!("{}", paint(tone, text, should_use_color()));
}

pub fn progress(text: &str) {
    line(Tone::Progress, text);
}

pub fn success(text: &str) {
    line(Tone::Success, text);
}

pub fn notice(text: &str) {
    line(Tone::Notice, text);
}
