//! Coloured status lines for the terminal.

use std::{
    fmt,
    io::{IsTerminal, Write},
    sync::OnceLock,
};

use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

static STDOUT: OnceLock<StandardStream> = OnceLock::new();
static STDERR: OnceLock<StandardStream> = OnceLock::new();

fn stdout() -> &'static StandardStream {
    STDOUT.get_or_init(|| StandardStream::stdout(color_choice(std::io::stdout())))
}

fn stderr() -> &'static StandardStream {
    STDERR.get_or_init(|| StandardStream::stderr(color_choice(std::io::stderr())))
}

fn color_choice(stream: impl IsTerminal) -> ColorChoice {
    if stream.is_terminal() {
        ColorChoice::Auto
    } else {
        ColorChoice::Never
    }
}

fn bold(color: Color) -> ColorSpec {
    let mut spec = ColorSpec::new();
    spec.set_fg(Some(color)).set_bold(true);
    spec
}

/// Write `label` in `spec`, then `message` uncoloured. Terminal write
/// failures are not worth failing a command over.
fn labelled(
    stream: &'static StandardStream,
    spec: ColorSpec,
    label: &str,
    sep: &str,
    message: fmt::Arguments,
) {
    let mut out = stream.lock();
    let _ = out.set_color(&spec);
    let _ = write!(out, "{label}");
    let _ = out.reset();
    let _ = writeln!(out, "{sep}{message}");
}

/// A progress line on stdout, e.g. "Copying example.com/img:1.0".
pub fn step(verb: &str, message: fmt::Arguments) {
    labelled(stdout(), bold(Color::Green), &format!("{verb:>12}"), " ", message);
}

/// Additional information on stderr.
pub fn info(label: &str, message: fmt::Arguments) {
    labelled(stderr(), bold(Color::Cyan), label, " ", message);
}

/// A warning on stderr.
pub fn warn(message: fmt::Arguments) {
    labelled(stderr(), bold(Color::Yellow), "Warning", ": ", message);
}

/// An error on stderr.
pub fn error(message: fmt::Arguments) {
    labelled(stderr(), bold(Color::Red), "Error", ": ", message);
}
