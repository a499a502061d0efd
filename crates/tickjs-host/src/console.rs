//! `print`, `console.*` and `scriptArgs` for scripts.

use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

use rquickjs::function::Rest;
use rquickjs::{Coerced, Ctx, Function, Object};

/// Which standard stream a line goes to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

pub trait ScriptOutput {
    fn write_line(&self, stream: Stream, line: &str);
}

pub type OutputHandle = Rc<dyn ScriptOutput>;

/// Writes straight to the process streams
#[derive(Debug, Default, Clone, Copy)]
pub struct StdioOutput;

impl ScriptOutput for StdioOutput {
    fn write_line(&self, stream: Stream, line: &str) {
        // A closed pipe must not take the driver down with it.
        let _ = match stream {
            Stream::Stdout => writeln!(std::io::stdout().lock(), "{}", line),
            Stream::Stderr => writeln!(std::io::stderr().lock(), "{}", line),
        };
    }
}

/// Collects lines in memory
#[derive(Debug, Default)]
pub struct CapturedOutput {
    lines: RefCell<Vec<(Stream, String)>>,
}

impl CapturedOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines written to `stream`, in order
    pub fn lines(&self, stream: Stream) -> Vec<String> {
        self.lines
            .borrow()
            .iter()
            .filter(|(s, _)| *s == stream)
            .map(|(_, line)| line.clone())
            .collect()
    }

    pub fn stdout(&self) -> Vec<String> {
        self.lines(Stream::Stdout)
    }
}

impl ScriptOutput for CapturedOutput {
    fn write_line(&self, stream: Stream, line: &str) {
        self.lines.borrow_mut().push((stream, line.to_string()));
    }
}

fn join(args: Rest<Coerced<String>>) -> String {
    args.0
        .into_iter()
        .map(|arg| arg.0)
        .collect::<Vec<_>>()
        .join(" ")
}

fn printer<'js>(
    ctx: &Ctx<'js>,
    output: &OutputHandle,
    stream: Stream,
) -> rquickjs::Result<Function<'js>> {
    let output = output.clone();
    Function::new(ctx.clone(), move |args: Rest<Coerced<String>>| {
        output.write_line(stream, &join(args));
    })
}

/// Install the helpers on the context's global object
pub fn install<'js>(
    ctx: &Ctx<'js>,
    output: &OutputHandle,
    script_args: &[String],
) -> rquickjs::Result<()> {
    let globals = ctx.globals();

    globals.set("print", printer(ctx, output, Stream::Stdout)?)?;

    let console = Object::new(ctx.clone())?;
    console.set("log", printer(ctx, output, Stream::Stdout)?)?;
    console.set("info", printer(ctx, output, Stream::Stdout)?)?;
    console.set("warn", printer(ctx, output, Stream::Stderr)?)?;
    console.set("error", printer(ctx, output, Stream::Stderr)?)?;
    globals.set("console", console)?;

    globals.set("scriptArgs", script_args.to_vec())?;
    Ok(())
}
