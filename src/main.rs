use std::fs::File;
use std::io::{BufWriter, IsTerminal, Read, Write};
use clap::{Parser, Subcommand};
use camino::Utf8PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;
use noja_bytecode::disasm::Disasm;
use noja_bytecode::{ByteCodeError, Executable, ForwardArena, Source};
use noja_compiler::options::{DEFAULT_MAX_DEPTH, DEFAULT_MAX_TUPLE};
use noja_compiler::{compile_source, Options};

#[cfg(feature = "repl")]
use reedline::{Highlighter, Validator};

#[derive(Parser, Debug)]
#[clap(name = "noja", version)]
pub struct App {
    /// most targets or values a single tuple may hold
    #[clap(long, global = true, default_value_t = DEFAULT_MAX_TUPLE)]
    max_tuple: usize,

    /// deepest statement / expression nesting accepted
    #[clap(long, global = true, default_value_t = DEFAULT_MAX_DEPTH)]
    max_depth: usize,

    /// never color diagnostics
    #[clap(long, global = true, action)]
    no_color: bool,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// compile to bytecode file
    Compile {
        #[clap(short = 'o')]
        output: Utf8PathBuf,

        input: Utf8PathBuf,

        /// do not embed the source text
        #[clap(long, action)]
        strip: bool,
    },

    /// disassemble bytecode file
    Dis {
        file: Utf8PathBuf,
    },

    /// compile and print the listing
    Dump {
        input: Utf8PathBuf,
    },

    /// compile without writing anything
    Check {
        input: Utf8PathBuf,
    },

    /// interactive playground
    Repl,
}

struct HumanError {
    ty: HumanErrorTy,
    ctx: Option<String>,
}

enum HumanErrorTy {
    IOError(std::io::Error),
    ByteCodeError(ByteCodeError),
    /// number of diagnostics, already printed
    CompileError(usize),
}

impl From<std::io::Error> for HumanErrorTy {
    fn from(value: std::io::Error) -> Self {
        HumanErrorTy::IOError(value)
    }
}

impl From<ByteCodeError> for HumanErrorTy {
    fn from(value: ByteCodeError) -> Self {
        HumanErrorTy::ByteCodeError(value)
    }
}

impl std::fmt::Debug for HumanErrorTy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HumanErrorTy::IOError(err) => write!(f, "I/O Error: {}", err),
            HumanErrorTy::ByteCodeError(err) => write!(f, "Bytecode Decode Error: {}", err),
            HumanErrorTy::CompileError(1) => write!(f, "could not compile due to the previous error"),
            HumanErrorTy::CompileError(n) => write!(f, "could not compile due to {} previous errors", n),
        }
    }
}

impl std::fmt::Debug for HumanError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.ctx {
            Some(ctx) => write!(f, "{}: {:?}", ctx, self.ty),
            None => write!(f, "{:?}", self.ty),
        }
    }
}

impl From<HumanErrorTy> for HumanError {
    fn from(value: HumanErrorTy) -> Self {
        HumanError { ty: value, ctx: None }
    }
}

trait WithCtx<V> {
    fn with_ctx<S: Into<String>>(self, ctx: S) -> Result<V, HumanError>;
}

impl<V, T: Sized + Into<HumanErrorTy>> WithCtx<V> for Result<V, T> {
    fn with_ctx<S: Into<String>>(self, ctx: S) -> Result<V, HumanError> {
        self.map_err(|err| HumanError { ty: err.into(), ctx: Some(ctx.into()) })
    }
}

struct Session {
    options: Options,
    color: bool,
    arena: ForwardArena,
}

impl Session {
    fn read_source(&self, path: &Utf8PathBuf) -> Result<Source, HumanError> {
        let text = std::fs::read_to_string(path).with_ctx("could not open input file")?;
        Ok(Source::new(path.as_str(), text))
    }

    /// prints diagnostics on failure
    fn compile<'a>(&mut self, source: &'a Source) -> Result<Executable<'a>, HumanError> {
        compile_source(source, Some(&mut self.arena), &self.options).map_err(|err| {
            eprint!("{}", err.render(source, self.color));
            let count = match &err {
                noja_compiler::Error::Syntax(errs) => errs.len(),
                noja_compiler::Error::Compile(_) => 1,
            };
            HumanErrorTy::CompileError(count).into()
        })
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("NOJA_LOG")
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[cfg(feature = "repl")]
struct Highl {}

#[cfg(feature = "repl")]
impl Highlighter for Highl {
    fn highlight(&self, line: &str, _cursor: usize) -> reedline::StyledText {
        use chumsky::prelude::*;
        use nu_ansi_term::{Style, Color};
        use noja_compiler::lex::{self, TokType};

        let mut style = reedline::StyledText::new();
        style.push((Style::new(), line.to_string()));
        let (toks, _) = lex::lexer().parse(line).into_output_errors();
        if let Some(toks) = toks {
            for (tk, span) in toks {
                let st = match TokType::from(&tk) {
                    TokType::Num => Style::new().fg(Color::LightBlue),
                    TokType::Str => Style::new().fg(Color::LightGreen),
                    TokType::Ident => Style::new().fg(Color::Cyan),
                    TokType::Keyword => Style::new().fg(Color::LightPurple).bold(),
                    TokType::Point => Style::new().fg(Color::LightYellow),
                    TokType::Op => Style::new().fg(Color::Magenta),
                    TokType::Comment => Style::new().fg(Color::DarkGray),
                    TokType::Err => Style::new().fg(Color::Red).underline(),
                };
                style.style_range(span.start, span.end, st);
            }
        }
        style
    }
}

#[cfg(feature = "repl")]
struct Validd {}

#[cfg(feature = "repl")]
impl Validator for Validd {
    /// asks for more lines while a bracket is left open
    fn validate(&self, line: &str) -> reedline::ValidationResult {
        use chumsky::prelude::*;
        use noja_compiler::lex::{self, Tok};

        let (toks, _) = lex::lexer().parse(line).into_output_errors();
        if let Some(toks) = toks {
            let mut ind = 0;
            for tok in toks.iter() {
                match tok.0 {
                    Tok::CurlyOpen | Tok::ParenOpen | Tok::SquareOpen => { ind += 1; },
                    Tok::CurlyClose | Tok::ParenClose | Tok::SquareClose => { ind -= 1; },
                    _ => ()
                }
            }
            if ind > 0 {
                return reedline::ValidationResult::Incomplete;
            }
        }
        reedline::ValidationResult::Complete
    }
}

fn main() -> Result<(), HumanError> {
    better_panic::install();
    init_logging();
    let args = App::parse();

    let mut session = Session {
        options: Options { max_tuple: args.max_tuple, max_depth: args.max_depth },
        color: !args.no_color && std::io::stderr().is_terminal(),
        arena: ForwardArena::new(),
    };

    match args.command {
        Command::Compile { output, input, strip } => {
            let source = session.read_source(&input)?;
            let exe = session.compile(&source)?;

            let mut sink = BufWriter::new(File::create(&output).with_ctx("while creating output file")?);
            exe.write(&mut sink, !strip).with_ctx("while writing output file")?;
            sink.flush().with_ctx("while writing output file")?;
            info!(%output, instructions = exe.len(), "wrote image");
        }

        Command::Dis { file } => {
            let mut content = vec!();
            File::open(&file).with_ctx("while opening input file")?
                .read_to_end(&mut content).with_ctx("while reading input file")?;

            let exe = Executable::read(content.as_slice())
                .with_ctx("while decoding input file")?;
            print!("{}", Disasm::new(&exe).listing());
        }

        Command::Dump { input } => {
            let source = session.read_source(&input)?;
            let exe = session.compile(&source)?;
            print!("{}", Disasm::new(&exe).listing());
        }

        Command::Check { input } => {
            let source = session.read_source(&input)?;
            session.compile(&source)?;
        }

        #[cfg(not(feature = "repl"))]
        Command::Repl => {
            eprintln!("cli was built without 'repl' feature!");
            std::process::exit(1);
        }

        #[cfg(feature = "repl")]
        Command::Repl => {
            use reedline::{Reedline, DefaultPrompt, Signal};

            let mut editor = Reedline::create()
                .with_highlighter(Box::new(Highl {}))
                .with_validator(Box::new(Validd {}));
            let prompt = DefaultPrompt::default();

            let mut ctrlc = 0;
            let mut entry = 0;
            loop {
                let sig = editor.read_line(&prompt).with_ctx("while reading input")?;
                match sig {
                    Signal::CtrlC => {
                        ctrlc += 1;
                        if ctrlc == 2 {
                            break;
                        }
                    },

                    Signal::CtrlD => break,

                    Signal::Success(text) => {
                        ctrlc = 0;
                        entry += 1;

                        let source = Source::new(format!("<repl:{}>", entry), text);
                        // diagnostics are already printed, keep going
                        if let Ok(exe) = session.compile(&source) {
                            print!("{}", Disasm::new(&exe).listing());
                        }
                    }
                }
            }
        }
    }

    Ok(())
}
