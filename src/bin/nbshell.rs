//! napi-bridge shell
//!
//! Loads a sample native module into the reference host and evaluates call
//! lines such as `add(1, 2)` or `greet("you")` against its exports.

use std::cell::Cell;
use std::sync::LazyLock;

use napi_bridge::{
    Boundary, BridgeResult, CallbackInfo, Env, FunctionDescriptor, JsError, LoadedModule, Method, ModuleRecord,
    ModuleTable, Runtime, ToHost, Value, register_exports, register_module,
};
use regex::Regex;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tracing_subscriber::EnvFilter;

const MODULE_NAME: &str = "sample";

static SAMPLE: ModuleRecord = ModuleRecord::new(MODULE_NAME, sample_init);

static CALL_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*([A-Za-z_$][\w$]*)\s*\((.*)\)\s*;?\s*$").expect("valid call pattern"));

static TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"^\s*(?:(?P<num>-?(?:\d+(?:\.\d*)?|\.\d+)(?:[eE][+-]?\d+)?)|(?P<str>"(?:[^"\\]|\\.)*")|(?P<word>[A-Za-z_]\w*)|(?P<punct>[\[\],]))"#,
    )
    .expect("valid token pattern")
});

fn main() {
    init_logging();

    if let Err(e) = register_module(&SAMPLE) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    let args: Vec<String> = std::env::args().collect();
    let mut runtime = Runtime::default();
    let module = match runtime.load(MODULE_NAME) {
        Ok(module) => module,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    if args.len() > 1 {
        run_file(module, &args[1]);
    } else {
        run_repl(module);
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("NBSHELL_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn sample_init(env: &mut dyn Boundary, exports: Value) -> Option<Value> {
    let hits = Cell::new(0u32);
    let table = ModuleTable::new()
        .method(Method::new("add", |(a, b): (f64, f64)| Ok(a + b)))
        .method(Method::new("greet", |(name,): (String,)| Ok(format!("Hello, {name}!"))))
        .method(Method::new("clamp", |(n, lo, hi): (f64, f64, f64)| {
            if lo > hi {
                return Err(JsError::range_error("out of bounds").with_code("E_RANGE"));
            }
            Ok(n.clamp(lo, hi))
        }))
        .method(Method::new("count", move |()| {
            hits.set(hits.get() + 1);
            Ok(hits.get())
        }))
        .function(FunctionDescriptor::new("describe", describe_args))
        .constant("version", env!("CARGO_PKG_VERSION"))
        .constant("pi", std::f64::consts::PI);
    register_exports(env, exports, table)
}

/// Raw callback: reports how it was called
fn describe_args(raw: &mut dyn Boundary, info: CallbackInfo) -> Option<Value> {
    let mut env = Env::new(raw);
    let report = describe_invocation(&mut env, info);
    match report {
        Ok(value) => Some(value),
        Err(e) => {
            env.raise(&e);
            None
        }
    }
}

fn describe_invocation(env: &mut Env<'_>, info: CallbackInfo) -> BridgeResult<Value> {
    let call = env.unpack_all(info)?;
    let mut types = Vec::with_capacity(call.argc);
    for &arg in &call.args {
        types.push(env.type_of(arg)?.to_string());
    }
    env.to_host(&format!("{} argument(s): [{}]", call.argc, types.join(", ")))
}

/// Literal argument of a call line
#[derive(Debug, Clone, PartialEq)]
enum Literal {
    Number(f64),
    String(String),
    Bool(bool),
    Null,
    Undefined,
    Array(Vec<Literal>),
}

impl ToHost for Literal {
    fn to_host(&self, env: &mut Env<'_>) -> BridgeResult<Value> {
        match self {
            Literal::Number(n) => n.to_host(env),
            Literal::String(s) => s.to_host(env),
            Literal::Bool(b) => b.to_host(env),
            Literal::Null => env.get_null(),
            Literal::Undefined => env.get_undefined(),
            Literal::Array(items) => items.to_host(env),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    String(String),
    Word(String),
    Open,
    Close,
    Comma,
}

/// A parsed `name(args...)` line
#[derive(Debug, PartialEq)]
struct CallLine {
    name: String,
    args: Vec<Literal>,
}

fn parse_call(line: &str) -> Result<CallLine, String> {
    let caps = CALL_LINE
        .captures(line)
        .ok_or_else(|| format!("expected `name(args...)`, got `{}`", line.trim()))?;
    let tokens = tokenize(&caps[2])?;
    let mut pos = 0;
    let args = parse_list(&tokens, &mut pos, None)?;
    Ok(CallLine {
        name: caps[1].to_string(),
        args,
    })
}

fn tokenize(mut src: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    loop {
        if src.trim_start().is_empty() {
            return Ok(tokens);
        }
        let caps = TOKEN
            .captures(src)
            .ok_or_else(|| format!("unexpected input at `{}`", src.trim_start()))?;
        let token = if let Some(m) = caps.name("num") {
            let n = m.as_str().parse().map_err(|_| format!("bad number `{}`", m.as_str()))?;
            Token::Number(n)
        } else if let Some(m) = caps.name("str") {
            let quoted = m.as_str();
            Token::String(unescape(&quoted[1..quoted.len() - 1]))
        } else if let Some(m) = caps.name("word") {
            Token::Word(m.as_str().to_string())
        } else {
            match &caps["punct"] {
                "[" => Token::Open,
                "]" => Token::Close,
                _ => Token::Comma,
            }
        };
        tokens.push(token);
        src = &src[caps[0].len()..];
    }
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

/// Comma-separated literals up to `close` (or the end of input)
fn parse_list(tokens: &[Token], pos: &mut usize, close: Option<&Token>) -> Result<Vec<Literal>, String> {
    let mut items = Vec::new();
    loop {
        match tokens.get(*pos) {
            None if close.is_none() && items.is_empty() => return Ok(items),
            None if items.is_empty() => return Err("unterminated array".to_string()),
            Some(t) if Some(t) == close && items.is_empty() => {
                *pos += 1;
                return Ok(items);
            }
            _ => {}
        }
        items.push(parse_literal(tokens, pos)?);
        match tokens.get(*pos) {
            Some(Token::Comma) => *pos += 1,
            Some(t) if Some(t) == close => {
                *pos += 1;
                return Ok(items);
            }
            None if close.is_none() => return Ok(items),
            Some(t) => return Err(format!("unexpected {:?}", t)),
            None => return Err("unterminated array".to_string()),
        }
    }
}

fn parse_literal(tokens: &[Token], pos: &mut usize) -> Result<Literal, String> {
    let token = tokens.get(*pos).ok_or("missing argument")?;
    *pos += 1;
    match token {
        Token::Number(n) => Ok(Literal::Number(*n)),
        Token::String(s) => Ok(Literal::String(s.clone())),
        Token::Word(w) => match w.as_str() {
            "true" => Ok(Literal::Bool(true)),
            "false" => Ok(Literal::Bool(false)),
            "null" => Ok(Literal::Null),
            "undefined" => Ok(Literal::Undefined),
            _ => Err(format!("unknown literal `{}`", w)),
        },
        Token::Open => parse_list(tokens, pos, Some(&Token::Close)).map(Literal::Array),
        Token::Close | Token::Comma => Err(format!("unexpected {:?}", token)),
    }
}

/// Evaluate one line; `Ok(None)` means nothing to print
fn eval_line(module: &mut LoadedModule, line: &str) -> Result<Option<String>, String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with("//") {
        return Ok(None);
    }
    match line {
        ".exports" => return Ok(Some(module.export_names().join(", "))),
        ".help" => {
            return Ok(Some(
                "name(arg, ...)  call an export with literal arguments\n\
                 .exports        list export names\n\
                 .help           show this help"
                    .to_string(),
            ));
        }
        _ => {}
    }

    let call = parse_call(line)?;
    let mut args = Vec::with_capacity(call.args.len());
    {
        let mut env = module.env();
        for literal in &call.args {
            args.push(env.to_host(literal).map_err(|e| e.to_string())?);
        }
    }
    match module.call(&call.name, &args) {
        Ok(value) => Ok(Some(module.describe(value))),
        Err(thrown) => Err(format!("Uncaught {}", module.describe(thrown))),
    }
}

fn run_file(module: &mut LoadedModule, filename: &str) {
    let source = match std::fs::read_to_string(filename) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error reading {}: {}", filename, e);
            std::process::exit(1);
        }
    };

    for (number, line) in source.lines().enumerate() {
        match eval_line(module, line) {
            Ok(Some(output)) => println!("{}", output),
            Ok(None) => {}
            Err(e) => {
                eprintln!("{}:{}: {}", filename, number + 1, e);
                std::process::exit(1);
            }
        }
    }
}

fn run_repl(module: &mut LoadedModule) {
    println!("nbshell {} - module `{}` loaded", env!("CARGO_PKG_VERSION"), MODULE_NAME);
    println!("Type .help for commands, Ctrl+D to exit.\n");

    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(e) => {
            eprintln!("Error starting line editor: {}", e);
            std::process::exit(1);
        }
    };

    loop {
        match editor.readline("> ") {
            Ok(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(line.as_str());
                match eval_line(module, &line) {
                    Ok(Some(output)) => println!("{}", output),
                    Ok(None) => {}
                    Err(e) => println!("{}", e),
                }
            }
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => {
                println!();
                break;
            }
            Err(e) => {
                eprintln!("Error reading input: {}", e);
                break;
            }
        }
    }
}
