//! A small line-oriented engine used by the `kindle` binary and the tests.
//!
//! Programs are sequences of statements, one per line:
//!
//! ```text
//! # comment
//! let greeting = "hello"
//! let count = 3
//! print greeting
//! exit 0
//! ```
//!
//! Values are integers, double-quoted strings, `true`, `false`, `null`,
//! earlier bindings, `argv[n]` and `env.NAME`. The snapshot payload is the
//! JSON object of bindings left behind by a builder script.

use std::fs;
use std::io::{self, Read, Write};

use serde_json::{Map, Value};
use tracing::debug;

use kindle_snapshot::SnapshotConfig;

use super::{Engine, EngineError, InstanceSpec, MainInstance, SharedWriter};
use crate::crypto::EntropySource;
use crate::exit_code::ExitCode;

const ENGINE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::engine");

/// Snapshot tag written by this engine.
pub const BINDING_ENGINE_TAG: &str = "binding-1";

const FLAG_HELP: &str = "\
Engine options:
  --predictable          Disable sources of non-determinism
  --random-seed=<n>      Seed hashing with <n> instead of fresh entropy
  --stack-size=<n>       Maximum statement count per script
  --trace-bindings       Log every binding as it is created
";

type Bindings = Map<String, Value>;

/// Reference [`Engine`] that evaluates binding scripts.
#[derive(Debug)]
pub struct BindingEngine {
    stdout: SharedWriter,
    stderr: SharedWriter,
    embedded: Option<&'static [u8]>,
    entropy: Option<EntropySource>,
    predictable: bool,
    random_seed: Option<u64>,
    statement_limit: Option<usize>,
    trace: bool,
    time_zone: Option<String>,
    platform_threads: Option<u16>,
    gc_running: bool,
    initialized: bool,
    hash_seed: Option<u64>,
}

impl BindingEngine {
    /// Creates an engine writing script output to the given streams.
    #[must_use]
    pub fn new(stdout: SharedWriter, stderr: SharedWriter) -> Self {
        Self {
            stdout,
            stderr,
            embedded: None,
            entropy: None,
            predictable: false,
            random_seed: None,
            statement_limit: None,
            trace: false,
            time_zone: None,
            platform_threads: None,
            gc_running: false,
            initialized: false,
            hash_seed: None,
        }
    }

    /// Links a snapshot blob into the engine as its embedded default.
    #[must_use]
    pub fn with_embedded_snapshot(mut self, blob: &'static [u8]) -> Self {
        self.embedded = Some(blob);
        self
    }

    /// Hash seed chosen during initialisation.
    #[must_use]
    pub fn hash_seed(&self) -> Option<u64> {
        self.hash_seed
    }

    /// Returns `true` if `--predictable` was accepted.
    #[must_use]
    pub fn is_predictable(&self) -> bool {
        self.predictable
    }

    /// Default time zone handed over by the host.
    #[must_use]
    pub fn time_zone(&self) -> Option<&str> {
        self.time_zone.as_deref()
    }

    fn accept_flag(&mut self, flag: &str) -> bool {
        if flag == "--predictable" {
            self.predictable = true;
            return true;
        }
        if flag == "--trace-bindings" {
            self.trace = true;
            return true;
        }
        if let Some(seed) = flag.strip_prefix("--random-seed=") {
            return seed
                .parse()
                .map(|seed| self.random_seed = Some(seed))
                .is_ok();
        }
        if let Some(limit) = flag.strip_prefix("--stack-size=") {
            return limit
                .parse()
                .map(|limit| self.statement_limit = Some(limit))
                .is_ok();
        }
        false
    }

    fn interpreter<'a>(&self, origin: &'a str, args: &'a [String], env: &'a [(String, String)]) -> Interpreter<'a> {
        Interpreter {
            origin,
            args,
            env,
            limit: self.statement_limit,
            trace: self.trace,
        }
    }
}

impl Engine for BindingEngine {
    fn snapshot_tag(&self) -> &str {
        BINDING_ENGINE_TAG
    }

    fn set_flags_from_command_line(&mut self, flags: &[String]) -> Vec<String> {
        flags
            .iter()
            .filter(|flag| !self.accept_flag(flag))
            .cloned()
            .collect()
    }

    fn flag_help(&self) -> String {
        FLAG_HELP.to_owned()
    }

    fn set_entropy_source(&mut self, source: EntropySource) {
        self.entropy = Some(source);
    }

    fn set_default_time_zone(&mut self, zone: &str) {
        self.time_zone = Some(zone.to_owned());
    }

    fn initialize_platform(&mut self, thread_pool_size: u16) -> Result<(), EngineError> {
        if self.platform_threads.is_some() {
            return Err(EngineError::Lifecycle("platform already initialised"));
        }
        self.platform_threads = Some(thread_pool_size);
        Ok(())
    }

    fn initialize_gc(&mut self) -> Result<(), EngineError> {
        self.gc_running = true;
        Ok(())
    }

    fn initialize(&mut self) -> Result<(), EngineError> {
        if self.platform_threads.is_none() {
            return Err(EngineError::Lifecycle("platform not initialised"));
        }
        let seed = match self.random_seed {
            Some(seed) => seed,
            None => {
                let entropy = self
                    .entropy
                    .as_ref()
                    .ok_or(EngineError::Lifecycle("no entropy source registered"))?;
                let mut bytes = [0_u8; 8];
                if !entropy.fill(&mut bytes) {
                    return Err(EngineError::Entropy);
                }
                u64::from_le_bytes(bytes)
            }
        };
        self.hash_seed = Some(seed);
        self.initialized = true;
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn shutdown_gc(&mut self) {
        self.gc_running = false;
    }

    fn dispose(&mut self) {
        self.initialized = false;
    }

    fn dispose_platform(&mut self) {
        self.platform_threads = None;
    }

    fn embedded_snapshot(&self) -> Option<&'static [u8]> {
        self.embedded
    }

    fn generate_snapshot(
        &mut self,
        source: &str,
        args: &[String],
        _exec_args: &[String],
        config: &SnapshotConfig,
    ) -> Result<Vec<u8>, EngineError> {
        if !self.initialized {
            return Err(EngineError::Lifecycle("engine not initialised"));
        }
        let origin = config.builder.as_str();
        let mut bindings = Bindings::new();
        let mut stdout = self.stdout.clone();
        match self
            .interpreter(origin, args, &[])
            .execute(source, &mut bindings, &mut stdout)?
        {
            Some(code) if code != 0 => return Err(EngineError::BuilderExit(code)),
            _ => {}
        }
        serde_json::to_vec(&Value::Object(bindings))
            .map_err(|error| EngineError::Payload(error.to_string()))
    }

    fn create_main_instance(
        &mut self,
        spec: InstanceSpec<'_>,
    ) -> Result<Box<dyn MainInstance>, EngineError> {
        if !self.initialized {
            return Err(EngineError::Lifecycle("engine not initialised"));
        }
        let bindings = match spec.snapshot {
            Some(snapshot) => serde_json::from_slice::<Bindings>(snapshot.payload())
                .map_err(|error| EngineError::Payload(error.to_string()))?,
            None => Bindings::new(),
        };
        let entry = match (spec.inline_script, spec.args.get(1)) {
            (Some(source), _) => Entry::Inline(source),
            (None, Some(path)) if path == "-" => Entry::Stdin,
            (None, Some(path)) => Entry::File(path.clone()),
            (None, None) => Entry::Nothing,
        };
        Ok(Box::new(BindingInstance {
            bindings,
            args: spec.args,
            env: spec.env,
            entry,
            limit: self.statement_limit,
            trace: self.trace,
            stdout: self.stdout.clone(),
            stderr: self.stderr.clone(),
        }))
    }
}

#[derive(Debug)]
enum Entry {
    Inline(String),
    File(String),
    Stdin,
    Nothing,
}

/// Main instance created by [`BindingEngine`].
#[derive(Debug)]
pub struct BindingInstance {
    bindings: Bindings,
    args: Vec<String>,
    env: Vec<(String, String)>,
    entry: Entry,
    limit: Option<usize>,
    trace: bool,
    stdout: SharedWriter,
    stderr: SharedWriter,
}

impl BindingInstance {
    fn load(&self) -> Result<Option<(String, String)>, EngineError> {
        let read_error = |path: &str| {
            let path = path.to_owned();
            move |source| EngineError::EntryScript { path, source }
        };
        match &self.entry {
            Entry::Inline(source) => Ok(Some(("[packaged]".to_owned(), source.clone()))),
            Entry::File(path) => fs::read_to_string(path)
                .map(|source| Some((path.clone(), source)))
                .map_err(read_error(path)),
            Entry::Stdin => {
                let mut source = String::new();
                io::stdin()
                    .read_to_string(&mut source)
                    .map(|_| Some(("[stdin]".to_owned(), source)))
                    .map_err(read_error("-"))
            }
            Entry::Nothing => Ok(None),
        }
    }

    fn report(&mut self, error: &EngineError) {
        writeln!(self.stderr, "{error}").ok();
    }
}

impl MainInstance for BindingInstance {
    fn run(&mut self) -> ExitCode {
        let (origin, source) = match self.load() {
            Ok(Some(entry)) => entry,
            Ok(None) => return ExitCode::Success,
            Err(error) => {
                self.report(&error);
                return ExitCode::GenericUserError;
            }
        };
        let interpreter = Interpreter {
            origin: &origin,
            args: &self.args,
            env: &self.env,
            limit: self.limit,
            trace: self.trace,
        };
        let mut stdout = self.stdout.clone();
        let outcome = interpreter.execute(&source, &mut self.bindings, &mut stdout);
        stdout.flush().ok();
        match outcome {
            Ok(None | Some(0)) => ExitCode::Success,
            Ok(Some(code)) => ExitCode::Script(code),
            Err(error) => {
                self.report(&error);
                ExitCode::GenericUserError
            }
        }
    }

    fn global(&self, name: &str) -> Option<String> {
        self.bindings.get(name).map(render)
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

struct Interpreter<'a> {
    origin: &'a str,
    args: &'a [String],
    env: &'a [(String, String)],
    limit: Option<usize>,
    trace: bool,
}

impl Interpreter<'_> {
    /// Runs `source` against `bindings`. Returns the `exit` status, if any.
    fn execute(
        &self,
        source: &str,
        bindings: &mut Bindings,
        out: &mut dyn Write,
    ) -> Result<Option<u8>, EngineError> {
        let mut executed = 0_usize;
        for (index, raw) in source.lines().enumerate() {
            let line = index + 1;
            let statement = raw.trim();
            if statement.is_empty() || statement.starts_with('#') {
                continue;
            }
            executed += 1;
            if self.limit.is_some_and(|limit| executed > limit) {
                return Err(self.error(line, "statement limit exceeded"));
            }
            if let Some(code) = self.statement(line, statement, bindings, out)? {
                return Ok(Some(code));
            }
        }
        Ok(None)
    }

    fn statement(
        &self,
        line: usize,
        statement: &str,
        bindings: &mut Bindings,
        out: &mut dyn Write,
    ) -> Result<Option<u8>, EngineError> {
        let (keyword, rest) = statement
            .split_once(char::is_whitespace)
            .map_or((statement, ""), |(keyword, rest)| (keyword, rest.trim()));
        match keyword {
            "let" => {
                let (name, expr) = rest
                    .split_once('=')
                    .ok_or_else(|| self.error(line, "expected `let name = value`"))?;
                let name = name.trim();
                if !is_identifier(name) {
                    return Err(self.error(line, &format!("invalid binding name `{name}`")));
                }
                let value = self.evaluate(line, expr.trim(), bindings)?;
                if self.trace {
                    debug!(target: ENGINE_TARGET, origin = self.origin, line, name, "binding created");
                }
                bindings.insert(name.to_owned(), value);
                Ok(None)
            }
            "print" => {
                let text = if rest.is_empty() {
                    String::new()
                } else {
                    render(&self.evaluate(line, rest, bindings)?)
                };
                writeln!(out, "{text}").map_err(|error| self.error(line, &error.to_string()))?;
                Ok(None)
            }
            "exit" => rest
                .parse::<u8>()
                .map(Some)
                .map_err(|_| self.error(line, "exit status must be between 0 and 255")),
            other => Err(self.error(line, &format!("unknown statement `{other}`"))),
        }
    }

    fn evaluate(&self, line: usize, expr: &str, bindings: &Bindings) -> Result<Value, EngineError> {
        if let Some(quoted) = expr.strip_prefix('"') {
            return unquote(quoted).ok_or_else(|| self.error(line, "unterminated string"));
        }
        match expr {
            "true" => return Ok(Value::Bool(true)),
            "false" => return Ok(Value::Bool(false)),
            "null" => return Ok(Value::Null),
            _ => {}
        }
        if let Ok(number) = expr.parse::<i64>() {
            return Ok(Value::from(number));
        }
        if let Some(index) = expr
            .strip_prefix("argv[")
            .and_then(|rest| rest.strip_suffix(']'))
        {
            let index: usize = index
                .trim()
                .parse()
                .map_err(|_| self.error(line, "argv index must be a number"))?;
            return Ok(self
                .args
                .get(index)
                .map_or(Value::Null, |arg| Value::String(arg.clone())));
        }
        if let Some(name) = expr.strip_prefix("env.") {
            return Ok(self
                .env
                .iter()
                .find(|(key, _)| key == name)
                .map_or(Value::Null, |(_, value)| Value::String(value.clone())));
        }
        if is_identifier(expr) {
            return bindings
                .get(expr)
                .cloned()
                .ok_or_else(|| self.error(line, &format!("{expr} is not defined")));
        }
        Err(self.error(line, &format!("cannot evaluate `{expr}`")))
    }

    fn error(&self, line: usize, message: &str) -> EngineError {
        EngineError::Script {
            origin: self.origin.to_owned(),
            line,
            message: message.to_owned(),
        }
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|first| first.is_ascii_alphabetic() || first == '_')
        && chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
        && !matches!(name, "let" | "print" | "exit" | "true" | "false" | "null" | "argv")
}

/// Decodes the body of a string literal; the opening quote is already gone.
fn unquote(body: &str) -> Option<Value> {
    let mut text = String::new();
    let mut chars = body.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '"' => return chars.as_str().trim().is_empty().then(|| Value::String(text)),
            '\\' => match chars.next()? {
                'n' => text.push('\n'),
                't' => text.push('\t'),
                other => text.push(other),
            },
            other => text.push(other),
        }
    }
    None
}
