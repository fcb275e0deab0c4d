//! Command-line parsing.

use std::path::PathBuf;

use evalboard_core::DashboardConfig;
use evalboard_error::Result;
use evalboard_types::{BaseUrl, RunId, TestCaseId};

/// Options accepted before or after the subcommand.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlobalOptions {
    pub config_path: Option<PathBuf>,
    pub base_url: Option<String>,
    pub page_size: Option<u32>,
    pub timeout_ms: Option<u64>,
    pub verbose: bool,
    pub log_json: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptSource {
    Inline(String),
    File(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Run {
        prompt: PromptSource,
        output: Option<PathBuf>,
        quiet: bool,
    },
    History {
        page: u32,
        limit: Option<u32>,
        json: bool,
    },
    Show {
        run_id: RunId,
        json: bool,
    },
    Detail {
        run_id: RunId,
        test_case_id: TestCaseId,
        json: bool,
    },
    Settings {
        catalogue: Option<PathBuf>,
        json: bool,
    },
    Replay {
        frames: PathBuf,
        analysis: Option<PathBuf>,
        prompt: String,
        run_id: Option<RunId>,
        headless: bool,
        output: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub global: GlobalOptions,
    pub command: Command,
}

/// Cursor over the arguments of one subcommand.
struct Args<'a> {
    items: &'a [String],
    pos: usize,
}

impl<'a> Args<'a> {
    fn next_arg(&mut self) -> Option<&'a str> {
        let item = self.items.get(self.pos)?;
        self.pos += 1;
        Some(item.as_str())
    }

    fn value(&mut self, flag: &str) -> Result<&'a str, String> {
        self.next_arg()
            .ok_or_else(|| format!("{flag} requires a value"))
    }

    fn number<N: std::str::FromStr>(&mut self, flag: &str) -> Result<N, String> {
        let raw = self.value(flag)?;
        raw.parse()
            .map_err(|_| format!("{flag} expects a number, got `{raw}`"))
    }
}

fn positional_number<N: std::str::FromStr>(raw: Option<&str>, name: &str) -> Result<N, String> {
    let raw = raw.ok_or_else(|| format!("missing <{name}>"))?;
    raw.parse()
        .map_err(|_| format!("<{name}> must be a number, got `{raw}`"))
}

/// Parse everything after the program name. `Err` carries a usage message.
pub fn parse(raw: &[String]) -> Result<Invocation, String> {
    let mut global = GlobalOptions::default();
    let mut rest: Vec<String> = Vec::new();

    let mut args = Args { items: raw, pos: 0 };
    while let Some(arg) = args.next_arg() {
        match arg {
            "-h" | "--help" => {
                return Ok(Invocation {
                    global,
                    command: Command::Help,
                });
            }
            "--config" => global.config_path = Some(PathBuf::from(args.value(arg)?)),
            "--base-url" => global.base_url = Some(args.value(arg)?.to_owned()),
            "--page-size" => global.page_size = Some(args.number(arg)?),
            "--timeout-ms" => global.timeout_ms = Some(args.number(arg)?),
            "--log-json" => global.log_json = Some(PathBuf::from(args.value(arg)?)),
            "-v" | "--verbose" => global.verbose = true,
            other => rest.push(other.to_owned()),
        }
    }

    let mut args = Args {
        items: &rest,
        pos: 0,
    };
    let command = match args.next_arg() {
        None | Some("help") => Command::Help,
        Some("run") => parse_run(&mut args)?,
        Some("history") => parse_history(&mut args)?,
        Some("show") => {
            let run_id = RunId(positional_number(args.next_arg(), "RUN_ID")?);
            let json = parse_json_only(&mut args)?;
            Command::Show { run_id, json }
        }
        Some("detail") => {
            let run_id = RunId(positional_number(args.next_arg(), "RUN_ID")?);
            let test_case_id = TestCaseId(positional_number(args.next_arg(), "TEST_CASE_ID")?);
            let json = parse_json_only(&mut args)?;
            Command::Detail {
                run_id,
                test_case_id,
                json,
            }
        }
        Some("settings") => parse_settings(&mut args)?,
        Some("replay") => parse_replay(&mut args)?,
        Some(other) => return Err(format!("unknown command `{other}`")),
    };
    Ok(Invocation { global, command })
}

fn parse_run(args: &mut Args<'_>) -> Result<Command, String> {
    let mut prompt = None;
    let mut output = None;
    let mut quiet = false;
    while let Some(arg) = args.next_arg() {
        match arg {
            "--prompt" => prompt = Some(PromptSource::Inline(args.value(arg)?.to_owned())),
            "--prompt-file" => prompt = Some(PromptSource::File(PathBuf::from(args.value(arg)?))),
            "--output" => output = Some(PathBuf::from(args.value(arg)?)),
            "-q" | "--quiet" => quiet = true,
            other => return Err(format!("unknown option `{other}` for run")),
        }
    }
    let prompt = prompt.ok_or("run requires --prompt or --prompt-file")?;
    Ok(Command::Run {
        prompt,
        output,
        quiet,
    })
}

fn parse_history(args: &mut Args<'_>) -> Result<Command, String> {
    let mut page = 1;
    let mut limit = None;
    let mut json = false;
    while let Some(arg) = args.next_arg() {
        match arg {
            "--page" => page = args.number(arg)?,
            "--limit" => limit = Some(args.number(arg)?),
            "--json" => json = true,
            other => return Err(format!("unknown option `{other}` for history")),
        }
    }
    if page == 0 {
        return Err("--page is 1-based".to_owned());
    }
    Ok(Command::History { page, limit, json })
}

fn parse_json_only(args: &mut Args<'_>) -> Result<bool, String> {
    let mut json = false;
    while let Some(arg) = args.next_arg() {
        match arg {
            "--json" => json = true,
            other => return Err(format!("unknown option `{other}`")),
        }
    }
    Ok(json)
}

fn parse_settings(args: &mut Args<'_>) -> Result<Command, String> {
    let mut catalogue = None;
    let mut json = false;
    while let Some(arg) = args.next_arg() {
        match arg {
            "--catalogue" => catalogue = Some(PathBuf::from(args.value(arg)?)),
            "--json" => json = true,
            other => return Err(format!("unknown option `{other}` for settings")),
        }
    }
    Ok(Command::Settings { catalogue, json })
}

fn parse_replay(args: &mut Args<'_>) -> Result<Command, String> {
    let mut frames = None;
    let mut analysis = None;
    let mut prompt = "replay".to_owned();
    let mut run_id = None;
    let mut headless = false;
    let mut output = None;
    while let Some(arg) = args.next_arg() {
        match arg {
            "--analysis" => analysis = Some(PathBuf::from(args.value(arg)?)),
            "--prompt" => args.value(arg)?.clone_into(&mut prompt),
            "--run-id" => run_id = Some(RunId(args.number(arg)?)),
            "--headless" => headless = true,
            "--output" => output = Some(PathBuf::from(args.value(arg)?)),
            other if other.starts_with('-') => {
                return Err(format!("unknown option `{other}` for replay"));
            }
            path => {
                if frames.is_some() {
                    return Err("replay takes a single <FRAMES> file".to_owned());
                }
                frames = Some(PathBuf::from(path));
            }
        }
    }
    let frames = frames.ok_or("replay requires a <FRAMES> file")?;
    Ok(Command::Replay {
        frames,
        analysis,
        prompt,
        run_id,
        headless,
        output,
    })
}

impl GlobalOptions {
    /// Defaults, then the settings file, then `EVALBOARD_*`, then flags.
    pub fn resolve_config<F>(&self, env: F) -> Result<DashboardConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match &self.config_path {
            Some(path) => DashboardConfig::from_json_file(path)?,
            None => DashboardConfig::default(),
        };
        config.apply_env(env)?;
        if let Some(raw) = &self.base_url {
            config.base_url = BaseUrl::parse(raw)?;
        }
        if let Some(size) = self.page_size {
            config.page_size = size;
        }
        if let Some(ms) = self.timeout_ms {
            config.request_timeout = std::time::Duration::from_millis(ms);
        }
        config.validate()?;
        Ok(config)
    }
}

pub const USAGE: &str = "\
evalboard - live rubric evaluation dashboard

USAGE:
    evalboard [OPTIONS] <COMMAND> [ARGS]

COMMANDS:
    run --prompt <TEXT> | --prompt-file <FILE> [--output <FILE>] [--quiet]
                          Submit a system prompt and stream its evaluation
    history [--page N] [--limit 5|10|25] [--json]
                          List past evaluations with the score trend
    show <RUN_ID> [--json]
                          Scoreboard of a past evaluation
    detail <RUN_ID> <TEST_CASE_ID> [--json]
                          Input, output and verdict of one test case
    settings [--catalogue <FILE>] [--json]
                          Models and evaluation settings
    replay <FRAMES> [--analysis <FILE>] [--prompt <TEXT>] [--run-id N]
           [--headless] [--output <FILE>]
                          Feed recorded subscription frames (one JSON object
                          per line) through the dashboard offline

OPTIONS:
    --base-url <URL>      Backend origin (default: http://localhost:8000)
    --config <FILE>       JSON settings file
    --page-size <N>       History page size: 5, 10 or 25
    --timeout-ms <MS>     HTTP request timeout
    --log-json <FILE>     Append JSON-lines logs to FILE
    -v, --verbose         Trace-level logging (RUST_LOG overrides)
    -h, --help            Show this help

ENVIRONMENT:
    EVALBOARD_BASE_URL, EVALBOARD_PAGE_SIZE, EVALBOARD_RECONNECT_INTERVAL_MS,
    EVALBOARD_MAX_RECONNECT_ATTEMPTS, EVALBOARD_REQUEST_TIMEOUT_MS

EXAMPLES:
    evalboard run --prompt \"Summarize the transcript without filler.\"
    evalboard history --limit 10
    evalboard show 42
    evalboard replay frames.jsonl --headless --output dashboard.json
";
