//! Subcommand dispatch for the `evalboard` binary.

use std::ffi::OsString;
use std::io::{self, Write as _};
use std::path::Path;

use evalboard_core::{
    Backend, DashboardConfig, HistoryBrowser, Ledger, Notice, NoticeLevel, Scoreboard, TrendSeries,
    bootstrap,
};
use evalboard_error::{EvalError, Result};
use evalboard_types::{ModelConfig, RunId, RunSummary, TestCaseId};
use serde::Serialize;
use tracing::{debug, error};

use crate::args::{self, Command, Invocation, PromptSource};
use crate::driver::{Driver, Observer};
use crate::http::HttpBackend;
use crate::logging;
use crate::render;
use crate::replay::{self, ReplayOptions};
use crate::ws::WsTransport;

/// Exit code for malformed command lines.
pub const EXIT_USAGE: i32 = 2;

/// Parse `os_args` (program name first), run the command, return the exit
/// code.
pub fn run_cli<I>(os_args: I) -> i32
where
    I: IntoIterator<Item = OsString>,
{
    let raw: Vec<String> = os_args
        .into_iter()
        .map(|a| a.to_string_lossy().into_owned())
        .collect();
    let tail = raw.get(1..).unwrap_or_default();

    let invocation = match args::parse(tail) {
        Ok(invocation) => invocation,
        Err(message) => {
            eprintln!("error: {message}");
            eprintln!("run `evalboard --help` for usage");
            return EXIT_USAGE;
        }
    };
    if invocation.command == Command::Help {
        let _ = io::stdout().write_all(args::USAGE.as_bytes());
        return 0;
    }

    match logging::init_logging(
        invocation.global.verbose,
        invocation.global.log_json.as_deref(),
    ) {
        Ok(guard) => {
            if let Some(path) = &guard.log_path {
                debug!(path = %path.display(), "json log enabled");
            }
        }
        Err(err) => eprintln!("warning: {err}"),
    }

    match execute(&invocation) {
        Ok(()) => 0,
        Err(err) => {
            error!(error = %err, class = %err.class(), "command failed");
            eprintln!("error: {err}");
            if let Some(hint) = err.suggestion() {
                eprintln!("hint: {hint}");
            }
            err.exit_code()
        }
    }
}

fn execute(invocation: &Invocation) -> Result<()> {
    if let Command::Replay {
        frames,
        analysis,
        prompt,
        run_id,
        headless,
        output,
    } = &invocation.command
    {
        // Replays are offline; local settings do not apply.
        let options = ReplayOptions {
            frames,
            analysis: analysis.as_deref(),
            prompt,
            run_id: *run_id,
        };
        return run_replay(&options, *headless, output.as_deref());
    }

    let config = invocation
        .global
        .resolve_config(|key| std::env::var(key).ok())?;
    debug!(base_url = %config.base_url, page_size = config.page_size, "configuration resolved");

    match &invocation.command {
        Command::Run {
            prompt,
            output,
            quiet,
        } => {
            let prompt = match prompt {
                PromptSource::Inline(text) => text.clone(),
                PromptSource::File(path) => std::fs::read_to_string(path)?,
            };
            run_live(&config, &prompt, output.as_deref(), *quiet)
        }
        Command::History { page, limit, json } => {
            let backend = connect_http(&config)?;
            history(&backend, *page, limit.unwrap_or(config.page_size), *json)
        }
        Command::Show { run_id, json } => {
            let base = HttpBackend::new(config.base_url.clone(), config.request_timeout)?;
            let boot = bootstrap(&base, &config.base_url)?;
            let backend = base.rebased(boot.api_base.clone());
            let run = find_run(&backend, *run_id, config.page_size)?;
            let mut ledger = Ledger::new();
            ledger.load_snapshot(&run);
            let board = Scoreboard::build(&ledger.view(), &boot.analysis);
            if *json {
                print_json(&ShowOutput {
                    run: &run,
                    scoreboard: &board,
                })
            } else {
                print!("{}", render::run_header(&run));
                print!("{}", render::scoreboard(&board));
                Ok(())
            }
        }
        Command::Detail {
            run_id,
            test_case_id,
            json,
        } => {
            let backend = connect_http(&config)?;
            detail(&backend, *run_id, *test_case_id, *json)
        }
        Command::Settings { catalogue, json } => {
            let backend = connect_http(&config)?;
            let runtime = backend.runtime_config()?;
            let settings = backend.evaluation_settings()?;
            let catalogue = catalogue.as_deref().map(load_catalogue).transpose()?;
            if *json {
                print_json(&SettingsOutput {
                    runtime: &runtime,
                    settings: &settings,
                    catalogue: catalogue.as_ref(),
                })
            } else {
                print!("{}", render::settings(&runtime, &settings, catalogue.as_ref()));
                Ok(())
            }
        }
        Command::Help | Command::Replay { .. } => Ok(()),
    }
}

#[derive(Serialize)]
struct ShowOutput<'a> {
    run: &'a RunSummary,
    scoreboard: &'a Scoreboard,
}

#[derive(Serialize)]
struct SettingsOutput<'a> {
    runtime: &'a evalboard_types::RuntimeConfig,
    settings: &'a evalboard_types::EvaluationSettings,
    catalogue: Option<&'a ModelConfig>,
}

#[derive(Serialize)]
struct HistoryOutput<'a> {
    page: u32,
    pages: u32,
    total_count: u64,
    runs: &'a [RunSummary],
    trend: TrendSeries,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// HTTP client pointed at the API origin named by `/config`.
fn connect_http(config: &DashboardConfig) -> Result<HttpBackend> {
    let base = HttpBackend::new(config.base_url.clone(), config.request_timeout)?;
    let runtime = base.runtime_config()?;
    Ok(base.rebased(runtime.api_base(&config.base_url)))
}

fn history<B: Backend>(backend: &B, page: u32, limit: u32, json: bool) -> Result<()> {
    let mut browser = HistoryBrowser::new(limit)?;
    let mut request = browser.refresh();
    for _ in 1..page {
        browser.apply(request.seq, backend.list_runs(request.page, request.limit));
        match browser.next_page() {
            Some(next) => request = next,
            None => break,
        }
    }
    let seq = request.seq;
    let result = backend.list_runs(request.page, request.limit);
    browser.apply(seq, result);
    if let Some(message) = browser.error() {
        return Err(EvalError::HistoryUnavailable {
            detail: message.to_owned(),
        });
    }
    let pages = browser.current().map_or(0, |p| p.pages);
    if json {
        print_json(&HistoryOutput {
            page: browser.page(),
            pages,
            total_count: browser.current().map_or(0, |p| p.total_count),
            runs: browser.runs(),
            trend: browser.trend(),
        })
    } else {
        print!(
            "{}",
            render::history(browser.runs(), browser.page(), pages, &browser.trend())
        );
        Ok(())
    }
}

/// Walk history pages until `run_id` turns up.
fn find_run<B: Backend>(backend: &B, run_id: RunId, limit: u32) -> Result<RunSummary> {
    let mut browser = HistoryBrowser::new(limit)?;
    let mut request = browser.refresh();
    loop {
        let result = backend.list_runs(request.page, request.limit);
        browser.apply(request.seq, result);
        if let Some(message) = browser.error() {
            return Err(EvalError::HistoryUnavailable {
                detail: message.to_owned(),
            });
        }
        if let Ok(run) = browser.find(run_id) {
            return Ok(run.clone());
        }
        match browser.next_page() {
            Some(next) => request = next,
            None => return Err(EvalError::RunNotFound { run_id: run_id.get() }),
        }
    }
}

fn detail<B: Backend>(backend: &B, run_id: RunId, test_case_id: TestCaseId, json: bool) -> Result<()> {
    let details = backend.test_case_details(run_id, test_case_id)?;
    if json {
        print_json(&details)
    } else {
        print!("{}", render::detail(&details));
        Ok(())
    }
}

fn load_catalogue(path: &Path) -> Result<ModelConfig> {
    let text = std::fs::read_to_string(path)?;
    serde_json::from_str(&text)
        .map_err(|err| EvalError::config(format!("model catalogue {}: {err}", path.display())))
}

/// Prints a progress line whenever the displayed counts change.
struct Printer {
    quiet: bool,
    last: String,
}

impl Observer for Printer {
    fn on_update(&mut self, session: &evalboard_core::Session<WsTransport>) {
        if self.quiet {
            return;
        }
        let line = render::progress_line(&session.snapshot());
        if line != self.last {
            eprintln!("{line}");
            self.last = line;
        }
    }

    fn on_notice(&mut self, notice: &Notice) {
        let tag = match notice.level {
            NoticeLevel::Info => "info",
            NoticeLevel::Success => "ok",
            NoticeLevel::Warning => "warn",
            NoticeLevel::Error => "error",
        };
        eprintln!("[{tag}] {}", notice.message);
    }
}

fn run_live(config: &DashboardConfig, prompt: &str, output: Option<&Path>, quiet: bool) -> Result<()> {
    if prompt.trim().is_empty() {
        return Err(EvalError::EmptyPrompt);
    }
    let driver = Driver::connect(config)?;
    let mut printer = Printer {
        quiet,
        last: String::new(),
    };
    let report = driver.run_prompt(prompt, &mut printer);
    print!("{}", render::scoreboard(&report.snapshot.scoreboard));
    if let Some(path) = output {
        std::fs::write(path, serde_json::to_string_pretty(&report.snapshot)?)?;
    }
    match report.error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn run_replay(options: &ReplayOptions<'_>, headless: bool, output: Option<&Path>) -> Result<()> {
    let result = replay::replay(options)?;
    if headless {
        return replay::write_headless(&result, output);
    }
    for notice in &result.notices {
        println!("[{:?}] {}", notice.level, notice.message);
    }
    print!("{}", render::scoreboard(&result.snapshot.scoreboard));
    if let Some(path) = output {
        replay::write_headless(&result, Some(path))?;
    }
    Ok(())
}
