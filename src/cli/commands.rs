//! CLI command implementations

use std::io::{self, BufRead, Write};
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::JournalConfig;
use crate::journal::{
    journal_file_path, journal_file_size, read_file_headers, DataToken, FileStorage, IoRes,
    JournalResult, NoopCallback, PageState, TokenId, TokenMap, WriteManager,
};
use crate::observability::{log_event_with_fields, Event, Logger};

use super::args::Command;
use super::errors::{CliError, CliResult};
use super::io::{read_requests, write_error, write_response};

/// One line of `write` input
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum WriteRequest {
    Enqueue {
        id: u64,
        data: String,
        #[serde(default)]
        xid: String,
        #[serde(default)]
        transient: bool,
        #[serde(default)]
        external: bool,
    },
    /// Dequeues the record enqueued by token `id`
    Dequeue {
        id: u64,
        #[serde(default)]
        xid: String,
    },
    Commit {
        id: u64,
        xid: String,
    },
    Abort {
        id: u64,
        xid: String,
    },
    Flush,
}

impl WriteRequest {
    fn token_id(&self) -> Option<TokenId> {
        match self {
            WriteRequest::Enqueue { id, .. }
            | WriteRequest::Dequeue { id, .. }
            | WriteRequest::Commit { id, .. }
            | WriteRequest::Abort { id, .. } => Some(TokenId(*id)),
            WriteRequest::Flush => None,
        }
    }
}

/// Main CLI entry point
///
/// Parses arguments and dispatches to the appropriate command.
/// This is the only function that main.rs should call.
pub fn run() -> CliResult<()> {
    let cli = super::args::Cli::parse_args();
    run_command(cli.command)
}

/// Run the appropriate command based on CLI args
pub fn run_command(cmd: Command) -> CliResult<()> {
    match cmd {
        Command::Init { config } => init(&config),
        Command::Write { config } => write(&config),
        Command::Inspect { config } => inspect(&config),
    }
}

fn load_config(config_path: &Path) -> CliResult<JournalConfig> {
    let config = JournalConfig::load(config_path)?;
    log_event_with_fields(
        Event::ConfigLoaded,
        &[
            ("path", &config_path.display().to_string()),
            ("journal_dir", &config.journal_dir.display().to_string()),
        ],
    );
    Ok(config)
}

/// Create the journal directory and preallocate every journal file.
///
/// Refuses to touch a directory that already holds journal file 0.
pub fn init(config_path: &Path) -> CliResult<()> {
    let config = load_config(config_path)?;
    let first = journal_file_path(&config.journal_dir, &config.base_filename, 0);
    if first.exists() {
        return Err(CliError::AlreadyInitialized(
            config.journal_dir.display().to_string(),
        ));
    }
    FileStorage::create(
        &config.journal_dir,
        &config.base_filename,
        config.num_jfiles,
        config.jfsize_sblks,
    )?;

    write_response(
        &mut io::stdout(),
        json!({
            "journal_dir": config.journal_dir.display().to_string(),
            "num_jfiles": config.num_jfiles,
            "file_size": journal_file_size(config.jfsize_sblks),
        }),
    )
}

/// Apply write requests from stdin, then flush, drain and print status.
pub fn write(config_path: &Path) -> CliResult<()> {
    let config = load_config(config_path)?;
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    write_stream(&config, stdin.lock(), &mut stdout)
}

/// Runs a write session over arbitrary input and output streams.
pub fn write_stream<R: BufRead, W: Write>(
    config: &JournalConfig,
    input: R,
    output: &mut W,
) -> CliResult<()> {
    let storage = FileStorage::create(
        &config.journal_dir,
        &config.base_filename,
        config.num_jfiles,
        config.jfsize_sblks,
    )?;
    let mut wmgr = WriteManager::initialize(config.write_params(), storage, Box::new(NoopCallback))?;
    let mut tokens = TokenMap::new();

    for request in read_requests::<_, WriteRequest>(input) {
        let request = match request {
            Ok(request) => request,
            Err(e) => {
                write_error(output, e.code_str(), &e.to_string())?;
                continue;
            }
        };
        match apply_request(&mut wmgr, &mut tokens, &request) {
            Ok(res) => {
                let mut data = json!({ "result": res.as_str() });
                if let Some(token) = request.token_id().and_then(|id| tokens.get(id)) {
                    data["id"] = json!(token.id().0);
                    data["rid"] = json!(token.rid());
                    data["state"] = json!(token.wstate());
                }
                write_response(output, data)?;
            }
            Err(e) if e.is_fatal() => {
                write_error(output, e.code().code(), &e.to_string())?;
                return Err(e.into());
            }
            Err(e) => write_error(output, e.code().code(), &e.to_string())?,
        }
        // apply whatever already finished without waiting
        wmgr.get_events(&mut tokens, PageState::Unused, Some(Duration::ZERO), false)?;
    }

    wmgr.shutdown(&mut tokens)?;
    write_response(
        output,
        json!({
            "status": wmgr.status(),
            "metrics": wmgr.metrics().snapshot(),
        }),
    )
}

/// Runs one request to completion, draining completions while the journal
/// reports a busy page or file.
fn apply_request(
    wmgr: &mut WriteManager,
    tokens: &mut TokenMap,
    request: &WriteRequest,
) -> JournalResult<IoRes> {
    let id = match request.token_id() {
        Some(id) => id,
        None => return wmgr.flush(),
    };
    loop {
        let mut token = tokens.remove(id).unwrap_or_else(|| DataToken::new(id));
        let res = match request {
            WriteRequest::Enqueue {
                data,
                xid,
                transient,
                external,
                ..
            } => wmgr.enqueue(&mut token, data.as_bytes(), xid.as_bytes(), *transient, *external),
            WriteRequest::Dequeue { xid, .. } => wmgr.dequeue(&mut token, xid.as_bytes()),
            WriteRequest::Commit { xid, .. } => wmgr.commit(&mut token, xid.as_bytes()),
            WriteRequest::Abort { xid, .. } => wmgr.abort(&mut token, xid.as_bytes()),
            WriteRequest::Flush => wmgr.flush(),
        };
        tokens.insert(token);
        let res = res?;
        if !res.needs_retry() {
            return Ok(res);
        }
        Logger::trace("WRITE_RETRY", &[("token", &id.to_string()), ("result", res.as_str())]);
        wmgr.get_events(tokens, PageState::Unused, None, false)?;
    }
}

/// Print the header of every journal file
pub fn inspect(config_path: &Path) -> CliResult<()> {
    let config = load_config(config_path)?;
    let headers = read_file_headers(&config.journal_dir, &config.base_filename, config.num_jfiles);

    let files: Vec<Value> = headers
        .into_iter()
        .map(|(fid, header)| match header {
            Ok(h) => json!({
                "fid": fid,
                "lid": h.lid,
                "serial": h.serial,
                "rid": h.rid,
                "first_record_offset": h.first_record_offset,
                "timestamp_sec": h.timestamp_sec,
                "timestamp_nsec": h.timestamp_nsec,
            }),
            Err(e) => json!({
                "fid": fid,
                "error": e.to_string(),
            }),
        })
        .collect();

    write_response(&mut io::stdout(), json!({ "files": files }))
}
