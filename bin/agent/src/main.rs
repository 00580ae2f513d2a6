#![deny(unsafe_code)]

//! The agent binary: the process a controller's transport connects to on
//! the remote side of a session. `synchronizer` runs the dispatch loop
//! that answers a [`protocol::envelope::Request`] stream against a
//! [`endpoint::LocalEndpoint`] rooted at the given path; the remaining
//! subcommands exist for command-line compatibility but are out of scope
//! for this build.

use checksums::HashAlgorithm;
use clap::{Arg, ArgAction, Command as ClapCommand};
use endpoint::{Endpoint, LocalEndpoint, LocalEndpointConfig};
use filters::IgnoreSet;
use futures_util::{SinkExt, StreamExt};
use model::{Cache, IgnoreVCSMode, ProbeMode, ScanMode, SymbolicLinkMode};
use protocol::envelope::{Request, Response, TransitionProblem};
use protocol::multiplex::MessageCodec;
use rsync::Signature;
use stage::TransitionDefaults;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tokio::io::{stdin, stdout};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use transport::{CompressedStream, Joined};

/// Name of the hidden directory a `synchronizer` invocation stages
/// reconstructed content under, relative to the synchronized root, unless
/// `--staging-directory` overrides it.
const DEFAULT_STAGING_DIRNAME: &str = ".pathsync-staging";

fn main() -> ExitCode {
    let matches = match command().try_get_matches() {
        Ok(matches) => matches,
        Err(error) => {
            let _ = error.print();
            return ExitCode::from(if error.use_stderr() { 1 } else { 0 });
        }
    };

    match matches.subcommand() {
        Some(("synchronizer", sub)) => run_synchronizer(sub),
        Some(("install", _)) => unsupported_mode("install"),
        Some(("forwarder", _)) => unsupported_mode("forwarder"),
        Some(("version", _)) => {
            println!("pathsync-agent {}", env!("CARGO_PKG_VERSION"));
            ExitCode::SUCCESS
        }
        Some(("legal", _)) => {
            println!("{}", env!("CARGO_PKG_LICENSE"));
            ExitCode::SUCCESS
        }
        _ => {
            let _ = command().print_help();
            ExitCode::FAILURE
        }
    }
}

fn unsupported_mode(name: &str) -> ExitCode {
    eprintln!("agent: {name} is not implemented in this build");
    ExitCode::FAILURE
}

fn command() -> ClapCommand {
    ClapCommand::new("pathsync-agent")
        .disable_help_subcommand(true)
        .subcommand_required(false)
        .subcommand(
            ClapCommand::new("install").about("Installs the agent binary on a remote host (out of scope)"),
        )
        .subcommand(
            ClapCommand::new("synchronizer")
                .about("Runs the dispatch loop serving a synchronization root over standard I/O")
                .arg(Arg::new("root").required(true).value_name("ROOT"))
                .arg(
                    Arg::new("staging-directory")
                        .long("staging-directory")
                        .value_name("PATH")
                        .action(ArgAction::Set),
                )
                .arg(
                    Arg::new("algorithm")
                        .long("algorithm")
                        .value_name("ALGORITHM")
                        .action(ArgAction::Set)
                        .default_value("sha1"),
                )
                .arg(
                    Arg::new("ignore")
                        .long("ignore")
                        .value_name("PATTERN")
                        .action(ArgAction::Append),
                )
                .arg(
                    Arg::new("ignore-vcs")
                        .long("ignore-vcs")
                        .action(ArgAction::SetTrue)
                        .overrides_with("propagate-vcs"),
                )
                .arg(
                    Arg::new("propagate-vcs")
                        .long("propagate-vcs")
                        .action(ArgAction::SetTrue)
                        .overrides_with("ignore-vcs"),
                )
                .arg(
                    Arg::new("watch-polling-interval")
                        .long("watch-polling-interval")
                        .value_name("SECONDS")
                        .action(ArgAction::Set)
                        .default_value("10"),
                )
                .arg(
                    Arg::new("verbosity")
                        .long("verbosity")
                        .value_name("LEVEL")
                        .action(ArgAction::Set)
                        .default_value("normal"),
                ),
        )
        .subcommand(ClapCommand::new("forwarder").about("Forwards an arbitrary connection (out of scope)"))
        .subcommand(ClapCommand::new("version").about("Prints the agent's version"))
        .subcommand(ClapCommand::new("legal").about("Prints licensing information"))
}

fn run_synchronizer(matches: &clap::ArgMatches) -> ExitCode {
    let verbosity: logging::Verbosity = matches
        .get_one::<String>("verbosity")
        .expect("has a default value")
        .parse()
        .unwrap_or_default();
    if logging::install(verbosity).is_err() {
        eprintln!("agent: logging was already installed");
    }

    let root = PathBuf::from(matches.get_one::<String>("root").expect("required"));
    let staging_directory = matches
        .get_one::<String>("staging-directory")
        .map(PathBuf::from)
        .unwrap_or_else(|| root.join(DEFAULT_STAGING_DIRNAME));

    let algorithm = match parse_algorithm(matches.get_one::<String>("algorithm").expect("has a default value")) {
        Ok(algorithm) => algorithm,
        Err(message) => {
            eprintln!("agent: {message}");
            return ExitCode::FAILURE;
        }
    };

    let ignores = match matches.get_many::<String>("ignore") {
        Some(patterns) => {
            let patterns: Vec<&String> = patterns.collect();
            match IgnoreSet::parse(&patterns) {
                Ok(ignores) => ignores,
                Err(error) => {
                    eprintln!("agent: invalid ignore pattern: {error}");
                    return ExitCode::FAILURE;
                }
            }
        }
        None => IgnoreSet::default(),
    };

    let ignore_vcs_mode = if matches.get_flag("propagate-vcs") {
        IgnoreVCSMode::Propagate
    } else {
        IgnoreVCSMode::default()
    };

    let watch_polling_interval = matches
        .get_one::<String>("watch-polling-interval")
        .expect("has a default value")
        .parse()
        .map(Duration::from_secs)
        .unwrap_or(Duration::from_secs(10));

    let config = LocalEndpointConfig {
        algorithm,
        ignores,
        ignore_vcs_mode,
        symlink_mode: SymbolicLinkMode::default(),
        probe_mode: ProbeMode::default(),
        scan_mode: ScanMode::default(),
        maximum_entry_count: 0,
        watch_polling_interval,
        transition_defaults: TransitionDefaults::default(),
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            eprintln!("agent: failed to start runtime: {error}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(serve(root, staging_directory, config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("agent: {error}");
            ExitCode::FAILURE
        }
    }
}

fn parse_algorithm(name: &str) -> Result<HashAlgorithm, String> {
    match name {
        "sha1" => Ok(HashAlgorithm::Sha1),
        "sha256" => Ok(HashAlgorithm::Sha256),
        "xxh3-128" => Ok(HashAlgorithm::Xxh3_128),
        other => Err(format!("unknown digest algorithm {other:?}")),
    }
}

async fn serve(root: PathBuf, staging_directory: PathBuf, config: LocalEndpointConfig) -> std::io::Result<()> {
    let local = LocalEndpoint::new(root, staging_directory, config, Cache::new(), None, None)?;

    let connection = Joined::new(stdin(), stdout());
    let mut compressed = CompressedStream::new(connection);
    protocol::version::receive_then_send(&mut compressed, protocol::version::CURRENT)
        .await
        .map_err(|error| std::io::Error::new(std::io::ErrorKind::Other, error))?;

    let (read_half, write_half) = tokio::io::split(compressed);
    let mut reader = FramedRead::new(read_half, MessageCodec::<Request>::new());
    let mut writer = FramedWrite::new(write_half, MessageCodec::<Response>::new());

    let cancellation = CancellationToken::new();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        let request = tokio::select! {
            request = reader.next() => request,
            () = &mut shutdown => {
                cancellation.cancel();
                break;
            }
        };

        let Some(request) = request else {
            break;
        };
        let request = match request {
            Ok(request) => request,
            Err(error) => {
                tracing::error!(%error, "malformed request frame");
                break;
            }
        };

        if let Request::Supply { paths, signatures } = request {
            if supply(&local, paths, signatures, &mut writer, &cancellation).await.is_err() {
                break;
            }
            continue;
        }

        let terminate = matches!(request, Request::Shutdown);
        let response = dispatch(&local, request, &cancellation).await;
        if writer.send(response).await.is_err() {
            break;
        }
        if terminate {
            break;
        }
    }

    local.shutdown().await.ok();
    Ok(())
}

async fn dispatch(local: &LocalEndpoint, request: Request, cancellation: &CancellationToken) -> Response {
    match request {
        Request::Poll => match local.poll(cancellation).await {
            Ok(()) => Response::Poll,
            Err(error) => Response::Error(error.to_string()),
        },
        Request::Scan { baseline } => match local.scan(baseline, cancellation).await {
            Ok(report) => Response::Scan {
                snapshot: report.snapshot,
                preserves_executability: report.preserves_executability,
                decomposes_unicode: report.decomposes_unicode,
                error: None,
            },
            Err(error) => Response::Error(error.to_string()),
        },
        Request::Stage { requests } => match local.stage(requests, cancellation).await {
            Ok(response) => Response::Stage(response),
            Err(error) => Response::Error(error.to_string()),
        },
        Request::Supply { .. } => {
            unreachable!("Supply is dispatched separately by serve's loop, not through dispatch")
        }
        Request::Receive {
            path,
            digest,
            signature,
            frames,
        } => match local.receive(path, digest, signature, frames, cancellation).await {
            Ok(()) => Response::Receive,
            Err(error) => Response::Error(error.to_string()),
        },
        Request::Transition { changes } => match local.transition(changes, cancellation).await {
            Ok(report) => Response::Transition {
                applied: report.applied,
                problems: report
                    .problems
                    .into_iter()
                    .map(|problem| TransitionProblem {
                        path: problem.path,
                        reason: problem.reason,
                    })
                    .collect(),
            },
            Err(error) => Response::Error(error.to_string()),
        },
        Request::Shutdown => match local.shutdown().await {
            Ok(()) => Response::Shutdown,
            Err(error) => Response::Error(error.to_string()),
        },
    }
}

/// Drives a `Supply` request: runs [`Endpoint::supply`] concurrently with a
/// loop that forwards each frame it produces to `writer` as its own
/// [`Response::SupplyFrame`], so a large file's reconstruction can begin on
/// the other side before the whole transmission completes. Returns `Err`
/// only when the connection itself has gone away (the caller should stop
/// serving); a supply-level failure is instead reported as a
/// [`Response::Error`] frame.
async fn supply<W>(
    local: &LocalEndpoint,
    paths: Vec<String>,
    signatures: HashMap<String, Signature>,
    writer: &mut FramedWrite<W, MessageCodec<Response>>,
    cancellation: &CancellationToken,
) -> Result<(), ()>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    let (sink, mut frames) = mpsc::unbounded_channel();
    let produce = local.supply(paths, signatures, sink, cancellation);
    let mut connection_failed = false;
    let forward = async {
        while let Some(frame) = frames.recv().await {
            if writer
                .send(Response::SupplyFrame {
                    path: frame.path,
                    frame: frame.frame,
                })
                .await
                .is_err()
            {
                connection_failed = true;
                break;
            }
        }
    };
    let (result, ()) = tokio::join!(produce, forward);

    if connection_failed {
        return Err(());
    }
    if let Err(error) = result {
        if writer.send(Response::Error(error.to_string())).await.is_err() {
            return Err(());
        }
    }
    Ok(())
}

/// Resolves once a platform termination signal arrives: `SIGTERM` (and,
/// portably, Ctrl-C) on Unix, Ctrl-C only on other platforms.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(stream) => stream,
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = terminate.recv() => {},
            _ = tokio::signal::ctrl_c() => {},
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
