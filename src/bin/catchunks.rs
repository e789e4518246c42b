//! Binary entry point: parse arguments, resolve options, run discovery then
//! the pipeline, and map the outcome to the source's own exit codes
//! (`ndncatchunks.cpp`): 0 success, 1 runtime error, 2 usage error,
//! 3 application-level Nack.

use std::io;
use std::net::ToSocketAddrs;
use std::rc::Rc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use catchunks::cli::{Cli, DiscoverMode};
use catchunks::consumer;
use catchunks::discover;
use catchunks::face::{Face, UdpFace};
use catchunks::Error;

fn exit_code(err: &Error) -> i32 {
    match err {
        Error::Usage(_) => 2,
        Error::ApplicationNack(_) => 3,
        Error::Transport(_) | Error::Decode(_) | Error::PipelineFailed(_) | Error::DiscoveryFailed(_) => 1,
    }
}

fn resolve_addr(addr: &str) -> io::Result<std::net::SocketAddr> {
    addr.to_socket_addrs()?
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, format!("unresolvable address: {addr}")))
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    let resolved = match cli.resolve() {
        Ok(resolved) => resolved,
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(exit_code(&err));
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(resolved.log_level.clone()))
        .with_writer(io::stderr)
        .init();

    let local = tokio::task::LocalSet::new();
    let outcome = local.run_until(run(resolved)).await;

    match outcome {
        Ok(()) => std::process::exit(0),
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(exit_code(&err));
        }
    }
}

async fn run(resolved: catchunks::cli::ResolvedConfig) -> Result<(), Error> {
    let remote = resolve_addr(&resolved.host)?;
    let bind = resolve_addr(&resolved.bind)?;
    let face: Rc<dyn Face> = Rc::new(UdpFace::connect(bind, remote).await?);

    let fetch = async {
        let seed = match resolved.discover_mode {
            DiscoverMode::Fixed => {
                discover::fixed(&*face, resolved.name.clone(), &resolved.discover_options).await?
            }
            DiscoverMode::Iterative => {
                discover::iterative(&*face, resolved.name.clone(), &resolved.discover_options).await?
            }
        };

        let versioned_prefix = seed.name.without_last();
        let stdout = tokio::io::stdout();
        consumer::fetch(
            face.clone(),
            versioned_prefix,
            seed,
            resolved.pipeline_options,
            resolved.print_stat,
            stdout,
        )
        .await
    };

    tokio::select! {
        result = fetch => result,
        _ = tokio::signal::ctrl_c() => {
            Err(Error::PipelineFailed("interrupted".to_string()))
        }
    }
}
