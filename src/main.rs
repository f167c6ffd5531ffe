//! dictflow binary: pipe-mode dictation without device drivers.
//!
//! Reads raw 16kHz mono s16le PCM from stdin, runs it through the full
//! session pipeline against the configured ASR worker, and writes the
//! transcript to stdout.

mod cli;

use anyhow::Context;
use clap::Parser;
use cli::{Cli, Commands};
use dictflow::asr::{AsrEngine, WorkerProxy};
use dictflow::audio::capture::ReaderCapture;
use dictflow::clock::SystemClock;
use dictflow::config::Config;
use dictflow::format::PassthroughFormatter;
use dictflow::inject::StdoutInjector;
use dictflow::ipc::transport::WorkerTransport;
use dictflow::session::{Session, SessionEvent};
use std::io::Read;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Reader adapter that fires a oneshot when the inner reader hits EOF,
/// so the main task knows when the piped audio has all arrived.
struct EofTap<R> {
    inner: R,
    signal: Option<tokio::sync::oneshot::Sender<()>>,
}

impl<R: Read> Read for EofTap<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n == 0
            && let Some(signal) = self.signal.take()
        {
            let _ = signal.send(());
        }
        Ok(n)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_filter())),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load_or_default(&cli.config_path())
        .context("loading configuration")?
        .with_env_overrides();
    config.validate().context("validating configuration")?;

    match cli.command {
        Some(Commands::Pipe { final_pass }) => run_pipe(config, final_pass).await,
        Some(Commands::CheckConfig) => {
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        None => {
            println!("dictflow - offline push-to-talk dictation pipeline");
            println!("Run with --help for usage");
            Ok(())
        }
    }
}

async fn run_pipe(mut config: Config, final_pass: bool) -> anyhow::Result<()> {
    if final_pass {
        config.asr.final_pass = true;
    }

    let proxy: Arc<WorkerProxy> = Arc::new(WorkerProxy::new(
        config.asr.backend,
        config.asr.wire.into(),
        WorkerTransport::new(config.worker_command()),
    ));
    proxy.start().context("spawning ASR worker")?;
    proxy.warmup().await.with_context(|| {
        format!("warming up ASR worker; stderr tail:\n{}", proxy.diagnostics())
    })?;

    let (eof_tx, eof_rx) = tokio::sync::oneshot::channel();
    let capture = ReaderCapture::new(EofTap {
        inner: std::io::stdin(),
        signal: Some(eof_tx),
    });

    let session = Session::new(
        config.session_config(),
        proxy.clone() as Arc<dyn AsrEngine>,
        Arc::new(StdoutInjector),
        Arc::new(PassthroughFormatter),
        Box::new(capture),
        Arc::new(SystemClock),
    )?;
    session.set_format_mode(config.text.format_mode);

    let mut events = session.subscribe();
    session.handle_press().await.context("starting session")?;

    tokio::select! {
        _ = eof_rx => tracing::debug!("stdin exhausted"),
        _ = tokio::signal::ctrl_c() => tracing::debug!("interrupted"),
    }

    session.handle_release().await.context("finishing session")?;
    proxy.shutdown().await;

    // Terminate the line after streamed output.
    println!();

    while let Ok(event) = events.try_recv() {
        if let SessionEvent::DictationCompleted { raw, .. } = event {
            tracing::info!(chars = raw.len(), "transcription complete");
        }
    }

    Ok(())
}
