#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

mod args;
mod exit;
mod persona;

use clap::Parser;
use rt_config::manifest::{DeviceIdSelector, Selector};
use rt_orchestrator::{ErrorSplash, Runtime, RuntimeBuilder};

use args::Args;
use exit::ExitCode;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn init_tracing() {
    let envfilter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(tracing::Level::INFO.into())
        .from_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(envfilter).init();
}

fn main() {
    init_tracing();
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) if matches!(e.kind(), clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion) => {
            e.exit()
        }
        Err(e) => {
            eprint!("{e}");
            let code = match e.kind() {
                clap::error::ErrorKind::MissingRequiredArgument | clap::error::ErrorKind::InvalidValue => {
                    ExitCode::MissingParameter
                }
                _ => ExitCode::TooManyArgs,
            };
            std::process::exit(code.code());
        }
    };
    std::process::exit(run(&args).code());
}

fn run(args: &Args) -> ExitCode {
    if let Err(code) = args.validate() {
        return code;
    }
    if let Err(code) = args.check_paths() {
        return code;
    }
    if args.skip_signature {
        tracing::warn!("signature verification disabled; this build must never ship");
    }
    if let Some(server) = &args.telemetry_server {
        tracing::warn!(server, "--telemetry-server has no collector wired in this build; events are dropped");
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!(error = %e, "failed to start the async runtime");
            return ExitCode::PreinitFailure;
        }
    };

    runtime.block_on(async_main(args))
}

async fn async_main(args: &Args) -> ExitCode {
    match boot(args).await {
        Ok(runtime) => drive(runtime, args).await,
        Err((error, splash)) => {
            tracing::error!(error = %error, message = splash.message(), "boot failed");
            ExitCode::from(&error)
        }
    }
}

async fn boot(args: &Args) -> Result<Runtime, (rt_orchestrator::Error, ErrorSplash)> {
    let mut builder = RuntimeBuilder::new(args.cache_dir.clone(), args.file_root.clone());
    if let Some(dir) = &args.extensions {
        builder = builder.extensions_dir(dir.clone());
    }

    if let Some(wasm_path) = &args.wasm {
        let overlay = match &args.config {
            Some(path) => Some(persona::read_config_overlay(path).map_err(|e| (e, ErrorSplash::none()))?),
            None => None,
        };
        return builder.build_from_wasm_file(wasm_path.clone(), overlay).await;
    }

    let persona_file_path = args.persona_file.as_ref().expect("validated: persona action requires --persona-file");
    let persona_id = args.persona_id.as_ref().expect("validated: persona action requires --persona-id");
    let persona_file_json = persona::read_persona_file(persona_file_path).map_err(|e| (e, ErrorSplash::none()))?;

    let device_id = if args.device_id.is_empty() { persona::default_device_id() } else { args.device_id.clone() };
    let selector = DeviceIdSelector::new(device_id.clone());
    let device_metrics = rt_config::DeviceMetrics::builder().set("device_id", device_id).build();

    builder
        .persona(persona_file_json, persona_id.clone())
        .partner(args.partner.clone(), args.partner_guid.clone())
        .device_metrics(device_metrics)
        .build(&selector as &dyn Selector)
        .await
}

/// Runs the frame pump until a restart request, an unrecoverable frame
/// error, or an interrupt, then always runs the shutdown path so the
/// guest's `shutdown` export and every extension see a clean teardown.
async fn drive(mut runtime: Runtime, args: &Args) -> ExitCode {
    let interrupted = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
    let watcher = interrupted.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            watcher.store(true, std::sync::atomic::Ordering::Release);
        }
    });

    let outcome = if args.no_app_load {
        tracing::info!("initialized; idling (--no-app-load)");
        loop {
            if interrupted.load(std::sync::atomic::Ordering::Acquire) {
                break ExitCode::Success;
            }
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
    } else {
        run_frames(&mut runtime, &interrupted).await
    };

    match runtime.shutdown().await {
        Ok(()) => outcome,
        Err(e) => {
            tracing::error!(error = %e, "shutdown failed");
            ExitCode::from(&e)
        }
    }
}

async fn run_frames(runtime: &mut Runtime, interrupted: &std::sync::Arc<std::sync::atomic::AtomicBool>) -> ExitCode {
    let mut now_ms: i64 = 0;
    loop {
        if interrupted.load(std::sync::atomic::Ordering::Acquire) {
            tracing::info!("received interrupt; shutting down");
            return ExitCode::Success;
        }
        match runtime.run_frame(now_ms).await {
            Ok(rt_orchestrator::FrameOutcome::Continue) => {}
            Ok(rt_orchestrator::FrameOutcome::RestartRequested) => {
                tracing::info!("guest requested a restart; exiting so the supervisor can relaunch");
                return ExitCode::Success;
            }
            Ok(rt_orchestrator::FrameOutcome::BackgroundRequested) => runtime.enter_background(),
            Ok(rt_orchestrator::FrameOutcome::ForegroundRequested) => runtime.enter_foreground(),
            Err(e) => {
                tracing::error!(error = %e, "frame pump failed");
                return ExitCode::from(&e);
            }
        }
        now_ms += 16;
    }
}
