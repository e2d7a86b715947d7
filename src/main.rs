mod render;

use std::collections::HashSet;
use std::process::ExitCode;
use std::sync::Arc;
use anyhow::{bail, Context, Result};
use tracing_subscriber::EnvFilter;
use swiftdrop::cli::{Cli, Command, SettingsArgs, SettingsCommand, UploadArgs};
use swiftdrop::config::{AppConfig, EngineConfig, FileSettingsStore};
use swiftdrop::core::SettingsStore;
use swiftdrop::{
    FileDescriptor, HttpEngine, SimulatedEngine, TransferEngine, UploadEvent, UploadManager, UploadState,
};
use render::Renderer;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("error")))
        .with_writer(std::io::stderr)
        .init();

    let args = Cli::parse_args();

    match args.command {
        Command::Upload(upload) => {
            let config = AppConfig::load(&args.config)
                .await
                .with_context(|| format!("Can't load {}", args.config.display()))?;
            run_upload(config, upload).await
        }
        Command::Settings(SettingsCommand::Show) => {
            let config = AppConfig::load(&args.config).await?;
            print!("{}", config.to_toml_string()?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Settings(SettingsCommand::Set(settings)) => {
            update_settings(FileSettingsStore::new(&args.config), settings).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn create_engine(config: &EngineConfig) -> Result<Arc<dyn TransferEngine>> {
    let engine: Arc<dyn TransferEngine> = match &config.endpoint {
        Some(endpoint) => Arc::new(HttpEngine::new(endpoint, config.timeout())?),
        None => Arc::new(
            SimulatedEngine::new()
                .with_chunk_delay(config.chunk_delay())
                .with_base_url(&config.result_base_url)?,
        ),
    };

    Ok(engine)
}

async fn run_upload(mut config: AppConfig, args: UploadArgs) -> Result<ExitCode> {
    if let Some(concurrency) = args.concurrency {
        config.policy.max_concurrent_uploads = concurrency;
    }
    if let Some(endpoint) = args.endpoint {
        config.engine.endpoint = Some(endpoint);
    }

    let mut failed = false;
    let mut files = Vec::with_capacity(args.files.len());
    for path in &args.files {
        match FileDescriptor::from_path(path).await {
            Ok(file) => files.push(file),
            Err(err) => {
                eprintln!("{}: {}", path.display(), err);
                failed = true;
            }
        }
    }

    let handle = UploadManager::new(create_engine(&config.engine)?, config.policy)?;
    let manager = handle.manager.clone();
    let mut events = manager.subscribe();

    let outcome = manager.submit(files).await?;
    for rejection in &outcome.rejected {
        eprintln!("rejected {}", rejection);
        failed = true;
    }

    let mut outstanding: HashSet<_> = outcome.accepted.iter().copied().collect();
    let mut renderer = (!args.json).then(Renderer::new);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut cancelling = false;

    if let Some(renderer) = renderer.as_mut() {
        renderer.draw(&manager.get_all_tasks().await?, true)?;
    }

    while !outstanding.is_empty() {
        tokio::select! {
            _ = &mut ctrl_c, if !cancelling => {
                cancelling = true;
                for upload_id in &outstanding {
                    manager.cancel(*upload_id).await?;
                }
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                let force = !matches!(event, UploadEvent::Progress { .. });
                if let UploadEvent::StateChanged { upload_id, new_state, .. } = &event {
                    if new_state.is_terminal() {
                        outstanding.remove(upload_id);
                    }
                }

                if let Some(renderer) = renderer.as_mut() {
                    renderer.draw(&manager.get_all_tasks().await?, force || outstanding.is_empty())?;
                }
            }
        }
    }

    let tasks = manager.get_all_tasks().await?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&tasks)?);
    }
    failed |= tasks.iter().any(|task| task.state != UploadState::Completed);

    handle.shutdown().await?;

    Ok(if failed { ExitCode::FAILURE } else { ExitCode::SUCCESS })
}

async fn update_settings(store: FileSettingsStore, args: SettingsArgs) -> Result<()> {
    let patch = args.patch();
    if patch.is_empty() {
        bail!("Nothing to change, pass at least one setting");
    }

    let policy = store.load().await?.apply(patch)?;
    let saved = store.save(&policy).await?;
    println!("Saved settings to {}", store.path().display());
    print!("{}", toml::to_string_pretty(&saved)?);

    Ok(())
}
