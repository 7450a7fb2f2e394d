use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::io::BufReader;
use tracing::{error, info, Instrument};
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::EnvFilter;

use badge_idler::badges::total_cards;
use badge_idler::config::DEFAULT_CONFIG_PATH;
use badge_idler::fetch::fetcher_from_config;
use badge_idler::worker::{exit_code, run_worker};
use badge_idler::{
    BadgeSource, IdlerConfig, IdlerError, PageFetcher, ProcessLauncher, ScrapeService,
    Supervisor,
};

#[derive(Parser, Debug)]
#[command(name = "badge-idler", version, about = "Steamのカードドロップを放置で集める")]
struct Cli {
    /// 設定ファイル
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// デバッグログを出す
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// ドロップがなくなるまで放置する（既定）
    Run,
    /// 放置対象を表示するだけ
    Check,
    /// 設定ファイルのテンプレートを書き出す
    InitConfig {
        /// 既存のファイルを上書きする
        #[arg(long)]
        force: bool,
    },
    /// ワーカープロセス（内部用）
    #[command(hide = true)]
    Worker {
        app_id: u32,
        #[arg(long)]
        library: PathBuf,
    },
}

fn init_tracing(debug: bool) {
    let default = if debug { "info,badge_idler=debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S".to_string()))
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: &Path) -> Result<IdlerConfig, IdlerError> {
    let config = IdlerConfig::load(path)?.apply_env();
    config.validate()?;
    Ok(config)
}

async fn run(config_path: &Path, debug: bool) -> Result<(), IdlerError> {
    let config = load_config(config_path)?;

    let fetcher = fetcher_from_config(&config.fetch, &config.auth, debug)?;
    let service = ScrapeService::new(fetcher.clone(), &config)?.with_debug(debug);
    let launcher = ProcessLauncher::new(&config)?.with_debug(debug);
    info!("Using steam_api library {:?}", launcher.library());

    let mut supervisor = Supervisor::new(Arc::new(service), Arc::new(launcher), config.idle.clone());

    let result = tokio::select! {
        result = supervisor.run() => result.map(Some),
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted by user.");
            Ok(None)
        }
    };

    supervisor.shutdown().await;
    fetcher.close().await?;

    if let Some(summary) = result? {
        info!("All cards received: {}", summary);
    }
    Ok(())
}

async fn check(config_path: &Path, debug: bool) -> Result<(), IdlerError> {
    let config = load_config(config_path)?;

    let fetcher = fetcher_from_config(&config.fetch, &config.auth, debug)?;
    let service = ScrapeService::new(fetcher.clone(), &config)?.with_debug(debug);
    let badges = service.overview().await;
    fetcher.close().await?;
    let badges = badges?;

    for badge in &badges {
        println!("{:>8}  {:>3} cards  {}", badge.app_id, badge.drops_left, badge.title);
    }
    println!("{} games, {} cards", badges.len(), total_cards(&badges));
    Ok(())
}

async fn worker(app_id: u32, library: &Path) -> ExitCode {
    let span = tracing::info_span!("worker", app_id);
    let input = BufReader::new(tokio::io::stdin());
    let output = tokio::io::stdout();

    match run_worker(app_id, library, input, output).instrument(span).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::from(exit_code(&e) as u8)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let result = match cli.command.unwrap_or(Command::Run) {
        Command::Worker { app_id, library } => return worker(app_id, &library).await,
        Command::InitConfig { force } => IdlerConfig::write_template(&cli.config, force),
        Command::Check => check(&cli.config, cli.debug).await,
        Command::Run => {
            info!("badge-idler {}", env!("CARGO_PKG_VERSION"));
            run(&cli.config, cli.debug).await
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults_to_run() {
        let cli = Cli::parse_from(["badge-idler"]);
        assert!(cli.command.is_none());
        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_PATH));
        assert!(!cli.debug);
    }

    #[test]
    fn test_cli_worker_args() {
        let cli = Cli::parse_from([
            "badge-idler",
            "worker",
            "440",
            "--library",
            "./libsteam_api64.so",
            "--debug",
        ]);
        assert!(cli.debug);
        match cli.command {
            Some(Command::Worker { app_id, library }) => {
                assert_eq!(app_id, 440);
                assert_eq!(library, PathBuf::from("./libsteam_api64.so"));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_cli_init_config_force() {
        let cli = Cli::parse_from(["badge-idler", "init-config"]);
        assert!(matches!(cli.command, Some(Command::InitConfig { force: false })));

        let cli = Cli::parse_from(["badge-idler", "--config", "idler.toml", "init-config", "--force"]);
        assert!(matches!(cli.command, Some(Command::InitConfig { force: true })));
        assert_eq!(cli.config, PathBuf::from("idler.toml"));
    }
}
