use clap::Parser;
use colored::Colorize;
use shipment_deploy::{Deployer, DeployerOptions};
use shipmentd::config::AppConfig;
use shipmentd::hook::GithubHook;
use shipmentd::routes;
use shipmentd::state::AppState;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = AppConfig::parse();

    // チェックアウト置き場を用意
    std::fs::create_dir_all(&config.repo_path)?;

    // Docker 接続（疎通確認込み）
    let docker = match shipment_container::connect().await {
        Ok(docker) => docker,
        Err(e) => {
            eprintln!();
            eprintln!("{}", "✗ Docker接続エラー".red().bold());
            eprintln!();
            eprintln!("{}", "原因:".yellow());
            eprintln!("  {}", e);
            eprintln!();
            eprintln!("{}", "解決方法:".yellow());
            eprintln!("  • Dockerが起動しているか確認してください");
            eprintln!("  • docker ps コマンドが正常に動作するか確認してください");
            anyhow::bail!("Docker接続に失敗しました");
        }
    };

    let deployer = Arc::new(Deployer::new(
        DeployerOptions {
            repo_root: config.repo_path.clone(),
            shared_config_path: config.shared_config_path.clone(),
            username: config.username.clone(),
            token: config.token.clone(),
            env: config.env.clone(),
            root_domain: config.domain.clone(),
            config_file: config.config_file.clone(),
        },
        docker,
    ));

    let hook = GithubHook::new(config.secret.clone(), config.branch_whitelist.clone());
    let state = Arc::new(AppState {
        deployer,
        secret: config.secret.clone(),
        hook,
    });

    let app = routes::router(state);
    let addr = format!("{}:{}", config.host, config.port);
    info!(env = %config.env, addr = %addr, "Starting shipmentd");

    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
