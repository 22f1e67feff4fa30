use actix_web::{web, App, HttpServer};
use anyhow::Context;
use clap::Parser;
use std::sync::Arc;

use procvisor::api;
use procvisor::cli::CommandArgs;
use procvisor::services::{Builder, GoBuilder, PrebuiltBuilder, Supervisor};
use procvisor::state::new_state;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = CommandArgs::parse();
    let bind_address = format!("{}:{}", args.address, args.port);
    let config = args.supervisor_config();

    std::fs::create_dir_all(&config.home)
        .with_context(|| format!("failed to create {}", config.home.display()))?;

    let builder: Arc<dyn Builder> = if args.prebuilt {
        Arc::new(PrebuiltBuilder)
    } else {
        Arc::new(GoBuilder::new(config.bin_dir()).with_toolchain(args.go.clone()))
    };

    let supervisor = Supervisor::new(config, builder);

    // 读取 dump 文件，损坏时不阻止启动
    match supervisor.restore(args.resurrect).await {
        Ok(0) => {}
        Ok(n) => log::info!("✅ Restored {} process definition(s)", n),
        Err(e) => {
            log::error!("❌ Failed to restore process list: {}", e);
            log::warn!("   Starting with an empty process table");
        }
    }

    print_banner(&args);

    let state = new_state(supervisor.clone());
    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .configure(api::configure)
    })
        .bind(&bind_address)
        .with_context(|| format!("failed to bind {}", bind_address))?
        .run()
        .await?;

    log::info!("🛑 Server stopped, terminating managed processes");
    supervisor.shutdown().await;
    Ok(())
}

fn print_banner(args: &CommandArgs) {
    println!("╔═══════════════════════════════════════════════════════════╗");
    println!("║      procvisor v{:<42}║", env!("CARGO_PKG_VERSION"));
    println!("║      Remote Process Supervisor                            ║");
    println!("╚═══════════════════════════════════════════════════════════╝");
    println!();
    println!("🚀 Server starting on http://{}:{}", args.address, args.port);
    println!("📂 Home: {}", args.home.display());
    println!();
    println!("📋 Available endpoints:");
    println!("  POST   /api/process                 - Build and start a process");
    println!("  DELETE /api/process                 - Delete all processes");
    println!("  POST   /api/process/{{name}}/start    - Start a stopped process");
    println!("  POST   /api/process/{{name}}/restart  - Restart a process");
    println!("  POST   /api/process/{{name}}/stop     - Stop a process");
    println!("  DELETE /api/process/{{name}}          - Delete a process");
    println!("  GET    /api/process/{{name}}          - Process detail");
    println!("  GET    /api/status                  - Status of all processes");
    println!("  POST   /api/save                    - Persist the process list");
    println!("  GET    /metrics                     - Prometheus metrics");
    println!("  GET    /health                      - Health check");
    println!("═══════════════════════════════════════════════════════════");
}
