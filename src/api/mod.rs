pub mod metrics;
pub mod process;
pub mod types;

pub use metrics::get_metrics;
pub use process::{
    delete_all, delete_process, get_process, monit_status, restart_process, save, start_bin, start_process,
    stop_process,
};

use actix_web::{web, HttpResponse, Responder};

pub async fn health() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy"
    }))
}

/// 注册全部路由
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/api/process", web::post().to(start_bin))
        .route("/api/process", web::delete().to(delete_all))
        .route("/api/process/{name}", web::get().to(get_process))
        .route("/api/process/{name}", web::delete().to(delete_process))
        .route("/api/process/{name}/start", web::post().to(start_process))
        .route("/api/process/{name}/restart", web::post().to(restart_process))
        .route("/api/process/{name}/stop", web::post().to(stop_process))
        .route("/api/status", web::get().to(monit_status))
        .route("/api/save", web::post().to(save))
        .route("/metrics", web::get().to(get_metrics))
        .route("/health", web::get().to(health));
}
