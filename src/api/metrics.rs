use actix_web::{web, HttpResponse, Responder};

use crate::metrics::METRICS;
use crate::state::AppState;

pub async fn get_metrics(data: web::Data<AppState>) -> impl Responder {
    let snapshots = data.supervisor.status();
    METRICS.update(&snapshots, &data.hostname);

    // 渲染 Prometheus metrics
    match METRICS.render() {
        Ok(metrics_text) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(metrics_text),
        Err(e) => {
            log::error!("Failed to render metrics: {}", e);
            HttpResponse::InternalServerError().body("Failed to render metrics")
        }
    }
}
