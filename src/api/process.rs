use actix_web::http::StatusCode;
use actix_web::{web, HttpResponse, Responder, ResponseError};

use crate::api::types::{
    DeleteAllResponse, ErrorResponse, OkResponse, StartBinRequest, StatusResponse,
};
use crate::error::SupervisorError;
use crate::state::AppState;

impl ResponseError for SupervisorError {
    fn status_code(&self) -> StatusCode {
        match self {
            SupervisorError::NotFound(_) => StatusCode::NOT_FOUND,
            SupervisorError::AlreadyRunning(_) => StatusCode::CONFLICT,
            SupervisorError::InvalidName(_) => StatusCode::BAD_REQUEST,
            SupervisorError::Build(_) => StatusCode::UNPROCESSABLE_ENTITY,
            SupervisorError::Spawn(_) => StatusCode::INTERNAL_SERVER_ERROR,
            SupervisorError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            SupervisorError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
            SupervisorError::Signal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            SupervisorError::Transport(_) => StatusCode::BAD_GATEWAY,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorResponse {
            status: "error".to_string(),
            kind: self.kind(),
            message: self.detail().to_string(),
        })
    }
}

type ApiResult = Result<HttpResponse, SupervisorError>;

/// StartGoBin: 构建并启动
pub async fn start_bin(data: web::Data<AppState>, req: web::Json<StartBinRequest>) -> ApiResult {
    let req = req.into_inner();
    log::info!(
        "StartGoBin: source={} name={} keep_alive={} args={:?}",
        req.source_path,
        req.name,
        req.keep_alive,
        req.args
    );

    data.supervisor
        .start_from_source(&req.source_path, &req.name, req.keep_alive, req.args)
        .await?;

    Ok(HttpResponse::Ok().json(OkResponse::new(format!("Process '{}' started", req.name))))
}

pub async fn start_process(data: web::Data<AppState>, path: web::Path<String>) -> ApiResult {
    let name = path.into_inner();
    data.supervisor.start(&name).await?;
    Ok(HttpResponse::Ok().json(OkResponse::new(format!("Process '{}' started", name))))
}

pub async fn restart_process(data: web::Data<AppState>, path: web::Path<String>) -> ApiResult {
    let name = path.into_inner();
    data.supervisor.restart(&name).await?;
    Ok(HttpResponse::Ok().json(OkResponse::new(format!("Process '{}' restarted", name))))
}

pub async fn stop_process(data: web::Data<AppState>, path: web::Path<String>) -> ApiResult {
    let name = path.into_inner();
    data.supervisor.stop(&name).await?;
    Ok(HttpResponse::Ok().json(OkResponse::new(format!("Process '{}' stopped", name))))
}

pub async fn delete_process(data: web::Data<AppState>, path: web::Path<String>) -> ApiResult {
    let name = path.into_inner();
    data.supervisor.delete(&name).await?;
    Ok(HttpResponse::Ok().json(OkResponse::new(format!("Process '{}' deleted", name))))
}

/// DeleteAllProcess: 停止并删除全部进程
pub async fn delete_all(data: web::Data<AppState>) -> ApiResult {
    let deleted = data.supervisor.delete_all().await?;
    log::info!("Deleted {} process(es)", deleted.len());
    Ok(HttpResponse::Ok().json(DeleteAllResponse {
        status: "success".to_string(),
        deleted,
    }))
}

/// GetProcByName: 不存在时返回空对象而不是 404
pub async fn get_process(data: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    let detail = data.supervisor.get(&path.into_inner()).unwrap_or_default();
    HttpResponse::Ok().json(detail)
}

/// MonitStatus
pub async fn monit_status(data: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(StatusResponse {
        procs: data.supervisor.status(),
    })
}

pub async fn save(data: web::Data<AppState>) -> ApiResult {
    data.supervisor.save().await?;
    Ok(HttpResponse::Ok().json(OkResponse::new("Process list saved")))
}
