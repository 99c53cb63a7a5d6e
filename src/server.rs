use std::path::PathBuf;
use std::sync::Arc;

use actix_web::{get, post, web, App, HttpResponse, HttpServer, Responder};
use log::info;
use serde::Deserialize;

use crucible_core::compile::Language;
use crucible_core::error::Error as CoreError;
use crucible_core::service::JudgeService;
use crucible_core::workdir::WorkDir;
use crucible_core::{CancelToken, JudgeResult, JudgeTask, TestCase};

/// Wire format of the judge call. Field names follow the service IDL;
/// the response body is the core `JudgeResult` serialized as is.
#[derive(Debug, Deserialize)]
pub struct JudgeRequest {
    pub id: String,
    pub source_code: String,
    pub language: Language,
    /// Milliseconds per case.
    pub time_limit: u64,
    /// Megabytes per case.
    pub memory_limit: u64,
    pub test_cases: Vec<TestCase>,
    #[serde(default)]
    pub work_dir: Option<PathBuf>,
}

pub struct AppState {
    pub service: Arc<JudgeService>,
    pub temp_dir: PathBuf,
}

#[get("/ping")]
async fn ping() -> impl Responder {
    HttpResponse::Ok().body("pong")
}

#[post("/judge")]
async fn judge(state: web::Data<AppState>, request: web::Json<JudgeRequest>) -> HttpResponse {
    let request = request.into_inner();
    info!(
        "received submission {} ({:?}, {} cases)",
        request.id,
        request.language,
        request.test_cases.len()
    );

    let work_dir = match &request.work_dir {
        Some(path) => WorkDir::external(path),
        None => WorkDir::create(&state.temp_dir, &request.id),
    };
    let work_dir = match work_dir {
        Ok(dir) => dir,
        Err(err) => {
            return HttpResponse::InternalServerError().json(JudgeResult::system_error(format!(
                "failed to prepare work dir: {}",
                err
            )))
        }
    };

    let task = JudgeTask {
        id: request.id.clone(),
        source_code: request.source_code,
        language: request.language,
        time_limit: request.time_limit,
        memory_limit: request.memory_limit,
        test_cases: request.test_cases,
        work_dir,
    };

    let (reply, cancel) = match state.service.submit(task) {
        Ok(pair) => pair,
        Err(CoreError::Busy) => {
            return HttpResponse::ServiceUnavailable()
                .json(JudgeResult::system_error(CoreError::Busy.to_string()))
        }
        Err(err) => {
            return HttpResponse::InternalServerError()
                .json(JudgeResult::system_error(err.to_string()))
        }
    };

    // If the client disconnects this future is dropped and the guard
    // cancels the run; the worker kills the in-flight case and discards
    // the unread result.
    let mut guard = CancelGuard {
        token: cancel,
        armed: true,
    };
    let outcome = web::block(move || reply.recv()).await;
    match outcome {
        Ok(Ok(result)) => {
            guard.armed = false;
            info!(
                "submission {} finished: {}",
                request.id,
                result.status.as_str()
            );
            HttpResponse::Ok().json(result)
        }
        _ => HttpResponse::InternalServerError().json(JudgeResult::system_error(
            "judge worker dropped the submission".into(),
        )),
    }
}

struct CancelGuard {
    token: Arc<CancelToken>,
    armed: bool,
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        if self.armed {
            self.token.cancel();
        }
    }
}

pub async fn run(port: u16, state: AppState) -> std::io::Result<()> {
    let data = web::Data::new(state);
    info!("listening on 0.0.0.0:{}", port);
    HttpServer::new(move || App::new().app_data(data.clone()).service(ping).service(judge))
        .bind(("0.0.0.0", port))?
        .run()
        .await
}
