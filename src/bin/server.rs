//! HTTP server for Terraform jobs
//!
//! Plan and apply requests answer with a server-sent event stream of the
//! job's progress. Callers are identified by the upstream identity layer
//! through the `X-Auth-User` and `X-Auth-Role` headers.
//!
//! ## Endpoints
//!
//! POST /terraform/plan - Run a plan, streaming events
//! POST /terraform/apply - Run an apply, streaming events
//! GET /terraform/status/{id} - Get job status
//! GET /terraform/jobs - List visible jobs
//! GET /health - Liveness

use actix_web::error::InternalError;
use actix_web::http::header;
use actix_web::web::Bytes;
use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer, Responder};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use tfbox::{
    JobController, JobKind, JobRequest, JobSummary, JobView, Principal, RunnerConfig, RunnerError,
};

const USER_HEADER: &str = "X-Auth-User";
const ROLE_HEADER: &str = "X-Auth-Role";
const JOB_ID_HEADER: &str = "X-Job-Id";
/// Request bodies above this are rejected before deserialization
const BODY_LIMIT: usize = 256 * 1024;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = RunnerConfig::from_env().map_err(std::io::Error::other)?;
    let controller = web::Data::new(JobController::new(config).map_err(std::io::Error::other)?);
    controller.start_sweeper();

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(3000);
    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0".to_string());
    info!("Terraform job server starting on http://{}:{}", bind_addr, port);

    let state = controller.clone();
    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .app_data(json_config())
            .route("/health", web::get().to(health_check))
            .service(
                web::scope("/terraform")
                    .route("/plan", web::post().to(submit_plan))
                    .route("/apply", web::post().to(submit_apply))
                    .route("/status/{id}", web::get().to(get_status))
                    .route("/jobs", web::get().to(list_jobs)),
            )
    })
    .bind((bind_addr.as_str(), port))?
    .run()
    .await?;

    info!("Server stopped, releasing jobs");
    controller.shutdown().await;
    Ok(())
}

fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .limit(BODY_LIMIT)
        .error_handler(|err, _req| {
            let details = err.to_string();
            InternalError::from_response(
                err,
                HttpResponse::BadRequest().json(ErrorBody::new("Validation failed", details)),
            )
            .into()
        })
}

// ============ API Types ============

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ErrorBody {
    fn new(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: Some(details.into()),
            message: None,
        }
    }

    fn with_message(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: None,
            message: Some(message.into()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub success: bool,
    pub job: JobView,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JobListResponse {
    pub success: bool,
    pub jobs: Vec<JobSummary>,
    pub total: usize,
}

/// Caller identity from the upstream identity layer
fn principal(req: &HttpRequest) -> Option<Principal> {
    let header_str = |name: &str| {
        req.headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };
    let user = header_str(USER_HEADER)?;
    let role = header_str(ROLE_HEADER).unwrap_or("user");
    Some(Principal::new(user, role))
}

fn unauthorized() -> HttpResponse {
    HttpResponse::Unauthorized().json(ErrorBody::with_message(
        "Unauthorized",
        "Authentication required",
    ))
}

// ============ Handlers ============

/// Health check endpoint
async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "service": "tfbox",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn submit_plan(
    req: HttpRequest,
    body: web::Json<JobRequest>,
    controller: web::Data<JobController>,
) -> HttpResponse {
    submit(JobKind::Plan, req, body.into_inner(), &controller)
}

async fn submit_apply(
    req: HttpRequest,
    body: web::Json<JobRequest>,
    controller: web::Data<JobController>,
) -> HttpResponse {
    submit(JobKind::Apply, req, body.into_inner(), &controller)
}

/// Start a job and answer with its event stream
fn submit(
    kind: JobKind,
    req: HttpRequest,
    request: JobRequest,
    controller: &JobController,
) -> HttpResponse {
    let Some(principal) = principal(&req) else {
        return unauthorized();
    };

    let handle = match controller.submit(kind, request, &principal) {
        Ok(handle) => handle,
        Err(RunnerError::Validation(details)) => {
            return HttpResponse::BadRequest().json(ErrorBody::new("Validation failed", details));
        }
        Err(e) => {
            error!("Failed to start {} for {}: {}", kind, principal.name, e);
            return HttpResponse::InternalServerError().json(ErrorBody::with_message(
                format!("{} execution failed", kind),
                e.public_message(),
            ));
        }
    };

    let job_id = handle.id.clone();
    // Dropping the body stream on disconnect drops the receiver, which
    // cancels the running command.
    let body = futures::stream::unfold(handle.events, |mut events| async move {
        events
            .recv()
            .await
            .map(|event| (Ok::<_, actix_web::Error>(Bytes::from(event.to_sse())), events))
    });

    HttpResponse::Ok()
        .insert_header((header::CONTENT_TYPE, "text/event-stream"))
        .insert_header((header::CACHE_CONTROL, "no-cache"))
        .insert_header((JOB_ID_HEADER, job_id))
        .streaming(body)
}

/// Get job status
async fn get_status(
    req: HttpRequest,
    id: web::Path<String>,
    controller: web::Data<JobController>,
) -> HttpResponse {
    let Some(principal) = principal(&req) else {
        return unauthorized();
    };

    match controller.status(id.as_str(), &principal) {
        Ok(job) => HttpResponse::Ok().json(StatusResponse { success: true, job }),
        Err(RunnerError::JobNotFound(_)) => HttpResponse::NotFound().json(ErrorBody::with_message(
            "Job not found",
            "The specified job ID does not exist or has expired",
        )),
        Err(RunnerError::AccessDenied) => {
            warn!("{} denied status of job {}", principal.name, id);
            HttpResponse::Forbidden().json(ErrorBody::with_message(
                "Access denied",
                "You can only view your own jobs",
            ))
        }
        Err(e) => {
            error!("Status lookup for {} failed: {}", id, e);
            HttpResponse::InternalServerError()
                .json(ErrorBody::with_message("Status lookup failed", e.public_message()))
        }
    }
}

/// List jobs visible to the caller
async fn list_jobs(req: HttpRequest, controller: web::Data<JobController>) -> HttpResponse {
    let Some(principal) = principal(&req) else {
        return unauthorized();
    };
    let jobs = controller.list(&principal);
    HttpResponse::Ok().json(JobListResponse {
        success: true,
        total: jobs.len(),
        jobs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::body::to_bytes;
    use actix_web::{http::StatusCode, test};
    use std::sync::Arc;
    use tempfile::TempDir;
    use tfbox::LocalRuntime;

    fn status_of<R: Responder>(resp: R) -> StatusCode {
        resp.respond_to(&test::TestRequest::default().to_http_request())
            .status()
    }

    fn state() -> (TempDir, web::Data<JobController>) {
        let tmp = tempfile::tempdir().unwrap();
        let script = tmp.path().join("terraform.sh");
        std::fs::write(&script, "echo \"$1 done\"\n").unwrap();
        let config = RunnerConfig::builder()
            .workspace_root(tmp.path().join("ws"))
            .build()
            .unwrap();
        let runtime = Arc::new(LocalRuntime::new("sh").with_args([script.display().to_string()]));
        let controller = JobController::with_runtime(config, runtime).unwrap();
        (tmp, web::Data::new(controller))
    }

    fn as_user(name: &str, role: &str) -> HttpRequest {
        test::TestRequest::default()
            .insert_header((USER_HEADER, name))
            .insert_header((ROLE_HEADER, role))
            .to_http_request()
    }

    async fn run_plan(controller: &web::Data<JobController>, user: &str) -> (String, String) {
        let resp = submit_plan(
            as_user(user, "user"),
            web::Json(JobRequest::new("resource \"null_resource\" \"x\" {}")),
            controller.clone(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let id = resp
            .headers()
            .get(JOB_ID_HEADER)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        let body = to_bytes(resp.into_body()).await.unwrap();
        (id, String::from_utf8(body.to_vec()).unwrap())
    }

    #[actix_web::test]
    async fn health_endpoint_works() {
        assert_eq!(status_of(health_check().await), StatusCode::OK);
    }

    #[actix_web::test]
    async fn principal_requires_user_header() {
        let anonymous = test::TestRequest::default().to_http_request();
        assert!(principal(&anonymous).is_none());

        let defaulted = test::TestRequest::default()
            .insert_header((USER_HEADER, "alice"))
            .to_http_request();
        assert_eq!(principal(&defaulted), Some(Principal::user("alice")));
    }

    #[actix_web::test]
    async fn plan_streams_events() {
        let (_tmp, controller) = state();
        let (_id, body) = run_plan(&controller, "alice").await;

        assert!(body.starts_with("event: start\n"));
        assert!(body.contains("event: output\ndata: "));
        assert!(body.contains("plan done"));
        assert!(body.contains("event: complete\n"));
        assert!(body.contains("\"success\":true"));
        assert!(body.ends_with("\n\n"));
    }

    #[actix_web::test]
    async fn submit_without_identity_is_unauthorized() {
        let (_tmp, controller) = state();
        let resp = submit_apply(
            test::TestRequest::default().to_http_request(),
            web::Json(JobRequest::new("x")),
            controller.clone(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert!(controller.registry().is_empty());
    }

    #[actix_web::test]
    async fn invalid_config_is_bad_request() {
        let (_tmp, controller) = state();
        let resp = submit_plan(
            as_user("alice", "user"),
            web::Json(JobRequest::new("")),
            controller.clone(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(controller.registry().is_empty());
    }

    #[actix_web::test]
    async fn status_flow() {
        let (_tmp, controller) = state();
        let (id, _) = run_plan(&controller, "alice").await;

        let resp = get_status(
            as_user("alice", "user"),
            web::Path::from(id.clone()),
            controller.clone(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = to_bytes(resp.into_body()).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["success"], true);
        assert_eq!(value["job"]["status"], "completed");
        assert_eq!(value["job"]["exitCode"], 0);

        let resp = get_status(
            as_user("bob", "user"),
            web::Path::from(id.clone()),
            controller.clone(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        let resp = get_status(
            as_user("ops", "admin"),
            web::Path::from(id),
            controller.clone(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[actix_web::test]
    async fn status_not_found() {
        let (_tmp, controller) = state();
        let resp = get_status(
            as_user("alice", "user"),
            web::Path::from("nope".to_string()),
            controller,
        )
        .await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn list_filters_by_owner() {
        let (_tmp, controller) = state();
        run_plan(&controller, "alice").await;
        run_plan(&controller, "bob").await;

        let resp = list_jobs(as_user("alice", "user"), controller.clone()).await;
        let body = to_bytes(resp.into_body()).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["total"], 1);
        assert_eq!(value["jobs"][0]["user"], "alice");

        let resp = list_jobs(as_user("ops", "admin"), controller.clone()).await;
        let body = to_bytes(resp.into_body()).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["total"], 2);

        let resp = list_jobs(test::TestRequest::default().to_http_request(), controller).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }
}
