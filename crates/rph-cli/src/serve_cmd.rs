use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequestParts, Path, State};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router, middleware};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::PgPool;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use rph_core::collector::{GenerationDraft, PlannerSessions};
use rph_core::generation::TextGenerator;
use rph_core::linker::{self, ClassInput, UsageKind};
use rph_core::token::{self, TokenConfig};
use rph_core::{AssessmentRequest, GenerationContext, PlannerError};
use rph_db::models::{Assessment, DskpFormEntry, Grade, SowLesson, Subject};

use crate::config::Environment;

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AppState {
    pool: PgPool,
    tokens: TokenConfig,
    ctx: GenerationContext,
    sessions: PlannerSessions,
    environment: Environment,
    admins: Arc<HashSet<Uuid>>,
}

impl AppState {
    pub fn new(
        pool: PgPool,
        tokens: TokenConfig,
        generator: Arc<dyn TextGenerator>,
        environment: Environment,
    ) -> Self {
        Self {
            ctx: GenerationContext::new(pool.clone(), generator),
            pool,
            tokens,
            sessions: PlannerSessions::new(),
            environment,
            admins: Arc::default(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.ctx = self.ctx.with_timeout(timeout);
        self
    }

    /// Users allowed to replace curriculum reference data.
    pub fn with_admins(mut self, admins: impl IntoIterator<Item = Uuid>) -> Self {
        self.admins = Arc::new(admins.into_iter().collect());
        self
    }
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

pub struct AppError(PlannerError);

/// Internal detail of a `Server` error, attached to the response so the
/// development-only layer can echo it.
#[derive(Clone)]
struct ServerDetail(String);

impl From<PlannerError> for AppError {
    fn from(err: PlannerError) -> Self {
        Self(err)
    }
}

fn status_for(err: &PlannerError) -> StatusCode {
    match err {
        PlannerError::Validation(_) | PlannerError::DuplicateEntity(_) => StatusCode::BAD_REQUEST,
        PlannerError::NotFound(_) => StatusCode::NOT_FOUND,
        PlannerError::NotAuthorized => StatusCode::FORBIDDEN,
        PlannerError::Unauthenticated => StatusCode::UNAUTHORIZED,
        PlannerError::GenerationInProgress => StatusCode::CONFLICT,
        PlannerError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        PlannerError::Upstream(_)
        | PlannerError::MalformedResponse { .. }
        | PlannerError::SchemaViolation(_)
        | PlannerError::Server(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        let mut body = json!({ "success": false, "error": self.0.public_message() });
        if let PlannerError::Validation(fields) = &self.0 {
            body["fields"] = json!(fields);
        }
        let mut response = (status, Json(body)).into_response();
        if let PlannerError::Server(err) = &self.0 {
            tracing::error!(error = %format!("{err:#}"), "request failed");
            response
                .extensions_mut()
                .insert(ServerDetail(format!("{err:#}")));
        }
        response
    }
}

/// In development, add the internal detail of server errors to the body.
async fn reveal_server_detail(State(environment): State<Environment>, response: Response) -> Response {
    if environment != Environment::Development {
        return response;
    }
    let Some(ServerDetail(detail)) = response.extensions().get::<ServerDetail>().cloned() else {
        return response;
    };
    let body = json!({
        "success": false,
        "error": "Internal server error",
        "detail": detail,
    });
    (response.status(), Json(body)).into_response()
}

type ApiResult = Result<Response, AppError>;

fn ok<T: Serialize>(data: T) -> Response {
    Json(json!({ "success": true, "data": data })).into_response()
}

fn created<T: Serialize>(data: T) -> Response {
    (StatusCode::CREATED, Json(json!({ "success": true, "data": data }))).into_response()
}

/// Unwrap a JSON body, reporting malformed input as a validation error.
fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| PlannerError::validation("body", rejection.body_text()).into())
}

fn parse_path<T: std::str::FromStr>(raw: &str, field: &str) -> Result<T, AppError>
where
    T::Err: std::fmt::Display,
{
    raw.parse()
        .map_err(|e: T::Err| PlannerError::validation(field, e.to_string()).into())
}

// ---------------------------------------------------------------------------
// Authentication
// ---------------------------------------------------------------------------

/// The teacher making the request, taken from the bearer token.
pub struct AuthUser(pub Uuid);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let bearer = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or(AppError(PlannerError::Unauthenticated))?;
        let user_id = token::validate_token(&state.tokens, bearer.trim()).map_err(|e| {
            tracing::debug!(error = %e, "bearer token rejected");
            AppError(PlannerError::Unauthenticated)
        })?;
        Ok(AuthUser(user_id))
    }
}

/// An authenticated user on the admin list. Anyone else gets 403.
pub struct AdminUser(pub Uuid);

impl FromRequestParts<AppState> for AdminUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let AuthUser(user_id) = AuthUser::from_request_parts(parts, state).await?;
        if !state.admins.contains(&user_id) {
            tracing::info!(user_id = %user_id, "admin-only request refused");
            return Err(AppError(PlannerError::NotAuthorized));
        }
        Ok(AdminUser(user_id))
    }
}

/// A UUID path segment. Malformed IDs get the usual error envelope.
pub struct IdPath(pub Uuid);

impl FromRequestParts<AppState> for IdPath {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Path(raw) = Path::<String>::from_request_parts(parts, state)
            .await
            .map_err(|rejection| AppError(PlannerError::validation("id", rejection.body_text())))?;
        Ok(IdPath(parse_path(&raw, "id")?))
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router(state: AppState) -> Router {
    let environment = state.environment;
    Router::new()
        .route("/health", get(health))
        .route("/api/classes", post(create_class).get(list_classes))
        .route(
            "/api/classes/{id}",
            get(get_class).put(update_class).delete(delete_class),
        )
        .route("/api/sow", post(upload_sow))
        .route("/api/sow/{grade}", get(get_sow))
        .route("/api/textbook", post(upload_textbook))
        .route("/api/textbook/{form}", get(get_textbook))
        .route("/api/dskp", get(list_dskp).post(upload_dskp))
        .route("/api/dskp/{subject}", get(get_dskp))
        .route("/api/lessons", post(generate_lesson).get(list_lessons))
        .route("/api/lessons/{id}", get(get_lesson).delete(delete_lesson))
        .route(
            "/assessment/generateFromLessonPlan",
            post(generate_assessment_from_lesson_plan),
        )
        .route("/assessment/generate", post(generate_assessment))
        .route("/assessment/available-lessons", get(available_lessons))
        .route("/assessment", get(list_assessments))
        .route(
            "/assessment/{id}",
            get(get_assessment).delete(delete_assessment),
        )
        .route("/assessment/{id}/usage", post(record_usage))
        .route("/api/planner", post(create_session))
        .route(
            "/api/planner/{id}",
            get(get_session).patch(update_session).delete(delete_session),
        )
        .route("/api/planner/{id}/next", post(next_step))
        .route("/api/planner/{id}/prev", post(prev_step))
        .route("/api/planner/{id}/generate", post(generate_from_session))
        .layer(middleware::map_response_with_state(
            environment,
            reveal_server_detail,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub async fn run_serve(state: AppState, bind: &str, port: u16) -> Result<()> {
    let app = build_router(state);
    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    tracing::info!("rph serve listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("rph serve shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for Ctrl+C");
    }
}

// ---------------------------------------------------------------------------
// Handlers: classes
// ---------------------------------------------------------------------------

async fn health() -> Response {
    Json(json!({ "status": "ok" })).into_response()
}

async fn create_class(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    payload: Result<Json<ClassInput>, JsonRejection>,
) -> ApiResult {
    let class = linker::create_class(&state.pool, user, body(payload)?).await?;
    Ok(created(class))
}

async fn list_classes(State(state): State<AppState>, AuthUser(user): AuthUser) -> ApiResult {
    Ok(ok(linker::list_classes(&state.pool, user).await?))
}

async fn get_class(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    IdPath(id): IdPath,
) -> ApiResult {
    Ok(ok(linker::get_class(&state.pool, user, id).await?))
}

async fn update_class(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    IdPath(id): IdPath,
    payload: Result<Json<ClassInput>, JsonRejection>,
) -> ApiResult {
    Ok(ok(
        linker::update_class(&state.pool, user, id, body(payload)?).await?,
    ))
}

async fn delete_class(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    IdPath(id): IdPath,
) -> ApiResult {
    Ok(ok(linker::delete_class(&state.pool, user, id).await?))
}

// ---------------------------------------------------------------------------
// Handlers: curriculum
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SowUpload {
    #[serde(default)]
    form: String,
    #[serde(default)]
    lessons: Vec<SowLesson>,
}

#[derive(Deserialize)]
struct TextbookUpload {
    #[serde(default)]
    form: String,
    #[serde(default)]
    topics: Vec<String>,
}

#[derive(Deserialize)]
struct DskpUpload {
    #[serde(default)]
    subject: String,
    #[serde(default)]
    forms: Vec<DskpFormEntry>,
}

async fn get_sow(
    State(state): State<AppState>,
    AuthUser(_): AuthUser,
    Path(grade): Path<String>,
) -> ApiResult {
    let form: Grade = parse_path(&grade, "grade")?;
    let lessons = linker::get_sow(&state.pool, form).await?;
    Ok(ok(json!({ "form": form, "lessons": lessons })))
}

async fn upload_sow(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    payload: Result<Json<SowUpload>, JsonRejection>,
) -> ApiResult {
    let upload = body(payload)?;
    let form: Grade = parse_path(upload.form.trim(), "form")?;
    let lessons = linker::upload_sow(&state.pool, form, &upload.lessons).await?;
    tracing::info!(user_id = %admin, %form, "scheme of work uploaded");
    Ok(ok(json!({ "form": form, "lessons": lessons })))
}

async fn get_textbook(
    State(state): State<AppState>,
    AuthUser(_): AuthUser,
    Path(form): Path<String>,
) -> ApiResult {
    let form: Grade = parse_path(&form, "form")?;
    Ok(ok(linker::get_textbook_topics(&state.pool, form).await?))
}

async fn upload_textbook(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    payload: Result<Json<TextbookUpload>, JsonRejection>,
) -> ApiResult {
    let upload = body(payload)?;
    let form: Grade = parse_path(upload.form.trim(), "form")?;
    let topics = linker::replace_textbook_topics(&state.pool, form, &upload.topics).await?;
    tracing::info!(user_id = %admin, %form, "textbook topics uploaded");
    Ok(ok(topics))
}

async fn list_dskp(State(state): State<AppState>, AuthUser(_): AuthUser) -> ApiResult {
    Ok(ok(linker::list_dskp_subjects(&state.pool).await?))
}

async fn get_dskp(
    State(state): State<AppState>,
    AuthUser(_): AuthUser,
    Path(subject): Path<String>,
) -> ApiResult {
    let subject: Subject = parse_path(&subject, "subject")?;
    Ok(ok(linker::get_dskp(&state.pool, subject).await?))
}

async fn upload_dskp(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    payload: Result<Json<DskpUpload>, JsonRejection>,
) -> ApiResult {
    let upload = body(payload)?;
    let subject: Subject = parse_path(upload.subject.trim(), "subject")?;
    let dskp = linker::upsert_dskp(&state.pool, subject, &upload.forms).await?;
    tracing::info!(user_id = %admin, %subject, "DSKP uploaded");
    Ok(ok(dskp))
}

// ---------------------------------------------------------------------------
// Handlers: lesson plans
// ---------------------------------------------------------------------------

async fn generate_lesson(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    payload: Result<Json<GenerationDraft>, JsonRejection>,
) -> ApiResult {
    let draft = body(payload)?;
    let lesson_plan = state.ctx.generate_lesson_plan(user, &draft).await?;
    Ok(Json(json!({
        "success": true,
        "data": lesson_plan.plan,
        "lessonPlanId": lesson_plan.id,
    }))
    .into_response())
}

async fn list_lessons(State(state): State<AppState>, AuthUser(user): AuthUser) -> ApiResult {
    Ok(ok(linker::list_lesson_plans(&state.pool, user).await?))
}

async fn get_lesson(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    IdPath(id): IdPath,
) -> ApiResult {
    Ok(ok(linker::get_lesson_plan(&state.pool, user, id).await?))
}

async fn delete_lesson(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    IdPath(id): IdPath,
) -> ApiResult {
    linker::delete_lesson_plan(&state.pool, user, id).await?;
    Ok(ok(json!({ "id": id })))
}

// ---------------------------------------------------------------------------
// Handlers: assessments
// ---------------------------------------------------------------------------

fn assessment_created(assessment: Assessment) -> Response {
    let generated = json!({
        "activitySheet": assessment.activity_sheet_html,
        "rubric": assessment.rubric_html,
    });
    (
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "data": assessment,
            "generatedContent": generated,
        })),
    )
        .into_response()
}

async fn generate_assessment_from_lesson_plan(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    payload: Result<Json<AssessmentRequest>, JsonRejection>,
) -> ApiResult {
    let request = body(payload)?;
    let assessment = state
        .ctx
        .generate_assessment_from_lesson_plan(user, &request)
        .await?;
    Ok(assessment_created(assessment))
}

async fn generate_assessment(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    payload: Result<Json<AssessmentRequest>, JsonRejection>,
) -> ApiResult {
    let request = body(payload)?;
    let assessment = state.ctx.generate_assessment(user, &request).await?;
    Ok(assessment_created(assessment))
}

async fn available_lessons(State(state): State<AppState>, AuthUser(user): AuthUser) -> ApiResult {
    Ok(ok(linker::available_lessons(&state.pool, user).await?))
}

async fn list_assessments(State(state): State<AppState>, AuthUser(user): AuthUser) -> ApiResult {
    Ok(ok(linker::list_assessments(&state.pool, user).await?))
}

async fn get_assessment(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    IdPath(id): IdPath,
) -> ApiResult {
    Ok(ok(linker::get_assessment(&state.pool, user, id).await?))
}

#[derive(Deserialize)]
struct UsageBody {
    kind: UsageKind,
}

async fn record_usage(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    IdPath(id): IdPath,
    payload: Result<Json<UsageBody>, JsonRejection>,
) -> ApiResult {
    let usage = body(payload)?;
    Ok(ok(
        linker::record_assessment_usage(&state.pool, user, id, usage.kind).await?,
    ))
}

async fn delete_assessment(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    IdPath(id): IdPath,
) -> ApiResult {
    linker::delete_assessment(&state.pool, user, id).await?;
    Ok(ok(json!({ "id": id })))
}

// ---------------------------------------------------------------------------
// Handlers: planner sessions
// ---------------------------------------------------------------------------

async fn create_session(State(state): State<AppState>, AuthUser(user): AuthUser) -> ApiResult {
    Ok(created(state.sessions.create(user)))
}

async fn get_session(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    IdPath(id): IdPath,
) -> ApiResult {
    Ok(ok(state.sessions.get(user, id).await?))
}

async fn update_session(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    IdPath(id): IdPath,
    payload: Result<Json<GenerationDraft>, JsonRejection>,
) -> ApiResult {
    let patch = body(payload)?;
    Ok(ok(state.sessions.update(user, id, patch).await?))
}

async fn next_step(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    IdPath(id): IdPath,
) -> ApiResult {
    Ok(ok(state.sessions.next(&state.ctx, user, id).await?))
}

async fn prev_step(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    IdPath(id): IdPath,
) -> ApiResult {
    Ok(ok(state.sessions.prev(user, id).await?))
}

async fn generate_from_session(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    IdPath(id): IdPath,
) -> ApiResult {
    let (session, lesson_plan) = state.sessions.generate(&state.ctx, user, id).await?;
    Ok(ok(json!({ "session": session, "lessonPlan": lesson_plan })))
}

async fn delete_session(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    IdPath(id): IdPath,
) -> ApiResult {
    state.sessions.remove(user, id).await?;
    Ok(ok(json!({ "id": id })))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use serde_json::{Value, json};
    use sqlx::PgPool;
    use tower::ServiceExt;
    use uuid::Uuid;

    use rph_core::PlannerError;
    use rph_core::generation::TextGenerator;
    use rph_core::token::{TokenConfig, issue_token};
    use rph_test_utils::fixtures::plan_json;
    use rph_test_utils::{create_test_db, drop_test_db};

    use super::{AppState, build_router};
    use crate::config::Environment;

    // -----------------------------------------------------------------------
    // Stub provider
    // -----------------------------------------------------------------------

    struct StubGenerator {
        response: String,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TextGenerator for StubGenerator {
        async fn generate(&self, _prompt: &str) -> Result<String, PlannerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.response.clone())
        }

        fn name(&self) -> &str {
            "stub"
        }
    }

    fn stub(response: impl Into<String>) -> Arc<StubGenerator> {
        Arc::new(StubGenerator {
            response: response.into(),
            calls: AtomicUsize::new(0),
        })
    }

    // -----------------------------------------------------------------------
    // HTTP helpers
    // -----------------------------------------------------------------------

    struct TestApp {
        state: AppState,
        tokens: TokenConfig,
    }

    impl TestApp {
        fn new(pool: PgPool, generator: Arc<StubGenerator>, environment: Environment) -> Self {
            let tokens = TokenConfig::new(b"serve-test-secret".to_vec());
            let state = AppState::new(pool, tokens.clone(), generator, environment);
            Self { state, tokens }
        }

        fn with_admin(mut self, admin: Uuid) -> Self {
            self.state = self.state.with_admins([admin]);
            self
        }

        fn token(&self, user: Uuid) -> String {
            issue_token(&self.tokens, user)
        }

        async fn send(
            &self,
            method: Method,
            uri: &str,
            user: Option<Uuid>,
            body: Option<Value>,
        ) -> axum::response::Response {
            let mut builder = Request::builder().method(method).uri(uri);
            if let Some(user) = user {
                builder = builder.header("authorization", format!("Bearer {}", self.token(user)));
            }
            let request = match body {
                Some(json) => builder
                    .header("content-type", "application/json")
                    .body(Body::from(json.to_string()))
                    .unwrap(),
                None => builder.body(Body::empty()).unwrap(),
            };
            build_router(self.state.clone()).oneshot(request).await.unwrap()
        }
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), 1_048_576)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn class_body(name: &str) -> Value {
        json!({ "className": name, "grade": "Form 5", "subject": "English", "year": "2025" })
    }

    fn lesson_body(class_id: &str) -> Value {
        json!({
            "classId": class_id,
            "grade": "Form 5",
            "Sow": { "lessonNo": 12, "focus": "writing" },
            "proficiencyLevel": "B1 Mid",
            "hotsFocus": "evaluate",
            "specificTopic": "Making our school safer"
        })
    }

    async fn create_class(app: &TestApp, user: Uuid) -> String {
        let resp = app
            .send(Method::POST, "/api/classes", Some(user), Some(class_body("5 UM")))
            .await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        body_json(resp).await["data"]["id"]
            .as_str()
            .unwrap()
            .to_string()
    }

    // -----------------------------------------------------------------------
    // Tests
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_health_needs_no_token() {
        let (pool, db_name) = create_test_db().await;
        let app = TestApp::new(pool.clone(), stub(plan_json()), Environment::Production);

        let resp = app.send(Method::GET, "/health", None, None).await;
        assert_eq!(resp.status(), StatusCode::OK);

        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn test_missing_or_bad_token_is_401() {
        let (pool, db_name) = create_test_db().await;
        let app = TestApp::new(pool.clone(), stub(plan_json()), Environment::Production);

        let resp = app.send(Method::GET, "/api/classes", None, None).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(resp).await["success"], false);

        let request = Request::builder()
            .uri("/api/classes")
            .header("authorization", "Bearer rph_ut_garbage")
            .body(Body::empty())
            .unwrap();
        let resp = build_router(app.state.clone()).oneshot(request).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn test_class_crud_and_duplicates() {
        let (pool, db_name) = create_test_db().await;
        let app = TestApp::new(pool.clone(), stub(plan_json()), Environment::Production);
        let user = Uuid::new_v4();

        let id = create_class(&app, user).await;

        let resp = app
            .send(Method::POST, "/api/classes", Some(user), Some(class_body("5 UM")))
            .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = app
            .send(Method::POST, "/api/classes", Some(user), Some(json!({ "className": "" })))
            .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let json = body_json(resp).await;
        let fields: Vec<&str> = json["fields"]
            .as_array()
            .unwrap()
            .iter()
            .map(|f| f["field"].as_str().unwrap())
            .collect();
        assert!(fields.contains(&"className"));
        assert!(fields.contains(&"grade"));

        let resp = app.send(Method::GET, "/api/classes", Some(user), None).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["data"].as_array().unwrap().len(), 1);
        assert_eq!(json["data"][0]["className"], "5 UM");

        let resp = app
            .send(
                Method::PUT,
                &format!("/api/classes/{id}"),
                Some(Uuid::new_v4()),
                Some(class_body("stolen")),
            )
            .await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        let resp = app
            .send(Method::DELETE, &format!("/api/classes/{id}"), Some(user), None)
            .await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["data"]["lessonPlansDeleted"], 0);

        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn test_sow_upload_and_lookup() {
        let (pool, db_name) = create_test_db().await;
        let user = Uuid::new_v4();
        let app = TestApp::new(pool.clone(), stub(plan_json()), Environment::Production)
            .with_admin(user);

        let resp = app.send(Method::GET, "/api/sow/Form%205", Some(user), None).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let upload = json!({
            "form": "Form 5",
            "lessons": [
                { "lessonNo": 3, "focus": "reading" },
                { "lessonNo": 1, "focus": "writing" }
            ]
        });
        let resp = app.send(Method::POST, "/api/sow", Some(user), Some(upload)).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = app.send(Method::GET, "/api/sow/Form%205", Some(user), None).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["data"]["form"], "Form 5");
        assert_eq!(json["data"]["lessons"][0]["lessonNo"], 1);
        assert_eq!(json["data"]["lessons"][1]["lessonNo"], 3);

        let resp = app.send(Method::GET, "/api/sow/Form%209", Some(user), None).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn test_curriculum_uploads_need_an_admin() {
        let (pool, db_name) = create_test_db().await;
        let admin = Uuid::new_v4();
        let app = TestApp::new(pool.clone(), stub(plan_json()), Environment::Production)
            .with_admin(admin);
        let teacher = Uuid::new_v4();

        let uploads = [
            ("/api/sow", json!({ "form": "Form 5", "lessons": [{ "lessonNo": 1, "focus": "reading" }] })),
            ("/api/textbook", json!({ "form": "Form 5", "topics": ["Unit 1"] })),
            ("/api/dskp", json!({ "subject": "English", "forms": [] })),
        ];
        for (uri, upload) in &uploads {
            let resp = app
                .send(Method::POST, uri, Some(teacher), Some(upload.clone()))
                .await;
            assert_eq!(resp.status(), StatusCode::FORBIDDEN, "{uri}");
            assert_eq!(body_json(resp).await["success"], false);

            let resp = app.send(Method::POST, uri, None, Some(upload.clone())).await;
            assert_eq!(resp.status(), StatusCode::UNAUTHORIZED, "{uri}");
        }

        // Nothing was written by the refused uploads.
        let resp = app.send(Method::GET, "/api/sow/Form%205", Some(teacher), None).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let (uri, upload) = &uploads[0];
        let resp = app.send(Method::POST, uri, Some(admin), Some(upload.clone())).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let resp = app.send(Method::GET, "/api/sow/Form%205", Some(teacher), None).await;
        assert_eq!(resp.status(), StatusCode::OK);

        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn test_malformed_id_uses_error_envelope() {
        let (pool, db_name) = create_test_db().await;
        let app = TestApp::new(pool.clone(), stub(plan_json()), Environment::Production);
        let user = Uuid::new_v4();

        for uri in ["/api/classes/not-a-uuid", "/api/lessons/42", "/assessment/xyz", "/api/planner/abc"] {
            let resp = app.send(Method::GET, uri, Some(user), None).await;
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{uri}");
            let json = body_json(resp).await;
            assert_eq!(json["success"], false);
            assert_eq!(json["fields"][0]["field"], "id");
        }

        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn test_generate_lesson_plan() {
        let (pool, db_name) = create_test_db().await;
        let generator = stub(plan_json());
        let app = TestApp::new(pool.clone(), generator.clone(), Environment::Production);
        let user = Uuid::new_v4();
        let class_id = create_class(&app, user).await;

        let resp = app
            .send(Method::POST, "/api/lessons", Some(user), Some(lesson_body(&class_id)))
            .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["success"], true);
        assert!(json["data"]["learningObjective"].is_string());
        let lesson_id = json["lessonPlanId"].as_str().unwrap().to_string();

        let resp = app
            .send(Method::GET, &format!("/api/lessons/{lesson_id}"), Some(user), None)
            .await;
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = app
            .send(
                Method::GET,
                &format!("/api/lessons/{lesson_id}"),
                Some(Uuid::new_v4()),
                None,
            )
            .await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = app
            .send(Method::GET, "/assessment/available-lessons", Some(user), None)
            .await;
        assert_eq!(body_json(resp).await["data"].as_array().unwrap().len(), 1);

        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn test_missing_fields_are_400_without_provider_call() {
        let (pool, db_name) = create_test_db().await;
        let generator = stub(plan_json());
        let app = TestApp::new(pool.clone(), generator.clone(), Environment::Production);
        let user = Uuid::new_v4();
        let class_id = create_class(&app, user).await;

        let mut body = lesson_body(&class_id);
        body["specificTopic"] = json!("   ");
        let resp = app.send(Method::POST, "/api/lessons", Some(user), Some(body)).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let json = body_json(resp).await;
        assert_eq!(json["fields"][0]["field"], "specificTopic");
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);

        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn test_malformed_provider_output_is_generic_500() {
        let (pool, db_name) = create_test_db().await;
        let app = TestApp::new(pool.clone(), stub("not json"), Environment::Development);
        let user = Uuid::new_v4();
        let class_id = create_class(&app, user).await;

        let resp = app
            .send(Method::POST, "/api/lessons", Some(user), Some(lesson_body(&class_id)))
            .await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = body_json(resp).await;
        assert_eq!(json["success"], false);
        let text = json.to_string();
        assert!(!text.contains("not json"), "raw provider text leaked: {text}");
        assert!(json.get("detail").is_none());

        let resp = app.send(Method::GET, "/api/lessons", Some(user), None).await;
        assert!(body_json(resp).await["data"].as_array().unwrap().is_empty());

        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn test_assessment_from_lesson_plan_once() {
        let (pool, db_name) = create_test_db().await;
        let plan_app = TestApp::new(pool.clone(), stub(plan_json()), Environment::Production);
        let user = Uuid::new_v4();
        let class_id = create_class(&plan_app, user).await;
        let resp = plan_app
            .send(Method::POST, "/api/lessons", Some(user), Some(lesson_body(&class_id)))
            .await;
        let lesson_id = body_json(resp).await["lessonPlanId"]
            .as_str()
            .unwrap()
            .to_string();

        let sheet = json!({ "activitySheet": "<p>Write a letter.</p>", "rubric": null }).to_string();
        let app = TestApp {
            state: AppState::new(
                pool.clone(),
                plan_app.tokens.clone(),
                stub(sheet),
                Environment::Production,
            ),
            tokens: plan_app.tokens.clone(),
        };
        let request = json!({
            "lessonPlanId": lesson_id,
            "activityType": "essay",
            "essayType": "argumentative",
            "essayFormat": "letter",
            "essayPurpose": "persuade the principal"
        });

        let resp = app
            .send(
                Method::POST,
                "/assessment/generateFromLessonPlan",
                Some(user),
                Some(request.clone()),
            )
            .await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let json = body_json(resp).await;
        assert_eq!(json["generatedContent"]["activitySheet"], "<p>Write a letter.</p>");
        let assessment_id = json["data"]["id"].as_str().unwrap().to_string();

        let resp = app
            .send(
                Method::POST,
                "/assessment/generateFromLessonPlan",
                Some(user),
                Some(request),
            )
            .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = app
            .send(
                Method::POST,
                &format!("/assessment/{assessment_id}/usage"),
                Some(user),
                Some(json!({ "kind": "download" })),
            )
            .await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["data"]["downloadCount"], 1);

        let resp = app
            .send(Method::GET, "/assessment/available-lessons", Some(user), None)
            .await;
        assert!(body_json(resp).await["data"].as_array().unwrap().is_empty());

        let resp = app
            .send(Method::DELETE, &format!("/assessment/{assessment_id}"), Some(user), None)
            .await;
        assert_eq!(resp.status(), StatusCode::OK);

        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn test_planner_session_over_http() {
        let (pool, db_name) = create_test_db().await;
        let app = TestApp::new(pool.clone(), stub(plan_json()), Environment::Production);
        let user = Uuid::new_v4();
        let class_id = create_class(&app, user).await;

        let resp = app.send(Method::POST, "/api/planner", Some(user), None).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let json = body_json(resp).await;
        let id = json["data"]["id"].as_str().unwrap().to_string();
        assert_eq!(json["data"]["step"], "chooseClass");
        let base = format!("/api/planner/{id}");

        // Advancing without a class is refused.
        let resp = app.send(Method::POST, &format!("{base}/next"), Some(user), None).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = app
            .send(Method::PATCH, &base, Some(user), Some(json!({ "classId": class_id })))
            .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let resp = app.send(Method::POST, &format!("{base}/next"), Some(user), None).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["data"]["step"], "lessonDetails");
        assert_eq!(json["data"]["sowOptions"]["status"], "unavailable");

        let mut details = lesson_body(&class_id);
        details["activityType"] = json!("essay");
        details["essayType"] = json!("argumentative");
        details["essayFormat"] = json!("letter");
        details["essayPurpose"] = json!("persuade the principal");
        let resp = app.send(Method::PATCH, &base, Some(user), Some(details)).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let resp = app.send(Method::POST, &format!("{base}/next"), Some(user), None).await;
        assert_eq!(body_json(resp).await["data"]["step"], "additionalInfo");

        // Someone else cannot see the session.
        let resp = app.send(Method::GET, &base, Some(Uuid::new_v4()), None).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = app
            .send(Method::POST, &format!("{base}/generate"), Some(user), None)
            .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["data"]["session"]["step"], "reviewAndConfirm");
        assert!(json["data"]["lessonPlan"]["id"].is_string());

        let resp = app.send(Method::DELETE, &base, Some(user), None).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let resp = app.send(Method::GET, &base, Some(user), None).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn test_server_detail_only_in_development() {
        use axum::response::IntoResponse;

        let err = super::AppError(PlannerError::Server(anyhow::anyhow!("pool exhausted")));
        let response = err.into_response();
        let state = Environment::Development;
        let revealed =
            super::reveal_server_detail(axum::extract::State(state), response).await;
        assert_eq!(revealed.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = body_json(revealed).await;
        assert_eq!(json["detail"], "pool exhausted");
        assert_eq!(json["error"], "Internal server error");

        let err = super::AppError(PlannerError::Server(anyhow::anyhow!("pool exhausted")));
        let hidden =
            super::reveal_server_detail(axum::extract::State(Environment::Production), err.into_response())
                .await;
        let json = body_json(hidden).await;
        assert!(json.get("detail").is_none());
        assert!(!json.to_string().contains("pool exhausted"));
    }
}
