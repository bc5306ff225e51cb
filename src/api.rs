use axum::{
    async_trait,
    extract::{FromRequest, FromRequestParts, Path, Query, Request, State},
    http::{request::Parts, StatusCode},
    response::Json,
    routing::{get, patch, post},
    Router,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};
use uuid::Uuid;

use crate::{
    auth::CurrentUser,
    config::QuizConfig,
    database::Database,
    errors::{ApiError, ErrorContext},
    flag_service::FlagService,
    models::*,
    question_service::QuestionService,
    quiz_service::QuizService,
    stats_cache::StatsCache,
};

use crate::{log_api_start, log_api_success, log_api_warn};

#[derive(Clone)]
pub struct AppState {
    pub question_service: QuestionService,
    pub quiz_service: QuizService,
    pub flag_service: FlagService,
}

impl AppState {
    /// Wire every service onto one database handle.
    pub fn new(db: Database, quiz: &QuizConfig) -> Self {
        Self {
            question_service: QuestionService::new(db.clone()),
            quiz_service: QuizService::new(db.clone(), StatsCache::new(quiz.stats_cache_ttl_secs)),
            flag_service: FlagService::new(db, quiz.flag_threshold),
        }
    }
}

#[derive(Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

pub type ApiErrorResponse = (StatusCode, Json<ApiResponse<()>>);
type HandlerResult<T> = Result<Json<ApiResponse<T>>, ApiErrorResponse>;

#[derive(Deserialize)]
pub struct FlagListParams {
    pub status: Option<FlagStatus>,
}

/// `Json` body whose rejections (bad syntax, missing fields, unknown enum
/// values, wrong content type) come back as 400 in the response envelope.
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = ApiErrorResponse;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(ApiJson(value)),
            Err(rejection) => Err(ApiError::BadRequest(rejection.body_text())
                .to_response_with_context(ErrorContext::new("parse_body", "request body"))),
        }
    }
}

/// `Path` parameters with envelope-shaped 400 rejections.
pub struct ApiPath<T>(pub T);

#[async_trait]
impl<S, T> FromRequestParts<S> for ApiPath<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = ApiErrorResponse;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Path::<T>::from_request_parts(parts, state).await {
            Ok(Path(value)) => Ok(ApiPath(value)),
            Err(rejection) => Err(ApiError::BadRequest(rejection.body_text()).to_response_with_context(
                ErrorContext::new("parse_path", "path parameter")
                    .with_id(parts.uri.path())
                    .with_user_message("Invalid identifier in request path"),
            )),
        }
    }
}

/// `Query` string with envelope-shaped 400 rejections.
pub struct ApiQuery<T>(pub T);

#[async_trait]
impl<S, T> FromRequestParts<S> for ApiQuery<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = ApiErrorResponse;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Query::<T>::from_request_parts(parts, state).await {
            Ok(Query(value)) => Ok(ApiQuery(value)),
            Err(rejection) => Err(ApiError::BadRequest(rejection.body_text())
                .to_response_with_context(ErrorContext::new("parse_query", "query string"))),
        }
    }
}

fn respond<T>(result: Result<T, ApiError>, context: impl FnOnce() -> ErrorContext) -> HandlerResult<T> {
    result
        .map(|data| Json(ApiResponse::success(data)))
        .map_err(|e| e.to_response_with_context(context()))
}

// Quiz session endpoints

pub async fn create_session(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiJson(config): ApiJson<SessionConfig>,
) -> HandlerResult<QuizSession> {
    log_api_start!("create_session", user_id = user.id);

    let result = state.quiz_service.create_session(user.id, config).await;
    if let Ok(session) = &result {
        log_api_success!("create_session", session_id = session.id, "session created");
    }
    respond(result, || {
        ErrorContext::new("create_session", "session").with_id(&user.id.to_string())
    })
}

pub async fn list_sessions(
    State(state): State<AppState>,
    user: CurrentUser,
) -> HandlerResult<Vec<QuizSession>> {
    log_api_start!("list_sessions", user_id = user.id);

    respond(state.quiz_service.list_sessions(user.id).await, || {
        ErrorContext::new("list_sessions", "session")
    })
}

pub async fn get_session(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiPath(id): ApiPath<Uuid>,
) -> HandlerResult<SessionDetail> {
    log_api_start!("get_session", session_id = id);

    let result = state.quiz_service.get_session_detail(&user, id).await;
    if let Err(ApiError::NotFound(_)) = &result {
        log_api_warn!("get_session", session_id = id, "session not found");
    }
    respond(result, || {
        ErrorContext::new("load_session", "session").with_id(&id.to_string())
    })
}

pub async fn update_session(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(action): ApiJson<SessionAction>,
) -> HandlerResult<QuizSession> {
    log_api_start!("update_session", session_id = id);

    respond(state.quiz_service.update_progress(&user, id, action).await, || {
        ErrorContext::new("update_session", "session").with_id(&id.to_string())
    })
}

pub async fn submit_attempt(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(request): ApiJson<SubmitAnswerRequest>,
) -> HandlerResult<QuizAttempt> {
    log_api_start!("submit_attempt", session_id = id);

    respond(state.quiz_service.submit_answer(&user, id, request).await, || {
        ErrorContext::new("save_answer", "attempt").with_id(&id.to_string())
    })
}

pub async fn submit_attempts_batch(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(request): ApiJson<BatchSubmitRequest>,
) -> HandlerResult<Vec<QuizAttempt>> {
    log_api_start!("submit_attempts_batch", session_id = id);

    let result = state.quiz_service.submit_batch(&user, id, request).await;
    if let Ok(attempts) = &result {
        log_api_success!("submit_attempts_batch", count = attempts.len(), "attempts synced");
    }
    respond(result, || {
        ErrorContext::new("save_answers", "attempt").with_id(&id.to_string())
    })
}

pub async fn complete_session(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiPath(id): ApiPath<Uuid>,
) -> HandlerResult<QuizResult> {
    log_api_start!("complete_session", session_id = id);

    let result = state.quiz_service.complete_session(&user, id).await;
    if let Ok(summary) = &result {
        log_api_success!(
            "complete_session",
            session_id = id,
            format!("score {}", summary.score)
        );
    }
    respond(result, || {
        ErrorContext::new("complete_session", "session").with_id(&id.to_string())
    })
}

pub async fn get_session_results(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiPath(id): ApiPath<Uuid>,
) -> HandlerResult<QuizResult> {
    log_api_start!("get_session_results", session_id = id);

    respond(state.quiz_service.get_results(&user, id).await, || {
        ErrorContext::new("load_results", "session").with_id(&id.to_string())
    })
}

pub async fn get_user_stats(
    State(state): State<AppState>,
    user: CurrentUser,
) -> HandlerResult<UserStats> {
    log_api_start!("get_user_stats", user_id = user.id);

    respond(state.quiz_service.user_stats(user.id).await, || {
        ErrorContext::new("load_statistics", "stats").with_id(&user.id.to_string())
    })
}

// Content endpoints

pub async fn create_category(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiJson(request): ApiJson<CreateCategoryRequest>,
) -> HandlerResult<Category> {
    log_api_start!("create_category");

    let result = match user.require_admin() {
        Ok(()) => state.question_service.create_category(request).await,
        Err(e) => Err(e),
    };
    respond(result, || ErrorContext::new("create_category", "category"))
}

pub async fn list_categories(
    State(state): State<AppState>,
    _user: CurrentUser,
) -> HandlerResult<Vec<Category>> {
    respond(state.question_service.list_categories().await, || {
        ErrorContext::new("load_categories", "category")
    })
}

pub async fn create_question(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiJson(request): ApiJson<CreateQuestionRequest>,
) -> HandlerResult<Question> {
    log_api_start!("create_question");

    let result = match user.require_admin() {
        Ok(()) => state.question_service.create_question(request, &user).await,
        Err(e) => Err(e),
    };
    if let Ok(question) = &result {
        log_api_success!("create_question", question_id = question.id, "question created");
    }
    respond(result, || ErrorContext::new("create_question", "question"))
}

pub async fn list_questions(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiQuery(filter): ApiQuery<QuestionFilter>,
) -> HandlerResult<Vec<Question>> {
    log_api_start!("list_questions");

    let result = state.question_service.list_questions(filter, &user).await;
    if let Ok(questions) = &result {
        log_api_success!("list_questions", count = questions.len(), "questions listed");
    }
    respond(result, || ErrorContext::new("load_questions", "question"))
}

pub async fn get_question(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiPath(id): ApiPath<Uuid>,
) -> HandlerResult<Question> {
    log_api_start!("get_question", question_id = id);

    respond(state.question_service.get_question(id, &user).await, || {
        ErrorContext::new("load_question", "question").with_id(&id.to_string())
    })
}

pub async fn update_question_status(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(request): ApiJson<UpdateQuestionStatusRequest>,
) -> HandlerResult<Question> {
    log_api_start!("update_question_status", question_id = id);

    let result = match user.require_admin() {
        Ok(()) => state.question_service.update_question_status(id, request, &user).await,
        Err(e) => Err(e),
    };
    respond(result, || {
        ErrorContext::new("update_question_status", "question").with_id(&id.to_string())
    })
}

pub async fn get_question_history(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiPath(id): ApiPath<Uuid>,
) -> HandlerResult<Vec<QuestionReview>> {
    let result = match user.require_admin() {
        Ok(()) => state.question_service.question_history(id).await,
        Err(e) => Err(e),
    };
    respond(result, || {
        ErrorContext::new("load_question_history", "question").with_id(&id.to_string())
    })
}

pub async fn create_question_set(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiJson(request): ApiJson<CreateQuestionSetRequest>,
) -> HandlerResult<QuestionSet> {
    log_api_start!("create_question_set");

    let result = match user.require_admin() {
        Ok(()) => state.question_service.create_question_set(request).await,
        Err(e) => Err(e),
    };
    respond(result, || ErrorContext::new("create_question_set", "question set"))
}

pub async fn list_question_sets(
    State(state): State<AppState>,
    _user: CurrentUser,
) -> HandlerResult<Vec<QuestionSet>> {
    respond(state.question_service.list_question_sets().await, || {
        ErrorContext::new("load_question_sets", "question set")
    })
}

// Flag endpoints

pub async fn flag_question(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiJson(request): ApiJson<FlagQuestionRequest>,
) -> HandlerResult<FlagResult> {
    log_api_start!("flag_question", question_id = request.question_id);

    let question_id = request.question_id;
    let result = state.flag_service.flag_question(user.id, request).await;
    if let Ok(outcome) = &result {
        if outcome.question_demoted {
            log_api_success!("flag_question", question_id = question_id, "question withdrawn to draft");
        }
    }
    respond(result, || {
        ErrorContext::new("flag_question", "question").with_id(&question_id.to_string())
    })
}

pub async fn list_flags(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiQuery(params): ApiQuery<FlagListParams>,
) -> HandlerResult<Vec<QuestionFlag>> {
    let result = match user.require_admin() {
        Ok(()) => state.flag_service.list_flags(params.status).await,
        Err(e) => Err(e),
    };
    respond(result, || ErrorContext::new("load_flags", "flag"))
}

pub async fn resolve_flag(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(request): ApiJson<ResolveFlagRequest>,
) -> HandlerResult<QuestionFlag> {
    let result = match user.require_admin() {
        Ok(()) => state.flag_service.resolve_flag(&user, id, request).await,
        Err(e) => Err(e),
    };
    respond(result, || {
        ErrorContext::new("resolve_flag", "flag").with_id(&id.to_string())
    })
}

async fn health() -> Json<ApiResponse<&'static str>> {
    Json(ApiResponse::success("ok"))
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        // Quiz session routes
        .route("/api/quiz/sessions", post(create_session).get(list_sessions))
        .route("/api/quiz/sessions/:id", get(get_session).patch(update_session))
        .route("/api/quiz/sessions/:id/attempts", post(submit_attempt))
        .route("/api/quiz/sessions/:id/attempts/batch", post(submit_attempts_batch))
        .route("/api/quiz/sessions/:id/complete", post(complete_session))
        .route("/api/quiz/sessions/:id/results", get(get_session_results))
        .route("/api/quiz/stats", get(get_user_stats))
        // Content routes
        .route("/api/content/categories", post(create_category).get(list_categories))
        .route("/api/content/questions", post(create_question).get(list_questions))
        .route("/api/content/questions/flags", post(flag_question).get(list_flags))
        .route("/api/content/questions/flags/:id", patch(resolve_flag))
        .route("/api/content/questions/:id", get(get_question))
        .route("/api/content/questions/:id/status", patch(update_question_status))
        .route("/api/content/questions/:id/history", get(get_question_history))
        .route("/api/content/question-sets", post(create_question_set).get(list_question_sets))
        .with_state(state)
}

/// The router wrapped in request tracing, a request timeout (408) and CORS.
pub fn create_app(state: AppState, request_timeout: Duration) -> Router {
    create_router(state).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(TimeoutLayer::new(request_timeout))
            .layer(CorsLayer::permissive()),
    )
}
