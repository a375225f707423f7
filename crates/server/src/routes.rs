//! JSON API for the expense workflow.
//!
//! Every route except company registration resolves its caller from the
//! `x-tallyflow-user` header. Responses carry an `x-correlation-id` header
//! that also appears in error bodies and request logs.
//!
//! - `POST /api/v1/companies`                   register a company and its admin
//! - `POST /api/v1/users`                       create a user (admin)
//! - `PUT  /api/v1/users/{id}/manager`          assign or clear a manager (admin)
//! - `POST /api/v1/expenses`                    submit an expense
//! - `GET  /api/v1/expenses/mine`               caller's own expenses
//! - `POST /api/v1/expenses/{id}/decision`      approve or reject the caller's step
//! - `GET  /api/v1/expenses/{id}/history`       approval steps of an expense
//! - `GET  /api/v1/expenses/{id}/conditional`   conditional rule evaluation
//! - `POST /api/v1/approval-rules`              create a rule (admin)
//! - `GET  /api/v1/approval-rules`              list company rules
//! - `GET  /api/v1/approvals/pending`           caller's queue, `?order=newest|oldest`
//! - `GET  /api/v1/approvals/decided`           caller's past decisions, `?limit=`
//! - `GET  /api/v1/dashboard/{manager,team,company}`

use std::time::Instant;

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        FromRequestParts, Path, Query, Request, State,
    },
    http::{request::Parts, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tallyflow_core::approvals::{ConditionalEvaluation, DecisionOutcome};
use tallyflow_core::auth::Caller;
use tallyflow_core::domain::approval::{ApprovalRule, Decision, NewApprovalRule};
use tallyflow_core::domain::company::NewCompany;
use tallyflow_core::domain::expense::{Expense, NewExpense};
use tallyflow_core::domain::user::{NewUser, Role, User};
use tallyflow_core::domain::{ExpenseId, UserId};
use tallyflow_core::errors::{ApplicationError, ErrorKind, InterfaceError};
use tallyflow_db::repositories::{
    CompanyOverview, DecisionRecord, HistoryEntry, PendingApproval, PendingOrder, RuleView,
    TeamMemberSummary,
};
use tallyflow_db::{ApproverDashboard, ExpenseService, RegisteredCompany, SubmittedExpense};
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

pub const USER_HEADER: &str = "x-tallyflow-user";
pub const CORRELATION_HEADER: &str = "x-correlation-id";

const DEFAULT_DECIDED_LIMIT: u32 = 50;
const MAX_DECIDED_LIMIT: u32 = 200;

#[derive(Clone)]
pub struct ApiState {
    service: ExpenseService,
}

pub fn router(service: ExpenseService) -> Router {
    Router::new()
        .route("/api/v1/companies", post(register_company))
        .route("/api/v1/users", post(create_user))
        .route("/api/v1/users/{id}/manager", put(assign_manager))
        .route("/api/v1/expenses", post(submit_expense))
        .route("/api/v1/expenses/mine", get(my_expenses))
        .route("/api/v1/expenses/{id}/decision", post(decide))
        .route("/api/v1/expenses/{id}/history", get(history))
        .route("/api/v1/expenses/{id}/conditional", get(conditional_status))
        .route("/api/v1/approval-rules", post(create_approval_rule).get(list_approval_rules))
        .route("/api/v1/approvals/pending", get(pending_approvals))
        .route("/api/v1/approvals/decided", get(decided_approvals))
        .route("/api/v1/dashboard/manager", get(manager_dashboard))
        .route("/api/v1/dashboard/team", get(team_dashboard))
        .route("/api/v1/dashboard/company", get(company_dashboard))
        .with_state(ApiState { service })
}

/// Assigns a correlation id (reusing a well-formed inbound one), runs the
/// request inside a span carrying it, and echoes it back as a header.
pub async fn correlate(mut request: Request, next: Next) -> Response {
    let correlation_id = request
        .headers()
        .get(CORRELATION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty() && value.len() <= 64)
        .map(ToString::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let method = request.method().clone();
    let path = request.uri().path().to_string();
    request.extensions_mut().insert(CorrelationId(correlation_id.clone()));

    let span =
        info_span!("request", correlation_id = %correlation_id, method = %method, path = %path);
    let started = Instant::now();

    async move {
        let mut response = next.run(request).await;
        info!(
            event_name = "http.request.completed",
            status = response.status().as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "request completed"
        );
        if let Ok(value) = HeaderValue::from_str(&correlation_id) {
            response.headers_mut().insert(CORRELATION_HEADER, value);
        }
        response
    }
    .instrument(span)
    .await
}

pub fn with_correlation(router: Router) -> Router {
    router.layer(middleware::from_fn(correlate))
}

#[derive(Clone, Debug)]
pub struct CorrelationId(pub String);

impl CorrelationId {
    fn from_parts(parts: &Parts) -> String {
        parts
            .extensions
            .get::<CorrelationId>()
            .map(|id| id.0.clone())
            .unwrap_or_else(|| Uuid::new_v4().to_string())
    }
}

/// Caller resolved from [`USER_HEADER`], plus the request's correlation id.
pub struct Authenticated {
    pub caller: Caller,
    pub correlation_id: String,
}

impl FromRequestParts<ApiState> for Authenticated {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &ApiState,
    ) -> Result<Self, Self::Rejection> {
        let correlation_id = CorrelationId::from_parts(parts);

        let raw = parts
            .headers
            .get(USER_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .ok_or_else(|| {
                ApiError::forbidden(format!("missing `{USER_HEADER}` header"), &correlation_id)
            })?;
        let user_id = raw.parse::<i64>().map(UserId).map_err(|_| {
            ApiError::bad_request(format!("`{USER_HEADER}` must be a user id"), &correlation_id)
        })?;

        let caller = state.service.caller_for(user_id).await.map_err(|error| {
            if error.kind() == ErrorKind::NotFound {
                ApiError::forbidden(format!("unknown caller {user_id}"), &correlation_id)
            } else {
                ApiError::from_application(error, &correlation_id)
            }
        })?;

        Ok(Self { caller, correlation_id })
    }
}

/// Correlation id alone, for routes that need no caller.
pub struct Correlated(pub String);

impl<S: Send + Sync> FromRequestParts<S> for Correlated {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(CorrelationId::from_parts(parts)))
    }
}

#[derive(Debug)]
pub struct ApiError(InterfaceError);

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
    pub detail: String,
    pub correlation_id: String,
}

impl ApiError {
    fn from_application(error: ApplicationError, correlation_id: &str) -> Self {
        Self(error.into_interface(correlation_id))
    }

    fn bad_request(message: impl Into<String>, correlation_id: &str) -> Self {
        Self(InterfaceError::BadRequest {
            message: message.into(),
            correlation_id: correlation_id.to_string(),
        })
    }

    fn forbidden(message: impl Into<String>, correlation_id: &str) -> Self {
        Self(InterfaceError::Forbidden {
            message: message.into(),
            correlation_id: correlation_id.to_string(),
        })
    }

    fn status(&self) -> (StatusCode, &'static str) {
        match self.0 {
            InterfaceError::BadRequest { .. } => (StatusCode::BAD_REQUEST, "bad_request"),
            InterfaceError::Forbidden { .. } => (StatusCode::FORBIDDEN, "forbidden"),
            InterfaceError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
            InterfaceError::Conflict { .. } => (StatusCode::CONFLICT, "conflict"),
            InterfaceError::ServiceUnavailable { .. } => {
                (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable")
            }
            InterfaceError::Internal { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = self.status();
        let detail = match &self.0 {
            InterfaceError::BadRequest { message, .. }
            | InterfaceError::Forbidden { message, .. }
            | InterfaceError::NotFound { message, .. }
            | InterfaceError::Conflict { message, .. }
            | InterfaceError::ServiceUnavailable { message, .. }
            | InterfaceError::Internal { message, .. } => message.clone(),
        };

        if status.is_server_error() {
            error!(
                event_name = "http.request.error",
                status = status.as_u16(),
                detail = %detail,
                "request failed"
            );
        } else {
            warn!(
                event_name = "http.request.rejected",
                status = status.as_u16(),
                detail = %detail,
                "request rejected"
            );
        }

        let body = ErrorBody {
            error: error.to_string(),
            message: self.0.user_message().to_string(),
            detail,
            correlation_id: self.0.correlation_id().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn body<T>(payload: Result<Json<T>, JsonRejection>, correlation_id: &str) -> ApiResult<T> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| ApiError::bad_request(rejection.body_text(), correlation_id))
}

fn path_id(id: Result<Path<i64>, PathRejection>, correlation_id: &str) -> ApiResult<i64> {
    id.map(|Path(value)| value)
        .map_err(|rejection| ApiError::bad_request(rejection.body_text(), correlation_id))
}

fn query<T>(params: Result<Query<T>, QueryRejection>, correlation_id: &str) -> ApiResult<T> {
    params
        .map(|Query(value)| value)
        .map_err(|rejection| ApiError::bad_request(rejection.body_text(), correlation_id))
}

#[derive(Debug, Deserialize)]
pub struct RegisterCompanyRequest {
    pub name: String,
    pub default_currency: String,
    pub admin_name: String,
    pub admin_email: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub name: String,
    pub email: String,
    pub role: Role,
    #[serde(default)]
    pub manager_id: Option<UserId>,
}

#[derive(Debug, Deserialize)]
pub struct AssignManagerRequest {
    pub manager_id: Option<UserId>,
}

#[derive(Debug, Deserialize)]
pub struct DecisionBody {
    pub action: String,
    #[serde(default)]
    pub comments: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateRuleRequest {
    pub name: String,
    pub approver_id: UserId,
    pub sequence_order: i64,
    #[serde(default)]
    pub percentage_rule: Option<i64>,
    #[serde(default)]
    pub specific_approver_rule: bool,
    #[serde(default)]
    pub is_manager_approver: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct PendingQuery {
    pub order: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DecidedQuery {
    pub limit: Option<u32>,
}

async fn register_company(
    State(state): State<ApiState>,
    Correlated(correlation_id): Correlated,
    payload: Result<Json<RegisterCompanyRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<RegisteredCompany>)> {
    let request = body(payload, &correlation_id)?;
    let registered = state
        .service
        .register_company(
            NewCompany { name: request.name, default_currency: request.default_currency },
            &request.admin_name,
            &request.admin_email,
        )
        .await
        .map_err(|error| ApiError::from_application(error, &correlation_id))?;
    Ok((StatusCode::CREATED, Json(registered)))
}

async fn create_user(
    State(state): State<ApiState>,
    auth: Authenticated,
    payload: Result<Json<CreateUserRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<User>)> {
    let request = body(payload, &auth.correlation_id)?;
    let user = NewUser {
        name: request.name,
        email: request.email,
        role: request.role,
        company_id: auth.caller.company_id,
        manager_id: request.manager_id,
    };
    let created = state
        .service
        .create_user(&auth.caller, user)
        .await
        .map_err(|error| ApiError::from_application(error, &auth.correlation_id))?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn assign_manager(
    State(state): State<ApiState>,
    auth: Authenticated,
    id: Result<Path<i64>, PathRejection>,
    payload: Result<Json<AssignManagerRequest>, JsonRejection>,
) -> ApiResult<Json<User>> {
    let user_id = UserId(path_id(id, &auth.correlation_id)?);
    let request = body(payload, &auth.correlation_id)?;
    let user = state
        .service
        .assign_manager(&auth.caller, user_id, request.manager_id)
        .await
        .map_err(|error| ApiError::from_application(error, &auth.correlation_id))?;
    Ok(Json(user))
}

async fn submit_expense(
    State(state): State<ApiState>,
    auth: Authenticated,
    payload: Result<Json<NewExpense>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<SubmittedExpense>)> {
    let expense = body(payload, &auth.correlation_id)?;
    let submitted = state
        .service
        .submit_expense(&auth.caller, expense)
        .await
        .map_err(|error| ApiError::from_application(error, &auth.correlation_id))?;
    Ok((StatusCode::CREATED, Json(submitted)))
}

async fn my_expenses(
    State(state): State<ApiState>,
    auth: Authenticated,
) -> ApiResult<Json<Vec<Expense>>> {
    let expenses = state
        .service
        .expenses_for_employee(&auth.caller)
        .await
        .map_err(|error| ApiError::from_application(error, &auth.correlation_id))?;
    Ok(Json(expenses))
}

async fn decide(
    State(state): State<ApiState>,
    auth: Authenticated,
    id: Result<Path<i64>, PathRejection>,
    payload: Result<Json<DecisionBody>, JsonRejection>,
) -> ApiResult<Json<DecisionOutcome>> {
    let expense_id = ExpenseId(path_id(id, &auth.correlation_id)?);
    let request = body(payload, &auth.correlation_id)?;
    let decision = Decision::parse(&request.action).ok_or_else(|| {
        ApiError::bad_request(
            format!("action must be approve or reject, got `{}`", request.action),
            &auth.correlation_id,
        )
    })?;

    let outcome = state
        .service
        .decide(&auth.caller, expense_id, decision, request.comments)
        .await
        .map_err(|error| ApiError::from_application(error, &auth.correlation_id))?;
    Ok(Json(outcome))
}

async fn history(
    State(state): State<ApiState>,
    auth: Authenticated,
    id: Result<Path<i64>, PathRejection>,
) -> ApiResult<Json<Vec<HistoryEntry>>> {
    let expense_id = ExpenseId(path_id(id, &auth.correlation_id)?);
    let entries = state
        .service
        .history_for(&auth.caller, expense_id)
        .await
        .map_err(|error| ApiError::from_application(error, &auth.correlation_id))?;
    Ok(Json(entries))
}

async fn conditional_status(
    State(state): State<ApiState>,
    auth: Authenticated,
    id: Result<Path<i64>, PathRejection>,
) -> ApiResult<Json<ConditionalEvaluation>> {
    let expense_id = ExpenseId(path_id(id, &auth.correlation_id)?);
    let evaluation = state
        .service
        .conditional_status(&auth.caller, expense_id)
        .await
        .map_err(|error| ApiError::from_application(error, &auth.correlation_id))?;
    Ok(Json(evaluation))
}

async fn create_approval_rule(
    State(state): State<ApiState>,
    auth: Authenticated,
    payload: Result<Json<CreateRuleRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<ApprovalRule>)> {
    let request = body(payload, &auth.correlation_id)?;
    let rule = NewApprovalRule {
        company_id: auth.caller.company_id,
        name: request.name,
        approver_id: request.approver_id,
        sequence_order: request.sequence_order,
        percentage_rule: request.percentage_rule,
        specific_approver_rule: request.specific_approver_rule,
        is_manager_approver: request.is_manager_approver,
    };
    let created = state
        .service
        .create_approval_rule(&auth.caller, rule)
        .await
        .map_err(|error| ApiError::from_application(error, &auth.correlation_id))?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn list_approval_rules(
    State(state): State<ApiState>,
    auth: Authenticated,
) -> ApiResult<Json<Vec<RuleView>>> {
    let rules = state
        .service
        .list_approval_rules(&auth.caller)
        .await
        .map_err(|error| ApiError::from_application(error, &auth.correlation_id))?;
    Ok(Json(rules))
}

async fn pending_approvals(
    State(state): State<ApiState>,
    auth: Authenticated,
    params: Result<Query<PendingQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<PendingApproval>>> {
    let params = query(params, &auth.correlation_id)?;
    let order = match params.order.as_deref() {
        None => PendingOrder::default(),
        Some(raw) => PendingOrder::parse(raw).ok_or_else(|| {
            ApiError::bad_request(
                format!("order must be newest or oldest, got `{raw}`"),
                &auth.correlation_id,
            )
        })?,
    };

    let pending = state
        .service
        .pending_for(&auth.caller, order)
        .await
        .map_err(|error| ApiError::from_application(error, &auth.correlation_id))?;
    Ok(Json(pending))
}

async fn decided_approvals(
    State(state): State<ApiState>,
    auth: Authenticated,
    params: Result<Query<DecidedQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<DecisionRecord>>> {
    let params = query(params, &auth.correlation_id)?;
    let limit = params.limit.unwrap_or(DEFAULT_DECIDED_LIMIT).clamp(1, MAX_DECIDED_LIMIT);

    let decisions = state
        .service
        .decisions_by(&auth.caller, limit)
        .await
        .map_err(|error| ApiError::from_application(error, &auth.correlation_id))?;
    Ok(Json(decisions))
}

async fn manager_dashboard(
    State(state): State<ApiState>,
    auth: Authenticated,
) -> ApiResult<Json<ApproverDashboard>> {
    let dashboard = state
        .service
        .dashboard(&auth.caller)
        .await
        .map_err(|error| ApiError::from_application(error, &auth.correlation_id))?;
    Ok(Json(dashboard))
}

async fn team_dashboard(
    State(state): State<ApiState>,
    auth: Authenticated,
) -> ApiResult<Json<Vec<TeamMemberSummary>>> {
    let team = state
        .service
        .team_overview(&auth.caller)
        .await
        .map_err(|error| ApiError::from_application(error, &auth.correlation_id))?;
    Ok(Json(team))
}

async fn company_dashboard(
    State(state): State<ApiState>,
    auth: Authenticated,
) -> ApiResult<Json<CompanyOverview>> {
    let overview = state
        .service
        .company_overview(&auth.caller)
        .await
        .map_err(|error| ApiError::from_application(error, &auth.correlation_id))?;
    Ok(Json(overview))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::http::{HeaderMap, Request, StatusCode};
    use axum::Router;
    use rust_decimal::Decimal;
    use serde_json::{json, Value};
    use tallyflow_core::approvals::ConditionalApprovalMode;
    use tallyflow_core::currency::{ExchangeRate, StaticRateConverter};
    use tallyflow_db::{connect_with_settings, migrations, ExpenseService};
    use tower::ServiceExt;

    use super::{router, with_correlation, CORRELATION_HEADER, USER_HEADER};

    async fn app() -> Router {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let converter = Arc::new(StaticRateConverter::new(vec![ExchangeRate {
            from: "EUR".to_string(),
            to: "USD".to_string(),
            rate: Decimal::new(108, 2),
        }]));
        let service = ExpenseService::new(pool, converter, ConditionalApprovalMode::Informational);
        with_correlation(router(service))
    }

    async fn send(
        app: &Router,
        method: &str,
        uri: &str,
        user: Option<i64>,
        payload: Option<Value>,
    ) -> (StatusCode, HeaderMap, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            request = request.header(USER_HEADER, user.to_string());
        }
        let body = match payload {
            Some(payload) => {
                request = request.header("content-type", "application/json");
                Body::from(serde_json::to_vec(&payload).expect("encode"))
            }
            None => Body::empty(),
        };

        let response =
            app.clone().oneshot(request.body(body).expect("request")).await.expect("response");
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("json body")
        };
        (status, headers, value)
    }

    struct Org {
        admin: i64,
        manager: i64,
        employee: i64,
    }

    async fn org(app: &Router) -> Org {
        let (status, _, registered) = send(
            app,
            "POST",
            "/api/v1/companies",
            None,
            Some(json!({
                "name": "Initech",
                "default_currency": "usd",
                "admin_name": "Bill",
                "admin_email": "bill@initech.test"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{registered}");
        let admin = registered["admin"]["id"].as_i64().expect("admin id");

        let (status, _, manager) = send(
            app,
            "POST",
            "/api/v1/users",
            Some(admin),
            Some(json!({"name": "Lumbergh", "email": "bill.l@initech.test", "role": "manager"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{manager}");
        let manager = manager["id"].as_i64().expect("manager id");

        let (status, _, employee) = send(
            app,
            "POST",
            "/api/v1/users",
            Some(admin),
            Some(json!({
                "name": "Peter",
                "email": "peter@initech.test",
                "role": "employee",
                "manager_id": manager
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{employee}");
        let employee = employee["id"].as_i64().expect("employee id");

        Org { admin, manager, employee }
    }

    async fn submit(app: &Router, employee: i64) -> i64 {
        let (status, _, submitted) = send(
            app,
            "POST",
            "/api/v1/expenses",
            Some(employee),
            Some(json!({
                "amount": "100.00",
                "currency": "EUR",
                "category": "Travel",
                "description": "Client visit",
                "expense_date": "2026-01-15"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{submitted}");
        submitted["expense"]["id"].as_i64().expect("expense id")
    }

    #[tokio::test]
    async fn expense_moves_through_manager_then_rule_approver() {
        let app = app().await;
        let org = org(&app).await;

        let (status, _, rule) = send(
            &app,
            "POST",
            "/api/v1/approval-rules",
            Some(org.admin),
            Some(json!({"name": "Director", "approver_id": org.admin, "sequence_order": 1})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{rule}");

        let (status, _, submitted) = send(
            &app,
            "POST",
            "/api/v1/expenses",
            Some(org.employee),
            Some(json!({
                "amount": "100.00",
                "currency": "EUR",
                "category": "Travel",
                "description": "Client visit",
                "expense_date": "2026-01-15"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{submitted}");
        let expense_id = submitted["expense"]["id"].as_i64().expect("expense id");
        let converted: Decimal = submitted["expense"]["converted_amount"]
            .as_str()
            .expect("decimal string")
            .parse()
            .expect("decimal");
        assert_eq!(converted, Decimal::new(10_800, 2));
        assert_eq!(submitted["steps"].as_array().map(Vec::len), Some(2));

        let (status, _, pending) =
            send(&app, "GET", "/api/v1/approvals/pending?order=oldest", Some(org.manager), None)
                .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(pending.as_array().map(Vec::len), Some(1));
        assert_eq!(pending[0]["employee_name"], "Peter");

        let decision_uri = format!("/api/v1/expenses/{expense_id}/decision");
        let (status, _, outcome) = send(
            &app,
            "POST",
            &decision_uri,
            Some(org.manager),
            Some(json!({"action": "approve", "comments": "fine"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{outcome}");
        assert_eq!(outcome["expense_status"], "pending");
        assert_eq!(outcome["next_approver"], org.admin);

        let (status, _, outcome) = send(
            &app,
            "POST",
            &decision_uri,
            Some(org.admin),
            Some(json!({"action": "approved"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{outcome}");
        assert_eq!(outcome["expense_status"], "approved");

        let (status, _, history) = send(
            &app,
            "GET",
            &format!("/api/v1/expenses/{expense_id}/history"),
            Some(org.employee),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let approvers = history
            .as_array()
            .expect("history list")
            .iter()
            .map(|entry| entry["approver_id"].as_i64().unwrap_or_default())
            .collect::<Vec<_>>();
        assert_eq!(approvers, vec![org.manager, org.admin]);

        let (status, _, mine) =
            send(&app, "GET", "/api/v1/expenses/mine", Some(org.employee), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(mine[0]["status"], "approved");

        let (status, _, overview) =
            send(&app, "GET", "/api/v1/dashboard/company", Some(org.admin), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(overview["approved_expenses"], 1);
        assert_eq!(overview["employees"], 1);
    }

    #[tokio::test]
    async fn repeated_decision_is_a_conflict() {
        let app = app().await;
        let org = org(&app).await;
        let expense_id = submit(&app, org.employee).await;
        let uri = format!("/api/v1/expenses/{expense_id}/decision");

        let (status, _, _) =
            send(&app, "POST", &uri, Some(org.manager), Some(json!({"action": "reject"}))).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _, error) =
            send(&app, "POST", &uri, Some(org.manager), Some(json!({"action": "reject"}))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(error["error"], "conflict");
    }

    #[tokio::test]
    async fn missing_or_unknown_caller_is_forbidden() {
        let app = app().await;

        let (status, headers, error) =
            send(&app, "GET", "/api/v1/approvals/pending", None, None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let header = headers
            .get(CORRELATION_HEADER)
            .and_then(|value| value.to_str().ok())
            .expect("correlation header");
        assert_eq!(error["correlation_id"], header);

        let (status, _, _) = send(&app, "GET", "/api/v1/approvals/pending", Some(404), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn inbound_correlation_id_is_echoed() {
        let app = app().await;
        let request = Request::builder()
            .method("GET")
            .uri("/api/v1/expenses/mine")
            .header(CORRELATION_HEADER, "req-abc-123")
            .body(Body::empty())
            .expect("request");

        let response = app.oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            response.headers().get(CORRELATION_HEADER).and_then(|value| value.to_str().ok()),
            Some("req-abc-123")
        );
    }

    #[tokio::test]
    async fn malformed_inputs_are_bad_requests() {
        let app = app().await;
        let org = org(&app).await;
        let expense_id = submit(&app, org.employee).await;

        let (status, _, _) = send(
            &app,
            "POST",
            &format!("/api/v1/expenses/{expense_id}/decision"),
            Some(org.manager),
            Some(json!({"action": "maybe"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _, _) =
            send(&app, "GET", "/api/v1/approvals/pending?order=sideways", Some(org.manager), None)
                .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _, _) = send(
            &app,
            "POST",
            "/api/v1/expenses",
            Some(org.employee),
            Some(json!({"amount": "-5", "currency": "USD", "category": "Meals",
                        "description": "Lunch", "expense_date": "2026-01-15"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _, error) =
            send(&app, "POST", "/api/v1/expenses", Some(org.employee), Some(json!({"x": 1})))
                .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(error["error"], "bad_request");

        let (status, _, _) = send(
            &app,
            "GET",
            "/api/v1/expenses/not-a-number/history",
            Some(org.employee),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn role_checks_guard_admin_and_approver_routes() {
        let app = app().await;
        let org = org(&app).await;

        let (status, _, _) =
            send(&app, "GET", "/api/v1/dashboard/company", Some(org.employee), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _, _) =
            send(&app, "GET", "/api/v1/approvals/pending", Some(org.employee), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _, _) = send(
            &app,
            "POST",
            "/api/v1/users",
            Some(org.manager),
            Some(json!({"name": "Milton", "email": "milton@initech.test", "role": "employee"})),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _, dashboard) =
            send(&app, "GET", "/api/v1/dashboard/manager", Some(org.manager), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(dashboard["team_size"], 1);
    }

    #[tokio::test]
    async fn manager_reassignment_rejects_cycles() {
        let app = app().await;
        let org = org(&app).await;

        let (status, _, error) = send(
            &app,
            "PUT",
            &format!("/api/v1/users/{}/manager", org.manager),
            Some(org.admin),
            Some(json!({"manager_id": org.employee})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{error}");

        let (status, _, user) = send(
            &app,
            "PUT",
            &format!("/api/v1/users/{}/manager", org.employee),
            Some(org.admin),
            Some(json!({"manager_id": null})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(user["manager_id"], Value::Null);
    }
}
