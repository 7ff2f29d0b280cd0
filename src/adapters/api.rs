use std::sync::Arc;

use actix_web::{HttpResponse, Responder, delete, get, post, web};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::adapters::db::EntryRecord;
use crate::app::coordinator::{CoordinatorError, CoordinatorStatus};
use crate::app::dispatcher::ServiceDispatcher;
use crate::app::entries::{EntryError, EntryManager, LiveEntry};
use crate::app::services::ServiceError;
use crate::app::setup::{SetupError, UserInput};
use crate::domain::charger::ChargerView;
use crate::domain::service_call::ServiceCallError;

#[derive(Clone)]
pub struct ApiState {
    pub entries: Arc<EntryManager>,
    pub dispatcher: Arc<ServiceDispatcher>,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChargerResponse {
    pub entry_id: String,
    #[serde(flatten)]
    pub charger: ChargerView,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EntryResponse {
    pub entry_id: String,
    pub title: String,
    pub market: String,
    pub customer_type: Option<String>,
    pub created_at: String,
    pub loaded: bool,
    pub status: Option<CoordinatorStatus>,
    pub update_interval_secs: Option<u64>,
    pub fast_polling: bool,
    pub chargers: usize,
}

impl EntryResponse {
    fn new(record: &EntryRecord, live: Option<&LiveEntry>) -> Self {
        Self {
            entry_id: record.entry_id.clone(),
            title: record.title.clone(),
            market: record.market.clone(),
            customer_type: record.customer_type.clone(),
            created_at: record.created_at.clone(),
            loaded: live.is_some(),
            status: live.map(|entry| entry.coordinator.status()),
            update_interval_secs: live.map(|entry| entry.coordinator.update_interval().as_secs()),
            fast_polling: live.is_some_and(|entry| entry.coordinator.is_fast_polling()),
            chargers: live.map_or(0, |entry| entry.coordinator.data().len()),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ReauthRequest {
    pub password: String,
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(health)
        .service(list_chargers_endpoint)
        .service(get_charger_endpoint)
        .service(list_entries_endpoint)
        .service(create_entry_endpoint)
        .service(delete_entry_endpoint)
        .service(reload_entry_endpoint)
        .service(reauth_entry_endpoint)
        .service(call_service_endpoint);
}

#[get("/health")]
async fn health() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}

#[get("/chargers")]
async fn list_chargers_endpoint(state: web::Data<ApiState>) -> impl Responder {
    let chargers: Vec<ChargerResponse> = state
        .entries
        .registry()
        .entries()
        .iter()
        .flat_map(|entry| {
            let entry_id = entry.entry_id().to_string();
            entry
                .coordinator
                .data()
                .iter()
                .map(|charger| ChargerResponse {
                    entry_id: entry_id.clone(),
                    charger: ChargerView::from(charger),
                })
                .collect::<Vec<_>>()
        })
        .collect();

    HttpResponse::Ok().json(chargers)
}

#[get("/chargers/{idx}")]
async fn get_charger_endpoint(state: web::Data<ApiState>, path: web::Path<String>) -> impl Responder {
    let idx = path.into_inner();

    let found = state.entries.registry().entries().iter().find_map(|entry| {
        entry
            .coordinator
            .data()
            .get(&idx)
            .map(|charger| ChargerResponse {
                entry_id: entry.entry_id().to_string(),
                charger: ChargerView::from(charger),
            })
    });

    match found {
        Some(charger) => HttpResponse::Ok().json(charger),
        None => HttpResponse::NotFound().json(serde_json::json!({
            "error": format!("charger {idx} not found")
        })),
    }
}

#[get("/entries")]
async fn list_entries_endpoint(state: web::Data<ApiState>) -> impl Responder {
    let records = match state.entries.store().list_entries() {
        Ok(records) => records,
        Err(error) => return service_error_response(error),
    };
    let registry = state.entries.registry();

    let entries: Vec<EntryResponse> = records
        .iter()
        .map(|record| EntryResponse::new(record, registry.get(&record.entry_id).as_deref()))
        .collect();

    HttpResponse::Ok().json(entries)
}

#[post("/entries")]
async fn create_entry_endpoint(
    state: web::Data<ApiState>,
    input: web::Json<UserInput>,
) -> impl Responder {
    match state.entries.add_entry(input.into_inner()).await {
        Ok(record) => {
            let live = state.entries.registry().get(&record.entry_id);
            HttpResponse::Created().json(EntryResponse::new(&record, live.as_deref()))
        }
        Err(error) => setup_error_response(error),
    }
}

#[delete("/entries/{entry_id}")]
async fn delete_entry_endpoint(
    state: web::Data<ApiState>,
    path: web::Path<String>,
) -> impl Responder {
    let entry_id = path.into_inner();
    match state.entries.remove_entry(&entry_id) {
        Ok(true) => HttpResponse::NoContent().finish(),
        Ok(false) => HttpResponse::NotFound().json(serde_json::json!({
            "error": format!("config entry {entry_id} not found")
        })),
        Err(error) => entry_error_response(error),
    }
}

#[post("/entries/{entry_id}/reload")]
async fn reload_entry_endpoint(
    state: web::Data<ApiState>,
    path: web::Path<String>,
) -> impl Responder {
    match state.entries.reload_entry(&path.into_inner()).await {
        Ok(entry) => HttpResponse::Ok().json(EntryResponse::new(&entry.record, Some(entry.as_ref()))),
        Err(error) => entry_error_response(error),
    }
}

#[post("/entries/{entry_id}/reauth")]
async fn reauth_entry_endpoint(
    state: web::Data<ApiState>,
    path: web::Path<String>,
    request: web::Json<ReauthRequest>,
) -> impl Responder {
    if request.password.is_empty() {
        return HttpResponse::BadRequest().json(serde_json::json!({
            "error": "password is required"
        }));
    }

    match state
        .entries
        .reauthenticate(&path.into_inner(), &request.password)
        .await
    {
        Ok(entry) => HttpResponse::Ok().json(EntryResponse::new(&entry.record, Some(entry.as_ref()))),
        Err(error) => entry_error_response(error),
    }
}

#[post("/services/{service}")]
async fn call_service_endpoint(
    state: web::Data<ApiState>,
    path: web::Path<String>,
    body: web::Bytes,
) -> impl Responder {
    let payload = if body.iter().all(u8::is_ascii_whitespace) {
        Value::Null
    } else {
        match serde_json::from_slice::<Value>(&body) {
            Ok(payload) => payload,
            Err(error) => {
                return HttpResponse::BadRequest().json(serde_json::json!({
                    "error": format!("invalid JSON payload: {error}")
                }));
            }
        }
    };

    match state.dispatcher.handle(&path.into_inner(), &payload).await {
        Ok(_) => HttpResponse::Accepted().finish(),
        Err(error @ ServiceCallError::UnknownService(_)) => {
            HttpResponse::NotFound().json(serde_json::json!({ "error": error.to_string() }))
        }
        Err(error) => {
            HttpResponse::BadRequest().json(serde_json::json!({ "error": error.to_string() }))
        }
    }
}

fn setup_error_response(error: SetupError) -> HttpResponse {
    let body = serde_json::json!({
        "error": error.form_error(),
        "detail": error.to_string(),
    });

    match error {
        SetupError::InvalidInput(_) | SetupError::InvalidAuth(_) => {
            HttpResponse::BadRequest().json(body)
        }
        SetupError::AlreadyConfigured(_) => HttpResponse::Conflict().json(body),
        SetupError::Communication(_) => HttpResponse::BadGateway().json(body),
        SetupError::ClientInit(_) | SetupError::Storage(_) => {
            HttpResponse::InternalServerError().json(body)
        }
    }
}

fn entry_error_response(error: EntryError) -> HttpResponse {
    let body = serde_json::json!({ "error": error.to_string() });

    match error {
        EntryError::NotFound(_) => HttpResponse::NotFound().json(body),
        EntryError::Coordinator(CoordinatorError::AuthFailed(_)) => {
            HttpResponse::Unauthorized().json(body)
        }
        EntryError::Coordinator(CoordinatorError::UpdateFailed(_)) => {
            HttpResponse::ServiceUnavailable().json(body)
        }
        EntryError::Storage(error) => service_error_response(error),
        EntryError::InvalidEntry(_) | EntryError::ClientInit(_) => {
            HttpResponse::InternalServerError().json(body)
        }
    }
}

fn service_error_response(error: ServiceError) -> HttpResponse {
    match error {
        ServiceError::DbLockPoisoned => {
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "database lock poisoned"
            }))
        }
        ServiceError::Database(error) => {
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": format!("database query failed: {error}")
            }))
        }
    }
}
