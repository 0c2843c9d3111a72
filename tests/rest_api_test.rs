use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use anyhow::{Result, bail};
use chrono::{DateTime, NaiveDate, Utc};
use payment_reminders::backend::{Backend, TodayReminders};
use payment_reminders::config::RestApiConfig;
use payment_reminders::dispatch::DispatchReport;
use payment_reminders::rest_api::RestApi;
use payment_reminders::settings::DashboardSettings;
use payment_reminders::severity::{Severity, classify_due_str};
use payment_reminders::{DayWindow, NewReminder, day_window};
use reqwest::StatusCode;
use serde_json::json;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct StubBackend {
    added: Mutex<Vec<NewReminder>>,
    settings: Mutex<DashboardSettings>,
}

const EXISTING_ID: i64 = 7;

impl Backend for StubBackend {
    fn day_window(&self) -> DayWindow {
        day_window(
            DateTime::parse_from_rfc3339("2025-02-24T10:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
        )
    }

    fn severity(&self, due_date: Option<&str>) -> Severity {
        classify_due_str(
            due_date,
            NaiveDate::from_ymd_opt(2025, 2, 24).unwrap(),
            chrono_tz::Asia::Kolkata,
        )
    }

    async fn reminders_today(&self) -> Result<TodayReminders> {
        Ok(TodayReminders {
            window: self.day_window(),
            counts: HashMap::new(),
            reminders: Vec::new(),
        })
    }

    async fn add_reminder(&self, reminder: NewReminder) -> Result<i64> {
        self.added.lock().unwrap().push(reminder);
        Ok(EXISTING_ID)
    }

    async fn delete_reminder(&self, id: i64) -> Result<bool> {
        Ok(id == EXISTING_ID)
    }

    async fn dispatch_now(&self) -> Result<DispatchReport> {
        bail!("mail API unreachable")
    }

    fn settings(&self) -> DashboardSettings {
        self.settings.lock().unwrap().clone()
    }

    async fn update_settings(&self, settings: DashboardSettings) -> Result<DashboardSettings> {
        *self.settings.lock().unwrap() = settings.clone();
        Ok(settings)
    }
}

struct TestServer {
    backend: Arc<StubBackend>,
    base_url: String,
    client: reqwest::Client,
}

impl TestServer {
    async fn start() -> TestServer {
        let backend = Arc::new(StubBackend::default());
        let api = RestApi::new(
            RestApiConfig::default(),
            Arc::downgrade(&backend),
            CancellationToken::new(),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, api.router()).await.unwrap() });

        TestServer {
            backend,
            base_url: format!("http://{addr}"),
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn get_json(&self, path: &str) -> serde_json::Value {
        let response = self.client.get(self.url(path)).send().await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        response.json().await.unwrap()
    }
}

#[tokio::test]
async fn test_day_window() {
    let server = TestServer::start().await;
    assert_eq!(
        server.get_json("/day_window").await,
        json!({
            "civil_date": "2025-02-24",
            "window_start": "2025-02-23T18:30:00.000Z",
            "window_end": "2025-02-24T18:29:59.999Z",
        })
    );
}

#[tokio::test]
async fn test_severity() {
    let server = TestServer::start().await;
    assert_eq!(
        server.get_json("/severity?due_date=2025-02-20").await,
        json!({ "label": "Overdue by 4d", "tier": "overdue" })
    );
    assert_eq!(
        server.get_json("/severity").await,
        json!({ "label": "No Due Date", "tier": "no_due_date" })
    );
    assert_eq!(
        server.get_json("/severity?due_date=whenever").await,
        json!({ "label": "No Due Date", "tier": "no_due_date" })
    );
}

#[tokio::test]
async fn test_reminders_today() {
    let server = TestServer::start().await;
    let body = server.get_json("/reminders/today").await;
    assert_eq!(body["window"]["civil_date"], "2025-02-24");
    assert_eq!(body["counts"], json!({}));
    assert_eq!(body["reminders"], json!([]));
}

#[tokio::test]
async fn test_add_reminder() {
    let server = TestServer::start().await;
    let response = server
        .client
        .post(server.url("/reminders"))
        .json(&json!({
            "contact_name": "Asha Rao",
            "contact_email": "asha@example.com",
            "description": "Invoice #42",
            "amount_minor": 150000,
            "due_date": "2025-02-27",
            "remind_at": "2025-02-24T04:00:00Z",
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(
        response.json::<serde_json::Value>().await.unwrap(),
        json!({ "id": EXISTING_ID })
    );

    let added = server.backend.added.lock().unwrap().clone();
    assert_eq!(added.len(), 1);
    assert_eq!(added[0].currency, "");
    assert_eq!(added[0].due_date.as_deref(), Some("2025-02-27"));
}

#[tokio::test]
async fn test_delete_reminder() {
    let server = TestServer::start().await;

    let response = server
        .client
        .delete(server.url(&format!("/reminders/{EXISTING_ID}")))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = server
        .client
        .delete(server.url("/reminders/404"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_backend_errors_become_500() {
    let server = TestServer::start().await;
    let response = server
        .client
        .post(server.url("/reminders/dispatch"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response.text().await.unwrap(), "Something went wrong");
}

#[tokio::test]
async fn test_settings_round_trip() {
    let server = TestServer::start().await;
    assert_eq!(
        server.get_json("/settings").await,
        json!({ "business_name": "My Business", "currency": "INR", "reminders_enabled": true })
    );

    let response = server
        .client
        .put(server.url("/settings"))
        .json(&json!({ "business_name": "Rao Traders", "reminders_enabled": false }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    assert_eq!(
        server.get_json("/settings").await,
        json!({ "business_name": "Rao Traders", "currency": "INR", "reminders_enabled": false })
    );
}
