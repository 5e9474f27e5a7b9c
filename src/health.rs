use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let config = state.get_config();

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": state.get_uptime_seconds(),
        "service": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "sessions": {
            "active": state.active_sessions()
        },
        "realtime": {
            "url": config.realtime.url,
            "model": config.realtime.model,
            "credentials_configured": !config.realtime.api_key.trim().is_empty()
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::realtime::testing::FakeConnector;
    use crate::session::testing::FakeClient;
    use crate::session::{SessionLifecycle, SessionRegistry};
    use actix_web::{test, App};
    use serde_json::Value;

    #[actix_web::test]
    async fn test_health_reports_active_sessions() {
        let config = AppConfig::default();
        let (connector, _remote) = FakeConnector::new();
        let lifecycle = SessionLifecycle::new(SessionRegistry::new(), connector, config.to_relay_settings());
        let (_session, _audio) = lifecycle.create(FakeClient::new()).await.unwrap();

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(AppState::new(config, lifecycle)))
                .route("/health", web::get().to(health_check)),
        )
        .await;

        let req = test::TestRequest::get().uri("/health").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["status"], "healthy");
        assert_eq!(body["sessions"]["active"], 1);
        assert_eq!(body["service"]["version"], env!("CARGO_PKG_VERSION"));
        assert!(body["realtime"].get("api_key").is_none());
    }
}
