mod common;

use actix_web::http::StatusCode;
use actix_web::{test, web, App};
use serde_json::{json, Value};
use uuid::Uuid;

use common::harness;
use invoice_intake::api::{configure_routes, ApiState};
use invoice_intake::{AppConfig, LifecycleManager, LifecycleOptions};

const TOKEN: &str = "test-token";

fn config(user: Uuid) -> AppConfig {
    let mut config = AppConfig::from_defaults().unwrap();
    config.auth_tokens = format!("{}={}", TOKEN, user);
    config
}

fn state(manager: LifecycleManager, config: AppConfig) -> web::Data<ApiState> {
    web::Data::new(ApiState::from_parts(manager, config).unwrap())
}

fn bearer() -> (&'static str, String) {
    ("Authorization", format!("Bearer {}", TOKEN))
}

fn upload(name: &str, content_type: &str, size: usize) -> test::TestRequest {
    test::TestRequest::post()
        .uri(&format!("/api/v1/invoices?filename={}", name))
        .insert_header(bearer())
        .insert_header(("Content-Type", content_type.to_string()))
        .set_payload(vec![0x25u8; size])
}

#[actix_rt::test]
async fn health_is_public() {
    let h = harness(LifecycleOptions::default()).await;
    let app = test::init_service(
        App::new()
            .app_data(state(h.manager, config(Uuid::new_v4())))
            .configure(configure_routes),
    )
    .await;

    let resp = test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = test::call_service(&app, test::TestRequest::get().uri("/ready").to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["checks"]["storage"], "memory");
}

#[actix_rt::test]
async fn api_requires_a_known_bearer_token() {
    let h = harness(LifecycleOptions::default()).await;
    let app = test::init_service(
        App::new()
            .app_data(state(h.manager, config(Uuid::new_v4())))
            .configure(configure_routes),
    )
    .await;

    let anonymous = test::TestRequest::get().uri("/api/v1/invoices").to_request();
    assert_eq!(test::call_service(&app, anonymous).await.status(), StatusCode::UNAUTHORIZED);

    let wrong = test::TestRequest::get()
        .uri("/api/v1/invoices")
        .insert_header(("Authorization", "Bearer nope"))
        .to_request();
    assert_eq!(test::call_service(&app, wrong).await.status(), StatusCode::UNAUTHORIZED);
}

#[actix_rt::test]
async fn invoice_flow_over_http() {
    let h = harness(LifecycleOptions::default()).await;
    let app = test::init_service(
        App::new()
            .app_data(state(h.manager.clone(), config(Uuid::new_v4())))
            .configure(configure_routes),
    )
    .await;

    let resp = test::call_service(&app, upload("EDF_Facture.pdf", "application/pdf", 2048).to_request()).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let invoice: Value = test::read_body_json(resp).await;
    assert_eq!(invoice["status"], "pending");
    assert_eq!(invoice["title"], "EDF_Facture");
    let id = invoice["id"].as_str().unwrap().to_string();

    // exporting before validation is a conflict
    let early = test::TestRequest::post()
        .uri(&format!("/api/v1/invoices/{}/export", id))
        .insert_header(bearer())
        .to_request();
    assert_eq!(test::call_service(&app, early).await.status(), StatusCode::CONFLICT);

    let analyze = test::TestRequest::post()
        .uri(&format!("/api/v1/invoices/{}/analyze", id))
        .insert_header(bearer())
        .to_request();
    let resp = test::call_service(&app, analyze).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let analysis: Value = test::read_body_json(resp).await;
    assert_eq!(analysis["invoice"]["status"], "processed");
    assert_eq!(analysis["invoice"]["supplier"], "E.D.F");

    let validate = test::TestRequest::post()
        .uri(&format!("/api/v1/invoices/{}/validate", id))
        .insert_header(bearer())
        .set_json(json!({ "supplier": "EDF", "total_amount": "294.00" }))
        .to_request();
    let resp = test::call_service(&app, validate).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let detail: Value = test::read_body_json(resp).await;
    assert_eq!(detail["status"], "validated");
    assert_eq!(detail["fields"].as_array().unwrap().len(), 8);

    let preview = test::TestRequest::get()
        .uri(&format!("/api/v1/invoices/{}/sage-preview", id))
        .insert_header(bearer())
        .to_request();
    let payload: Value = test::read_body_json(test::call_service(&app, preview).await).await;
    assert_eq!(payload["Fournisseur"], "EDF");
    assert_eq!(payload["MontantHT"], json!(245.0));
    assert_eq!(payload["TypeDocument"], "FACTURE");

    let export = test::TestRequest::post()
        .uri(&format!("/api/v1/invoices/{}/export", id))
        .insert_header(bearer())
        .to_request();
    let resp = test::call_service(&app, export).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let result: Value = test::read_body_json(resp).await;
    assert_eq!(result["success"], true);
    assert_eq!(h.exporter.submissions(), 1);

    let list = test::TestRequest::get()
        .uri("/api/v1/invoices")
        .insert_header(bearer())
        .to_request();
    let body: Value = test::read_body_json(test::call_service(&app, list).await).await;
    assert_eq!(body["invoices"].as_array().unwrap().len(), 1);

    let delete = test::TestRequest::delete()
        .uri(&format!("/api/v1/invoices/{}", id))
        .insert_header(bearer())
        .to_request();
    assert_eq!(test::call_service(&app, delete).await.status(), StatusCode::NO_CONTENT);

    let gone = test::TestRequest::get()
        .uri(&format!("/api/v1/invoices/{}", id))
        .insert_header(bearer())
        .to_request();
    assert_eq!(test::call_service(&app, gone).await.status(), StatusCode::NOT_FOUND);
}

#[actix_rt::test]
async fn rejected_uploads_map_to_client_errors() {
    let h = harness(LifecycleOptions::default()).await;
    let app = test::init_service(
        App::new()
            .app_data(state(h.manager.clone(), config(Uuid::new_v4())))
            .configure(configure_routes),
    )
    .await;

    let resp = test::call_service(&app, upload("notes.txt", "text/plain", 128).to_request()).await;
    assert_eq!(resp.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    let body: Value = test::read_body_json(resp).await;
    assert!(body["error"].as_str().unwrap().contains("text/plain"));

    let resp = test::call_service(
        &app,
        upload("scan.pdf", "application/pdf", 11 * 1024 * 1024).to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);

    assert_eq!(h.store.put_calls(), 0);
}

#[actix_rt::test]
async fn invalid_validation_body_is_a_bad_request() {
    let h = harness(LifecycleOptions::default()).await;
    let app = test::init_service(
        App::new()
            .app_data(state(h.manager.clone(), config(Uuid::new_v4())))
            .configure(configure_routes),
    )
    .await;

    let resp = test::call_service(&app, upload("facture.pdf", "application/pdf", 512).to_request()).await;
    let invoice: Value = test::read_body_json(resp).await;
    let id = invoice["id"].as_str().unwrap().to_string();
    let analyze = test::TestRequest::post()
        .uri(&format!("/api/v1/invoices/{}/analyze", id))
        .insert_header(bearer())
        .to_request();
    test::call_service(&app, analyze).await;

    let validate = test::TestRequest::post()
        .uri(&format!("/api/v1/invoices/{}/validate", id))
        .insert_header(bearer())
        .set_json(json!({ "supplier": "" }))
        .to_request();
    let resp = test::call_service(&app, validate).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert!(body["error"].as_str().unwrap().contains("supplier"));
}

#[actix_rt::test]
async fn callers_are_rate_limited() {
    let h = harness(LifecycleOptions::default()).await;
    let mut config = config(Uuid::new_v4());
    config.rate_limit_per_minute = 1;
    config.rate_limit_burst = 1;
    let app = test::init_service(
        App::new()
            .app_data(state(h.manager, config))
            .configure(configure_routes),
    )
    .await;

    let list = || {
        test::TestRequest::get()
            .uri("/api/v1/invoices")
            .insert_header(bearer())
            .to_request()
    };
    assert_eq!(test::call_service(&app, list()).await.status(), StatusCode::OK);
    assert_eq!(test::call_service(&app, list()).await.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[actix_rt::test]
async fn templates_can_be_created_and_listed() {
    let h = harness(LifecycleOptions::default()).await;
    let app = test::init_service(
        App::new()
            .app_data(state(h.manager, config(Uuid::new_v4())))
            .configure(configure_routes),
    )
    .await;

    let create = test::TestRequest::post()
        .uri("/api/v1/templates")
        .insert_header(bearer())
        .set_json(json!({
            "name": "Virement",
            "schema": { "iban": { "label": "IBAN", "required": true } }
        }))
        .to_request();
    let resp = test::call_service(&app, create).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let template: Value = test::read_body_json(resp).await;
    assert_eq!(template["is_public"], false);

    let get = test::TestRequest::get()
        .uri(&format!("/api/v1/templates/{}", template["id"].as_str().unwrap()))
        .insert_header(bearer())
        .to_request();
    assert_eq!(test::call_service(&app, get).await.status(), StatusCode::OK);

    let missing = test::TestRequest::get()
        .uri(&format!("/api/v1/templates/{}", Uuid::new_v4()))
        .insert_header(bearer())
        .to_request();
    assert_eq!(test::call_service(&app, missing).await.status(), StatusCode::NOT_FOUND);
}

#[actix_rt::test]
async fn malformed_template_schemas_are_bad_requests() {
    let h = harness(LifecycleOptions::default()).await;
    let app = test::init_service(
        App::new()
            .app_data(state(h.manager, config(Uuid::new_v4())))
            .configure(configure_routes),
    )
    .await;

    for schema in [json!({ "Bad Key!": { "label": "x" } }), json!({})] {
        let create = test::TestRequest::post()
            .uri("/api/v1/templates")
            .insert_header(bearer())
            .set_json(json!({ "name": "Cassé", "schema": schema }))
            .to_request();
        let resp = test::call_service(&app, create).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "schema {}", schema);
    }

    let list = test::TestRequest::get()
        .uri("/api/v1/templates")
        .insert_header(bearer())
        .to_request();
    let body: Value = test::read_body_json(test::call_service(&app, list).await).await;
    assert!(body["templates"].as_array().unwrap().is_empty());
}
