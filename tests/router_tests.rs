#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use brrtcontract::error::{ContractError, ErrorKind, RequestErrorKind};
use brrtcontract::router::{ChainStage, Rejection, RouteOutcome, RouterFactory};
use brrtcontract::spec::{Contract, ParameterLocation};
use brrtcontract::validator::RequestData;
use brrtcontract::{ApiKeyProvider, RouterFactoryOptions, SecurityProvider};
use common::contracts::compile;
use http::{Method, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;

const PETSTORE: &str = r#"openapi: 3.0.3
info: {title: petstore, version: "1"}
servers:
  - url: /api
security:
  - key: []
components:
  securitySchemes:
    key: {type: apiKey, in: header, name: X-API-Key}
    oauth:
      type: oauth2
      flows:
        implicit:
          authorizationUrl: https://auth.example.com/authorize
          scopes:
            pets:read: read
            pets:write: write
  schemas:
    Pet:
      type: object
      required: [name]
      properties:
        name: {type: string}
paths:
  /pets:
    get:
      operationId: listPets
      tags: [pets]
      parameters:
        - {name: limit, in: query, schema: {type: integer, maximum: 100}}
      responses:
        "200": {description: ok}
    post:
      operationId: addPet
      tags: [pets]
      requestBody:
        required: true
        content:
          application/json:
            schema: {$ref: '#/components/schemas/Pet'}
      responses:
        "201": {description: created}
  /pets/{id}:
    get:
      operationId: getPet
      tags: [pets]
      parameters:
        - {name: id, in: path, required: true, schema: {type: integer}}
      responses:
        "200": {description: ok}
  /pets/mine:
    get:
      operationId: myPets
      security:
        - oauth: [pets:read, pets:write]
      responses:
        "200": {description: ok}
  /health:
    get:
      operationId: health
      security: []
      responses:
        "200": {description: ok}
"#;

async fn petstore() -> Arc<Contract> {
    Arc::new(compile(PETSTORE).await.unwrap())
}

fn allow_all() -> Arc<dyn SecurityProvider> {
    Arc::new(|_: &Value, _: &[String], _: &RequestData| true)
}

/// Factory with every security scheme satisfied by `X-API-Key: secret`.
fn factory(contract: Arc<Contract>) -> RouterFactory<&'static str> {
    let mut factory = RouterFactory::new(contract);
    factory
        .security_handler("key", Arc::new(ApiKeyProvider::new("secret")))
        .security_handler("oauth", allow_all());
    factory
}

fn authorized() -> RequestData {
    RequestData::new().with_header("X-API-Key", "secret")
}

#[tokio::test]
async fn test_unknown_operation_id_is_rejected() {
    let mut factory = factory(petstore().await);
    let err = factory.operation("deletePet", "delete").unwrap_err();
    assert!(matches!(err, ContractError::OperationIdNotFound(ref id) if id == "deletePet"));
    assert_eq!(err.to_string(), "deletePet not found inside contract");
}

#[tokio::test]
async fn test_missing_security_handler_fails_router_creation() {
    let mut factory = RouterFactory::<&str>::new(petstore().await);
    factory.security_handler("key", allow_all());
    let err = factory.create_router().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MissingSecurityHandler);
    assert!(err.to_string().contains("oauth:pets:read"), "{err}");

    // Optional handlers: the unbound requirement is skipped
    let router = RouterFactory::<&str>::new(petstore().await)
        .with_options(RouterFactoryOptions {
            require_security_handlers: false,
            ..RouterFactoryOptions::default()
        })
        .create_router()
        .unwrap();
    let mine = router.routes().iter().find(|r| r.operation_id == "myPets").unwrap();
    assert!(mine.security().is_none());
}

#[tokio::test]
async fn test_handler_chain_order() {
    let mut factory = factory(petstore().await);
    factory.add_global_handler("cors").add_global_handler("trace");
    factory.operation("listPets", "list").unwrap();
    let router = factory.create_router().unwrap();

    let list = router.routes().iter().find(|r| r.operation_id == "listPets").unwrap();
    assert_eq!(
        list.stages(),
        vec![
            ChainStage::BodyExtraction,
            ChainStage::Global,
            ChainStage::Global,
            ChainStage::Security,
            ChainStage::Validation,
            ChainStage::User,
        ]
    );
    assert_eq!(list.global_handlers().copied().collect::<Vec<_>>(), vec!["cors", "trace"]);

    let health = router.routes().iter().find(|r| r.operation_id == "health").unwrap();
    assert_eq!(health.stages().last(), Some(&ChainStage::NotImplemented));
    assert!(!health.stages().contains(&ChainStage::Security));
}

#[tokio::test]
async fn test_dispatch_runs_security_then_validation() {
    let mut factory = factory(petstore().await);
    factory.operation("getPet", "get").unwrap();
    factory.operation("addPet", "add").unwrap();
    let router = factory.create_router().unwrap();

    let dispatch = router.dispatch(&Method::GET, "/api/pets/42", authorized()).unwrap();
    assert_eq!(dispatch.route.handler(), Some(&"get"));
    assert_eq!(dispatch.request.parameter(ParameterLocation::Path, "id"), Some(&json!(42)));

    let unauthorized = router
        .dispatch(&Method::GET, "/api/pets/42", RequestData::new())
        .unwrap_err();
    assert_eq!(unauthorized.status(), StatusCode::UNAUTHORIZED);

    let bad_id = router
        .dispatch(&Method::GET, "/api/pets/abc", authorized())
        .unwrap_err();
    assert_eq!(bad_id.status(), StatusCode::BAD_REQUEST);
    assert!(matches!(bad_id, Rejection::Invalid(ref e) if e.kind() == RequestErrorKind::Parse));

    let added = router
        .dispatch(&Method::POST, "/api/pets", authorized().with_json_body(&json!({"name": "rex"})))
        .unwrap();
    assert_eq!(added.request.body, Some(json!({"name": "rex"})));

    let wrong_media = router
        .dispatch(&Method::POST, "/api/pets", authorized().with_body("text/csv", "rex"))
        .unwrap_err();
    assert_eq!(wrong_media.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);

    let missing_body = router
        .dispatch(&Method::POST, "/api/pets", authorized())
        .unwrap_err();
    assert_eq!(missing_body.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unimplemented_operations_answer_501_and_405() {
    let router = factory(petstore().await).create_router().unwrap();

    let not_implemented = router
        .dispatch(&Method::GET, "/api/health", RequestData::new())
        .unwrap_err();
    assert_eq!(not_implemented.status(), StatusCode::NOT_IMPLEMENTED);

    match router.dispatch(&Method::DELETE, "/api/pets", authorized()).unwrap_err() {
        Rejection::MethodNotAllowed(allowed) => {
            assert!(allowed.contains(&Method::GET));
            assert!(allowed.contains(&Method::POST));
        }
        other => panic!("unexpected {other:?}"),
    }

    let not_found = router
        .dispatch(&Method::GET, "/pets", RequestData::new())
        .unwrap_err();
    assert_eq!(not_found.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unimplemented_operations_can_be_skipped() {
    let mut factory = factory(petstore().await).with_options(RouterFactoryOptions {
        mount_not_implemented_handler: false,
        ..RouterFactoryOptions::default()
    });
    factory.operation("listPets", "list").unwrap();
    let router = factory.create_router().unwrap();

    assert_eq!(router.routes().len(), 1);
    let rejection = router
        .dispatch(&Method::POST, "/api/pets", authorized())
        .unwrap_err();
    assert_eq!(rejection.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_literal_route_wins_over_template() {
    let mut factory = factory(petstore().await);
    factory.operation("getPet", "get").unwrap();
    factory.operation("myPets", "mine").unwrap();
    let router = factory.create_router().unwrap();

    match router.route(&Method::GET, "/api/pets/mine") {
        RouteOutcome::Matched { route, .. } => assert_eq!(route.operation_id, "myPets"),
        _ => panic!("expected a match"),
    }
}

#[tokio::test]
async fn test_scoped_security_handler_wins() {
    let deny: Arc<dyn SecurityProvider> = Arc::new(|_: &Value, _: &[String], _: &RequestData| false);
    let mut factory = factory(petstore().await);
    factory.scoped_security_handler("oauth", "pets:write", deny);
    factory.operation("myPets", "mine").unwrap();
    let router = factory.create_router().unwrap();

    let route = router.routes().iter().find(|r| r.operation_id == "myPets").unwrap();
    let bindings = &route.security().unwrap().alternatives[0];
    assert_eq!(bindings.len(), 2);
    assert_eq!(bindings[1].scopes, vec!["pets:write".to_string()]);

    let rejected = router
        .dispatch(&Method::GET, "/api/pets/mine", RequestData::new())
        .unwrap_err();
    assert_eq!(rejected.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_operations_by_tag_and_operation_model() {
    let mut factory = factory(petstore().await).with_options(RouterFactoryOptions {
        operation_model_key: Some("openapiOperation".to_string()),
        ..RouterFactoryOptions::default()
    });
    let mounted = factory.operations_by_tag("pets", |_| "pets");
    assert_eq!(mounted, 3);
    let router = factory.create_router().unwrap();

    let add = router.routes().iter().find(|r| r.operation_id == "addPet").unwrap();
    assert!(add.is_implemented());
    assert!(!add.allow_empty_body);
    assert_eq!(add.consumes, vec!["application/json".to_string()]);
    let (key, model) = add.model.as_ref().unwrap();
    assert_eq!(key, "openapiOperation");
    assert_eq!(model["operationId"], json!("addPet"));

    let list = router.routes().iter().find(|r| r.operation_id == "listPets").unwrap();
    assert!(list.allow_empty_body);
    let over_limit = router
        .dispatch(&Method::GET, "/api/pets", authorized().with_query_string("limit=500"))
        .unwrap_err();
    assert!(matches!(over_limit, Rejection::Invalid(ref e) if e.kind() == RequestErrorKind::SchemaViolation));
}
