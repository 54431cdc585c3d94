#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use brrtcontract::error::{ContractError, ErrorKind, RequestErrorKind};
use brrtcontract::spec::{OperationAssembler, ParameterLocation};
use brrtcontract::validator::{MultipartForm, RequestData, RequestPredicate};
use common::contracts::{compile, load, with_paths};
use common::temp_files::ContractDir;
use http::Method;
use serde_json::json;

const SECURED: &str = r#"openapi: 3.0.3
info: {title: secured, version: "1"}
servers:
  - url: https://api.example.com/v2/
security:
  - oauth: [pets:read]
components:
  securitySchemes:
    oauth:
      type: oauth2
      flows:
        clientCredentials:
          tokenUrl: https://auth.example.com/token
          scopes:
            pets:read: read pets
paths:
  /pets:
    get:
      operationId: listPets
      tags: [pets]
      responses:
        "200":
          description: ok
          content:
            application/json:
              schema: {type: array, items: {type: string}}
  /health:
    get:
      operationId: health
      security: []
      responses:
        "200": {description: ok}
"#;

#[tokio::test]
async fn test_operation_level_empty_security_overrides_global() {
    let contract = compile(SECURED).await.unwrap();

    assert_eq!(contract.base_path, "/v2");
    assert_eq!(contract.security.len(), 1);
    assert!(contract.security_schemes.contains_key("oauth"));

    let list = contract.operation("listPets").unwrap();
    assert_eq!(list.security.len(), 1);
    assert_eq!(list.security[0].schemes["oauth"], vec!["pets:read".to_string()]);
    assert!(list.produces.contains("application/json"));

    let health = contract.operation("health").unwrap();
    assert!(health.security.is_empty());
}

#[tokio::test]
async fn test_meta_schema_failure_aborts_load() {
    let yaml = with_paths("  /pets:\n    get:\n      operationId: listPets\n");
    let err = compile(&yaml).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ContractInvalid);
    match err {
        ContractError::ContractInvalid { violations } => assert!(!violations.is_empty()),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn test_operation_parameter_overrides_path_parameter() {
    let yaml = with_paths(
        r#"  /pets/{id}:
    parameters:
      - {name: id, in: path, required: true, schema: {type: string}}
      - {name: trace, in: header, schema: {type: boolean}}
    get:
      operationId: getPet
      parameters:
        - {name: id, in: path, required: true, schema: {type: integer, minimum: 1}}
      responses:
        "200": {description: ok}
"#,
    );
    let contract = compile(&yaml).await.unwrap();
    let op = contract.find(&Method::GET, "/pets/{id}").unwrap();

    assert_eq!(op.parameters.len(), 2);
    assert_eq!(op.parameters[0].name, "id");
    assert_eq!(op.parameters[0].schema.schema()["type"], json!("integer"));

    let ok = op
        .pipeline
        .validate(&RequestData::new().with_path_param("id", "7").with_header("Trace", "true"))
        .unwrap();
    assert_eq!(ok.parameter(ParameterLocation::Path, "id"), Some(&json!(7)));
    assert_eq!(ok.parameter(ParameterLocation::Header, "trace"), Some(&json!(true)));

    let err = op
        .pipeline
        .validate(&RequestData::new().with_path_param("id", "abc"))
        .unwrap_err();
    assert_eq!(err.kind(), RequestErrorKind::Parse);

    let err = op
        .pipeline
        .validate(&RequestData::new().with_path_param("id", "0"))
        .unwrap_err();
    assert_eq!(err.kind(), RequestErrorKind::SchemaViolation);
}

#[tokio::test]
async fn test_duplicate_operation_ids_are_rejected() {
    let yaml = with_paths(
        "  /a:\n    get:\n      operationId: same\n      responses:\n        \"200\": {description: ok}\n  /b:\n    get:\n      operationId: same\n      responses:\n        \"200\": {description: ok}\n",
    );
    let err = compile(&yaml).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedContractFeature);
    assert!(err.to_string().contains("duplicate operation id 'same'"));
}

#[tokio::test]
async fn test_operation_ids_from_extension_and_synthesized() {
    let yaml = with_paths(
        "  /pets/{petId}:\n    parameters:\n      - {name: petId, in: path, required: true, schema: {type: string}}\n    get:\n      x-handler-name: fetch_pet\n      responses:\n        \"200\": {description: ok}\n    delete:\n      responses:\n        \"204\": {description: gone}\n",
    );
    let contract = compile(&yaml).await.unwrap();
    assert!(contract.operation("fetch_pet").is_some());
    assert_eq!(
        contract.find(&Method::DELETE, "/pets/{petId}").unwrap().operation_id,
        "delete_pets_petid"
    );
}

#[tokio::test]
async fn test_allow_reserved_is_unsupported() {
    let yaml = with_paths(
        "  /search:\n    get:\n      parameters:\n        - {name: q, in: query, allowReserved: true, schema: {type: string}}\n      responses:\n        \"200\": {description: ok}\n",
    );
    let err = compile(&yaml).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedContractFeature);
}

#[tokio::test]
async fn test_unknown_body_media_type_is_unsupported() {
    let yaml = with_paths(
        "  /upload:\n    put:\n      requestBody:\n        content:\n          application/xml:\n            schema: {type: object}\n      responses:\n        \"204\": {description: ok}\n",
    );
    let err = compile(&yaml).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedContractFeature);
    assert!(err.to_string().contains("application/xml"));
}

const UPLOAD: &str = r#"  /upload:
    post:
      operationId: upload
      requestBody:
        required: true
        content:
          multipart/form-data:
            schema:
              type: object
              required: [title, fileName]
              properties:
                title: {type: string, minLength: 2}
                copies: {type: integer}
                fileName: {type: string, format: binary}
            encoding:
              fileName:
                contentType: text/plain
      responses:
        "201": {description: created}
"#;

#[tokio::test]
async fn test_multipart_file_part_becomes_predicate() {
    let contract = compile(&with_paths(UPLOAD)).await.unwrap();
    let op = contract.operation("upload").unwrap();
    assert!(op.body_required);
    assert_eq!(op.consumes, vec!["multipart/form-data".to_string()]);
    assert!(matches!(
        op.pipeline.predicates(),
        [RequestPredicate::BodyRequired, RequestPredicate::FileUploadExists { property, .. }] if property == "fileName"
    ));

    let form = || MultipartForm::default().with_field("title", "report").with_field("copies", "3");

    let ok = op
        .pipeline
        .validate(&RequestData::new().with_multipart(form().with_file("fileName", "text/plain; charset=utf-8")))
        .unwrap();
    assert_eq!(ok.body, Some(json!({"title": "report", "copies": 3})));

    let missing = op
        .pipeline
        .validate(&RequestData::new().with_multipart(form()))
        .unwrap_err();
    assert_eq!(missing.kind(), RequestErrorKind::Predicate);

    let wrong_type = op
        .pipeline
        .validate(&RequestData::new().with_multipart(form().with_file("fileName", "image/png")))
        .unwrap_err();
    assert_eq!(wrong_type.kind(), RequestErrorKind::Predicate);

    let short_title = op
        .pipeline
        .validate(&RequestData::new().with_multipart(
            MultipartForm::default()
                .with_field("title", "x")
                .with_file("fileName", "text/plain"),
        ))
        .unwrap_err();
    assert_eq!(short_title.kind(), RequestErrorKind::SchemaViolation);

    let no_body = op.pipeline.validate(&RequestData::new()).unwrap_err();
    assert_eq!(no_body.kind(), RequestErrorKind::Predicate);
}

#[tokio::test]
async fn test_json_and_form_bodies_share_one_operation() {
    let yaml = with_paths(
        r#"  /pets:
    post:
      operationId: addPet
      requestBody:
        content:
          application/json:
            schema: {$ref: '#/components/schemas/Pet'}
          application/x-www-form-urlencoded:
            schema: {$ref: '#/components/schemas/Pet'}
      responses:
        "201": {description: created}
components:
  schemas:
    Pet:
      type: object
      required: [name]
      properties:
        name: {type: string}
        tags: {type: array, items: {type: string}}
        age: {type: integer}
"#,
    );
    let contract = compile(&yaml).await.unwrap();
    let pipeline = &contract.operation("addPet").unwrap().pipeline;

    let json_body = pipeline
        .validate(&RequestData::new().with_json_body(&json!({"name": "rex", "age": 3})))
        .unwrap();
    assert_eq!(json_body.body, Some(json!({"name": "rex", "age": 3})));

    let form_body = pipeline
        .validate(&RequestData::new().with_body(
            "application/x-www-form-urlencoded; charset=utf-8",
            "name=rex&tags=a&tags=b&age=4",
        ))
        .unwrap();
    assert_eq!(form_body.body, Some(json!({"name": "rex", "tags": ["a", "b"], "age": 4})));

    let invalid = pipeline
        .validate(&RequestData::new().with_json_body(&json!({"age": 3})))
        .unwrap_err();
    assert_eq!(invalid.kind(), RequestErrorKind::SchemaViolation);

    let unsupported = pipeline
        .validate(&RequestData::new().with_body("text/plain", "rex"))
        .unwrap_err();
    assert_eq!(unsupported.kind(), RequestErrorKind::UnsupportedMediaType);

    // No body and none required
    assert!(pipeline.validate(&RequestData::new()).is_ok());
}

#[tokio::test]
async fn test_json_family_request_uses_declared_json_body() {
    let yaml = with_paths(
        r#"  /pets/{id}:
    patch:
      operationId: patchPet
      parameters:
        - {name: id, in: path, required: true, schema: {type: integer}}
      requestBody:
        content:
          application/json:
            schema:
              type: object
              properties:
                name: {type: string}
              additionalProperties: false
      responses:
        "204": {description: patched}
"#,
    );
    let contract = compile(&yaml).await.unwrap();
    let pipeline = &contract.operation("patchPet").unwrap().pipeline;
    let request = |content_type: &str, body: &str| {
        RequestData::new()
            .with_path_param("id", "1")
            .with_body(content_type.to_string(), body.to_string())
    };

    let patched = pipeline
        .validate(&request("application/merge-patch+json", r#"{"name": "rex"}"#))
        .unwrap();
    assert_eq!(patched.body, Some(json!({"name": "rex"})));

    let with_charset = pipeline
        .validate(&request("application/vnd.pets+json; charset=utf-8", "{}"))
        .unwrap();
    assert_eq!(with_charset.body, Some(json!({})));

    let invalid = pipeline
        .validate(&request("application/merge-patch+json", r#"{"age": 3}"#))
        .unwrap_err();
    assert_eq!(invalid.kind(), RequestErrorKind::SchemaViolation);

    let not_json = pipeline.validate(&request("text/json-ish", "{}")).unwrap_err();
    assert_eq!(not_json.kind(), RequestErrorKind::UnsupportedMediaType);
}

#[tokio::test]
async fn test_shared_path_parameter_compiles_once() {
    let dir = ContractDir::new();
    dir.write(
        "openapi.yaml",
        &with_paths(
            "  /pets/{id}:\n    parameters:\n      - {name: id, in: path, required: true, schema: {type: integer}}\n    get:\n      responses:\n        \"200\": {description: ok}\n    delete:\n      responses:\n        \"204\": {description: gone}\n",
        ),
    );
    let loaded = load(&dir, "openapi.yaml").await.unwrap();
    let assembler = OperationAssembler::new(&loaded);
    let contract = assembler.assemble().unwrap();

    assert_eq!(contract.len(), 2);
    assert_eq!(assembler.compiled_schemas(), 1);
}

#[tokio::test]
async fn test_tags_select_operations() {
    let contract = compile(SECURED).await.unwrap();
    let tagged: Vec<_> = contract
        .operations_by_tag("pets")
        .map(|op| op.operation_id.as_str())
        .collect();
    assert_eq!(tagged, vec!["listPets"]);
}
