//! # brrtcontract
//!
//! **brrtcontract** turns an OpenAPI 3.0 contract, possibly split across many
//! files, remote URLs and tar archives, into ready-to-mount routes with a
//! precompiled request validation pipeline per operation.
//!
//! ## Overview
//!
//! Loading a contract goes through four stages:
//!
//! 1. **Resolve** every `$ref` reachable from the root document, fetching
//!    local files, `http(s)` URLs and `tar:` archive members concurrently
//! 2. **Flatten** the reference graph into one self-contained document,
//!    keeping recursive schemas as local `$ref`s
//! 3. **Validate** the flattened document against the OpenAPI 3.0 meta-schema
//! 4. **Assemble** one [`Operation`](spec::Operation) per path and method,
//!    each with a [`ValidationPipeline`](validator::ValidationPipeline)
//!
//! A [`RouterFactory`](router::RouterFactory) then binds operations to
//! application handlers and security providers and produces a
//! [`Router`](router::Router).
//!
//! ## Architecture
//!
//! - **[`resolver`]** - Document store, reference resolution, flattening
//! - **[`spec`]** - Contract loading, meta-schema check, operation assembly
//! - **[`validator`]** - Parameter styles, value parsers, body processors
//! - **[`security`]** - Security provider registry
//! - **[`router`]** - Path matching, handler chains, request dispatch
//! - **[`config`]** - Loader and router options (code, YAML, environment)
//! - **[`logging`]** - `tracing` subscriber setup
//!
//! ```mermaid
//! sequenceDiagram
//!     participant App
//!     participant Loader as spec::ContractLoader
//!     participant Resolver as resolver::ReferenceResolver
//!     participant Assembler as spec::OperationAssembler
//!     participant Factory as router::RouterFactory
//!
//!     App->>Loader: load("openapi.yaml")
//!     Loader->>Resolver: resolve(root)
//!     Resolver-->>Loader: DocumentStore
//!     Loader->>Loader: flatten + meta-schema check
//!     Loader-->>App: LoadedContract
//!     App->>Assembler: build_contract(&loaded)
//!     Assembler-->>App: Contract
//!     App->>Factory: operation(id, handler) / security_handler(..)
//!     App->>Factory: create_router()
//!     Factory-->>App: Router
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use brrtcontract::{build_contract, ContractLoader, LoaderOptions, RouterFactory};
//! use brrtcontract::validator::RequestData;
//! use http::Method;
//!
//! let loaded = ContractLoader::new(LoaderOptions::default())?
//!     .load("openapi.yaml")
//!     .await?;
//! let contract = build_contract(&loaded)?;
//!
//! let mut factory = RouterFactory::new(contract);
//! factory.operation("listPets", "list_pets")?;
//! let router = factory.create_router()?;
//!
//! let request = RequestData::new().with_query_string("limit=10");
//! let dispatch = router.dispatch(&Method::GET, "/pets", request)?;
//! assert_eq!(dispatch.route.handler(), Some(&"list_pets"));
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod resolver;
pub mod router;
pub mod security;
pub mod spec;
pub mod validator;

pub use config::{ContractConfig, LoaderOptions, RouterFactoryOptions};
pub use error::{ContractError, ErrorKind, RequestError, RequestErrorKind, Result};
pub use router::{Rejection, Router, RouterFactory};
pub use security::{ApiKeyProvider, SecurityProvider};
pub use spec::{build_contract, Contract, ContractLoader, LoadedContract, Operation};
pub use validator::{RequestData, ValidatedRequest, ValidationPipeline};
