//! # Router Module
//!
//! Mounts compiled contract operations behind path matchers and handler
//! chains. The module does not serve HTTP; a host server feeds it a method, a
//! path and a [`RequestData`](crate::validator::RequestData) and gets back
//! either a validated request for the user handler or a [`Rejection`] with
//! the status code to answer.
//!
//! ## Architecture
//!
//! 1. **Compilation**: every OpenAPI template (`/pets/{id}`) becomes an
//!    anchored regex ([`PathMatcher`]); security requirements are bound to the
//!    registered providers; missing providers fail the whole build.
//! 2. **Matching**: routes are tried most specific first. A path that matches
//!    only under other methods yields `405` with the allowed methods.
//!
//! ## Example
//!
//! ```rust,ignore
//! let loaded = ContractLoader::new(LoaderOptions::default())?.load("openapi.yaml").await?;
//! let contract = build_contract(&loaded)?;
//! let mut factory = RouterFactory::new(contract);
//! factory.operation("getPet", my_handler)?;
//! let router = factory.create_router()?;
//! match router.dispatch(&Method::GET, "/pets/7", RequestData::new()) {
//!     Ok(dispatch) => (dispatch.route.handler().unwrap())(dispatch.request),
//!     Err(rejection) => respond(rejection.status()),
//! }
//! ```

mod factory;
mod path;

pub use factory::{ChainEntry, ChainStage, Dispatch, Rejection, Route, RouteOutcome, Router, RouterFactory};
pub use path::PathMatcher;
