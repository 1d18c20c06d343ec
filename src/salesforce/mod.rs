//! Salesforce login and REST API interaction layer.
//!
//! - **Secure credential handling** via `secrecy::SecretString`
//! - **Safe logging** that never leaks session ids, SOQL, or record data
//! - **SOAP login** with username, password, and security token
//! - **Cursor paging** over the REST query endpoint

pub mod client;
pub mod login;
pub mod rest;
pub mod soql;
pub mod source;

pub use client::{build_http_client, SalesforceClient, Session};
pub use source::SalesforceSource;
