//! Token acquisition against the Microsoft identity platform.
//!
//! Provides authority selection, the OAuth2 token endpoint client, browser and
//! device code sign-in, and the coordinator that ties them to the token cache.

pub mod authority;
pub mod callback_server;
pub mod coordinator;
pub mod device_code;
pub mod graph;
pub mod id_token;
pub mod oauth;
pub mod requests;
pub mod web_ui;
