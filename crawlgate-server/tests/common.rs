#![allow(dead_code)]

use axum_test::TestServer;
use crawlgate_server::{AppState, create_app, infra::config::Config};

pub fn test_state() -> AppState {
    AppState::in_memory(Config::default())
}

pub fn test_server() -> (TestServer, AppState) {
    let state = test_state();
    let server = TestServer::new(create_app(state.clone())).expect("test server");
    (server, state)
}
