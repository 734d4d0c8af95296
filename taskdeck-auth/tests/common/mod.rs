//! Shared fixtures for store integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;
use taskdeck_auth::{
    AuthSnapshot, Identity, InMemoryIdentityService, Role, SeedAccount, SessionStore,
};

pub const PASSWORD: &str = "correct-horse";

pub struct TestApp {
    pub service: Arc<InMemoryIdentityService>,
    pub store: SessionStore,
}

impl TestApp {
    pub async fn sign_in(&self, email: &str) -> AuthSnapshot {
        self.store
            .authenticate(email, PASSWORD)
            .await
            .expect("sign in failed");
        let email = email.to_lowercase();
        settle(&self.store, move |s| {
            s.identity.as_ref().map(|i| i.email.as_str()) == Some(email.as_str())
                && s.profile.is_some()
                && !s.roles.is_empty()
        })
        .await
    }
}

pub fn account(email: &str, first_name: &str, roles: &[Role]) -> SeedAccount {
    SeedAccount::new(email, PASSWORD)
        .with_name(first_name, "Tester")
        .with_roles(roles)
}

/// Build a seeded service without connecting a store
pub fn seeded_service(accounts: Vec<SeedAccount>) -> (Arc<InMemoryIdentityService>, Vec<Identity>) {
    let service = InMemoryIdentityService::new();
    let identities = accounts
        .into_iter()
        .map(|seed| service.add_account(seed).expect("seed account"))
        .collect();
    (Arc::new(service), identities)
}

/// Connect a store to `service` and wait for the first session read
pub async fn connect(service: Arc<InMemoryIdentityService>) -> TestApp {
    let store = SessionStore::connect(service.clone())
        .await
        .expect("store connect");
    store.wait_until_loaded().await.expect("store loaded");
    TestApp { service, store }
}

pub async fn spawn_app(accounts: Vec<SeedAccount>) -> (TestApp, Vec<Identity>) {
    let (service, identities) = seeded_service(accounts);
    (connect(service).await, identities)
}

/// Wait (bounded) until the store state satisfies `predicate`
pub async fn settle<F>(store: &SessionStore, predicate: F) -> AuthSnapshot
where
    F: FnMut(&AuthSnapshot) -> bool,
{
    tokio::time::timeout(Duration::from_secs(2), store.wait_for(predicate))
        .await
        .expect("store did not reach the expected state")
        .expect("store closed")
}
