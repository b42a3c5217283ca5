//! Scripted in-memory repository host for integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use provisioning::{
    AccessToken, BackoffConfig, BranchName, BranchProtectionPolicy, CircuitBreaker,
    CircuitBreakerConfig, GeneratedRepository, HostError, RepositoryHost, RepositoryRef,
    ResilientExecutor, TemplateGeneration,
};

#[derive(Default)]
pub struct FakeHost {
    create: Mutex<VecDeque<Result<GeneratedRepository, HostError>>>,
    branch_exists: Mutex<VecDeque<Result<bool, HostError>>>,
    protect: Mutex<VecDeque<Result<(), HostError>>>,
    repository_exists: Mutex<VecDeque<Result<bool, HostError>>>,
    delete: Mutex<VecDeque<Result<(), HostError>>>,
    calls: Mutex<Vec<&'static str>>,
    protected: Mutex<Vec<(RepositoryRef, BranchName, BranchProtectionPolicy)>>,
}

impl FakeHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_create(self, result: Result<GeneratedRepository, HostError>) -> Self {
        self.create.lock().unwrap().push_back(result);
        self
    }

    pub fn on_branch_exists(self, result: Result<bool, HostError>) -> Self {
        self.branch_exists.lock().unwrap().push_back(result);
        self
    }

    pub fn on_protect(self, result: Result<(), HostError>) -> Self {
        self.protect.lock().unwrap().push_back(result);
        self
    }

    pub fn on_repository_exists(self, result: Result<bool, HostError>) -> Self {
        self.repository_exists.lock().unwrap().push_back(result);
        self
    }

    pub fn on_delete(self, result: Result<(), HostError>) -> Self {
        self.delete.lock().unwrap().push_back(result);
        self
    }

    pub fn calls(&self, name: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| **c == name)
            .count()
    }

    pub fn call_log(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    pub fn protected(&self) -> Vec<(RepositoryRef, BranchName, BranchProtectionPolicy)> {
        self.protected.lock().unwrap().clone()
    }

    fn record(&self, name: &'static str) {
        self.calls.lock().unwrap().push(name);
    }
}

fn next<T>(queue: &Mutex<VecDeque<T>>, fallback: impl FnOnce() -> T) -> T {
    queue.lock().unwrap().pop_front().unwrap_or_else(fallback)
}

#[async_trait]
impl RepositoryHost for FakeHost {
    async fn create_repository_from_template(
        &self,
        _token: &AccessToken,
        request: &TemplateGeneration,
    ) -> Result<GeneratedRepository, HostError> {
        self.record("create");
        next(&self.create, || Ok(generated(&request.target)))
    }

    async fn branch_exists(
        &self,
        _token: &AccessToken,
        _repository: &RepositoryRef,
        _branch: &BranchName,
    ) -> Result<bool, HostError> {
        self.record("branch_exists");
        next(&self.branch_exists, || Ok(true))
    }

    async fn protect_branch(
        &self,
        _token: &AccessToken,
        repository: &RepositoryRef,
        branch: &BranchName,
        policy: &BranchProtectionPolicy,
    ) -> Result<(), HostError> {
        self.record("protect");
        let result = next(&self.protect, || Ok(()));
        if result.is_ok() {
            self.protected
                .lock()
                .unwrap()
                .push((repository.clone(), branch.clone(), policy.clone()));
        }
        result
    }

    async fn repository_exists(
        &self,
        _token: &AccessToken,
        _repository: &RepositoryRef,
    ) -> Result<bool, HostError> {
        self.record("repository_exists");
        next(&self.repository_exists, || Ok(true))
    }

    async fn delete_repository(
        &self,
        _token: &AccessToken,
        _repository: &RepositoryRef,
    ) -> Result<(), HostError> {
        self.record("delete");
        next(&self.delete, || Ok(()))
    }
}

pub fn generated(target: &RepositoryRef) -> GeneratedRepository {
    GeneratedRepository {
        url: format!("https://github.com/{target}"),
        default_branch: BranchName::new("main").unwrap(),
    }
}

pub fn target() -> RepositoryRef {
    RepositoryRef::parse("octo-org", "widgets").unwrap()
}

pub fn token() -> AccessToken {
    AccessToken::new("ghp_test").unwrap()
}

pub fn engine(max_retries: u32, failure_threshold: u32) -> ResilientExecutor {
    let backoff = BackoffConfig::default()
        .with_base_delay(Duration::from_millis(500))
        .with_max_delay(Duration::from_secs(8))
        .with_max_retries(max_retries)
        .with_jitter(false);
    let breaker = CircuitBreaker::new(
        CircuitBreakerConfig::default()
            .with_failure_threshold(failure_threshold)
            .with_reset_timeout(Duration::from_secs(60)),
    );
    ResilientExecutor::new(backoff, breaker).unwrap()
}
