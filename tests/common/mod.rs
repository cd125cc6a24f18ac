//! Recording sources and connections shared by the scenario tests

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use txn_coord::{Connection, Error, Source};

/// Install a `tracing` subscriber honouring `RUST_LOG`; later calls are no-ops
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Failure reasons used by the mocks and logic steps
#[derive(Clone, Debug, PartialEq)]
pub enum Fault {
    X,
    StepRefused,
    Unreachable,
}

/// Ordered record of everything the mocks were asked to do
#[derive(Default)]
pub struct Journal {
    events: Mutex<Vec<String>>,
}

impl Journal {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, event: &str) -> usize {
        self.events().iter().filter(|e| *e == event).count()
    }

    pub fn position(&self, event: &str) -> Option<usize> {
        self.events().iter().position(|e| e == event)
    }
}

pub struct MockConn {
    name: String,
    journal: Arc<Journal>,
    fail_commit: Option<Fault>,
    commit_delay: Duration,
    value: Mutex<String>,
}

impl MockConn {
    pub fn read(&self) -> String {
        self.journal.record(format!("{}:read", self.name));
        self.value.lock().unwrap().clone()
    }

    pub fn write(&self, value: &str) {
        self.journal.record(format!("{}:write", self.name));
        *self.value.lock().unwrap() = value.to_owned();
    }
}

#[async_trait]
impl Connection for MockConn {
    async fn commit(&self) -> Result<(), Error> {
        if !self.commit_delay.is_zero() {
            tokio::time::sleep(self.commit_delay).await;
        }
        self.journal.record(format!("{}:commit", self.name));
        match &self.fail_commit {
            Some(fault) => Err(Error::new(fault.clone())),
            None => Ok(()),
        }
    }

    async fn rollback(&self) {
        self.journal.record(format!("{}:rollback", self.name));
    }

    async fn close(&self) {
        self.journal.record(format!("{}:close", self.name));
    }
}

pub struct MockSource {
    name: String,
    journal: Arc<Journal>,
    initial: String,
    fail_create: bool,
    fail_commit: Option<Fault>,
    commit_delay: Duration,
}

impl MockSource {
    pub fn new(name: &str, journal: &Arc<Journal>) -> Self {
        Self {
            name: name.to_owned(),
            journal: Arc::clone(journal),
            initial: String::new(),
            fail_create: false,
            fail_commit: None,
            commit_delay: Duration::ZERO,
        }
    }

    pub fn holding(mut self, value: &str) -> Self {
        self.initial = value.to_owned();
        self
    }

    pub fn failing_create(mut self) -> Self {
        self.fail_create = true;
        self
    }

    pub fn failing_commit(mut self, fault: Fault) -> Self {
        self.fail_commit = Some(fault);
        self
    }

    pub fn slow_commit(mut self, delay: Duration) -> Self {
        self.commit_delay = delay;
        self
    }
}

#[async_trait]
impl Source for MockSource {
    type Conn = MockConn;

    async fn create(&self) -> Result<MockConn, Error> {
        self.journal.record(format!("{}:create", self.name));
        if self.fail_create {
            return Err(Error::new(Fault::Unreachable));
        }
        Ok(MockConn {
            name: self.name.clone(),
            journal: Arc::clone(&self.journal),
            fail_commit: self.fail_commit.clone(),
            commit_delay: self.commit_delay,
            value: Mutex::new(self.initial.clone()),
        })
    }
}
