//! Recording test double for the provider traits.

use crate::context::Context;
use crate::error::{Error, Result};
use crate::querier::{Backend, Provider, Querier, Rows, SingleRow, TxHandle};
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Which object answered a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Pool,
    Tx(usize),
}

/// Backend whose outcomes and rows are the answering target.
pub struct FakeBackend;

impl Backend for FakeBackend {
    type Arguments = Vec<i64>;
    type Outcome = Target;
    type Row = Target;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Begin,
    Execute(String),
    Query(String),
    QueryRow(String),
    Commit,
    Rollback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub target: Target,
    pub op: Op,
}

#[derive(Debug, thiserror::Error)]
#[error("constraint violation")]
pub struct ConstraintViolation;

#[derive(Debug, thiserror::Error)]
#[error("connection reset")]
pub struct ConnectionReset;

/// Failures the fake should produce.
#[derive(Debug, Clone, Default)]
pub struct Script {
    pub fail_begin: bool,
    pub fail_commit: bool,
    pub fail_rollback: bool,
    /// Statements with this text fail with [`ConstraintViolation`].
    pub fail_sql: Option<String>,
}

#[derive(Default)]
struct Shared {
    calls: Mutex<Vec<Call>>,
    next_tx: AtomicUsize,
    script: Script,
}

impl Shared {
    fn record(&self, target: Target, op: Op) {
        self.calls.lock().unwrap().push(Call { target, op });
    }

    fn check_sql(&self, sql: &str) -> Result<()> {
        match &self.script.fail_sql {
            Some(bad) if bad == sql => Err(Error::Driver(Box::new(ConstraintViolation))),
            _ => Ok(()),
        }
    }
}

#[derive(Clone, Default)]
pub struct FakePool {
    shared: Arc<Shared>,
}

impl FakePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scripted(script: Script) -> Self {
        Self {
            shared: Arc::new(Shared {
                script,
                ..Shared::default()
            }),
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.shared.calls.lock().unwrap().clone()
    }

    pub fn count(&self, op: &Op) -> usize {
        self.calls().iter().filter(|call| &call.op == op).count()
    }
}

#[async_trait]
impl Querier<FakeBackend> for FakePool {
    async fn execute(&self, _ctx: &Context, sql: &str, _args: Vec<i64>) -> Result<Target> {
        self.shared.record(Target::Pool, Op::Execute(sql.to_owned()));
        self.shared.check_sql(sql)?;
        Ok(Target::Pool)
    }

    async fn query(&self, _ctx: &Context, sql: &str, _args: Vec<i64>) -> Result<Rows<FakeBackend>> {
        self.shared.record(Target::Pool, Op::Query(sql.to_owned()));
        self.shared.check_sql(sql)?;
        Ok(futures::stream::iter(vec![Ok(Target::Pool), Ok(Target::Pool)]).boxed())
    }

    async fn query_row(
        &self,
        _ctx: &Context,
        sql: &str,
        _args: Vec<i64>,
    ) -> SingleRow<FakeBackend> {
        self.shared.record(Target::Pool, Op::QueryRow(sql.to_owned()));
        SingleRow::new(self.shared.check_sql(sql).map(|()| Some(Target::Pool)))
    }
}

#[async_trait]
impl Provider for FakePool {
    type Backend = FakeBackend;
    type Tx = FakeTx;

    async fn begin(&self, _ctx: &Context) -> Result<FakeTx> {
        let id = self.shared.next_tx.fetch_add(1, Ordering::SeqCst);
        self.shared.record(Target::Tx(id), Op::Begin);
        if self.shared.script.fail_begin {
            return Err(Error::Driver(Box::new(ConnectionReset)));
        }
        Ok(FakeTx {
            id,
            closed: Mutex::new(false),
            shared: Arc::clone(&self.shared),
        })
    }
}

pub struct FakeTx {
    id: usize,
    closed: Mutex<bool>,
    shared: Arc<Shared>,
}

impl FakeTx {
    pub fn id(&self) -> usize {
        self.id
    }

    fn ensure_open(&self) -> Result<()> {
        if *self.closed.lock().unwrap() {
            return Err(Error::TxClosed);
        }
        Ok(())
    }

    /// Moves the handle to a terminal state, failing if it already is in one.
    fn close(&self) -> Result<()> {
        let mut closed = self.closed.lock().unwrap();
        if *closed {
            return Err(Error::TxClosed);
        }
        *closed = true;
        Ok(())
    }
}

#[async_trait]
impl Querier<FakeBackend> for FakeTx {
    async fn execute(&self, _ctx: &Context, sql: &str, _args: Vec<i64>) -> Result<Target> {
        self.shared.record(Target::Tx(self.id), Op::Execute(sql.to_owned()));
        self.ensure_open()?;
        self.shared.check_sql(sql)?;
        Ok(Target::Tx(self.id))
    }

    async fn query(&self, _ctx: &Context, sql: &str, _args: Vec<i64>) -> Result<Rows<FakeBackend>> {
        self.shared.record(Target::Tx(self.id), Op::Query(sql.to_owned()));
        self.ensure_open()?;
        self.shared.check_sql(sql)?;
        let target = Target::Tx(self.id);
        Ok(futures::stream::iter(vec![Ok(target), Ok(target)]).boxed())
    }

    async fn query_row(
        &self,
        _ctx: &Context,
        sql: &str,
        _args: Vec<i64>,
    ) -> SingleRow<FakeBackend> {
        self.shared.record(Target::Tx(self.id), Op::QueryRow(sql.to_owned()));
        let result = self
            .ensure_open()
            .and_then(|()| self.shared.check_sql(sql))
            .map(|()| Some(Target::Tx(self.id)));
        SingleRow::new(result)
    }
}

#[async_trait]
impl TxHandle<FakeBackend> for FakeTx {
    async fn commit(&self, _ctx: &Context) -> Result<()> {
        self.shared.record(Target::Tx(self.id), Op::Commit);
        self.close()?;
        if self.shared.script.fail_commit {
            return Err(Error::Driver(Box::new(ConnectionReset)));
        }
        Ok(())
    }

    async fn rollback(&self, _ctx: &Context) -> Result<()> {
        self.shared.record(Target::Tx(self.id), Op::Rollback);
        self.close()?;
        if self.shared.script.fail_rollback {
            return Err(Error::Driver(Box::new(ConnectionReset)));
        }
        Ok(())
    }
}
