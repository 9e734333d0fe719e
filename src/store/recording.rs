//! Scripted in-memory store for unit tests. Replies are consumed in statement order;
//! every begin, statement, commit and rollback is logged.

use super::{Store, StoreTx};
use crate::error::RepoError;
use crate::sql::{PgBindValue, QueryBuf};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

#[derive(Clone, Debug)]
pub(crate) enum Reply {
    Rows(Vec<Value>),
    Count(u64),
    Affected(u64),
    Fail(String),
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Event {
    Begin,
    Statement { sql: String, params: Vec<PgBindValue> },
    Commit,
    Rollback,
}

#[derive(Default)]
struct Script {
    replies: VecDeque<Reply>,
    log: Vec<Event>,
}

#[derive(Clone, Default)]
pub(crate) struct RecordingStore {
    script: Arc<Mutex<Script>>,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, reply: Reply) -> Self {
        self.script.lock().unwrap().replies.push_back(reply);
        self
    }

    pub fn rows(self, rows: Vec<Value>) -> Self {
        self.reply(Reply::Rows(rows))
    }

    pub fn events(&self) -> Vec<Event> {
        self.script.lock().unwrap().log.clone()
    }

    pub fn statements(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Statement { sql, .. } => Some(sql),
                _ => None,
            })
            .collect()
    }

    pub fn params(&self, index: usize) -> Vec<PgBindValue> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Statement { params, .. } => Some(params),
                _ => None,
            })
            .nth(index)
            .unwrap_or_default()
    }

    pub fn committed(&self) -> bool {
        self.events().contains(&Event::Commit)
    }

    pub fn rolled_back(&self) -> bool {
        self.events().contains(&Event::Rollback)
    }

    fn next(&self, q: &QueryBuf) -> Option<Reply> {
        let mut s = self.script.lock().unwrap();
        s.log.push(Event::Statement {
            sql: q.sql.clone(),
            params: q.params.clone(),
        });
        s.replies.pop_front()
    }

    fn push(&self, e: Event) {
        self.script.lock().unwrap().log.push(e);
    }
}

fn failure(msg: String) -> RepoError {
    RepoError::Storage(sqlx::Error::Protocol(msg))
}

#[async_trait]
impl Store for RecordingStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, RepoError> {
        self.push(Event::Begin);
        Ok(Box::new(RecordingTx { store: self.clone() }))
    }

    async fn ping(&self) -> Result<(), RepoError> {
        Ok(())
    }
}

struct RecordingTx {
    store: RecordingStore,
}

#[async_trait]
impl StoreTx for RecordingTx {
    async fn fetch_rows(&mut self, q: &QueryBuf) -> Result<Vec<Map<String, Value>>, RepoError> {
        match self.store.next(q) {
            None => Ok(Vec::new()),
            Some(Reply::Rows(rows)) => Ok(rows
                .into_iter()
                .map(|r| r.as_object().cloned().unwrap_or_default())
                .collect()),
            Some(Reply::Fail(msg)) => Err(failure(msg)),
            Some(other) => panic!("scripted {:?} for row query {}", other, q.sql),
        }
    }

    async fn fetch_count(&mut self, q: &QueryBuf) -> Result<u64, RepoError> {
        match self.store.next(q) {
            None => Ok(0),
            Some(Reply::Count(n)) => Ok(n),
            Some(Reply::Fail(msg)) => Err(failure(msg)),
            Some(other) => panic!("scripted {:?} for count query {}", other, q.sql),
        }
    }

    async fn execute(&mut self, q: &QueryBuf) -> Result<u64, RepoError> {
        match self.store.next(q) {
            None => Ok(0),
            Some(Reply::Affected(n)) => Ok(n),
            Some(Reply::Fail(msg)) => Err(failure(msg)),
            Some(other) => panic!("scripted {:?} for statement {}", other, q.sql),
        }
    }

    async fn commit(self: Box<Self>) -> Result<(), RepoError> {
        self.store.push(Event::Commit);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), RepoError> {
        self.store.push(Event::Rollback);
        Ok(())
    }
}
