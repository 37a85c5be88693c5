//! Registry fixture
//!
//! Every fixture owns its own registry, sources and bus, so tests can run in
//! parallel without sharing cache state.

use super::rows::{AuditEntry, Session, Task, User};
use parking_lot::Mutex;
use std::sync::Arc;
use tablecache::{
    FetchResult, FilterExpr, MemoryRowSource, NotificationBus, RowSource,
    TableCacheConfig, TableRegistry,
};

/// Tables in the order their sources were first called
pub type FetchJournal = Arc<Mutex<Vec<&'static str>>>;

pub struct CacheFixture {
    pub registry: Arc<TableRegistry>,
    pub bus: NotificationBus,
    pub tasks: Arc<MemoryRowSource<Task>>,
    pub users: Arc<MemoryRowSource<User>>,
    pub sessions: Arc<MemoryRowSource<Session>>,
    pub audit: Arc<MemoryRowSource<AuditEntry>>,
    pub journal: FetchJournal,
}

impl CacheFixture {
    pub fn new() -> Self {
        Self::with_config(TableCacheConfig::for_tests())
    }

    pub fn with_config(config: TableCacheConfig) -> Self {
        super::init_logging();
        let registry =
            Arc::new(TableRegistry::new(config).expect("fixture config should be valid"));
        let bus = NotificationBus::new();
        registry.attach(&bus);

        let fixture = Self {
            registry,
            bus,
            tasks: Arc::new(MemoryRowSource::with_rows(sample_tasks())),
            users: Arc::new(MemoryRowSource::with_rows(sample_users())),
            sessions: Arc::new(MemoryRowSource::new()),
            audit: Arc::new(MemoryRowSource::with_rows(vec![
                AuditEntry { id: 1, actor: 1 },
                AuditEntry { id: 2, actor: 2 },
            ])),
            journal: Arc::new(Mutex::new(Vec::new())),
        };
        fixture.register(&fixture.tasks);
        fixture.register(&fixture.users);
        fixture.register(&fixture.sessions);
        fixture.register(&fixture.audit);
        fixture
    }

    /// Register `source` for its row type, recording each fetch in the journal
    fn register<R>(&self, source: &Arc<MemoryRowSource<R>>)
    where
        R: tablecache::Filterable,
    {
        let inner = Arc::clone(source);
        let journal = Arc::clone(&self.journal);
        let journaled: Arc<dyn RowSource<R>> =
            Arc::new(move |predicate: Option<&FilterExpr>| -> FetchResult<Vec<R>> {
                journal.lock().push(R::TABLE);
                inner.fetch(predicate)
            });
        self.registry.register_source(journaled);
    }

    pub fn journal(&self) -> Vec<&'static str> {
        self.journal.lock().clone()
    }

    pub fn clear_journal(&self) {
        self.journal.lock().clear();
    }

    pub fn user_named(&self, name: &str) -> User {
        sample_users()
            .into_iter()
            .find(|user| user.name == name)
            .expect("fixture user should exist")
    }
}

impl Default for CacheFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Three projects; project 1 has two owners
pub fn sample_tasks() -> Vec<Task> {
    vec![
        Task::new(1, 1, 10),
        Task::new(2, 1, 10),
        Task::new(3, 1, 11),
        Task::new(4, 2, 10),
        Task::new(5, 3, 12),
        Task::new(6, 3, 12),
    ]
}

pub fn sample_users() -> Vec<User> {
    vec![User::new(1, "ada"), User::new(2, "grace"), User::new(3, "linus")]
}
