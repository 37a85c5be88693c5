//! Registry lifecycle tests
//!
//! Construction, reloads, load_all ordering and notice routing through a bus,
//! all over the public API.

#[path = "testutils/mod.rs"]
mod testutils;

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;
use tablecache::{
    ChangeKind, ChangeNotice, FetchError, FilterValue, KeyedCache, ResourceId, SiblingGroupCache,
    TableCacheConfig,
};
use testutils::cache_fixture::CacheFixture;
use testutils::rows::{AuditEntry, Session, Task, User};
use uuid::Uuid;

#[test]
fn test_concurrent_first_access_constructs_once() {
    let fixture = CacheFixture::new();
    fixture.tasks.set_latency(Duration::from_millis(30));
    let barrier = Barrier::new(8);

    let tables: Vec<Arc<SiblingGroupCache<Task>>> = thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                scope.spawn(|| {
                    barrier.wait();
                    let tasks = fixture.registry.siblings::<Task>().unwrap();
                    tasks.get_by_group(tablecache::GroupKey::pair(1, 10)).unwrap();
                    tasks
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert!(tables.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
    // One table, one group fetch
    assert_eq!(fixture.tasks.fetch_count(), 1);
}

#[test]
fn test_tables_keyed_differently_share_a_resource() {
    let fixture = CacheFixture::new();
    let by_uuid = fixture.registry.keyed::<Uuid, User>().unwrap();
    let by_name = fixture.registry.keyed::<String, User>().unwrap();

    let ada = fixture.user_named("ada");
    assert_eq!(by_uuid.get(&ada.uuid).unwrap()[0].name, "ada");
    assert_eq!(by_name.get(&"ada".to_string()).unwrap()[0].uuid, ada.uuid);
    assert_eq!(fixture.registry.table_names(), vec!["users"]);

    fixture
        .registry
        .reload_on_next_access(ResourceId::of::<User>());
    assert!(!by_uuid.is_known(&ada.uuid));
    assert!(!by_name.is_known(&"ada".to_string()));
    assert!(fixture.registry.is_resource_loaded(ResourceId::of::<User>()));
    assert!(!fixture.registry.is_resource_loaded(ResourceId::of::<Task>()));
}

#[test]
fn test_load_all_follows_priority_order() {
    let fixture = CacheFixture::with_config(TableCacheConfig {
        load_parallelism: 1,
        ..TableCacheConfig::for_tests()
    });
    fixture.registry.siblings::<Task>().unwrap();
    fixture.registry.lookup::<i64, AuditEntry>().unwrap();
    fixture.registry.keyed::<Uuid, Session>().unwrap();
    fixture.registry.keyed::<Uuid, User>().unwrap();
    fixture.clear_journal();

    fixture.registry.load_all(true).unwrap();

    assert_eq!(
        fixture.journal(),
        vec!["users", "sessions", "audit_log", "tasks"]
    );
    assert!(fixture
        .registry
        .keyed::<Uuid, User>()
        .unwrap()
        .is_all_loaded());
    assert!(fixture
        .registry
        .siblings::<Task>()
        .unwrap()
        .is_fully_materialized());
}

#[test]
fn test_load_all_attempts_every_table() {
    let fixture = CacheFixture::new();
    fixture.registry.keyed::<Uuid, User>().unwrap();
    fixture.registry.siblings::<Task>().unwrap();
    fixture
        .users
        .fail_with(Some(FetchError::Remote("users offline".into())));

    let err = fixture.registry.load_all(true).unwrap_err();
    assert!(err.to_string().contains("users"));
    // Tasks loaded even though users failed
    assert!(fixture
        .registry
        .siblings::<Task>()
        .unwrap()
        .is_fully_materialized());
    assert!(!fixture
        .registry
        .keyed::<Uuid, User>()
        .unwrap()
        .is_all_loaded());
}

#[test]
fn test_bus_reload_table_rebuilds_synchronously() {
    let fixture = CacheFixture::new();
    let before = fixture.registry.keyed::<Uuid, User>().unwrap();

    let delivered = fixture
        .bus
        .publish(&ChangeNotice::for_table::<User>(ChangeKind::ReloadTable));
    assert_eq!(delivered, 1);

    let after = fixture.registry.keyed::<Uuid, User>().unwrap();
    assert!(!Arc::ptr_eq(&before, &after));
    assert!(after.is_all_loaded());
}

#[test]
fn test_bus_partial_invalidation_reaches_sibling_cache() {
    let fixture = CacheFixture::new();
    let tasks = fixture.registry.siblings::<Task>().unwrap();
    tasks.get_by_id(1).unwrap();
    tasks.get_by_id(5).unwrap();
    assert_eq!(tasks.group_count(), 2);

    fixture.bus.publish(&ChangeNotice::for_table::<Task>(
        ChangeKind::InvalidateParts(vec![FilterValue::Int(2)]),
    ));

    // Row 2 shares a group with row 1; that whole group is gone
    assert_eq!(tasks.group_count(), 1);
    fixture.tasks.clear_fetch_log();
    assert!(tasks.contains(5).unwrap());
    assert_eq!(fixture.tasks.fetch_count(), 0);
    assert!(tasks.contains(1).unwrap());
    assert_eq!(fixture.tasks.fetch_count(), 1);
}

#[test]
fn test_bus_row_insert_reaches_keyed_cache() {
    let fixture = CacheFixture::new();
    let sessions = fixture.registry.keyed::<Uuid, Session>().unwrap();
    assert!(sessions.get_all().unwrap().is_empty());

    let ada = fixture.user_named("ada");
    fixture.sessions.insert(Session { id: 1, user: ada.uuid });
    fixture
        .bus
        .publish(&ChangeNotice::for_table::<Session>(ChangeKind::NoticeRowInsert));

    assert!(!sessions.is_all_loaded());
    assert_eq!(sessions.get_all().unwrap()[&ada.uuid].len(), 1);
}

#[test]
fn test_failed_notice_does_not_reach_publisher() {
    let fixture = CacheFixture::new();
    let tasks = fixture.registry.siblings::<Task>().unwrap();
    tasks.get_by_group(tablecache::GroupKey::pair(1, 10)).unwrap();
    fixture
        .tasks
        .fail_with(Some(FetchError::Transient("timeout".into())));

    // Delivered and logged; the cache keeps what it had
    assert_eq!(
        fixture
            .bus
            .publish(&ChangeNotice::global(ChangeKind::NoticeRowInsert)),
        1
    );
    assert_eq!(tasks.len(), 2);
}

#[test]
fn test_global_reload_on_next_access() {
    let fixture = CacheFixture::new();
    fixture.registry.lookup::<i64, AuditEntry>().unwrap();
    let users = fixture.registry.keyed::<Uuid, User>().unwrap();
    users.get_all().unwrap();

    fixture
        .bus
        .publish(&ChangeNotice::global(ChangeKind::ReloadTableOnNextAccess));

    assert!(!users.is_all_loaded());
    assert!(fixture.registry.is_loaded::<KeyedCache<Uuid, User>>());
    assert!(!fixture
        .registry
        .is_loaded::<tablecache::LookupTable<i64, AuditEntry>>());
}

#[test]
fn test_blocking_section_holds_back_access() {
    let fixture = CacheFixture::new();
    let section = fixture.registry.start_blocking();

    thread::scope(|scope| {
        let reader = scope.spawn(|| fixture.registry.keyed::<Uuid, User>().map(|_| ()));
        assert!(fixture.registry.is_blocking(Duration::from_millis(20)));
        thread::sleep(Duration::from_millis(30));
        assert!(!fixture.registry.is_loaded::<KeyedCache<Uuid, User>>());

        fixture.registry.end_blocking(section);
        reader.join().unwrap().unwrap();
    });
    assert!(!fixture.registry.is_blocking(Duration::ZERO));
}
