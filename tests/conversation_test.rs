mod support;

use std::sync::Arc;
use std::time::Duration;

use siumai_gateway::GatewayError;
use siumai_gateway::conversation::{
    ConversationCache, ConversationStore, HybridConversationService, MemoryConversationCache,
    MemoryConversationStore, SessionSource, SqliteConversationStore,
};
use siumai_gateway::types::{ChatMessage, Role};
use support::{FlakyCache, FlakyStore, contents, memory_cache};

async fn sqlite_service(dir: &tempfile::TempDir) -> HybridConversationService {
    let url = format!("sqlite://{}", dir.path().join("conversations.db").display());
    let store = SqliteConversationStore::connect(&url, 4).await.unwrap();
    HybridConversationService::new(Arc::new(store), Arc::new(memory_cache(Duration::from_secs(60))))
}

#[tokio::test]
async fn appended_messages_read_back_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let service = sqlite_service(&dir).await;

    let words = ["one", "two", "three", "four", "five"];
    for (i, word) in words.iter().enumerate() {
        let message = if i % 2 == 0 {
            ChatMessage::user(*word)
        } else {
            ChatMessage::assistant(*word)
        };
        let stored = service.append("s", "alice", &message).await.unwrap();
        assert_eq!(stored.sequence_no, i as u64 + 1);
    }

    let first = service.read("s", words.len()).await.unwrap();
    assert_eq!(contents(&first), words);
    assert_eq!(first[1].role, Role::Assistant);
    assert_eq!(service.read("s", words.len()).await.unwrap(), first);
    assert_eq!(contents(&service.read("s", 2).await.unwrap()), ["four", "five"]);
}

#[tokio::test]
async fn evicted_session_reads_identically_from_durable() {
    let dir = tempfile::tempdir().unwrap();
    let service = sqlite_service(&dir).await;
    for word in ["a", "b", "c"] {
        service.append("s", "alice", &ChatMessage::user(word)).await.unwrap();
    }
    let before = service.read("s", 10).await.unwrap();

    service.cache().evict("s").await.unwrap();
    assert!(service.cache().recent("s", 10).await.unwrap().is_none());
    let after = service.read("s", 10).await.unwrap();
    assert_eq!(after, before);
    // Read-through warmed the cache with the same suffix.
    assert_eq!(service.cache().recent("s", 10).await.unwrap(), Some(before));
}

#[tokio::test]
async fn durable_log_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let service = sqlite_service(&dir).await;
        service.append("s", "alice", &ChatMessage::user("kept")).await.unwrap();
    }
    let service = sqlite_service(&dir).await;
    assert_eq!(contents(&service.read("s", 10).await.unwrap()), ["kept"]);
    let next = service.append("s", "alice", &ChatMessage::user("more")).await.unwrap();
    assert_eq!(next.sequence_no, 2);
}

#[tokio::test]
async fn concurrent_appends_get_distinct_sequence_numbers() {
    let dir = tempfile::tempdir().unwrap();
    let service = Arc::new(sqlite_service(&dir).await);

    let mut tasks = Vec::new();
    for i in 0..20 {
        let service = service.clone();
        tasks.push(tokio::spawn(async move {
            service
                .append("s", "alice", &ChatMessage::user(format!("m{i}")))
                .await
                .unwrap()
                .sequence_no
        }));
    }
    let mut seqs = Vec::new();
    for task in tasks {
        seqs.push(task.await.unwrap());
    }
    seqs.sort_unstable();
    assert_eq!(seqs, (1..=20).collect::<Vec<u64>>());

    let messages = service.read("s", 20).await.unwrap();
    assert!(messages.windows(2).all(|w| w[0].sequence_no + 1 == w[1].sequence_no));
    let durable = service.store().recent("s", 20).await.unwrap();
    assert_eq!(messages, durable);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn independent_services_on_one_database_share_the_sequence() {
    let dir = tempfile::tempdir().unwrap();
    // Separate pools and caches: only the database orders these appends.
    let first = Arc::new(sqlite_service(&dir).await);
    let second = Arc::new(sqlite_service(&dir).await);

    let mut tasks = Vec::new();
    for i in 0..30 {
        let service = if i % 2 == 0 { first.clone() } else { second.clone() };
        tasks.push(tokio::spawn(async move {
            service
                .append("shared", "alice", &ChatMessage::user(format!("m{i}")))
                .await
                .unwrap()
                .sequence_no
        }));
    }
    let mut seqs = Vec::new();
    for task in tasks {
        seqs.push(task.await.unwrap());
    }
    seqs.sort_unstable();
    assert_eq!(seqs, (1..=30).collect::<Vec<u64>>());

    for service in [&first, &second] {
        let durable = service.store().recent("shared", 30).await.unwrap();
        let numbers: Vec<u64> = durable.iter().map(|m| m.sequence_no).collect();
        assert_eq!(numbers, (1..=30).collect::<Vec<u64>>());
    }
}

#[tokio::test(start_paused = true)]
async fn idle_session_leaves_cache_listing_but_not_durable_listing() {
    let service = HybridConversationService::new(
        Arc::new(MemoryConversationStore::new()),
        Arc::new(MemoryConversationCache::new(Duration::from_secs(300), 10, 100)),
    );
    service.append("old", "alice", &ChatMessage::user("hi")).await.unwrap();
    tokio::time::advance(Duration::from_secs(200)).await;
    service.append("fresh", "alice", &ChatMessage::user("hey")).await.unwrap();
    tokio::time::advance(Duration::from_secs(150)).await;

    let cached = service.list_cached_sessions("alice").await.unwrap();
    assert_eq!(
        cached.iter().map(|s| s.session_id.as_str()).collect::<Vec<_>>(),
        ["fresh"]
    );

    let groups = service.list_sessions("alice").await.unwrap();
    let listed: Vec<_> = groups.iter().flat_map(|g| g.sessions.iter()).collect();
    assert_eq!(listed.len(), 2);
    let old = listed.iter().find(|s| s.session_id == "old").unwrap();
    assert_eq!(old.source, SessionSource::Durable);
    let fresh = listed.iter().find(|s| s.session_id == "fresh").unwrap();
    assert_eq!(fresh.source, SessionSource::Both);

    assert_eq!(contents(&service.read("old", 10).await.unwrap()), ["hi"]);
}

#[tokio::test]
async fn durable_outage_fails_appends_but_keeps_cached_reads() {
    let store = Arc::new(FlakyStore::new());
    let service = HybridConversationService::new(
        store.clone(),
        Arc::new(memory_cache(Duration::from_secs(60))),
    );
    service.append("s", "alice", &ChatMessage::user("hello")).await.unwrap();

    store.set_down(true);
    let err = service
        .append("s", "alice", &ChatMessage::user("world"))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::StoreUnavailable(_)));
    assert_eq!(contents(&service.read("s", 10).await.unwrap()), ["hello"]);
    assert!(matches!(
        service.list_sessions("alice").await,
        Err(GatewayError::StoreUnavailable(_))
    ));

    store.set_down(false);
    let next = service.append("s", "alice", &ChatMessage::user("world")).await.unwrap();
    assert_eq!(next.sequence_no, 2);
    assert_eq!(contents(&service.read("s", 10).await.unwrap()), ["hello", "world"]);
}

#[tokio::test]
#[tracing_test::traced_test]
async fn cache_outage_degrades_to_durable() {
    let cache = Arc::new(FlakyCache::new(memory_cache(Duration::from_secs(60))));
    let service = HybridConversationService::new(Arc::new(MemoryConversationStore::new()), cache.clone());

    cache.set_down(true);
    service.append("s", "alice", &ChatMessage::user("a")).await.unwrap();
    service.append("s", "alice", &ChatMessage::user("b")).await.unwrap();
    assert_eq!(contents(&service.read("s", 10).await.unwrap()), ["a", "b"]);
    let groups = service.list_sessions("alice").await.unwrap();
    assert_eq!(groups[0].sessions[0].source, SessionSource::Durable);
    assert!(logs_contain("conversation cache degraded"));
    assert!(service.list_cached_sessions("alice").await.is_err());

    cache.set_down(false);
    assert_eq!(contents(&service.read("s", 10).await.unwrap()), ["a", "b"]);
    let cached = cache.recent("s", 10).await.unwrap().unwrap();
    assert_eq!(contents(&cached), ["a", "b"]);
}

#[tokio::test]
async fn stale_cache_entry_is_bypassed_after_failed_eviction() {
    let cache = Arc::new(FlakyCache::new(memory_cache(Duration::from_secs(60))));
    let service = HybridConversationService::new(Arc::new(MemoryConversationStore::new()), cache.clone());
    service.append("s", "alice", &ChatMessage::user("a")).await.unwrap();
    service.append("s", "alice", &ChatMessage::user("b")).await.unwrap();

    // The cache misses "c" and cannot be evicted while down.
    cache.set_down(true);
    service.append("s", "alice", &ChatMessage::user("c")).await.unwrap();
    cache.set_down(false);

    assert_eq!(contents(&service.read("s", 10).await.unwrap()), ["a", "b", "c"]);
    service.append("s", "alice", &ChatMessage::user("d")).await.unwrap();
    let cached = cache.recent("s", 10).await.unwrap().unwrap();
    assert_eq!(contents(&cached), ["a", "b", "c", "d"]);
}

#[tokio::test]
async fn deleted_session_is_soft_deleted() {
    let dir = tempfile::tempdir().unwrap();
    let service = sqlite_service(&dir).await;
    service.append("s1", "alice", &ChatMessage::user("x")).await.unwrap();
    service.append("s2", "alice", &ChatMessage::user("y")).await.unwrap();

    assert!(service.delete("s1").await.unwrap());
    assert!(service.cache().recent("s1", 10).await.unwrap().is_none());
    let session = service.session("s1").await.unwrap().unwrap();
    assert!(!session.active);
    assert_eq!(contents(&service.store().recent("s1", 10).await.unwrap()), ["x"]);

    let ids: Vec<_> = service
        .list_sessions("alice")
        .await
        .unwrap()
        .into_iter()
        .flat_map(|g| g.sessions)
        .map(|s| s.session_id)
        .collect();
    assert_eq!(ids, ["s2"]);
    assert!(matches!(
        service.append("s1", "alice", &ChatMessage::user("again")).await,
        Err(GatewayError::SessionInactive(_))
    ));
}

#[tokio::test]
async fn unknown_session_reads_empty() {
    let service = HybridConversationService::new(
        Arc::new(MemoryConversationStore::new()),
        Arc::new(memory_cache(Duration::from_secs(60))),
    );
    assert!(service.read("nobody", 10).await.unwrap().is_empty());
    assert!(service.list_sessions("nobody").await.unwrap().is_empty());
}
