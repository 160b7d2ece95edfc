mod support;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use secrecy::SecretString;
use serde_json::json;
use siumai_gateway::auth::{FetchedToken, TokenCache, TokenFetcher};
use siumai_gateway::prelude::*;
use siumai_gateway::provider::ModelMatcher;
use siumai_gateway::retry::RetryPolicy;
use siumai_gateway::tools::ToolRegistry;
use siumai_gateway::types::ToolDefinition;
use support::ScriptedProvider;

fn rate_limited() -> GatewayError {
    GatewayError::RateLimited {
        message: "slow down".into(),
        retry_after: None,
    }
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy::new()
        .with_max_attempts(3)
        .with_initial_delay(Duration::from_millis(100))
        .with_jitter(false)
}

async fn drain(handle: ChatStreamHandle) -> (String, Option<GatewayError>) {
    let mut text = String::new();
    let mut error = None;
    let mut stream = handle;
    while let Some(item) = stream.next().await {
        match item {
            Ok(delta) => text.push_str(&delta),
            Err(err) => error = Some(err),
        }
    }
    (text, error)
}

#[tokio::test]
async fn qualified_model_prefers_namespaced_provider() {
    let cloud = Arc::new(
        ScriptedProvider::new("cloud", ModelMatcher::new().with_models(["alpha:7b", "gpt-4o"]))
            .with_deltas(["cloud"]),
    );
    let local = Arc::new(
        ScriptedProvider::new("local", ModelMatcher::new().namespaced(true)).with_deltas(["local"]),
    );
    let mut router = ProviderRouter::new();
    router.register(cloud.clone()).unwrap();
    router.register(local.clone()).unwrap();

    let history = vec![ChatMessage::user("hi")];
    let (text, error) = drain(
        router
            .chat(&history, "alpha:7b", &ChatOptions::new())
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(text, "local");
    assert!(error.is_none());
    assert_eq!((cloud.calls(), local.calls()), (0, 1));

    let (text, _) = drain(router.chat(&history, "gpt-4o", &ChatOptions::new()).await.unwrap()).await;
    assert_eq!(text, "cloud");
    let (text, _) = drain(
        router
            .chat(&history, "@cloud/alpha:7b", &ChatOptions::new())
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(text, "cloud");
    assert_eq!(cloud.requests().last().unwrap().model, "alpha:7b");
}

#[tokio::test]
async fn unknown_model_is_not_found() {
    let mut router = ProviderRouter::new();
    router
        .register(Arc::new(ScriptedProvider::new(
            "cloud",
            ModelMatcher::new().with_models(["gpt-*"]),
        )))
        .unwrap();
    assert!(router.resolve("gpt-4o-mini").is_ok());
    let err = router
        .chat(&[ChatMessage::user("hi")], "mystery", &ChatOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::ModelNotFound(_)));
}

#[tokio::test(start_paused = true)]
async fn rate_limited_handshake_is_retried() {
    let provider = Arc::new(
        ScriptedProvider::new("cloud", ModelMatcher::new().fallback(true))
            .with_deltas(["fine"])
            .with_handshake_errors([rate_limited(), rate_limited()]),
    );
    let mut router = ProviderRouter::new().with_retry_policy(fast_retry());
    router.register(provider.clone()).unwrap();

    let (text, error) = drain(
        router
            .chat(&[ChatMessage::user("hi")], "m", &ChatOptions::new())
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(text, "fine");
    assert!(error.is_none());
    assert_eq!(provider.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn rate_limit_surfaces_after_bounded_attempts() {
    let provider = Arc::new(
        ScriptedProvider::new("cloud", ModelMatcher::new().fallback(true))
            .with_handshake_errors(std::iter::repeat_with(rate_limited).take(5)),
    );
    let mut router = ProviderRouter::new().with_retry_policy(fast_retry());
    router.register(provider.clone()).unwrap();

    let err = router
        .chat(&[ChatMessage::user("hi")], "m", &ChatOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::RateLimited { .. }));
    assert_eq!(provider.calls(), 3);
}

#[tokio::test]
async fn other_handshake_errors_are_not_retried() {
    let provider = Arc::new(
        ScriptedProvider::new("cloud", ModelMatcher::new().fallback(true)).with_handshake_errors([
            GatewayError::TransportError("connect refused".into()),
        ]),
    );
    let mut router = ProviderRouter::new().with_retry_policy(fast_retry());
    router.register(provider.clone()).unwrap();

    let err = router
        .chat(&[ChatMessage::user("hi")], "m", &ChatOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::TransportError(_)));
    assert_eq!(provider.calls(), 1);
}

#[tokio::test]
async fn mid_stream_failure_keeps_delivered_deltas() {
    let provider = Arc::new(
        ScriptedProvider::new("cloud", ModelMatcher::new().fallback(true))
            .with_deltas(["a", "b", "c", "d"])
            .failing_after(2),
    );
    let mut router = ProviderRouter::new();
    router.register(provider.clone()).unwrap();

    let mut handle = router
        .chat(&[ChatMessage::user("hi")], "m", &ChatOptions::new())
        .await
        .unwrap();
    assert_eq!(handle.next().await.unwrap().unwrap(), "a");
    assert_eq!(handle.next().await.unwrap().unwrap(), "b");
    assert!(matches!(
        handle.next().await,
        Some(Err(GatewayError::TransportError(_)))
    ));
    assert!(handle.next().await.is_none());
    assert_eq!(provider.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn cancel_closes_transport_and_stops_deltas() {
    let provider = Arc::new(
        ScriptedProvider::new("cloud", ModelMatcher::new().fallback(true))
            .with_deltas((0..10).map(|i| i.to_string()))
            .with_delay(Duration::from_millis(10)),
    );
    let mut router = ProviderRouter::new();
    router.register(provider.clone()).unwrap();

    let mut handle = router
        .chat(&[ChatMessage::user("hi")], "m", &ChatOptions::new())
        .await
        .unwrap();
    assert_eq!(handle.next().await.unwrap().unwrap(), "0");
    assert_eq!(handle.next().await.unwrap().unwrap(), "1");

    handle.cancel_handle().cancel();
    assert!(handle.next().await.is_none());
    assert!(provider.transport_closed());

    tokio::time::advance(Duration::from_secs(1)).await;
    assert_eq!(provider.yielded(), 2);
    assert!(handle.next().await.is_none());
}

#[tokio::test]
async fn tools_are_resolved_before_dispatch() {
    let provider = Arc::new(ScriptedProvider::new("cloud", ModelMatcher::new().fallback(true)));
    let mut tools = ToolRegistry::new();
    tools.register_builtin(ToolDefinition::function("clock", "Current time", json!({})));
    tools.register_external(
        "cloud",
        "search",
        ToolDefinition::function("web_search", "Search the web", json!({})),
    );
    let mut router = ProviderRouter::new().with_tools(tools);
    router.register(provider.clone()).unwrap();
    let history = [ChatMessage::user("hi")];

    let options = ChatOptions::new()
        .with_tool(ToolRef::builtin("clock"))
        .with_tool(ToolRef::external("cloud", "search"));
    drain(router.chat(&history, "m", &options).await.unwrap()).await;
    let names: Vec<_> = provider.requests()[0]
        .tools
        .iter()
        .map(|t| t.name.clone())
        .collect();
    assert_eq!(names, vec!["clock", "web_search"]);

    for tool in [ToolRef::builtin("missing"), ToolRef::external("other", "search")] {
        let err = router
            .chat(&history, "m", &ChatOptions::new().with_tool(tool))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidInput(_)));
    }
    assert_eq!(provider.calls(), 1);
}

struct CountingFetcher {
    calls: AtomicUsize,
}

#[async_trait]
impl TokenFetcher for CountingFetcher {
    async fn fetch(&self) -> Result<FetchedToken, GatewayError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(FetchedToken {
            access_token: SecretString::from(format!("token-{n}")),
            expires_in: Some(Duration::from_secs(3600)),
        })
    }
}

#[tokio::test]
async fn bearer_comes_from_token_cache_and_is_dropped_on_rejection() {
    let fetcher = Arc::new(CountingFetcher {
        calls: AtomicUsize::new(0),
    });
    let mut tokens = TokenCache::new(Duration::from_secs(60));
    tokens.register("gateway", fetcher.clone());

    let provider = Arc::new(
        ScriptedProvider::new("gateway", ModelMatcher::new().namespaced(true))
            .requiring_token()
            .with_handshake_errors([
                GatewayError::AuthFailed("401".into()),
            ]),
    );
    let mut router = ProviderRouter::new().with_token_cache(tokens);
    router.register(provider.clone()).unwrap();
    let history = [ChatMessage::user("hi")];

    let err = router
        .chat(&history, "org/model", &ChatOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::AuthFailed(_)));
    assert_eq!(provider.last_bearer().as_deref(), Some("token-1"));

    drain(router.chat(&history, "org/model", &ChatOptions::new()).await.unwrap()).await;
    assert_eq!(provider.last_bearer().as_deref(), Some("token-2"));
    drain(router.chat(&history, "org/model", &ChatOptions::new()).await.unwrap()).await;
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn token_provider_without_token_source_is_rejected() {
    let mut router = ProviderRouter::new();
    let err = router
        .register(Arc::new(
            ScriptedProvider::new("gateway", ModelMatcher::new()).requiring_token(),
        ))
        .unwrap_err();
    assert!(matches!(err, GatewayError::ConfigurationError(_)));
}
