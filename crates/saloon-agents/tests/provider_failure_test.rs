//! Provider failures surface as failed sessions, not panics or hangs.

use std::sync::Arc;

use async_trait::async_trait;
use mockall::mock;
use saloon_agents::config::{roles_for, SaloonConfig};
use saloon_agents::generators::{build_coordinator, BookPipeline, GenerateError};
use saloon_agents::providers::{ChatProvider, ModelJudge, ProviderRouter};
use saloon_coordination::negotiation::{AgentError, ContentKind, ErrorKind, Role};

mock! {
    pub Provider {}

    #[async_trait]
    impl ChatProvider for Provider {
        fn name(&self) -> &str;
        fn model(&self) -> &str;
        async fn complete(&self, system: &str, user: &str) -> Result<String, AgentError>;
    }
}

fn described(mut provider: MockProvider) -> MockProvider {
    provider.expect_name().return_const("mock".to_string());
    provider.expect_model().return_const("mock-1".to_string());
    provider
}

fn pipeline(config: &SaloonConfig, router: ProviderRouter, judge: Option<ModelJudge>) -> BookPipeline {
    let judge = judge.map(|j| Arc::new(j) as _);
    let coordinator = build_coordinator(config, Arc::new(router), judge, None);
    BookPipeline::new(coordinator, roles_for(&config.agents), config)
}

#[tokio::test(start_paused = true)]
async fn test_permanent_error_fails_without_retry() {
    let mut provider = described(MockProvider::new());
    provider
        .expect_complete()
        .times(1)
        .returning(|_, _| Err(AgentError::Permanent("401 invalid api key".into())));
    let provider: Arc<dyn ChatProvider> = Arc::new(provider);
    let router = ProviderRouter::new()
        .with_member(Role::Creative, provider.clone())
        .with_member(Role::Reviewer, provider.clone())
        .with_member(Role::Editor, provider);

    let err = pipeline(&SaloonConfig::default(), router, None)
        .generate_title("tides")
        .await
        .unwrap_err();

    match err {
        GenerateError::Failed { kind, failure } => {
            assert_eq!(kind, ContentKind::Title);
            assert_eq!(failure.kind, ErrorKind::Permanent);
            assert_eq!(failure.role, Role::Creative);
            assert_eq!(failure.attempts, 1);
            assert!(failure.message.contains("invalid api key"));
        }
        other => panic!("expected a failed session, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_missing_role_provider_is_permanent() {
    let mut provider = described(MockProvider::new());
    provider
        .expect_complete()
        .returning(|_, _| Ok("<content>Book Title: Tidewater</content>".into()));
    // Nobody holds the reviewer role in the router.
    let router = ProviderRouter::new().with_member(Role::Creative, Arc::new(provider));

    let err = pipeline(&SaloonConfig::default(), router, None)
        .generate_title("tides")
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        GenerateError::Failed { ref failure, .. }
            if failure.role == Role::Reviewer && failure.kind == ErrorKind::Permanent
    ));
}

#[tokio::test(start_paused = true)]
async fn test_model_judge_decides_consensus() {
    let mut agents = described(MockProvider::new());
    let mut turn = 0;
    agents.expect_complete().returning(move |_, _| {
        turn += 1;
        Ok(format!("<content>Book Title: Tidewater Draft {}</content>", turn))
    });
    let agents: Arc<dyn ChatProvider> = Arc::new(agents);
    let router = ProviderRouter::new()
        .with_member(Role::Creative, agents.clone())
        .with_member(Role::Reviewer, agents.clone())
        .with_member(Role::Editor, agents);

    let mut judge = described(MockProvider::new());
    judge
        .expect_complete()
        .returning(|_, _| Ok("AGREE 0.95".into()));

    let title = pipeline(
        &SaloonConfig::default(),
        router,
        Some(ModelJudge::new(Arc::new(judge))),
    )
    .generate_title("tides")
    .await
    .unwrap();

    assert_eq!(title.value, "Tidewater Draft 2");
    assert_eq!(title.outcome.history.len(), 2);
    assert!(title.outcome.consensus.unwrap().confidence > 0.9);
}
