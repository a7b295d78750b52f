//! Generation Dispatch Service
//!
//! The single entry point request handlers call. Every request passes the
//! tenant daily quota, then the per-app concurrency governor, then gets
//! dispatched to its mode's strategy; the returned response owns the
//! admission ticket for the rest of its life.
//!
//! Admission failures short-circuit before any strategy runs, so there is
//! never a ticket to clean up on that path. Failures after admission always
//! go through the release path first. Nothing here retries; retry policy
//! belongs to the caller.

use crate::billing::BillingProvider;
use crate::config::AdmissionConfig;
use crate::dispatch::mode::{GenerationMode, InvocationSource};
use crate::dispatch::output::GenerationOutput;
use crate::dispatch::registry::StrategyRegistry;
use crate::dispatch::request::{App, GenerationContext, NodeScope, NodeTarget, RequestUser};
use crate::error::DispatchError;
use crate::metrics;
use crate::rate_limit::governor::{effective_max_active, AdmissionGuard, ConcurrencyGovernor};
use crate::rate_limit::stream::{DispatchResponse, GuardedEventStream};
use crate::rate_limit::system::SystemRateLimiter;
use crate::store::CounterStore;
use crate::workflow::{Workflow, WorkflowProvider};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Admission-controlled dispatch of generation requests
pub struct GenerateService {
    /// Admission configuration
    config: AdmissionConfig,

    /// Tenant daily quota limiter
    rate_limiter: SystemRateLimiter,

    /// Per-app concurrency governor
    governor: ConcurrencyGovernor,

    /// Mode-to-strategy table
    registry: StrategyRegistry,

    /// Plan lookup
    billing: Arc<dyn BillingProvider>,

    /// Workflow definition source
    workflows: Arc<dyn WorkflowProvider>,
}

impl GenerateService {
    /// Wire up the service against a shared counter store
    pub fn new(
        config: AdmissionConfig,
        store: Arc<dyn CounterStore>,
        registry: StrategyRegistry,
        billing: Arc<dyn BillingProvider>,
        workflows: Arc<dyn WorkflowProvider>,
    ) -> Self {
        let rate_limiter = SystemRateLimiter::new(
            store.clone(),
            config.daily_request_limit,
            Duration::from_secs(config.rate_window_secs),
        );
        let governor = ConcurrencyGovernor::new(
            store,
            Duration::from_secs(config.ticket_max_alive_secs),
            Duration::from_secs(config.sweep_interval_secs),
        );
        Self {
            config,
            rate_limiter,
            governor,
            registry,
            billing,
            workflows,
        }
    }

    /// The governor backing this service
    pub fn governor(&self) -> &ConcurrencyGovernor {
        &self.governor
    }

    /// The tenant rate limiter backing this service
    pub fn rate_limiter(&self) -> &SystemRateLimiter {
        &self.rate_limiter
    }

    /// Run one generation request through admission and dispatch
    ///
    /// The app's declared mode selects the strategy. For streamed output the
    /// returned stream owns the admission ticket; consuming it to the end,
    /// hitting an error, or dropping it all return the slot exactly once.
    pub async fn generate(
        &self,
        app: &App,
        user: &RequestUser,
        args: serde_json::Value,
        invocation_source: InvocationSource,
        streaming: bool,
    ) -> Result<DispatchResponse, DispatchError> {
        self.check_daily_quota(app).await?;

        let max_active =
            effective_max_active(app.max_active_requests, self.config.app_max_active_requests);
        let guard = self.governor.enter(&app.id, max_active).await?;
        info!(
            app_id = %app.id,
            user_id = user.id(),
            mode = %app.mode,
            streaming,
            ticket = guard.token(),
            "request admitted"
        );

        let workflow = if app.mode.requires_workflow() {
            match self.resolve_workflow(app, invocation_source).await {
                Ok(workflow) => Some(workflow),
                Err(err) => {
                    guard.release().await;
                    return Err(err);
                }
            }
        } else {
            None
        };

        let mut ctx =
            GenerationContext::new(app.clone(), user.clone(), args, invocation_source, streaming);
        ctx.workflow = workflow;
        self.dispatch_guarded(app.mode, ctx, guard, streaming).await
    }

    /// Re-run a single node iteration of a workflow app, from the debugger
    pub async fn generate_single_iteration(
        &self,
        app: &App,
        user: &RequestUser,
        node_id: &str,
        args: serde_json::Value,
        streaming: bool,
    ) -> Result<DispatchResponse, DispatchError> {
        self.generate_single_step(app, user, node_id, args, streaming, NodeScope::Iteration)
            .await
    }

    /// Re-run a single loop of a workflow app, from the debugger
    pub async fn generate_single_loop(
        &self,
        app: &App,
        user: &RequestUser,
        node_id: &str,
        args: serde_json::Value,
        streaming: bool,
    ) -> Result<DispatchResponse, DispatchError> {
        self.generate_single_step(app, user, node_id, args, streaming, NodeScope::Loop)
            .await
    }

    /// Regenerate a variant of an earlier completion message
    ///
    /// Rides on an untracked ticket: regeneration does not count against the
    /// app ceiling, but keeps the uniform release path.
    pub async fn generate_more_like_this(
        &self,
        app: &App,
        user: &RequestUser,
        message_id: &str,
        invocation_source: InvocationSource,
        streaming: bool,
    ) -> Result<DispatchResponse, DispatchError> {
        let guard = self.governor.enter(&app.id, 0).await?;
        let ctx = GenerationContext::new(
            app.clone(),
            user.clone(),
            json!({ "message_id": message_id }),
            invocation_source,
            streaming,
        );
        self.dispatch_guarded(GenerationMode::Completion, ctx, guard, streaming)
            .await
    }

    /// Debugger single-step entry points share admission with `generate`
    async fn generate_single_step(
        &self,
        app: &App,
        user: &RequestUser,
        node_id: &str,
        args: serde_json::Value,
        streaming: bool,
        scope: NodeScope,
    ) -> Result<DispatchResponse, DispatchError> {
        if !app.mode.requires_workflow() {
            return Err(DispatchError::UnsupportedMode(app.mode.to_string()));
        }

        self.check_daily_quota(app).await?;
        let max_active =
            effective_max_active(app.max_active_requests, self.config.app_max_active_requests);
        let guard = self.governor.enter(&app.id, max_active).await?;

        let workflow = match self.resolve_workflow(app, InvocationSource::Debugger).await {
            Ok(workflow) => workflow,
            Err(err) => {
                guard.release().await;
                return Err(err);
            }
        };

        let mut ctx = GenerationContext::new(
            app.clone(),
            user.clone(),
            args,
            InvocationSource::Debugger,
            streaming,
        );
        ctx.workflow = Some(workflow);
        ctx.node_target = Some(NodeTarget {
            node_id: node_id.to_string(),
            scope,
        });
        self.dispatch_guarded(app.mode, ctx, guard, streaming).await
    }

    /// Invoke the strategy and tie the response to the ticket
    async fn dispatch_guarded(
        &self,
        mode: GenerationMode,
        ctx: GenerationContext,
        guard: AdmissionGuard,
        streaming: bool,
    ) -> Result<DispatchResponse, DispatchError> {
        match self.registry.dispatch(mode, ctx).await {
            Ok(GenerationOutput::Complete(value)) => {
                guard.release().await;
                Ok(DispatchResponse::Complete(value))
            }
            Ok(GenerationOutput::Stream(events)) => {
                let stream = GuardedEventStream::new(events, guard);
                if !streaming {
                    // Strategies may stream internally even when the caller
                    // asked for a synchronous response; the slot is freed now
                    stream.release_ticket().await;
                }
                Ok(DispatchResponse::Stream(stream))
            }
            Err(err) => {
                guard.release().await;
                if matches!(err, DispatchError::UpstreamRateLimited(_)) {
                    metrics::UPSTREAM_THROTTLES_TOTAL.inc();
                }
                warn!(mode = %mode, %err, "dispatch failed after admission");
                Err(err)
            }
        }
    }

    /// Apply the tenant daily quota when the plan calls for it
    async fn check_daily_quota(&self, app: &App) -> Result<(), DispatchError> {
        if !self.config.billing_enabled {
            return Ok(());
        }
        let plan = self
            .billing
            .get_plan(&app.tenant_id)
            .await
            .map_err(DispatchError::Strategy)?;
        if !plan.is_constrained() {
            return Ok(());
        }
        if self.rate_limiter.is_rate_limited(&app.tenant_id).await {
            warn!(tenant_id = %app.tenant_id, "daily quota exhausted");
            self.rate_limiter.record_rejection();
            return Err(DispatchError::RateLimitExceeded {
                tenant_id: app.tenant_id.clone(),
                limit: self.rate_limiter.limit(),
            });
        }
        // Soft quota: check and increment stay separate calls
        self.rate_limiter.increment(&app.tenant_id).await;
        Ok(())
    }

    /// Draft for the debugger, published for everyone else
    async fn resolve_workflow(
        &self,
        app: &App,
        source: InvocationSource,
    ) -> Result<Workflow, DispatchError> {
        if source.is_debugger() {
            self.workflows
                .get_draft(&app.id)
                .await
                .map_err(DispatchError::Strategy)?
                .ok_or_else(|| DispatchError::WorkflowNotFound {
                    app_id: app.id.clone(),
                })
        } else {
            self.workflows
                .get_published(&app.id)
                .await
                .map_err(DispatchError::Strategy)?
                .ok_or_else(|| DispatchError::WorkflowNotPublished {
                    app_id: app.id.clone(),
                })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::{PlanTier, StaticBillingProvider};
    use crate::dispatch::output::GenerationEvent;
    use crate::dispatch::registry::GenerationStrategy;
    use crate::error::ProviderError;
    use crate::store::MemoryCounterStore;
    use crate::workflow::MemoryWorkflowProvider;
    use async_trait::async_trait;
    use futures::StreamExt;

    struct CompleteStrategy;

    #[async_trait]
    impl GenerationStrategy for CompleteStrategy {
        fn name(&self) -> &str {
            "complete"
        }

        async fn generate(
            &self,
            ctx: GenerationContext,
        ) -> Result<GenerationOutput, ProviderError> {
            Ok(GenerationOutput::Complete(json!({
                "answer": "done",
                "args": ctx.args,
            })))
        }
    }

    struct StreamStrategy {
        events: usize,
    }

    #[async_trait]
    impl GenerationStrategy for StreamStrategy {
        fn name(&self) -> &str {
            "stream"
        }

        async fn generate(
            &self,
            _ctx: GenerationContext,
        ) -> Result<GenerationOutput, ProviderError> {
            Ok(GenerationOutput::from_events(
                (0..self.events)
                    .map(|i| GenerationEvent::new("message", json!({ "index": i })))
                    .collect(),
            ))
        }
    }

    struct ThrottleMidStreamStrategy;

    #[async_trait]
    impl GenerationStrategy for ThrottleMidStreamStrategy {
        fn name(&self) -> &str {
            "throttle-mid-stream"
        }

        async fn generate(
            &self,
            _ctx: GenerationContext,
        ) -> Result<GenerationOutput, ProviderError> {
            Ok(GenerationOutput::Stream(Box::pin(futures::stream::iter(
                vec![
                    Ok(GenerationEvent::new("message", json!({"delta": "par"}))),
                    Err(ProviderError::Throttled("429 from provider".to_string())),
                ],
            ))))
        }
    }

    struct FailingStrategy;

    #[async_trait]
    impl GenerationStrategy for FailingStrategy {
        fn name(&self) -> &str {
            "failing"
        }

        async fn generate(
            &self,
            _ctx: GenerationContext,
        ) -> Result<GenerationOutput, ProviderError> {
            Err(ProviderError::Other(anyhow::anyhow!("model crashed")))
        }
    }

    struct WorkflowEchoStrategy;

    #[async_trait]
    impl GenerationStrategy for WorkflowEchoStrategy {
        fn name(&self) -> &str {
            "workflow-echo"
        }

        async fn generate(
            &self,
            ctx: GenerationContext,
        ) -> Result<GenerationOutput, ProviderError> {
            let workflow = ctx.workflow.expect("workflow must be resolved");
            Ok(GenerationOutput::Complete(json!({
                "workflow_version": workflow.version,
                "node": ctx.node_target.map(|t| t.node_id),
            })))
        }
    }

    struct Fixture {
        service: GenerateService,
        billing: StaticBillingProvider,
        workflows: MemoryWorkflowProvider,
    }

    fn fixture(config: AdmissionConfig) -> Fixture {
        let billing = StaticBillingProvider::new(PlanTier::Sandbox);
        let workflows = MemoryWorkflowProvider::new();
        let registry = StrategyRegistry::new()
            .register(GenerationMode::Completion, Arc::new(CompleteStrategy))
            .register(GenerationMode::Chat, Arc::new(StreamStrategy { events: 3 }))
            .register(GenerationMode::AgentChat, Arc::new(FailingStrategy))
            .register(GenerationMode::AdvancedChat, Arc::new(WorkflowEchoStrategy))
            .register(GenerationMode::Workflow, Arc::new(WorkflowEchoStrategy));
        let service = GenerateService::new(
            config,
            Arc::new(MemoryCounterStore::new()),
            registry,
            Arc::new(billing.clone()),
            Arc::new(workflows.clone()),
        );
        Fixture {
            service,
            billing,
            workflows,
        }
    }

    fn user() -> RequestUser {
        RequestUser::EndUser {
            id: "eu-1".to_string(),
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn test_complete_response_releases_ticket() {
        let fx = fixture(AdmissionConfig::default());
        let app = App::new("app-1", "tenant-1", GenerationMode::Completion)
            .with_max_active_requests(1);

        let response = fx
            .service
            .generate(&app, &user(), json!({"q": "hi"}), InvocationSource::WebApp, false)
            .await
            .unwrap();
        assert_eq!(response.into_complete().unwrap()["answer"], "done");

        assert_eq!(fx.service.governor().active_count("app-1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_concurrency_ceiling_min_of_app_and_global() {
        let config = AdmissionConfig {
            app_max_active_requests: 5,
            ..AdmissionConfig::default()
        };
        let fx = fixture(config);
        let app =
            App::new("app-1", "tenant-1", GenerationMode::Chat).with_max_active_requests(2);

        // Two streamed requests hold their tickets while unconsumed
        let r1 = fx
            .service
            .generate(&app, &user(), json!({}), InvocationSource::WebApp, true)
            .await
            .unwrap();
        let _r2 = fx
            .service
            .generate(&app, &user(), json!({}), InvocationSource::WebApp, true)
            .await
            .unwrap();

        let err = fx
            .service
            .generate(&app, &user(), json!({}), InvocationSource::WebApp, true)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DispatchError::ConcurrencyLimitExceeded { limit: 2, .. }
        ));

        // Abandoning one stream frees its slot
        drop(r1);
        settle().await;
        assert!(fx
            .service
            .generate(&app, &user(), json!({}), InvocationSource::WebApp, true)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_daily_quota_for_constrained_plan() {
        let config = AdmissionConfig {
            billing_enabled: true,
            daily_request_limit: 3,
            ..AdmissionConfig::default()
        };
        let fx = fixture(config);
        let app = App::new("app-1", "tenant-free", GenerationMode::Completion);

        for _ in 0..3 {
            fx.service
                .generate(&app, &user(), json!({}), InvocationSource::WebApp, false)
                .await
                .unwrap();
        }
        let err = fx
            .service
            .generate(&app, &user(), json!({}), InvocationSource::WebApp, false)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DispatchError::RateLimitExceeded { limit: 3, .. }
        ));
    }

    #[tokio::test]
    async fn test_paid_plan_skips_daily_quota() {
        let config = AdmissionConfig {
            billing_enabled: true,
            daily_request_limit: 1,
            ..AdmissionConfig::default()
        };
        let fx = fixture(config);
        fx.billing.set_plan("tenant-paid", PlanTier::Team).await;
        let app = App::new("app-1", "tenant-paid", GenerationMode::Completion);

        for _ in 0..5 {
            fx.service
                .generate(&app, &user(), json!({}), InvocationSource::WebApp, false)
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_billing_disabled_skips_daily_quota() {
        let config = AdmissionConfig {
            billing_enabled: false,
            daily_request_limit: 1,
            ..AdmissionConfig::default()
        };
        let fx = fixture(config);
        let app = App::new("app-1", "tenant-free", GenerationMode::Completion);

        for _ in 0..5 {
            fx.service
                .generate(&app, &user(), json!({}), InvocationSource::WebApp, false)
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_workflow_resolution_failures() {
        let fx = fixture(AdmissionConfig::default());
        let app = App::new("app-wf", "tenant-1", GenerationMode::Workflow);

        let err = fx
            .service
            .generate(&app, &user(), json!({}), InvocationSource::WebApp, true)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::WorkflowNotPublished { .. }));

        let err = fx
            .service
            .generate(&app, &user(), json!({}), InvocationSource::Debugger, true)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::WorkflowNotFound { .. }));

        // Admission rolled back on both failures
        assert_eq!(fx.service.governor().active_count("app-wf").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_workflow_source_selects_version() {
        let fx = fixture(AdmissionConfig::default());
        let app = App::new("app-wf", "tenant-1", GenerationMode::Workflow);
        fx.workflows
            .save_draft(Workflow::draft("app-wf", json!({"nodes": []})))
            .await;
        fx.workflows
            .publish(Workflow::with_version("app-wf", "7", json!({"nodes": []})))
            .await;

        let response = fx
            .service
            .generate(&app, &user(), json!({}), InvocationSource::WebApp, false)
            .await
            .unwrap();
        assert_eq!(response.into_complete().unwrap()["workflow_version"], "7");

        let response = fx
            .service
            .generate(&app, &user(), json!({}), InvocationSource::Debugger, false)
            .await
            .unwrap();
        assert_eq!(response.into_complete().unwrap()["workflow_version"], "draft");
    }

    #[tokio::test]
    async fn test_single_iteration_requires_workflow_mode() {
        let fx = fixture(AdmissionConfig::default());
        let app = App::new("app-1", "tenant-1", GenerationMode::Completion);

        let err = fx
            .service
            .generate_single_iteration(&app, &user(), "node-3", json!({}), true)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::UnsupportedMode(_)));
    }

    #[tokio::test]
    async fn test_single_iteration_uses_draft_and_passes_node() {
        let fx = fixture(AdmissionConfig::default());
        let app = App::new("app-wf", "tenant-1", GenerationMode::AdvancedChat);

        let err = fx
            .service
            .generate_single_iteration(&app, &user(), "node-3", json!({}), false)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::WorkflowNotFound { .. }));

        fx.workflows
            .save_draft(Workflow::draft("app-wf", json!({"nodes": []})))
            .await;
        let response = fx
            .service
            .generate_single_loop(&app, &user(), "node-3", json!({}), false)
            .await
            .unwrap();
        let value = response.into_complete().unwrap();
        assert_eq!(value["workflow_version"], "draft");
        assert_eq!(value["node"], "node-3");
    }

    #[tokio::test]
    async fn test_single_iteration_subject_to_concurrency() {
        let fx = fixture(AdmissionConfig::default());
        let app = App::new("app-wf", "tenant-1", GenerationMode::AdvancedChat)
            .with_max_active_requests(1);
        fx.workflows
            .save_draft(Workflow::draft("app-wf", json!({"nodes": []})))
            .await;

        let _held = fx.service.governor().enter("app-wf", 1).await.unwrap();
        let err = fx
            .service
            .generate_single_iteration(&app, &user(), "node-3", json!({}), false)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::ConcurrencyLimitExceeded { .. }));
    }

    #[tokio::test]
    async fn test_mid_stream_throttle_translated_and_released() {
        let fx = fixture(AdmissionConfig::default());
        let registry = StrategyRegistry::new()
            .register(GenerationMode::Chat, Arc::new(ThrottleMidStreamStrategy));
        let service = GenerateService::new(
            AdmissionConfig::default(),
            Arc::new(MemoryCounterStore::new()),
            registry,
            Arc::new(fx.billing.clone()),
            Arc::new(fx.workflows.clone()),
        );
        let app = App::new("app-1", "tenant-1", GenerationMode::Chat).with_max_active_requests(1);

        let mut stream = service
            .generate(&app, &user(), json!({}), InvocationSource::WebApp, true)
            .await
            .unwrap()
            .into_stream()
            .unwrap();

        assert!(stream.next().await.unwrap().is_ok());
        let err = stream.next().await.unwrap().unwrap_err();
        assert!(matches!(err, DispatchError::UpstreamRateLimited(_)));

        settle().await;
        assert_eq!(service.governor().active_count("app-1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_strategy_error_released_and_passed_through() {
        let fx = fixture(AdmissionConfig::default());
        let app = App::new("app-1", "tenant-1", GenerationMode::AgentChat)
            .with_max_active_requests(1);

        let err = fx
            .service
            .generate(&app, &user(), json!({}), InvocationSource::WebApp, true)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Strategy(_)));

        // Release is awaited on the synchronous error path
        assert_eq!(fx.service.governor().active_count("app-1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_non_streaming_caller_gets_eager_release() {
        let fx = fixture(AdmissionConfig::default());
        let app = App::new("app-1", "tenant-1", GenerationMode::Chat).with_max_active_requests(1);

        let response = fx
            .service
            .generate(&app, &user(), json!({}), InvocationSource::WebApp, false)
            .await
            .unwrap();
        assert!(response.is_stream());
        assert_eq!(fx.service.governor().active_count("app-1").await.unwrap(), 0);

        // Events still drain after the eager release
        let mut stream = response.into_stream().unwrap();
        let mut seen = 0;
        while let Some(event) = stream.next().await {
            event.unwrap();
            seen += 1;
        }
        assert_eq!(seen, 3);
    }

    #[tokio::test]
    async fn test_more_like_this_bypasses_app_ceiling() {
        let fx = fixture(AdmissionConfig::default());
        let app = App::new("app-1", "tenant-1", GenerationMode::Completion)
            .with_max_active_requests(1);

        let _held = fx.service.governor().enter("app-1", 1).await.unwrap();
        let response = fx
            .service
            .generate_more_like_this(&app, &user(), "msg-42", InvocationSource::WebApp, false)
            .await
            .unwrap();
        assert_eq!(
            response.into_complete().unwrap()["args"]["message_id"],
            "msg-42"
        );
    }
}
