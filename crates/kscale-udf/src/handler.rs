//! Per-connection point handler.

use std::sync::Arc;

use kscale_autoscale::{Coordinator, DecisionOutcome};
use kscale_expr::{Evaluator, ExprEvaluator, Value};
use tracing::{debug, error, info, warn};

use crate::config::{HandlerConfig, ScaleRule};
use crate::error::HandlerError;
use crate::protocol::{EdgeType, InfoResponse, OptionSpec, Point, Request, Response};

/// Emit at `info` when the handler runs with `debug`, `trace` otherwise.
macro_rules! verbose {
    ($debug:expr, $($arg:tt)+) => {
        if $debug {
            tracing::info!($($arg)+)
        } else {
            tracing::trace!($($arg)+)
        }
    };
}

/// Result of running one point through the pipeline.
#[derive(Debug)]
pub struct Processed {
    /// The point to forward downstream.
    pub point: Point,
    /// The scaling decision, when one was reached.
    pub outcome: Option<DecisionOutcome>,
    /// An error that was logged while the point passed through.
    pub error: Option<HandlerError>,
}

impl Processed {
    fn passthrough(point: Point) -> Self {
        Self {
            point,
            outcome: None,
            error: None,
        }
    }
}

/// Scaling handler bound to one stream connection.
pub struct Handler {
    coordinator: Arc<Coordinator>,
    evaluator: Arc<dyn Evaluator>,
    connection: u64,
    rule: Option<ScaleRule>,
}

impl Handler {
    pub fn new(coordinator: Arc<Coordinator>, connection: u64) -> Self {
        Self {
            coordinator,
            evaluator: Arc::new(ExprEvaluator),
            connection,
            rule: None,
        }
    }

    /// Compile `when` and `by` with `evaluator` instead of the built-in
    /// expression language.
    pub fn with_evaluator(mut self, evaluator: Arc<dyn Evaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn rule(&self) -> Option<&ScaleRule> {
        self.rule.as_ref()
    }

    pub fn info(&self) -> InfoResponse {
        InfoResponse {
            wants: EdgeType::Stream,
            provides: EdgeType::Stream,
            options: HandlerConfig::option_types(),
        }
    }

    /// Configure the handler. A failed `init` also discards any earlier
    /// configuration, so later points are refused until an `init`
    /// succeeds.
    pub fn init(&mut self, options: &[OptionSpec]) -> Response {
        match ScaleRule::from_options_with(options, self.evaluator.as_ref()) {
            Ok(rule) => {
                info!(
                    connection = self.connection,
                    service = %rule.service_id,
                    when = %rule.when.source(),
                    by = %rule.by.source(),
                    min = rule.policy.min_instances,
                    max = rule.policy.max_instances,
                    cooldown = ?rule.policy.cooldown,
                    simulate = rule.policy.simulate,
                    "handler initialized"
                );
                self.rule = Some(rule);
                Response::Init {
                    success: true,
                    error: String::new(),
                }
            }
            Err(e) => {
                warn!(connection = self.connection, error = %e, "rejected handler options");
                self.rule = None;
                Response::Init {
                    success: false,
                    error: e.to_string(),
                }
            }
        }
    }

    /// Run one point through the predicate and, when it holds, the
    /// coordinator.
    ///
    /// Only a missing `init` is returned as `Err`; every other failure
    /// forwards the point unchanged and is reported in
    /// [`Processed::error`].
    pub async fn point(&self, point: Point) -> Result<Processed, HandlerError> {
        let rule = self.rule.as_ref().ok_or(HandlerError::NotInitialized)?;
        let context = point.context();

        let matched = match rule.when.evaluate(&context).and_then(|v| v.as_bool()) {
            Ok(matched) => matched,
            Err(e) => {
                let err = HandlerError::Predicate(e);
                error!(service = %rule.service_id, error = %err, "predicate failed");
                return Ok(Processed {
                    point,
                    outcome: None,
                    error: Some(err),
                });
            }
        };

        if !matched {
            verbose!(
                rule.debug,
                service = %rule.service_id,
                "predicate false, passing point through"
            );
            return Ok(Processed::passthrough(point));
        }

        verbose!(
            rule.debug,
            service = %rule.service_id,
            when = %rule.when.source(),
            "predicate matched"
        );

        let by = &rule.by;
        let mut formula_context = context;
        let decision = self
            .coordinator
            .decide(
                &rule.service_id,
                point.event_time(),
                &rule.policy,
                move |current| {
                    formula_context.insert("current".to_string(), Value::Int(current));
                    by.evaluate(&formula_context)?.as_int()
                },
            )
            .await;

        match decision {
            Ok(outcome) if outcome.is_resolved() => {
                verbose!(
                    rule.debug,
                    service = %rule.service_id,
                    target = outcome.target_instances,
                    applied = outcome.applied,
                    "decision reached"
                );
                Ok(Processed {
                    point: point.with_scale(outcome.target_instances),
                    outcome: Some(outcome),
                    error: None,
                })
            }
            Ok(outcome) => {
                verbose!(
                    rule.debug,
                    service = %rule.service_id,
                    reason = ?outcome.skipped,
                    "decision skipped, passing point through"
                );
                Ok(Processed {
                    point,
                    outcome: Some(outcome),
                    error: None,
                })
            }
            Err(e) => {
                let err = HandlerError::from(e);
                error!(service = %rule.service_id, error = %err, "scaling decision failed");
                Ok(Processed {
                    point,
                    outcome: None,
                    error: Some(err),
                })
            }
        }
    }

    /// Answer one request. `None` means nothing is written back.
    pub async fn handle(&mut self, request: Request) -> Option<Response> {
        match request {
            Request::Info => Some(Response::Info(self.info())),
            Request::Init { options } => Some(self.init(&options)),
            Request::Keepalive { time } => Some(Response::Keepalive { time }),
            Request::Snapshot => Some(Response::Snapshot {
                snapshot: String::new(),
            }),
            Request::Restore { .. } => Some(Response::Restore {
                success: true,
                error: String::new(),
            }),
            Request::BeginBatch { .. } | Request::EndBatch { .. } => {
                debug!(connection = self.connection, "rejecting batch");
                Some(Response::Error {
                    error: HandlerError::BatchUnsupported.to_string(),
                })
            }
            Request::Point(point) => match self.point(point).await {
                Ok(processed) => Some(Response::Point(processed.point)),
                Err(e) => Some(Response::Error {
                    error: e.to_string(),
                }),
            },
        }
    }
}
