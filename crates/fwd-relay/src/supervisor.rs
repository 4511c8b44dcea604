//! Route supervisor - owns every forwarder and restarts failed subscriptions
//!
//! Each route runs as three tasks:
//! - a forwarder task draining the route's event queue,
//! - a subscription task per connection attempt, reading the source,
//! - a supervisory task that awaits the subscription task and applies the
//!   route's [`RestartPolicy`].
//!
//! Routes share nothing: a failing or stopped route never affects the
//! delivery of another.

use std::time::Instant;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{RelayConfig, Route, SubscriptionConfig};
use crate::error::Result;
use crate::forwarder::Forwarder;
use crate::restart::{Backoff, RestartPolicy};
use crate::streaming::{StreamError, Subscription};

/// Events buffered between a subscription and its forwarder
const EVENT_QUEUE_CAPACITY: usize = 1;

/// Lifecycle state of one route
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteState {
    /// Connecting to the source
    Starting,
    /// Source accepted, events flowing
    Running,
    /// Stopped on request, not restarted
    Stopped,
    /// Subscription failed; restarting unless the policy gave up
    Failed,
}

/// Observable status of one route
#[derive(Debug, Clone)]
pub struct RouteStatus {
    pub route: Route,
    pub state: RouteState,
    /// Restarts since the route was started
    pub restarts: u32,
    /// Last subscription failure
    pub last_error: Option<String>,
}

struct RouteEntry {
    route: Route,
    cancel: CancellationToken,
    status: watch::Receiver<RouteStatus>,
    /// Built at registration, moved into the route task on start
    pending: Option<RouteTask>,
    handle: Option<JoinHandle<()>>,
}

/// Supervises a set of independent routes
pub struct RouteSupervisor {
    config: RelayConfig,
    cancel: CancellationToken,
    routes: Vec<RouteEntry>,
    /// Tasks of replaced routes that may still be tearing down
    retired: Vec<JoinHandle<()>>,
    started: bool,
}

impl RouteSupervisor {
    /// Create an empty supervisor; every route shares `config`
    pub fn new(config: RelayConfig) -> Self {
        Self {
            config,
            cancel: CancellationToken::new(),
            routes: Vec::new(),
            retired: Vec::new(),
            started: false,
        }
    }

    /// Register a route.
    ///
    /// Returns `Ok(false)` if an identical route is already registered and
    /// still active. A route that was stopped or gave up is replaced.
    /// Routes added after `start()` are started immediately.
    pub fn add_route(&mut self, route: Route) -> Result<bool> {
        if let Some(pos) = self.routes.iter().position(|entry| entry.route == route) {
            if !self.routes[pos].is_retired() {
                debug!(%route, "Ignoring duplicate route");
                return Ok(false);
            }
            debug!(%route, "Replacing stopped route");
            let stale = self.routes.remove(pos);
            self.retired.extend(stale.handle);
        }

        let forwarder = Forwarder::new(route.clone(), &self.config.forwarder)?;
        let cancel = self.cancel.child_token();
        let (status_tx, status_rx) = watch::channel(RouteStatus {
            route: route.clone(),
            state: RouteState::Starting,
            restarts: 0,
            last_error: None,
        });

        let task = RouteTask {
            forwarder,
            subscription: self.config.subscription.clone(),
            policy: self.config.restart.clone(),
            cancel: cancel.clone(),
            status: status_tx,
        };

        let mut entry = RouteEntry {
            route,
            cancel,
            status: status_rx,
            pending: Some(task),
            handle: None,
        };
        if self.started {
            entry.spawn();
        }
        self.routes.push(entry);

        Ok(true)
    }

    /// Number of registered routes
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether no route is registered
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Start every registered route
    pub fn start(&mut self) {
        self.started = true;
        for entry in &mut self.routes {
            entry.spawn();
        }
        info!(routes = self.routes.len(), "Route supervisor started");
    }

    /// Current status of every route, in registration order
    pub fn status(&self) -> Vec<RouteStatus> {
        self.routes
            .iter()
            .map(|entry| entry.status.borrow().clone())
            .collect()
    }

    /// Follow status changes of one route
    pub fn watch(&self, route: &Route) -> Option<watch::Receiver<RouteStatus>> {
        self.find(route).map(|entry| entry.status.clone())
    }

    /// Stop one route; it is torn down and not restarted until it is
    /// registered again with [`add_route`](Self::add_route).
    ///
    /// Returns `false` for an unknown route.
    pub fn stop_route(&self, route: &Route) -> bool {
        match self.find(route) {
            Some(entry) => {
                info!(%route, "Stopping route");
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Stop every route and wait until all connections are released
    pub async fn shutdown(mut self) {
        info!(routes = self.routes.len(), "Shutting down routes");
        self.cancel.cancel();

        for entry in &mut self.routes {
            if let Some(handle) = entry.handle.take() {
                if let Err(e) = handle.await {
                    error!(route = %entry.route, error = %e, "Route task panicked");
                }
            }
        }
        for handle in self.retired.drain(..) {
            if let Err(e) = handle.await {
                error!(error = %e, "Route task panicked");
            }
        }

        info!("All routes stopped");
    }

    fn find(&self, route: &Route) -> Option<&RouteEntry> {
        self.routes.iter().find(|entry| &entry.route == route)
    }
}

impl RouteEntry {
    /// Stopped on request, or its task ended on its own
    fn is_retired(&self) -> bool {
        self.cancel.is_cancelled()
            || self.handle.as_ref().is_some_and(|handle| handle.is_finished())
    }

    fn spawn(&mut self) {
        if let Some(task) = self.pending.take() {
            self.handle = Some(tokio::spawn(task.run()));
        }
    }
}

/// Everything one route needs to run on its own
struct RouteTask {
    forwarder: Forwarder,
    subscription: SubscriptionConfig,
    policy: RestartPolicy,
    cancel: CancellationToken,
    status: watch::Sender<RouteStatus>,
}

/// How one connection attempt ended
enum Exit {
    Stopped,
    Failed(String),
}

impl RouteTask {
    async fn run(self) {
        let RouteTask {
            forwarder,
            subscription: sub_config,
            policy,
            cancel,
            status,
        } = self;
        let route = forwarder.route().clone();
        info!(%route, "Starting route");

        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let forwarder_task = {
            let cancel = cancel.clone();
            tokio::spawn(async move { forwarder.run(events_rx, cancel).await })
        };

        let mut backoff = Backoff::new(policy);

        loop {
            let subscription =
                match Subscription::new(route.source().clone(), &sub_config, cancel.child_token()) {
                    Ok(subscription) => subscription,
                    Err(e) => {
                        error!(%route, error = %e, "Cannot create subscription");
                        status.send_modify(|s| {
                            s.state = RouteState::Failed;
                            s.last_error = Some(e.to_string());
                        });
                        break;
                    }
                };
            debug!(url = %subscription.url(), attempt = backoff.attempt(), "Opening subscription");

            let (connected_tx, connected_rx) = oneshot::channel();
            let events = events_tx.clone();
            let subscription_task = tokio::spawn(async move {
                let response = subscription.connect().await?;
                let _ = connected_tx.send(Instant::now());
                subscription.stream(response, &events).await
            });

            // Resolves on connect, or with an error once the task ended without connecting.
            let connected_at = connected_rx.await.ok();
            if connected_at.is_some() {
                set_state(&status, RouteState::Running);
            }

            let exit = match subscription_task.await {
                Ok(Ok(())) | Ok(Err(StreamError::Cancelled)) => Exit::Stopped,
                Ok(Err(e)) => Exit::Failed(e.to_string()),
                Err(e) => Exit::Failed(format!("subscription task panicked: {e}")),
            };

            let reason = match exit {
                Exit::Failed(_) if cancel.is_cancelled() => {
                    set_state(&status, RouteState::Stopped);
                    break;
                }
                Exit::Stopped => {
                    set_state(&status, RouteState::Stopped);
                    break;
                }
                Exit::Failed(reason) => reason,
            };

            if connected_at.is_some_and(|at| backoff.is_stable(at.elapsed())) {
                backoff.reset();
            }

            status.send_modify(|s| {
                s.state = RouteState::Failed;
                s.last_error = Some(reason.clone());
            });

            let Some(delay) = backoff.next_delay() else {
                error!(%route, error = %reason, "Subscription failed, giving up on route");
                break;
            };

            warn!(
                %route,
                error = %reason,
                attempt = backoff.attempt(),
                delay_ms = delay.as_millis() as u64,
                "Subscription failed, restarting"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    set_state(&status, RouteState::Stopped);
                    break;
                }
                _ = tokio::time::sleep(delay) => {}
            }

            status.send_modify(|s| {
                s.restarts += 1;
                s.state = RouteState::Starting;
            });
        }

        // Dropping the last sender lets the forwarder drain and exit.
        drop(events_tx);
        if let Err(e) = forwarder_task.await {
            error!(%route, error = %e, "Forwarder task panicked");
        }
        info!(%route, "Route torn down");
    }
}

fn set_state(status: &watch::Sender<RouteStatus>, state: RouteState) {
    status.send_modify(|s| s.state = state);
}
