// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Discovery engine and dispatcher sharing one event bus.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::info;

use fleetpress_core::config::FleetConfig;
use fleetpress_core::error::{FleetError, Result};
use fleetpress_core::events::FleetEvent;

use crate::discovery::{DiscoveryEngine, Probe};
use crate::dispatcher::{Dispatcher, Executor};
use crate::events::EventBus;

type ExecutorFactory = Box<dyn FnOnce(&DiscoveryEngine) -> Arc<dyn Executor> + Send>;

enum ExecutorSource {
    Ready(Arc<dyn Executor>),
    Factory(ExecutorFactory),
}

#[derive(Default)]
pub struct PrintFleetBuilder {
    config: FleetConfig,
    probe: Option<Arc<dyn Probe>>,
    executor: Option<ExecutorSource>,
    events: Option<EventBus>,
}

impl PrintFleetBuilder {
    pub fn config(mut self, config: FleetConfig) -> Self {
        self.config = config;
        self
    }

    pub fn probe(mut self, probe: Arc<dyn Probe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(ExecutorSource::Ready(executor));
        self
    }

    /// Create the executor from the discovery engine once it exists, for
    /// executors that look printer addresses up in the registry.
    pub fn executor_from_discovery<F>(mut self, factory: F) -> Self
    where
        F: FnOnce(&DiscoveryEngine) -> Arc<dyn Executor> + Send + 'static,
    {
        self.executor = Some(ExecutorSource::Factory(Box::new(factory)));
        self
    }

    pub fn events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn build(self) -> Result<PrintFleet> {
        let events = self.events.unwrap_or_default();
        let probe = self
            .probe
            .ok_or_else(|| FleetError::Configuration("fleet requires a probe".into()))?;
        let source = self
            .executor
            .ok_or_else(|| FleetError::Configuration("fleet requires an executor".into()))?;

        let discovery = DiscoveryEngine::builder()
            .config(self.config.discovery)
            .probe(probe)
            .events(events.clone())
            .build()?;
        let executor = match source {
            ExecutorSource::Ready(executor) => executor,
            ExecutorSource::Factory(factory) => factory(&discovery),
        };
        let dispatcher = Dispatcher::builder()
            .config(self.config.dispatcher)
            .executor(executor)
            .events(events.clone())
            .build()?;

        Ok(PrintFleet {
            events,
            discovery,
            dispatcher,
        })
    }
}

/// A whole fleet: printers found by discovery, jobs fed to the dispatcher.
#[derive(Clone)]
pub struct PrintFleet {
    events: EventBus,
    discovery: DiscoveryEngine,
    dispatcher: Dispatcher,
}

impl PrintFleet {
    pub fn builder() -> PrintFleetBuilder {
        PrintFleetBuilder::default()
    }

    pub fn discovery(&self) -> &DiscoveryEngine {
        &self.discovery
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FleetEvent> {
        self.events.subscribe()
    }

    /// Start both schedules.  Discovery runs its first cycle immediately.
    pub fn start(&self) {
        self.discovery.start();
        self.dispatcher.start();
        info!("print fleet started");
    }

    /// Stop the dispatcher first so no new attempts begin, then discovery.
    pub async fn stop(&self) {
        self.dispatcher.stop().await;
        self.discovery.stop().await;
        info!("print fleet stopped");
    }
}
