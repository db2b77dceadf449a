use std::future::IntoFuture;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use tracing::debug;

use crate::coordinator::{AcknowledgementFuture, OrderingCoordinator};
use crate::error::ConfigError;
use crate::message::MessageHandle;
use crate::processor::{discard, AcknowledgementProcessor, ProcessorOptions, ProcessorSettings};

/// Hands every request straight to the coordinator, without any buffering.
pub struct ImmediateAcknowledgementProcessor {
    options: ProcessorOptions,
    running: AtomicBool,
    coordinator: RwLock<Option<Arc<OrderingCoordinator>>>,
    lifecycle: Mutex<()>,
}

impl ImmediateAcknowledgementProcessor {
    pub fn new(id: &str) -> Self {
        Self {
            options: ProcessorOptions::new(id),
            running: AtomicBool::new(false),
            coordinator: RwLock::new(None),
            lifecycle: Mutex::new(()),
        }
    }
}

impl ProcessorSettings for ImmediateAcknowledgementProcessor {
    fn options_mut(&mut self) -> &mut ProcessorOptions {
        &mut self.options
    }
}

#[async_trait]
impl AcknowledgementProcessor for ImmediateAcknowledgementProcessor {
    fn id(&self) -> &str {
        self.options.id()
    }

    fn on_acknowledge_batch(&self, handles: Vec<MessageHandle>) -> AcknowledgementFuture {
        if !self.running.load(Ordering::Acquire) {
            return discard(self.id(), handles.len());
        }

        let Some(coordinator) = self.coordinator.read().clone() else {
            return discard(self.id(), handles.len());
        };
        coordinator.dispatch(handles).into_future()
    }

    fn start(&self) -> Result<(), ConfigError> {
        let _lifecycle = self.lifecycle.lock();
        if self.running.load(Ordering::Acquire) {
            return Ok(());
        }

        let runtime = Handle::try_current().map_err(|_| ConfigError::NoRuntime)?;
        let coordinator = self.options.coordinator(runtime)?;
        debug!(
            processor = self.id(),
            ordering = %coordinator.ordering(),
            "starting immediate acknowledgement processor"
        );

        *self.coordinator.write() = Some(Arc::new(coordinator));
        self.running.store(true, Ordering::Release);
        Ok(())
    }

    async fn stop(&self) {
        let stopped = {
            let _lifecycle = self.lifecycle.lock();
            self.coordinator.write().take();
            self.running.swap(false, Ordering::AcqRel)
        };

        if stopped {
            debug!(
                processor = self.id(),
                "stopped immediate acknowledgement processor"
            );
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}
