use std::sync::Arc;

use crate::error::DsmResult;

use super::registration::FaultRegistration;
use super::resolver::{FaultResolver, PageSource};

/// The fault-handling loop: one event at a time, forever
pub struct FaultHandler<S> {
    registration: FaultRegistration,
    resolver: FaultResolver<S>,
}

impl<S: PageSource> FaultHandler<S> {
    pub fn new(registration: FaultRegistration, source: Arc<S>) -> Self {
        let resolver = FaultResolver::new(Arc::clone(registration.space()), source);
        Self {
            registration,
            resolver,
        }
    }

    /// Serve faults until one cannot be resolved. Only returns on error.
    pub fn run(self) -> DsmResult<()> {
        tracing::info!("Fault handler started");
        loop {
            let fault = self.registration.next_fault()?;
            self.resolver.handle(fault, &self.registration)?;
        }
    }
}
