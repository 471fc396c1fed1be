use crate::buffer::{BufferFactory, Residency};

/// Carries the backend selection and allocation information of a pipeline
/// invocation.
///
/// The engine never looks inside: it hands the context, unmodified, to the
/// compiled pipeline functions (which allocate their outputs through
/// [`ExecContext::factory`]) and to the backend merge primitives.
#[derive(Clone, Debug)]
pub struct ExecContext {
    factory: BufferFactory,
    device_id: Option<u32>,
}

impl ExecContext {
    /// A context for host-memory execution with a fresh factory
    pub fn host() -> Self {
        ExecContext {
            factory: BufferFactory::new(Residency::Host),
            device_id: None,
        }
    }

    /// A context for execution on the device identified by `device_id`
    pub fn device(device_id: u32) -> Self {
        ExecContext {
            factory: BufferFactory::new(Residency::Device),
            device_id: Some(device_id),
        }
    }

    /// A context that allocates through `factory`. The device id is ignored
    /// for host factories.
    pub fn with_factory(factory: BufferFactory, device_id: u32) -> Self {
        let device_id = match factory.residency() {
            Residency::Host => None,
            Residency::Device => Some(device_id),
        };
        ExecContext { factory, device_id }
    }

    pub fn factory(&self) -> &BufferFactory {
        &self.factory
    }

    pub fn residency(&self) -> Residency {
        self.factory.residency()
    }

    pub fn device_id(&self) -> Option<u32> {
        self.device_id
    }
}
