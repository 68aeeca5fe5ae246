/*!
Resource lifecycle tracking for a compute session.

A session walks through [`Stage`]s as it acquires the device, context, queue, program, kernel and
buffers. Every handle is wrapped in a [`Held`] guard that records its release in the session's
[`Ledger`] when dropped. Handles are stored so that Rust drops them in reverse acquisition order:
locals in reverse declaration order, struct fields in declaration order (children before parents).
*/

use std::{
    cell::{Cell, RefCell},
    fmt,
    ops::{Deref, DerefMut},
    rc::Rc,
};

use log::{debug, trace};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Uninitialized,
    DeviceAcquired,
    ContextReady,
    ProgramBuilt,
    KernelReady,
    BuffersBound,
    Dispatched,
    ResultsRead,
    Released,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resource {
    Device,
    Context,
    Queue,
    Program,
    Kernel,
    ParameterBuffer,
    PointBuffer,
    IterationBuffer,
    StagingBuffer,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event {
    Acquired(Resource),
    Released(Resource),
}

pub struct Ledger {
    stage: Cell<Stage>,
    events: RefCell<Vec<Event>>,
}

impl Default for Ledger {
    fn default() -> Self {
        Self {
            stage: Cell::new(Stage::Uninitialized),
            events: RefCell::new(Vec::new()),
        }
    }
}

impl fmt::Debug for Ledger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ledger")
            .field("stage", &self.stage.get())
            .field("events", &*self.events.borrow())
            .finish()
    }
}

impl Ledger {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn stage(&self) -> Stage {
        self.stage.get()
    }

    pub fn advance(&self, stage: Stage) {
        let previous = self.stage.replace(stage);
        debug_assert!(
            previous != Stage::Released,
            "session advanced to {:?} after release",
            stage
        );
        debug!("stage {:?} -> {:?}", previous, stage);
    }

    /// Wrap a freshly acquired handle so its release is recorded.
    pub fn hold<A: Release>(self: &Rc<Self>, resource: Resource, value: A) -> Held<A> {
        trace!("acquired {:?}", resource);
        self.events.borrow_mut().push(Event::Acquired(resource));
        Held {
            resource,
            value,
            ledger: Rc::clone(self),
        }
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.borrow().clone()
    }

    /// Resources acquired but not yet released, in acquisition order.
    pub fn outstanding(&self) -> Vec<Resource> {
        let mut held = Vec::new();
        for event in self.events.borrow().iter() {
            match *event {
                Event::Acquired(resource) => held.push(resource),
                Event::Released(resource) => {
                    if let Some(position) = held.iter().rposition(|&r| r == resource) {
                        held.remove(position);
                    }
                }
            }
        }
        held
    }

    /// Called once every handle of the session has gone out of scope.
    pub fn finish(&self) {
        debug_assert!(
            self.outstanding().is_empty(),
            "resources leaked: {:?}",
            self.outstanding()
        );
        self.advance(Stage::Released);
    }

    fn release(&self, resource: Resource) {
        trace!("released {:?}", resource);
        self.events.borrow_mut().push(Event::Released(resource));
    }
}

/// Backend-specific teardown run when a [`Held`] handle is dropped.
pub trait Release {
    fn release(&mut self) {}
}

impl Release for wgpu::Adapter {}
impl Release for wgpu::Device {}
impl Release for wgpu::Queue {}
impl Release for wgpu::ShaderModule {}

/// A handle owned by a session.
pub struct Held<A: Release> {
    resource: Resource,
    value: A,
    ledger: Rc<Ledger>,
}

impl<A: Release> Deref for Held<A> {
    type Target = A;

    fn deref(&self) -> &Self::Target {
        &self.value
    }
}

impl<A: Release> DerefMut for Held<A> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.value
    }
}

impl<A: Release> Drop for Held<A> {
    fn drop(&mut self) {
        self.value.release();
        self.ledger.release(self.resource);
    }
}
