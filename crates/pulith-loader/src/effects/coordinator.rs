use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::thread::{self, ThreadId};

use super::engine::NetworkEngine;
use super::registry::Registry;
use crate::error::Result;

/// Builds the engine for a partition. The empty partition is the default.
pub type EngineFactory = Box<dyn Fn(&str) -> Result<Rc<dyn NetworkEngine>>>;

/// Thread identity and teardown state shared with uploads and requests.
pub(crate) struct Runtime {
    thread: ThreadId,
    shutting_down: Cell<bool>,
}

impl Runtime {
    fn new() -> Self {
        Self {
            thread: thread::current().id(),
            shutting_down: Cell::new(false),
        }
    }

    pub(crate) fn assert_current(&self) {
        debug_assert_eq!(
            thread::current().id(),
            self.thread,
            "pulith-loader used off its coordination thread"
        );
    }

    pub(crate) fn is_shutting_down(&self) -> bool { self.shutting_down.get() }
}

/// A credential and cookie context requests are issued in.
pub struct Session {
    partition: String,
    engine: Rc<dyn NetworkEngine>,
}

impl Session {
    pub fn partition(&self) -> &str { &self.partition }

    pub fn is_default(&self) -> bool { self.partition.is_empty() }

    pub fn engine(&self) -> &Rc<dyn NetworkEngine> { &self.engine }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session").field("partition", &self.partition).finish()
    }
}

/// Owner of everything confined to the coordination thread: the request
/// registry, the session table and the teardown flag.
///
/// Create it on the thread that will drive requests, inside a
/// [`tokio::task::LocalSet`]; it is `!Send` and so are the requests it
/// issues.
pub struct Coordinator {
    runtime: Rc<Runtime>,
    registry: Rc<Registry>,
    sessions: RefCell<HashMap<String, Rc<Session>>>,
    factory: EngineFactory,
}

impl Coordinator {
    pub fn new(factory: impl Fn(&str) -> Result<Rc<dyn NetworkEngine>> + 'static) -> Self {
        Self {
            runtime: Rc::new(Runtime::new()),
            registry: Rc::new(Registry::new()),
            sessions: RefCell::new(HashMap::new()),
            factory: Box::new(factory),
        }
    }

    /// A coordinator whose every partition shares `engine`.
    pub fn with_engine(engine: Rc<dyn NetworkEngine>) -> Self {
        Self::new(move |_| Ok(Rc::clone(&engine)))
    }

    /// A coordinator giving each partition its own [`ReqwestEngine`], and
    /// so its own connection pool and cookie jar.
    ///
    /// [`ReqwestEngine`]: super::ReqwestEngine
    #[cfg(feature = "reqwest")]
    pub fn with_reqwest(options: super::EngineOptions) -> Self {
        Self::new(move |partition| {
            tracing::debug!(partition, "creating reqwest engine");
            let engine = super::ReqwestEngine::new(options.clone())?;
            Ok(Rc::new(engine) as Rc<dyn NetworkEngine>)
        })
    }

    /// The session for `partition`, created on first use.
    ///
    /// # Errors
    ///
    /// Whatever the engine factory returns for a new partition.
    pub fn session(&self, partition: &str) -> Result<Rc<Session>> {
        self.runtime.assert_current();
        if let Some(session) = self.sessions.borrow().get(partition) {
            return Ok(Rc::clone(session));
        }

        let engine = (self.factory)(partition)?;
        let session = Rc::new(Session {
            partition: partition.to_owned(),
            engine,
        });
        self.sessions
            .borrow_mut()
            .insert(partition.to_owned(), Rc::clone(&session));
        Ok(session)
    }

    pub fn default_session(&self) -> Result<Rc<Session>> { self.session("") }

    /// Requests not yet destroyed, in flight or not.
    pub fn live_requests(&self) -> usize { self.registry.len() }

    /// Requests pinned alive by an in-flight load.
    pub fn in_flight_requests(&self) -> usize { self.registry.pinned_len() }

    /// Begin teardown: cancel every in-flight request and stop starting
    /// upload producers.
    pub fn shutdown(&self) {
        self.runtime.assert_current();
        self.runtime.shutting_down.set(true);
        let in_flight = self.registry.pinned();
        tracing::debug!(count = in_flight.len(), "coordinator shutting down");
        for request in in_flight {
            request.cancel();
        }
    }

    pub fn is_shutting_down(&self) -> bool { self.runtime.is_shutting_down() }

    pub(crate) fn runtime(&self) -> &Rc<Runtime> { &self.runtime }

    pub(crate) fn registry(&self) -> &Rc<Registry> { &self.registry }
}

impl fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coordinator")
            .field("live_requests", &self.live_requests())
            .field("in_flight_requests", &self.in_flight_requests())
            .field("shutting_down", &self.is_shutting_down())
            .finish()
    }
}
