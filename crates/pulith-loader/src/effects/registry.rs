use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use super::request::RequestInner;
use crate::data::RequestId;

/// Table of live requests owned by one coordinator.
///
/// Every live request has an entry holding a weak back-reference, so ids can
/// be resolved without keeping requests alive. While a request is in flight
/// the entry also holds a strong pin; that pin is what keeps the request
/// alive when the embedder drops its handle. The entry itself goes away when
/// the request is destroyed.
pub(crate) struct Registry {
    next_id: Cell<u32>,
    entries: RefCell<HashMap<RequestId, Entry>>,
}

struct Entry {
    request: Weak<RequestInner>,
    pin: Option<Rc<RequestInner>>,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self {
            next_id: Cell::new(1),
            entries: RefCell::new(HashMap::new()),
        }
    }

    /// Allocate an id, build the request with it and record it.
    pub(crate) fn register(&self, build: impl FnOnce(RequestId) -> RequestInner) -> Rc<RequestInner> {
        let id = self.allocate_id();
        let request = Rc::new(build(id));
        self.entries.borrow_mut().insert(
            id,
            Entry {
                request: Rc::downgrade(&request),
                pin: None,
            },
        );
        request
    }

    pub(crate) fn pin(&self, request: &Rc<RequestInner>) {
        if let Some(entry) = self.entries.borrow_mut().get_mut(&request.id()) {
            entry.pin = Some(Rc::clone(request));
        }
    }

    /// Remove the pin for `id` and hand it back.
    ///
    /// The caller drops the returned reference after this borrow ends, since
    /// dropping the last reference re-enters [`release`](Self::release).
    pub(crate) fn unpin(&self, id: RequestId) -> Option<Rc<RequestInner>> {
        self.entries.borrow_mut().get_mut(&id).and_then(|entry| entry.pin.take())
    }

    pub(crate) fn release(&self, id: RequestId) {
        let entry = self.entries.borrow_mut().remove(&id);
        drop(entry);
    }

    pub(crate) fn lookup(&self, id: RequestId) -> Option<Rc<RequestInner>> {
        self.entries.borrow().get(&id).and_then(|entry| entry.request.upgrade())
    }

    pub(crate) fn pinned(&self) -> Vec<Rc<RequestInner>> {
        self.entries
            .borrow()
            .values()
            .filter_map(|entry| entry.pin.clone())
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub(crate) fn pinned_len(&self) -> usize {
        self.entries.borrow().values().filter(|entry| entry.pin.is_some()).count()
    }

    fn allocate_id(&self) -> RequestId {
        let entries = self.entries.borrow();
        loop {
            let raw = self.next_id.get();
            self.next_id.set(raw.checked_add(1).unwrap_or(1));
            let id = RequestId::new(raw);
            if raw != 0 && !entries.contains_key(&id) {
                return id;
            }
        }
    }
}
