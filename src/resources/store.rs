use crate::environment::{Environment, WeakEnvironment};
use crate::events::ValueEvent;
use crate::{Error, Result};

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt::{Debug, Formatter};
use std::rc::Rc;

struct StoreState<T> {
    items: VecDeque<T>,
    gets: VecDeque<ValueEvent<T>>,
    puts: VecDeque<(ValueEvent<T>, T)>,
    initialized: bool,
}

struct StoreCore<T> {
    env: WeakEnvironment,
    capacity: usize,
    state: RefCell<StoreState<T>>,
}

/// A bounded FIFO buffer of items.
///
/// [`request_one()`] and [`put_one()`] return [`ValueEvent`]s that succeed, carrying the item taken or stored, as soon
/// as the store can serve them. A get waits while the store is empty and a put waits while it is full; waiting
/// requests are served oldest first. Serving one side always gives the other side a chance, so a put that fills the
/// store for a waiting get, or a get that frees room for a waiting put, settles both within the same call.
///
/// The item count never exceeds the capacity, and the queues only ever hold demand that no item or free slot could
/// have met.
///
/// [`request_one()`]: Store::request_one
/// [`put_one()`]: Store::put_one
pub struct Store<T> {
    core: Rc<StoreCore<T>>,
}

impl<T: Clone + 'static> Store<T> {
    /// Create an empty store.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfiguration`] if `capacity` is zero.
    pub fn new(env: &Environment, capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::invalid("store capacity must be at least one"));
        }

        Ok(Self {
            core: Rc::new(StoreCore {
                env: env.downgrade(),
                capacity,
                state: RefCell::new(StoreState {
                    items: VecDeque::with_capacity(capacity),
                    gets: VecDeque::new(),
                    puts: VecDeque::new(),
                    initialized: false,
                }),
            }),
        })
    }

    /// Fill the store with its starting stock. Waiting gets are served from it right away.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CapacityExceeded`] if the store would hold more than its capacity, and otherwise
    /// [`Error::StoreAlreadyInitialized`] if the store was initialized before. The store is left untouched in both
    /// cases.
    pub fn initialize<I>(&self, items: I) -> Result
    where
        I: IntoIterator<Item = T>,
    {
        let items: Vec<T> = items.into_iter().collect();
        {
            let mut state = self.core.state.borrow_mut();
            let total = state.items.len() + items.len();
            if total > self.core.capacity {
                return Err(Error::CapacityExceeded {
                    items: total,
                    capacity: self.core.capacity,
                });
            }
            if state.initialized {
                return Err(Error::StoreAlreadyInitialized);
            }

            state.items.extend(items);
            state.initialized = true;
        }

        self.settle();
        Ok(())
    }

    /// Take the oldest item out of the store. The returned event carries the item once it is taken.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EnvironmentDropped`] if the owning environment no longer exists.
    pub fn request_one(&self) -> Result<ValueEvent<T>> {
        let request = ValueEvent::new(&self.core.env.upgrade()?);
        self.core.state.borrow_mut().gets.push_back(request.clone());
        self.settle();

        if !request.event().is_scheduled() {
            tracing::debug!(waiting = self.queued_gets(), "store get queued");
        }
        Ok(request)
    }

    /// Put `item` into the store. The returned event carries a copy of the item once it is stored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EnvironmentDropped`] if the owning environment no longer exists.
    pub fn put_one(&self, item: T) -> Result<ValueEvent<T>> {
        let request = ValueEvent::new(&self.core.env.upgrade()?);
        self.core.state.borrow_mut().puts.push_back((request.clone(), item));
        self.settle();

        if !request.event().is_scheduled() {
            tracing::debug!(waiting = self.queued_puts(), "store put queued");
        }
        Ok(request)
    }

    pub fn capacity(&self) -> usize {
        self.core.capacity
    }

    pub fn number_of_available_items(&self) -> usize {
        self.core.state.borrow().items.len()
    }

    /// Number of gets waiting for an item.
    pub fn queued_gets(&self) -> usize {
        self.core.state.borrow().gets.len()
    }

    /// Number of puts waiting for a free slot.
    pub fn queued_puts(&self) -> usize {
        self.core.state.borrow().puts.len()
    }

    /// Alternate between both queues until neither can make progress.
    fn settle(&self) {
        while self.serve_get() | self.serve_put() {}
    }

    fn serve_get(&self) -> bool {
        let (request, item) = {
            let mut state = self.core.state.borrow_mut();
            if state.gets.is_empty() || state.items.is_empty() {
                return false;
            }
            match (state.gets.pop_front(), state.items.pop_front()) {
                (Some(request), Some(item)) => (request, item),
                _ => return false,
            }
        };

        match request.succeed(item.clone()) {
            Ok(()) => true,
            Err(error) => {
                tracing::warn!(%error, "could not hand out a store item");
                let mut state = self.core.state.borrow_mut();
                state.items.push_front(item);
                state.gets.push_front(request);
                false
            },
        }
    }

    fn serve_put(&self) -> bool {
        let (request, item) = {
            let mut state = self.core.state.borrow_mut();
            if state.items.len() >= self.core.capacity {
                return false;
            }
            match state.puts.pop_front() {
                Some((request, item)) => {
                    state.items.push_back(item.clone());
                    (request, item)
                },
                None => return false,
            }
        };

        match request.succeed(item.clone()) {
            Ok(()) => true,
            Err(error) => {
                tracing::warn!(%error, "could not store an item");
                let mut state = self.core.state.borrow_mut();
                state.items.pop_back();
                state.puts.push_front((request, item));
                false
            },
        }
    }
}

impl<T> Clone for Store<T> {
    fn clone(&self) -> Self {
        Self {
            core: Rc::clone(&self.core),
        }
    }
}

impl<T> Debug for Store<T> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        let state = self.core.state.borrow();
        f.debug_struct("Store")
            .field("capacity", &self.core.capacity)
            .field("items", &state.items.len())
            .field("queued_gets", &state.gets.len())
            .field("queued_puts", &state.puts.len())
            .field("initialized", &state.initialized)
            .finish()
    }
}
