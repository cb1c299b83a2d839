use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// mapping of event types to their listeners
///
/// `TypeId` gives a unique, hashable identifier for each event type and `Any` lets the
/// listener lists be stored side by side and recovered by downcasting
#[derive(Debug, Default)]
struct TypeMap {
    inner: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl TypeMap {
    /// get a reference to the value associated with type `T`
    fn get<T>(&self) -> Option<&T>
    where
        T: Any + 'static + Send + Sync,
    {
        self.inner
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
    }

    /// get a mutable reference to the value associated with type `T`, inserting
    /// `T::default()` first if the map doesn't have one
    fn get_or_default<T>(&mut self) -> Option<&mut T>
    where
        T: Any + 'static + Send + Sync + Default,
    {
        self.inner
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(T::default()) as Box<dyn Any + Send + Sync>)
            .downcast_mut::<T>()
    }

    /// determine if the `TypeMap` contains a value for type `T`
    fn has<T>(&self) -> bool
    where
        T: Any + 'static + Send + Sync,
    {
        self.inner.contains_key(&TypeId::of::<T>())
    }
}

/// trait for the publisher side of the observer pattern
///
/// made a trait so that it can be implemented on an `Arc<RwLock<..>>` as well
pub trait EventPublisher {
    /// subscribe to an event of type `E`; the listener receives each event by value
    fn subscribe<E>(&mut self, listener: impl Fn(E) + 'static + Send + Sync)
    where
        E: 'static;

    /// notify all listeners of an event of type `E`
    fn notify<E>(&self, event: E)
    where
        E: 'static + Clone;

    /// determine if there are any listeners for an event of type `E`
    fn has_listeners<E>(&self) -> bool
    where
        E: 'static;
}

type Subscriber<E> = dyn Fn(E) + 'static + Send + Sync;

type ListenerVec<E> = Vec<Box<Subscriber<E>>>;

/// publisher side of the observer pattern
#[derive(Debug, Default)]
pub struct Publisher {
    registry: TypeMap,
}

impl Publisher {
    /// create a new [`Publisher`]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventPublisher for Publisher {
    fn subscribe<E>(&mut self, listener: impl Fn(E) + 'static + Send + Sync)
    where
        E: 'static,
    {
        if let Some(listeners) = self.registry.get_or_default::<ListenerVec<E>>() {
            listeners.push(Box::new(listener));
        }
    }

    fn notify<E>(&self, event: E)
    where
        E: 'static + Clone,
    {
        if let Some(listeners) = self.registry.get::<ListenerVec<E>>() {
            for callback in listeners {
                callback(event.clone());
            }
        }
    }

    fn has_listeners<E>(&self) -> bool
    where
        E: 'static,
    {
        self.registry.has::<ListenerVec<E>>()
    }
}

impl EventPublisher for Arc<RwLock<Publisher>> {
    fn subscribe<E>(&mut self, listener: impl Fn(E) + 'static + Send + Sync)
    where
        E: 'static,
    {
        if let Ok(mut guard) = self.write() {
            guard.subscribe(listener);
        }
    }

    fn notify<E>(&self, event: E)
    where
        E: 'static + Clone,
    {
        if let Ok(guard) = self.read() {
            guard.notify(event);
        }
    }

    fn has_listeners<E>(&self) -> bool
    where
        E: 'static,
    {
        self.read()
            .map_or(false, |guard| guard.has_listeners::<E>())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::events::VerificationFinished;
    use crate::verdict::OracleState;

    /// listeners registered for one event type only hear that type
    #[test]
    fn publisher_routes_events_by_type() {
        let heard = Arc::new(AtomicUsize::new(0));
        let counter = heard.clone();

        let mut publisher = Publisher::new();

        publisher.subscribe(move |event: VerificationFinished| {
            assert_eq!(event.state, OracleState::Confirmed);
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(publisher.has_listeners::<VerificationFinished>());
        assert!(!publisher.has_listeners::<String>());

        publisher.notify(VerificationFinished {
            state: OracleState::Confirmed,
            probes_sent: 2,
        });
        publisher.notify(String::from("nobody is listening"));

        assert_eq!(heard.load(Ordering::SeqCst), 1);
    }

    /// the shared publisher forwards through its lock
    #[test]
    fn shared_publisher_forwards() {
        let heard = Arc::new(AtomicUsize::new(0));
        let counter = heard.clone();

        let mut shared = Arc::new(RwLock::new(Publisher::new()));

        shared.subscribe(move |_: u8| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        shared.notify(1_u8);
        shared.notify(2_u8);

        assert!(shared.has_listeners::<u8>());
        assert_eq!(heard.load(Ordering::SeqCst), 2);
    }
}
