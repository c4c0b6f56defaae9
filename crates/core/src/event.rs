//! Synchroner Event-Bus
//!
//! Listener werden in Registrierungsreihenfolge aufgerufen. Jeder Aufruf
//! ist isoliert: panikt ein Listener, wird das geloggt und die uebrigen
//! Listener erhalten das Ereignis trotzdem.
//!
//! ```text
//!   senden(&event)
//!        |
//!        +--> Listener 1  (panic -> tracing::warn, weiter)
//!        +--> Listener 2
//!        +--> Listener n
//! ```

use parking_lot::RwLock;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Handle eines registrierten Listeners, wird zum Abmelden benoetigt
///
/// IDs sind prozessweit eindeutig, auch ueber verschiedene Busse hinweg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

static NAECHSTE_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct BusInner<E> {
    name: &'static str,
    listener: RwLock<Vec<(ListenerId, Listener<E>)>>,
}

/// Event-Bus fuer Ereignisse vom Typ `E`
///
/// Klonen teilt den internen Zustand.
pub struct EventBus<E> {
    inner: Arc<BusInner<E>>,
}

impl<E> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E> std::fmt::Debug for EventBus<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("name", &self.inner.name)
            .field("listener", &self.anzahl())
            .finish()
    }
}

impl<E> EventBus<E> {
    /// Erstellt einen leeren Bus; `name` erscheint in Log-Meldungen
    pub fn neu(name: &'static str) -> Self {
        Self {
            inner: Arc::new(BusInner {
                name,
                listener: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Registriert einen Listener fuer alle zukuenftigen Ereignisse
    pub fn abonnieren<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = ListenerId(NAECHSTE_LISTENER_ID.fetch_add(1, Ordering::Relaxed));
        self.inner.listener.write().push((id, Arc::new(listener)));
        id
    }

    /// Entfernt einen Listener. Gibt false zurueck wenn er nicht (mehr) existiert.
    pub fn abmelden(&self, id: ListenerId) -> bool {
        let mut listener = self.inner.listener.write();
        let vorher = listener.len();
        listener.retain(|(lid, _)| *lid != id);
        listener.len() != vorher
    }

    /// Entfernt alle Listener
    pub fn leeren(&self) {
        self.inner.listener.write().clear();
    }

    /// Anzahl registrierter Listener
    pub fn anzahl(&self) -> usize {
        self.inner.listener.read().len()
    }

    /// Stellt ein Ereignis allen Listenern zu
    ///
    /// Gibt die Anzahl der Listener zurueck die das Ereignis ohne Panic
    /// verarbeitet haben. Der Lock wird vor den Aufrufen freigegeben, Listener
    /// duerfen also selbst (ab)melden.
    pub fn senden(&self, event: &E) -> usize {
        let schnappschuss: Vec<Listener<E>> = self
            .inner
            .listener
            .read()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();

        let mut zugestellt = 0;
        for listener in schnappschuss {
            match catch_unwind(AssertUnwindSafe(|| listener(event))) {
                Ok(()) => zugestellt += 1,
                Err(_) => {
                    tracing::warn!(bus = self.inner.name, "Listener ist beim Zustellen abgestuerzt");
                }
            }
        }
        zugestellt
    }
}
