//! Thread-shareable connection handle

use crate::connection::Connection;
use crate::transport::Transport;
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;

/// A connection guarded by a mutex so OS threads take turns.
///
/// The connection itself stays single-threaded: every call runs to
/// completion, loop pumping included, while the lock is held.
pub struct SharedConnection<T: Transport> {
    inner: Arc<Mutex<Connection<T>>>,
}

impl<T: Transport> Clone for SharedConnection<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Transport> SharedConnection<T> {
    pub fn new(conn: Connection<T>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(conn)),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, Connection<T>> {
        self.inner.lock()
    }

    /// Run `f` with exclusive access to the connection
    pub fn with<R>(&self, f: impl FnOnce(&mut Connection<T>) -> R) -> R {
        f(&mut self.inner.lock())
    }

    /// Recover the connection once every other handle is gone
    pub fn try_unwrap(self) -> Result<Connection<T>, Self> {
        Arc::try_unwrap(self.inner)
            .map(Mutex::into_inner)
            .map_err(|inner| Self { inner })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectionOptions, GetOptions, SetOptions};
    use crate::error::Result;
    use crate::transport::memory::MemoryTransport;
    use crate::transport::ConnectParams;
    use std::thread;

    #[test]
    fn test_threads_serialize_calls() -> Result<()> {
        let conn = Connection::open(
            MemoryTransport::new(),
            ConnectParams::default(),
            ConnectionOptions::default(),
        )?;
        let shared = SharedConnection::new(conn);

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let shared = shared.clone();
                thread::spawn(move || -> Result<()> {
                    for i in 0..25 {
                        let key = format!("t{t}:{i}");
                        shared.with(|c| c.set(&key, key.as_bytes(), SetOptions::default()))?;
                    }
                    Ok(())
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap()?;
        }

        let hit = shared.with(|c| c.get("t3:24", GetOptions::default()))?;
        assert_eq!(hit.map(|f| f.value), Some(bytes::Bytes::from_static(b"t3:24")));

        let conn = shared.try_unwrap().ok().unwrap();
        assert_eq!(conn.transport().store().len(), 100);
        assert_eq!(conn.pool_stats().tickets.live, 0);
        Ok(())
    }
}
