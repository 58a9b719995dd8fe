//! High-level client
//!
//! [`Client`] wraps a [`Connection`] with a default deadline and the short
//! call shapes most code wants: `get`/`gat` (get-and-touch), their `_cas`
//! variants, `set`/`add`/`replace`, `remove`, JSON helpers and the async
//! controls.

use crate::config::ClientConfig;
use crate::connection::{
    Connection, ConnectionOptions, GetOptions, Outcome, RemoveOptions, SetOptions, TeardownStats,
};
use crate::error::Result;
use crate::ticket::TicketId;
use crate::transport::{Cas, StoreMode, Transport};
use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

#[derive(Debug)]
pub struct Client<T: Transport> {
    conn: Connection<T>,
    default_timeout: Option<Duration>,
}

impl<T: Transport> Client<T> {
    /// Open a connection described by `config`
    pub fn connect(transport: T, config: &ClientConfig) -> Result<Self> {
        config.validate()?;
        let conn = Connection::open(
            transport,
            config.connect_params(),
            ConnectionOptions::from(config),
        )?;
        Ok(Self::from_connection(conn, config.default_timeout()))
    }

    pub fn from_connection(conn: Connection<T>, default_timeout: Option<Duration>) -> Self {
        Self {
            conn,
            default_timeout,
        }
    }

    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout
    }

    pub fn set_default_timeout(&mut self, timeout: Option<Duration>) {
        self.default_timeout = timeout;
    }

    fn read(&self) -> GetOptions {
        GetOptions {
            timeout: self.default_timeout,
            ..Default::default()
        }
    }

    fn write(&self, ttl: Option<Duration>) -> SetOptions {
        SetOptions {
            timeout: self.default_timeout,
            ttl,
            ..Default::default()
        }
    }

    pub fn get(&mut self, key: impl AsRef<[u8]>) -> Result<Option<Bytes>> {
        let options = self.read();
        Ok(self.conn.get(key, options)?.map(|f| f.value))
    }

    /// Get and reset the expiry to `ttl`
    pub fn gat(&mut self, key: impl AsRef<[u8]>, ttl: Duration) -> Result<Option<Bytes>> {
        let options = self.read().touch(ttl);
        Ok(self.conn.get(key, options)?.map(|f| f.value))
    }

    pub fn get_cas(&mut self, key: impl AsRef<[u8]>) -> Result<Option<(Bytes, Cas)>> {
        let options = self.read().with_cas();
        Ok(self
            .conn
            .get(key, options)?
            .map(|f| (f.value, f.cas.unwrap_or_default())))
    }

    pub fn gat_cas(&mut self, key: impl AsRef<[u8]>, ttl: Duration) -> Result<Option<(Bytes, Cas)>> {
        let options = self.read().touch(ttl).with_cas();
        Ok(self
            .conn
            .get(key, options)?
            .map(|f| (f.value, f.cas.unwrap_or_default())))
    }

    pub fn set(
        &mut self,
        key: impl AsRef<[u8]>,
        value: impl AsRef<[u8]>,
        ttl: Option<Duration>,
    ) -> Result<Cas> {
        let options = self.write(ttl);
        self.conn.set(key, value, options)
    }

    /// Write only if the stored version stamp is still `cas`
    pub fn set_cas(
        &mut self,
        key: impl AsRef<[u8]>,
        value: impl AsRef<[u8]>,
        cas: Cas,
        ttl: Option<Duration>,
    ) -> Result<Cas> {
        let options = self.write(ttl).cas(cas);
        self.conn.set(key, value, options)
    }

    /// Create the key; fails with `KeyAlreadyExists` if it is present
    pub fn add(
        &mut self,
        key: impl AsRef<[u8]>,
        value: impl AsRef<[u8]>,
        ttl: Option<Duration>,
    ) -> Result<Cas> {
        let options = self.write(ttl).mode(StoreMode::Add);
        self.conn.set(key, value, options)
    }

    pub fn replace(
        &mut self,
        key: impl AsRef<[u8]>,
        value: impl AsRef<[u8]>,
        ttl: Option<Duration>,
    ) -> Result<Cas> {
        let options = self.write(ttl).mode(StoreMode::Replace);
        self.conn.set(key, value, options)
    }

    pub fn remove(&mut self, key: impl AsRef<[u8]>) -> Result<()> {
        let options = RemoveOptions {
            timeout: self.default_timeout,
            cas: None,
        };
        self.conn.remove(key, options)
    }

    pub fn remove_cas(&mut self, key: impl AsRef<[u8]>, cas: Cas) -> Result<()> {
        let options = RemoveOptions {
            timeout: self.default_timeout,
            cas: Some(cas),
        };
        self.conn.remove(key, options)
    }

    /// Fetch a JSON document. Stored values that are not valid JSON come
    /// back as a JSON string of their (lossy UTF-8) text.
    pub fn get_json(&mut self, key: impl AsRef<[u8]>) -> Result<Option<Value>> {
        Ok(self.get(key)?.map(|raw| {
            serde_json::from_slice(&raw)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&raw).into_owned()))
        }))
    }

    pub fn set_json<V: Serialize + ?Sized>(
        &mut self,
        key: impl AsRef<[u8]>,
        value: &V,
        ttl: Option<Duration>,
    ) -> Result<Cas> {
        let encoded = serde_json::to_vec(value)?;
        self.set(key, encoded, ttl)
    }

    pub fn enable_async(&mut self) {
        self.conn.enable_async();
    }

    pub fn disable_async(&mut self) {
        self.conn.disable_async();
    }

    pub fn async_limit(&self) -> usize {
        self.conn.admission_limit()
    }

    pub fn set_async_limit(&mut self, limit: usize) -> Result<()> {
        self.conn.set_admission_limit(limit)
    }

    pub fn async_pending(&self) -> usize {
        self.conn.pending_count()
    }

    pub fn async_get(&mut self, key: impl AsRef<[u8]>) -> Result<TicketId> {
        self.conn.submit_get(key, None)
    }

    pub fn async_set(
        &mut self,
        key: impl AsRef<[u8]>,
        value: impl AsRef<[u8]>,
        ttl: Option<Duration>,
    ) -> Result<TicketId> {
        let options = SetOptions {
            ttl,
            ..Default::default()
        };
        self.conn.submit_set(key, value, options)
    }

    pub fn async_remove(&mut self, key: impl AsRef<[u8]>) -> Result<TicketId> {
        self.conn.submit_remove(key, RemoveOptions::default())
    }

    /// Drain completed async results; `None` uses the default timeout
    pub fn async_wait(&mut self, timeout: Option<Duration>) -> Result<Vec<(TicketId, Outcome)>> {
        self.conn.drain(timeout.or(self.default_timeout))
    }

    pub fn connection(&self) -> &Connection<T> {
        &self.conn
    }

    pub fn connection_mut(&mut self) -> &mut Connection<T> {
        &mut self.conn
    }

    pub fn close(self) -> TeardownStats {
        self.conn.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::transport::memory::MemoryTransport;
    use serde_json::json;

    fn client() -> Client<MemoryTransport> {
        Client::connect(MemoryTransport::new(), &ClientConfig::default()).unwrap()
    }

    #[test]
    fn test_add_replace_and_cas() -> Result<()> {
        let mut c = client();
        assert_eq!(
            c.replace("k", "v", None).unwrap_err(),
            Error::Failure("KEY_ENOENT".to_string())
        );
        let cas = c.add("k", "v", None)?;
        assert!(matches!(c.add("k", "v", None), Err(Error::KeyAlreadyExists(_))));

        let (value, seen) = c.get_cas("k")?.unwrap();
        assert_eq!(&value[..], b"v");
        assert_eq!(seen, cas);

        let newer = c.set_cas("k", "w", cas, None)?;
        assert!(matches!(c.set_cas("k", "x", cas, None), Err(Error::KeyAlreadyExists(_))));
        assert!(matches!(c.remove_cas("k", cas), Err(Error::KeyAlreadyExists(_))));
        c.remove_cas("k", newer)?;
        assert_eq!(c.get("k")?, None);
        Ok(())
    }

    #[test]
    fn test_gat_extends_expiry() -> Result<()> {
        let mut c = client();
        c.set("session", "token", Some(Duration::from_secs(10)))?;
        c.connection_mut().transport_mut().advance(Duration::from_secs(8));
        assert!(c.gat("session", Duration::from_secs(60))?.is_some());
        c.connection_mut().transport_mut().advance(Duration::from_secs(30));
        assert!(c.get("session")?.is_some());
        c.connection_mut().transport_mut().advance(Duration::from_secs(60));
        assert_eq!(c.get("session")?, None);
        Ok(())
    }

    #[test]
    fn test_json_helpers() -> Result<()> {
        let mut c = client();
        c.set_json("doc", &json!({"name": "alice", "tags": [1, 2]}), None)?;
        assert_eq!(
            c.get_json("doc")?,
            Some(json!({"name": "alice", "tags": [1, 2]}))
        );

        c.set("plain", "not json", None)?;
        assert_eq!(c.get_json("plain")?, Some(json!("not json")));
        assert_eq!(c.get_json("absent")?, None);
        Ok(())
    }

    #[test]
    fn test_debug_shows_connection_state() {
        let mut c = client();
        c.set_default_timeout(Some(Duration::from_millis(40)));
        let rendered = format!("{c:?}");
        assert!(rendered.starts_with("Client"));
        assert!(rendered.contains("default_timeout: Some(40ms)"));
    }

    #[test]
    fn test_async_wait_uses_default_timeout() -> Result<()> {
        let mut c = client();
        c.set_default_timeout(Some(Duration::from_millis(20)));
        c.connection_mut()
            .transport_mut()
            .set_key_latency("slow", Duration::from_millis(500));
        c.enable_async();
        let fast = c.async_set("fast", "1", None)?;
        c.async_get("slow")?;

        let results = c.async_wait(None)?;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, fast);
        assert_eq!(c.async_pending(), 1);
        Ok(())
    }
}
