//! Connection pooling for the relational layer. The framework treats the
//! database as a collaborator: the pool manages checkout/checkin and
//! lifetime-based eviction, while drivers supply the actual connection type
//! via the [`Connection`] trait. Register a pool through the kernel's
//! extensions to reach it from handlers.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug)]
pub enum PoolError {
    Exhausted,
    ConnectFailed(String),
    Unhealthy,
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolError::Exhausted => write!(f, "connection pool exhausted"),
            PoolError::ConnectFailed(msg) => write!(f, "connect failed: {}", msg),
            PoolError::Unhealthy => write!(f, "connection failed its health check"),
        }
    }
}

impl std::error::Error for PoolError {}

pub trait Connection: Send + Sync {
    fn is_healthy(&self) -> bool;
    fn close(&mut self);
}

pub struct PoolOptions {
    pub max_size: usize,
    pub min_idle: usize,
    pub max_lifetime: Duration,
    pub idle_timeout: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            max_size: 10,
            min_idle: 2,
            max_lifetime: Duration::from_secs(30 * 60),
            idle_timeout: Duration::from_secs(10 * 60),
        }
    }
}

struct Idle<C: Connection> {
    conn: C,
    opened_at: Instant,
    parked_at: Instant,
}

/// A cloneable handle to a shared pool of idle connections.
pub struct Pool<C: Connection> {
    idle: Arc<Mutex<VecDeque<Idle<C>>>>,
    /// Open connections, idle and checked out together.
    total: Arc<std::sync::atomic::AtomicUsize>,
    options: Arc<PoolOptions>,
    connect: Arc<dyn Fn() -> Result<C, PoolError> + Send + Sync>,
}

impl<C: Connection> Clone for Pool<C> {
    fn clone(&self) -> Self {
        Self {
            idle: self.idle.clone(),
            total: self.total.clone(),
            options: self.options.clone(),
            connect: self.connect.clone(),
        }
    }
}

impl<C: Connection + 'static> Pool<C> {
    pub fn new<F>(options: PoolOptions, connect: F) -> Self
    where
        F: Fn() -> Result<C, PoolError> + Send + Sync + 'static,
    {
        let pool = Self {
            idle: Arc::new(Mutex::new(VecDeque::with_capacity(options.max_size))),
            total: Arc::new(std::sync::atomic::AtomicUsize::new(0)),
            options: Arc::new(options),
            connect: Arc::new(connect),
        };
        pool.warm_up();
        pool
    }

    fn warm_up(&self) {
        let mut idle = self.idle.lock().unwrap();
        for _ in 0..self.options.min_idle {
            match self.open() {
                Ok(entry) => idle.push_back(entry),
                Err(err) => {
                    log::warn!("pool warm-up connection failed: {}", err);
                    break;
                }
            }
        }
    }

    fn open(&self) -> Result<Idle<C>, PoolError> {
        let mut conn = (self.connect)()?;
        if !conn.is_healthy() {
            conn.close();
            return Err(PoolError::Unhealthy);
        }
        self.total.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let now = Instant::now();
        Ok(Idle {
            conn,
            opened_at: now,
            parked_at: now,
        })
    }

    fn discard(&self, mut conn: C) {
        conn.close();
        self.total.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
    }

    /// Hands out an idle connection, evicting expired ones first, or opens
    /// a new one while under `max_size`.
    pub fn checkout(&self) -> Result<C, PoolError> {
        let mut idle = self.idle.lock().unwrap();
        let now = Instant::now();

        while let Some(entry) = idle.front() {
            let expired = now.duration_since(entry.opened_at) > self.options.max_lifetime
                || now.duration_since(entry.parked_at) > self.options.idle_timeout;
            if !expired {
                break;
            }
            let entry = idle.pop_front().unwrap();
            self.discard(entry.conn);
        }

        while let Some(entry) = idle.pop_front() {
            if entry.conn.is_healthy() {
                return Ok(entry.conn);
            }
            self.discard(entry.conn);
        }

        if self.total.load(std::sync::atomic::Ordering::SeqCst) < self.options.max_size {
            return self.open().map(|entry| entry.conn);
        }
        Err(PoolError::Exhausted)
    }

    /// Returns a connection to the pool, or closes it when the pool is full
    /// or the connection went bad.
    pub fn checkin(&self, conn: C) {
        let mut idle = self.idle.lock().unwrap();
        if idle.len() < self.options.max_size && conn.is_healthy() {
            let now = Instant::now();
            idle.push_back(Idle {
                conn,
                opened_at: now,
                parked_at: now,
            });
        } else {
            self.discard(conn);
        }
    }

    pub fn idle_count(&self) -> usize {
        self.idle.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct FakeConn {
        healthy: Arc<AtomicBool>,
        closed: Arc<AtomicUsize>,
    }

    impl Connection for FakeConn {
        fn is_healthy(&self) -> bool {
            self.healthy.load(Ordering::SeqCst)
        }

        fn close(&mut self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn fake_pool(min_idle: usize) -> (Pool<FakeConn>, Arc<AtomicBool>, Arc<AtomicUsize>) {
        let healthy = Arc::new(AtomicBool::new(true));
        let closed = Arc::new(AtomicUsize::new(0));
        let (h, c) = (healthy.clone(), closed.clone());
        let pool = Pool::new(
            PoolOptions {
                min_idle,
                max_size: 4,
                ..PoolOptions::default()
            },
            move || {
                Ok(FakeConn {
                    healthy: h.clone(),
                    closed: c.clone(),
                })
            },
        );
        (pool, healthy, closed)
    }

    #[test]
    fn warm_up_fills_min_idle() {
        let (pool, _, _) = fake_pool(2);
        assert_eq!(pool.idle_count(), 2);
    }

    #[test]
    fn checkout_checkin_round_trip() {
        let (pool, _, _) = fake_pool(1);
        let conn = pool.checkout().unwrap();
        assert_eq!(pool.idle_count(), 0);
        pool.checkin(conn);
        assert_eq!(pool.idle_count(), 1);
    }

    #[test]
    fn checkout_past_max_size_is_refused() {
        let (pool, _, _) = fake_pool(0);
        let held: Vec<_> = (0..4).map(|_| pool.checkout().unwrap()).collect();
        assert!(matches!(pool.checkout(), Err(PoolError::Exhausted)));
        for conn in held {
            pool.checkin(conn);
        }
        assert!(pool.checkout().is_ok());
    }

    #[test]
    fn unhealthy_idle_connections_are_discarded() {
        let (pool, healthy, closed) = fake_pool(2);
        healthy.store(false, Ordering::SeqCst);
        // Every idle entry fails its health check and a fresh open also
        // reports unhealthy, so checkout surfaces an error.
        assert!(pool.checkout().is_err());
        assert!(closed.load(Ordering::SeqCst) >= 2);
    }

    #[test]
    fn unhealthy_checkin_closes_instead_of_parking() {
        let (pool, healthy, closed) = fake_pool(0);
        let conn = pool.checkout().unwrap();
        healthy.store(false, Ordering::SeqCst);
        let before = closed.load(Ordering::SeqCst);
        pool.checkin(conn);
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(closed.load(Ordering::SeqCst), before + 1);
    }

    #[test]
    fn failed_health_check_on_open_closes_the_connection() {
        let (pool, healthy, closed) = fake_pool(0);
        healthy.store(false, Ordering::SeqCst);
        assert!(matches!(pool.checkout(), Err(PoolError::Unhealthy)));
        assert_eq!(closed.load(Ordering::SeqCst), 1);
        // the failed open left no slot behind
        healthy.store(true, Ordering::SeqCst);
        assert!(pool.checkout().is_ok());
    }
}
