//! tspace - in-process Linda-style tuple spaces
//!
//! A space maps keys to ordered queues of values. Independently running
//! components coordinate through it: producers deposit values under a key,
//! consumers take or read them in FIFO order, blocking until a value
//! appears, optionally with a timeout, optionally filtering on content, and
//! values may expire on their own.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     SpaceDirectory                          │
//! │       ("scheme:name[:param]" -> one shared instance)        │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌──────────────────┐ ┌──────────────────┐ ┌─────────────┐  │
//! │  │   LocalSpace     │ │ GlobalLockSpace  │ │ Persistent  │  │
//! │  │   (tspace:)      │ │   (gspace:)      │ │ Space       │  │
//! │  └────────┬─────────┘ └────────┬─────────┘ └──────┬──────┘  │
//! │           │                    │                  │         │
//! │           ▼                    ▼                  ▼         │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │  key -> KeyQueue<Expirable<V>>                      │    │
//! │  │  per-key lock + conditions  |  one lock + condition │    │
//! │  ├─────────────────────────────────────────────────────┤    │
//! │  │  Sweeper (short / long generation)                  │    │
//! │  │  ListenerRegistry (a second SpaceCore)              │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Core Concepts
//!
//! ## Operations
//!
//! - `out` appends, `push` prepends, `put` replaces the whole queue
//! - `in_` takes the head, `rd` reads it; both block, `*_timeout` variants
//!   give up with `Ok(None)`, `inp`/`rdp` never block
//! - `*_match` variants select the earliest value accepted by a [`Template`]
//! - `nrd` blocks while a key holds a value, `exist_any` checks many keys
//!
//! ## Expiry
//!
//! Values inserted with a non-zero timeout become invisible once it
//! elapses. Every read path discards expired entries it walks over; the
//! background [`sweeper`] only reclaims memory.
//!
//! ## Listeners
//!
//! A [`Listener`] registered under a key fires once, on the next insertion
//! under that key, after the key's lock is released.
//!
//! ## Closing
//!
//! `close` stops the sweeper, wakes every blocked caller with
//! [`SpaceError::Closed`] and clears all state.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use tspace::{LocalSpace, Space, Template};
//!
//! let space: LocalSpace<String, String> = LocalSpace::with_defaults("example").unwrap();
//!
//! space.out("orders".into(), "a".into()).unwrap();
//! space.out("orders".into(), "b".into()).unwrap();
//! space.push("orders".into(), "urgent".into()).unwrap();
//!
//! assert_eq!(space.in_(&"orders".into()).unwrap(), "urgent");
//!
//! let only_b = Template::new("orders".to_string(), |v: &String| v == "b");
//! assert_eq!(space.inp_match(&only_b).unwrap().as_deref(), Some("b"));
//!
//! let missing = space.in_timeout(&"other".into(), Duration::from_millis(10)).unwrap();
//! assert_eq!(missing, None);
//!
//! space.close().unwrap();
//! ```

// Modules
#[cfg(feature = "async")]
pub mod async_space;
pub mod cancel;
pub mod config;
pub mod directory;
pub mod error;
pub mod listener;
pub mod metrics;
pub mod persistent;
pub mod queue;
pub mod space;
pub mod sweeper;
pub mod template;
pub mod types;

// Re-exports for convenience
#[cfg(feature = "async")]
pub use async_space::AsyncSpace;
pub use cancel::CancelToken;
pub use config::{ConfigError, DirectoryConfig, SpaceConfig};
pub use directory::{SpaceDirectory, SpaceFactory, SpaceUri, DEFAULT_SCHEME, DEFAULT_SPACE};
pub use error::{Result, SpaceError};
pub use listener::{Listener, ListenerRegistry};
pub use metrics::{MetricsSnapshot, SpaceMetrics};
pub use persistent::{LoadReport, PersistentSpace};
pub use queue::KeyQueue;
pub use space::{GlobalLockSpace, LocalSpace, Space, SpaceCore};
pub use sweeper::{Generation, SweepReport};
pub use template::{DigestMatcher, Equals, Matcher, Template};
pub use types::{Expirable, SpaceKey, SpaceValue};
